use log::warn;
use rand::RngCore;
use std::convert::TryInto;
use std::fs::File;
use std::io::{self, Write};

/// Length of a freshly generated master key.
pub const MASTER_KEY_LENGTH: usize = 32;

/// Generate a random master key, ready to be stored in `SECUREVOTE_MASTER_KEY`.
pub fn generate_master_key() -> [u8; MASTER_KEY_LENGTH] {
    let mut csprng = rand::rngs::OsRng {};
    let mut key = [0u8; MASTER_KEY_LENGTH];
    csprng.fill_bytes(&mut key);
    key
}

/// Append `field` to `out` behind a big-endian u32 length prefix.
///
/// Callers must keep fields below 4 GiB; ballot fields are tiny.
pub(crate) fn put_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u32).to_be_bytes());
    out.extend_from_slice(field);
}

/// Cursor over length-prefixed fields.
pub(crate) struct FieldReader<'a> {
    buf: &'a [u8],
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        FieldReader { buf }
    }

    /// Read the next length-prefixed field, or None if the buffer is short.
    pub(crate) fn field(&mut self) -> Option<&'a [u8]> {
        if self.buf.len() < 4 {
            return None;
        }
        let (len, rest) = self.buf.split_at(4);
        let len = u32::from_be_bytes(len.try_into().ok()?) as usize;
        if rest.len() < len {
            return None;
        }
        let (field, rest) = rest.split_at(len);
        self.buf = rest;
        Some(field)
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        self.buf
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// The operations an append-only line file needs from its backing file.
pub(crate) trait LineFile {
    fn append(&mut self, buf: &[u8]) -> io::Result<()>;
    fn sync(&self) -> io::Result<()>;
    fn truncate(&self, len: u64) -> io::Result<()>;
    fn current_len(&self) -> io::Result<u64>;
}

impl LineFile for File {
    fn append(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_all(buf)
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn current_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

/// Write `line` in one piece and make it durable, advancing `len`.
///
/// On failure the file is cut back to `len` so the line is either fully
/// stored or absent. If even that fails, `len` is moved to wherever the file
/// actually ends.
pub(crate) fn append_line<F: LineFile>(file: &mut F, len: &mut u64, line: &[u8]) -> io::Result<()> {
    let written = file.append(line).and_then(|_| file.sync());
    if let Err(e) = written {
        if let Err(truncate) = file.truncate(*len) {
            warn!("securevote: could not roll back a failed append: {}", truncate);
            if let Ok(actual) = file.current_len() {
                *len = actual;
            }
        }
        return Err(e);
    }
    *len += line.len() as u64;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// An in-memory file that fails on demand.
    #[derive(Default)]
    struct FlakyFile {
        data: RefCell<Vec<u8>>,
        short_write: Option<usize>,
        fail_sync: bool,
        read_only: bool,
    }

    impl LineFile for FlakyFile {
        fn append(&mut self, buf: &[u8]) -> io::Result<()> {
            match self.short_write {
                Some(n) => {
                    self.data.borrow_mut().extend_from_slice(&buf[..n.min(buf.len())]);
                    Err(io::Error::new(io::ErrorKind::Other, "disk full"))
                }
                None => {
                    self.data.borrow_mut().extend_from_slice(buf);
                    Ok(())
                }
            }
        }

        fn sync(&self) -> io::Result<()> {
            if self.fail_sync {
                Err(io::Error::new(io::ErrorKind::Other, "sync failed"))
            } else {
                Ok(())
            }
        }

        fn truncate(&self, len: u64) -> io::Result<()> {
            if self.read_only {
                return Err(io::Error::new(io::ErrorKind::Other, "read-only"));
            }
            self.data.borrow_mut().truncate(len as usize);
            Ok(())
        }

        fn current_len(&self) -> io::Result<u64> {
            Ok(self.data.borrow().len() as u64)
        }
    }

    #[test]
    fn test_append_line() {
        let mut file = tempfile::tempfile().unwrap();
        let mut len = 0;
        append_line(&mut file, &mut len, b"one\n").unwrap();
        append_line(&mut file, &mut len, b"two\n").unwrap();
        assert_eq!(len, 8);
        assert_eq!(file.current_len().unwrap(), 8);
    }

    #[test]
    fn test_failed_sync_rolls_back() {
        let mut file = FlakyFile::default();
        let mut len = 0;
        append_line(&mut file, &mut len, b"one\n").unwrap();

        file.fail_sync = true;
        assert!(append_line(&mut file, &mut len, b"two\n").is_err());
        assert_eq!(len, 4);
        assert_eq!(&file.data.borrow()[..], b"one\n");

        file.fail_sync = false;
        append_line(&mut file, &mut len, b"three\n").unwrap();
        assert_eq!(len, file.current_len().unwrap());
        assert_eq!(&file.data.borrow()[..], b"one\nthree\n");
    }

    #[test]
    fn test_short_write_rolls_back() {
        let mut file = FlakyFile {
            short_write: Some(2),
            ..Default::default()
        };
        let mut len = 0;
        assert!(append_line(&mut file, &mut len, b"one\n").is_err());
        assert_eq!(len, 0);
        assert!(file.data.borrow().is_empty());
    }

    #[test]
    fn test_failed_rollback_follows_the_file() {
        let mut file = FlakyFile {
            fail_sync: true,
            read_only: true,
            ..Default::default()
        };
        let mut len = 0;
        assert!(append_line(&mut file, &mut len, b"one\n").is_err());
        assert_eq!(len, 4);
    }

    #[test]
    fn test_fields() {
        let mut out = Vec::new();
        put_field(&mut out, b"abc");
        put_field(&mut out, b"");
        put_field(&mut out, &[7u8; 5]);

        let mut reader = FieldReader::new(&out);
        assert_eq!(reader.field(), Some(&b"abc"[..]));
        assert_eq!(reader.field(), Some(&b""[..]));
        assert_eq!(reader.field(), Some(&[7u8; 5][..]));
        assert!(reader.is_empty());
        assert_eq!(reader.field(), None);
    }

    #[test]
    fn test_truncated_field() {
        let mut out = Vec::new();
        put_field(&mut out, b"abcdef");
        out.truncate(out.len() - 1);

        let mut reader = FieldReader::new(&out);
        assert_eq!(reader.field(), None);
    }

    #[test]
    fn test_master_keys_differ() {
        assert_ne!(generate_master_key(), generate_master_key());
    }
}
