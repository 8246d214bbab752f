//! Append-only, hash-chained audit log of administrative and tally actions.
//!
//! Every entry stores the hash of the entry before it. The hash is SHA-256
//! over the CBOR encoding of every field except the hash itself, so editing,
//! dropping or reordering entries breaks the chain.

use crate::*;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const ACTION_TALLY_REQUESTED: &str = "tally.requested";
pub const ACTION_TALLY_COMPLETED: &str = "tally.completed";
pub const ACTION_RESULTS_DECLARED: &str = "results.declared";
pub const ACTION_SUBMISSIONS_CLOSED: &str = "election.submissions_closed";

/// `previous_hash` of the first entry in a log.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub details: IndexMap<String, serde_json::Value>,

    #[serde(default)]
    pub previous_hash: String,

    #[serde(default)]
    pub hash: String,
}

// Everything covered by an entry's hash
#[derive(Serialize)]
struct HashedFields<'a> {
    actor: &'a str,
    action: &'a str,
    timestamp: &'a DateTime<Utc>,
    reference_id: &'a Option<String>,
    details: &'a IndexMap<String, serde_json::Value>,
    previous_hash: &'a str,
}

impl AuditEntry {
    /// A new, unlinked entry stamped with the current time.
    pub fn new<A: Into<String>, B: Into<String>>(actor: A, action: B) -> Self {
        AuditEntry {
            actor: actor.into(),
            action: action.into(),
            timestamp: Utc::now(),
            reference_id: None,
            details: IndexMap::new(),
            previous_hash: String::new(),
            hash: String::new(),
        }
    }

    pub fn reference<S: ToString>(mut self, reference_id: S) -> Self {
        self.reference_id = Some(reference_id.to_string());
        self
    }

    pub fn detail<K: Into<String>, V: Into<serde_json::Value>>(mut self, key: K, value: V) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn compute_hash(&self) -> Result<String, AuditWriteError> {
        let fields = HashedFields {
            actor: &self.actor,
            action: &self.action,
            timestamp: &self.timestamp,
            reference_id: &self.reference_id,
            details: &self.details,
            previous_hash: &self.previous_hash,
        };
        let bytes = serde_cbor::to_vec(&fields)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Chain this entry onto `head`, the current last entry of a log.
    ///
    /// The timestamp is raised to the head's if the clock went backwards, so
    /// a log is always ordered by timestamp.
    fn link(mut self, head: Option<&AuditEntry>) -> Result<Self, AuditWriteError> {
        match head {
            Some(head) => {
                self.previous_hash = head.hash.clone();
                if self.timestamp < head.timestamp {
                    self.timestamp = head.timestamp;
                }
            }
            None => self.previous_hash = GENESIS_HASH.to_owned(),
        }
        self.hash = self.compute_hash()?;
        Ok(self)
    }
}

/// Check the hash chain of a whole log, reporting the first broken entry.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), AuditWriteError> {
    let mut previous: Option<&AuditEntry> = None;
    for (i, entry) in entries.iter().enumerate() {
        let expected_previous = previous.map(|p| p.hash.as_str()).unwrap_or(GENESIS_HASH);
        if entry.previous_hash != expected_previous {
            return Err(AuditWriteError::ChainBroken(i));
        }
        if let Some(previous) = previous {
            if entry.timestamp < previous.timestamp {
                return Err(AuditWriteError::ChainBroken(i));
            }
        }
        if entry.hash != entry.compute_hash()? {
            return Err(AuditWriteError::ChainBroken(i));
        }
        previous = Some(entry);
    }
    Ok(())
}

/// Append-only audit trail.
///
/// A failed write is reported to the caller, who must not undo the audited action.
pub trait AuditLog: Send + Sync {
    /// Link and persist an entry, returning it as stored.
    fn record(&self, entry: AuditEntry) -> Result<AuditEntry, AuditWriteError>;

    /// Every entry, oldest first.
    fn entries(&self) -> Result<Vec<AuditEntry>, AuditWriteError>;
}

/// An audit log held in memory
#[derive(Default)]
pub struct MemAuditLog {
    inner: Mutex<Vec<AuditEntry>>,
}

impl AuditLog for MemAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<AuditEntry, AuditWriteError> {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = entry.link(inner.last())?;
        inner.push(entry.clone());
        Ok(entry)
    }

    fn entries(&self) -> Result<Vec<AuditEntry>, AuditWriteError> {
        match self.inner.lock() {
            Ok(inner) => Ok(inner.clone()),
            Err(poisoned) => Ok(poisoned.into_inner().clone()),
        }
    }
}

/// An audit log persisted as JSON lines. The chain is verified on open.
///
/// A torn last line, left by a write that never completed, is cut off on
/// open. Damage anywhere else refuses to open.
pub struct FileAuditLog {
    path: PathBuf,
    state: Mutex<FileAuditState>,
}

struct FileAuditState {
    file: File,
    len: u64,
    head: Option<AuditEntry>,
}

impl FileAuditLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AuditWriteError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let contents = read_log(&path)?;
        verify_chain(&contents.entries)?;

        let len = contents.len;
        if len < file.metadata()?.len() {
            warn!(
                "securevote audit: dropping unfinished entry at byte {} of {}",
                len,
                path.display()
            );
            file.set_len(len)?;
        }
        info!(
            "securevote audit: loaded {} entries from {}",
            contents.entries.len(),
            path.display()
        );

        Ok(FileAuditLog {
            path,
            state: Mutex::new(FileAuditState {
                file,
                len,
                head: contents.entries.into_iter().last(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<FileAuditState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl AuditLog for FileAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<AuditEntry, AuditWriteError> {
        let mut state = self.lock();
        let entry = entry.link(state.head.as_ref())?;

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        let FileAuditState { file, len, .. } = &mut *state;
        append_line(file, len, &line)?;

        debug!("securevote audit: recorded {} by {}", entry.action, entry.actor);
        state.head = Some(entry.clone());
        Ok(entry)
    }

    fn entries(&self) -> Result<Vec<AuditEntry>, AuditWriteError> {
        // Hold the lock so a concurrent append is never read half-written
        let _state = self.lock();
        Ok(read_log(&self.path)?.entries)
    }
}

struct LogContents {
    entries: Vec<AuditEntry>,
    /// Bytes up to the end of the last complete entry.
    len: u64,
}

fn read_log(path: &Path) -> Result<LogContents, AuditWriteError> {
    let bytes = std::fs::read(path)?;
    let mut entries: Vec<AuditEntry> = Vec::new();
    let mut offset = 0;
    let mut len = 0;

    for line in bytes.split_inclusive(|b| *b == b'\n') {
        offset += line.len();
        // An unterminated line is a write that never finished
        if !line.ends_with(b"\n") {
            break;
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            len = offset;
            continue;
        }

        match serde_json::from_slice(line) {
            Ok(entry) => {
                entries.push(entry);
                len = offset;
            }
            Err(_) if bytes[offset..].iter().all(u8::is_ascii_whitespace) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(LogContents {
        entries,
        len: len as u64,
    })
}

/// An audit log that cannot be written, standing in for one that failed to open.
///
/// Every operation reports `Unavailable`, so audited actions still run and
/// carry the failure back to the caller.
pub struct UnavailableAuditLog {
    reason: String,
}

impl UnavailableAuditLog {
    pub fn new<S: ToString>(reason: S) -> Self {
        UnavailableAuditLog {
            reason: reason.to_string(),
        }
    }
}

impl AuditLog for UnavailableAuditLog {
    fn record(&self, _entry: AuditEntry) -> Result<AuditEntry, AuditWriteError> {
        Err(AuditWriteError::Unavailable(self.reason.clone()))
    }

    fn entries(&self) -> Result<Vec<AuditEntry>, AuditWriteError> {
        Err(AuditWriteError::Unavailable(self.reason.clone()))
    }
}

impl<T: AuditLog + ?Sized> AuditLog for Box<T> {
    fn record(&self, entry: AuditEntry) -> Result<AuditEntry, AuditWriteError> {
        (**self).record(entry)
    }

    fn entries(&self) -> Result<Vec<AuditEntry>, AuditWriteError> {
        (**self).entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record_three(log: &dyn AuditLog) {
        log.record(AuditEntry::new("admin", ACTION_TALLY_REQUESTED).reference("general-2026"))
            .unwrap();
        log.record(
            AuditEntry::new("admin", ACTION_TALLY_COMPLETED)
                .reference("general-2026")
                .detail("total_valid", 3)
                .detail("total_rejected", 0),
        )
        .unwrap();
        log.record(AuditEntry::new("admin", ACTION_RESULTS_DECLARED))
            .unwrap();
    }

    #[test]
    fn test_chain() {
        let log = MemAuditLog::default();
        record_three(&log);

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].previous_hash, GENESIS_HASH);
        assert_eq!(entries[1].previous_hash, entries[0].hash);
        assert_eq!(entries[2].previous_hash, entries[1].hash);
        assert_eq!(entries[1].details["total_valid"], serde_json::json!(3));
        verify_chain(&entries).unwrap();
    }

    #[test]
    fn test_tampering_is_detected() {
        let log = MemAuditLog::default();
        record_three(&log);
        let entries = log.entries().unwrap();

        let mut edited = entries.clone();
        edited[1].details.insert("total_valid".into(), serde_json::json!(4));
        assert!(matches!(
            verify_chain(&edited),
            Err(AuditWriteError::ChainBroken(1))
        ));

        let mut dropped = entries.clone();
        dropped.remove(1);
        assert!(matches!(
            verify_chain(&dropped),
            Err(AuditWriteError::ChainBroken(1))
        ));

        let mut swapped = entries;
        swapped.swap(0, 2);
        assert!(matches!(
            verify_chain(&swapped),
            Err(AuditWriteError::ChainBroken(0))
        ));
    }

    #[test]
    fn test_timestamps_stay_ordered() {
        let log = MemAuditLog::default();
        let first = log.record(AuditEntry::new("admin", "a")).unwrap();

        let mut late = AuditEntry::new("admin", "b");
        late.timestamp = first.timestamp - Duration::hours(1);
        let second = log.record(late).unwrap();

        assert_eq!(second.timestamp, first.timestamp);
        verify_chain(&log.entries().unwrap()).unwrap();
    }

    #[test]
    fn test_file_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = FileAuditLog::open(&path).unwrap();
            record_three(&log);
        }

        // Reopening continues the same chain
        let log = FileAuditLog::open(&path).unwrap();
        let fourth = log
            .record(AuditEntry::new("admin", ACTION_SUBMISSIONS_CLOSED))
            .unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[3], fourth);
        assert_eq!(fourth.previous_hash, entries[2].hash);
        verify_chain(&entries).unwrap();
    }

    #[test]
    fn test_file_log_refuses_tampered_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = FileAuditLog::open(&path).unwrap();
            record_three(&log);
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let tampered = text.replacen("\"total_valid\":3", "\"total_valid\":30", 1);
        assert_ne!(text, tampered);
        std::fs::write(&path, tampered).unwrap();

        assert!(matches!(
            FileAuditLog::open(&path),
            Err(AuditWriteError::ChainBroken(1))
        ));
    }

    #[test]
    fn test_file_log_drops_torn_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let first = {
            let log = FileAuditLog::open(&path).unwrap();
            log.record(AuditEntry::new("admin", ACTION_TALLY_REQUESTED))
                .unwrap()
        };

        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("{\"actor\":\"a\",\"act");
        std::fs::write(&path, &text).unwrap();

        let log = FileAuditLog::open(&path).unwrap();
        assert_eq!(log.entries().unwrap(), vec![first.clone()]);

        let second = log
            .record(AuditEntry::new("admin", ACTION_TALLY_COMPLETED))
            .unwrap();
        assert_eq!(second.previous_hash, first.hash);

        let entries = FileAuditLog::open(&path).unwrap().entries().unwrap();
        assert_eq!(entries, vec![first, second]);
        verify_chain(&entries).unwrap();
    }

    #[test]
    fn test_file_log_drops_unterminated_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = FileAuditLog::open(&path).unwrap();
            record_three(&log);
        }

        // The final newline never made it to disk
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.pop();
        std::fs::write(&path, &text).unwrap();

        let log = FileAuditLog::open(&path).unwrap();
        assert_eq!(log.entries().unwrap().len(), 2);
        log.record(AuditEntry::new("admin", ACTION_RESULTS_DECLARED))
            .unwrap();
        verify_chain(&log.entries().unwrap()).unwrap();
    }

    #[test]
    fn test_file_log_refuses_damaged_middle_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = FileAuditLog::open(&path).unwrap();
            record_three(&log);
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines[1] = "{\"actor\":";
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();

        assert!(matches!(
            FileAuditLog::open(&path),
            Err(AuditWriteError::Serialization(_))
        ));
    }

    #[test]
    fn test_unavailable_log() {
        let log: Box<dyn AuditLog> = Box::new(UnavailableAuditLog::new("disk gone"));
        match log.record(AuditEntry::new("admin", ACTION_TALLY_REQUESTED)) {
            Err(AuditWriteError::Unavailable(reason)) => assert_eq!(reason, "disk gone"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(log.entries().is_err());
    }
}
