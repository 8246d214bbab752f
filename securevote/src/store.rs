use crate::*;
use log::{debug, warn};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

/// A lazy, finite stream of ledger records.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<SealedVoteRecord, LedgerError>> + Send + 'a>;

/// Append-only persistence of sealed vote records.
///
/// Ledger order says nothing about cast order.
pub trait VoteLedger: Send + Sync {
    /// Atomically store a record. A record id that is already present is rejected.
    fn append(&self, record: SealedVoteRecord) -> Result<RecordId, LedgerError>;

    /// Stream every record of an election from a snapshot taken at call time.
    ///
    /// Each call starts from the beginning. An entry that cannot be read back
    /// is yielded as `MalformedRecord`; `Unavailable` means the ledger itself
    /// could not be read.
    fn list_all(&self, election_id: &ElectionId) -> Result<RecordIter<'_>, LedgerError>;
}

/// A simple ledger that keeps records in memory
#[derive(Default)]
pub struct MemLedger {
    inner: Mutex<MemLedgerInner>,
}

#[derive(Default)]
struct MemLedgerInner {
    records: Vec<SealedVoteRecord>,
    ids: HashSet<RecordId>,
}

impl MemLedger {
    fn lock(&self) -> MutexGuard<MemLedgerInner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VoteLedger for MemLedger {
    fn append(&self, record: SealedVoteRecord) -> Result<RecordId, LedgerError> {
        let mut inner = self.lock();
        if !inner.ids.insert(record.id) {
            return Err(LedgerError::DuplicateRecord(record.id));
        }
        let id = record.id;
        inner.records.push(record);
        Ok(id)
    }

    fn list_all(&self, election_id: &ElectionId) -> Result<RecordIter<'_>, LedgerError> {
        let snapshot: Vec<SealedVoteRecord> = self
            .lock()
            .records
            .iter()
            .filter(|r| &r.election_id == election_id)
            .cloned()
            .collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }
}

/// Records with a repeated id are dropped, keeping the first.
impl From<Vec<SealedVoteRecord>> for MemLedger {
    fn from(records: Vec<SealedVoteRecord>) -> Self {
        let ledger = MemLedger::default();
        for record in records {
            let _ = ledger.append(record);
        }
        ledger
    }
}

/// A ledger persisted as one JSON record per line in an append-only file.
///
/// Appends from this process are serialized behind a lock that is waited on
/// for at most `timeout`.
pub struct FileLedger {
    path: PathBuf,
    timeout: Duration,
    state: Mutex<FileLedgerState>,
}

struct FileLedgerState {
    file: File,
    len: u64,
    ids: HashSet<RecordId>,
}

impl FileLedger {
    /// Open or create a ledger file, indexing the record ids already in it.
    pub fn open<P: AsRef<Path>>(path: P, timeout: Duration) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| unavailable(&path, e))?;

        let reader = File::open(&path).map_err(|e| unavailable(&path, e))?;
        let mut ids = HashSet::new();
        for (n, line) in BufReader::new(reader).lines().enumerate() {
            let line = line.map_err(|e| unavailable(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SealedVoteRecord>(&line) {
                Ok(record) => {
                    ids.insert(record.id);
                }
                Err(e) => warn!(
                    "securevote ledger: {} line {} is malformed: {}",
                    path.display(),
                    n + 1,
                    e
                ),
            }
        }

        let mut len = file.metadata().map_err(|e| unavailable(&path, e))?.len();
        if len > 0 && !ends_with_newline(&path).map_err(|e| unavailable(&path, e))? {
            // Terminate a torn last line so the next record starts on its own line
            (&file).write_all(b"\n").map_err(|e| unavailable(&path, e))?;
            len += 1;
        }

        debug!(
            "securevote ledger: opened {} with {} records",
            path.display(),
            ids.len()
        );

        Ok(FileLedger {
            path,
            timeout,
            state: Mutex::new(FileLedgerState { file, len, ids }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_state(&self) -> Result<MutexGuard<FileLedgerState>, LedgerError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.state.try_lock() {
                Ok(state) => return Ok(state),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(LedgerError::Unavailable(format!(
                            "timed out after {}ms waiting for {}",
                            self.timeout.as_millis(),
                            self.path.display()
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }
}

impl VoteLedger for FileLedger {
    fn append(&self, record: SealedVoteRecord) -> Result<RecordId, LedgerError> {
        let mut line = serde_json::to_vec(&record)
            .map_err(|e| LedgerError::MalformedRecord(e.to_string()))?;
        line.push(b'\n');

        let mut state = self.lock_state()?;
        if state.ids.contains(&record.id) {
            return Err(LedgerError::DuplicateRecord(record.id));
        }

        // One write per record so a line is never interleaved with another
        let FileLedgerState { file, len, .. } = &mut *state;
        append_line(file, len, &line).map_err(|e| unavailable(&self.path, e))?;
        state.ids.insert(record.id);
        Ok(record.id)
    }

    fn list_all(&self, election_id: &ElectionId) -> Result<RecordIter<'_>, LedgerError> {
        // Only bytes written before this call are part of the snapshot
        let len = self.lock_state()?.len;
        let file = File::open(&self.path).map_err(|e| unavailable(&self.path, e))?;
        let election_id = election_id.clone();
        let path = self.path.clone();

        let lines = BufReader::new(file.take(len)).lines().enumerate();
        Ok(Box::new(lines.filter_map(move |(n, line)| {
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(unavailable(&path, e))),
            };
            if line.trim().is_empty() {
                return None;
            }
            match serde_json::from_str::<SealedVoteRecord>(&line) {
                Ok(record) if record.election_id == election_id => Some(Ok(record)),
                Ok(_) => None,
                Err(e) => {
                    // Skip lines that are still recognisably another election's.
                    // Lines with no recoverable election are reported to every election.
                    match election_of(&line) {
                        Some(other) if other != election_id.as_str() => None,
                        _ => Some(Err(LedgerError::MalformedRecord(format!(
                            "line {}: {}",
                            n + 1,
                            e
                        )))),
                    }
                }
            }
        })))
    }
}

/// The election a damaged ledger line belonged to, if it can still be read.
fn election_of(line: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
        return value.get("election_id")?.as_str().map(str::to_owned);
    }

    // A torn line keeps its leading fields
    const FIELD: &str = "\"election_id\":\"";
    let start = line.find(FIELD)? + FIELD.len();
    let len = line[start..].find('"')?;
    Some(line[start..start + len].to_owned())
}

fn ends_with_newline(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn unavailable(path: &Path, e: std::io::Error) -> LedgerError {
    LedgerError::Unavailable(format!("{}: {}", path.display(), e))
}
