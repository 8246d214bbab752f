//! Administrative surface: triggering tallies, reading and declaring results,
//! and closing the submission window. Every action is audited.

use crate::*;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

/// Final results of an election, as announced.
#[derive(Serialize, Debug)]
pub struct Declaration {
    pub election_id: ElectionId,
    pub result: TallyResult,
    pub winners: Vec<String>,
    pub declared_at: DateTime<Utc>,

    /// Set when the declaration could not be written to the audit log.
    #[serde(skip)]
    pub audit_error: Option<AuditWriteError>,
}

pub struct ElectionAdmin<K, R, L, A> {
    engine: Arc<TallyEngine<K, R, L, A>>,
    keys: Arc<K>,
    ledger: Arc<L>,
    audit: Arc<A>,
    results: Arc<RwLock<HashMap<ElectionId, TallyResult>>>,
}

impl<K, R, L, A> Clone for ElectionAdmin<K, R, L, A> {
    fn clone(&self) -> Self {
        ElectionAdmin {
            engine: self.engine.clone(),
            keys: self.keys.clone(),
            ledger: self.ledger.clone(),
            audit: self.audit.clone(),
            results: self.results.clone(),
        }
    }
}

impl<K, R, L, A> ElectionAdmin<K, R, L, A>
where
    K: KeyProvider,
    R: CandidateRegistry,
    L: VoteLedger,
    A: AuditLog,
{
    pub fn new(keys: Arc<K>, registry: Arc<R>, ledger: Arc<L>, audit: Arc<A>) -> Self {
        ElectionAdmin {
            engine: Arc::new(TallyEngine::new(
                keys.clone(),
                registry,
                ledger.clone(),
                audit.clone(),
            )),
            keys,
            ledger,
            audit,
            results: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Run a tally now and keep its result as the latest unless a newer run finished first.
    pub fn trigger_tally(&self, actor: &str, election_id: &ElectionId) -> Result<Tallied, Error> {
        let requested = self
            .audit
            .record(AuditEntry::new(actor, ACTION_TALLY_REQUESTED).reference(election_id))
            .err();
        if let Some(e) = &requested {
            warn!("securevote admin: could not audit tally request: {}", e);
        }

        let mut tallied = self.engine.tally(election_id)?;
        self.store_result(&tallied.result);

        if tallied.audit_error.is_none() {
            tallied.audit_error = requested;
        }
        Ok(tallied)
    }

    /// Run a tally on a worker thread.
    pub fn spawn_tally(&self, actor: String, election_id: ElectionId) -> JoinHandle<Result<Tallied, Error>>
    where
        K: 'static,
        R: 'static,
        L: 'static,
        A: 'static,
    {
        let admin = self.clone();
        thread::spawn(move || admin.trigger_tally(&actor, &election_id))
    }

    pub fn latest_result(&self, election_id: &ElectionId) -> Option<TallyResult> {
        let results = match self.results.read() {
            Ok(results) => results,
            Err(poisoned) => poisoned.into_inner(),
        };
        results.get(election_id).cloned()
    }

    /// Announce the latest tally result and its winners.
    pub fn declare_results(&self, actor: &str, election_id: &ElectionId) -> Result<Declaration, Error> {
        let result = self
            .latest_result(election_id)
            .ok_or_else(|| Error::NoTallyResult(election_id.clone()))?;
        let winners = result.winners();

        let audit_error = self
            .audit
            .record(
                AuditEntry::new(actor, ACTION_RESULTS_DECLARED)
                    .reference(election_id)
                    .detail("winners", winners.clone())
                    .detail("total_valid", result.total_valid)
                    .detail("tally_run_at", result.run_at.to_rfc3339()),
            )
            .err();
        if let Some(e) = &audit_error {
            warn!("securevote admin: could not audit declaration: {}", e);
        }

        info!(
            "securevote admin: {} declared results for {}: {}",
            actor,
            election_id,
            winners.join(", ")
        );

        Ok(Declaration {
            election_id: election_id.clone(),
            result,
            winners,
            declared_at: Utc::now(),
            audit_error,
        })
    }

    /// End the submission window of an election.
    ///
    /// Returns the audit failure, if any; the window is closed either way.
    pub fn close_submissions(
        &self,
        actor: &str,
        election_id: &ElectionId,
    ) -> Result<Option<AuditWriteError>, Error> {
        self.keys.close_submissions(election_id)?;

        let audit_error = self
            .audit
            .record(AuditEntry::new(actor, ACTION_SUBMISSIONS_CLOSED).reference(election_id))
            .err();
        if let Some(e) = &audit_error {
            warn!("securevote admin: could not audit closing {}: {}", election_id, e);
        }
        Ok(audit_error)
    }

    /// Check a receipt's record against the ledger without revealing its choice.
    pub fn verify_record(
        &self,
        election_id: &ElectionId,
        record_id: &RecordId,
    ) -> Result<RecordStatus, Error> {
        self.engine.verify_record(election_id, record_id)
    }

    /// The sealed records stored for an election, in ledger order.
    ///
    /// Unreadable entries are skipped here; the tally reports them.
    pub fn stored_records(&self, election_id: &ElectionId) -> Result<Vec<SealedVoteRecord>, Error> {
        let mut records = Vec::new();
        for item in self.ledger.list_all(election_id)? {
            match item {
                Ok(record) => records.push(record),
                Err(LedgerError::MalformedRecord(detail)) => {
                    warn!("securevote admin: skipping unreadable record: {}", detail)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(records)
    }

    /// The audit log, newest entry first.
    pub fn audit_trail(&self) -> Result<Vec<AuditEntry>, AuditWriteError> {
        let mut entries = self.audit.entries()?;
        entries.reverse();
        Ok(entries)
    }

    fn store_result(&self, result: &TallyResult) {
        let mut results = match self.results.write() {
            Ok(results) => results,
            Err(poisoned) => poisoned.into_inner(),
        };
        let superseded = match results.get(&result.election_id) {
            Some(latest) => latest.run_at <= result.run_at,
            None => true,
        };
        if superseded {
            results.insert(result.election_id.clone(), result.clone());
        }
    }
}
