use crate::*;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tallystick::plurality::DefaultPluralityTally;

/// Actor recorded on audit entries written by the engine itself.
pub const TALLY_ACTOR: &str = "tally-engine";

/// A record that was scanned but not counted, and why.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// None when the ledger entry was too damaged to carry an id.
    pub record_id: Option<RecordId>,
    pub reason: VerificationFailure,
}

/// The outcome of one tally run. Never mutated; a newer run supersedes it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TallyResult {
    pub election_id: ElectionId,

    /// Every published candidate, including those with no votes.
    pub counts: BTreeMap<String, u64>,

    pub total_valid: u64,
    pub total_rejected: u64,
    pub total_scanned: u64,
    pub rejections: Vec<Rejection>,
    pub run_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl TallyResult {
    /// True if both runs counted the same thing, ignoring when and how long they ran.
    pub fn same_outcome(&self, other: &TallyResult) -> bool {
        self.election_id == other.election_id
            && self.counts == other.counts
            && self.total_valid == other.total_valid
            && self.total_rejected == other.total_rejected
            && self.total_scanned == other.total_scanned
            && self.rejections == other.rejections
    }

    /// Plurality winners. Candidates tied for first are all returned, sorted by id.
    pub fn winners(&self) -> Vec<String> {
        let mut tally = DefaultPluralityTally::new(1);
        for (candidate, count) in &self.counts {
            if *count > 0 {
                tally.add_weighted(candidate.clone(), *count);
            }
        }
        let mut winners = tally.winners().into_unranked();
        winners.sort();
        winners
    }
}

/// Whether a single stored record verifies.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RecordStatus {
    Valid,
    Missing,
    Rejected(VerificationFailure),
}

/// A tally result plus the outcome of auditing it.
///
/// A failed audit write does not make the result any less valid.
#[derive(Debug)]
pub struct Tallied {
    pub result: TallyResult,
    pub audit_error: Option<AuditWriteError>,
}

// Ordering key for the records of one voter token: the earliest cast counts
type CastOrder = (u64, DateTime<Utc>, RecordId);

struct Counted {
    order: CastOrder,
    candidate_id: String,
}

/// Scans the ledger of an election and counts one vote per voter token.
pub struct TallyEngine<K, R, L, A> {
    sealer: BallotSealer<K>,
    registry: Arc<R>,
    ledger: Arc<L>,
    audit: Arc<A>,
}

impl<K, R, L, A> TallyEngine<K, R, L, A>
where
    K: KeyProvider,
    R: CandidateRegistry,
    L: VoteLedger,
    A: AuditLog,
{
    pub fn new(keys: Arc<K>, registry: Arc<R>, ledger: Arc<L>, audit: Arc<A>) -> Self {
        TallyEngine {
            sealer: BallotSealer::new(keys),
            registry,
            ledger,
            audit,
        }
    }

    /// Run a full tally of one election.
    ///
    /// Bad records are rejected and the run continues. Only a ledger that
    /// cannot be read at all aborts the run. Each call works on its own
    /// snapshot, so concurrent runs do not interfere.
    pub fn tally(&self, election_id: &ElectionId) -> Result<Tallied, Error> {
        let candidates = self
            .registry
            .candidates(election_id)
            .ok_or_else(|| Error::UnknownElection(election_id.clone()))?;

        let started = Instant::now();
        let run_at = Utc::now();

        let mut scanned = 0u64;
        let mut rejections = Vec::new();
        let mut by_token: HashMap<VoterToken, Vec<Counted>> = HashMap::new();

        for item in self.ledger.list_all(election_id)? {
            let record = match item {
                Ok(record) => record,
                Err(LedgerError::MalformedRecord(detail)) => {
                    scanned += 1;
                    rejections.push(Rejection {
                        record_id: None,
                        reason: VerificationFailure::MalformedRecord(detail),
                    });
                    continue;
                }
                Err(e) => {
                    warn!("securevote tally: aborting run for {}: {}", election_id, e);
                    return Err(e.into());
                }
            };
            scanned += 1;

            let payload = self.check(election_id, &candidates, &record);
            match payload {
                Ok(payload) => by_token.entry(payload.token).or_default().push(Counted {
                    order: (payload.nonce, payload.cast_at, record.id),
                    candidate_id: payload.candidate_id,
                }),
                Err(reason) => rejections.push(Rejection {
                    record_id: Some(record.id),
                    reason,
                }),
            }
        }

        let mut counts: BTreeMap<String, u64> =
            candidates.ids().map(|id| (id.to_owned(), 0)).collect();
        for (_, mut casts) in by_token {
            casts.sort_by(|a, b| a.order.cmp(&b.order));
            let mut casts = casts.into_iter();
            if let Some(first) = casts.next() {
                let counted = first.order.2;
                *counts.entry(first.candidate_id).or_insert(0) += 1;
                for duplicate in casts {
                    rejections.push(Rejection {
                        record_id: Some(duplicate.order.2),
                        reason: VerificationFailure::Duplicate { counted },
                    });
                }
            }
        }

        // Independent of ledger order
        rejections.sort_by_cached_key(|r| (r.record_id, r.reason.to_string()));

        let total_valid: u64 = counts.values().sum();
        let result = TallyResult {
            election_id: election_id.clone(),
            total_valid,
            total_rejected: rejections.len() as u64,
            total_scanned: scanned,
            counts,
            rejections,
            run_at,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            "securevote tally: {} scanned {} records, {} valid, {} rejected in {}ms",
            election_id,
            result.total_scanned,
            result.total_valid,
            result.total_rejected,
            result.duration_ms
        );

        let audit_error = self.audit_run(&result).err();
        if let Some(e) = &audit_error {
            warn!("securevote tally: could not audit run for {}: {}", election_id, e);
        }

        Ok(Tallied { result, audit_error })
    }

    /// Check that a stored record would pass the tally's verification.
    ///
    /// Only the status is returned, never the choice inside. `Valid` does not
    /// say whether the record is the one counted for its voter.
    pub fn verify_record(
        &self,
        election_id: &ElectionId,
        record_id: &RecordId,
    ) -> Result<RecordStatus, Error> {
        let candidates = self
            .registry
            .candidates(election_id)
            .ok_or_else(|| Error::UnknownElection(election_id.clone()))?;

        for item in self.ledger.list_all(election_id)? {
            let record = match item {
                Ok(record) => record,
                Err(LedgerError::MalformedRecord(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            if &record.id != record_id {
                continue;
            }
            return Ok(match self.check(election_id, &candidates, &record) {
                Ok(_) => RecordStatus::Valid,
                Err(reason) => RecordStatus::Rejected(reason),
            });
        }
        Ok(RecordStatus::Missing)
    }

    fn check(
        &self,
        election_id: &ElectionId,
        candidates: &CandidateSet,
        record: &SealedVoteRecord,
    ) -> Result<BallotPayload, VerificationFailure> {
        if &record.election_id != election_id {
            return Err(VerificationFailure::ElectionMismatch);
        }
        let payload = self.sealer.unseal(record)?;
        if !candidates.contains(&payload.candidate_id) {
            return Err(VerificationFailure::UnknownCandidate(payload.candidate_id));
        }
        Ok(payload)
    }

    fn audit_run(&self, result: &TallyResult) -> Result<AuditEntry, AuditWriteError> {
        let counts: serde_json::Map<String, serde_json::Value> = result
            .counts
            .iter()
            .map(|(candidate, count)| (candidate.clone(), (*count).into()))
            .collect();

        self.audit.record(
            AuditEntry::new(TALLY_ACTOR, ACTION_TALLY_COMPLETED)
                .reference(&result.election_id)
                .detail("counts", counts)
                .detail("total_valid", result.total_valid)
                .detail("total_rejected", result.total_rejected)
                .detail("total_scanned", result.total_scanned)
                .detail("duration_ms", result.duration_ms),
        )
    }
}
