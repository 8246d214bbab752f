use super::*;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;

/// Keys, registry and helpers for an election "general-2026" with candidates A and B.
pub(crate) struct Fixture {
    pub keys: Arc<KeyVault>,
    pub registry: Arc<MemRegistry>,
    pub election: ElectionId,
    anonymizer: VoterAnonymizer<KeyVault, MemRegistry>,
    encoder: BallotEncoder<MemRegistry>,
    sealer: BallotSealer<KeyVault>,
}

impl Fixture {
    pub fn add_election(&self, id: &str, candidates: &[&str]) {
        self.keys.register_election(id.into());
        self.registry
            .publish(id.into(), candidates.iter().copied().collect());
    }

    /// Run the cast path up to, but not including, the ledger append.
    pub fn seal_for(&self, election: &ElectionId, voter: &str, candidate: &str) -> SealedVoteRecord {
        let token = self.anonymizer.tokenize(voter, election).unwrap();
        let nonce = self.encoder.next_nonce(election, &token);
        let choice = CandidateChoice::new(election.clone(), candidate);
        let payload = self
            .encoder
            .encode(token, &choice, nonce, chrono::Utc::now())
            .unwrap();
        self.sealer.seal(election, payload).unwrap()
    }
}

pub(crate) fn fixture() -> Fixture {
    let keys = Arc::new(KeyVault::new(&[11u8; 32]).unwrap());
    let registry = Arc::new(MemRegistry::default());
    let fx = Fixture {
        anonymizer: VoterAnonymizer::new(keys.clone(), registry.clone()),
        encoder: BallotEncoder::new(registry.clone()),
        sealer: BallotSealer::new(keys.clone()),
        keys,
        registry,
        election: "general-2026".into(),
    };
    fx.add_election("general-2026", &["A", "B"]);
    fx
}

pub(crate) fn sealed(fx: &Fixture, voter: &str, candidate: &str) -> SealedVoteRecord {
    fx.seal_for(&fx.election, voter, candidate)
}

/// A ledger that cannot be reached.
pub(crate) struct UnreadableLedger;

impl VoteLedger for UnreadableLedger {
    fn append(&self, _record: SealedVoteRecord) -> Result<RecordId, LedgerError> {
        Err(LedgerError::Unavailable("connection refused".into()))
    }

    fn list_all(&self, _election_id: &ElectionId) -> Result<RecordIter<'_>, LedgerError> {
        Err(LedgerError::Unavailable("connection refused".into()))
    }
}

fn tally<L: VoteLedger>(fx: &Fixture, ledger: Arc<L>) -> TallyResult {
    let engine = TallyEngine::new(
        fx.keys.clone(),
        fx.registry.clone(),
        ledger,
        Arc::new(MemAuditLog::default()),
    );
    engine.tally(&fx.election).unwrap().result
}

#[test]
fn three_distinct_voters() {
    let fx = fixture();
    let ledger = Arc::new(MemLedger::default());
    let ballot_box = BallotBox::new(fx.keys.clone(), fx.registry.clone(), ledger.clone());

    for (voter, candidate) in &[("voter-1", "A"), ("voter-2", "A"), ("voter-3", "B")] {
        ballot_box
            .cast(VoterSession::authenticated(*voter, fx.election.clone()), candidate)
            .unwrap();
    }

    let result = tally(&fx, ledger);
    assert_eq!(result.counts["A"], 2);
    assert_eq!(result.counts["B"], 1);
    assert_eq!(result.total_valid, 3);
    assert_eq!(result.total_rejected, 0);
    assert_eq!(result.total_scanned, 3);
    assert_eq!(result.winners(), vec!["A"]);
}

#[test]
fn same_voter_twice_is_counted_once() {
    let fx = fixture();
    let ledger = Arc::new(MemLedger::default());
    let ballot_box = BallotBox::new(fx.keys.clone(), fx.registry.clone(), ledger.clone());

    let first = ballot_box
        .cast(VoterSession::authenticated("voter-1", fx.election.clone()), "A")
        .unwrap();
    let second = ballot_box
        .cast(VoterSession::authenticated("voter-1", fx.election.clone()), "A")
        .unwrap();

    let result = tally(&fx, ledger);
    assert_eq!(result.counts["A"], 1);
    assert_eq!(result.counts["B"], 0);
    assert_eq!(result.total_rejected, 1);
    assert_eq!(result.total_scanned, 2);
    assert_eq!(
        result.rejections,
        vec![Rejection {
            record_id: Some(second.record_id),
            reason: VerificationFailure::Duplicate {
                counted: first.record_id
            },
        }]
    );
}

#[test]
fn earliest_cast_counts_whatever_the_ledger_order() {
    let fx = fixture();
    let first = sealed(&fx, "voter-1", "A");
    let second = sealed(&fx, "voter-1", "B");

    // The later cast sits first in the ledger
    let result = tally(&fx, Arc::new(MemLedger::from(vec![second.clone(), first.clone()])));
    assert_eq!(result.counts["A"], 1);
    assert_eq!(result.counts["B"], 0);
    assert_eq!(
        result.rejections[0].reason,
        VerificationFailure::Duplicate { counted: first.id }
    );
}

#[test]
fn tally_is_idempotent() {
    let fx = fixture();
    let ledger = Arc::new(MemLedger::default());
    for i in 0..20 {
        let candidate = if i % 3 == 0 { "B" } else { "A" };
        ledger.append(sealed(&fx, &format!("voter-{}", i % 15), candidate)).unwrap();
    }

    let a = tally(&fx, ledger.clone());
    let b = tally(&fx, ledger);
    assert!(a.same_outcome(&b));
    assert_eq!(a.total_scanned, 20);
    assert_eq!(a.total_valid, 15);
    assert_eq!(a.total_rejected, 5);
}

#[test]
fn tally_is_order_independent() {
    let fx = fixture();
    let mut records = Vec::new();
    for i in 0..12 {
        let candidate = if i % 2 == 0 { "A" } else { "B" };
        records.push(sealed(&fx, &format!("voter-{}", i % 8), candidate));
    }
    records[3].ciphertext[20] ^= 0xff;
    records[7].signer_key_id.generation = 4;

    let expected = tally(&fx, Arc::new(MemLedger::from(records.clone())));
    assert_eq!(expected.total_scanned, 12);
    assert_eq!(
        expected.total_valid + expected.total_rejected,
        expected.total_scanned
    );

    let mut rng = rand::thread_rng();
    for _ in 0..10 {
        records.shuffle(&mut rng);
        let shuffled = tally(&fx, Arc::new(MemLedger::from(records.clone())));
        assert!(shuffled.same_outcome(&expected));
    }
}

#[test]
fn corrupted_record_does_not_affect_others() {
    let fx = fixture();
    let mut records = vec![
        sealed(&fx, "voter-1", "A"),
        sealed(&fx, "voter-2", "A"),
        sealed(&fx, "voter-3", "B"),
    ];
    let last = records[1].ciphertext.len() - 1;
    records[1].ciphertext[last] ^= 0x01;

    let result = tally(&fx, Arc::new(MemLedger::from(records.clone())));
    assert_eq!(result.counts["A"], 1);
    assert_eq!(result.counts["B"], 1);
    assert_eq!(result.total_scanned, 3);
    assert_eq!(
        result.rejections,
        vec![Rejection {
            record_id: Some(records[1].id),
            reason: VerificationFailure::Decryption,
        }]
    );
}

#[test]
fn rotation_and_closing_during_an_election() {
    let fx = fixture();
    let ledger = Arc::new(MemLedger::default());
    let ballot_box = BallotBox::new(fx.keys.clone(), fx.registry.clone(), ledger.clone());

    ballot_box
        .cast(VoterSession::authenticated("voter-1", fx.election.clone()), "A")
        .unwrap();
    fx.keys.rotate_signing_key(&fx.election).unwrap();
    ballot_box
        .cast(VoterSession::authenticated("voter-2", fx.election.clone()), "B")
        .unwrap();
    fx.keys.close_submissions(&fx.election).unwrap();
    assert!(ballot_box
        .cast(VoterSession::authenticated("voter-3", fx.election.clone()), "B")
        .is_err());

    let result = tally(&fx, ledger);
    assert_eq!(result.counts["A"], 1);
    assert_eq!(result.counts["B"], 1);
    assert_eq!(result.total_scanned, 2);
}

#[test]
fn elections_are_kept_apart() {
    let fx = fixture();
    fx.add_election("local-2026", &["A", "B"]);
    let local: ElectionId = "local-2026".into();
    let ledger = Arc::new(MemLedger::default());
    let ballot_box = BallotBox::new(fx.keys.clone(), fx.registry.clone(), ledger.clone());

    ballot_box
        .cast(VoterSession::authenticated("voter-1", fx.election.clone()), "A")
        .unwrap();
    ballot_box
        .cast(VoterSession::authenticated("voter-1", local.clone()), "B")
        .unwrap();

    // The same voter in two elections is two distinct tokens, not a duplicate
    let general = tally(&fx, ledger.clone());
    assert_eq!(general.total_valid, 1);
    assert_eq!(general.total_rejected, 0);

    // A record moved into another election's stream is rejected
    let mut moved = fx.seal_for(&local, "voter-9", "A");
    moved.election_id = fx.election.clone();
    ledger.append(moved.clone()).unwrap();
    let general = tally(&fx, ledger);
    assert_eq!(
        general.rejections,
        vec![Rejection {
            record_id: Some(moved.id),
            reason: VerificationFailure::ElectionMismatch,
        }]
    );
}

#[test]
fn ledger_holds_no_voter_data() {
    let fx = fixture();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.jsonl");
    let ledger = Arc::new(FileLedger::open(&path, Duration::from_secs(1)).unwrap());
    let ballot_box = BallotBox::new(fx.keys.clone(), fx.registry.clone(), ledger);

    ballot_box
        .cast(VoterSession::authenticated("alice@example.org", fx.election.clone()), "A")
        .unwrap();

    let token = VoterAnonymizer::new(fx.keys.clone(), fx.registry.clone())
        .tokenize("alice@example.org", &fx.election)
        .unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(!text.contains("alice"));
    assert!(!text.contains(&hex::encode(token.as_bytes())));
    assert!(!text.contains("\"A\""));
}

#[test]
fn file_backed_election() {
    let fx = fixture();
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("ledger.jsonl");
    let audit_path = dir.path().join("audit.jsonl");

    {
        let ledger = Arc::new(FileLedger::open(&ledger_path, Duration::from_secs(1)).unwrap());
        let ballot_box = BallotBox::new(fx.keys.clone(), fx.registry.clone(), ledger);
        for (voter, candidate) in &[("voter-1", "A"), ("voter-2", "B"), ("voter-3", "B")] {
            ballot_box
                .cast(VoterSession::authenticated(*voter, fx.election.clone()), candidate)
                .unwrap();
        }
    }

    // A damaged line is rejected, not fatal
    let mut text = std::fs::read_to_string(&ledger_path).unwrap();
    text.push_str("{\"id\":\"truncated\n");
    std::fs::write(&ledger_path, text).unwrap();

    let ledger = Arc::new(FileLedger::open(&ledger_path, Duration::from_secs(1)).unwrap());
    let audit = Arc::new(FileAuditLog::open(&audit_path).unwrap());
    let admin = ElectionAdmin::new(fx.keys.clone(), fx.registry.clone(), ledger, audit);

    let result = admin.trigger_tally("officer", &fx.election).unwrap().result;
    assert_eq!(result.counts["A"], 1);
    assert_eq!(result.counts["B"], 2);
    assert_eq!(result.total_scanned, 4);
    assert_eq!(result.total_rejected, 1);
    assert_eq!(result.rejections[0].record_id, None);
    assert!(matches!(
        result.rejections[0].reason,
        VerificationFailure::MalformedRecord(_)
    ));

    let declaration = admin.declare_results("officer", &fx.election).unwrap();
    assert_eq!(declaration.winners, vec!["B"]);

    // The audit log survives a reopen with its chain intact
    let entries = FileAuditLog::open(&audit_path).unwrap().entries().unwrap();
    assert_eq!(entries.len(), 3);
    verify_chain(&entries).unwrap();
}

#[test]
fn concurrent_casts() {
    let fx = fixture();
    let ledger = Arc::new(MemLedger::default());
    let ballot_box = Arc::new(BallotBox::new(
        fx.keys.clone(),
        fx.registry.clone(),
        ledger.clone(),
    ));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let ballot_box = ballot_box.clone();
            let election = fx.election.clone();
            std::thread::spawn(move || {
                for i in 0..10 {
                    let voter = format!("voter-{}-{}", t, i);
                    let candidate = if t % 2 == 0 { "A" } else { "B" };
                    ballot_box
                        .cast(VoterSession::authenticated(voter, election.clone()), candidate)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let result = tally(&fx, ledger);
    assert_eq!(result.counts["A"], 40);
    assert_eq!(result.counts["B"], 40);
    assert_eq!(result.total_rejected, 0);
}
