use crate::*;
use chrono::{DateTime, Utc};
use log::info;
use std::sync::Arc;

/// The identity provider's verdict for one voter and one election.
///
/// The identity is only ever used to derive a voter token.
pub struct VoterSession {
    voter_identity: String,
    election_id: ElectionId,
    authenticated: bool,
}

impl VoterSession {
    pub fn new<S: Into<String>>(voter_identity: S, election_id: ElectionId, authenticated: bool) -> Self {
        VoterSession {
            voter_identity: voter_identity.into(),
            election_id,
            authenticated,
        }
    }

    /// A session the identity provider has vouched for.
    pub fn authenticated<S: Into<String>>(voter_identity: S, election_id: ElectionId) -> Self {
        VoterSession::new(voter_identity, election_id, true)
    }

    pub fn election_id(&self) -> &ElectionId {
        &self.election_id
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

impl std::fmt::Debug for VoterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("VoterSession")
            .field("election_id", &self.election_id)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

/// Proof of submission handed back to the voter. Carries nothing about the voter or the choice.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CastReceipt {
    pub record_id: RecordId,
    pub election_id: ElectionId,
    pub cast_at: DateTime<Utc>,
}

/// The cast path: anonymize, encode, seal and append.
pub struct BallotBox<K, R, L> {
    anonymizer: VoterAnonymizer<K, R>,
    encoder: BallotEncoder<R>,
    sealer: BallotSealer<K>,
    ledger: Arc<L>,
}

impl<K, R, L> BallotBox<K, R, L>
where
    K: KeyProvider,
    R: CandidateRegistry,
    L: VoteLedger,
{
    pub fn new(keys: Arc<K>, registry: Arc<R>, ledger: Arc<L>) -> Self {
        BallotBox {
            anonymizer: VoterAnonymizer::new(keys.clone(), registry.clone()),
            encoder: BallotEncoder::new(registry),
            sealer: BallotSealer::new(keys),
            ledger,
        }
    }

    /// Cast one ballot. Nothing is written to the ledger unless every step succeeds.
    ///
    /// A retryable failure should be retried by calling `cast` again with a new
    /// session, which picks a fresh nonce.
    pub fn cast(&self, session: VoterSession, candidate_id: &str) -> Result<CastReceipt, Error> {
        if !session.authenticated {
            return Err(Error::NotAuthenticated(session.election_id));
        }
        let election_id = session.election_id;

        let token = self
            .anonymizer
            .tokenize(&session.voter_identity, &election_id)?;

        let choice = CandidateChoice::new(election_id.clone(), candidate_id);
        let nonce = self.encoder.next_nonce(&election_id, &token);
        let payload = self.encoder.encode(token, &choice, nonce, Utc::now())?;

        let record = self.sealer.seal(&election_id, payload)?;
        let receipt = CastReceipt {
            record_id: record.id,
            election_id,
            cast_at: record.timestamp,
        };
        self.ledger.append(record)?;

        info!(
            "securevote cast: appended record {} to {}",
            receipt.record_id, receipt.election_id
        );
        Ok(receipt)
    }
}
