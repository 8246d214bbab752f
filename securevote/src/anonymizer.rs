use crate::*;
use hmac::Mac;
use std::convert::TryInto;
use std::sync::Arc;

pub const VOTER_TOKEN_LENGTH: usize = 32;

/// Anonymized, per-election stand-in for a voter's identity.
///
/// Deterministic for a given (identity, election, salt), and irreversible
/// without the salt held by the [`KeyProvider`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoterToken([u8; VOTER_TOKEN_LENGTH]);

impl VoterToken {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; VOTER_TOKEN_LENGTH] = bytes.try_into().ok()?;
        Some(VoterToken(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; VOTER_TOKEN_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for VoterToken {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "VoterToken({}..)", hex::encode(&self.0[..4]))
    }
}

/// Converts a voter identity into an unlinkable voting token.
pub struct VoterAnonymizer<K, R> {
    keys: Arc<K>,
    registry: Arc<R>,
}

impl<K: KeyProvider, R: CandidateRegistry> VoterAnonymizer<K, R> {
    pub fn new(keys: Arc<K>, registry: Arc<R>) -> Self {
        VoterAnonymizer { keys, registry }
    }

    /// HMAC-SHA256 keyed with the election's anonymizer salt over the
    /// length-prefixed identity and election id.
    pub fn tokenize(
        &self,
        voter_identity: &str,
        election_id: &ElectionId,
    ) -> Result<VoterToken, AnonymizationError> {
        // Identities differing only in surrounding whitespace are the same voter
        let voter_identity = voter_identity.trim();
        if voter_identity.is_empty() {
            return Err(AnonymizationError::EmptyIdentity);
        }
        if !self.registry.has_election(election_id) {
            return Err(AnonymizationError::UnknownElection(election_id.clone()));
        }

        let salt = self.keys.anonymizer_salt(election_id)?;
        let mut mac = salt.mac()?;

        let mut input = Vec::with_capacity(voter_identity.len() + election_id.as_str().len() + 8);
        put_field(&mut input, voter_identity.as_bytes());
        put_field(&mut input, election_id.as_str().as_bytes());
        mac.update(&input);

        let digest = mac.finalize().into_bytes();
        let mut token = [0u8; VOTER_TOKEN_LENGTH];
        token.copy_from_slice(&digest);
        Ok(VoterToken(token))
    }
}
