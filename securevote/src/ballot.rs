//! Canonical ballot encoding.
//!
//! Field order is fixed: voter token, candidate id, nonce, cast timestamp.
//! Each field is written behind a big-endian u32 length prefix. The nonce is
//! a big-endian u64 and the timestamp is a big-endian i64 of Unix
//! milliseconds. The same logical ballot always encodes to the same bytes.

use crate::*;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// How long a voter's last nonce is remembered after it was accepted.
pub const NONCE_RETENTION: Duration = Duration::from_secs(10 * 60);

/// A ballot ready to be signed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BallotPayload {
    pub token: VoterToken,
    pub candidate_id: String,
    pub nonce: u64,
    pub cast_at: DateTime<Utc>,
}

impl BallotPayload {
    /// Canonical bytes. The election signature covers exactly these.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 * 4 + VOTER_TOKEN_LENGTH + self.candidate_id.len() + 16);
        put_field(&mut out, self.token.as_bytes());
        put_field(&mut out, self.candidate_id.as_bytes());
        put_field(&mut out, &self.nonce.to_be_bytes());
        put_field(&mut out, &self.cast_at.timestamp_millis().to_be_bytes());
        out
    }

    /// Parse canonical bytes. Anything but an exact encoding is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        let mut reader = FieldReader::new(bytes);

        let token = reader
            .field()
            .and_then(VoterToken::from_bytes)
            .ok_or(EncodingError::Malformed("voter token"))?;

        let candidate_id = reader
            .field()
            .and_then(|f| std::str::from_utf8(f).ok())
            .ok_or(EncodingError::Malformed("candidate id"))?
            .to_owned();

        let nonce = reader
            .field()
            .and_then(|f| f.try_into().ok())
            .map(u64::from_be_bytes)
            .ok_or(EncodingError::Malformed("nonce"))?;

        let millis = reader
            .field()
            .and_then(|f| f.try_into().ok())
            .map(i64::from_be_bytes)
            .ok_or(EncodingError::Malformed("timestamp"))?;
        let cast_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or(EncodingError::Malformed("timestamp"))?;

        if !reader.is_empty() {
            return Err(EncodingError::Malformed("trailing bytes"));
        }

        Ok(BallotPayload {
            token,
            candidate_id,
            nonce,
            cast_at,
        })
    }
}

/// Serializes candidate choices into canonical payloads and enforces fresh nonces.
///
/// Each voter's last nonce is kept for `NONCE_RETENTION`. Forgotten nonces
/// raise a shared floor that every later nonce must exceed, so memory stays
/// bounded by the voters active in the window.
pub struct BallotEncoder<R> {
    registry: Arc<R>,
    nonces: Mutex<NonceBook>,
}

struct NonceBook {
    last: HashMap<(ElectionId, VoterToken), (u64, Instant)>,
    floor: u64,
    pruned_at: Instant,
}

impl NonceBook {
    fn prune(&mut self, cutoff: Instant) {
        let mut floor = self.floor;
        self.last.retain(|_, (nonce, accepted)| {
            if *accepted < cutoff {
                floor = floor.max(*nonce);
                false
            } else {
                true
            }
        });
        self.floor = floor;
    }
}

impl<R: CandidateRegistry> BallotEncoder<R> {
    pub fn new(registry: Arc<R>) -> Self {
        BallotEncoder {
            registry,
            nonces: Mutex::new(NonceBook {
                last: HashMap::new(),
                floor: 0,
                pruned_at: Instant::now(),
            }),
        }
    }

    fn nonces(&self) -> MutexGuard<NonceBook> {
        match self.nonces.lock() {
            Ok(nonces) => nonces,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// A nonce greater than any this encoder has accepted for the voter.
    ///
    /// Based on the clock in microseconds so it keeps increasing across restarts.
    pub fn next_nonce(&self, election_id: &ElectionId, token: &VoterToken) -> u64 {
        let now = Utc::now().timestamp_micros();
        let now = if now > 0 { now as u64 } else { 0 };

        let nonces = self.nonces();
        let last = match nonces.last.get(&(election_id.clone(), *token)) {
            Some((last, _)) => (*last).max(nonces.floor),
            None => nonces.floor,
        };
        if last >= now {
            last.saturating_add(1)
        } else {
            now.max(1)
        }
    }

    /// Encode one ballot. The nonce is consumed on success.
    pub fn encode(
        &self,
        token: VoterToken,
        choice: &CandidateChoice,
        nonce: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<BallotPayload, EncodingError> {
        let candidates = self
            .registry
            .candidates(&choice.election_id)
            .ok_or_else(|| EncodingError::UnknownElection(choice.election_id.clone()))?;
        if !candidates.contains(&choice.candidate_id) {
            return Err(EncodingError::UnknownCandidate(choice.candidate_id.clone()));
        }

        // Millisecond precision, so decoding gives back the identical payload
        let cast_at = Utc
            .timestamp_millis_opt(timestamp.timestamp_millis())
            .single()
            .ok_or(EncodingError::TimestampOutOfRange)?;

        let now = Instant::now();
        let mut nonces = self.nonces();
        if now.duration_since(nonces.pruned_at) >= NONCE_RETENTION {
            if let Some(cutoff) = now.checked_sub(NONCE_RETENTION) {
                nonces.prune(cutoff);
            }
            nonces.pruned_at = now;
        }

        let key = (choice.election_id.clone(), token);
        let last = match nonces.last.get(&key) {
            Some((last, _)) => (*last).max(nonces.floor),
            None => nonces.floor,
        };
        if nonce <= last {
            return Err(EncodingError::StaleNonce { nonce, last });
        }
        nonces.last.insert(key, (nonce, now));

        Ok(BallotPayload {
            token,
            candidate_id: choice.candidate_id.clone(),
            nonce,
            cast_at,
        })
    }
}
