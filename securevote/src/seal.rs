//! Ballot Signer & Sealer.
//!
//! A payload is signed with the election's Ed25519 key, then
//! `len32(payload) ‖ payload ‖ signature` is encrypted with AES-256-GCM under
//! the election's ballot key. The 12 byte encryption nonce is random for
//! every seal and is prefixed to the ciphertext. The associated data binds
//! the record id, the election id, the signer key id and the cast timestamp.

use crate::*;
use aes_gcm::aead::{generic_array::GenericArray, Aead, Payload};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, SIGNATURE_LENGTH};
use log::debug;
use rand::{thread_rng, Rng};
use std::convert::TryFrom;
use std::sync::Arc;
use uuid::Uuid;

pub type RecordId = Uuid;

const AES_IV_LENGTH: usize = 12;
const AES_TAG_LENGTH: usize = 16;

/// The encrypted, signed unit persisted for every cast ballot.
///
/// Nothing in it identifies the voter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SealedVoteRecord {
    pub id: RecordId,
    pub election_id: ElectionId,

    #[serde(with = "hex_serde")]
    pub ciphertext: Vec<u8>,

    pub signer_key_id: SignerKeyId,
    pub timestamp: DateTime<Utc>,
}

impl SealedVoteRecord {
    fn associated_data(&self) -> Vec<u8> {
        associated_data(
            &self.id,
            &self.election_id,
            &self.signer_key_id,
            &self.timestamp,
        )
    }
}

fn associated_data(
    id: &RecordId,
    election_id: &ElectionId,
    key_id: &SignerKeyId,
    timestamp: &DateTime<Utc>,
) -> Vec<u8> {
    let key_id = key_id.to_string();
    let mut aad = Vec::with_capacity(16 + election_id.as_str().len() + key_id.len() + 8 + 16);
    put_field(&mut aad, id.as_bytes());
    put_field(&mut aad, election_id.as_str().as_bytes());
    put_field(&mut aad, key_id.as_bytes());
    put_field(&mut aad, &timestamp.timestamp_millis().to_be_bytes());
    aad
}

/// Signs and encrypts ballots, and reverses both steps for the tally.
pub struct BallotSealer<K> {
    keys: Arc<K>,
}

impl<K: KeyProvider> BallotSealer<K> {
    pub fn new(keys: Arc<K>) -> Self {
        BallotSealer { keys }
    }

    /// Sign then encrypt a payload into a fresh record.
    ///
    /// The payload is consumed; the plaintext does not outlive this call.
    pub fn seal(
        &self,
        election_id: &ElectionId,
        payload: BallotPayload,
    ) -> Result<SealedVoteRecord, Error> {
        let signing_key = self
            .keys
            .signing_key(election_id)
            .map_err(SigningError::from)?;
        let ballot_key = self
            .keys
            .ballot_key(election_id)
            .map_err(SealingError::from)?;

        let bytes = payload.as_bytes();
        if bytes.len() > u32::MAX as usize {
            return Err(SealingError::PayloadTooLarge.into());
        }
        let signature = signing_key.sign(&bytes);

        let mut plaintext = Vec::with_capacity(4 + bytes.len() + SIGNATURE_LENGTH);
        put_field(&mut plaintext, &bytes);
        plaintext.extend_from_slice(&signature.to_bytes());

        let id = Uuid::new_v4();
        let aad = associated_data(&id, election_id, signing_key.id(), &payload.cast_at);
        let ciphertext = encrypt(&ballot_key, &plaintext, &aad)?;

        debug!(
            "securevote sealer: sealed record {} with key {}",
            id,
            signing_key.id()
        );

        Ok(SealedVoteRecord {
            id,
            election_id: election_id.clone(),
            ciphertext,
            signer_key_id: signing_key.id().clone(),
            timestamp: payload.cast_at,
        })
    }

    /// Decrypt a record and verify its signature, recovering the payload.
    pub fn unseal(&self, record: &SealedVoteRecord) -> Result<BallotPayload, VerificationFailure> {
        if record.signer_key_id.election_id != record.election_id {
            return Err(VerificationFailure::ElectionMismatch);
        }
        let public = self
            .keys
            .verifying_key(&record.signer_key_id)
            .ok_or_else(|| VerificationFailure::UnknownSigner(record.signer_key_id.clone()))?;
        let ballot_key = self
            .keys
            .ballot_key(&record.election_id)
            .map_err(|_| VerificationFailure::KeyUnavailable)?;

        let plaintext = decrypt(&ballot_key, &record.ciphertext, &record.associated_data())?;

        let mut reader = FieldReader::new(&plaintext);
        let bytes = reader.field().ok_or(VerificationFailure::MalformedEnvelope)?;
        let signature = reader.remaining();
        if signature.len() != SIGNATURE_LENGTH {
            return Err(VerificationFailure::MalformedEnvelope);
        }
        let signature =
            Signature::try_from(signature).map_err(|_| VerificationFailure::MalformedEnvelope)?;

        public
            .verify_strict(bytes, &signature)
            .map_err(|_| VerificationFailure::BadSignature)?;

        let payload = BallotPayload::from_bytes(bytes)
            .map_err(|e| VerificationFailure::MalformedPayload(e.to_string()))?;

        // The associated data only covers whole milliseconds
        if payload.cast_at != record.timestamp {
            return Err(VerificationFailure::TimestampMismatch);
        }
        Ok(payload)
    }
}

fn encrypt(key: &BallotKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, SealingError> {
    let cipher = key.cipher();

    let mut nonce = [0u8; AES_IV_LENGTH];
    thread_rng().fill(&mut nonce);
    let nonce = GenericArray::from_slice(&nonce);

    let encrypted = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| SealingError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(AES_IV_LENGTH + encrypted.len());
    output.extend_from_slice(nonce);
    output.extend(encrypted);
    Ok(output)
}

fn decrypt(key: &BallotKey, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, VerificationFailure> {
    if ciphertext.len() < AES_IV_LENGTH + AES_TAG_LENGTH {
        return Err(VerificationFailure::MalformedEnvelope);
    }
    let (nonce, encrypted) = ciphertext.split_at(AES_IV_LENGTH);

    key.cipher()
        .decrypt(
            GenericArray::from_slice(nonce),
            Payload {
                msg: encrypted,
                aad,
            },
        )
        .map_err(|_| VerificationFailure::Decryption)
}
