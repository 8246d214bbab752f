use crate::*;

use thiserror::Error;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("securevote: voter is not authenticated for election {0}")]
    NotAuthenticated(ElectionId),

    #[error("securevote: unknown election {0}")]
    UnknownElection(ElectionId),

    #[error("securevote: election {0} has not been tallied")]
    NoTallyResult(ElectionId),

    #[error(transparent)]
    Anonymization(#[from] AnonymizationError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Sealing(#[from] SealingError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Audit(#[from] AuditWriteError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("securevote: configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True when the operation may succeed if simply tried again.
    ///
    /// A retried cast must go through the whole cast path again so that it
    /// picks up a fresh nonce.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Ledger(LedgerError::Unavailable(_)))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnonymizationError {
    #[error("securevote anonymizer: voter identity is empty")]
    EmptyIdentity,

    #[error("securevote anonymizer: unknown election {0}")]
    UnknownElection(ElectionId),

    #[error("securevote anonymizer: {0}")]
    Key(#[from] KeyError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("securevote encoder: unknown election {0}")]
    UnknownElection(ElectionId),

    #[error("securevote encoder: candidate {0} is not in the published candidate set")]
    UnknownCandidate(String),

    #[error("securevote encoder: nonce {nonce} is not greater than last used nonce {last}")]
    StaleNonce { nonce: u64, last: u64 },

    #[error("securevote encoder: timestamp is outside the representable range")]
    TimestampOutOfRange,

    #[error("securevote encoder: malformed ballot payload: {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("securevote signer: signing key unavailable: {0}")]
    KeyUnavailable(#[from] KeyError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SealingError {
    #[error("securevote sealer: ballot key unavailable: {0}")]
    KeyUnavailable(#[from] KeyError),

    #[error("securevote sealer: payload too large to seal")]
    PayloadTooLarge,

    #[error("securevote sealer: authenticated encryption failed")]
    EncryptionFailed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("securevote keys: unknown election {0}")]
    UnknownElection(ElectionId),

    #[error("securevote keys: submissions are closed for election {0}")]
    SubmissionsClosed(ElectionId),

    #[error("securevote keys: key derivation failed")]
    Derivation,

    #[error("securevote keys: master key must be at least {0} bytes")]
    MasterKeyTooShort(usize),
}

/// Vote Ledger errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("securevote ledger: record {0} already exists")]
    DuplicateRecord(RecordId),

    /// Retryable: the ledger could not be reached in time.
    #[error("securevote ledger: unavailable: {0}")]
    Unavailable(String),

    #[error("securevote ledger: malformed stored record: {0}")]
    MalformedRecord(String),
}

/// Record-level failures found while tallying.
///
/// These never abort a tally run; they are retained as the reason a record
/// was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum VerificationFailure {
    #[error("securevote verification: unknown signer key {0}")]
    UnknownSigner(SignerKeyId),

    #[error("securevote verification: record does not belong to this election")]
    ElectionMismatch,

    #[error("securevote verification: ballot key unavailable")]
    KeyUnavailable,

    #[error("securevote verification: failed to decrypt record")]
    Decryption,

    #[error("securevote verification: malformed sealed envelope")]
    MalformedEnvelope,

    #[error("securevote verification: signature does not verify")]
    BadSignature,

    #[error("securevote verification: record timestamp does not match the sealed ballot")]
    TimestampMismatch,

    #[error("securevote verification: malformed ballot payload: {0}")]
    MalformedPayload(String),

    #[error("securevote verification: candidate {0} is not in the published candidate set")]
    UnknownCandidate(String),

    #[error("securevote verification: voter already has counted record {counted}")]
    Duplicate { counted: RecordId },

    #[error("securevote verification: unreadable ledger entry: {0}")]
    MalformedRecord(String),
}

/// Audit Log errors. Never fatal to the audited operation.
#[derive(Debug, Error)]
pub enum AuditWriteError {
    #[error("securevote audit: io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("securevote audit: serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("securevote audit: could not hash entry: {0}")]
    Hashing(#[from] serde_cbor::Error),

    #[error("securevote audit: hash chain broken at entry {0}")]
    ChainBroken(usize),

    #[error("securevote audit: log unavailable: {0}")]
    Unavailable(String),
}
