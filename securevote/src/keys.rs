//! Key material for every election.
//!
//! Secrets never leave this module as bytes: callers receive opaque handles
//! that can hash, sign or build a cipher, and nothing else.

use crate::*;
use aes_gcm::aead::{generic_array::GenericArray, NewAead};
use aes_gcm::Aes256Gcm;
use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signature, Signer};
use hkdf::Hkdf;
use hmac::{Hmac, NewMac};
use log::{debug, info};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;

pub(crate) type HmacSha256 = Hmac<Sha256>;

const HKDF_SALT: &[u8] = b"securevote-v1";
const PURPOSE_ANONYMIZER: &[u8] = b"anonymizer";
const PURPOSE_BALLOT: &[u8] = b"ballot-encryption";
const PURPOSE_SIGNING: &[u8] = b"signing";

/// Identifies the election signing key a record was signed with.
///
/// Rendered as `election#generation`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignerKeyId {
    pub election_id: ElectionId,
    pub generation: u32,
}

impl SignerKeyId {
    pub fn new(election_id: ElectionId, generation: u32) -> Self {
        SignerKeyId {
            election_id,
            generation,
        }
    }
}

impl std::fmt::Display for SignerKeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}#{}", self.election_id, self.generation)
    }
}

impl FromStr for SignerKeyId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (election, generation) = s
            .rsplit_once('#')
            .ok_or_else(|| format!("invalid signer key id: {}", s))?;
        if election.is_empty() {
            return Err(format!("invalid signer key id: {}", s));
        }
        let generation = generation
            .parse()
            .map_err(|_| format!("invalid signer key generation: {}", s))?;
        Ok(SignerKeyId::new(ElectionId::new(election), generation))
    }
}

impl<'de> Deserialize<'de> for SignerKeyId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(de::Error::custom)
    }
}

impl Serialize for SignerKeyId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Secret salt for the voter anonymizer of one election.
pub struct AnonymizerSalt([u8; 32]);

impl AnonymizerSalt {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        AnonymizerSalt(bytes)
    }

    pub(crate) fn mac(&self) -> Result<HmacSha256, KeyError> {
        HmacSha256::new_from_slice(&self.0).map_err(|_| KeyError::Derivation)
    }
}

impl std::fmt::Debug for AnonymizerSalt {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "AnonymizerSalt(..)")
    }
}

/// Symmetric key protecting the sealed ballots of one election.
pub struct BallotKey([u8; 32]);

impl BallotKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        BallotKey(bytes)
    }

    pub(crate) fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(GenericArray::from_slice(&self.0))
    }
}

impl std::fmt::Debug for BallotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "BallotKey(..)")
    }
}

/// The election-scoped signing key of the current submission window.
pub struct ElectionSigningKey {
    id: SignerKeyId,
    keypair: Keypair,
}

impl ElectionSigningKey {
    pub fn from_secret(id: SignerKeyId, secret: SecretKey) -> Self {
        let public = PublicKey::from(&secret);
        ElectionSigningKey {
            id,
            keypair: Keypair { secret, public },
        }
    }

    pub fn id(&self) -> &SignerKeyId {
        &self.id
    }

    pub fn public(&self) -> PublicKey {
        self.keypair.public
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }
}

impl std::fmt::Debug for ElectionSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ElectionSigningKey({})", self.id)
    }
}

/// Supplies all key material. No other component holds long-lived secrets.
pub trait KeyProvider: Send + Sync {
    /// Salt for the voter anonymizer
    fn anonymizer_salt(&self, election_id: &ElectionId) -> Result<AnonymizerSalt, KeyError>;

    /// Signing key for ballots cast now
    fn signing_key(&self, election_id: &ElectionId) -> Result<ElectionSigningKey, KeyError>;

    /// Resolve the public half of any signing key ever handed out
    fn verifying_key(&self, key_id: &SignerKeyId) -> Option<PublicKey>;

    /// Symmetric key for sealing and unsealing ballots
    fn ballot_key(&self, election_id: &ElectionId) -> Result<BallotKey, KeyError>;

    /// End the submission window. Verification and decryption keep working.
    fn close_submissions(&self, election_id: &ElectionId) -> Result<(), KeyError>;
}

/// A published election public key.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PublishedKey {
    pub id: SignerKeyId,

    #[serde(with = "EdPublicKeyHex")]
    pub public_key: PublicKey,
}

#[derive(Debug, Clone, Copy, Default)]
struct ElectionKeyState {
    generation: u32,
    closed: bool,
}

/// Derives every election key from one operator master secret with HKDF-SHA256.
pub struct KeyVault {
    master: Vec<u8>,
    elections: RwLock<HashMap<ElectionId, ElectionKeyState>>,
}

impl KeyVault {
    pub fn new(master: &[u8]) -> Result<Self, KeyError> {
        if master.len() < MASTER_KEY_LENGTH {
            return Err(KeyError::MasterKeyTooShort(MASTER_KEY_LENGTH));
        }
        Ok(KeyVault {
            master: master.to_vec(),
            elections: RwLock::new(HashMap::new()),
        })
    }

    /// Build a vault that knows every election in an elections file.
    pub fn from_elections(master: &[u8], file: &ElectionsFile) -> Result<Self, KeyError> {
        let vault = KeyVault::new(master)?;
        {
            let mut elections = vault.write_state();
            for election in &file.elections {
                elections.insert(
                    election.id.clone(),
                    ElectionKeyState {
                        generation: election.key_generation,
                        closed: election.closed,
                    },
                );
            }
        }
        Ok(vault)
    }

    /// Start issuing keys for an election. Registering twice is a no-op.
    pub fn register_election(&self, election_id: ElectionId) {
        let mut elections = self.write_state();
        if !elections.contains_key(&election_id) {
            info!("securevote keys: registered election {}", election_id);
            elections.insert(election_id, ElectionKeyState::default());
        }
    }

    /// Switch to a new signing key. Records signed with earlier generations stay verifiable.
    pub fn rotate_signing_key(&self, election_id: &ElectionId) -> Result<SignerKeyId, KeyError> {
        let mut elections = self.write_state();
        let state = elections
            .get_mut(election_id)
            .ok_or_else(|| KeyError::UnknownElection(election_id.clone()))?;
        if state.closed {
            return Err(KeyError::SubmissionsClosed(election_id.clone()));
        }
        state.generation += 1;
        info!(
            "securevote keys: rotated signing key for {} to generation {}",
            election_id, state.generation
        );
        Ok(SignerKeyId::new(election_id.clone(), state.generation))
    }

    /// Public keys of every signing key generation of an election.
    pub fn published_keys(&self, election_id: &ElectionId) -> Result<Vec<PublishedKey>, KeyError> {
        let state = self.state(election_id)?;
        let mut keys = Vec::with_capacity(state.generation as usize + 1);
        for generation in 0..=state.generation {
            let id = SignerKeyId::new(election_id.clone(), generation);
            let secret = self.signing_secret(&id)?;
            keys.push(PublishedKey {
                public_key: PublicKey::from(&secret),
                id,
            });
        }
        Ok(keys)
    }

    fn state(&self, election_id: &ElectionId) -> Result<ElectionKeyState, KeyError> {
        let elections = match self.elections.read() {
            Ok(elections) => elections,
            Err(poisoned) => poisoned.into_inner(),
        };
        elections
            .get(election_id)
            .copied()
            .ok_or_else(|| KeyError::UnknownElection(election_id.clone()))
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<HashMap<ElectionId, ElectionKeyState>> {
        match self.elections.write() {
            Ok(elections) => elections,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn derive(
        &self,
        purpose: &[u8],
        election_id: &ElectionId,
        generation: u32,
    ) -> Result<[u8; 32], KeyError> {
        let mut info = Vec::with_capacity(64);
        put_field(&mut info, purpose);
        put_field(&mut info, election_id.as_str().as_bytes());
        info.extend_from_slice(&generation.to_be_bytes());

        let h = Hkdf::<Sha256>::new(Some(HKDF_SALT), &self.master);
        let mut out = [0u8; 32];
        h.expand(&info, &mut out).map_err(|_| KeyError::Derivation)?;
        Ok(out)
    }

    fn signing_secret(&self, id: &SignerKeyId) -> Result<SecretKey, KeyError> {
        let seed = self.derive(PURPOSE_SIGNING, &id.election_id, id.generation)?;
        SecretKey::from_bytes(&seed).map_err(|_| KeyError::Derivation)
    }
}

impl KeyProvider for KeyVault {
    fn anonymizer_salt(&self, election_id: &ElectionId) -> Result<AnonymizerSalt, KeyError> {
        self.state(election_id)?;
        Ok(AnonymizerSalt(self.derive(PURPOSE_ANONYMIZER, election_id, 0)?))
    }

    fn signing_key(&self, election_id: &ElectionId) -> Result<ElectionSigningKey, KeyError> {
        let state = self.state(election_id)?;
        if state.closed {
            return Err(KeyError::SubmissionsClosed(election_id.clone()));
        }
        let id = SignerKeyId::new(election_id.clone(), state.generation);
        let secret = self.signing_secret(&id)?;
        debug!("securevote keys: issued signing key {}", id);
        Ok(ElectionSigningKey::from_secret(id, secret))
    }

    fn verifying_key(&self, key_id: &SignerKeyId) -> Option<PublicKey> {
        let state = self.state(&key_id.election_id).ok()?;
        if key_id.generation > state.generation {
            return None;
        }
        let secret = self.signing_secret(key_id).ok()?;
        Some(PublicKey::from(&secret))
    }

    fn ballot_key(&self, election_id: &ElectionId) -> Result<BallotKey, KeyError> {
        self.state(election_id)?;
        Ok(BallotKey(self.derive(PURPOSE_BALLOT, election_id, 0)?))
    }

    fn close_submissions(&self, election_id: &ElectionId) -> Result<(), KeyError> {
        let mut elections = self.write_state();
        let state = elections
            .get_mut(election_id)
            .ok_or_else(|| KeyError::UnknownElection(election_id.clone()))?;
        state.closed = true;
        info!("securevote keys: closed submissions for {}", election_id);
        Ok(())
    }
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("KeyVault").finish()
    }
}
