use crate::*;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::RwLock;

/// Election identifier
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ElectionId(String);

impl ElectionId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        ElectionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ElectionId {
    fn from(id: &str) -> Self {
        ElectionId(id.to_owned())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub party: String,

    /// Application specific properties, such as a party symbol or manifesto.
    ///
    /// Hashmaps are not allowed because their unstable ordering leads to non-determinism.
    #[serde(default)]
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, serde_json::Value>,
}

impl Candidate {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Candidate {
            id: id.into(),
            name: String::new(),
            party: String::new(),
            properties: IndexMap::new(),
        }
    }
}

/// The published candidates of one election, in publication order.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(from = "Vec<Candidate>", into = "Vec<Candidate>")]
pub struct CandidateSet {
    inner: IndexMap<String, Candidate>,
}

impl CandidateSet {
    pub fn contains(&self, candidate_id: &str) -> bool {
        self.inner.contains_key(candidate_id)
    }

    pub fn get(&self, candidate_id: &str) -> Option<&Candidate> {
        self.inner.get(candidate_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.inner.values()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<Vec<Candidate>> for CandidateSet {
    fn from(candidates: Vec<Candidate>) -> Self {
        let mut inner = IndexMap::new();
        for candidate in candidates {
            inner.insert(candidate.id.clone(), candidate);
        }
        CandidateSet { inner }
    }
}

impl From<CandidateSet> for Vec<Candidate> {
    fn from(set: CandidateSet) -> Self {
        set.inner.into_iter().map(|(_, c)| c).collect()
    }
}

impl<S: Into<String>> std::iter::FromIterator<S> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = S>>(ids: I) -> Self {
        ids.into_iter()
            .map(Candidate::new)
            .collect::<Vec<_>>()
            .into()
    }
}

/// A voter's selection
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CandidateChoice {
    pub election_id: ElectionId,
    pub candidate_id: String,
}

impl CandidateChoice {
    pub fn new<S: Into<String>>(election_id: ElectionId, candidate_id: S) -> Self {
        CandidateChoice {
            election_id,
            candidate_id: candidate_id.into(),
        }
    }
}

/// Source of the currently published candidates for each election.
pub trait CandidateRegistry: Send + Sync {
    fn candidates(&self, election_id: &ElectionId) -> Option<CandidateSet>;

    fn has_election(&self, election_id: &ElectionId) -> bool {
        self.candidates(election_id).is_some()
    }
}

/// A registry backed by an in-memory map
#[derive(Default)]
pub struct MemRegistry {
    inner: RwLock<HashMap<ElectionId, CandidateSet>>,
}

impl MemRegistry {
    /// Publish (or replace) the candidate set of an election.
    pub fn publish(&self, election_id: ElectionId, candidates: CandidateSet) {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.insert(election_id, candidates);
    }

    pub fn elections(&self) -> Vec<ElectionId> {
        let inner = match self.inner.read() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut ids: Vec<ElectionId> = inner.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl CandidateRegistry for MemRegistry {
    fn candidates(&self, election_id: &ElectionId) -> Option<CandidateSet> {
        let inner = match self.inner.read() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.get(election_id).cloned()
    }
}

/// One election in an elections file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ElectionDefinition {
    pub id: ElectionId,
    pub candidates: CandidateSet,

    /// Signing key generation currently in use.
    #[serde(default)]
    pub key_generation: u32,

    /// Set once the submission window has ended.
    #[serde(default)]
    pub closed: bool,
}

/// The JSON document listing every election this authority runs.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ElectionsFile {
    pub elections: Vec<ElectionDefinition>,
}

impl ElectionsFile {
    pub fn from_json(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Config(format!("invalid elections file: {}", e)))
    }

    /// Build a registry holding every election in the file.
    pub fn registry(&self) -> MemRegistry {
        let registry = MemRegistry::default();
        for election in &self.elections {
            registry.publish(election.id.clone(), election.candidates.clone());
        }
        registry
    }
}
