use super::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Opaque unique token; miners echo it back verbatim on submit.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

/// One unit of work handed to a miner: a template reference (by height), an
/// extra-nonce disambiguator, and the difficulty snapshot it was issued at.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub extra_nonce: u32,
    pub height: u64,
    pub difficulty: Difficulty,
    submissions: HashSet<Nonce>,
}

impl Job {
    pub fn new(extra_nonce: u32, height: u64, difficulty: Difficulty) -> Self {
        Self {
            id: JobId::random(),
            extra_nonce,
            height,
            difficulty,
            submissions: HashSet::new(),
        }
    }

    /// Records a nonce, returning false if it was already submitted against
    /// this job. Resubmission is a protocol violation.
    pub fn record_submission(&mut self, nonce: Nonce) -> bool {
        self.submissions.insert(nonce)
    }
}
