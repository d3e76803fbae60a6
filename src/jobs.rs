use super::*;

/// Per-session job retention. Capacity is the natural expiry: once ten newer
/// jobs have been issued, submissions against an evicted id come back as
/// "Invalid job id".
#[derive(Debug)]
pub(crate) struct JobHistory {
    ring: Ring<Job>,
}

impl JobHistory {
    pub(crate) fn new() -> Self {
        Self {
            ring: Ring::new(RETAINED_JOBS),
        }
    }

    pub(crate) fn push(&mut self, job: Job) {
        self.ring.push(job);
    }

    pub(crate) fn find_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.ring.iter_mut().find(|job| job.id.as_str() == id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.ring.len()
    }
}

/// Wire-format strategy for miner-facing jobs, picked when the session
/// authenticates. `login` and `mining.subscribe` currently share the
/// standard dialect; a second dialect slots in beside it without touching
/// job derivation.
pub(crate) trait JobFormat: fmt::Debug + Send + Sync {
    fn payload(&self, session_id: &Uuid, job: &Job, blob: String, target: String) -> JobPayload;
}

#[derive(Debug)]
pub(crate) struct StandardFormat;

impl JobFormat for StandardFormat {
    fn payload(&self, session_id: &Uuid, job: &Job, blob: String, target: String) -> JobPayload {
        JobPayload {
            blob,
            job_id: job.id.as_str().into(),
            target,
            id: session_id.to_string(),
        }
    }
}

pub(crate) fn job_format(_method: &str) -> Arc<dyn JobFormat> {
    // Both "login" and "mining.subscribe" negotiate the standard dialect.
    Arc::new(StandardFormat)
}
