use super::*;

/// A connected, authenticated miner. Identity is fixed at login; everything
/// that moves lives behind the state mutex, which is the per-session
/// serialization point shared by the connection task and the periodic
/// retarget/sweep timers.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) id: Uuid,
    pub(crate) ip: IpAddr,
    pub(crate) port: u16,
    pub(crate) pool_type: PoolType,
    pub(crate) address: String,
    pub(crate) payment_id: Option<String>,
    pub(crate) identifier: String,
    pub(crate) email: Option<String>,
    pub(crate) agent: Option<String>,
    pub(crate) fixed_difficulty: bool,
    pub(crate) connect_time: Instant,
    format: Arc<dyn JobFormat>,
    push: mpsc::UnboundedSender<JobPayload>,
    state: Mutex<SessionState>,
}

#[derive(Debug)]
struct SessionState {
    difficulty: Difficulty,
    pending_difficulty: Option<Difficulty>,
    nudged_up: bool,
    last_contact: Instant,
    last_share: Instant,
    last_height: Option<u64>,
    share_intervals: Ring<f64>,
    hashes: u64,
    valid_shares: u64,
    invalid_shares: u64,
    trust: Trust,
    jobs: JobHistory,
    cached: Option<JobPayload>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        login: &str,
        pass: &str,
        agent: Option<String>,
        ip: IpAddr,
        port: &PortSettings,
        settings: &Settings,
        coin: &dyn Coin,
        format: Arc<dyn JobFormat>,
        push: mpsc::UnboundedSender<JobPayload>,
    ) -> Result<Self, LoginError> {
        let parsed = ParsedLogin::parse(login, pass)?;

        let agent_is = |needle: &str| agent.as_deref().is_some_and(|a| a.contains(needle));

        let identifier = if agent_is("MinerGate") {
            "MinerGate".to_string()
        } else {
            parsed.identifier.clone()
        };

        let mut fixed_difficulty = false;
        let mut difficulty = Difficulty::new(port.difficulty);

        // Known low-variance clients get a fixed difficulty up front.
        if agent_is("NiceHash") {
            fixed_difficulty = true;
            difficulty = Difficulty::new(settings.nicehash_difficulty);
        }

        if let Some(requested) = parsed.fixed_difficulty {
            fixed_difficulty = true;
            difficulty = Difficulty::new(requested);
        }

        let difficulty = difficulty.clamp_to(
            Difficulty::new(settings.min_difficulty),
            Difficulty::new(settings.max_difficulty),
        );

        if !coin.validate_address(&parsed.address) {
            return Err(LoginError::InvalidAddress);
        }

        if settings.banned_addresses.contains(&parsed.address) {
            return Err(LoginError::BannedAddress);
        }

        if settings.exchange_addresses.contains(&parsed.address) && parsed.payment_id.is_none() {
            return Err(LoginError::ExchangeNeedsPaymentId);
        }

        let now = Instant::now();

        let mut share_intervals = Ring::new(SHARE_INTERVAL_SAMPLES);
        share_intervals.push(settings.target_time.as_secs_f64());

        Ok(Self {
            id: Uuid::new_v4(),
            ip,
            port: port.port,
            pool_type: port.pool_type,
            address: parsed.address,
            payment_id: parsed.payment_id,
            identifier,
            email: parsed.email,
            agent,
            fixed_difficulty,
            connect_time: now,
            format,
            push,
            state: Mutex::new(SessionState {
                difficulty,
                pending_difficulty: None,
                nudged_up: false,
                last_contact: now,
                last_share: now,
                last_height: None,
                share_intervals,
                hashes: 0,
                valid_shares: 0,
                invalid_shares: 0,
                trust: Trust::new(&settings.trust),
                jobs: JobHistory::new(),
                cached: None,
            }),
        })
    }

    /// The payout identity reported to accounting.
    pub(crate) fn payout(&self) -> String {
        match &self.payment_id {
            Some(payment_id) => format!("{}.{}", self.address, payment_id),
            None => self.address.clone(),
        }
    }

    pub(crate) fn heartbeat(&self) {
        self.state.lock().last_contact = Instant::now();
    }

    pub(crate) fn expired(&self, timeout: Duration) -> bool {
        self.state.lock().last_contact.elapsed() > timeout
    }

    #[cfg(test)]
    pub(crate) fn difficulty(&self) -> Difficulty {
        self.state.lock().difficulty
    }

    /// Derives the miner-facing job for the given template, reusing the
    /// memoized payload while the height is unchanged and no difficulty
    /// change is pending. A fresh derivation allocates an extra-nonce,
    /// applies any pending difficulty, and retires the oldest retained job.
    pub(crate) fn derive_job(&self, coin: &dyn Coin, template: &Arc<BlockTemplate>) -> JobPayload {
        let mut state = self.state.lock();

        if state.last_height == Some(template.height) && state.pending_difficulty.is_none() {
            if let Some(cached) = &state.cached {
                return cached.clone();
            }
        }

        if let Some(difficulty) = state.pending_difficulty.take() {
            state.difficulty = difficulty;
        }

        let extra_nonce = template.next_extra_nonce();
        let blob = hex::encode(coin.convert_blob(&template.blob_with_extra_nonce(extra_nonce)));
        let target = state.difficulty.target_hex();

        let job = Job::new(extra_nonce, template.height, state.difficulty);
        let payload = self.format.payload(&self.id, &job, blob, target);

        state.jobs.push(job);
        state.last_height = Some(template.height);
        state.cached = Some(payload.clone());

        payload
    }

    /// Derives and pushes a job to the miner. Send failures mean the
    /// connection is gone; the liveness sweep will reap the session.
    pub(crate) fn push_job(&self, coin: &dyn Coin, template: &Arc<BlockTemplate>) {
        let payload = self.derive_job(coin, template);
        let _ = self.push.send(payload);
    }

    /// Looks up a retained job and records the nonce against it.
    pub(crate) fn claim_submission(
        &self,
        job_id: &str,
        nonce: Nonce,
    ) -> Result<(u32, u64, Difficulty), RejectReason> {
        let mut state = self.state.lock();

        let job = state
            .jobs
            .find_mut(job_id)
            .ok_or(RejectReason::InvalidJobId)?;

        if !job.record_submission(nonce) {
            return Err(RejectReason::DuplicateShare);
        }

        Ok((job.extra_nonce, job.height, job.difficulty))
    }

    /// Periodic difficulty retarget. Returns the queued difficulty when a
    /// change was decided; the caller pushes the refreshed job.
    pub(crate) fn retarget(&self, retarget: &Retarget) -> Option<Difficulty> {
        if self.fixed_difficulty {
            return None;
        }

        let mut state = self.state.lock();
        let current = state.difficulty;
        let now = Instant::now();

        let proposed = if state.hashes > 0 {
            retarget.rate_based(state.hashes, self.connect_time.elapsed())
        } else {
            let average = state.share_intervals.average()?;
            let proposed = retarget.timing_based(average, current)?;

            // The rolling window restarts once a decision fires; after a
            // long idle gap the interval anchor restarts with it.
            state.share_intervals.clear();
            if now.duration_since(state.last_share).as_secs_f64() > retarget.t_max() {
                state.last_share = now;
            }

            proposed
        };

        if proposed == current {
            return None;
        }

        debug!(
            "Difficulty change to {proposed} for {} (was {current})",
            self.address
        );

        state.pending_difficulty = Some(proposed);

        Some(proposed)
    }

    /// Alternating ±1 difficulty nudge applied on expired-template and
    /// hash-mismatch rejections, forcing a fresh job id either way.
    pub(crate) fn nudge_difficulty(&self, retarget: &Retarget) {
        let mut state = self.state.lock();

        let current = state.difficulty.get();
        let nudged = if state.nudged_up {
            current.saturating_sub(1)
        } else {
            current.saturating_add(1)
        };

        state.nudged_up = !state.nudged_up;
        state.pending_difficulty = Some(retarget.clamp(Difficulty::new(nudged)));
    }

    /// Ban-window accounting. Once the window fills, either the session is
    /// banned or both counters reset.
    pub(crate) fn check_ban(&self, ban: &BanSettings, accepted: bool) -> bool {
        if !ban.enabled {
            return false;
        }

        let mut state = self.state.lock();

        if accepted {
            state.valid_shares += 1;
        } else {
            state.invalid_shares += 1;
        }

        let total = state.valid_shares + state.invalid_shares;

        if total >= ban.threshold {
            if state.invalid_shares as f64 / total as f64 >= ban.percent / 100.0 {
                return true;
            }

            state.valid_shares = 0;
            state.invalid_shares = 0;
        }

        false
    }

    /// Proof-of-work-weighted accounting for an accepted share, feeding
    /// both the hashrate estimate and the interval window.
    pub(crate) fn record_accepted(&self, job_difficulty: Difficulty) {
        let mut state = self.state.lock();
        let now = Instant::now();

        state.hashes += job_difficulty.get();

        let interval = now.duration_since(state.last_share).as_secs_f64();
        state.share_intervals.push(interval);
        state.last_share = now;
    }

    pub(crate) fn trust_allows_skip(&self, roll: u8) -> bool {
        self.state.lock().trust.allows_skip(roll)
    }

    pub(crate) fn trust_reward(&self, settings: &TrustSettings) {
        self.state.lock().trust.reward(settings);
    }

    pub(crate) fn trust_punish(&self, settings: &TrustSettings) {
        self.state.lock().trust.punish(settings);
    }

    #[cfg(test)]
    pub(crate) fn pending_difficulty(&self) -> Option<Difficulty> {
        self.state.lock().pending_difficulty
    }

    #[cfg(test)]
    pub(crate) fn retained_jobs(&self) -> usize {
        self.state.lock().jobs.len()
    }

    #[cfg(test)]
    pub(crate) fn hashes(&self) -> u64 {
        self.state.lock().hashes
    }
}

impl Display for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ID: {} IP: {}", self.address, self.identifier, self.ip)
    }
}
