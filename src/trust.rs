use super::*;

/// Probability starts here; a u8 roll can never exceed it, so fresh
/// sessions always take the full verification path.
const PROBABILITY_CEILING: u16 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrustSettings {
    pub enabled: bool,
    pub threshold: i64,
    pub min_probability: u16,
    pub penalty: i64,
}

impl Default for TrustSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 30,
            min_probability: 20,
            penalty: 30,
        }
    }
}

/// Per-miner verification trust. A share may skip re-hashing only once the
/// miner has worked off its threshold, carries no penalty, and wins the
/// probability roll; any rejection resets all three so trust is re-earned
/// from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trust {
    threshold: i64,
    probability: u16,
    penalty: i64,
}

impl Trust {
    pub fn new(settings: &TrustSettings) -> Self {
        Self {
            threshold: settings.threshold,
            probability: PROBABILITY_CEILING,
            penalty: 0,
        }
    }

    /// Whether this share may take the trusted fast path, given a uniform
    /// random byte.
    pub fn allows_skip(&self, roll: u8) -> bool {
        self.threshold <= 0 && self.penalty <= 0 && u16::from(roll) > self.probability
    }

    /// Verified acceptance: skip probability grows (probability shrinks
    /// toward the configured floor) and outstanding counters work off.
    pub fn reward(&mut self, settings: &TrustSettings) {
        self.probability = self.probability.saturating_sub(1).max(settings.min_probability);
        self.penalty -= 1;
        self.threshold -= 1;
    }

    /// Any rejection: back to square one.
    pub fn punish(&mut self, settings: &TrustSettings) {
        self.probability = PROBABILITY_CEILING;
        self.penalty = settings.penalty;
        self.threshold = settings.threshold;
    }

    #[cfg(test)]
    pub(crate) fn probability(&self) -> u16 {
        self.probability
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TrustSettings {
        TrustSettings {
            enabled: true,
            threshold: 3,
            min_probability: 20,
            penalty: 5,
        }
    }

    #[test]
    fn fresh_sessions_never_skip() {
        let trust = Trust::new(&settings());

        for roll in [0u8, 128, 255] {
            assert!(!trust.allows_skip(roll));
        }
    }

    #[test]
    fn skip_requires_threshold_and_penalty_worked_off() {
        let settings = settings();
        let mut trust = Trust::new(&settings);

        for _ in 0..settings.threshold {
            trust.reward(&settings);
        }

        // Threshold reached zero and probability decayed below 256, so a
        // high roll may now skip.
        assert!(trust.allows_skip(255));
        assert!(!trust.allows_skip(0));
    }

    #[test]
    fn probability_decays_to_floor() {
        let settings = settings();
        let mut trust = Trust::new(&settings);

        for _ in 0..1000 {
            trust.reward(&settings);
        }

        assert_eq!(trust.probability(), settings.min_probability);
        assert!(trust.allows_skip(settings.min_probability as u8 + 1));
        assert!(!trust.allows_skip(settings.min_probability as u8));
    }

    #[test]
    fn any_rejection_resets_trust_completely() {
        let settings = settings();
        let mut trust = Trust::new(&settings);

        for _ in 0..1000 {
            trust.reward(&settings);
        }
        assert!(trust.allows_skip(255));

        trust.punish(&settings);

        assert_eq!(
            trust,
            Trust {
                threshold: settings.threshold,
                probability: PROBABILITY_CEILING,
                penalty: settings.penalty,
            }
        );
        assert!(!trust.allows_skip(255));
    }

    #[test]
    fn penalty_blocks_skip_until_worked_off() {
        let settings = settings();
        let mut trust = Trust::new(&settings);

        for _ in 0..1000 {
            trust.reward(&settings);
        }

        trust.punish(&settings);

        // Work the threshold back off; the penalty decrements in lockstep
        // but starts higher, so skipping stays blocked until both clear.
        for _ in 0..settings.threshold {
            trust.reward(&settings);
        }
        assert!(!trust.allows_skip(255), "penalty still outstanding");

        for _ in 0..(settings.penalty - settings.threshold) {
            trust.reward(&settings);
        }
        assert!(trust.allows_skip(255));
    }
}
