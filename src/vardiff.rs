use super::*;

/// Retargeting parameters, resolved from settings. The controller itself is
/// stateless; the per-session inputs (interval ring, hash counter, last
/// share time) live on the session.
#[derive(Debug, Clone, Copy)]
pub struct Retarget {
    pub target_time: Duration,
    pub variance_percent: f64,
    pub max_change_percent: f64,
    pub min_difficulty: Difficulty,
    pub max_difficulty: Difficulty,
}

impl Retarget {
    fn target_secs(&self) -> f64 {
        self.target_time.as_secs_f64()
    }

    fn variance(&self) -> f64 {
        self.variance_percent / 100.0 * self.target_secs()
    }

    pub fn t_min(&self) -> f64 {
        self.target_secs() - self.variance()
    }

    pub fn t_max(&self) -> f64 {
        self.target_secs() + self.variance()
    }

    pub fn clamp(&self, difficulty: Difficulty) -> Difficulty {
        difficulty.clamp_to(self.min_difficulty, self.max_difficulty)
    }

    /// Throughput estimate, preferred once any shares have been accepted:
    /// observed hashes per second times the target share interval. Replaces
    /// the difficulty outright each tick.
    pub fn rate_based(&self, hashes: u64, connected: Duration) -> Difficulty {
        let seconds = connected.as_secs().max(1);

        self.clamp(Difficulty::new(
            (hashes / seconds).saturating_mul(self.target_time.as_secs().max(1)),
        ))
    }

    /// Timing fallback for sessions with no accepted work yet: scale the
    /// difficulty by target/average when the rolling average leaves the
    /// variance band, stepping at most `max_change_percent` per tick.
    pub fn timing_based(&self, average: f64, current: Difficulty) -> Option<Difficulty> {
        if average <= 0.0 {
            return None;
        }

        let slow = average > self.t_max() && current > self.min_difficulty;
        let fast = average < self.t_min() && current < self.max_difficulty;

        if !slow && !fast {
            return None;
        }

        let direction = if slow { -1.0 } else { 1.0 };
        let mut proposed = self.target_secs() / average * current.as_f64();

        let change_percent = (proposed - current.as_f64()).abs() / current.as_f64() * 100.0;

        if change_percent > self.max_change_percent {
            proposed =
                current.as_f64() + self.max_change_percent / 100.0 * current.as_f64() * direction;
        }

        Some(self.clamp(Difficulty::new(proposed.round() as u64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retarget() -> Retarget {
        Retarget {
            target_time: Duration::from_secs(100),
            variance_percent: 30.0,
            max_change_percent: 25.0,
            min_difficulty: Difficulty::new(100),
            max_difficulty: Difficulty::new(1_000_000),
        }
    }

    #[test]
    fn variance_band() {
        let retarget = retarget();

        assert_eq!(retarget.t_min(), 70.0);
        assert_eq!(retarget.t_max(), 130.0);
    }

    #[test]
    fn within_band_no_change() {
        let retarget = retarget();

        assert_eq!(retarget.timing_based(100.0, Difficulty::new(1000)), None);
        assert_eq!(retarget.timing_based(70.0, Difficulty::new(1000)), None);
        assert_eq!(retarget.timing_based(130.0, Difficulty::new(1000)), None);
    }

    #[test]
    fn slow_shares_step_down_by_exactly_the_clamped_step() {
        let retarget = retarget();

        // Scaling alone would go 1000 -> 250, way past the 25% step.
        let proposed = retarget.timing_based(400.0, Difficulty::new(1000)).unwrap();

        assert_eq!(proposed, Difficulty::new(750));
    }

    #[test]
    fn fast_shares_step_up_by_exactly_the_clamped_step() {
        let retarget = retarget();

        let proposed = retarget.timing_based(10.0, Difficulty::new(1000)).unwrap();

        assert_eq!(proposed, Difficulty::new(1250));
    }

    #[test]
    fn small_drift_applies_unclamped_scaling() {
        let retarget = retarget();

        // Average 131 scales 1000 to ~763, a 23.7% change, inside the step.
        let proposed = retarget.timing_based(131.0, Difficulty::new(1000)).unwrap();

        assert_eq!(proposed, Difficulty::new(763));
    }

    #[test]
    fn never_steps_below_the_floor() {
        let retarget = retarget();

        // 25% step from 120 would land at 90; the floor wins.
        let proposed = retarget.timing_based(400.0, Difficulty::new(120)).unwrap();

        assert_eq!(proposed, Difficulty::new(100));
    }

    #[test]
    fn never_steps_above_the_ceiling() {
        let retarget = retarget();

        let proposed = retarget
            .timing_based(10.0, Difficulty::new(999_999))
            .unwrap();

        assert_eq!(proposed, Difficulty::new(1_000_000));
    }

    #[test]
    fn at_floor_slow_shares_do_not_retarget() {
        let retarget = retarget();

        assert_eq!(retarget.timing_based(500.0, Difficulty::new(100)), None);
    }

    #[test]
    fn at_ceiling_fast_shares_do_not_retarget() {
        let retarget = retarget();

        assert_eq!(
            retarget.timing_based(1.0, Difficulty::new(1_000_000)),
            None
        );
    }

    #[test]
    fn rate_based_is_hashrate_times_target() {
        let retarget = retarget();

        // 50_000 hashes over 100s = 500 H/s; at a 100s target interval the
        // session should carry difficulty 50_000.
        assert_eq!(
            retarget.rate_based(50_000, Duration::from_secs(100)),
            Difficulty::new(50_000)
        );
    }

    #[test]
    fn rate_based_clamps_to_bounds() {
        let retarget = retarget();

        assert_eq!(
            retarget.rate_based(1, Duration::from_secs(1000)),
            Difficulty::new(100)
        );

        assert_eq!(
            retarget.rate_based(u64::MAX / 200, Duration::from_secs(1)),
            Difficulty::new(1_000_000)
        );
    }

    #[test]
    fn rate_based_survives_fresh_connections() {
        let retarget = retarget();

        // Sub-second uptime must not divide by zero.
        assert_eq!(
            retarget.rate_based(1000, Duration::from_millis(10)),
            retarget.clamp(Difficulty::new(1000 * 100))
        );
    }
}
