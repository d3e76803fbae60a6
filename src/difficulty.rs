use super::*;

/// Difficulty 1 corresponds to the all-ones 256-bit target; every share and
/// block difficulty here is this constant divided by the relevant target or
/// hash value.
pub const BASE_DIFFICULTY: U256 = U256::MAX;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(transparent)]
pub struct Difficulty(u64);

impl Difficulty {
    pub fn new(difficulty: u64) -> Self {
        Self(difficulty.max(1))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }

    /// The miner-facing compact target: `BASE_DIFFICULTY / difficulty` as a
    /// 32-byte big-endian value, truncated to its top four bytes and
    /// byte-reversed for the wire (little-endian).
    pub fn target_hex(self) -> String {
        let target = BASE_DIFFICULTY / U256::from(self.0);
        let be = target.to_big_endian();

        let mut top = [be[0], be[1], be[2], be[3]];
        top.reverse();

        hex::encode(top)
    }

    pub fn clamp_to(self, min: Difficulty, max: Difficulty) -> Self {
        Self(self.0.clamp(min.0, max.0))
    }
}

impl From<u64> for Difficulty {
    fn from(difficulty: u64) -> Self {
        Self::new(difficulty)
    }
}

/// Converts a PoW hash (little-endian, as produced by the hash function)
/// into the difficulty it meets.
pub fn pow_difficulty(hash: &[u8; 32]) -> U256 {
    let mut be = *hash;
    be.reverse();

    let value = U256::from_big_endian(&be);

    if value.is_zero() {
        U256::MAX
    } else {
        BASE_DIFFICULTY / value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_floors_at_one() {
        assert_eq!(Difficulty::new(0).get(), 1);
        assert_eq!(Difficulty::new(1).get(), 1);
        assert_eq!(Difficulty::new(42).get(), 42);
    }

    #[test]
    fn difficulty_one_target_is_all_ones() {
        assert_eq!(Difficulty::new(1).target_hex(), "ffffffff");
    }

    #[test]
    fn known_targets() {
        // 2^256-1 over 16 keeps the top nibble at 0x0f.
        assert_eq!(Difficulty::new(16).target_hex(), "ffffff0f");
    }

    #[test]
    fn target_monotonically_non_increasing() {
        let mut previous = U256::MAX;

        for difficulty in [1u64, 2, 3, 10, 100, 500, 7919, 1_000_000, u64::MAX] {
            let be = (BASE_DIFFICULTY / U256::from(difficulty)).to_big_endian();
            let target = U256::from_big_endian(&be);
            assert!(
                target <= previous,
                "target must not increase with difficulty (at {difficulty})"
            );
            previous = target;
        }
    }

    #[test]
    fn clamp_to_bounds() {
        let min = Difficulty::new(100);
        let max = Difficulty::new(1000);

        assert_eq!(Difficulty::new(5).clamp_to(min, max), min);
        assert_eq!(Difficulty::new(500).clamp_to(min, max).get(), 500);
        assert_eq!(Difficulty::new(5000).clamp_to(min, max), max);
    }

    #[test]
    fn pow_difficulty_of_max_hash_is_one() {
        let hash = [0xffu8; 32];
        assert_eq!(pow_difficulty(&hash), U256::from(1u64));
    }

    #[test]
    fn pow_difficulty_of_zero_hash_saturates() {
        let hash = [0u8; 32];
        assert_eq!(pow_difficulty(&hash), U256::MAX);
    }

    #[test]
    fn pow_difficulty_interprets_hash_little_endian() {
        // A hash with only the top bit of its last byte set is numerically
        // 2^255 (the wire is little-endian), so it meets difficulty 1.
        let mut hash = [0u8; 32];
        hash[31] = 0x80;

        assert_eq!(pow_difficulty(&hash), U256::from(1u64));

        // The same bit in the first byte is a tiny value instead.
        let mut hash = [0u8; 32];
        hash[0] = 0x80;

        assert!(pow_difficulty(&hash) > U256::from(u64::MAX));
    }

    #[test]
    fn smaller_hash_means_higher_difficulty() {
        let mut small = [0u8; 32];
        small[0] = 0x01;

        let mut large = [0u8; 32];
        large[20] = 0x01;

        assert!(pow_difficulty(&small) > pow_difficulty(&large));
    }

    #[test]
    fn difficulty_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Difficulty::new(5000)).unwrap(), "5000");

        let parsed: Difficulty = serde_json::from_str("1234").unwrap();
        assert_eq!(parsed, Difficulty::new(1234));
    }
}
