use {super::*, sha3::{Digest, Keccak256}};

/// Byte offset of the nonce within a cryptonote block blob.
pub const NONCE_OFFSET: usize = 39;

const ADDRESS_MIN_LEN: usize = 95;
const ADDRESS_MAX_LEN: usize = 106;

/// Coin-specific primitives the pool core orchestrates but does not define:
/// address validation, blob conversion for hashing, block assembly, the PoW
/// hash itself, and the block id used when reporting found blocks.
pub trait Coin: Send + Sync + 'static {
    fn validate_address(&self, address: &str) -> bool;

    /// Converts a block blob into the form the PoW function hashes.
    fn convert_blob(&self, blob: &[u8]) -> Vec<u8>;

    /// Assembles candidate block bytes from a template blob (extra-nonce
    /// already applied) and the miner's nonce.
    fn construct_block(&self, template_blob: &[u8], nonce: Nonce) -> Vec<u8>;

    fn pow_hash(&self, blob: &[u8]) -> [u8; 32];

    fn block_id(&self, block: &[u8]) -> [u8; 32];
}

/// Keccak-256 stand-in for the real memory-hard PoW. It keeps the whole
/// validation pipeline executable on test networks; a cryptonight or
/// RandomX implementation plugs in behind the same trait.
#[derive(Debug, Default)]
pub struct Keccak;

fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

fn is_base58(c: char) -> bool {
    c.is_ascii_alphanumeric() && !matches!(c, '0' | 'O' | 'I' | 'l')
}

impl Coin for Keccak {
    fn validate_address(&self, address: &str) -> bool {
        (ADDRESS_MIN_LEN..=ADDRESS_MAX_LEN).contains(&address.len())
            && address.chars().all(is_base58)
    }

    fn convert_blob(&self, blob: &[u8]) -> Vec<u8> {
        blob.to_vec()
    }

    fn construct_block(&self, template_blob: &[u8], nonce: Nonce) -> Vec<u8> {
        let mut block = template_blob.to_vec();
        block[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&u32::from(nonce).to_be_bytes());
        block
    }

    fn pow_hash(&self, blob: &[u8]) -> [u8; 32] {
        keccak256(blob)
    }

    fn block_id(&self, block: &[u8]) -> [u8; 32] {
        keccak256(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "46tevFTD5rGJbZwSZBvZbdoSkxGSRMtzW77HKGhRqkSEQ6ABcyFqqTYVcqW4y6g37PTYRrP28GBQpXSvdcHqLxnPSi1s7eR";

    #[test]
    fn accepts_standard_address() {
        assert!(Keccak.validate_address(ADDR));
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(!Keccak.validate_address(""));
        assert!(!Keccak.validate_address("tooshort"));
        assert!(!Keccak.validate_address(&"4".repeat(200)));

        // Excluded base58 characters.
        let mut with_zero = ADDR.to_string();
        with_zero.replace_range(5..6, "0");
        assert!(!Keccak.validate_address(&with_zero));
    }

    #[test]
    fn construct_block_writes_nonce_at_offset() {
        let template = vec![0u8; 76];

        let block = Keccak.construct_block(&template, Nonce::from(0xdead_beef));

        assert_eq!(&block[NONCE_OFFSET..NONCE_OFFSET + 4], &[0xde, 0xad, 0xbe, 0xef]);
        assert!(block[..NONCE_OFFSET].iter().all(|&b| b == 0));
        assert!(block[NONCE_OFFSET + 4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn pow_hash_is_deterministic_and_nonce_sensitive() {
        let template = vec![0u8; 76];

        let a = Keccak.pow_hash(&Keccak.construct_block(&template, Nonce::from(1)));
        let b = Keccak.pow_hash(&Keccak.construct_block(&template, Nonce::from(1)));
        let c = Keccak.pow_hash(&Keccak.construct_block(&template, Nonce::from(2)));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
