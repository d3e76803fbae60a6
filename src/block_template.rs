use super::*;

/// Byte range of the previous block hash within the template blob.
const PREV_HASH_RANGE: std::ops::Range<usize> = 7..39;

/// Block template as returned by the daemon's `get_block_template` RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTemplate {
    #[serde(rename = "blocktemplate_blob")]
    pub blob: String,
    pub difficulty: u64,
    pub height: u64,
    #[serde(rename = "reserved_offset")]
    pub reserved_offset: usize,
}

impl RawTemplate {
    /// The previous block hash embedded in the blob. This, not the height,
    /// is what identifies a template.
    pub fn previous_hash(&self) -> Result<[u8; 32]> {
        let blob = hex::decode(&self.blob).context("template blob is not valid hex")?;

        let slice = blob
            .get(PREV_HASH_RANGE)
            .ok_or_else(|| anyhow!("template blob too short for previous hash"))?;

        let mut hash = [0u8; 32];
        hash.copy_from_slice(slice);

        Ok(hash)
    }
}

/// Immutable-after-construction snapshot of the chain tip being mined.
/// The only mutation after construction is the extra-nonce counter.
#[derive(Debug)]
pub struct BlockTemplate {
    pub height: u64,
    pub difficulty: u64,
    pub previous_hash: [u8; 32],
    pub reserved_offset: usize,
    blob: Vec<u8>,
    extra_nonce: AtomicU32,
    raw: RawTemplate,
}

impl BlockTemplate {
    pub fn from_raw(raw: RawTemplate) -> Result<Self> {
        let previous_hash = raw.previous_hash()?;

        let blob = hex::decode(&raw.blob).context("template blob is not valid hex")?;

        ensure!(
            raw.reserved_offset
                .checked_add(4)
                .is_some_and(|end| end <= blob.len()),
            "reserved offset {} out of range for {}-byte blob",
            raw.reserved_offset,
            blob.len()
        );

        ensure!(
            blob.len() >= coin::NONCE_OFFSET + 4,
            "template blob too short to hold a nonce"
        );

        Ok(Self {
            height: raw.height,
            difficulty: raw.difficulty,
            previous_hash,
            reserved_offset: raw.reserved_offset,
            blob,
            extra_nonce: AtomicU32::new(0),
            raw,
        })
    }

    /// Allocates the next extra-nonce for a job issued against this
    /// template.
    pub fn next_extra_nonce(&self) -> u32 {
        self.extra_nonce.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Copy of the template blob with `extra_nonce` written big-endian into
    /// the reserved range. Offsets were validated at construction.
    pub fn blob_with_extra_nonce(&self, extra_nonce: u32) -> Vec<u8> {
        let mut blob = self.blob.clone();
        blob[self.reserved_offset..self.reserved_offset + 4]
            .copy_from_slice(&extra_nonce.to_be_bytes());
        blob
    }

    pub fn raw(&self) -> &RawTemplate {
        &self.raw
    }
}
