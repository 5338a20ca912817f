//! Fixed-algorithm hashing for values that must stay stable across builds.
//!
//! `StableHasher` is 64-bit FNV-1a over explicit little-endian bytes, so the
//! same input hashes identically on every platform and toolchain.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a accumulator.
#[derive(Clone, Copy, Debug)]
pub struct StableHasher {
    state: u64,
}

impl Default for StableHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl StableHasher {
    pub fn new() -> Self {
        Self {
            state: FNV_OFFSET_BASIS,
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state ^= u64::from(*byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    pub fn finish(&self) -> u64 {
        self.state
    }
}

pub fn stable_hash_with(f: impl FnOnce(&mut StableHasher)) -> u64 {
    let mut hasher = StableHasher::new();
    f(&mut hasher);
    hasher.finish()
}

/// Seeded hash of `value`, avalanched so short sequential ids spread evenly.
pub fn stable_hash_str(seed: u64, value: &str) -> u64 {
    mix64(stable_hash_with(|hasher| {
        hasher.write_u64(seed);
        hasher.write_str(value);
    }))
}

// MurmurHash3 fmix64 finalizer.
fn mix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}
