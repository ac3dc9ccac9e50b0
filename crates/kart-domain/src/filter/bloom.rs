//! Fixed-size bloom filter.

const FNV64_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

#[inline]
fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV64_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV64_PRIME);
    }
    hash
}

/// SplitMix64 finalizer, used to derive an independent second hash.
#[inline]
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Bloom filter using double hashing over a packed bit array.
///
/// Never reports a false negative for an inserted item.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Sizes a filter for `expected_items` at the given false-positive rate.
    ///
    /// `m = ceil(-n ln p / (ln 2)^2)` bits and `k = ceil(m/n ln 2)` hashes.
    /// A count of zero is sized as a single item.
    pub fn with_estimates(expected_items: u64, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let num_bits = (-n * false_positive_rate.ln() / (ln2 * ln2)).ceil().max(1.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).ceil().max(1.0) as u32;
        Self::with_size(num_bits, num_hashes)
    }

    /// Creates an empty filter with explicit bit and hash counts.
    pub fn with_size(num_bits: u64, num_hashes: u32) -> Self {
        let num_bits = num_bits.max(1);
        let words = num_bits.div_ceil(64) as usize;
        Self {
            bits: vec![0; words],
            num_bits,
            num_hashes: num_hashes.max(1),
        }
    }

    #[inline]
    fn probe(&self, h1: u64, h2: u64, i: u64) -> (usize, u64) {
        let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits;
        ((bit / 64) as usize, 1 << (bit % 64))
    }

    #[inline]
    fn hash_pair(item: &[u8]) -> (u64, u64) {
        let h1 = fnv1a64(item);
        (h1, mix64(h1) | 1)
    }

    /// Adds an item.
    pub fn insert(&mut self, item: &[u8]) {
        let (h1, h2) = Self::hash_pair(item);
        for i in 0..u64::from(self.num_hashes) {
            let (word, mask) = self.probe(h1, h2, i);
            self.bits[word] |= mask;
        }
    }

    /// Tests membership. May return a false positive, never a false negative.
    pub fn contains(&self, item: &[u8]) -> bool {
        let (h1, h2) = Self::hash_pair(item);
        (0..u64::from(self.num_hashes)).all(|i| {
            let (word, mask) = self.probe(h1, h2, i);
            self.bits[word] & mask != 0
        })
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }
}
