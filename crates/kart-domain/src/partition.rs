//! Deterministic code partitioning.
//!
//! Staging rows and aggregation workers both derive a code's partition from
//! [`Partitioner::partition_of`], so the mapping must stay a pure function
//! of the code bytes for the whole run.

use crate::error::{DomainError, DomainResult};

/// Default number of partitions.
pub const DEFAULT_PARTITION_COUNT: u32 = 16;

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash.
#[inline]
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash = FNV32_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV32_PRIME);
    }
    hash
}

/// Maps codes onto a fixed number of partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    count: u32,
}

impl Partitioner {
    /// Creates a partitioner with `count` partitions.
    pub fn new(count: u32) -> DomainResult<Self> {
        if count == 0 {
            return Err(DomainError::InvalidConfig {
                message: "partition count must be at least 1".to_string(),
            });
        }
        Ok(Self { count })
    }

    /// Number of partitions.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Partition id for a code, in `[0, count)`.
    #[inline]
    pub fn partition_of(&self, code: &str) -> u32 {
        fnv1a32(code.as_bytes()) % self.count
    }

    /// Iterates every partition id.
    pub fn partitions(&self) -> std::ops::Range<u32> {
        0..self.count
    }
}

impl Default for Partitioner {
    fn default() -> Self {
        Self {
            count: DEFAULT_PARTITION_COUNT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fnv1a32_reference_values() {
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_zero_partitions_rejected() {
        assert!(matches!(
            Partitioner::new(0),
            Err(DomainError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_single_partition_maps_everything_to_zero() {
        let partitioner = Partitioner::new(1).unwrap();
        assert_eq!(partitioner.partition_of("SAVE1000"), 0);
        assert_eq!(partitioner.partition_of("DISCOUNT50"), 0);
    }

    #[test]
    fn test_default_partition_count() {
        let partitioner = Partitioner::default();
        assert_eq!(partitioner.count(), DEFAULT_PARTITION_COUNT);
        assert_eq!(partitioner.partitions().len(), 16);
    }

    proptest! {
        #[test]
        fn prop_partition_is_pure_and_in_range(code in "[A-Z0-9]{8,10}", count in 1u32..64) {
            let partitioner = Partitioner::new(count).unwrap();
            let first = partitioner.partition_of(&code);
            prop_assert!(first < count);
            prop_assert_eq!(first, Partitioner::new(count).unwrap().partition_of(&code));
            prop_assert_eq!(first, fnv1a32(code.as_bytes()) % count);
        }
    }
}
