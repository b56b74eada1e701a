// Range Partitioning
// Splits one logical step into disjoint key ranges for parallel workers

use crate::error::{BatchError, BatchResult};
use crate::execution::context::ExecutionContext;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Context key holding the first key of a partition's range
pub const MIN_KEY: &str = "minKey";

/// Context key holding the last key (inclusive) of a partition's range
pub const MAX_KEY: &str = "maxKey";

/// Inclusive key range `[min_key, max_key]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub min_key: i64,
    pub max_key: i64,
}

impl KeyRange {
    pub fn new(min_key: i64, max_key: i64) -> Self {
        Self { min_key, max_key }
    }

    /// Number of keys covered; zero when `max_key < min_key`
    pub fn len(&self) -> u64 {
        if self.max_key < self.min_key {
            0
        } else {
            (self.max_key as i128 - self.min_key as i128 + 1) as u64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: i64) -> bool {
        self.min_key <= key && key <= self.max_key
    }

    /// Read the range seeded into a partition's step context
    pub fn from_context(context: &ExecutionContext) -> BatchResult<Self> {
        match (context.get_long(MIN_KEY), context.get_long(MAX_KEY)) {
            (Some(min_key), Some(max_key)) => Ok(Self { min_key, max_key }),
            _ => Err(BatchError::Partition(format!(
                "step context has no '{}'/'{}' range",
                MIN_KEY, MAX_KEY
            ))),
        }
    }
}

/// One unit of partitioned work: an id and the context its worker starts with
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub id: String,
    pub context: ExecutionContext,
}

/// Split `[min_key, max_key]` into at most `grid_size` contiguous ranges
///
/// Every range holds `ceil(len / grid_size)` keys except the last, which is
/// clamped to end exactly at `max_key`. An empty range yields no partitions.
pub fn partition_range(grid_size: usize, min_key: i64, max_key: i64) -> BatchResult<Vec<(String, KeyRange)>> {
    if grid_size == 0 {
        return Err(BatchError::Partition("grid size must be at least 1".to_string()));
    }
    if max_key < min_key {
        return Ok(Vec::new());
    }

    let total = max_key as i128 - min_key as i128 + 1;
    let grid = grid_size as i128;
    let target_size = (total + grid - 1) / grid;

    let mut partitions = Vec::new();
    let mut start = min_key as i128;
    while start <= max_key as i128 {
        let end = (start + target_size - 1).min(max_key as i128);
        partitions.push((
            format!("partition{}", partitions.len()),
            KeyRange::new(start as i64, end as i64),
        ));
        start = end + 1;
    }

    Ok(partitions)
}

/// Produces the partitions of a partitioned step
#[async_trait]
pub trait Partitioner: Send + Sync {
    async fn partition(&self, grid_size: usize) -> BatchResult<Vec<Partition>>;
}

/// Minimal query the range partitioner needs from a data source
#[async_trait]
pub trait KeyRangeSource: Send + Sync {
    /// Smallest and largest key, or `None` when the source is empty
    async fn key_range(&self) -> BatchResult<Option<KeyRange>>;
}

/// Partitions the key range of a [`KeyRangeSource`]
pub struct RangePartitioner<S> {
    source: S,
}

impl<S: KeyRangeSource> RangePartitioner<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: KeyRangeSource> Partitioner for RangePartitioner<S> {
    async fn partition(&self, grid_size: usize) -> BatchResult<Vec<Partition>> {
        let range = match self.source.key_range().await? {
            Some(range) => range,
            None => return Ok(Vec::new()),
        };

        let partitions = partition_range(grid_size, range.min_key, range.max_key)?
            .into_iter()
            .map(|(id, range)| {
                let mut context = ExecutionContext::new();
                context.put_long(MIN_KEY, range.min_key);
                context.put_long(MAX_KEY, range.max_key);
                Partition { id, context }
            })
            .collect();

        Ok(partitions)
    }
}

/// A fixed range, for sources whose bounds are known up front
#[async_trait]
impl KeyRangeSource for KeyRange {
    async fn key_range(&self) -> BatchResult<Option<KeyRange>> {
        Ok((!self.is_empty()).then_some(*self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_even_split() {
        let partitions = partition_range(8, 1, 40000).unwrap();
        assert_eq!(partitions.len(), 8);

        for (i, (id, range)) in partitions.iter().enumerate() {
            assert_eq!(id, &format!("partition{}", i));
            assert_eq!(range.len(), 5000);
        }
        assert_eq!(partitions[0].1, KeyRange::new(1, 5000));
        assert_eq!(partitions[7].1.max_key, 40000);
    }

    #[test]
    fn test_last_partition_is_clamped() {
        let partitions = partition_range(3, 1, 10).unwrap();
        let ranges: Vec<KeyRange> = partitions.into_iter().map(|(_, r)| r).collect();
        assert_eq!(
            ranges,
            vec![KeyRange::new(1, 4), KeyRange::new(5, 8), KeyRange::new(9, 10)]
        );
    }

    #[test]
    fn test_fewer_keys_than_grid() {
        let partitions = partition_range(8, 5, 7).unwrap();
        assert_eq!(partitions.len(), 3);
        assert!(partitions.iter().all(|(_, r)| r.len() == 1));
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(partition_range(4, 10, 9).unwrap().is_empty());
        assert!(matches!(partition_range(0, 1, 10), Err(BatchError::Partition(_))));
        assert_eq!(partition_range(1, 3, 3).unwrap(), vec![("partition0".to_string(), KeyRange::new(3, 3))]);
    }

    #[test]
    fn test_extreme_bounds_do_not_overflow() {
        let partitions = partition_range(2, i64::MIN, i64::MAX).unwrap();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].1.min_key, i64::MIN);
        assert_eq!(partitions[1].1.max_key, i64::MAX);
        assert_eq!(partitions[0].1.max_key + 1, partitions[1].1.min_key);
    }

    #[tokio::test]
    async fn test_range_partitioner_seeds_contexts() {
        let partitioner = RangePartitioner::new(KeyRange::new(1, 400));
        let partitions = partitioner.partition(4).await.unwrap();

        assert_eq!(partitions.len(), 4);
        assert_eq!(partitions[1].id, "partition1");
        assert_eq!(
            KeyRange::from_context(&partitions[1].context).unwrap(),
            KeyRange::new(101, 200)
        );
    }

    #[tokio::test]
    async fn test_empty_source_has_no_partitions() {
        let partitioner = RangePartitioner::new(KeyRange::new(1, 0));
        assert!(partitioner.partition(4).await.unwrap().is_empty());
    }

    #[test]
    fn test_missing_range_in_context() {
        assert!(KeyRange::from_context(&ExecutionContext::new()).is_err());
    }

    proptest! {
        #[test]
        fn prop_partitions_cover_range_exactly(
            min_key in -1_000_000i64..1_000_000,
            len in 1i64..100_000,
            grid_size in 1usize..64,
        ) {
            let max_key = min_key + len - 1;
            let partitions = partition_range(grid_size, min_key, max_key).unwrap();

            prop_assert!(!partitions.is_empty());
            prop_assert!(partitions.len() <= grid_size);
            prop_assert_eq!(partitions[0].1.min_key, min_key);
            prop_assert_eq!(partitions[partitions.len() - 1].1.max_key, max_key);

            for pair in partitions.windows(2) {
                prop_assert!(pair[0].1.min_key <= pair[0].1.max_key);
                prop_assert_eq!(pair[0].1.max_key + 1, pair[1].1.min_key);
            }

            let covered: u64 = partitions.iter().map(|(_, r)| r.len()).sum();
            prop_assert_eq!(covered, len as u64);
        }
    }
}
