// Duplicate Validation
// Processor that filters every item whose key was already seen in this step run

use crate::error::BatchResult;
use crate::execution::context::ExecutionContext;
use crate::item::processor::ItemProcessor;

use async_trait::async_trait;
use dashmap::DashSet;
use std::hash::Hash;

/// Passes the first item per key and filters later ones
///
/// The seen-key set is cleared whenever the owning step opens and is never
/// persisted. Under the async pipeline install it with
/// [`AsyncItemProcessor::with_filter`](crate::item::AsyncItemProcessor::with_filter)
/// so keys are claimed in submission order rather than completion order.
pub struct DuplicateValidationProcessor<T, K> {
    key_extractor: Box<dyn Fn(&T) -> K + Send + Sync>,
    seen: DashSet<K>,
    allow_duplicate: bool,
}

impl<T, K> DuplicateValidationProcessor<T, K>
where
    K: Eq + Hash,
{
    pub fn new<F>(key_extractor: F, allow_duplicate: bool) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self {
            key_extractor: Box::new(key_extractor),
            seen: DashSet::new(),
            allow_duplicate,
        }
    }

    pub fn seen_keys(&self) -> usize {
        self.seen.len()
    }
}

#[async_trait]
impl<T, K> ItemProcessor<T, T> for DuplicateValidationProcessor<T, K>
where
    T: Send + 'static,
    K: Eq + Hash + Send + Sync + 'static,
{
    async fn process(&self, item: T) -> BatchResult<Option<T>> {
        if self.allow_duplicate {
            return Ok(Some(item));
        }

        let key = (self.key_extractor)(&item);
        if self.seen.insert(key) {
            Ok(Some(item))
        } else {
            Ok(None)
        }
    }

    async fn open(&self, _context: &ExecutionContext) -> BatchResult<()> {
        self.seen.clear();
        Ok(())
    }
}
