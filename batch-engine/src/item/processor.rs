// Item Processors
// Optional transformation stage; `None` filters the item out of the chunk

use crate::error::BatchResult;
use crate::execution::context::ExecutionContext;

use async_trait::async_trait;
use std::marker::PhantomData;

/// Transforms one item, or filters it by returning `Ok(None)`
///
/// Processors take `&self` so the async pipeline can share one instance
/// across its worker tasks.
#[async_trait]
pub trait ItemProcessor<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn process(&self, item: I) -> BatchResult<Option<O>>;

    /// Called once per step execution before the first item
    async fn open(&self, _context: &ExecutionContext) -> BatchResult<()> {
        Ok(())
    }
}

/// Hands every item through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughItemProcessor;

#[async_trait]
impl<T> ItemProcessor<T, T> for PassThroughItemProcessor
where
    T: Send + 'static,
{
    async fn process(&self, item: T) -> BatchResult<Option<T>> {
        Ok(Some(item))
    }
}

/// Adapts a synchronous closure into a processor
pub struct FnItemProcessor<F, I, O> {
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<F, I, O> FnItemProcessor<F, I, O>
where
    F: Fn(I) -> BatchResult<Option<O>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, I, O> ItemProcessor<I, O> for FnItemProcessor<F, I, O>
where
    F: Fn(I) -> BatchResult<Option<O>> + Send + Sync,
    I: Send + 'static,
    O: Send + 'static,
{
    async fn process(&self, item: I) -> BatchResult<Option<O>> {
        (self.f)(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatchError;

    #[tokio::test]
    async fn test_pass_through() {
        let processor = PassThroughItemProcessor;
        assert_eq!(processor.process(5).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_fn_processor_transform_and_filter() {
        let processor = FnItemProcessor::new(|n: i32| {
            if n < 0 {
                return Err(BatchError::process("negative"));
            }
            Ok((n % 2 == 0).then(|| format!("{} hello", n)))
        });

        assert_eq!(processor.process(2).await.unwrap(), Some("2 hello".to_string()));
        assert_eq!(processor.process(3).await.unwrap(), None);
        assert!(processor.process(-1).await.is_err());
    }
}
