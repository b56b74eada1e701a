// Async Item Pipeline
// Overlaps item processing with writing while keeping chunk order

use crate::error::{BatchError, BatchResult};
use crate::execution::context::ExecutionContext;
use crate::item::processor::ItemProcessor;
use crate::item::writer::ItemWriter;
use crate::item::Chunk;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::warn;

/// Handle to an item still being processed on the worker pool
pub struct PendingItem<O> {
    handle: JoinHandle<BatchResult<Option<O>>>,
}

impl<O> PendingItem<O> {
    /// Wait for the processing result; a panicked task becomes a process error
    pub async fn resolve(self) -> BatchResult<Option<O>> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(BatchError::process(format!("processing task failed: {}", e))),
        }
    }
}

/// Dispatches each item to a bounded pool of tokio tasks
///
/// `process` returns immediately with a [`PendingItem`] once a pool slot is
/// free, so a full pool applies back-pressure to the chunk loop. An optional
/// filter runs inline before dispatch, in submission order; order-dependent
/// filters such as duplicate validation belong there.
pub struct AsyncItemProcessor<I, O> {
    delegate: Arc<dyn ItemProcessor<I, O>>,
    filter: Option<Arc<dyn ItemProcessor<I, I>>>,
    permits: Arc<Semaphore>,
}

impl<I, O> AsyncItemProcessor<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new<P>(delegate: P, pool_size: usize) -> Self
    where
        P: ItemProcessor<I, O> + 'static,
    {
        Self::from_arc(Arc::new(delegate), pool_size)
    }

    pub fn from_arc(delegate: Arc<dyn ItemProcessor<I, O>>, pool_size: usize) -> Self {
        Self {
            delegate,
            filter: None,
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    /// Run `filter` on the caller's task before an item is dispatched
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: ItemProcessor<I, I> + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }
}

#[async_trait]
impl<I, O> ItemProcessor<I, PendingItem<O>> for AsyncItemProcessor<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn process(&self, item: I) -> BatchResult<Option<PendingItem<O>>> {
        let item = match &self.filter {
            Some(filter) => match filter.process(item).await? {
                Some(item) => item,
                None => return Ok(None),
            },
            None => item,
        };

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| BatchError::process(format!("worker pool closed: {}", e)))?;

        let delegate = Arc::clone(&self.delegate);
        let handle = tokio::spawn(async move {
            let _permit = permit;
            delegate.process(item).await
        });

        Ok(Some(PendingItem { handle }))
    }

    async fn open(&self, context: &ExecutionContext) -> BatchResult<()> {
        if let Some(filter) = &self.filter {
            filter.open(context).await?;
        }
        self.delegate.open(context).await
    }
}

/// Resolves pending items in submission order, then makes one delegate write
pub struct AsyncItemWriter<O> {
    delegate: Box<dyn ItemWriter<O>>,
}

impl<O> AsyncItemWriter<O>
where
    O: Send + 'static,
{
    pub fn new<W>(delegate: W) -> Self
    where
        W: ItemWriter<O> + 'static,
    {
        Self {
            delegate: Box::new(delegate),
        }
    }
}

#[async_trait]
impl<O> ItemWriter<PendingItem<O>> for AsyncItemWriter<O>
where
    O: Send + 'static,
{
    async fn write(&mut self, chunk: &mut Chunk<PendingItem<O>>) -> BatchResult<()> {
        let pending = chunk.take_items();
        let mut resolved = Chunk::with_capacity(pending.len());
        let mut first_error = None;

        // Every handle is awaited, even after a failure, so no task outlives the chunk
        for item in pending {
            match item.resolve().await {
                Ok(Some(value)) => resolved.push(value),
                Ok(None) => resolved.add_filtered(1),
                Err(e) => {
                    if first_error.is_some() {
                        warn!(error = %e, "additional processing failure in failed chunk");
                    } else {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        if !resolved.is_empty() {
            self.delegate.write(&mut resolved).await?;
        }
        chunk.add_filtered(resolved.filtered());
        Ok(())
    }

    async fn open(&mut self, context: &ExecutionContext) -> BatchResult<()> {
        self.delegate.open(context).await
    }

    async fn update(&mut self, context: &mut ExecutionContext) -> BatchResult<()> {
        self.delegate.update(context).await
    }

    async fn close(&mut self) -> BatchResult<()> {
        self.delegate.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::duplicate::DuplicateValidationProcessor;
    use crate::item::processor::{FnItemProcessor, PassThroughItemProcessor};
    use crate::item::writer::ListItemWriter;
    use std::time::Duration;

    /// Sleeps longer for earlier items so tasks finish in reverse order
    struct SlowUpper;

    #[async_trait]
    impl ItemProcessor<u64, String> for SlowUpper {
        async fn process(&self, item: u64) -> BatchResult<Option<String>> {
            tokio::time::sleep(Duration::from_millis(30 - item * 3)).await;
            if item == 7 {
                return Ok(None);
            }
            Ok(Some(format!("item-{}", item)))
        }
    }

    async fn submit<P>(processor: &P, items: impl IntoIterator<Item = u64>) -> Chunk<PendingItem<String>>
    where
        P: ItemProcessor<u64, PendingItem<String>>,
    {
        let mut chunk = Chunk::new();
        for item in items {
            if let Some(pending) = processor.process(item).await.unwrap() {
                chunk.push(pending);
            }
        }
        chunk
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_write_order_matches_submission_order() {
        let processor = AsyncItemProcessor::new(SlowUpper, 4);
        let inner = ListItemWriter::new();
        let written = inner.written();
        let mut writer = AsyncItemWriter::new(inner);

        let mut chunk = submit(&processor, 0..10).await;
        writer.write(&mut chunk).await.unwrap();

        let expected: Vec<String> = (0..10)
            .filter(|n| *n != 7)
            .map(|n| format!("item-{}", n))
            .collect();
        assert_eq!(written.chunks().await, vec![expected]);
        assert_eq!(chunk.filtered(), 1);
    }

    #[tokio::test]
    async fn test_processing_error_fails_the_write() {
        let failing = FnItemProcessor::new(|n: u64| {
            if n == 2 {
                Err(BatchError::process("bad item"))
            } else {
                Ok(Some(n.to_string()))
            }
        });
        let processor = AsyncItemProcessor::new(failing, 2);
        let inner = ListItemWriter::new();
        let written = inner.written();
        let mut writer = AsyncItemWriter::new(inner);

        let mut chunk = submit(&processor, 0..5).await;
        let err = writer.write(&mut chunk).await.unwrap_err();

        assert!(matches!(err, BatchError::Process(msg) if msg == "bad item"));
        assert_eq!(written.write_calls().await, 0);
    }

    #[tokio::test]
    async fn test_panicking_task_is_a_process_error() {
        let panicking = FnItemProcessor::new(|n: u64| -> BatchResult<Option<String>> {
            if n == 1 {
                panic!("processor bug");
            }
            Ok(Some(n.to_string()))
        });
        let processor = AsyncItemProcessor::new(panicking, 2);
        let mut writer = AsyncItemWriter::new(ListItemWriter::new());

        let mut chunk = submit(&processor, 0..3).await;
        let err = writer.write(&mut chunk).await.unwrap_err();
        assert!(matches!(err, BatchError::Process(msg) if msg.contains("processing task failed")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_duplicate_filter_keeps_first_submitted() {
        // Key extraction for the first item is slow, so a racing worker would claim "a" first
        let duplicates = DuplicateValidationProcessor::new(
            |item: &(u32, &'static str)| {
                if item.0 == 0 {
                    std::thread::sleep(Duration::from_millis(20));
                }
                item.1
            },
            false,
        );
        let processor = AsyncItemProcessor::new(PassThroughItemProcessor, 2).with_filter(duplicates);
        processor.open(&ExecutionContext::new()).await.unwrap();
        let inner = ListItemWriter::new();
        let written = inner.written();
        let mut writer = AsyncItemWriter::new(inner);

        let mut chunk = Chunk::new();
        let mut filtered = 0;
        for item in [(0, "a"), (1, "a"), (2, "b")] {
            match processor.process(item).await.unwrap() {
                Some(pending) => chunk.push(pending),
                None => filtered += 1,
            }
        }
        writer.write(&mut chunk).await.unwrap();

        assert_eq!(written.items().await, vec![(0, "a"), (2, "b")]);
        assert_eq!(filtered, 1);
    }

    #[tokio::test]
    async fn test_all_filtered_skips_delegate() {
        let processor = AsyncItemProcessor::new(
            FnItemProcessor::new(|_: u64| -> BatchResult<Option<String>> { Ok(None) }),
            2,
        );
        let inner = ListItemWriter::new();
        let written = inner.written();
        let mut writer = AsyncItemWriter::new(inner);

        let mut chunk = submit(&processor, 0..4).await;
        writer.write(&mut chunk).await.unwrap();

        assert_eq!(written.write_calls().await, 0);
        assert_eq!(chunk.filtered(), 4);
    }
}
