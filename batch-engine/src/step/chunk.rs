// Chunk Processing
// Read/process/write loop expressed as a tasklet that commits one chunk per call

use crate::error::{BatchError, BatchResult};
use crate::execution::context::ExecutionContext;
use crate::item::processor::{ItemProcessor, PassThroughItemProcessor};
use crate::item::reader::ItemReader;
use crate::item::writer::ItemWriter;
use crate::item::Chunk;
use crate::listener::StepExecutionListener;
use crate::status::RepeatStatus;
use crate::step::tasklet::{StepScope, Tasklet};
use crate::step::{Step, StepKind};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const INITIAL_CHUNK_CAPACITY: usize = 1024;

/// Reads up to `chunk_size` items, processes them, writes the survivors once
///
/// Counts on the step execution only move after the writer returns, and the
/// reader/writer positions are saved at that same point.
pub struct ChunkOrientedTasklet<I, O> {
    chunk_size: usize,
    reader: Mutex<Box<dyn ItemReader<I>>>,
    processor: Arc<dyn ItemProcessor<I, O>>,
    writer: Mutex<Box<dyn ItemWriter<O>>>,
}

impl<I, O> ChunkOrientedTasklet<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new(
        chunk_size: usize,
        reader: Box<dyn ItemReader<I>>,
        processor: Arc<dyn ItemProcessor<I, O>>,
        writer: Box<dyn ItemWriter<O>>,
    ) -> BatchResult<Self> {
        if chunk_size == 0 {
            return Err(BatchError::configuration("chunk size must be greater than 0"));
        }

        Ok(Self {
            chunk_size,
            reader: Mutex::new(reader),
            processor,
            writer: Mutex::new(writer),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

#[async_trait]
impl<I, O> Tasklet for ChunkOrientedTasklet<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn open(&self, context: &ExecutionContext) -> BatchResult<()> {
        self.reader.lock().await.open(context).await?;
        self.processor.open(context).await?;
        self.writer.lock().await.open(context).await
    }

    async fn execute(&self, scope: &mut StepScope<'_>) -> BatchResult<RepeatStatus> {
        let mut reader = self.reader.lock().await;
        let mut writer = self.writer.lock().await;

        // chunk_size is caller-supplied; grow on demand
        let mut inputs = Vec::with_capacity(self.chunk_size.min(INITIAL_CHUNK_CAPACITY));
        let mut exhausted = false;
        while inputs.len() < self.chunk_size {
            match reader.read().await? {
                Some(item) => inputs.push(item),
                None => {
                    exhausted = true;
                    break;
                }
            }
        }

        if inputs.is_empty() {
            return Ok(RepeatStatus::Finished);
        }

        let read = inputs.len() as u64;
        let mut filtered = 0u64;
        let mut chunk = Chunk::with_capacity(inputs.len());
        for item in inputs {
            match self.processor.process(item).await? {
                Some(output) => chunk.push(output),
                None => filtered += 1,
            }
        }

        let submitted = chunk.len() as u64;
        if submitted > 0 {
            writer.write(&mut chunk).await?;
        }
        // Items the writer itself dropped (async pipeline) are filtered, not written
        let late_filtered = chunk.filtered();
        let written = submitted - late_filtered;

        let step = &mut *scope.step_execution;
        step.read_count += read;
        step.write_count += written;
        step.filter_count += filtered + late_filtered;

        reader.update(&mut step.context).await?;
        writer.update(&mut step.context).await?;

        debug!(
            step = %step.step_name,
            read,
            written,
            filtered = filtered + late_filtered,
            "chunk committed"
        );

        Ok(RepeatStatus::continue_if(!exhausted))
    }

    async fn close(&self) -> BatchResult<()> {
        let reader_closed = self.reader.lock().await.close().await;
        let writer_closed = self.writer.lock().await.close().await;
        reader_closed.and(writer_closed)
    }
}

/// Builder for a chunk-oriented step, created by `StepBuilder::chunk`
pub struct ChunkStepBuilder<I, O> {
    name: String,
    chunk_size: usize,
    reader: Option<Box<dyn ItemReader<I>>>,
    processor: Arc<dyn ItemProcessor<I, O>>,
    writer: Option<Box<dyn ItemWriter<O>>>,
    listeners: Vec<Arc<dyn StepExecutionListener>>,
}

impl<T> ChunkStepBuilder<T, T>
where
    T: Send + 'static,
{
    pub(crate) fn new(name: String, chunk_size: usize, listeners: Vec<Arc<dyn StepExecutionListener>>) -> Self {
        Self {
            name,
            chunk_size,
            reader: None,
            processor: Arc::new(PassThroughItemProcessor),
            writer: None,
            listeners,
        }
    }

    /// Set the processor; without one items are written unchanged
    ///
    /// The output type changes here, so call it before `writer`.
    pub fn processor<O, P>(self, processor: P) -> ChunkStepBuilder<T, O>
    where
        O: Send + 'static,
        P: ItemProcessor<T, O> + 'static,
    {
        self.processor_arc(Arc::new(processor))
    }

    /// Set a processor that is also held elsewhere
    pub fn processor_arc<O>(self, processor: Arc<dyn ItemProcessor<T, O>>) -> ChunkStepBuilder<T, O>
    where
        O: Send + 'static,
    {
        ChunkStepBuilder {
            name: self.name,
            chunk_size: self.chunk_size,
            reader: self.reader,
            processor,
            writer: None,
            listeners: self.listeners,
        }
    }
}

impl<I, O> ChunkStepBuilder<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn reader<R>(mut self, reader: R) -> Self
    where
        R: ItemReader<I> + 'static,
    {
        self.reader = Some(Box::new(reader));
        self
    }

    pub fn writer<W>(mut self, writer: W) -> Self
    where
        W: ItemWriter<O> + 'static,
    {
        self.writer = Some(Box::new(writer));
        self
    }

    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: StepExecutionListener + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn build(self) -> BatchResult<Step> {
        let reader = self.reader.ok_or_else(|| {
            BatchError::configuration(format!("chunk step '{}' has no reader", self.name))
        })?;
        let writer = self.writer.ok_or_else(|| {
            BatchError::configuration(format!("chunk step '{}' has no writer", self.name))
        })?;

        let tasklet = ChunkOrientedTasklet::new(self.chunk_size, reader, self.processor, writer)?;
        Ok(Step {
            name: self.name,
            kind: StepKind::Chunk {
                chunk_size: self.chunk_size,
                tasklet: Arc::new(tasklet),
            },
            listeners: self.listeners,
        })
    }
}
