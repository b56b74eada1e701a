// Item Writers
// Sink side of a chunk step, called once per committed chunk

use crate::error::BatchResult;
use crate::execution::context::ExecutionContext;
use crate::item::Chunk;

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Writes all surviving items of one chunk, in original order
///
/// Returning an error fails the chunk: its counts are not committed.
#[async_trait]
pub trait ItemWriter<T>: Send
where
    T: Send + 'static,
{
    async fn write(&mut self, chunk: &mut Chunk<T>) -> BatchResult<()>;

    async fn open(&mut self, _context: &ExecutionContext) -> BatchResult<()> {
        Ok(())
    }

    /// Called after a successful write, before the step execution is saved
    async fn update(&mut self, _context: &mut ExecutionContext) -> BatchResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> BatchResult<()> {
        Ok(())
    }
}

/// Adapts a closure over the chunk's items into a writer
pub struct FnItemWriter<F, T> {
    f: F,
    _marker: PhantomData<fn(&[T])>,
}

impl<F, T> FnItemWriter<F, T>
where
    F: FnMut(&[T]) -> BatchResult<()> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T> ItemWriter<T> for FnItemWriter<F, T>
where
    F: FnMut(&[T]) -> BatchResult<()> + Send,
    T: Send + Sync + 'static,
{
    async fn write(&mut self, chunk: &mut Chunk<T>) -> BatchResult<()> {
        (self.f)(chunk.items())
    }
}

/// Shared view of everything a [`ListItemWriter`] received, one entry per write call
#[derive(Debug)]
pub struct WrittenItems<T> {
    chunks: Arc<Mutex<Vec<Vec<T>>>>,
}

impl<T> Clone for WrittenItems<T> {
    fn clone(&self) -> Self {
        Self {
            chunks: Arc::clone(&self.chunks),
        }
    }
}

impl<T: Clone> WrittenItems<T> {
    pub async fn chunks(&self) -> Vec<Vec<T>> {
        self.chunks.lock().await.clone()
    }

    /// All written items, flattened in write order
    pub async fn items(&self) -> Vec<T> {
        self.chunks.lock().await.iter().flatten().cloned().collect()
    }

    pub async fn write_calls(&self) -> usize {
        self.chunks.lock().await.len()
    }
}

/// Collects written chunks in memory
#[derive(Debug)]
pub struct ListItemWriter<T> {
    written: WrittenItems<T>,
}

impl<T> ListItemWriter<T> {
    pub fn new() -> Self {
        Self {
            written: WrittenItems {
                chunks: Arc::new(Mutex::new(Vec::new())),
            },
        }
    }

    pub fn written(&self) -> WrittenItems<T> {
        self.written.clone()
    }
}

impl<T> Default for ListItemWriter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> ItemWriter<T> for ListItemWriter<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn write(&mut self, chunk: &mut Chunk<T>) -> BatchResult<()> {
        self.written.chunks.lock().await.push(chunk.items().to_vec());
        Ok(())
    }
}
