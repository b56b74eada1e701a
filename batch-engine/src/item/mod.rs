// Item Module
// Reader / Processor / Writer contracts and their stock implementations

pub mod async_pipeline;
pub mod duplicate;
pub mod processor;
pub mod reader;
pub mod writer;

pub use async_pipeline::{AsyncItemProcessor, AsyncItemWriter, PendingItem};
pub use duplicate::DuplicateValidationProcessor;
pub use processor::{FnItemProcessor, ItemProcessor, PassThroughItemProcessor};
pub use reader::{ItemReader, ListItemReader};
pub use writer::{FnItemWriter, ItemWriter, ListItemWriter, WrittenItems};

/// Items handed to a writer in one call, in the order they were read
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    items: Vec<T>,
    filtered: u64,
}

impl<T> Chunk<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            filtered: 0,
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Move the items out, leaving the chunk empty
    pub fn take_items(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }

    /// Items dropped by a processor while this chunk was written
    pub fn filtered(&self) -> u64 {
        self.filtered
    }

    pub fn add_filtered(&mut self, count: u64) {
        self.filtered += count;
    }
}

impl<T> Default for Chunk<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<Vec<T>> for Chunk<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items, filtered: 0 }
    }
}

impl<T> IntoIterator for Chunk<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
