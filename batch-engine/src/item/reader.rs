// Item Readers
// Source side of a chunk step; `None` is the end-of-data signal

use crate::error::BatchResult;
use crate::execution::context::ExecutionContext;

use async_trait::async_trait;

/// Supplies items one at a time
///
/// After returning `Ok(None)` once, a reader must keep returning it.
#[async_trait]
pub trait ItemReader<T>: Send
where
    T: Send + 'static,
{
    async fn read(&mut self) -> BatchResult<Option<T>>;

    /// Called before the first read with the step context (restored on restart)
    async fn open(&mut self, _context: &ExecutionContext) -> BatchResult<()> {
        Ok(())
    }

    /// Save the resume position; called only after a chunk is committed
    async fn update(&mut self, _context: &mut ExecutionContext) -> BatchResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> BatchResult<()> {
        Ok(())
    }
}

/// Reads a fixed in-memory list, resuming from `"<name>.read.count"`
#[derive(Debug, Clone)]
pub struct ListItemReader<T> {
    name: String,
    items: Vec<T>,
    cursor: usize,
}

impl<T> ListItemReader<T> {
    pub fn new(name: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            name: name.into(),
            items,
            cursor: 0,
        }
    }

    fn count_key(&self) -> String {
        format!("{}.read.count", self.name)
    }
}

#[async_trait]
impl<T> ItemReader<T> for ListItemReader<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn read(&mut self) -> BatchResult<Option<T>> {
        let item = self.items.get(self.cursor).cloned();
        if item.is_some() {
            self.cursor += 1;
        }
        Ok(item)
    }

    async fn open(&mut self, context: &ExecutionContext) -> BatchResult<()> {
        let saved = context.get_long(&self.count_key()).unwrap_or(0).max(0) as usize;
        self.cursor = saved.min(self.items.len());
        Ok(())
    }

    async fn update(&mut self, context: &mut ExecutionContext) -> BatchResult<()> {
        context.put_long(self.count_key(), self.cursor as i64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_end_of_data_is_sticky() {
        let mut reader = ListItemReader::new("names", vec!["a", "b"]);
        reader.open(&ExecutionContext::new()).await.unwrap();

        assert_eq!(reader.read().await.unwrap(), Some("a"));
        assert_eq!(reader.read().await.unwrap(), Some("b"));
        assert_eq!(reader.read().await.unwrap(), None);
        assert_eq!(reader.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_resumes_from_saved_count() {
        let items: Vec<i32> = (0..10).collect();
        let mut ctx = ExecutionContext::new();

        let mut reader = ListItemReader::new("numbers", items.clone());
        reader.open(&ctx).await.unwrap();
        for _ in 0..4 {
            reader.read().await.unwrap();
        }
        reader.update(&mut ctx).await.unwrap();
        assert_eq!(ctx.get_long("numbers.read.count"), Some(4));

        let mut restarted = ListItemReader::new("numbers", items);
        restarted.open(&ctx).await.unwrap();
        assert_eq!(restarted.read().await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_open_resets_cursor() {
        let mut reader = ListItemReader::new("letters", vec!['x', 'y']);
        reader.open(&ExecutionContext::new()).await.unwrap();
        reader.read().await.unwrap();
        reader.read().await.unwrap();

        reader.open(&ExecutionContext::new()).await.unwrap();
        assert_eq!(reader.read().await.unwrap(), Some('x'));
    }
}
