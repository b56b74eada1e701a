// Flat file readers and writers for the sample jobs

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use batch_engine::{BatchError, BatchResult, Chunk, ExecutionContext, ItemReader, ItemWriter};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Reads records from a CSV file with a header row
///
/// The number of records read is saved as `"<name>.read.count"` so a
/// restarted step skips what it already committed.
pub struct CsvItemReader<T> {
    name: String,
    path: PathBuf,
    records: Option<csv::DeserializeRecordsIntoIter<File, T>>,
    read_count: i64,
}

impl<T> CsvItemReader<T> {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            records: None,
            read_count: 0,
        }
    }

    fn count_key(&self) -> String {
        format!("{}.read.count", self.name)
    }
}

#[async_trait]
impl<T> ItemReader<T> for CsvItemReader<T>
where
    T: DeserializeOwned + Send + 'static,
{
    async fn open(&mut self, context: &ExecutionContext) -> BatchResult<()> {
        let file = File::open(&self.path).map_err(|e| {
            BatchError::read(format!("cannot open {}: {}", self.path.display(), e))
        })?;
        let mut records = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(file)
            .into_deserialize();

        let skip = context.get_long_or(&self.count_key(), 0);
        for _ in 0..skip {
            if records.next().is_none() {
                break;
            }
        }
        self.read_count = skip;
        self.records = Some(records);
        Ok(())
    }

    async fn read(&mut self) -> BatchResult<Option<T>> {
        let Some(records) = self.records.as_mut() else {
            return Err(BatchError::read(format!("reader '{}' is not open", self.name)));
        };

        match records.next() {
            Some(Ok(record)) => {
                self.read_count += 1;
                Ok(Some(record))
            }
            Some(Err(e)) => Err(BatchError::read(format!(
                "{} record {}: {}",
                self.path.display(),
                self.read_count + 1,
                e
            ))),
            None => Ok(None),
        }
    }

    async fn update(&mut self, context: &mut ExecutionContext) -> BatchResult<()> {
        context.put_long(self.count_key(), self.read_count);
        Ok(())
    }

    async fn close(&mut self) -> BatchResult<()> {
        self.records = None;
        Ok(())
    }
}

/// Writes items as CSV rows after a literal header line
///
/// A fresh step truncates the file; a restarted one appends after the rows
/// it already committed.
pub struct CsvItemWriter<T> {
    name: String,
    path: PathBuf,
    header: String,
    writer: Option<csv::Writer<File>>,
    written: i64,
    _marker: PhantomData<fn(&T)>,
}

impl<T> CsvItemWriter<T> {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, header: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            header: header.into(),
            writer: None,
            written: 0,
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn count_key(&self) -> String {
        format!("{}.written.count", self.name)
    }
}

#[async_trait]
impl<T> ItemWriter<T> for CsvItemWriter<T>
where
    T: Serialize + Send + 'static,
{
    async fn open(&mut self, context: &ExecutionContext) -> BatchResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        self.written = context.get_long_or(&self.count_key(), 0);
        let file = if self.written > 0 {
            OpenOptions::new().append(true).open(&self.path)?
        } else {
            let mut file = File::create(&self.path)?;
            writeln!(file, "{}", self.header)?;
            file
        };

        self.writer = Some(
            csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file),
        );
        Ok(())
    }

    async fn write(&mut self, chunk: &mut Chunk<T>) -> BatchResult<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(BatchError::write(format!("writer '{}' is not open", self.name)));
        };

        for item in chunk.iter() {
            writer
                .serialize(item)
                .map_err(|e| BatchError::write(format!("{}: {}", self.path.display(), e)))?;
        }
        writer.flush()?;
        self.written += chunk.len() as i64;
        Ok(())
    }

    async fn update(&mut self, context: &mut ExecutionContext) -> BatchResult<()> {
        context.put_long(self.count_key(), self.written);
        Ok(())
    }

    async fn close(&mut self) -> BatchResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}
