// itemReaderJob and savePersonJob

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use batch_engine::{
    BatchResult, Chunk, DuplicateValidationProcessor, FnItemWriter, ItemWriter, Job,
    JobParameters, ListItemReader, RunIdIncrementer, Step,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use super::JobEnv;
use crate::io::CsvItemReader;

/// Bundled input for the CSV reader step
pub const DEFAULT_PERSON_CSV: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/persons.csv");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: u32,
    pub name: String,
    pub age: String,
    pub address: String,
}

impl Person {
    pub fn new(id: u32, name: impl Into<String>, age: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            age: age.into(),
            address: address.into(),
        }
    }
}

/// In-process person table
#[derive(Debug, Clone, Default)]
pub struct PersonStore {
    rows: Arc<Mutex<Vec<Person>>>,
}

impl PersonStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn save_all(&self, persons: &[Person]) {
        self.rows.lock().await.extend_from_slice(persons);
    }

    pub async fn count(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn clear(&self) {
        self.rows.lock().await.clear();
    }
}

struct PersonStoreWriter {
    store: PersonStore,
}

#[async_trait]
impl ItemWriter<Person> for PersonStoreWriter {
    async fn write(&mut self, chunk: &mut Chunk<Person>) -> BatchResult<()> {
        self.store.save_all(chunk.items()).await;
        Ok(())
    }
}

fn log_names(persons: &[Person]) -> BatchResult<()> {
    let names: Vec<&str> = persons.iter().map(|p| p.name.as_str()).collect();
    info!(names = %names.join(", "), "persons read");
    Ok(())
}

pub fn item_reader_job(_env: &JobEnv) -> BatchResult<Job> {
    let listed: Vec<Person> = (0..10)
        .map(|i| Person::new(i + 1, format!("test name{}", i), "test age", "test address"))
        .collect();

    let list_step = Step::builder("customItemReaderStep")
        .chunk::<Person>(10)
        .reader(ListItemReader::new("customItemReader", listed))
        .writer(FnItemWriter::new(log_names))
        .build()?;

    Job::builder("itemReaderJob")
        .incrementer(RunIdIncrementer::new())
        .start(list_step)
        .next_job_scoped("csvFileStep", |parameters: &JobParameters| {
            let path = parameters
                .get_string("file")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PERSON_CSV));

            Step::builder("csvFileStep")
                .chunk::<Person>(10)
                .reader(CsvItemReader::new("csvFileItemReader", path))
                .writer(FnItemWriter::new(log_names))
                .build()
        })
        .build()
}

/// Three distinct names followed by repeats of the first one
pub fn sample_persons() -> Vec<Person> {
    (1..=100)
        .map(|id| {
            let name = match id {
                2 => "Bob",
                3 => "Carol",
                _ => "Alice",
            };
            Person::new(id, name, "30", "Seoul")
        })
        .collect()
}

/// Saves persons, filtering repeated names unless `allow_duplicate=true`
pub fn save_person_job(env: &JobEnv) -> BatchResult<Job> {
    let store = env.persons.clone();

    Job::builder("savePersonJob")
        .incrementer(RunIdIncrementer::new())
        .start_job_scoped("savePersonStep", move |parameters: &JobParameters| {
            let allow_duplicate = parameters
                .get_string("allow_duplicate")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));

            Step::builder("savePersonStep")
                .chunk::<Person>(10)
                .reader(ListItemReader::new("personReader", sample_persons()))
                .processor(DuplicateValidationProcessor::new(
                    |person: &Person| person.name.clone(),
                    allow_duplicate,
                ))
                .writer(PersonStoreWriter {
                    store: store.clone(),
                })
                .build()
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use batch_engine::{
        BatchStatus, EngineConfig, InMemoryJobRepository, JobLauncher, JobParametersBuilder,
    };
    use std::fs;

    fn env() -> JobEnv {
        JobEnv::new(EngineConfig::default(), std::env::temp_dir())
    }

    async fn save_persons(env: &JobEnv, parameters: JobParameters) -> u64 {
        let execution = JobLauncher::new(Arc::new(InMemoryJobRepository::new()))
            .run(&save_person_job(env).unwrap(), parameters)
            .await
            .unwrap();
        assert_eq!(execution.status, BatchStatus::Completed);
        execution.step_executions.iter().map(|s| s.write_count).sum()
    }

    #[tokio::test]
    async fn test_duplicates_filtered_by_default() {
        let env = env();
        assert_eq!(save_persons(&env, JobParameters::new()).await, 3);
        assert_eq!(env.persons.count().await, 3);
    }

    #[tokio::test]
    async fn test_allow_duplicate_parameter() {
        let env = env();
        let not_allowed = JobParametersBuilder::new()
            .add_string("allow_duplicate", "false")
            .build();
        assert_eq!(save_persons(&env, not_allowed).await, 3);

        env.persons.clear().await;
        let allowed = JobParametersBuilder::new()
            .add_string("allow_duplicate", "true")
            .build();
        assert_eq!(save_persons(&env, allowed).await, 100);
        assert_eq!(env.persons.count().await, 100);
    }

    #[tokio::test]
    async fn test_item_reader_job_reads_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persons.csv");
        fs::write(&path, "id,name,age,address\n1,a,10,x\n2,b,20,y\n3,c,30,z\n").unwrap();

        let parameters = JobParametersBuilder::new()
            .add_string("file", path.to_string_lossy())
            .build();
        let execution = JobLauncher::new(Arc::new(InMemoryJobRepository::new()))
            .run(&item_reader_job(&env()).unwrap(), parameters)
            .await
            .unwrap();

        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(execution.step_execution("customItemReaderStep").unwrap().read_count, 10);
        assert_eq!(execution.step_execution("csvFileStep").unwrap().read_count, 3);
    }

    #[tokio::test]
    async fn test_bundled_csv_is_readable() {
        let execution = JobLauncher::new(Arc::new(InMemoryJobRepository::new()))
            .run(&item_reader_job(&env()).unwrap(), JobParameters::new())
            .await
            .unwrap();
        assert_eq!(execution.status, BatchStatus::Completed);
        assert!(execution.step_execution("csvFileStep").unwrap().read_count > 0);
    }
}
