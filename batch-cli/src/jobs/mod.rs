// Sample job registry

pub mod chunk;
pub mod hello;
pub mod person;
pub mod user;

use std::path::PathBuf;

use batch_engine::{BatchResult, EngineConfig, Job};

use person::PersonStore;
use user::UserStore;

/// Collaborators shared by the sample jobs of one process
#[derive(Clone)]
pub struct JobEnv {
    pub config: EngineConfig,
    pub users: UserStore,
    pub persons: PersonStore,
    /// Directory for files written by jobs
    pub output_dir: PathBuf,
}

impl JobEnv {
    pub fn new(config: EngineConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            users: UserStore::new(),
            persons: PersonStore::new(),
            output_dir: output_dir.into(),
        }
    }
}

type JobFactory = fn(&JobEnv) -> BatchResult<Job>;

/// Every sample job: name, description and how to build it
pub const JOBS: &[(&str, &str, JobFactory)] = &[
    ("helloJob", "single tasklet step", hello::hello_job),
    ("sharedJob", "job vs step context visibility", hello::shared_job),
    (
        "chunkProcessingJob",
        "tasklet-as-chunk and chunk step (param: chunkSize)",
        chunk::chunk_processing_job,
    ),
    (
        "itemReaderJob",
        "list and CSV item readers (param: file)",
        person::item_reader_job,
    ),
    (
        "savePersonJob",
        "duplicate filtering (param: allow_duplicate)",
        person::save_person_job,
    ),
    ("userJob", "user level-up (param: date=YYYY-MM)", user::user_job),
    (
        "asyncUserJob",
        "user level-up through the async pipeline (param: date)",
        user::async_user_job,
    ),
    (
        "partitionUserJob",
        "user level-up over id partitions (param: date)",
        user::partition_user_job,
    ),
];

pub fn build(name: &str, env: &JobEnv) -> Option<BatchResult<Job>> {
    JOBS.iter()
        .find(|(job_name, _, _)| *job_name == name)
        .map(|(_, _, factory)| factory(env))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_sample_job_builds() {
        let env = JobEnv::new(EngineConfig::default(), std::env::temp_dir());
        for (name, _, factory) in JOBS {
            let job = factory(&env).unwrap();
            assert_eq!(job.name(), *name);
        }
        assert!(build("missingJob", &env).is_none());
    }
}
