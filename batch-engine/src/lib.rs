// Batch Engine Library
// Step-graph job execution with chunk processing, partitioning and async item pipelines

pub mod config;
pub mod decision;
pub mod error;
pub mod execution;
pub mod item;
pub mod listener;
pub mod parameters;
pub mod repository;
pub mod status;
pub mod step;

pub use config::{EngineConfig, RepositoryConfig, RepositoryKind};
pub use decision::{JobExecutionDecider, JobParametersDecider};
pub use error::{BatchError, BatchResult};
pub use listener::{JobExecutionListener, StepExecutionListener};
pub use parameters::{
    JobParameter, JobParameters, JobParametersBuilder, JobParametersIncrementer, ParameterValue,
    RunIdIncrementer,
};
pub use repository::{FileJobRepository, InMemoryJobRepository, JobRepository};
pub use status::{BatchStatus, FlowStatus, RepeatStatus};

pub use execution::{
    progress_channel, ExecutionContext, ExecutionEvent, Job, JobBuilder, JobExecution,
    JobInstance, JobLauncher, KeyRange, KeyRangeSource, Partition, Partitioner, ProgressReceiver,
    ProgressSender, RangePartitioner, StepExecution,
};

pub use item::{
    AsyncItemProcessor, AsyncItemWriter, Chunk, DuplicateValidationProcessor, FnItemProcessor,
    FnItemWriter, ItemProcessor, ItemReader, ItemWriter, ListItemReader, ListItemWriter,
    PassThroughItemProcessor,
};

pub use step::{FnTasklet, Step, StepBuilder, StepScope, StopSignal, Tasklet};
