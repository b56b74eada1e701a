// Execution Module
// Job graph, launcher, execution records, scoped contexts and partitioning

pub mod context;
pub mod events;
pub mod executor;
pub mod graph;
pub mod models;
pub mod partition;

pub use context::{ContextValue, ExecutionContext, JobContextRef};
pub use events::{progress_channel, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use executor::JobLauncher;
pub use graph::{GraphError, GraphErrorKind, Job, JobBuilder, Node, StepDefinition, Target};
pub use models::{JobExecution, JobInstance, StepExecution};
pub use partition::{KeyRange, KeyRangeSource, Partition, Partitioner, RangePartitioner};
