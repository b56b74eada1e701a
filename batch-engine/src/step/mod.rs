// Step Module
// Step definitions, their builders and the step execution coordinator

pub mod chunk;
pub mod executor;
pub mod tasklet;

pub use chunk::{ChunkOrientedTasklet, ChunkStepBuilder};
pub use executor::{StepRunner, StopSignal};
pub use tasklet::{FnTasklet, StepScope, Tasklet};

use crate::error::{BatchError, BatchResult};
use crate::execution::partition::{Partition, Partitioner};
use crate::listener::StepExecutionListener;

use std::fmt;
use std::sync::Arc;

/// Builds the worker step that runs one partition
pub type WorkerFactory = Arc<dyn Fn(&Partition) -> BatchResult<Step> + Send + Sync>;

/// Immutable definition of one unit of work
pub struct Step {
    pub(crate) name: String,
    pub(crate) kind: StepKind,
    pub(crate) listeners: Vec<Arc<dyn StepExecutionListener>>,
}

pub enum StepKind {
    /// A single tasklet repeated until it finishes
    Tasklet(Arc<dyn Tasklet>),
    /// A read/process/write loop committing `chunk_size` items at a time
    Chunk {
        chunk_size: usize,
        tasklet: Arc<dyn Tasklet>,
    },
    /// A worker step fanned out over the partitions of a key range
    Partitioned(PartitionSpec),
}

pub struct PartitionSpec {
    pub partitioner: Arc<dyn Partitioner>,
    pub grid_size: usize,
    pub worker: WorkerFactory,
    /// Concurrent workers; the engine default applies when unset
    pub pool_size: Option<usize>,
}

impl Step {
    pub fn builder(name: impl Into<String>) -> StepBuilder {
        StepBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub fn listeners(&self) -> &[Arc<dyn StepExecutionListener>] {
        &self.listeners
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            StepKind::Tasklet(_) => "tasklet".to_string(),
            StepKind::Chunk { chunk_size, .. } => format!("chunk({})", chunk_size),
            StepKind::Partitioned(spec) => format!("partitioned(grid={})", spec.grid_size),
        };
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &kind)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Entry point for defining a step
pub struct StepBuilder {
    name: String,
    listeners: Vec<Arc<dyn StepExecutionListener>>,
}

impl StepBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            listeners: Vec::new(),
        }
    }

    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: StepExecutionListener + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// A step driven by a single tasklet
    pub fn tasklet<T>(self, tasklet: T) -> Step
    where
        T: Tasklet + 'static,
    {
        Step {
            name: self.name,
            kind: StepKind::Tasklet(Arc::new(tasklet)),
            listeners: self.listeners,
        }
    }

    /// A chunk-oriented step over items of type `T`
    pub fn chunk<T>(self, chunk_size: usize) -> ChunkStepBuilder<T, T>
    where
        T: Send + 'static,
    {
        ChunkStepBuilder::new(self.name, chunk_size, self.listeners)
    }

    /// A step whose worker runs once per partition
    pub fn partitioner<P>(self, partitioner: P, grid_size: usize) -> PartitionStepBuilder
    where
        P: Partitioner + 'static,
    {
        PartitionStepBuilder {
            name: self.name,
            listeners: self.listeners,
            partitioner: Arc::new(partitioner),
            grid_size,
            worker: None,
            pool_size: None,
        }
    }
}

pub struct PartitionStepBuilder {
    name: String,
    listeners: Vec<Arc<dyn StepExecutionListener>>,
    partitioner: Arc<dyn Partitioner>,
    grid_size: usize,
    worker: Option<WorkerFactory>,
    pool_size: Option<usize>,
}

impl PartitionStepBuilder {
    /// Factory for the worker step; called once per partition
    pub fn worker<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Partition) -> BatchResult<Step> + Send + Sync + 'static,
    {
        self.worker = Some(Arc::new(factory));
        self
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = Some(pool_size);
        self
    }

    pub fn build(self) -> BatchResult<Step> {
        if self.grid_size == 0 {
            return Err(BatchError::configuration(format!(
                "partitioned step '{}' needs a grid size of at least 1",
                self.name
            )));
        }
        if self.pool_size == Some(0) {
            return Err(BatchError::configuration(format!(
                "partitioned step '{}' needs a pool size of at least 1",
                self.name
            )));
        }
        let worker = self.worker.ok_or_else(|| {
            BatchError::configuration(format!("partitioned step '{}' has no worker", self.name))
        })?;

        Ok(Step {
            name: self.name,
            kind: StepKind::Partitioned(PartitionSpec {
                partitioner: self.partitioner,
                grid_size: self.grid_size,
                worker,
                pool_size: self.pool_size,
            }),
            listeners: self.listeners,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::partition::{KeyRange, RangePartitioner};
    use crate::status::RepeatStatus;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Tasklet for Noop {
        async fn execute(&self, _scope: &mut StepScope<'_>) -> BatchResult<RepeatStatus> {
            Ok(RepeatStatus::Finished)
        }
    }

    fn noop() -> Noop {
        Noop
    }

    #[test]
    fn test_tasklet_step() {
        let step = Step::builder("helloStep").tasklet(noop());
        assert_eq!(step.name(), "helloStep");
        assert!(matches!(step.kind(), StepKind::Tasklet(_)));
        assert!(format!("{:?}", step).contains("tasklet"));
    }

    #[test]
    fn test_partition_step_validation() {
        let missing_worker = Step::builder("p")
            .partitioner(RangePartitioner::new(KeyRange::new(1, 10)), 2)
            .build();
        assert!(missing_worker.is_err());

        let zero_grid = Step::builder("p")
            .partitioner(RangePartitioner::new(KeyRange::new(1, 10)), 0)
            .worker(|_| Ok(Step::builder("w").tasklet(noop())))
            .build();
        assert!(zero_grid.is_err());

        let step = Step::builder("p")
            .partitioner(RangePartitioner::new(KeyRange::new(1, 10)), 2)
            .worker(|_| Ok(Step::builder("w").tasklet(noop())))
            .pool_size(2)
            .build()
            .unwrap();
        assert!(matches!(
            step.kind(),
            StepKind::Partitioned(PartitionSpec { grid_size: 2, pool_size: Some(2), .. })
        ));
    }
}
