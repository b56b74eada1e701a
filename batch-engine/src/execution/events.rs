// Execution Events
// Progress reporting and event types for job execution

use crate::status::{BatchStatus, FlowStatus};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during job execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Job execution started (or restarted)
    JobStarted {
        job_name: String,
        execution_id: u64,
        parameters: String,
        restart: bool,
    },

    /// Job execution reached a terminal status
    JobCompleted {
        job_name: String,
        execution_id: u64,
        status: BatchStatus,
        exit_status: FlowStatus,
        duration: Duration,
    },

    /// Step execution started
    StepStarted {
        job_name: String,
        step_name: String,
    },

    /// Step execution completed
    StepCompleted {
        job_name: String,
        step_name: String,
        status: BatchStatus,
        exit_status: FlowStatus,
        read_count: u64,
        write_count: u64,
        filter_count: u64,
        duration: Duration,
    },

    /// Step was skipped (already completed by a previous run of the instance)
    StepSkipped {
        job_name: String,
        step_name: String,
        reason: String,
    },

    /// A chunk was written and its counts committed
    ChunkCommitted {
        step_name: String,
        read: u64,
        written: u64,
        filtered: u64,
    },

    /// A partition worker started
    PartitionStarted {
        step_name: String,
        partition: String,
    },

    /// A partition worker finished
    PartitionCompleted {
        step_name: String,
        partition: String,
        status: BatchStatus,
    },

    /// A decision node selected an edge label
    DecisionEvaluated {
        job_name: String,
        decision: String,
        status: FlowStatus,
    },

    /// Execution error occurred
    Error {
        message: String,
        job_name: Option<String>,
        step_name: Option<String>,
    },
}

impl ExecutionEvent {
    /// Create a job started event
    pub fn job_started(
        job_name: impl Into<String>,
        execution_id: u64,
        parameters: impl Into<String>,
        restart: bool,
    ) -> Self {
        Self::JobStarted {
            job_name: job_name.into(),
            execution_id,
            parameters: parameters.into(),
            restart,
        }
    }

    /// Create a job completed event
    pub fn job_completed(
        job_name: impl Into<String>,
        execution_id: u64,
        status: BatchStatus,
        exit_status: FlowStatus,
        duration: Duration,
    ) -> Self {
        Self::JobCompleted {
            job_name: job_name.into(),
            execution_id,
            status,
            exit_status,
            duration,
        }
    }

    pub fn step_started(job_name: impl Into<String>, step_name: impl Into<String>) -> Self {
        Self::StepStarted {
            job_name: job_name.into(),
            step_name: step_name.into(),
        }
    }

    pub fn step_skipped(
        job_name: impl Into<String>,
        step_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::StepSkipped {
            job_name: job_name.into(),
            step_name: step_name.into(),
            reason: reason.into(),
        }
    }

    pub fn chunk_committed(step_name: impl Into<String>, read: u64, written: u64, filtered: u64) -> Self {
        Self::ChunkCommitted {
            step_name: step_name.into(),
            read,
            written,
            filtered,
        }
    }

    pub fn partition_started(step_name: impl Into<String>, partition: impl Into<String>) -> Self {
        Self::PartitionStarted {
            step_name: step_name.into(),
            partition: partition.into(),
        }
    }

    pub fn partition_completed(
        step_name: impl Into<String>,
        partition: impl Into<String>,
        status: BatchStatus,
    ) -> Self {
        Self::PartitionCompleted {
            step_name: step_name.into(),
            partition: partition.into(),
            status,
        }
    }

    pub fn decision_evaluated(
        job_name: impl Into<String>,
        decision: impl Into<String>,
        status: FlowStatus,
    ) -> Self {
        Self::DecisionEvaluated {
            job_name: job_name.into(),
            decision: decision.into(),
            status,
        }
    }

    /// Create an execution error event
    pub fn execution_error(
        message: impl Into<String>,
        job_name: Option<String>,
        step_name: Option<String>,
    ) -> Self {
        Self::Error {
            message: message.into(),
            job_name,
            step_name,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
