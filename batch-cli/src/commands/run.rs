use crate::jobs::{self, JobEnv};
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::bail;
use color_eyre::Result;

use batch_engine::{
    progress_channel, BatchStatus, EngineConfig, ExecutionEvent, JobLauncher,
    JobParametersBuilder,
};

/// Launch a job with run parameters
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Name of the job (see `batch list`)
    pub job: String,

    /// Run parameter (can be repeated, format: key=value or key(type)=value)
    #[arg(long = "param", short = 'p', value_name = "KEY[(TYPE)]=VALUE")]
    pub parameters: Vec<String>,

    /// Directory for files the job writes
    #[arg(long, short = 'o', value_name = "DIR", default_value = "output")]
    pub output_dir: PathBuf,
}

pub async fn execute(config: EngineConfig, args: &RunArgs) -> Result<()> {
    let mut builder = JobParametersBuilder::new();
    for assignment in &args.parameters {
        builder = builder.parse(assignment)?;
    }
    let parameters = builder.build();

    let env = JobEnv::new(config.clone(), &args.output_dir);
    let job = match jobs::build(&args.job, &env) {
        Some(job) => job?,
        None => bail!("Unknown job '{}'. Run `batch list` to see the available jobs", args.job),
    };

    output::status("Repository", &format!("{:?}", config.repository.kind));
    let repository = config.build_repository().await?;

    let (tx, mut rx) = progress_channel();
    let launcher = JobLauncher::new(repository)
        .with_config(config)
        .with_progress(tx);

    // Spawn execution in background
    let handle = tokio::spawn(async move { launcher.run(&job, parameters).await });

    // Process events in the foreground
    while let Some(event) = rx.recv().await {
        match &event {
            ExecutionEvent::JobStarted {
                job_name,
                execution_id,
                parameters,
                restart,
            } => {
                println!();
                let verb = if *restart { "Restarting" } else { "Starting" };
                output::header(&format!(
                    "{} job '{}' (execution {}) [{}]",
                    verb, job_name, execution_id, parameters
                ));
            }

            ExecutionEvent::JobCompleted {
                job_name,
                status,
                exit_status,
                duration,
                ..
            } => {
                println!();
                let message = format!(
                    "Job '{}' {} (exit {}) in {:.2}s",
                    job_name,
                    status,
                    exit_status,
                    duration.as_secs_f64()
                );
                output::outcome(*status, &message);
            }

            ExecutionEvent::StepStarted { step_name, .. } => {
                println!("    Step '{}'", step_name);
            }

            ExecutionEvent::StepCompleted {
                step_name,
                status,
                read_count,
                write_count,
                filter_count,
                duration,
                ..
            } => {
                output::progress(
                    *status,
                    &format!(
                        "    Step '{}' {} read={} write={} filter={} ({:.2}s)",
                        step_name,
                        status,
                        read_count,
                        write_count,
                        filter_count,
                        duration.as_secs_f64()
                    ),
                );
            }

            ExecutionEvent::StepSkipped {
                step_name, reason, ..
            } => {
                output::warning(&format!("    Step '{}' skipped: {}", step_name, reason));
            }

            ExecutionEvent::ChunkCommitted {
                read,
                written,
                filtered,
                ..
            } => {
                output::dim(&format!(
                    "        chunk read={} written={} filtered={}",
                    read, written, filtered
                ));
            }

            ExecutionEvent::PartitionStarted { partition, .. } => {
                output::dim(&format!("        [{}] started", partition));
            }

            ExecutionEvent::PartitionCompleted {
                partition, status, ..
            } => {
                output::progress(*status, &format!("        [{}] {}", partition, status));
            }

            ExecutionEvent::DecisionEvaluated {
                decision, status, ..
            } => {
                output::dim(&format!("    Decision '{}' -> {}", decision, status));
            }

            ExecutionEvent::Error { message, .. } => {
                output::error(message);
            }
        }
    }

    // Launch refusals never produce events
    let execution = handle.await??;

    for failure in &execution.failures {
        output::error(failure);
    }
    if execution.status != BatchStatus::Completed {
        std::process::exit(1);
    }

    Ok(())
}
