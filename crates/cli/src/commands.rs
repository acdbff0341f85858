//! Subcommand handlers. Results go to stdout as JSON; logs go to stderr.

use std::process::ExitCode;

use agents::PipelineExecutor;
use pipeline::{JobId, JobStatus};
use serde::Serialize;
use tracing::warn;

use crate::cli::Command;

pub async fn dispatch(command: Command, executor: &PipelineExecutor) -> anyhow::Result<ExitCode> {
    match command {
        Command::Generate(args) => {
            let handle = executor.generate_course(args.into_request()?).await?;
            eprintln!("job {}", handle.job_id);
            Ok(exit_code(follow(executor, handle.job_id).await?))
        }
        Command::Status { job_id } => print(&executor.get_job_status(job_id).await?),
        Command::Result { job_id } => print(&executor.get_result(job_id).await?),
        Command::Resume { job_id } => {
            let handle = executor.resume_job(job_id).await?;
            Ok(exit_code(follow(executor, handle.job_id).await?))
        }
        Command::Regenerate(args) => {
            let report = match args.stage {
                Some(stage) => executor.regenerate_component(args.job_id, stage).await?,
                None => {
                    let lessons = args.lesson_ids()?;
                    executor.regenerate_lessons(args.job_id, &lessons).await?
                }
            };
            print(&report)?;
            Ok(exit_code(report.all_passed()))
        }
        Command::Cancel { job_id } => {
            executor.cancel_job(job_id).await?;
            let job = executor.wait_for(job_id).await?;
            print(&job.progress())
        }
        Command::List(args) => {
            let jobs = executor.list_jobs(&args.filter()).await?;
            let progress: Vec<_> = jobs.iter().map(|job| job.progress()).collect();
            print(&progress)
        }
        Command::Delete { job_id } => {
            executor.delete_job(job_id).await?;
            eprintln!("deleted job {job_id}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Cost { job_id } => {
            let cost = executor.estimate_cost(job_id).await?;
            println!("{cost}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Recover => {
            let handles = executor.recover_incomplete().await?;
            eprintln!("recovering {} job(s)", handles.len());
            let mut all_complete = true;
            for handle in handles {
                all_complete &= follow(executor, handle.job_id).await?;
            }
            Ok(exit_code(all_complete))
        }
    }
}

/// Waits for a job to stop, cancelling it on Ctrl-C, and prints its progress.
/// Returns whether the job completed.
async fn follow(executor: &PipelineExecutor, job_id: JobId) -> anyhow::Result<bool> {
    let job = tokio::select! {
        job = executor.wait_for(job_id) => job?,
        _ = tokio::signal::ctrl_c() => {
            warn!(job_id = %job_id, "Interrupted; cancelling job");
            executor.cancel_job(job_id).await?;
            executor.wait_for(job_id).await?
        }
    };
    print(&job.progress())?;
    Ok(job.status == JobStatus::Complete)
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(ExitCode::SUCCESS)
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
