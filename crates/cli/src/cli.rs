use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};
use pipeline::{
    CourseGenerationRequest, CourseLevel, JobFilter, JobId, JobStatus, LessonId, Stage, UserId,
};

/// Generate structured courses through a staged, checkpointed LLM pipeline.
#[derive(Debug, Parser)]
#[command(name = "courseforge", version)]
pub struct Cli {
    /// Configuration file. Defaults to `.courseforge/config.toml`.
    #[arg(long, global = true, env = "COURSEFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines regardless of configuration.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit a course request and follow it to a terminal state.
    Generate(GenerateArgs),
    /// Show a job's status, stage and failure diagnostics.
    Status { job_id: JobId },
    /// Print the finished course of a COMPLETE job as JSON.
    Result { job_id: JobId },
    /// Continue a job from its last committed checkpoint.
    Resume { job_id: JobId },
    /// Re-run one committed stage, or only some lessons.
    Regenerate(RegenerateArgs),
    /// Cancel a job.
    Cancel { job_id: JobId },
    /// List stored jobs, oldest first.
    List(ListArgs),
    /// Delete a job that is not running.
    Delete { job_id: JobId },
    /// Estimate the model cost of a job.
    Cost { job_id: JobId },
    /// Resume every job left mid-pipeline by an earlier process.
    Recover,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    pub topic: String,

    #[arg(long, env = "COURSEFORGE_USER", default_value = "local")]
    pub user: String,

    #[arg(long, default_value = "beginner")]
    pub level: CourseLevel,

    /// Total course length in minutes.
    #[arg(long, default_value_t = 120)]
    pub duration: u32,

    /// Learning objective; repeat for several.
    #[arg(long = "objective")]
    pub objectives: Vec<String>,
}

impl GenerateArgs {
    pub fn into_request(self) -> anyhow::Result<CourseGenerationRequest> {
        let user_id =
            UserId::new(self.user).ok_or_else(|| anyhow::anyhow!("--user must not be blank"))?;
        Ok(CourseGenerationRequest {
            topic: self.topic,
            user_id,
            level: self.level,
            duration_minutes: self.duration,
            objectives: self.objectives,
        })
    }
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("target").required(true).args(["stage", "lessons"])))]
pub struct RegenerateArgs {
    pub job_id: JobId,

    /// intent, curriculum, content, assessment or qa.
    #[arg(long)]
    pub stage: Option<Stage>,

    /// Lesson to rewrite; repeat for several. Implies the content stage.
    #[arg(long = "lesson")]
    pub lessons: Vec<String>,
}

impl RegenerateArgs {
    pub fn lesson_ids(&self) -> anyhow::Result<Vec<LessonId>> {
        self.lessons
            .iter()
            .map(|id| {
                LessonId::new(id.as_str())
                    .ok_or_else(|| anyhow::anyhow!("lesson ids must not be blank"))
            })
            .collect()
    }
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only jobs in this status, e.g. `FAILED` or `content-done`.
    #[arg(long)]
    pub status: Option<JobStatus>,

    #[arg(long)]
    pub user: Option<String>,

    /// Only jobs that have not reached a terminal state.
    #[arg(long)]
    pub active: bool,
}

impl ListArgs {
    pub fn filter(&self) -> JobFilter {
        JobFilter {
            status: self.status,
            user_id: self.user.clone().and_then(UserId::new),
            active_only: self.active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn generate_collects_repeated_objectives() {
        let cli = Cli::parse_from([
            "courseforge",
            "generate",
            "Python basics",
            "--duration",
            "180",
            "--objective",
            "variables",
            "--objective",
            "loops",
        ]);
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        let request = args.into_request().unwrap();
        assert_eq!(request.duration_minutes, 180);
        assert_eq!(request.objectives, vec!["variables", "loops"]);
        assert_eq!(request.level, CourseLevel::Beginner);
    }

    #[test]
    fn regenerate_needs_exactly_one_target() {
        let id = JobId::new_random().to_string();
        let cli = Cli::parse_from(["courseforge", "regenerate", &id, "--stage", "qa"]);
        let Command::Regenerate(args) = cli.command else {
            panic!("expected regenerate");
        };
        assert_eq!(args.stage, Some(Stage::Qa));

        let mixed = Cli::try_parse_from([
            "courseforge",
            "regenerate",
            &id,
            "--stage",
            "qa",
            "--lesson",
            "m1-l1",
        ]);
        assert!(mixed.is_err());

        let neither = Cli::try_parse_from(["courseforge", "regenerate", &id]);
        assert!(neither.is_err());
    }

    #[test]
    fn list_filter_parses_status() {
        let cli = Cli::parse_from(["courseforge", "list", "--status", "failed"]);
        let Command::List(args) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(args.filter().status, Some(JobStatus::Failed));
    }
}
