//! CourseForge generation agents, LLM gateway and pipeline executor.
//!
//! This crate provides the five generation agents (intent, curriculum,
//! content, assessment, quality), the LLM gateway that routes and times out
//! every model call, the retry runner with prompt fallbacks, the bounded
//! lesson worker pool, and the [`PipelineExecutor`] that drives jobs through
//! the stage loop.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Agents and the executor sequence calls between
//! business logic in the [`pipeline`] crate and infrastructure ports
//! ([`pipeline::LlmClient`], [`pipeline::JobStore`], [`pipeline::Notifier`]).
//! Validation rules live in `pipeline::gates`; nothing here decides whether an
//! artifact is acceptable.

mod executor;
pub mod gateway;
mod notify;
mod pool;
pub mod prompts;
mod retry;
pub mod roles;

pub use executor::{PipelineExecutor, RegenerationReport};
pub use gateway::LlmGateway;
pub use notify::TracingNotifier;
pub use prompts::PromptStrategy;
pub use roles::Agents;
