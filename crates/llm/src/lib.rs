//! CourseForge LLM provider infrastructure adapter.
//!
//! Implements the [`pipeline::LlmClient`] trait for a Messages-style JSON API
//! (Anthropic's `/v1/messages` shape). Additional providers are added as new
//! `impl` blocks in this crate without any changes to the `pipeline` crate.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** All HTTP transport, request formatting, response
//! parsing, and rate-limit header handling live here. The [`pipeline`] crate
//! sees only [`pipeline::LlmClient`]. Retry and back-off belong to the
//! executor, not to this crate.
//!
//! | Type | Role |
//! |------|------|
//! | [`HttpLlmClient`] | One HTTP request per `invoke`; maps status codes to [`pipeline::LlmError`] |
//! | [`ConcurrencyLimitedClient`] | Wraps any client with a global cap on outstanding calls |

mod http;
mod limiter;
mod response;

pub use http::{HttpLlmClient, HttpLlmConfig};
pub use limiter::ConcurrencyLimitedClient;
pub use response::extract_json;
