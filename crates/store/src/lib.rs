//! CourseForge job persistence adapters.
//!
//! Implements the [`pipeline::JobStore`] trait twice:
//!
//! - [`InMemoryJobStore`]: a process-local map, used by tests and by callers
//!   that do not need jobs to survive a restart.
//! - [`FileJobStore`]: one JSON document per job under a directory. Every
//!   mutation rewrites the document through a temp file and an atomic rename,
//!   so a crash leaves either the previous or the new version on disk and
//!   never a torn one.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Both stores share the same mutation rules (see
//! [`transitions`]) so they are observably identical apart from durability.
//! The [`pipeline`] crate sees only [`pipeline::JobStore`].

mod file;
mod memory;
pub mod transitions;

pub use file::FileJobStore;
pub use memory::InMemoryJobStore;
