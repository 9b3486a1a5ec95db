// Public modules
pub mod config;
pub mod context;
pub mod error;
pub mod git;
pub mod hosting;
pub mod local_files;
pub mod orchestrator;
pub mod pipeline;
pub mod steps;
pub mod version;

// Re-export common types for convenience
pub use context::{FileEdit, ReleaseContext};
pub use error::{Error, ErrorCode, Hint, Result};
pub use orchestrator::{Orchestrator, RunOptions};
pub use pipeline::{Pipeline, PipelineSpec, RunResult, RunStatus, StepConfig, StepOutcome};
