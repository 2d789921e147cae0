pub mod backends;
pub mod error;
pub mod orchestrator;
pub mod stages;

pub use error::MergeError;
pub use orchestrator::{MergeOutcome, MergePipeline, MergeRequest, PipelineSettings};
