// Core types and execution engine for Pipewright pipelines

pub mod config;
pub mod error;
pub mod queue;
pub mod runner;
pub mod storage;
pub mod types;
pub mod workflow;

pub use config::EngineConfig;
pub use error::{GraphError, PipelineError, PipelineResult};
pub use types::*;
