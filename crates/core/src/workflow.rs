// Level-parallel pipeline execution engine

pub mod coordinator;
pub mod dag;
pub mod executor;
pub mod manager;
pub mod registry;

pub use coordinator::RunCoordinator;
pub use dag::{DependencyGraph, GraphNode};
pub use executor::{GraphExecutor, NodeExecutor};
pub use manager::PipelineManager;
pub use registry::{ExecutionRegistry, RunExecutionContext};
