//! Task graph execution.
//!
//! ```text
//! Vec<StdioTask>
//!   -> TaskGraph::from_tasks_with_external()   nodes, edges, reverse edges
//!   -> TaskGraph::validate() / waves()         minimal cycle, Kahn waves
//!   -> ExecutionEngine                         wave by wave, bounded concurrency
//!   -> AttemptRunner                           rounds of primary + fallback
//!   -> ExecutionResult
//! ```

mod attempt;
mod engine;
pub mod graph;
mod scheduler;
pub mod traits;
pub mod types;

pub use attempt::AttemptRunner;
pub use engine::{ExecutionEngine, ExecutionEngineBuilder};
pub use graph::TaskGraph;
pub use scheduler::execute_wave;
pub use types::{ExecutionConfig, ExecutionOpts, ExecutionResult, TaskResult};
