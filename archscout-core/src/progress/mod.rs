//! Background tasks with cooperative cancellation and pollable progress
mod context;
mod registry;

pub use context::{RunState, RunningProject, TaskContext, TaskStatus};
pub use registry::{StartOptions, TaskRegistry, task_scope};
