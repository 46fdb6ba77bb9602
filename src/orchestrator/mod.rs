pub mod prompts;
pub mod runner;
pub mod stage;
pub mod state;

pub use runner::WorkflowEngine;
pub use stage::{Stage, next_stage};
pub use state::{RunState, RunSummary, StateUpdate};
