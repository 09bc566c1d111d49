//! Workflow orchestration: record types, the pure transition function, and
//! the components that drive it (orchestrator, poller, decision handler).

pub mod decision;
mod error;
pub mod machine;
pub mod orchestrator;
pub mod poller;
pub mod prompts;
pub mod types;

pub use decision::{DecisionOutcome, DecisionRequest, handle_decision};
pub use error::WorkflowError;
pub use machine::WorkflowEvent;
pub use orchestrator::{Dispatched, Orchestrator};
pub use poller::{Poller, PollerService};
pub use types::{LaunchRequest, ReviewGates};

#[cfg(test)]
pub(crate) mod tests;
