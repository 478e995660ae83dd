//! Workflow Coordinator
//!
//! Drives a feature through its workflow shape: classify, persist, execute
//! each retained phase through the agent router, validate artifacts, and
//! record everything in the state store. See
//! [`coordinator::WorkflowCoordinator`].

pub mod coordinator;

pub use coordinator::{CoordinatorConfig, FeatureOutcome, WorkflowCoordinator};
