//! Test doubles and fixtures shared across the workspace's test suites.
//!
//! - [`transports`] - scripted agent transports with invocation counting
//! - [`builders`] - fluent builders for projects and features
//! - [`fixtures`] - throwaway on-disk project trees

pub mod builders;
pub mod fixtures;
pub mod transports;

pub use builders::{FeatureBuilder, ProjectBuilder};
pub use fixtures::ProjectFixture;
pub use transports::{artifact_complete_transport, Behavior, ScriptedTransport};
