//! CircleCI does not push status to Homu over a webhook; it is used purely as an outbound
//! remediation client the Scheduler can call to re-run jobs/workflows that flaked rather than
//! genuinely failed.

pub mod client;
pub mod models;
pub mod workflows;

pub use client::{CircleCiClient, DefaultCircleCiClient};
pub use models::{Job, JobStatus, WorkflowSummary};
pub use workflows::WorkflowRunner;
