//! # Job Control Plane
//!
//! Contract for driving actual indexing jobs on some compute backend. The
//! orchestrator only ever expresses desired state; backends own scheduling,
//! images and networking. Every mutating call must be idempotent: the
//! orchestrator retries freely and repeats calls that may already have
//! taken effect (control-plane calls run after the owning persistence
//! transaction commits, so a crash in between replays them).
//!
//! `Delete`, `Restart` and `RestartById` must tolerate the target job not
//! existing; the orchestrator calls them on processors whose jobs were
//! never materialized or were already torn down.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Processor;

pub use memory::{ControlPlaneCall, InMemoryControlPlane};

/// Errors surfaced by control-plane backends
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    /// The backend understood the request and refused it
    #[error("backend rejected request: {0}")]
    Rejected(String),

    /// The backend could not be reached
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// Opaque failure from a custom backend
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Desired state of one processor's job as handed to a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub processor_id: Uuid,
    pub project_id: String,
    pub version: i32,
    /// Worker replicas to run; zero for a paused processor
    pub replicas: i32,
    /// Scheduling-pool placement hint
    pub driver_version: String,
    pub code_url: String,
    pub debug: bool,
}

impl JobSpec {
    pub fn from_processor(processor: &Processor) -> Self {
        Self {
            processor_id: processor.id,
            project_id: processor.project_id.clone(),
            version: processor.version,
            replicas: processor.desired_replicas(),
            driver_version: processor.driver_version.clone(),
            code_url: processor.properties.code_url.clone(),
            debug: processor.properties.debug,
        }
    }
}

/// One live worker of a running job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningInstance {
    pub instance_id: String,
    pub node: String,
    pub started_at: DateTime<Utc>,
}

/// One page of job logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPage {
    pub lines: Vec<String>,
    /// Cursor for the next page, absent when exhausted
    pub next_cursor: Option<String>,
}

/// Backend seam for materializing processors as running jobs
#[async_trait]
pub trait JobControlPlane: Send + Sync {
    /// Name of the backend for logs and diagnostics
    fn backend_name(&self) -> &'static str;

    /// Reconcile the processor's job to its desired state, creating it if
    /// needed. A paused processor reconciles to zero replicas, not to a
    /// deleted job.
    async fn start_or_update(&self, processor: &Processor) -> Result<(), ControlPlaneError>;

    /// Restart the processor's job workers
    async fn restart(&self, processor: &Processor) -> Result<(), ControlPlaneError>;

    /// Tear the processor's job down entirely
    async fn delete(&self, processor: &Processor) -> Result<(), ControlPlaneError>;

    /// Restart addressed by id alone, for processors whose full record is
    /// not at hand; the placement hint routes to the right scheduling pool
    async fn restart_by_id(
        &self,
        processor_id: Uuid,
        placement_hint: &str,
    ) -> Result<(), ControlPlaneError>;

    /// Whether the processor's job is up and running
    async fn is_alive(
        &self,
        processor_id: Uuid,
        placement_hint: &str,
    ) -> Result<bool, ControlPlaneError>;

    /// Live workers of the processor's job
    async fn list_running_instances(
        &self,
        processor: &Processor,
    ) -> Result<Vec<RunningInstance>, ControlPlaneError>;

    /// Fetch a page of the job's logs
    async fn fetch_logs(
        &self,
        processor: &Processor,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<LogPage, ControlPlaneError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_spec_reflects_pause() {
        let mut processor = Processor::new("analytics", 1);
        processor.num_workers = 4;

        let spec = JobSpec::from_processor(&processor);
        assert_eq!(spec.replicas, 4);

        processor.set_paused("ops request");
        let paused_spec = JobSpec::from_processor(&processor);
        assert_eq!(paused_spec.replicas, 0);
        // Everything but the replica count is unchanged.
        assert_eq!(paused_spec.processor_id, spec.processor_id);
        assert_eq!(paused_spec.code_url, spec.code_url);
    }
}
