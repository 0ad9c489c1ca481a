//! # In-Memory Control Plane
//!
//! Reference [`JobControlPlane`] for dev mode and tests. Jobs are rows in a
//! desired-state registry; nothing actually runs. Every call is recorded in
//! a journal so tests can assert exactly which calls an orchestration
//! operation produced, and liveness can be overridden per processor to
//! simulate crashed or wedged jobs.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use async_trait::async_trait;

use crate::models::Processor;

use super::{ControlPlaneError, JobControlPlane, JobSpec, LogPage, RunningInstance};

/// A control-plane call as recorded in the journal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneCall {
    StartOrUpdate { processor_id: Uuid, replicas: i32 },
    Restart { processor_id: Uuid },
    Delete { processor_id: Uuid },
    RestartById { processor_id: Uuid, placement_hint: String },
}

/// Desired-state registry standing in for a real compute backend
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    jobs: DashMap<Uuid, JobSpec>,
    logs: DashMap<Uuid, Vec<String>>,
    liveness_overrides: DashMap<Uuid, bool>,
    journal: Mutex<Vec<ControlPlaneCall>>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current desired state for a processor's job, if one exists
    pub fn job(&self, processor_id: Uuid) -> Option<JobSpec> {
        self.jobs.get(&processor_id).map(|entry| entry.clone())
    }

    /// Number of jobs currently registered
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Everything recorded since construction (or the last clear), in call
    /// order
    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        self.journal.lock().clone()
    }

    /// Drop the journal, keeping the registry
    pub fn clear_calls(&self) {
        self.journal.lock().clear();
    }

    /// Force `is_alive` for a processor regardless of its registry entry
    pub fn set_alive(&self, processor_id: Uuid, alive: bool) {
        self.liveness_overrides.insert(processor_id, alive);
    }

    /// Append a log line for a processor's job
    pub fn push_log(&self, processor_id: Uuid, line: impl Into<String>) {
        self.logs.entry(processor_id).or_default().push(line.into());
    }

    fn record(&self, call: ControlPlaneCall) {
        self.journal.lock().push(call);
    }

    fn synthesize_instances(&self, spec: &JobSpec) -> Vec<RunningInstance> {
        (0..spec.replicas.max(0))
            .map(|i| RunningInstance {
                instance_id: format!("{}-{}", spec.processor_id, i),
                node: format!("pool-{}-node-{}", spec.driver_version, i),
                started_at: Utc::now(),
            })
            .collect()
    }
}

#[async_trait]
impl JobControlPlane for InMemoryControlPlane {
    fn backend_name(&self) -> &'static str {
        "in-memory"
    }

    async fn start_or_update(&self, processor: &Processor) -> Result<(), ControlPlaneError> {
        let spec = JobSpec::from_processor(processor);
        self.record(ControlPlaneCall::StartOrUpdate {
            processor_id: processor.id,
            replicas: spec.replicas,
        });
        self.jobs.insert(processor.id, spec);
        Ok(())
    }

    async fn restart(&self, processor: &Processor) -> Result<(), ControlPlaneError> {
        self.record(ControlPlaneCall::Restart {
            processor_id: processor.id,
        });
        // A restart of a job that never materialized is a create.
        self.jobs
            .entry(processor.id)
            .or_insert_with(|| JobSpec::from_processor(processor));
        Ok(())
    }

    async fn delete(&self, processor: &Processor) -> Result<(), ControlPlaneError> {
        self.record(ControlPlaneCall::Delete {
            processor_id: processor.id,
        });
        self.jobs.remove(&processor.id);
        self.logs.remove(&processor.id);
        self.liveness_overrides.remove(&processor.id);
        Ok(())
    }

    async fn restart_by_id(
        &self,
        processor_id: Uuid,
        placement_hint: &str,
    ) -> Result<(), ControlPlaneError> {
        self.record(ControlPlaneCall::RestartById {
            processor_id,
            placement_hint: placement_hint.to_string(),
        });
        // Without a full processor record there is nothing to create; a
        // missing job is a no-op.
        Ok(())
    }

    async fn is_alive(
        &self,
        processor_id: Uuid,
        _placement_hint: &str,
    ) -> Result<bool, ControlPlaneError> {
        if let Some(forced) = self.liveness_overrides.get(&processor_id) {
            return Ok(*forced);
        }
        Ok(self
            .jobs
            .get(&processor_id)
            .map(|spec| spec.replicas > 0)
            .unwrap_or(false))
    }

    async fn list_running_instances(
        &self,
        processor: &Processor,
    ) -> Result<Vec<RunningInstance>, ControlPlaneError> {
        match self.jobs.get(&processor.id) {
            Some(spec) => Ok(self.synthesize_instances(&spec)),
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_logs(
        &self,
        processor: &Processor,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<LogPage, ControlPlaneError> {
        let offset: usize = match cursor {
            Some(cursor) => cursor
                .parse()
                .map_err(|_| ControlPlaneError::Rejected(format!("bad log cursor: {cursor}")))?,
            None => 0,
        };
        let all = self
            .logs
            .get(&processor.id)
            .map(|lines| lines.clone())
            .unwrap_or_default();
        let lines: Vec<String> = all
            .iter()
            .skip(offset)
            .take(limit as usize)
            .cloned()
            .collect();
        let consumed = offset + lines.len();
        let next_cursor = if consumed < all.len() {
            Some(consumed.to_string())
        } else {
            None
        };
        Ok(LogPage { lines, next_cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(workers: i32) -> Processor {
        let mut p = Processor::new("analytics", 1);
        p.num_workers = workers;
        p.driver_version = "2.14.0".to_string();
        p
    }

    #[tokio::test]
    async fn test_start_or_update_is_idempotent() {
        let plane = InMemoryControlPlane::new();
        let p = processor(3);

        plane.start_or_update(&p).await.unwrap();
        let first = plane.job(p.id).unwrap();

        plane.start_or_update(&p).await.unwrap();
        let second = plane.job(p.id).unwrap();

        assert_eq!(first, second);
        assert_eq!(plane.job_count(), 1);
        assert_eq!(plane.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_job() {
        let plane = InMemoryControlPlane::new();
        let p = processor(1);

        plane.delete(&p).await.unwrap();
        assert_eq!(
            plane.calls(),
            vec![ControlPlaneCall::Delete { processor_id: p.id }]
        );
    }

    #[tokio::test]
    async fn test_liveness_tracks_replicas_and_overrides() {
        let plane = InMemoryControlPlane::new();
        let mut p = processor(2);

        assert!(!plane.is_alive(p.id, "2.14.0").await.unwrap());

        plane.start_or_update(&p).await.unwrap();
        assert!(plane.is_alive(p.id, "2.14.0").await.unwrap());

        p.set_paused("ops");
        plane.start_or_update(&p).await.unwrap();
        assert!(!plane.is_alive(p.id, "2.14.0").await.unwrap());

        plane.set_alive(p.id, true);
        assert!(plane.is_alive(p.id, "2.14.0").await.unwrap());
    }

    #[tokio::test]
    async fn test_log_pagination() {
        let plane = InMemoryControlPlane::new();
        let p = processor(1);
        for i in 0..5 {
            plane.push_log(p.id, format!("line {i}"));
        }

        let first = plane.fetch_logs(&p, 2, None).await.unwrap();
        assert_eq!(first.lines, vec!["line 0", "line 1"]);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));

        let second = plane.fetch_logs(&p, 10, first.next_cursor).await.unwrap();
        assert_eq!(second.lines.len(), 3);
        assert!(second.next_cursor.is_none());

        let err = plane
            .fetch_logs(&p, 2, Some("not-a-number".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_instances_match_replicas() {
        let plane = InMemoryControlPlane::new();
        let p = processor(3);
        plane.start_or_update(&p).await.unwrap();

        let instances = plane.list_running_instances(&p).await.unwrap();
        assert_eq!(instances.len(), 3);
        assert!(instances[0].node.starts_with("pool-2.14.0"));
    }
}
