//! Test doubles: a control plane with injectable outages plus recording
//! and failing lifecycle hooks.

#![allow(dead_code)]

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use procplane_core::control_plane::{
    ControlPlaneError, InMemoryControlPlane, JobControlPlane, LogPage, RunningInstance,
};
use procplane_core::hooks::{HookError, HookEvent, LifecycleHook};
use procplane_core::models::Processor;

/// Wraps the in-memory control plane with per-operation failure switches
pub struct FlakyControlPlane {
    inner: InMemoryControlPlane,
    failing_ops: Mutex<HashSet<&'static str>>,
}

impl FlakyControlPlane {
    pub fn new() -> Self {
        Self {
            inner: InMemoryControlPlane::new(),
            failing_ops: Mutex::new(HashSet::new()),
        }
    }

    /// Make every future call to `operation` fail until cleared
    pub fn fail_on(&self, operation: &'static str) {
        self.failing_ops.lock().insert(operation);
    }

    pub fn clear_failures(&self) {
        self.failing_ops.lock().clear();
    }

    /// The wrapped backend, for journal and job inspection
    pub fn inner(&self) -> &InMemoryControlPlane {
        &self.inner
    }

    fn check(&self, operation: &'static str) -> Result<(), ControlPlaneError> {
        if self.failing_ops.lock().contains(operation) {
            Err(ControlPlaneError::Unreachable(format!(
                "injected outage on {operation}"
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobControlPlane for FlakyControlPlane {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn start_or_update(&self, processor: &Processor) -> Result<(), ControlPlaneError> {
        self.check("start_or_update")?;
        self.inner.start_or_update(processor).await
    }

    async fn restart(&self, processor: &Processor) -> Result<(), ControlPlaneError> {
        self.check("restart")?;
        self.inner.restart(processor).await
    }

    async fn delete(&self, processor: &Processor) -> Result<(), ControlPlaneError> {
        self.check("delete")?;
        self.inner.delete(processor).await
    }

    async fn restart_by_id(
        &self,
        processor_id: Uuid,
        placement_hint: &str,
    ) -> Result<(), ControlPlaneError> {
        self.check("restart_by_id")?;
        self.inner.restart_by_id(processor_id, placement_hint).await
    }

    async fn is_alive(
        &self,
        processor_id: Uuid,
        placement_hint: &str,
    ) -> Result<bool, ControlPlaneError> {
        self.check("is_alive")?;
        self.inner.is_alive(processor_id, placement_hint).await
    }

    async fn list_running_instances(
        &self,
        processor: &Processor,
    ) -> Result<Vec<RunningInstance>, ControlPlaneError> {
        self.check("list_running_instances")?;
        self.inner.list_running_instances(processor).await
    }

    async fn fetch_logs(
        &self,
        processor: &Processor,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<LogPage, ControlPlaneError> {
        self.check("fetch_logs")?;
        self.inner.fetch_logs(processor, limit, cursor).await
    }
}

/// Records every lifecycle event it observes
#[derive(Default)]
pub struct RecordingHook {
    events: Mutex<Vec<(HookEvent, String)>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<(HookEvent, String)> {
        self.events.lock().clone()
    }

    /// Events recorded for one processor, by display name
    pub fn events_for(&self, display_name: &str) -> Vec<HookEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(_, name)| name == display_name)
            .map(|(event, _)| *event)
            .collect()
    }

    fn record(&self, event: HookEvent, processor: &Processor) {
        self.events.lock().push((event, processor.display_name()));
    }
}

#[async_trait]
impl LifecycleHook for RecordingHook {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn on_activate(&self, processor: &Processor) -> Result<(), HookError> {
        self.record(HookEvent::Activated, processor);
        Ok(())
    }

    async fn on_stop(&self, processor: &Processor) -> Result<(), HookError> {
        self.record(HookEvent::Stopped, processor);
        Ok(())
    }

    async fn on_pause(&self, processor: &Processor) -> Result<(), HookError> {
        self.record(HookEvent::Paused, processor);
        Ok(())
    }

    async fn on_resume(&self, processor: &Processor) -> Result<(), HookError> {
        self.record(HookEvent::Resumed, processor);
        Ok(())
    }
}

/// Fails on one configured event and succeeds on every other
pub struct FailingHook {
    fail_on: HookEvent,
}

impl FailingHook {
    pub fn new(fail_on: HookEvent) -> Self {
        Self { fail_on }
    }

    fn check(&self, event: HookEvent) -> Result<(), HookError> {
        if event == self.fail_on {
            Err(HookError::Rejected(format!("refused {event:?}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LifecycleHook for FailingHook {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn on_activate(&self, _processor: &Processor) -> Result<(), HookError> {
        self.check(HookEvent::Activated)
    }

    async fn on_stop(&self, _processor: &Processor) -> Result<(), HookError> {
        self.check(HookEvent::Stopped)
    }

    async fn on_pause(&self, _processor: &Processor) -> Result<(), HookError> {
        self.check(HookEvent::Paused)
    }

    async fn on_resume(&self, _processor: &Processor) -> Result<(), HookError> {
        self.check(HookEvent::Resumed)
    }
}
