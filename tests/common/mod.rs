//! Shared test infrastructure: an in-memory harness plus data builders
//! and proptest strategies.

#![allow(dead_code)] // Not every test binary uses every helper.

pub mod builders;
pub mod strategies;

pub use builders::*;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use procplane_core::config::LifecycleSettings;
use procplane_core::control_plane::InMemoryControlPlane;
use procplane_core::hooks::HookChain;
use procplane_core::models::Processor;
use procplane_core::orchestration::LifecycleOrchestrator;
use procplane_core::persistence::{InMemoryGateway, PersistenceGateway};

static NAME_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Generate a unique project name so tests sharing a harness stay isolated
pub fn unique_project(prefix: &str) -> String {
    let n = NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{n}")
}

/// Everything a lifecycle test needs, wired over the in-memory backends
pub struct TestHarness {
    pub gateway: Arc<InMemoryGateway>,
    pub control_plane: Arc<InMemoryControlPlane>,
    pub orchestrator: LifecycleOrchestrator,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(HookChain::new(), LifecycleSettings::default())
    }

    pub fn with_hooks(hooks: HookChain) -> Self {
        Self::build(hooks, LifecycleSettings::default())
    }

    pub fn with_retention(retention_bound: usize) -> Self {
        Self::build(HookChain::new(), LifecycleSettings { retention_bound })
    }

    fn build(hooks: HookChain, settings: LifecycleSettings) -> Self {
        let gateway = Arc::new(InMemoryGateway::new());
        let control_plane = Arc::new(InMemoryControlPlane::new());
        let orchestrator = LifecycleOrchestrator::new(gateway.clone(), control_plane.clone())
            .with_hooks(hooks)
            .with_settings(settings);
        Self {
            gateway,
            control_plane,
            orchestrator,
        }
    }

    /// Persist a processor directly, bypassing the orchestrator. Useful for
    /// arranging states the orchestrator would refuse to produce.
    pub async fn insert(&self, processor: &Processor) {
        let mut tx = self.gateway.begin().await.expect("begin transaction");
        tx.save_processor(processor).await.expect("save processor");
        tx.commit().await.expect("commit");
    }

    /// Reload a processor by id, panicking when it no longer exists
    pub async fn reload(&self, id: Uuid) -> Processor {
        self.gateway
            .get_processor(id)
            .await
            .expect("gateway read")
            .expect("processor exists")
    }

    /// All versions of a project, newest first
    pub async fn versions(&self, project_id: &str) -> Vec<Processor> {
        self.gateway
            .list_by_project(project_id)
            .await
            .expect("gateway read")
    }
}
