//! # In-Memory Gateway
//!
//! Reference [`PersistenceGateway`] used in dev mode and throughout the
//! test suite. Transactions are fully serialized: `begin` takes the
//! store-wide lock and holds it until commit or rollback, so transaction
//! isolation is trivially exact. Writes land on a scratch copy of the
//! store; commit swaps the copy in, rollback drops it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::{ChainState, Processor, VersionState};

use super::{GatewayTransaction, PersistenceError, PersistenceGateway};

#[derive(Debug, Clone, Default)]
struct Store {
    processors: HashMap<Uuid, Processor>,
    chain_states: HashMap<(Uuid, String), ChainState>,
}

impl Store {
    fn by_project(&self, project_id: &str) -> Vec<Processor> {
        let mut found: Vec<Processor> = self
            .processors
            .values()
            .filter(|p| p.project_id == project_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.version.cmp(&a.version));
        found
    }

    fn by_project_and_state(&self, project_id: &str, state: VersionState) -> Vec<Processor> {
        let mut found: Vec<Processor> = self
            .processors
            .values()
            .filter(|p| p.project_id == project_id && p.version_state == state)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.version.cmp(&a.version));
        found
    }

    fn chain_states_for(&self, processor_id: Uuid) -> Vec<ChainState> {
        let mut found: Vec<ChainState> = self
            .chain_states
            .values()
            .filter(|cs| cs.processor_id == processor_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.chain_id.cmp(&b.chain_id));
        found
    }
}

/// In-memory storage backend with serialized transactions
#[derive(Debug)]
pub struct InMemoryGateway {
    store: Arc<Mutex<Store>>,
    fail_next_write: Arc<AtomicBool>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            fail_next_write: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make the next transactional write fail with
    /// [`PersistenceError::Unavailable`]. Used by tests to exercise
    /// rollback paths.
    pub fn inject_failure(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn begin(&self) -> Result<Box<dyn GatewayTransaction>, PersistenceError> {
        let guard = Arc::clone(&self.store).lock_owned().await;
        let scratch = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            guard,
            scratch,
            fail_next_write: Arc::clone(&self.fail_next_write),
        }))
    }

    async fn get_processor(
        &self,
        processor_id: Uuid,
    ) -> Result<Option<Processor>, PersistenceError> {
        let store = self.store.lock().await;
        Ok(store.processors.get(&processor_id).cloned())
    }

    async fn get_by_project_and_version(
        &self,
        project_id: &str,
        version: i32,
    ) -> Result<Option<Processor>, PersistenceError> {
        let store = self.store.lock().await;
        Ok(store
            .processors
            .values()
            .find(|p| p.project_id == project_id && p.version == version)
            .cloned())
    }

    async fn find_active(&self, project_id: &str) -> Result<Option<Processor>, PersistenceError> {
        let store = self.store.lock().await;
        Ok(store
            .by_project_and_state(project_id, VersionState::Active)
            .into_iter()
            .next())
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Processor>, PersistenceError> {
        let store = self.store.lock().await;
        Ok(store.by_project(project_id))
    }

    async fn list_chain_states(
        &self,
        processor_id: Uuid,
    ) -> Result<Vec<ChainState>, PersistenceError> {
        let store = self.store.lock().await;
        Ok(store.chain_states_for(processor_id))
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<Store>,
    scratch: Store,
    fail_next_write: Arc<AtomicBool>,
}

impl InMemoryTransaction {
    fn check_injected_failure(&self) -> Result<(), PersistenceError> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayTransaction for InMemoryTransaction {
    async fn get_processor(
        &mut self,
        processor_id: Uuid,
    ) -> Result<Option<Processor>, PersistenceError> {
        Ok(self.scratch.processors.get(&processor_id).cloned())
    }

    async fn get_by_project_and_version(
        &mut self,
        project_id: &str,
        version: i32,
    ) -> Result<Option<Processor>, PersistenceError> {
        Ok(self
            .scratch
            .processors
            .values()
            .find(|p| p.project_id == project_id && p.version == version)
            .cloned())
    }

    async fn latest_version(
        &mut self,
        project_id: &str,
    ) -> Result<Option<i32>, PersistenceError> {
        Ok(self
            .scratch
            .processors
            .values()
            .filter(|p| p.project_id == project_id)
            .map(|p| p.version)
            .max())
    }

    async fn list_by_project_and_state(
        &mut self,
        project_id: &str,
        state: VersionState,
    ) -> Result<Vec<Processor>, PersistenceError> {
        Ok(self.scratch.by_project_and_state(project_id, state))
    }

    async fn list_obsolete_by_recency(
        &mut self,
        project_id: &str,
    ) -> Result<Vec<Processor>, PersistenceError> {
        Ok(self
            .scratch
            .by_project_and_state(project_id, VersionState::Obsolete))
    }

    async fn save_processor(&mut self, processor: &Processor) -> Result<(), PersistenceError> {
        self.check_injected_failure()?;
        self.scratch
            .processors
            .insert(processor.id, processor.clone());
        Ok(())
    }

    async fn remove_processor(&mut self, processor_id: Uuid) -> Result<(), PersistenceError> {
        self.check_injected_failure()?;
        self.scratch.processors.remove(&processor_id);
        self.scratch
            .chain_states
            .retain(|(owner, _), _| *owner != processor_id);
        Ok(())
    }

    async fn get_chain_state(
        &mut self,
        processor_id: Uuid,
        chain_id: &str,
    ) -> Result<Option<ChainState>, PersistenceError> {
        Ok(self
            .scratch
            .chain_states
            .get(&(processor_id, chain_id.to_string()))
            .cloned())
    }

    async fn upsert_chain_state(
        &mut self,
        chain_state: &ChainState,
    ) -> Result<(), PersistenceError> {
        self.check_injected_failure()?;
        self.scratch.chain_states.insert(
            (chain_state.processor_id, chain_state.chain_id.clone()),
            chain_state.clone(),
        );
        Ok(())
    }

    async fn clear_chain_states(&mut self, processor_id: Uuid) -> Result<(), PersistenceError> {
        self.check_injected_failure()?;
        self.scratch
            .chain_states
            .retain(|(owner, _), _| *owner != processor_id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError> {
        let Self {
            mut guard, scratch, ..
        } = *self;
        *guard = scratch;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), PersistenceError> {
        // Dropping the guard releases the store untouched.
        Ok(())
    }
}
