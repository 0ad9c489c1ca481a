//! # Persistence Gateway
//!
//! Storage contract consumed by the lifecycle orchestrator. Backends supply
//! CRUD over processors and chain states plus transactions with atomic
//! commit. The orchestrator performs every multi-step mutation inside one
//! transaction and relies on two guarantees:
//!
//! - writes inside a transaction are invisible to reads outside it until
//!   commit, and rollback discards them entirely
//! - removing a processor also removes its chain states
//!
//! Uniqueness of (project, version) and the one-ACTIVE/one-PENDING rule are
//! enforced by the orchestrator, not by storage constraints.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::models::{ChainState, Processor, VersionState};

pub use memory::InMemoryGateway;
#[cfg(feature = "postgres")]
pub use postgres::PgGateway;

/// Errors surfaced by persistence backends
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// The backend could not serve the request (connection lost, store
    /// closed, injected test failure)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back into a domain type
    #[error("stored row corrupt: {0}")]
    Corrupt(String),

    /// Database-level failure from the Postgres backend
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Opaque failure from a custom backend
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Storage backend contract. Reads outside a transaction are autocommit
/// snapshots; all writes go through [`GatewayTransaction`].
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Begin a transaction. Dropping the returned handle without calling
    /// [`GatewayTransaction::commit`] must discard its writes.
    async fn begin(&self) -> Result<Box<dyn GatewayTransaction>, PersistenceError>;

    /// Fetch a processor by id
    async fn get_processor(&self, processor_id: Uuid)
        -> Result<Option<Processor>, PersistenceError>;

    /// Fetch a processor by its (project, version) coordinates
    async fn get_by_project_and_version(
        &self,
        project_id: &str,
        version: i32,
    ) -> Result<Option<Processor>, PersistenceError>;

    /// Fetch the project's ACTIVE processor, if any
    async fn find_active(&self, project_id: &str) -> Result<Option<Processor>, PersistenceError>;

    /// All versions of a project, newest version first
    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Processor>, PersistenceError>;

    /// All chain states owned by a processor, ordered by chain id
    async fn list_chain_states(
        &self,
        processor_id: Uuid,
    ) -> Result<Vec<ChainState>, PersistenceError>;
}

/// One open transaction against a [`PersistenceGateway`]. Mutating
/// operations thread `&mut dyn GatewayTransaction` through their helpers so
/// nested steps join the same transaction.
#[async_trait]
pub trait GatewayTransaction: Send {
    /// Fetch a processor by id
    async fn get_processor(&mut self, processor_id: Uuid)
        -> Result<Option<Processor>, PersistenceError>;

    /// Fetch a processor by its (project, version) coordinates
    async fn get_by_project_and_version(
        &mut self,
        project_id: &str,
        version: i32,
    ) -> Result<Option<Processor>, PersistenceError>;

    /// Highest version number allocated for a project so far
    async fn latest_version(&mut self, project_id: &str)
        -> Result<Option<i32>, PersistenceError>;

    /// All of a project's processors currently in the given state, newest
    /// version first
    async fn list_by_project_and_state(
        &mut self,
        project_id: &str,
        state: VersionState,
    ) -> Result<Vec<Processor>, PersistenceError>;

    /// The project's OBSOLETE processors, most recently demoted (highest
    /// version) first
    async fn list_obsolete_by_recency(
        &mut self,
        project_id: &str,
    ) -> Result<Vec<Processor>, PersistenceError>;

    /// Insert or update a processor keyed by id
    async fn save_processor(&mut self, processor: &Processor) -> Result<(), PersistenceError>;

    /// Physically delete a processor and, with it, all its chain states
    async fn remove_processor(&mut self, processor_id: Uuid) -> Result<(), PersistenceError>;

    /// Fetch one chain state
    async fn get_chain_state(
        &mut self,
        processor_id: Uuid,
        chain_id: &str,
    ) -> Result<Option<ChainState>, PersistenceError>;

    /// Insert or update a chain state keyed by (processor, chain)
    async fn upsert_chain_state(&mut self, chain_state: &ChainState)
        -> Result<(), PersistenceError>;

    /// Delete all chain states owned by a processor
    async fn clear_chain_states(&mut self, processor_id: Uuid) -> Result<(), PersistenceError>;

    /// Make the transaction's writes visible atomically
    async fn commit(self: Box<Self>) -> Result<(), PersistenceError>;

    /// Discard the transaction's writes
    async fn rollback(self: Box<Self>) -> Result<(), PersistenceError>;
}

/// Commit on success, roll back on failure. A rollback failure is logged
/// and swallowed; the original error is what the caller needs to see.
pub async fn commit_or_rollback<T>(
    tx: Box<dyn GatewayTransaction>,
    outcome: crate::error::Result<T>,
) -> crate::error::Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = tx.rollback().await {
                warn!(error = %rollback_error, "transaction rollback failed");
            }
            Err(error)
        }
    }
}
