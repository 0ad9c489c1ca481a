//! # Postgres Gateway
//!
//! sqlx-backed [`PersistenceGateway`]. Processors and chain states live in
//! two tables (`procplane_processors`, `procplane_chain_states`); states are
//! stored as text, workload properties and job snapshots as JSONB. Rows are
//! mapped through plain DTO structs so a corrupt row surfaces as
//! [`PersistenceError::Corrupt`] instead of a panic.
//!
//! Transactional reads take `FOR UPDATE` row locks on the project's rows,
//! which serializes concurrent lifecycle operations on the same project
//! without locking unrelated projects.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{ChainState, ErrorRecord, Processor, VersionState, WorkloadProperties};

use super::{GatewayTransaction, PersistenceError, PersistenceGateway};

const CREATE_PROCESSORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS procplane_processors (
    id UUID PRIMARY KEY,
    project_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    version_state TEXT NOT NULL,
    reference_project_id TEXT,
    paused BOOLEAN NOT NULL DEFAULT FALSE,
    pause_reason TEXT,
    paused_at TIMESTAMPTZ,
    num_workers INTEGER NOT NULL,
    driver_version TEXT NOT NULL,
    uploaded_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    properties JSONB NOT NULL,
    UNIQUE (project_id, version)
)
"#;

const CREATE_PROCESSORS_STATE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_procplane_processors_project_state
    ON procplane_processors (project_id, version_state)
"#;

const CREATE_CHAIN_STATES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS procplane_chain_states (
    processor_id UUID NOT NULL REFERENCES procplane_processors (id) ON DELETE CASCADE,
    chain_id TEXT NOT NULL,
    state TEXT NOT NULL,
    processed_block_number BIGINT NOT NULL,
    processed_block_timestamp TIMESTAMPTZ,
    processed_block_hash TEXT,
    initial_start_block_number BIGINT NOT NULL,
    estimated_latest_block_number BIGINT NOT NULL,
    error_record JSONB,
    meter_state JSONB,
    indexer_state JSONB,
    handler_state JSONB,
    templates JSONB,
    updated_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (processor_id, chain_id)
)
"#;

const SELECT_PROCESSOR_COLUMNS: &str = r#"
SELECT id, project_id, version, version_state, reference_project_id,
       paused, pause_reason, paused_at, num_workers, driver_version,
       uploaded_at, created_at, properties
  FROM procplane_processors
"#;

const SELECT_CHAIN_STATE_COLUMNS: &str = r#"
SELECT processor_id, chain_id, state, processed_block_number,
       processed_block_timestamp, processed_block_hash,
       initial_start_block_number, estimated_latest_block_number,
       error_record, meter_state, indexer_state, handler_state,
       templates, updated_at
  FROM procplane_chain_states
"#;

const UPSERT_PROCESSOR: &str = r#"
INSERT INTO procplane_processors (
    id, project_id, version, version_state, reference_project_id,
    paused, pause_reason, paused_at, num_workers, driver_version,
    uploaded_at, created_at, properties
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
ON CONFLICT (id) DO UPDATE SET
    version_state = EXCLUDED.version_state,
    reference_project_id = EXCLUDED.reference_project_id,
    paused = EXCLUDED.paused,
    pause_reason = EXCLUDED.pause_reason,
    paused_at = EXCLUDED.paused_at,
    num_workers = EXCLUDED.num_workers,
    driver_version = EXCLUDED.driver_version,
    uploaded_at = EXCLUDED.uploaded_at,
    properties = EXCLUDED.properties
"#;

const UPSERT_CHAIN_STATE: &str = r#"
INSERT INTO procplane_chain_states (
    processor_id, chain_id, state, processed_block_number,
    processed_block_timestamp, processed_block_hash,
    initial_start_block_number, estimated_latest_block_number,
    error_record, meter_state, indexer_state, handler_state,
    templates, updated_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
ON CONFLICT (processor_id, chain_id) DO UPDATE SET
    state = EXCLUDED.state,
    processed_block_number = EXCLUDED.processed_block_number,
    processed_block_timestamp = EXCLUDED.processed_block_timestamp,
    processed_block_hash = EXCLUDED.processed_block_hash,
    initial_start_block_number = EXCLUDED.initial_start_block_number,
    estimated_latest_block_number = EXCLUDED.estimated_latest_block_number,
    error_record = EXCLUDED.error_record,
    meter_state = EXCLUDED.meter_state,
    indexer_state = EXCLUDED.indexer_state,
    handler_state = EXCLUDED.handler_state,
    templates = EXCLUDED.templates,
    updated_at = EXCLUDED.updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct ProcessorRow {
    id: Uuid,
    project_id: String,
    version: i32,
    version_state: String,
    reference_project_id: Option<String>,
    paused: bool,
    pause_reason: Option<String>,
    paused_at: Option<DateTime<Utc>>,
    num_workers: i32,
    driver_version: String,
    uploaded_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    properties: serde_json::Value,
}

impl TryFrom<ProcessorRow> for Processor {
    type Error = PersistenceError;

    fn try_from(row: ProcessorRow) -> Result<Self, Self::Error> {
        let version_state: VersionState = row.version_state.parse().map_err(|e| {
            PersistenceError::Corrupt(format!("processor {}: {e}", row.id))
        })?;
        let properties: WorkloadProperties =
            serde_json::from_value(row.properties).map_err(|e| {
                PersistenceError::Corrupt(format!("processor {} properties: {e}", row.id))
            })?;
        Ok(Processor {
            id: row.id,
            project_id: row.project_id,
            version: row.version,
            version_state,
            reference_project_id: row.reference_project_id,
            paused: row.paused,
            pause_reason: row.pause_reason,
            paused_at: row.paused_at,
            num_workers: row.num_workers,
            driver_version: row.driver_version,
            uploaded_at: row.uploaded_at,
            created_at: row.created_at,
            properties,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChainStateRow {
    processor_id: Uuid,
    chain_id: String,
    state: String,
    processed_block_number: i64,
    processed_block_timestamp: Option<DateTime<Utc>>,
    processed_block_hash: Option<String>,
    initial_start_block_number: i64,
    estimated_latest_block_number: i64,
    error_record: Option<serde_json::Value>,
    meter_state: Option<serde_json::Value>,
    indexer_state: Option<serde_json::Value>,
    handler_state: Option<serde_json::Value>,
    templates: Option<serde_json::Value>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ChainStateRow> for ChainState {
    type Error = PersistenceError;

    fn try_from(row: ChainStateRow) -> Result<Self, Self::Error> {
        let state = row.state.parse().map_err(|e| {
            PersistenceError::Corrupt(format!(
                "chain state {}/{}: {e}",
                row.processor_id, row.chain_id
            ))
        })?;
        let error_record: Option<ErrorRecord> = match row.error_record {
            Some(value) => Some(serde_json::from_value(value).map_err(|e| {
                PersistenceError::Corrupt(format!(
                    "chain state {}/{} error record: {e}",
                    row.processor_id, row.chain_id
                ))
            })?),
            None => None,
        };
        Ok(ChainState {
            processor_id: row.processor_id,
            chain_id: row.chain_id,
            state,
            processed_block_number: row.processed_block_number,
            processed_block_timestamp: row.processed_block_timestamp,
            processed_block_hash: row.processed_block_hash,
            initial_start_block_number: row.initial_start_block_number,
            estimated_latest_block_number: row.estimated_latest_block_number,
            error_record,
            meter_state: row.meter_state,
            indexer_state: row.indexer_state,
            handler_state: row.handler_state,
            templates: row.templates,
            updated_at: row.updated_at,
        })
    }
}

fn error_record_json(
    record: &Option<ErrorRecord>,
) -> Result<Option<serde_json::Value>, PersistenceError> {
    match record {
        Some(record) => {
            let value = serde_json::to_value(record)
                .map_err(|e| PersistenceError::Corrupt(format!("error record: {e}")))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Postgres-backed storage gateway
#[derive(Debug, Clone)]
pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with pool settings from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create the tables and indexes if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        sqlx::query(CREATE_PROCESSORS_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_PROCESSORS_STATE_INDEX)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_CHAIN_STATES_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceGateway for PgGateway {
    async fn begin(&self) -> Result<Box<dyn GatewayTransaction>, PersistenceError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn get_processor(
        &self,
        processor_id: Uuid,
    ) -> Result<Option<Processor>, PersistenceError> {
        let sql = format!("{SELECT_PROCESSOR_COLUMNS} WHERE id = $1");
        let row = sqlx::query_as::<_, ProcessorRow>(&sql)
            .bind(processor_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Processor::try_from).transpose()
    }

    async fn get_by_project_and_version(
        &self,
        project_id: &str,
        version: i32,
    ) -> Result<Option<Processor>, PersistenceError> {
        let sql = format!("{SELECT_PROCESSOR_COLUMNS} WHERE project_id = $1 AND version = $2");
        let row = sqlx::query_as::<_, ProcessorRow>(&sql)
            .bind(project_id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Processor::try_from).transpose()
    }

    async fn find_active(&self, project_id: &str) -> Result<Option<Processor>, PersistenceError> {
        let sql = format!(
            "{SELECT_PROCESSOR_COLUMNS} WHERE project_id = $1 AND version_state = $2 \
             ORDER BY version DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, ProcessorRow>(&sql)
            .bind(project_id)
            .bind(VersionState::Active.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Processor::try_from).transpose()
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Processor>, PersistenceError> {
        let sql = format!("{SELECT_PROCESSOR_COLUMNS} WHERE project_id = $1 ORDER BY version DESC");
        let rows = sqlx::query_as::<_, ProcessorRow>(&sql)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Processor::try_from).collect()
    }

    async fn list_chain_states(
        &self,
        processor_id: Uuid,
    ) -> Result<Vec<ChainState>, PersistenceError> {
        let sql = format!("{SELECT_CHAIN_STATE_COLUMNS} WHERE processor_id = $1 ORDER BY chain_id");
        let rows = sqlx::query_as::<_, ChainStateRow>(&sql)
            .bind(processor_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(ChainState::try_from).collect()
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl GatewayTransaction for PgTransaction {
    async fn get_processor(
        &mut self,
        processor_id: Uuid,
    ) -> Result<Option<Processor>, PersistenceError> {
        let sql = format!("{SELECT_PROCESSOR_COLUMNS} WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, ProcessorRow>(&sql)
            .bind(processor_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Processor::try_from).transpose()
    }

    async fn get_by_project_and_version(
        &mut self,
        project_id: &str,
        version: i32,
    ) -> Result<Option<Processor>, PersistenceError> {
        let sql = format!(
            "{SELECT_PROCESSOR_COLUMNS} WHERE project_id = $1 AND version = $2 FOR UPDATE"
        );
        let row = sqlx::query_as::<_, ProcessorRow>(&sql)
            .bind(project_id)
            .bind(version)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Processor::try_from).transpose()
    }

    async fn latest_version(
        &mut self,
        project_id: &str,
    ) -> Result<Option<i32>, PersistenceError> {
        // Locks the project's rows so concurrent creates serialize on
        // version allocation.
        let versions: Vec<i32> = sqlx::query_scalar(
            "SELECT version FROM procplane_processors \
             WHERE project_id = $1 ORDER BY version DESC FOR UPDATE",
        )
        .bind(project_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(versions.first().copied())
    }

    async fn list_by_project_and_state(
        &mut self,
        project_id: &str,
        state: VersionState,
    ) -> Result<Vec<Processor>, PersistenceError> {
        let sql = format!(
            "{SELECT_PROCESSOR_COLUMNS} WHERE project_id = $1 AND version_state = $2 \
             ORDER BY version DESC FOR UPDATE"
        );
        let rows = sqlx::query_as::<_, ProcessorRow>(&sql)
            .bind(project_id)
            .bind(state.to_string())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(Processor::try_from).collect()
    }

    async fn list_obsolete_by_recency(
        &mut self,
        project_id: &str,
    ) -> Result<Vec<Processor>, PersistenceError> {
        self.list_by_project_and_state(project_id, VersionState::Obsolete)
            .await
    }

    async fn save_processor(&mut self, processor: &Processor) -> Result<(), PersistenceError> {
        let properties = serde_json::to_value(&processor.properties)
            .map_err(|e| PersistenceError::Corrupt(format!("workload properties: {e}")))?;
        sqlx::query(UPSERT_PROCESSOR)
            .bind(processor.id)
            .bind(&processor.project_id)
            .bind(processor.version)
            .bind(processor.version_state.to_string())
            .bind(&processor.reference_project_id)
            .bind(processor.paused)
            .bind(&processor.pause_reason)
            .bind(processor.paused_at)
            .bind(processor.num_workers)
            .bind(&processor.driver_version)
            .bind(processor.uploaded_at)
            .bind(processor.created_at)
            .bind(properties)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn remove_processor(&mut self, processor_id: Uuid) -> Result<(), PersistenceError> {
        // Chain states cascade via the foreign key.
        sqlx::query("DELETE FROM procplane_processors WHERE id = $1")
            .bind(processor_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn get_chain_state(
        &mut self,
        processor_id: Uuid,
        chain_id: &str,
    ) -> Result<Option<ChainState>, PersistenceError> {
        let sql = format!(
            "{SELECT_CHAIN_STATE_COLUMNS} WHERE processor_id = $1 AND chain_id = $2 FOR UPDATE"
        );
        let row = sqlx::query_as::<_, ChainStateRow>(&sql)
            .bind(processor_id)
            .bind(chain_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(ChainState::try_from).transpose()
    }

    async fn upsert_chain_state(
        &mut self,
        chain_state: &ChainState,
    ) -> Result<(), PersistenceError> {
        let error_record = error_record_json(&chain_state.error_record)?;
        sqlx::query(UPSERT_CHAIN_STATE)
            .bind(chain_state.processor_id)
            .bind(&chain_state.chain_id)
            .bind(chain_state.state.to_string())
            .bind(chain_state.processed_block_number)
            .bind(chain_state.processed_block_timestamp)
            .bind(&chain_state.processed_block_hash)
            .bind(chain_state.initial_start_block_number)
            .bind(chain_state.estimated_latest_block_number)
            .bind(error_record)
            .bind(&chain_state.meter_state)
            .bind(&chain_state.indexer_state)
            .bind(&chain_state.handler_state)
            .bind(&chain_state.templates)
            .bind(chain_state.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn clear_chain_states(&mut self, processor_id: Uuid) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM procplane_chain_states WHERE processor_id = $1")
            .bind(processor_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), PersistenceError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
