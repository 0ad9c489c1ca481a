//! Chain State Model
//!
//! Per-chain progress records owned by a processor. Every processor with a
//! running job also carries one distinguished `meta` entry that tracks the
//! driver itself rather than any blockchain; the meta entry participates in
//! status aggregation but never appears in per-chain output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{namespace_codes, META_CHAIN_ID};

use super::requests::ProgressReport;
use super::states::ChainRunState;

/// Structured error reported by a job alongside an ERROR state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Subsystem the error originated in (e.g. `processor`, `handler`)
    pub namespace: String,

    /// Numeric code identifying the subsystem; code 1 is reserved for
    /// driver-fatal errors and wins status tie-breaks
    pub namespace_code: i32,

    /// Error code within the namespace
    pub code: i32,

    /// Human-readable message
    pub message: String,
}

impl ErrorRecord {
    pub fn new(
        namespace: impl Into<String>,
        namespace_code: i32,
        code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            namespace_code,
            code,
            message: message.into(),
        }
    }

    /// A driver-fatal error, the kind that outranks every other error in
    /// status tie-breaks
    pub fn processor_fatal(code: i32, message: impl Into<String>) -> Self {
        Self::new("processor", namespace_codes::PROCESSOR_FATAL, code, message)
    }

    /// Whether this error carries the reserved driver-fatal namespace code
    pub fn is_processor_fatal(&self) -> bool {
        self.namespace_code == namespace_codes::PROCESSOR_FATAL
    }
}

/// Progress record for one chain under one processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainState {
    /// Owning processor
    pub processor_id: Uuid,

    /// Chain identifier, or `meta` for the driver entry
    pub chain_id: String,

    /// Run state from the most recent report
    pub state: ChainRunState,

    /// Highest block fully processed
    pub processed_block_number: i64,

    /// Timestamp of that block, when known
    pub processed_block_timestamp: Option<DateTime<Utc>>,

    /// Hash of that block, when known
    pub processed_block_hash: Option<String>,

    /// Start block fixed by the first report and never rewritten
    pub initial_start_block_number: i64,

    /// The job's most recent estimate of the chain tip
    pub estimated_latest_block_number: i64,

    /// Error carried by the most recent report, if any
    pub error_record: Option<ErrorRecord>,

    /// Opaque metering snapshot
    pub meter_state: Option<serde_json::Value>,

    /// Opaque indexer snapshot
    pub indexer_state: Option<serde_json::Value>,

    /// Opaque handler snapshot
    pub handler_state: Option<serde_json::Value>,

    /// Dynamically registered templates
    pub templates: Option<serde_json::Value>,

    /// When the most recent report landed
    pub updated_at: DateTime<Utc>,
}

impl ChainState {
    /// Create the record for a chain's first report
    pub fn from_report(processor_id: Uuid, report: &ProgressReport) -> Self {
        let initial = report
            .initial_start_block_number
            .unwrap_or(report.processed_block_number);
        Self {
            processor_id,
            chain_id: report.chain_id.clone(),
            state: report.state,
            processed_block_number: report.processed_block_number,
            processed_block_timestamp: report.processed_block_timestamp,
            processed_block_hash: report.processed_block_hash.clone(),
            initial_start_block_number: initial,
            estimated_latest_block_number: report
                .estimated_latest_block_number
                .unwrap_or(report.processed_block_number),
            error_record: report.error_record.clone(),
            meter_state: report.meter_state.clone(),
            indexer_state: report.indexer_state.clone(),
            handler_state: report.handler_state.clone(),
            templates: report.templates.clone(),
            updated_at: Utc::now(),
        }
    }

    /// Merge a subsequent report into this record. The initial start block
    /// stays fixed; opaque snapshots are replaced only when the report
    /// carries them; the error record always tracks the report (absent
    /// clears it).
    pub fn apply_report(&mut self, report: &ProgressReport) {
        self.state = report.state;
        self.processed_block_number = report.processed_block_number;
        self.processed_block_timestamp = report.processed_block_timestamp;
        self.processed_block_hash = report.processed_block_hash.clone();
        if let Some(estimated) = report.estimated_latest_block_number {
            self.estimated_latest_block_number = estimated;
        }
        self.error_record = report.error_record.clone();
        if let Some(meter) = &report.meter_state {
            self.meter_state = Some(meter.clone());
        }
        if let Some(indexer) = &report.indexer_state {
            self.indexer_state = Some(indexer.clone());
        }
        if let Some(handler) = &report.handler_state {
            self.handler_state = Some(handler.clone());
        }
        if let Some(templates) = &report.templates {
            self.templates = Some(templates.clone());
        }
        self.updated_at = Utc::now();
    }

    /// Whether this is the distinguished driver entry
    pub fn is_meta(&self) -> bool {
        self.chain_id == META_CHAIN_ID
    }
}
