//! Operation Inputs
//!
//! Input types for the two write entry points: operator uploads
//! (`ProcessorUpload`) and job-originated progress reports
//! (`ProgressReport`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_NUM_WORKERS, META_CHAIN_ID};

use super::chain_state::ErrorRecord;
use super::processor::{Processor, WorkloadProperties};
use super::states::ChainRunState;

/// An incoming request to create a new processor version or to update an
/// existing one in place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorUpload {
    /// Target project
    pub project_id: String,

    /// When set, update this existing version in place instead of
    /// allocating a new one
    pub continue_from_version: Option<i32>,

    /// When set, the created version aliases another project's Active
    /// processor instead of running its own job
    pub reference_project_id: Option<String>,

    /// Worker replica count for the job
    pub num_workers: i32,

    /// Driver runtime version to schedule the job onto
    pub driver_version: String,

    /// Workload metadata for the uploaded package
    pub properties: WorkloadProperties,
}

impl Default for ProcessorUpload {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            continue_from_version: None,
            reference_project_id: None,
            num_workers: DEFAULT_NUM_WORKERS,
            driver_version: "latest".to_string(),
            properties: WorkloadProperties::default(),
        }
    }
}

impl ProcessorUpload {
    /// Create an upload for a project with defaults for everything else
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    /// Update an existing version in place instead of allocating a new one
    pub fn with_continue_from(mut self, version: i32) -> Self {
        self.continue_from_version = Some(version);
        self
    }

    /// Make the created version an alias for another project
    pub fn with_reference(mut self, project_id: impl Into<String>) -> Self {
        self.reference_project_id = Some(project_id.into());
        self
    }

    /// Set the worker replica count
    pub fn with_num_workers(mut self, num_workers: i32) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set the driver runtime version
    pub fn with_driver_version(mut self, driver_version: impl Into<String>) -> Self {
        self.driver_version = driver_version.into();
        self
    }

    /// Attach full workload metadata
    pub fn with_properties(mut self, properties: WorkloadProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Convenience for setting just the package location
    pub fn with_code_url(mut self, code_url: impl Into<String>) -> Self {
        self.properties.code_url = code_url.into();
        self
    }

    /// Materialize a fresh PENDING processor at the given version from this
    /// upload. Continuations rewrite an existing processor instead and never
    /// go through here.
    pub fn to_processor(&self, version: i32) -> Processor {
        let mut processor = Processor::new(self.project_id.clone(), version);
        processor.reference_project_id = self.reference_project_id.clone();
        processor.num_workers = self.num_workers;
        processor.driver_version = self.driver_version.clone();
        processor.properties = self.properties.clone();
        processor
    }

    /// Rewrite the mutable upload fields of an existing processor. Identity
    /// fields (id, version, state, reference target) are left untouched.
    pub fn apply_to(&self, processor: &mut Processor) {
        processor.num_workers = self.num_workers;
        processor.driver_version = self.driver_version.clone();
        processor.properties = self.properties.clone();
        processor.uploaded_at = Utc::now();
    }
}

/// A progress report from a running job for one chain (or the meta entry)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Chain being reported on, or [`META_CHAIN_ID`] for the driver itself
    pub chain_id: String,

    /// Run state of the chain as seen by the job
    pub state: ChainRunState,

    /// Highest block fully processed
    pub processed_block_number: i64,

    /// Timestamp of that block, when the job knows it
    pub processed_block_timestamp: Option<DateTime<Utc>>,

    /// Hash of that block, when the job knows it
    pub processed_block_hash: Option<String>,

    /// Configured start block; only honored on the first report for a chain
    pub initial_start_block_number: Option<i64>,

    /// The job's estimate of the chain tip
    pub estimated_latest_block_number: Option<i64>,

    /// Structured error carried with ERROR states; clears the stored error
    /// when absent
    pub error_record: Option<ErrorRecord>,

    /// Opaque metering snapshot, replaced when present
    pub meter_state: Option<serde_json::Value>,

    /// Opaque indexer snapshot, replaced when present
    pub indexer_state: Option<serde_json::Value>,

    /// Opaque handler snapshot, replaced when present
    pub handler_state: Option<serde_json::Value>,

    /// Dynamically registered templates, replaced when present
    pub templates: Option<serde_json::Value>,
}

impl ProgressReport {
    /// A routine progress report for a chain
    pub fn new(chain_id: impl Into<String>, processed_block_number: i64) -> Self {
        Self {
            chain_id: chain_id.into(),
            state: ChainRunState::Processing,
            processed_block_number,
            processed_block_timestamp: None,
            processed_block_hash: None,
            initial_start_block_number: None,
            estimated_latest_block_number: None,
            error_record: None,
            meter_state: None,
            indexer_state: None,
            handler_state: None,
            templates: None,
        }
    }

    /// A report for the distinguished meta entry
    pub fn meta(processed_block_number: i64) -> Self {
        Self::new(META_CHAIN_ID, processed_block_number)
    }

    /// A failure report carrying an error record
    pub fn failed(
        chain_id: impl Into<String>,
        processed_block_number: i64,
        error: ErrorRecord,
    ) -> Self {
        let mut report = Self::new(chain_id, processed_block_number);
        report.state = ChainRunState::Error;
        report.error_record = Some(error);
        report
    }

    /// Override the reported run state
    pub fn with_state(mut self, state: ChainRunState) -> Self {
        self.state = state;
        self
    }

    /// Set the configured start block (honored only on first report)
    pub fn with_initial_start(mut self, block_number: i64) -> Self {
        self.initial_start_block_number = Some(block_number);
        self
    }

    /// Set the job's chain-tip estimate
    pub fn with_estimated_latest(mut self, block_number: i64) -> Self {
        self.estimated_latest_block_number = Some(block_number);
        self
    }

    /// Attach the processed block's timestamp
    pub fn with_block_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.processed_block_timestamp = Some(timestamp);
        self
    }

    /// Attach the processed block's hash
    pub fn with_block_hash(mut self, hash: impl Into<String>) -> Self {
        self.processed_block_hash = Some(hash.into());
        self
    }

    /// Attach an opaque indexer snapshot
    pub fn with_indexer_state(mut self, state: serde_json::Value) -> Self {
        self.indexer_state = Some(state);
        self
    }

    /// Whether this report targets the meta entry
    pub fn is_meta(&self) -> bool {
        self.chain_id == META_CHAIN_ID
    }
}
