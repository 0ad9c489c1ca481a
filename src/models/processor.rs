//! Processor Model
//!
//! A processor is one immutable uploaded version of a project's indexing
//! code. Versions are allocated monotonically per project; at most one
//! version per project is ACTIVE and at most one is PENDING at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::states::VersionState;

/// A single versioned processor within a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Processor {
    /// Stable unique id of this version
    pub id: Uuid,

    /// The project (tenant workload) this version belongs to
    pub project_id: String,

    /// Monotonic version number, unique within the project
    pub version: i32,

    /// Lifecycle state within the project
    pub version_state: VersionState,

    /// When set, this processor is an alias for another project's Active
    /// processor and never materializes a job of its own
    pub reference_project_id: Option<String>,

    /// Administrative pause flag; a paused processor keeps its job spec but
    /// runs zero workers
    pub paused: bool,

    /// Operator-supplied reason recorded at pause time
    pub pause_reason: Option<String>,

    /// When the pause was applied
    pub paused_at: Option<DateTime<Utc>>,

    /// Worker replica count the job runs with when not paused
    pub num_workers: i32,

    /// Driver runtime version; doubles as the scheduling-pool placement hint
    pub driver_version: String,

    /// When this version's code was uploaded (rewritten on continuation)
    pub uploaded_at: DateTime<Utc>,

    /// When this row was first created
    pub created_at: DateTime<Utc>,

    /// Workload metadata captured at upload time
    pub properties: WorkloadProperties,
}

/// Workload metadata attached to a processor at upload time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadProperties {
    /// Where the packaged code lives
    pub code_url: String,

    /// SDK version the code was built against
    pub sdk_version: String,

    /// CLI version used for the upload, when known
    pub cli_version: Option<String>,

    /// Source commit the package was built from, when known
    pub commit_sha: Option<String>,

    /// Run the job with debug instrumentation enabled
    pub debug: bool,
}

impl Default for WorkloadProperties {
    fn default() -> Self {
        Self {
            code_url: String::new(),
            sdk_version: String::new(),
            cli_version: None,
            commit_sha: None,
            debug: false,
        }
    }
}

impl Processor {
    /// Create a fresh PENDING version with a new id
    pub fn new(project_id: impl Into<String>, version: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            version,
            version_state: VersionState::Pending,
            reference_project_id: None,
            paused: false,
            pause_reason: None,
            paused_at: None,
            num_workers: crate::constants::DEFAULT_NUM_WORKERS,
            driver_version: String::new(),
            uploaded_at: now,
            created_at: now,
            properties: WorkloadProperties::default(),
        }
    }

    /// Whether this processor aliases another project instead of running
    /// its own job
    pub fn is_reference(&self) -> bool {
        self.reference_project_id.is_some()
    }

    /// Replica count the control plane should reconcile the job to
    pub fn desired_replicas(&self) -> i32 {
        if self.paused {
            0
        } else {
            self.num_workers
        }
    }

    /// Record an administrative pause
    pub fn set_paused(&mut self, reason: impl Into<String>) {
        self.paused = true;
        self.pause_reason = Some(reason.into());
        self.paused_at = Some(Utc::now());
    }

    /// Clear the pause flag and its bookkeeping fields
    pub fn clear_pause(&mut self) {
        self.paused = false;
        self.pause_reason = None;
        self.paused_at = None;
    }

    /// Human-readable identifier used in logs and error messages,
    /// e.g. `analytics/v3`
    pub fn display_name(&self) -> String {
        format!("{}/v{}", self.project_id, self.version)
    }
}
