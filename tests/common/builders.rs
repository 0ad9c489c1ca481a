//! Test data builders for processors and progress reports

#![allow(dead_code)]

use chrono::{Duration, Utc};

use procplane_core::models::{ErrorRecord, Processor, ProgressReport, VersionState};

/// Builder for processors seeded directly into the gateway
pub struct ProcessorBuilder {
    project_id: String,
    version: i32,
    version_state: VersionState,
    reference_project_id: Option<String>,
    pause_reason: Option<String>,
    num_workers: i32,
    age: Option<Duration>,
}

impl ProcessorBuilder {
    pub fn new(project_id: &str, version: i32) -> Self {
        Self {
            project_id: project_id.to_string(),
            version,
            version_state: VersionState::Pending,
            reference_project_id: None,
            pause_reason: None,
            num_workers: 1,
            age: None,
        }
    }

    pub fn active(mut self) -> Self {
        self.version_state = VersionState::Active;
        self
    }

    pub fn obsolete(mut self) -> Self {
        self.version_state = VersionState::Obsolete;
        self
    }

    pub fn with_state(mut self, state: VersionState) -> Self {
        self.version_state = state;
        self
    }

    pub fn with_reference(mut self, project_id: &str) -> Self {
        self.reference_project_id = Some(project_id.to_string());
        self
    }

    pub fn paused(mut self, reason: &str) -> Self {
        self.pause_reason = Some(reason.to_string());
        self
    }

    pub fn with_num_workers(mut self, num_workers: i32) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Backdate `uploaded_at` and `created_at`, for recency-ordering setups
    pub fn uploaded_ago(mut self, age: Duration) -> Self {
        self.age = Some(age);
        self
    }

    pub fn build(self) -> Processor {
        let mut processor = Processor::new(self.project_id, self.version);
        processor.version_state = self.version_state;
        processor.reference_project_id = self.reference_project_id;
        processor.num_workers = self.num_workers;
        if let Some(reason) = self.pause_reason {
            processor.set_paused(reason);
        }
        if let Some(age) = self.age {
            processor.uploaded_at = Utc::now() - age;
            processor.created_at = processor.uploaded_at;
        }
        processor
    }
}

/// A healthy progress report for `chain` at `block`
pub fn progress(chain: &str, block: i64) -> ProgressReport {
    ProgressReport::new(chain, block).with_estimated_latest(block + 100)
}

/// A healthy meta report at `block`
pub fn meta_progress(block: i64) -> ProgressReport {
    ProgressReport::meta(block)
}

/// A failing report with an ordinary handler error
pub fn failed_progress(chain: &str, block: i64) -> ProgressReport {
    ProgressReport::failed(
        chain,
        block,
        ErrorRecord::new("handler", 2, 500, "handler crashed"),
    )
}

/// A failing report with a driver-fatal error
pub fn fatal_progress(chain: &str, block: i64) -> ProgressReport {
    ProgressReport::failed(chain, block, ErrorRecord::processor_fatal(137, "driver died"))
}
