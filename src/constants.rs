//! # System Constants
//!
//! Core constants that define the operational boundaries of the processor
//! control plane: the distinguished meta chain entry, reserved error
//! namespace codes, and lifecycle event names used in structured logs.

/// Chain id of the distinguished per-processor progress entry that tracks
/// the driver itself rather than any blockchain. It never appears in
/// aggregated per-chain output.
pub const META_CHAIN_ID: &str = "meta";

/// Default number of obsolete versions retained per project before the
/// oldest are purged.
pub const DEFAULT_OBSOLETE_RETENTION: usize = 10;

/// Default worker count for an upload that does not specify one.
pub const DEFAULT_NUM_WORKERS: i32 = 1;

/// Lifecycle events that mark orchestration milestones in structured logs
pub mod events {
    // Processor lifecycle events
    pub const PROCESSOR_CREATED: &str = "processor.created";
    pub const PROCESSOR_ACTIVATED: &str = "processor.activated";
    pub const PROCESSOR_OBSOLETED: &str = "processor.obsoleted";
    pub const PROCESSOR_PAUSED: &str = "processor.paused";
    pub const PROCESSOR_RESUMED: &str = "processor.resumed";
    pub const PROCESSOR_STOPPED: &str = "processor.stopped";
    pub const PROCESSOR_RESTARTED: &str = "processor.restarted";
    pub const PROCESSOR_PURGED: &str = "processor.purged";

    // Chain progress events
    pub const CHAIN_PROGRESS_REPORTED: &str = "chain.progress_reported";
    pub const CHAIN_STATES_CLEARED: &str = "chain.states_cleared";
}

/// Reserved error namespace codes reported by running jobs
pub mod namespace_codes {
    /// The driver itself failed, not a handler or user code. Errors carrying
    /// this code win status tie-breaks across chains.
    pub const PROCESSOR_FATAL: i32 = 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_chain_id_is_stable() {
        // Persisted rows depend on this value; it must never change.
        assert_eq!(META_CHAIN_ID, "meta");
    }

    #[test]
    fn test_event_names_are_namespaced() {
        assert!(events::PROCESSOR_ACTIVATED.starts_with("processor."));
        assert!(events::CHAIN_PROGRESS_REPORTED.starts_with("chain."));
    }
}
