//! # Status Aggregation
//!
//! ## Overview
//!
//! Derives one observable status for a processor from its stored chain
//! states plus a liveness probe of its job. Pure function: no I/O, fully
//! deterministic, exhaustively unit-tested here.
//!
//! The aggregation runs in phases:
//!
//! 1. Split the distinguished `meta` entry from the per-chain entries.
//! 2. Base state from meta presence (none → STARTING, or UNKNOWN for an
//!    OBSOLETE version; healthy meta → PROCESSING), then any chain in ERROR
//!    escalates the overall state and its error record is adopted.
//!    Processor-fatal records win the tie-break, otherwise the first in
//!    chain-id order.
//! 3. A meta entry in ERROR or UNKNOWN pre-empts chain nuance: overall
//!    ERROR with meta's record, and every chain is displayed as ERROR with
//!    that record copied over it.
//! 4. Liveness correction: unless the overall state is UNKNOWN or a
//!    processor-fatal ERROR, liveness wins — alive forces PROCESSING, dead
//!    forces STARTING and pushes every non-error chain back to QUEUING.
//!
//! Stored progress can lag what the control plane knows about liveness:
//! the probe is authoritative for "is it running at all", stored chain
//! state for "how far did it get / did it error". An adopted error record
//! stays in the output even when the correction lands on PROCESSING.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChainRunState, ChainState, ErrorRecord, OverallState, Processor, VersionState};

/// Displayed status of one chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStatus {
    pub chain_id: String,
    pub state: ChainRunState,
    pub error: Option<ErrorRecord>,
    pub processed_block_number: i64,
    pub processed_block_timestamp: Option<DateTime<Utc>>,
    pub initial_start_block_number: i64,
    pub estimated_latest_block_number: i64,
}

impl ChainStatus {
    fn from_chain_state(chain_state: &ChainState) -> Self {
        Self {
            chain_id: chain_state.chain_id.clone(),
            state: chain_state.state,
            error: chain_state.error_record.clone(),
            processed_block_number: chain_state.processed_block_number,
            processed_block_timestamp: chain_state.processed_block_timestamp,
            initial_start_block_number: chain_state.initial_start_block_number,
            estimated_latest_block_number: chain_state.estimated_latest_block_number,
        }
    }

    /// How many blocks the chain trails its estimated tip
    pub fn blocks_behind(&self) -> i64 {
        (self.estimated_latest_block_number - self.processed_block_number).max(0)
    }
}

/// Aggregated status of a whole processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorStatus {
    pub overall: OverallState,
    pub error: Option<ErrorRecord>,
    /// Per-chain display states in chain-id order; never contains the meta
    /// entry
    pub chains: Vec<ChainStatus>,
}

impl ProcessorStatus {
    pub fn is_error(&self) -> bool {
        self.overall.is_error()
    }

    /// Look up one chain's displayed status
    pub fn chain(&self, chain_id: &str) -> Option<&ChainStatus> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }
}

/// A processor paired with its aggregated status, as returned by
/// project-wide status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionStatus {
    pub processor: Processor,
    pub status: ProcessorStatus,
}

/// Derive the observable status of `processor` from its stored chain
/// states and the liveness of its effective job.
pub fn aggregate(
    processor: &Processor,
    chain_states: &[ChainState],
    is_alive: bool,
) -> ProcessorStatus {
    let meta = chain_states.iter().find(|cs| cs.is_meta());
    let mut chains: Vec<ChainStatus> = chain_states
        .iter()
        .filter(|cs| !cs.is_meta())
        .map(ChainStatus::from_chain_state)
        .collect();
    chains.sort_by(|a, b| a.chain_id.cmp(&b.chain_id));

    let meta_failed = matches!(
        meta.map(|m| m.state),
        Some(ChainRunState::Error | ChainRunState::Unknown)
    );

    let mut overall;
    let mut error: Option<ErrorRecord> = None;

    if let (true, Some(meta)) = (meta_failed, meta) {
        // Whole-job failure pre-empts individual chain nuance.
        overall = OverallState::Error;
        error = meta.error_record.clone();
        for chain in &mut chains {
            chain.state = ChainRunState::Error;
            chain.error = meta.error_record.clone();
        }
    } else {
        overall = match (meta, processor.version_state) {
            (Some(_), _) => OverallState::Processing,
            (None, VersionState::Obsolete) => OverallState::Unknown,
            (None, _) => OverallState::Starting,
        };
        let (escalated, adopted) = adopt_chain_error(&chains);
        if escalated {
            overall = OverallState::Error;
            error = adopted;
        }
    }

    // Liveness correction. A processor-fatal error and a (downgraded)
    // UNKNOWN are beyond correction; everything else defers to the probe.
    let fatal = overall.is_error()
        && error
            .as_ref()
            .map(ErrorRecord::is_processor_fatal)
            .unwrap_or(false);
    if overall != OverallState::Unknown && !fatal {
        if is_alive {
            overall = OverallState::Processing;
        } else {
            overall = OverallState::Starting;
            for chain in &mut chains {
                if !chain.state.is_error() {
                    chain.state = ChainRunState::Queuing;
                }
            }
        }
    }

    ProcessorStatus {
        overall,
        error,
        chains,
    }
}

/// Scan chains (already in chain-id order) for errors. The flag reports
/// whether any chain is in ERROR; the record is the adopted one, which can
/// be absent when the failing chain carried no record.
fn adopt_chain_error(chains: &[ChainStatus]) -> (bool, Option<ErrorRecord>) {
    let mut escalated = false;
    let mut adopted: Option<ErrorRecord> = None;
    for chain in chains {
        if !chain.state.is_error() {
            continue;
        }
        escalated = true;
        if let Some(record) = &chain.error {
            let upgrade = match &adopted {
                None => true,
                Some(current) => !current.is_processor_fatal() && record.is_processor_fatal(),
            };
            if upgrade {
                adopted = Some(record.clone());
            }
        }
    }
    (escalated, adopted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProgressReport;
    use uuid::Uuid;

    fn processor_in(state: VersionState) -> Processor {
        let mut p = Processor::new("analytics", 1);
        p.version_state = state;
        p
    }

    fn chain(id: &str, state: ChainRunState) -> ChainState {
        let mut cs = ChainState::from_report(Uuid::new_v4(), &ProgressReport::new(id, 100));
        cs.state = state;
        cs
    }

    fn failed_chain(id: &str, record: ErrorRecord) -> ChainState {
        let mut cs = chain(id, ChainRunState::Error);
        cs.error_record = Some(record);
        cs
    }

    fn healthy_meta() -> ChainState {
        chain(crate::constants::META_CHAIN_ID, ChainRunState::Processing)
    }

    fn failed_meta(record: Option<ErrorRecord>) -> ChainState {
        let mut cs = chain(crate::constants::META_CHAIN_ID, ChainRunState::Error);
        cs.error_record = record;
        cs
    }

    #[test]
    fn test_no_reports_yet_is_starting() {
        let status = aggregate(&processor_in(VersionState::Pending), &[], false);
        assert_eq!(status.overall, OverallState::Starting);
        assert!(status.chains.is_empty());
        assert!(status.error.is_none());
    }

    #[test]
    fn test_obsolete_without_meta_is_unknown_even_when_alive() {
        let status = aggregate(&processor_in(VersionState::Obsolete), &[], true);
        assert_eq!(status.overall, OverallState::Unknown);
    }

    #[test]
    fn test_healthy_meta_and_alive_is_processing() {
        let states = vec![healthy_meta(), chain("eth-mainnet", ChainRunState::Processing)];
        let status = aggregate(&processor_in(VersionState::Active), &states, true);

        assert_eq!(status.overall, OverallState::Processing);
        assert_eq!(status.chains.len(), 1);
        assert_eq!(
            status.chain("eth-mainnet").unwrap().state,
            ChainRunState::Processing
        );
    }

    #[test]
    fn test_meta_never_appears_in_chain_output() {
        let states = vec![healthy_meta(), chain("eth-mainnet", ChainRunState::Queuing)];
        let status = aggregate(&processor_in(VersionState::Active), &states, true);
        assert!(status.chain(crate::constants::META_CHAIN_ID).is_none());
    }

    #[test]
    fn test_dead_job_forces_starting_and_queuing() {
        let states = vec![
            healthy_meta(),
            chain("eth-mainnet", ChainRunState::Processing),
            chain("polygon", ChainRunState::Processing),
        ];
        let status = aggregate(&processor_in(VersionState::Active), &states, false);

        assert_eq!(status.overall, OverallState::Starting);
        for chain in &status.chains {
            assert_eq!(chain.state, ChainRunState::Queuing);
        }
    }

    #[test]
    fn test_chain_error_is_adopted_but_liveness_corrects_overall() {
        let record = ErrorRecord::new("handler", 4, 17, "mapping panic");
        let states = vec![
            healthy_meta(),
            chain("eth-mainnet", ChainRunState::Processing),
            failed_chain("polygon", record.clone()),
        ];
        let status = aggregate(&processor_in(VersionState::Active), &states, true);

        // The job is alive, so the correction lands on PROCESSING, but the
        // adopted record and the chain's own ERROR remain visible.
        assert_eq!(status.overall, OverallState::Processing);
        assert_eq!(status.error, Some(record));
        assert_eq!(
            status.chain("polygon").unwrap().state,
            ChainRunState::Error
        );
        assert_eq!(
            status.chain("eth-mainnet").unwrap().state,
            ChainRunState::Processing
        );
    }

    #[test]
    fn test_processor_fatal_chain_error_survives_liveness() {
        let record = ErrorRecord::processor_fatal(9, "driver out of memory");
        let states = vec![healthy_meta(), failed_chain("eth-mainnet", record.clone())];
        let status = aggregate(&processor_in(VersionState::Active), &states, true);

        assert_eq!(status.overall, OverallState::Error);
        assert_eq!(status.error, Some(record));
    }

    #[test]
    fn test_tie_break_prefers_processor_fatal() {
        let handler = ErrorRecord::new("handler", 4, 17, "mapping panic");
        let fatal = ErrorRecord::processor_fatal(9, "driver crashed");
        let states = vec![
            failed_chain("aaa-chain", handler),
            failed_chain("zzz-chain", fatal.clone()),
        ];
        let status = aggregate(&processor_in(VersionState::Active), &states, true);

        assert_eq!(status.error, Some(fatal));
        assert_eq!(status.overall, OverallState::Error);
    }

    #[test]
    fn test_tie_break_falls_back_to_chain_id_order() {
        let first = ErrorRecord::new("handler", 4, 17, "first");
        let second = ErrorRecord::new("handler", 4, 18, "second");
        let states = vec![
            failed_chain("zzz-chain", second),
            failed_chain("aaa-chain", first.clone()),
        ];
        let status = aggregate(&processor_in(VersionState::Active), &states, false);

        assert_eq!(status.error, Some(first));
    }

    #[test]
    fn test_error_chain_without_record_still_escalates() {
        let states = vec![chain("eth-mainnet", ChainRunState::Error)];
        let status = aggregate(&processor_in(VersionState::Active), &states, false);

        // No record to adopt, but the dead-job correction still lands on
        // STARTING and the chain keeps its ERROR.
        assert_eq!(status.overall, OverallState::Starting);
        assert!(status.error.is_none());
        assert_eq!(
            status.chain("eth-mainnet").unwrap().state,
            ChainRunState::Error
        );
    }

    #[test]
    fn test_fatal_meta_error_forces_everything() {
        let record = ErrorRecord::processor_fatal(9, "driver crashed");
        let states = vec![
            failed_meta(Some(record.clone())),
            chain("eth-mainnet", ChainRunState::Processing),
            chain("polygon", ChainRunState::Queuing),
        ];
        let status = aggregate(&processor_in(VersionState::Active), &states, true);

        assert_eq!(status.overall, OverallState::Error);
        assert_eq!(status.error, Some(record.clone()));
        for chain in &status.chains {
            assert_eq!(chain.state, ChainRunState::Error);
            assert_eq!(chain.error, Some(record.clone()));
        }
    }

    #[test]
    fn test_nonfatal_meta_error_defers_to_liveness() {
        let record = ErrorRecord::new("driver", 2, 5, "stale heartbeat");
        let states = vec![
            failed_meta(Some(record.clone())),
            chain("eth-mainnet", ChainRunState::Processing),
        ];
        let status = aggregate(&processor_in(VersionState::Active), &states, true);

        // Liveness is authoritative for "running at all": overall corrects
        // to PROCESSING while the forced chain ERROR and record remain.
        assert_eq!(status.overall, OverallState::Processing);
        assert_eq!(status.error, Some(record.clone()));
        assert_eq!(
            status.chain("eth-mainnet").unwrap().error,
            Some(record)
        );
    }

    #[test]
    fn test_unknown_meta_on_dead_job_lands_starting() {
        let mut meta = chain(crate::constants::META_CHAIN_ID, ChainRunState::Unknown);
        meta.error_record = None;
        let states = vec![meta, chain("eth-mainnet", ChainRunState::Processing)];
        let status = aggregate(&processor_in(VersionState::Active), &states, false);

        assert_eq!(status.overall, OverallState::Starting);
        // The chain was forced to ERROR by the meta escalation and keeps it
        // through the correction.
        assert_eq!(
            status.chain("eth-mainnet").unwrap().state,
            ChainRunState::Error
        );
    }

    #[test]
    fn test_chains_are_sorted_by_chain_id() {
        let states = vec![
            chain("polygon", ChainRunState::Queuing),
            chain("arbitrum", ChainRunState::Queuing),
            chain("eth-mainnet", ChainRunState::Queuing),
        ];
        let status = aggregate(&processor_in(VersionState::Active), &states, false);

        let ids: Vec<&str> = status.chains.iter().map(|c| c.chain_id.as_str()).collect();
        assert_eq!(ids, vec!["arbitrum", "eth-mainnet", "polygon"]);
    }

    #[test]
    fn test_blocks_behind() {
        let mut cs = chain("eth-mainnet", ChainRunState::Processing);
        cs.processed_block_number = 90;
        cs.estimated_latest_block_number = 100;
        let status = aggregate(&processor_in(VersionState::Active), &[cs], true);
        assert_eq!(status.chain("eth-mainnet").unwrap().blocks_behind(), 10);
    }
}
