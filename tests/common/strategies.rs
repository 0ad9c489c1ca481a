//! Proptest strategies for status aggregation inputs

#![allow(dead_code)]

use proptest::prelude::*;
use uuid::Uuid;

use procplane_core::constants::META_CHAIN_ID;
use procplane_core::models::{
    ChainRunState, ChainState, ErrorRecord, Processor, ProgressReport, VersionState,
};

/// Worker chain identifiers; never the reserved meta entry
pub fn chain_id_strategy() -> impl Strategy<Value = String> {
    "[a-z]{3,8}".prop_filter("meta is reserved", |s| s != META_CHAIN_ID)
}

pub fn chain_run_state_strategy() -> impl Strategy<Value = ChainRunState> {
    prop_oneof![
        Just(ChainRunState::Queuing),
        Just(ChainRunState::Processing),
        Just(ChainRunState::Error),
        Just(ChainRunState::Unknown),
    ]
}

pub fn error_record_strategy() -> impl Strategy<Value = ErrorRecord> {
    (
        prop_oneof![Just(1i32), 2i32..10i32],
        1i32..1000i32,
        "[a-z ]{5,20}",
    )
        .prop_map(|(namespace_code, code, message)| {
            let namespace = if namespace_code == 1 {
                "processor"
            } else {
                "handler"
            };
            ErrorRecord::new(namespace, namespace_code, code, message)
        })
}

/// One stored chain state for `processor_id`. ERROR states always carry a
/// record; healthy states never do.
pub fn chain_state_strategy(
    processor_id: Uuid,
    chain_id: String,
) -> impl Strategy<Value = ChainState> {
    (
        chain_run_state_strategy(),
        0i64..1_000_000i64,
        0i64..10_000i64,
        proptest::option::of(error_record_strategy()),
    )
        .prop_map(move |(state, block, lag, maybe_error)| {
            let mut report = ProgressReport::new(chain_id.clone(), block)
                .with_state(state)
                .with_estimated_latest(block + lag);
            if state == ChainRunState::Error {
                report.error_record = Some(
                    maybe_error.unwrap_or_else(|| ErrorRecord::new("handler", 2, 1, "boom")),
                );
            }
            ChainState::from_report(processor_id, &report)
        })
}

/// A meta entry in an arbitrary run state
pub fn meta_state_strategy(processor_id: Uuid) -> impl Strategy<Value = ChainState> {
    (
        chain_run_state_strategy(),
        0i64..1_000_000i64,
        proptest::option::of(error_record_strategy()),
    )
        .prop_map(move |(state, block, maybe_error)| {
            let mut report = ProgressReport::meta(block).with_state(state);
            if state == ChainRunState::Error {
                report.error_record = Some(
                    maybe_error.unwrap_or_else(|| ErrorRecord::new("meter", 3, 1, "boom")),
                );
            }
            ChainState::from_report(processor_id, &report)
        })
}

/// Up to four distinct worker chains, optionally joined by a meta entry
pub fn chain_states_strategy(processor_id: Uuid) -> impl Strategy<Value = Vec<ChainState>> {
    let workers =
        proptest::collection::hash_set(chain_id_strategy(), 0..4).prop_flat_map(move |ids| {
            ids.into_iter()
                .map(|id| chain_state_strategy(processor_id, id))
                .collect::<Vec<_>>()
        });
    (
        workers,
        proptest::option::of(meta_state_strategy(processor_id)),
    )
        .prop_map(|(mut states, meta)| {
            if let Some(meta) = meta {
                states.push(meta);
            }
            states
        })
}

/// A processor in an arbitrary lifecycle state
pub fn processor_strategy() -> impl Strategy<Value = Processor> {
    (
        "[a-z]{4,10}",
        1i32..50i32,
        prop_oneof![
            Just(VersionState::Pending),
            Just(VersionState::Active),
            Just(VersionState::Obsolete),
        ],
    )
        .prop_map(|(project, version, state)| {
            let mut processor = Processor::new(project, version);
            processor.version_state = state;
            processor
        })
}
