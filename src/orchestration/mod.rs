//! # Orchestration Engine
//!
//! Lifecycle decisions and status aggregation for processor versions.
//!
//! ## Core Components
//!
//! - **LifecycleOrchestrator**: Single writer of processors; runs uploads,
//!   activation with sibling demotion, pause/resume, stop, restart,
//!   reference resolution and progress intake, all through gateway
//!   transactions with control-plane calls staged until after commit
//! - **Status aggregation**: Pure derivation of overall and per-chain
//!   status from a processor's stored chain states and one liveness probe
//!
//! Storage stays dumb on purpose: the one-ACTIVE/one-PENDING rule and the
//! obsolete retention bound are enforced here and nowhere else.

pub mod lifecycle;
pub mod status;

pub use lifecycle::LifecycleOrchestrator;
pub use status::{aggregate, ChainStatus, ProcessorStatus, VersionStatus};
