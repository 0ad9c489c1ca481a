#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Procplane Core
//!
//! Control plane for versioned blockchain-indexing processors.
//!
//! ## Overview
//!
//! A *processor* is one uploaded version of a project's indexing workload.
//! Versions move through a PENDING → ACTIVE → OBSOLETE lifecycle, at most
//! one ACTIVE and one PENDING per project, and each running version reports
//! per-chain progress that this crate aggregates into an overall status.
//! The crate owns the decisions; running the actual workloads is delegated
//! to a pluggable job control plane.
//!
//! ## Architecture
//!
//! The core follows a **single-writer orchestration** design:
//!
//! - The [`orchestration::LifecycleOrchestrator`] is the only component
//!   that mutates processors. Storage stays dumb; every lifecycle rule is
//!   enforced in the orchestrator, inside one gateway transaction per
//!   operation.
//! - Control-plane calls and lifecycle hooks run after the transaction
//!   commits, staged in operation order. All control-plane operations are
//!   idempotent, so a reconcile after a crash converges.
//! - Status is a pure derivation: stored chain states plus one liveness
//!   probe in, overall and per-chain status out.
//!
//! ## Key Features
//!
//! - **Versioned lifecycle**: upload, continuation, promotion, pause and
//!   resume, stop, restart with chain-state reset
//! - **Reference processors**: a version can alias another project's
//!   ACTIVE processor instead of running its own job, with transitive
//!   resolution and cycle rejection
//! - **Chain progress tracking**: per-chain block positions with a
//!   distinguished `meta` entry for the workload as a whole
//! - **Status aggregation**: error escalation, meta-failure override and
//!   liveness correction in one pure function
//! - **Obsolete retention**: old versions are purged beyond a configurable
//!   bound, oldest first
//!
//! ## Module Organization
//!
//! - [`models`] - Processors, chain states, uploads and progress reports
//! - [`persistence`] - Gateway contract with in-memory and PostgreSQL backends
//! - [`control_plane`] - Job backend contract and the in-memory test backend
//! - [`orchestration`] - Lifecycle orchestrator and status aggregation
//! - [`hooks`] - Lifecycle hook contract and dispatch
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`logging`] - Tracing initialization and structured helpers
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use procplane_core::control_plane::InMemoryControlPlane;
//! use procplane_core::models::{ProcessorUpload, VersionState};
//! use procplane_core::orchestration::LifecycleOrchestrator;
//! use procplane_core::persistence::InMemoryGateway;
//!
//! # tokio_test::block_on(async {
//! let orchestrator = LifecycleOrchestrator::new(
//!     Arc::new(InMemoryGateway::new()),
//!     Arc::new(InMemoryControlPlane::new()),
//! );
//!
//! // Upload a first version; it lands PENDING with a freshly started job.
//! let upload = ProcessorUpload::new("analytics").with_code_url("s3://bundles/analytics-v1");
//! let pending = orchestrator.create_or_upgrade(upload).await.expect("upload accepted");
//! assert_eq!(pending.version_state, VersionState::Pending);
//!
//! // Promote once it looks healthy; prior active versions become obsolete.
//! let active = orchestrator.promote(pending.id).await.expect("promotion succeeds");
//! assert_eq!(active.version_state, VersionState::Active);
//! # });
//! ```
//!
//! ## Testing
//!
//! Everything except the PostgreSQL gateway tests runs against the
//! in-memory backends:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests
//! ```

pub mod config;
pub mod constants;
pub mod control_plane;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod persistence;

pub use config::{DatabaseConfig, LifecycleSettings, LoggingConfig, ProcplaneConfig};
pub use constants::{DEFAULT_OBSOLETE_RETENTION, META_CHAIN_ID};
pub use control_plane::{InMemoryControlPlane, JobControlPlane};
pub use error::{ProcplaneError, Result};
pub use hooks::{HookChain, HookEvent, LifecycleHook};
pub use models::{
    ChainRunState, ChainState, ErrorRecord, OverallState, Processor, ProcessorUpload,
    ProgressReport, VersionState, WorkloadProperties,
};
pub use orchestration::{ChainStatus, LifecycleOrchestrator, ProcessorStatus, VersionStatus};
pub use persistence::{InMemoryGateway, PersistenceGateway};
