//! # Lifecycle Orchestrator
//!
//! ## Overview
//!
//! The LifecycleOrchestrator owns every processor lifecycle transition:
//! upload/continuation, activation with sibling demotion, pause/resume,
//! stop, restart, reference resolution, progress intake and status queries.
//! It is the sole writer of processors and the sole enforcer of the
//! one-ACTIVE/one-PENDING rule and the obsolete retention bound.
//!
//! ## Transaction discipline
//!
//! Each mutating operation runs inside a single gateway transaction.
//! Control-plane calls and lifecycle hooks are never issued mid-transaction;
//! they are staged as side effects and executed in operation order after the
//! commit. Two consequences follow and are part of the contract:
//!
//! - a crash between commit and side-effect execution leaves the control
//!   plane behind desired state, which the next reconcile repairs (all
//!   control-plane calls are idempotent)
//! - a hook failure surfaces as an error from an operation whose state
//!   change already committed

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::LifecycleSettings;
use crate::constants::events;
use crate::control_plane::{ControlPlaneError, JobControlPlane, LogPage, RunningInstance};
use crate::error::{ProcplaneError, Result};
use crate::hooks::{HookChain, HookEvent};
use crate::logging::log_control_plane_operation;
use crate::models::{ChainState, Processor, ProcessorUpload, ProgressReport, VersionState};
use crate::persistence::{commit_or_rollback, GatewayTransaction, PersistenceGateway};

use super::status::{aggregate, ProcessorStatus, VersionStatus};

/// A control-plane call or hook staged during a transaction and executed
/// after commit, in staging order
enum SideEffect {
    StartOrUpdate(Processor),
    Restart(Processor),
    Delete(Processor),
    Hook(HookEvent, Processor),
}

/// Core lifecycle service; see the module docs for the transaction and
/// side-effect contract
pub struct LifecycleOrchestrator {
    gateway: Arc<dyn PersistenceGateway>,
    control_plane: Arc<dyn JobControlPlane>,
    hooks: HookChain,
    settings: LifecycleSettings,
}

impl LifecycleOrchestrator {
    /// Create an orchestrator with no hooks and default settings
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        control_plane: Arc<dyn JobControlPlane>,
    ) -> Self {
        Self {
            gateway,
            control_plane,
            hooks: HookChain::new(),
            settings: LifecycleSettings::default(),
        }
    }

    /// Attach lifecycle hooks
    pub fn with_hooks(mut self, hooks: HookChain) -> Self {
        self.hooks = hooks;
        self
    }

    /// Override lifecycle settings (retention bound)
    pub fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Create a new PENDING version for the project, or update an existing
    /// version in place when the upload carries `continue_from_version`.
    /// Either way the resolved processor goes through activation at its
    /// current target state.
    #[instrument(skip(self, upload), fields(project_id = %upload.project_id))]
    pub async fn create_or_upgrade(&self, upload: ProcessorUpload) -> Result<Processor> {
        if upload.project_id.trim().is_empty() {
            return Err(ProcplaneError::invalid_state("project id must not be empty"));
        }
        if upload.num_workers < 0 {
            return Err(ProcplaneError::invalid_state(
                "num_workers must not be negative",
            ));
        }
        if let Some(version) = upload.continue_from_version {
            if version < 1 {
                return Err(ProcplaneError::invalid_state(
                    "version numbers start at 1",
                ));
            }
        }
        if upload.reference_project_id.as_deref() == Some(upload.project_id.as_str()) {
            return Err(ProcplaneError::CycleDetected(upload.project_id.clone()));
        }

        info!(project_id = %upload.project_id, "starting processor upload");

        let mut effects = Vec::new();
        let mut tx = self.gateway.begin().await?;
        let outcome = self
            .create_or_upgrade_in_tx(tx.as_mut(), &mut effects, &upload)
            .await;
        let processor = commit_or_rollback(tx, outcome).await?;
        self.run_effects(effects).await?;

        info!(
            processor = %processor.display_name(),
            state = %processor.version_state,
            event = events::PROCESSOR_CREATED,
            "processor upload complete"
        );
        Ok(processor)
    }

    /// Persist the processor at its target state (PENDING or ACTIVE),
    /// demote every sibling holding that state, purge obsolete versions
    /// beyond the retention bound, reconcile the job and fire hooks.
    #[instrument(skip(self, processor), fields(processor = %processor.display_name(), upgrade))]
    pub async fn activate(&self, processor: Processor, upgrade: bool) -> Result<Processor> {
        let mut effects = Vec::new();
        let mut tx = self.gateway.begin().await?;
        let outcome = self
            .activate_in_tx(tx.as_mut(), &mut effects, processor, upgrade)
            .await;
        let processor = commit_or_rollback(tx, outcome).await?;
        self.run_effects(effects).await?;

        info!(
            processor = %processor.display_name(),
            state = %processor.version_state,
            event = events::PROCESSOR_ACTIVATED,
            "processor activated"
        );
        Ok(processor)
    }

    /// Promote a version to ACTIVE, demoting the previously active version
    #[instrument(skip(self), fields(%processor_id))]
    pub async fn promote(&self, processor_id: Uuid) -> Result<Processor> {
        let mut effects = Vec::new();
        let mut tx = self.gateway.begin().await?;
        let outcome = self
            .promote_in_tx(tx.as_mut(), &mut effects, processor_id)
            .await;
        let processor = commit_or_rollback(tx, outcome).await?;
        self.run_effects(effects).await?;

        info!(
            processor = %processor.display_name(),
            event = events::PROCESSOR_ACTIVATED,
            "processor promoted to active"
        );
        Ok(processor)
    }

    /// Administratively pause a processor: its job is reconciled to zero
    /// replicas but not deleted. No-op when already paused.
    #[instrument(skip(self, reason), fields(%processor_id))]
    pub async fn pause(&self, processor_id: Uuid, reason: impl Into<String>) -> Result<Processor> {
        let reason = reason.into();
        let mut effects = Vec::new();
        let mut tx = self.gateway.begin().await?;
        let outcome = self
            .set_pause_in_tx(tx.as_mut(), &mut effects, processor_id, true, Some(reason))
            .await;
        let (processor, changed) = commit_or_rollback(tx, outcome).await?;

        if changed {
            self.run_effects(effects).await?;
            info!(
                processor = %processor.display_name(),
                event = events::PROCESSOR_PAUSED,
                "processor paused"
            );
        } else {
            debug!(processor = %processor.display_name(), "already paused; nothing to do");
        }
        Ok(processor)
    }

    /// Lift an administrative pause, restoring the configured replica
    /// count. No-op when not paused.
    #[instrument(skip(self), fields(%processor_id))]
    pub async fn resume(&self, processor_id: Uuid) -> Result<Processor> {
        let mut effects = Vec::new();
        let mut tx = self.gateway.begin().await?;
        let outcome = self
            .set_pause_in_tx(tx.as_mut(), &mut effects, processor_id, false, None)
            .await;
        let (processor, changed) = commit_or_rollback(tx, outcome).await?;

        if changed {
            self.run_effects(effects).await?;
            info!(
                processor = %processor.display_name(),
                event = events::PROCESSOR_RESUMED,
                "processor resumed"
            );
        } else {
            debug!(processor = %processor.display_name(), "not paused; nothing to do");
        }
        Ok(processor)
    }

    /// Demote a processor to OBSOLETE and tear its job down. Idempotent:
    /// stopping an already obsolete processor repeats the (idempotent)
    /// teardown.
    #[instrument(skip(self), fields(%processor_id))]
    pub async fn stop(&self, processor_id: Uuid) -> Result<Processor> {
        let mut effects = Vec::new();
        let mut tx = self.gateway.begin().await?;
        let outcome = self.stop_in_tx(tx.as_mut(), &mut effects, processor_id).await;
        let processor = commit_or_rollback(tx, outcome).await?;
        self.run_effects(effects).await?;

        info!(
            processor = %processor.display_name(),
            event = events::PROCESSOR_STOPPED,
            "processor stopped"
        );
        Ok(processor)
    }

    /// Restart a processor's job and wipe its chain states so indexing
    /// starts over. The control-plane restart is best-effort; the on-stop
    /// hooks must succeed before any state is cleared.
    #[instrument(skip(self), fields(%processor_id))]
    pub async fn restart(&self, processor_id: Uuid) -> Result<()> {
        let processor = self
            .gateway
            .get_processor(processor_id)
            .await?
            .ok_or_else(|| ProcplaneError::processor_not_found(processor_id))?;

        match self
            .control_plane
            .restart_by_id(processor.id, &processor.driver_version)
            .await
        {
            Ok(()) => log_control_plane_operation(
                "restart_by_id",
                self.control_plane.backend_name(),
                processor.id,
                "success",
                None,
            ),
            Err(error) => {
                warn!(
                    processor = %processor.display_name(),
                    error = %error,
                    "restart call failed; continuing with the state reset"
                );
                log_control_plane_operation(
                    "restart_by_id",
                    self.control_plane.backend_name(),
                    processor.id,
                    "failed",
                    Some(&error.to_string()),
                );
            }
        }

        self.hooks.dispatch(HookEvent::Stopped, &processor).await?;

        let mut tx = self.gateway.begin().await?;
        let outcome = tx
            .as_mut()
            .clear_chain_states(processor.id)
            .await
            .map_err(ProcplaneError::from);
        commit_or_rollback(tx, outcome).await?;
        debug!(
            processor = %processor.display_name(),
            event = events::CHAIN_STATES_CLEARED,
            "chain states cleared"
        );

        info!(
            processor = %processor.display_name(),
            event = events::PROCESSOR_RESTARTED,
            "processor restarted"
        );
        Ok(())
    }

    /// Resolve the processor actually running a job for `processor`.
    ///
    /// A non-reference processor resolves to itself. A reference processor
    /// resolves to the referenced project's ACTIVE processor, following
    /// chained references transitively. `Ok(None)` means some hop had no
    /// ACTIVE processor — a legitimate "nothing there", not an error. A
    /// revisited project yields [`ProcplaneError::CycleDetected`].
    pub async fn resolve_reference(&self, processor: &Processor) -> Result<Option<Processor>> {
        let Some(mut target_project) = processor.reference_project_id.clone() else {
            return Ok(Some(processor.clone()));
        };

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(processor.project_id.clone());

        loop {
            if !visited.insert(target_project.clone()) {
                return Err(ProcplaneError::CycleDetected(target_project));
            }
            let Some(active) = self.gateway.find_active(&target_project).await? else {
                debug!(
                    processor = %processor.display_name(),
                    target = %target_project,
                    "reference target has no active processor"
                );
                return Ok(None);
            };
            match active.reference_project_id.clone() {
                Some(next) => {
                    debug!(
                        processor = %processor.display_name(),
                        via = %target_project,
                        next = %next,
                        "following chained reference"
                    );
                    target_project = next;
                }
                None => return Ok(Some(active)),
            }
        }
    }

    /// Record a progress report from a running job. The first report for a
    /// chain fixes its initial start block; later reports never move it.
    #[instrument(skip(self, report), fields(%processor_id, chain_id = %report.chain_id))]
    pub async fn report_progress(
        &self,
        processor_id: Uuid,
        report: ProgressReport,
    ) -> Result<ChainState> {
        if report.chain_id.trim().is_empty() {
            return Err(ProcplaneError::invalid_state("chain id must not be empty"));
        }

        let mut tx = self.gateway.begin().await?;
        let outcome = self
            .report_progress_in_tx(tx.as_mut(), processor_id, &report)
            .await;
        let chain_state = commit_or_rollback(tx, outcome).await?;

        debug!(
            chain_id = %chain_state.chain_id,
            block = chain_state.processed_block_number,
            state = %chain_state.state,
            event = events::CHAIN_PROGRESS_REPORTED,
            "chain progress recorded"
        );
        Ok(chain_state)
    }

    /// Aggregated status of one processor. For a reference processor the
    /// chain states and liveness come from the effective processor while
    /// the version state is the requested one's; an unresolvable reference
    /// renders as "no chains, not alive" rather than failing.
    pub async fn processor_status(&self, processor_id: Uuid) -> Result<ProcessorStatus> {
        let processor = self
            .gateway
            .get_processor(processor_id)
            .await?
            .ok_or_else(|| ProcplaneError::processor_not_found(processor_id))?;
        self.status_for(&processor).await
    }

    /// Status of every version of a project, newest version first
    #[instrument(skip(self), fields(%project_id))]
    pub async fn project_status(&self, project_id: &str) -> Result<Vec<VersionStatus>> {
        let processors = self.gateway.list_by_project(project_id).await?;
        if processors.is_empty() {
            return Err(ProcplaneError::project_not_found(project_id));
        }

        let statuses = join_all(processors.iter().map(|p| self.status_for(p))).await;
        processors
            .into_iter()
            .zip(statuses)
            .map(|(processor, status)| {
                Ok(VersionStatus {
                    processor,
                    status: status?,
                })
            })
            .collect()
    }

    /// Fetch a page of the processor's job logs, following references to
    /// the effective processor
    pub async fn processor_logs(
        &self,
        processor_id: Uuid,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<LogPage> {
        let processor = self
            .gateway
            .get_processor(processor_id)
            .await?
            .ok_or_else(|| ProcplaneError::processor_not_found(processor_id))?;
        let effective = self.require_effective(&processor).await?;
        Ok(self
            .control_plane
            .fetch_logs(&effective, limit, cursor)
            .await?)
    }

    /// Live workers of the processor's job, following references to the
    /// effective processor
    pub async fn running_instances(&self, processor_id: Uuid) -> Result<Vec<RunningInstance>> {
        let processor = self
            .gateway
            .get_processor(processor_id)
            .await?
            .ok_or_else(|| ProcplaneError::processor_not_found(processor_id))?;
        let effective = self.require_effective(&processor).await?;
        Ok(self.control_plane.list_running_instances(&effective).await?)
    }

    // ---- transactional helpers -------------------------------------------

    async fn create_or_upgrade_in_tx(
        &self,
        tx: &mut dyn GatewayTransaction,
        effects: &mut Vec<SideEffect>,
        upload: &ProcessorUpload,
    ) -> Result<Processor> {
        let (processor, upgrade) = match upload.continue_from_version {
            Some(version) => {
                let mut existing = tx
                    .get_by_project_and_version(&upload.project_id, version)
                    .await?
                    .ok_or_else(|| ProcplaneError::NotFound {
                        kind: "processor version",
                        id: format!("{}/v{}", upload.project_id, version),
                    })?;
                upload.apply_to(&mut existing);
                (existing, true)
            }
            None => {
                let last = tx.latest_version(&upload.project_id).await?.unwrap_or(0);
                (upload.to_processor(last + 1), false)
            }
        };

        debug!(
            processor = %processor.display_name(),
            upgrade,
            "materialized upload"
        );
        self.activate_in_tx(tx, effects, processor, upgrade).await
    }

    async fn promote_in_tx(
        &self,
        tx: &mut dyn GatewayTransaction,
        effects: &mut Vec<SideEffect>,
        processor_id: Uuid,
    ) -> Result<Processor> {
        let mut processor = tx
            .get_processor(processor_id)
            .await?
            .ok_or_else(|| ProcplaneError::processor_not_found(processor_id))?;
        if processor.version_state == VersionState::Obsolete {
            return Err(ProcplaneError::invalid_state(format!(
                "cannot promote obsolete version {}",
                processor.display_name()
            )));
        }
        processor.version_state = VersionState::Active;
        self.activate_in_tx(tx, effects, processor, false).await
    }

    /// Shared activation core: persist at the target state, demote
    /// siblings holding that state, purge beyond retention, stage the job
    /// reconcile and the activation hook
    async fn activate_in_tx(
        &self,
        tx: &mut dyn GatewayTransaction,
        effects: &mut Vec<SideEffect>,
        processor: Processor,
        upgrade: bool,
    ) -> Result<Processor> {
        let target = processor.version_state;
        if !target.is_runnable() {
            return Err(ProcplaneError::invalid_state(format!(
                "cannot activate {} into state {target}",
                processor.display_name()
            )));
        }

        tx.save_processor(&processor).await?;

        let siblings = tx
            .list_by_project_and_state(&processor.project_id, target)
            .await?;
        for sibling in siblings {
            if sibling.id == processor.id {
                continue;
            }
            self.obsolete_in_tx(tx, effects, sibling).await?;
        }

        let purged = self
            .purge_excess_obsolete_in_tx(tx, &processor.project_id)
            .await?;
        if purged > 0 {
            debug!(
                project_id = %processor.project_id,
                purged,
                event = events::PROCESSOR_PURGED,
                "purged obsolete versions beyond retention"
            );
        }

        // A reference processor never materializes its own job.
        if !processor.is_reference() {
            effects.push(SideEffect::StartOrUpdate(processor.clone()));
            if upgrade {
                effects.push(SideEffect::Restart(processor.clone()));
            }
        }
        effects.push(SideEffect::Hook(HookEvent::Activated, processor.clone()));

        Ok(processor)
    }

    /// Demote one processor to OBSOLETE: clear its pause, stage the job
    /// teardown and the on-stop hook
    async fn obsolete_in_tx(
        &self,
        tx: &mut dyn GatewayTransaction,
        effects: &mut Vec<SideEffect>,
        mut processor: Processor,
    ) -> Result<Processor> {
        debug!(
            processor = %processor.display_name(),
            event = events::PROCESSOR_OBSOLETED,
            "demoting processor"
        );
        processor.version_state = VersionState::Obsolete;
        processor.clear_pause();
        tx.save_processor(&processor).await?;

        if !processor.is_reference() {
            effects.push(SideEffect::Delete(processor.clone()));
        }
        effects.push(SideEffect::Hook(HookEvent::Stopped, processor.clone()));
        Ok(processor)
    }

    async fn stop_in_tx(
        &self,
        tx: &mut dyn GatewayTransaction,
        effects: &mut Vec<SideEffect>,
        processor_id: Uuid,
    ) -> Result<Processor> {
        let processor = tx
            .get_processor(processor_id)
            .await?
            .ok_or_else(|| ProcplaneError::processor_not_found(processor_id))?;
        self.obsolete_in_tx(tx, effects, processor).await
    }

    async fn set_pause_in_tx(
        &self,
        tx: &mut dyn GatewayTransaction,
        effects: &mut Vec<SideEffect>,
        processor_id: Uuid,
        pause: bool,
        reason: Option<String>,
    ) -> Result<(Processor, bool)> {
        let mut processor = tx
            .get_processor(processor_id)
            .await?
            .ok_or_else(|| ProcplaneError::processor_not_found(processor_id))?;

        // The flag already matches: nothing to validate, nothing to do.
        if processor.paused == pause {
            return Ok((processor, false));
        }
        if processor.is_reference() {
            return Err(ProcplaneError::invalid_state(format!(
                "{} aliases project '{}' and owns no job to pause or resume",
                processor.display_name(),
                processor.reference_project_id.as_deref().unwrap_or_default()
            )));
        }
        if !processor.version_state.is_runnable() {
            return Err(ProcplaneError::invalid_state(format!(
                "cannot change pause state of {} in state {}",
                processor.display_name(),
                processor.version_state
            )));
        }

        if pause {
            processor.set_paused(reason.unwrap_or_default());
        } else {
            processor.clear_pause();
        }
        tx.save_processor(&processor).await?;

        effects.push(SideEffect::StartOrUpdate(processor.clone()));
        let event = if pause {
            HookEvent::Paused
        } else {
            HookEvent::Resumed
        };
        effects.push(SideEffect::Hook(event, processor.clone()));
        Ok((processor, true))
    }

    async fn report_progress_in_tx(
        &self,
        tx: &mut dyn GatewayTransaction,
        processor_id: Uuid,
        report: &ProgressReport,
    ) -> Result<ChainState> {
        let processor = tx
            .get_processor(processor_id)
            .await?
            .ok_or_else(|| ProcplaneError::processor_not_found(processor_id))?;
        if processor.is_reference() {
            return Err(ProcplaneError::invalid_state(format!(
                "{} aliases another project and cannot accept progress reports",
                processor.display_name()
            )));
        }

        let chain_state = match tx.get_chain_state(processor_id, &report.chain_id).await? {
            Some(mut existing) => {
                existing.apply_report(report);
                existing
            }
            None => ChainState::from_report(processor_id, report),
        };
        tx.upsert_chain_state(&chain_state).await?;
        Ok(chain_state)
    }

    /// Purge OBSOLETE versions beyond the retention bound, oldest first
    async fn purge_excess_obsolete_in_tx(
        &self,
        tx: &mut dyn GatewayTransaction,
        project_id: &str,
    ) -> Result<usize> {
        let mut obsolete = tx.list_obsolete_by_recency(project_id).await?;
        let bound = self.settings.retention_bound;
        if obsolete.len() <= bound {
            return Ok(0);
        }

        let excess = obsolete.split_off(bound);
        let mut purged = 0;
        for processor in excess.iter().rev() {
            tx.remove_processor(processor.id).await?;
            purged += 1;
        }
        Ok(purged)
    }

    // ---- post-commit side effects ----------------------------------------

    async fn run_effects(&self, effects: Vec<SideEffect>) -> Result<()> {
        for effect in effects {
            match effect {
                SideEffect::StartOrUpdate(processor) => {
                    let outcome = self.control_plane.start_or_update(&processor).await;
                    self.check_control_call("start_or_update", &processor, outcome)?;
                }
                SideEffect::Restart(processor) => {
                    let outcome = self.control_plane.restart(&processor).await;
                    self.check_control_call("restart", &processor, outcome)?;
                }
                SideEffect::Delete(processor) => {
                    let outcome = self.control_plane.delete(&processor).await;
                    self.check_control_call("delete", &processor, outcome)?;
                }
                SideEffect::Hook(event, processor) => {
                    self.hooks.dispatch(event, &processor).await?;
                }
            }
        }
        Ok(())
    }

    fn check_control_call(
        &self,
        operation: &'static str,
        processor: &Processor,
        outcome: std::result::Result<(), ControlPlaneError>,
    ) -> Result<()> {
        match outcome {
            Ok(()) => {
                log_control_plane_operation(
                    operation,
                    self.control_plane.backend_name(),
                    processor.id,
                    "success",
                    None,
                );
                Ok(())
            }
            Err(error) => {
                log_control_plane_operation(
                    operation,
                    self.control_plane.backend_name(),
                    processor.id,
                    "failed",
                    Some(&error.to_string()),
                );
                Err(error.into())
            }
        }
    }

    // ---- status plumbing -------------------------------------------------

    async fn status_for(&self, processor: &Processor) -> Result<ProcessorStatus> {
        let (chain_states, alive) = match self.resolve_reference(processor).await? {
            Some(effective) => {
                let chains = self.gateway.list_chain_states(effective.id);
                let probe = self.probe_liveness(&effective);
                let (chains, alive) = futures::join!(chains, probe);
                (chains?, alive)
            }
            None => (Vec::new(), false),
        };
        Ok(aggregate(processor, &chain_states, alive))
    }

    /// Probe failures degrade to "not alive" so status queries keep working
    /// through control-plane hiccups
    async fn probe_liveness(&self, processor: &Processor) -> bool {
        match self
            .control_plane
            .is_alive(processor.id, &processor.driver_version)
            .await
        {
            Ok(alive) => alive,
            Err(error) => {
                warn!(
                    processor = %processor.display_name(),
                    error = %error,
                    "liveness probe failed; treating job as not alive"
                );
                false
            }
        }
    }

    async fn require_effective(&self, processor: &Processor) -> Result<Processor> {
        self.resolve_reference(processor)
            .await?
            .ok_or_else(|| ProcplaneError::NotFound {
                kind: "effective processor",
                id: processor
                    .reference_project_id
                    .clone()
                    .unwrap_or_else(|| processor.project_id.clone()),
            })
    }
}
