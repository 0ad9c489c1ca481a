//! # Lifecycle Hooks
//!
//! Observer seam for platform services (notifications, billing, cache
//! invalidation) that need to react to processor lifecycle transitions.
//! Hooks run after the owning persistence transaction has committed, in
//! registration order; the first failure aborts the remaining hooks and
//! fails the operation even though the state change already persisted.
//! Hook implementations that cannot afford that anomaly must catch their
//! own errors and return `Ok`.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::constants::events;
use crate::error::{ProcplaneError, Result};
use crate::models::Processor;

/// Errors raised by hook implementations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// The hook examined the transition and refused it
    #[error("hook rejected transition: {0}")]
    Rejected(String),

    /// Opaque failure inside the hook
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Lifecycle transition a hook can observe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    Activated,
    Stopped,
    Paused,
    Resumed,
}

impl HookEvent {
    /// Structured-log event name for this transition
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Activated => events::PROCESSOR_ACTIVATED,
            Self::Stopped => events::PROCESSOR_STOPPED,
            Self::Paused => events::PROCESSOR_PAUSED,
            Self::Resumed => events::PROCESSOR_RESUMED,
        }
    }
}

/// Observer of processor lifecycle transitions. Every method defaults to a
/// no-op so implementations only override what they care about.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// Name of the hook for logs and error attribution
    fn name(&self) -> &'static str;

    /// A processor was activated (with its target state already persisted)
    async fn on_activate(&self, processor: &Processor) -> std::result::Result<(), HookError> {
        let _ = processor;
        Ok(())
    }

    /// A processor was demoted or stopped and its job torn down
    async fn on_stop(&self, processor: &Processor) -> std::result::Result<(), HookError> {
        let _ = processor;
        Ok(())
    }

    /// A processor was administratively paused
    async fn on_pause(&self, processor: &Processor) -> std::result::Result<(), HookError> {
        let _ = processor;
        Ok(())
    }

    /// A paused processor was resumed
    async fn on_resume(&self, processor: &Processor) -> std::result::Result<(), HookError> {
        let _ = processor;
        Ok(())
    }
}

/// Ordered collection of hooks dispatched sequentially; the first failure
/// aborts the rest
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook; dispatch order is registration order
    pub fn push(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(hook);
    }

    /// Builder-style variant of [`HookChain::push`]
    pub fn with(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.push(hook);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Dispatch one transition to every hook in order
    pub async fn dispatch(&self, event: HookEvent, processor: &Processor) -> Result<()> {
        for hook in &self.hooks {
            debug!(
                hook = hook.name(),
                event = event.event_name(),
                processor = %processor.display_name(),
                "dispatching lifecycle hook"
            );
            let outcome = match event {
                HookEvent::Activated => hook.on_activate(processor).await,
                HookEvent::Stopped => hook.on_stop(processor).await,
                HookEvent::Paused => hook.on_pause(processor).await,
                HookEvent::Resumed => hook.on_resume(processor).await,
            };
            if let Err(source) = outcome {
                return Err(ProcplaneError::Hook {
                    hook: hook.name(),
                    source,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&'static str> = self.hooks.iter().map(|h| h.name()).collect();
        f.debug_struct("HookChain").field("hooks", &names).finish()
    }
}
