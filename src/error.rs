use crate::config::ConfigurationError;
use crate::control_plane::ControlPlaneError;
use crate::hooks::HookError;
use crate::persistence::PersistenceError;

/// Crate-wide error taxonomy. Callers can match on the variant to tell
/// caller mistakes (`NotFound`, `InvalidState`, `CycleDetected`) apart from
/// backend failures (`Persistence`, `ControlPlane`, `Hook`).
#[derive(Debug, thiserror::Error)]
pub enum ProcplaneError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("reference cycle detected involving project '{0}'")]
    CycleDetected(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("control plane failure: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    #[error("lifecycle hook '{hook}' failed: {source}")]
    Hook {
        hook: &'static str,
        #[source]
        source: HookError,
    },

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl ProcplaneError {
    pub fn processor_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "processor",
            id: id.to_string(),
        }
    }

    pub fn project_not_found(project_id: impl ToString) -> Self {
        Self::NotFound {
            kind: "project",
            id: project_id.to_string(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// True for errors caused by the request itself rather than by a
    /// backend, i.e. retrying without changing the request cannot succeed.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::InvalidState(_) | Self::CycleDetected(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProcplaneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = ProcplaneError::processor_not_found("018f2a3c");
        assert_eq!(err.to_string(), "processor not found: 018f2a3c");
        assert!(err.is_caller_error());
    }

    #[test]
    fn test_backend_errors_are_not_caller_errors() {
        let err = ProcplaneError::from(PersistenceError::Unavailable("closed".into()));
        assert!(!err.is_caller_error());
    }
}
