//! # Structured Logging Module
//!
//! Tracing initialization plus structured helpers for the operations that
//! matter when debugging a misbehaving deployment: every control-plane
//! call the orchestrator issues is logged with its backend and outcome.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use crate::config::LoggingConfig;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Safe to call more
/// than once, and tolerates a subscriber installed by an embedding
/// application.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

        let result = if config.json {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_filter(filter),
                )
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_filter(filter))
                .try_init()
        };

        if result.is_err() {
            tracing::debug!(
                "global tracing subscriber already initialized; continuing with existing one"
            );
        }
    });
}

/// Log structured data for control-plane operations
pub fn log_control_plane_operation(
    operation: &str,
    backend: &str,
    processor_id: Uuid,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        backend = %backend,
        processor_id = %processor_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🛰️ CONTROL_PLANE_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_initialization_is_safe() {
        let config = LoggingConfig::default();
        init_structured_logging(&config);
        init_structured_logging(&config);
    }

    #[test]
    fn test_operation_logging_does_not_panic() {
        log_control_plane_operation(
            "start_or_update",
            "in-memory",
            Uuid::new_v4(),
            "success",
            Some("replicas=2"),
        );
    }
}
