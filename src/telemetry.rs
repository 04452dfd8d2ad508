use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;
use crate::session::ActorId;
use crate::workflows::Workflow;

/// Initialize structured logging. `RUST_LOG` wins over the configured level.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    if config.json_logs {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .with(filter)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .with(filter)
            .try_init()?;
    }

    tracing::info!("fieldflow telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking related operations
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping one unit of work for one actor
pub fn create_actor_span(
    operation: &str,
    actor: &ActorId,
    workflow: Option<Workflow>,
    correlation_id: &str,
) -> tracing::Span {
    tracing::info_span!(
        "actor_flow",
        operation = operation,
        actor.id = %actor,
        workflow = workflow.map(|w| w.as_str()),
        correlation.id = correlation_id,
    )
}

pub fn shutdown_telemetry() {
    tracing::info!("fieldflow telemetry shutdown complete");
}
