//! Logging service

use crate::models::LogLevel;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Initialize logging with the specified level
///
/// `RUST_LOG`, when set, takes precedence over `level`.
pub fn init_logging(level: LogLevel) -> anyhow::Result<()> {
    let directive = match level {
        LogLevel::Error => "chairside_core=error,chairside=error",
        LogLevel::Warn => "chairside_core=warn,chairside=warn",
        LogLevel::Info => "chairside_core=info,chairside=info",
        LogLevel::Debug => "chairside_core=debug,chairside=debug",
        LogLevel::Trace => "chairside_core=trace,chairside=trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Log a run lifecycle event
pub fn log_run_event(run_id: Uuid, workflow: &str, event: &str, node: Option<&str>) {
    tracing::info!(
        run_id = %run_id,
        workflow = workflow,
        event = event,
        node = node.unwrap_or(""),
        "Workflow run event"
    );
}

/// Log a credential lookup; never receives secret values
pub fn log_credential_access(system: &str, outcome: &str) {
    tracing::info!(system = system, outcome = outcome, "Credential lookup");
}

/// Log a system error
pub fn log_error(error: &str, context: Option<&str>) {
    tracing::error!(
        error = error,
        context = context.unwrap_or(""),
        "System error occurred"
    );
}
