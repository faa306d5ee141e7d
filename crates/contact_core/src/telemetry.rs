//! Tracing subscriber setup for binaries and services embedding the pipeline

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::{PipelineError, Result};

fn level_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).map_err(|e| PipelineError::Configuration(format!("observability.log_level: {}", e)))
}

/// Filter from `RUST_LOG`, falling back to the configured level
fn env_filter(config: &ObservabilityConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => level_filter(&config.log_level),
    }
}

/// Install the global tracing subscriber
///
/// JSON output when `json_logs` is set, human-readable otherwise. Fails if
/// a global subscriber is already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = env_filter(config)?;

    let installed = if config.json_logs {
        // JSON format for production
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };

    installed.map_err(|e| PipelineError::Initialization(format!("tracing subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert!(level_filter("info").is_ok());
        assert!(level_filter("contact_core=debug,hickory_resolver=warn").is_ok());
        assert!(matches!(level_filter("contact_core=loud"), Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn test_second_init_fails() {
        let config = ObservabilityConfig::default();
        let first = init_tracing(&config);
        let second = init_tracing(&config);

        // Another test may have installed the subscriber first
        assert!(first.is_err() || second.is_err());
        assert!(matches!(second, Err(PipelineError::Initialization(_))));
    }
}
