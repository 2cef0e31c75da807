//! Tracing setup.
//!
//! The subscriber is installed once by the binary. Library code only emits
//! events; it never configures output.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Build filter directives string from LoggingConfig
///
/// Appends one `netgauge::<component>=<level>` directive per configured
/// component to the base level.
///
/// # Examples
///
/// ```
/// use netgauge::config::LoggingConfig;
/// use netgauge::logging::build_filter_directives;
/// use std::collections::BTreeMap;
///
/// let mut component_levels = BTreeMap::new();
/// component_levels.insert("throughput".to_string(), "debug".to_string());
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     component_levels: Some(component_levels),
///     ..Default::default()
/// };
///
/// assert_eq!(build_filter_directives(&config), "info,netgauge::throughput=debug");
/// ```
pub fn build_filter_directives(config: &LoggingConfig) -> String {
    let mut filter_str = config.level.clone();

    if let Some(component_levels) = &config.component_levels {
        for (component, level) in component_levels {
            filter_str.push_str(&format!(",netgauge::{}={}", component, level));
        }
    }

    filter_str
}

/// Install the global subscriber. `RUST_LOG` takes precedence over config.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter_str = build_filter_directives(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    match config.format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .try_init()?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .try_init()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_base_level_only() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            ..Default::default()
        };
        assert_eq!(build_filter_directives(&config), "warn");
    }

    #[test]
    fn test_component_levels_sorted() {
        let mut levels = BTreeMap::new();
        levels.insert("throughput".to_string(), "trace".to_string());
        levels.insert("engine".to_string(), "debug".to_string());
        let config = LoggingConfig {
            level: "info".to_string(),
            component_levels: Some(levels),
            ..Default::default()
        };
        assert_eq!(
            build_filter_directives(&config),
            "info,netgauge::engine=debug,netgauge::throughput=trace"
        );
    }

    #[test]
    fn test_directives_parse_as_filter() {
        let mut levels = BTreeMap::new();
        levels.insert("latency".to_string(), "debug".to_string());
        let config = LoggingConfig {
            component_levels: Some(levels),
            ..Default::default()
        };
        assert!(EnvFilter::try_new(build_filter_directives(&config)).is_ok());
    }
}
