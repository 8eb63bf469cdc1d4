use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Initialize logging from the `[logging]` config section.
///
/// `RUST_LOG` wins over the configured level when it is set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if config.json {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
            .wrap_err("Failed to install JSON tracing subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
            .wrap_err("Failed to install console tracing subscriber")?;
    }

    tracing::info!(
        level = %config.level,
        json = config.json,
        "Conduit logging initialized"
    );
    Ok(())
}

fn level_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))
}

/// Span for a long-running gateway component such as the response pump.
pub fn component_span(component: &str) -> tracing::Span {
    tracing::info_span!("component", name = component)
}

/// Span for one bridged request, from publish until it is settled.
pub fn create_request_span(domain: &str, event_type: &str, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "bridge_request",
        domain = domain,
        event_type = event_type,
        correlation_id = correlation_id,
        outcome = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter() {
        assert!(level_filter("debug").is_ok());
        assert!(level_filter("info,conduit=trace").is_ok());
        assert!(level_filter("conduit=notalevel").is_err());
    }

    #[test]
    fn test_create_request_span() {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = create_request_span("orders", "ORDER_GET", "abc");
            assert_eq!(span.metadata().map(|m| m.name()), Some("bridge_request"));
        });
    }

    #[test]
    fn test_component_span() {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = component_span("response_pump");
            assert_eq!(span.metadata().map(|m| m.name()), Some("component"));
        });
    }
}
