//! Logging initialisation for the rig server.
//!
//! Call [`init_tracing`] once at process startup, before the Tokio runtime
//! is built.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `LABRIG_LOG_FORMAT=json` | Emit newline-delimited JSON logs. Overrides `server.log_format`. |
//!
//! # Example
//!
//! ```rust,no_run
//! labrig_runtime::telemetry::init_tracing("compact");
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// `true` when logs should be JSON. The environment wins over the
/// configured value.
fn wants_json(env_format: Option<&str>, configured: &str) -> bool {
    env_format
        .unwrap_or(configured)
        .trim()
        .eq_ignore_ascii_case("json")
}

/// Install the global `tracing` subscriber.
///
/// `configured_format` is the `server.log_format` value from the config
/// file; `"json"` selects JSON output, anything else the compact formatter.
pub fn init_tracing(configured_format: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let env_format = std::env::var("LABRIG_LOG_FORMAT").ok();

    if wants_json(env_format.as_deref(), configured_format) {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_overrides_config() {
        assert!(wants_json(Some("json"), "compact"));
        assert!(!wants_json(Some("compact"), "json"));
        assert!(wants_json(None, " JSON "));
        assert!(!wants_json(None, "compact"));
    }
}
