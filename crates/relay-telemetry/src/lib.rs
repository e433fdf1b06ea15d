mod metrics;

pub use metrics::{HistogramSummary, MetricType, MetricsRecorder, MetricsSnapshot};

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "relay_queue" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit one JSON object per line instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Directive string handed to `EnvFilter` when RUST_LOG is unset.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Handle returned by [`init_telemetry`]. Owns the process-wide metrics recorder.
pub struct TelemetryGuard {
    metrics: Arc<MetricsRecorder>,
    installed: bool,
}

impl TelemetryGuard {
    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }

    /// Whether this call installed the global subscriber. False when one was
    /// already set (tests, embedding).
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Initialize logging and metrics. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    let installed = tracing_subscriber::registry().with(fmt_layer).try_init().is_ok();
    if !installed {
        eprintln!("relay-telemetry: global subscriber already set, keeping it");
    }

    TelemetryGuard {
        metrics: Arc::new(MetricsRecorder::new()),
        installed,
    }
}

/// Parse a level name as written in settings files (`"debug"`, `"WARN"`).
pub fn parse_level(raw: &str) -> Option<Level> {
    raw.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_info_pretty() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, Level::INFO);
        assert!(!config.json);
        assert_eq!(config.filter_directives(), "info");
    }

    #[test]
    fn module_levels_appear_in_directives() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("relay_acceptor".into(), Level::DEBUG),
                ("relay_queue".into(), Level::TRACE),
            ],
            json: true,
        };
        assert_eq!(
            config.filter_directives(),
            "warn,relay_acceptor=debug,relay_queue=trace"
        );
    }

    #[test]
    fn parse_level_accepts_any_case() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level(" WARN "), Some(Level::WARN));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn second_init_keeps_first_subscriber() {
        let first = init_telemetry(TelemetryConfig::default());
        let second = init_telemetry(TelemetryConfig::default());
        // At most one of them can own the global subscriber.
        assert!(!(first.installed() && second.installed()));
        second.metrics().counter_inc("x", &[], 1);
        assert_eq!(second.metrics().counter_get("x", &[]), 1);
        assert_eq!(first.metrics().counter_get("x", &[]), 0);
    }
}
