//! Subscriber setup for the broker's structured logs.
//!
//! Everything is filtered through `EnvFilter`: `RUST_LOG` wins when set,
//! otherwise the configured filter is used. Delivery workers log per-record
//! events at `debug` under the `broker::delivery` target.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Filter used when neither the config nor `RUST_LOG` says otherwise.
pub const DEFAULT_FILTER: &str = "info,broker=info,pubsub_demo=info";

/// Target of the per-record delivery logs.
pub const DELIVERY_TARGET: &str = "broker::delivery";

/// Logging options for the demo binary and the test suites.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// `EnvFilter` directives, e.g. "info,broker::group=debug"
    pub filter: String,
    /// One JSON object per event instead of human-readable lines
    pub json: bool,
    /// Log span open/close (consumer registrations, rebalances)
    pub span_events: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
            span_events: false,
        }
    }
}

impl TracingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Appends one directive to the current filter.
    pub fn with_directive(mut self, directive: &str) -> Self {
        if self.filter.is_empty() {
            self.filter = directive.to_string();
        } else {
            self.filter = format!("{},{directive}", self.filter);
        }
        self
    }

    /// Turns on per-record delivery logs.
    pub fn with_delivery_debug(self) -> Self {
        self.with_directive(&format!("{DELIVERY_TARGET}=debug"))
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn with_span_events(mut self, span_events: bool) -> Self {
        self.span_events = span_events;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.filter))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Installs the global subscriber.
///
/// Returns false if one was already installed, so callers may race.
pub fn init_tracing(config: TracingConfig) -> bool {
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    // Exactly one of the two layers is present.
    let json_layer = config.json.then(|| {
        fmt::layer()
            .json()
            .with_span_events(span_events.clone())
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });
    let text_layer = (!config.json).then(|| {
        fmt::layer()
            .with_span_events(span_events)
            .with_target(true)
            .compact()
    });

    let installed = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(filter = %config.filter, json = config.json, "Broker logging initialized");
    }
    installed
}

/// Installs the subscriber from `RUST_LOG`, `LOG_JSON` and
/// `LOG_DELIVERIES` (per-record delivery logs).
pub fn init_tracing_from_env() -> bool {
    init_tracing(config_from_env(|key| std::env::var(key).ok()))
}

fn config_from_env(var: impl Fn(&str) -> Option<String>) -> TracingConfig {
    let flag = |key: &str| {
        var(key)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    };

    let mut config = TracingConfig::new().with_json(flag("LOG_JSON"));
    if let Some(filter) = var("RUST_LOG") {
        config = config.with_filter(filter);
    }
    if flag("LOG_DELIVERIES") {
        config = config.with_delivery_debug();
    }
    config
}

/// Turns on broker logs in tests when `TEST_LOG` is set.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn maybe_start_test_logging() {
    if std::env::var("TEST_LOG").is_ok() {
        init_tracing(
            TracingConfig::new()
                .with_filter("broker=debug,integration_tests=debug")
                .with_delivery_debug(),
        );
    }
}
