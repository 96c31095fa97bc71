//! Logging infrastructure - structured tracing for the collector
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log level via environment
//! - Zero-cost when disabled
//! - Per-phase GC events with counts and durations

use once_cell::sync::OnceCell;
use std::io;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // TRACEGC_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("TRACEGC_LOG_LEVEL") {
            config.level = match level_str.to_lowercase().as_str() {
                "trace" => Level::TRACE,
                "debug" => Level::DEBUG,
                "info" => Level::INFO,
                "warn" => Level::WARN,
                "error" => Level::ERROR,
                _ => Level::INFO,
            };
        }

        // TRACEGC_LOG_JSON: enable JSON format
        config.json_format = std::env::var("TRACEGC_LOG_JSON").is_ok();

        // TRACEGC_LOG_SPANS: show span events
        config.show_spans = std::env::var("TRACEGC_LOG_SPANS").is_ok();

        config
    }

    /// Create high-performance config (minimal logging)
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            json_format: false,
            show_spans: false,
        }
    }
}

/// Initialize logging with default configuration
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("tracegc={}", config.level.as_str().to_lowercase()))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let fmt_layer = fmt::layer()
            .with_writer(io::stdout)
            .with_span_events(span_events)
            .with_target(true)
            .with_thread_ids(cfg!(debug_assertions));

        if config.json_format {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer.json())
                .init();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
        }
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Collector-specific logging functions
// ============================================================================

/// Log the start of a trace
pub fn log_gc_start(registered: usize) {
    use tracing::debug;
    debug!(
        event = "gc_start",
        registered_objects = registered,
        "Starting collection pass"
    );
}

/// Log mark-phase completion
pub fn log_gc_mark(marked: usize) {
    use tracing::debug;
    debug!(
        event = "gc_mark",
        objects_marked = marked,
        "Mark phase complete"
    );
}

/// Log sweep-phase completion
pub fn log_gc_sweep(swept: usize) {
    use tracing::debug;
    debug!(
        event = "gc_sweep",
        objects_swept = swept,
        "Sweep phase complete"
    );
}

/// Log collection-pass completion
pub fn log_gc_complete(duration_us: u64, swept: usize, surviving: usize) {
    use tracing::info;
    info!(
        event = "gc_complete",
        duration_us = duration_us,
        objects_swept = swept,
        objects_surviving = surviving,
        "Collection pass complete"
    );
}

/// Log an event-queue overflow (producer will retry)
pub fn log_queue_full(capacity: usize) {
    use tracing::warn;
    warn!(
        event = "queue_full",
        capacity = capacity,
        "Collector event queue is full; retrying"
    );
}
