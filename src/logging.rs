//! Diagnostics for the pipeline.
//!
//! Pipeline components report through [`crate::log_event!`] and
//! [`crate::debug_event!`], which print `[component] event: detail`. Levels
//! come from the `[logging]` table unless `RUST_LOG` is set.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"
//!
//! [logging.modules]
//! tapewatch = "info"
//! ```
//!
//! # Overriding from the shell
//!
//! ```bash
//! RUST_LOG=debug tapewatch watch -w ./incoming
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// `HH:MM:SS.mmm` in local time.
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// `default,module=level,...`, modules sorted so the result is stable.
fn filter_directives(config: &LoggingConfig) -> String {
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();
    std::iter::once(config.default.clone())
        .chain(modules.into_iter().map(|(module, level)| format!("{module}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// `RUST_LOG` when present, the settings otherwise.
fn env_filter(config: &LoggingConfig) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(filter_directives(config)),
    }
}

/// Install the subscriber for `config`.
///
/// Only the first call has an effect.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_timer(CompactTime)
            .with_filter(env_filter(config));

        // An embedding application may already own the global subscriber
        let _ = tracing_subscriber::registry().with(layer).try_init();
    });
}

/// Install the subscriber at the default `warn` level.
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Info-level pipeline event, e.g. a file entering the queue.
///
/// ```ignore
/// log_event!("debouncer", "enqueued", "{} ({priority})", path.display());
/// log_event!("orchestrator", "started");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Same shape as [`log_event!`] at debug level. Used for the quiet
/// rejections (in flight, cooldown).
///
/// ```ignore
/// debug_event!("debouncer", "cooldown", "{}", path.display());
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}
