//! Tracing subscriber setup for processes that drive campaigns.
//!
//! Campaigns run for hours and are usually tailed or shipped to a log
//! aggregator, so JSON output is a first-class option. HTTP client noise
//! from registry discovery is capped at `warn` unless `RUST_LOG` says
//! otherwise.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable selecting the log format (`json` or `pretty`).
pub const LOG_FORMAT_ENV: &str = "QUANTBENCH_LOG_FORMAT";

const QUIET_DEPENDENCIES: &str = "hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn";

fn default_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},{QUIET_DEPENDENCIES}", level.as_str())))
}

/// Install the global subscriber.
///
/// * `json` - newline-delimited JSON lines carrying span fields such as
///   `campaign_id`.
/// * `level` - default verbosity when `RUST_LOG` is not set.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = default_filter(level);
    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).json().with_current_span(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// [`init_tracing`] with the format taken from `QUANTBENCH_LOG_FORMAT`.
pub fn init_tracing_from_env(level: Level) {
    init_tracing(wants_json(std::env::var(LOG_FORMAT_ENV).ok().as_deref()), level);
}

fn wants_json(format: Option<&str>) -> bool {
    format.is_some_and(|f| f.trim().eq_ignore_ascii_case("json"))
}
