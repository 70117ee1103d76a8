//! Tracing initialisation for the `tfpolicy` binary.
//!
//! Log lines go to stderr so command output on stdout stays parseable.
//! Subsequent calls are ignored; the global subscriber can only be set once.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "TFPOLICY_LOG";

/// Initialise the global tracing subscriber.
///
/// * `json` emits newline-delimited JSON log lines.
/// * `level` is the default verbosity when neither `TFPOLICY_LOG` nor
///   `RUST_LOG` is set.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
