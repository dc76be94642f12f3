//! Log output for the `crucible` binary.
//!
//! Logs always go to stderr: `crucible run` relays the program's own output
//! on stdout and the two must not interleave. A process has one global
//! subscriber, so only the first [`init_tracing`] call has any effect.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `level` when set. With `json` every event is one
/// JSON object per line, matching the `--json` report mode.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let text = (!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));
    let lines = json.then(|| fmt::layer().with_target(false).with_writer(std::io::stderr).json());

    // Already installed: keep the first one.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(lines)
        .try_init();
}
