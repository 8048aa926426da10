//! Logging for `relpipe` runs.
//!
//! The external tools own stdout; relpipe's own log lines go to stderr
//! only, so the linter's findings or the artifact's version text can be
//! piped on untouched.
//!
//! The default level is WARN, which keeps a passing run silent apart from
//! the tools themselves. `-v` adds stage and run lifecycle events at INFO,
//! `-vv` adds removed paths and manifest hashes at DEBUG. `RUST_LOG` overrides
//! both, e.g. `RUST_LOG=relpipe_ci=debug`. `--json` switches to one JSON
//! object per line for CI log shippers; the `event` field of each lifecycle
//! line is stable (see [`crate::obs`]).

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the process-wide subscriber.
///
/// `level` applies only when `RUST_LOG` is unset or unparsable. Later calls
/// are ignored, so tests may call this freely.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .ok();
}

/// Map a `-v` repeat count onto a default level.
pub fn level_for_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    }
}
