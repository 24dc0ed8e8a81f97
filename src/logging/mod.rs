//! Diagnostics via `tracing`.
//!
//! Status lines for the user (`✓`, `✗`, `⚠`) are printed directly and are
//! not affected by `RUST_LOG`. This subscriber only carries diagnostics:
//! every git invocation and executor transition at `debug`, downgraded
//! failures at `warn`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the level is `warn`, or
/// `git_split=debug` with `--verbose`. Output goes to stderr, compact.
pub fn init(verbose: bool) {
    let default = if verbose { "git_split=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // A second init (tests driving `main` twice) is harmless.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
