//! Structured logging setup.
//!
//! Stderr gets a compact, env-filtered layer; a rolling daily file under
//! `<state root>/logs/` keeps a persistent copy (one file per day). The
//! debug flag widens the default filter.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::paths;

/// Initialize the global subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init(debug: bool) {
    let default_filter = if debug {
        "appforge=debug,info"
    } else {
        "appforge=info,warn"
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let logs_dir = paths::logs_dir();
    let _ = paths::ensure_dir_all(&logs_dir);
    let file_appender = tracing_appender::rolling::daily(logs_dir.as_std_path(), "appforge.log");

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init();
}
