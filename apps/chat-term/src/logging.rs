//! Tracing/logging bootstrap for the terminal app.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,chat_term=debug,chat_client=debug";

/// Initialize the global tracing subscriber with severity gating from environment.
///
/// Output goes to stderr so it never interleaves with the rendered view on stdout.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `CHAT_TERM_LOG`
/// 3) `CHAT_LOG`
/// 4) internal default filter
pub fn init() {
    let env_filter = filter_from_env();
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    for key in ["CHAT_TERM_LOG", "CHAT_LOG"] {
        if let Some(value) = env::var(key).ok().filter(|v| !v.trim().is_empty())
            && let Ok(filter) = EnvFilter::try_new(value)
        {
            return filter;
        }
    }

    EnvFilter::new(DEFAULT_FILTER)
}
