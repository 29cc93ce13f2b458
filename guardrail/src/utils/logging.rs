//! Logging initialization for embedding applications and tests.
//!
//! Sets up a global `tracing` subscriber once per process. Verbosity comes
//! from `RUST_LOG` when set, otherwise from the `log_level` argument with
//! `guardrail` bumped to `debug`. With `log_to_file` a daily rolling file is
//! written to the user cache directory; if that directory cannot be created
//! the logger falls back to stderr so audit events are never silently lost.

use anyhow::Result;
use directories::ProjectDirs;
use std::{io::stderr, sync::Once};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    init_logging("trace", false).expect("failed to initialize test logging");
}

/// Initializes the logging system. Safe to call more than once; only the
/// first call takes effect.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},guardrail=debug")));

        let file_appender = if log_to_file {
            ProjectDirs::from("dev", "Guardrail", "guardrail").and_then(|dirs| {
                let log_dir = dirs.cache_dir();
                std::fs::create_dir_all(log_dir)
                    .ok()
                    .map(|_| tracing_appender::rolling::daily(log_dir, "guardrail.log"))
            })
        } else {
            None
        };

        match file_appender {
            Some(appender) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(non_blocking).with_ansi(false))
                    .init();
                // The guard is leaked so buffered lines are flushed at exit.
                Box::leak(Box::new(guard));
            }
            None => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(stderr).with_ansi(true))
                    .init();
            }
        }
    });

    Ok(())
}
