//! Console logging setup on the tracing ecosystem.
//!
//! Logs go to stdout; shipping and analysis happen outside this crate. Level
//! resolution: `LOG_LEVEL` wins, then `RUST_LOG`, then a default derived from
//! the deployment environment (`info` in production, `debug` otherwise). Set
//! `LOG_FORMAT=json` for newline-delimited JSON suitable for log pipelines.

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static INIT_GUARD: OnceLock<()> = OnceLock::new();

/// Install the console subscriber. Later calls are no-ops, so library users
/// and tests may call this freely.
pub fn init_tracing() {
    INIT_GUARD.get_or_init(|| {
        let environment = deployment_environment();
        let level = resolve_level(&environment);
        let ansi = IsTerminal::is_terminal(&std::io::stdout());
        let json = std::env::var("LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let installed = if json {
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_level(true)
                .with_filter(EnvFilter::new(&level));
            tracing_subscriber::registry().with(layer).try_init().is_ok()
        } else {
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(ansi)
                .with_filter(EnvFilter::new(&level));
            tracing_subscriber::registry().with(layer).try_init().is_ok()
        };

        if installed {
            tracing::info!(
                environment = %environment,
                level = %level,
                ansi = ansi,
                json = json,
                "Tracing subscriber installed"
            );
        } else {
            // The host already installed one; ours stands down.
            tracing::debug!("Tracing subscriber already present, keeping it");
        }
    });
}

fn deployment_environment() -> String {
    std::env::var("STOCKYARD_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn resolve_level(environment: &str) -> String {
    std::env::var("LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map(|level| level.to_lowercase())
        .unwrap_or_else(|_| {
            if environment == "production" {
                "info".to_string()
            } else {
                "debug".to_string()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_tracing();
        init_tracing();
        assert!(INIT_GUARD.get().is_some());
    }
}
