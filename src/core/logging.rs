use std::env;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::core::config::AppPaths;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Targets that are chatty at info level; capped unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: [&str; 4] = ["ort", "tokenizers", "hyper", "tower_http"];

pub fn init(paths: &AppPaths) {
    let log_dir = &paths.log_dir;
    let _ = std::fs::create_dir_all(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, "server.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(non_blocking);

    let _ = tracing_subscriber::registry()
        .with(build_filter())
        .with(stdout_layer)
        .with(file_layer)
        .try_init();
}

fn build_filter() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let level = env::var("LOG_LEVEL").unwrap_or_default();
    EnvFilter::new(default_directives(&level))
}

fn default_directives(level: &str) -> String {
    let level = match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        _ => "info",
    };

    let mut directives = vec![level.to_string()];
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    directives.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_level_falls_back_to_info() {
        let directives = default_directives("verbose");
        assert!(directives.starts_with("info,"));
    }

    #[test]
    fn third_party_targets_are_capped() {
        let directives = default_directives("DEBUG");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("ort=warn"));
        assert!(directives.contains("tower_http=warn"));
    }
}
