use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::utils::timing::TIMING_TARGET;

/// Daily-rolled files under the log directory. Request logs and the merge
/// timing log are kept apart, each as plain text and as JSON lines.
const SERVER_LOG: &str = "server.log";
const SERVER_JSONL: &str = "server.jsonl";
const TIMING_LOG: &str = "timing.log";
const TIMING_JSONL: &str = "timing.jsonl";

/// Flushes the background writers when dropped; hold it for the life of `main`.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

fn parse_log_level(value: &str) -> LevelFilter {
    match value.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

/// Everything except the timing target. HTTP client internals stay at WARN so
/// provider calls do not flood the request log.
fn general_filter(level: LevelFilter) -> Targets {
    Targets::new()
        .with_default(level)
        .with_target(TIMING_TARGET, LevelFilter::OFF)
        .with_target("tower_http", level)
        .with_target("hyper", LevelFilter::WARN)
        .with_target("hyper_util", LevelFilter::WARN)
        .with_target("reqwest", LevelFilter::WARN)
}

fn timing_filter() -> Targets {
    Targets::new()
        .with_default(LevelFilter::OFF)
        .with_target(TIMING_TARGET, LevelFilter::INFO)
}

fn rolling_writer(log_dir: &Path, file_name: &str, guards: &mut Vec<WorkerGuard>) -> NonBlocking {
    let appender = tracing_appender::rolling::daily(log_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    guards.push(guard);
    writer
}

pub fn init_logging(log_dir: &Path, log_level: &str) -> LoggingGuards {
    if let Err(err) = fs::create_dir_all(log_dir) {
        eprintln!(
            "Failed to create log directory '{}': {err}",
            log_dir.display()
        );
    }

    let mut guards = Vec::with_capacity(4);
    let server_writer = rolling_writer(log_dir, SERVER_LOG, &mut guards);
    let server_json_writer = rolling_writer(log_dir, SERVER_JSONL, &mut guards);
    let timing_writer = rolling_writer(log_dir, TIMING_LOG, &mut guards);
    let timing_json_writer = rolling_writer(log_dir, TIMING_JSONL, &mut guards);

    let general = general_filter(parse_log_level(log_level));
    let timing = timing_filter();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(general.clone()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(server_writer)
                .with_ansi(false)
                .with_filter(general.clone()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(server_json_writer)
                .with_filter(general),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(timing_writer)
                .with_ansi(false)
                .with_filter(timing.clone()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(timing_json_writer)
                .with_filter(timing),
        )
        .init();

    LoggingGuards { _guards: guards }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn unknown_levels_default_to_info() {
        assert_eq!(parse_log_level("WARNING"), LevelFilter::WARN);
        assert_eq!(parse_log_level(" debug "), LevelFilter::DEBUG);
        assert_eq!(parse_log_level("verbose"), LevelFilter::INFO);
    }

    #[test]
    fn timing_events_only_reach_the_timing_files() {
        let general = general_filter(LevelFilter::DEBUG);
        let timing = timing_filter();

        assert!(!general.would_enable(TIMING_TARGET, &Level::INFO));
        assert!(timing.would_enable(TIMING_TARGET, &Level::INFO));
        assert!(!timing.would_enable("image_merge_server::pipeline", &Level::INFO));
        assert!(general.would_enable("image_merge_server::pipeline", &Level::DEBUG));
    }

    #[test]
    fn http_client_internals_stay_quiet() {
        let general = general_filter(LevelFilter::TRACE);

        assert!(!general.would_enable("hyper_util::client", &Level::INFO));
        assert!(!general.would_enable("reqwest::connect", &Level::DEBUG));
        assert!(general.would_enable("reqwest::connect", &Level::WARN));
        assert!(general.would_enable("tower_http::trace", &Level::TRACE));
    }

    #[test]
    fn configured_level_caps_request_logs() {
        let general = general_filter(parse_log_level("warn"));

        assert!(!general.would_enable("image_merge_server::server", &Level::INFO));
        assert!(general.would_enable("image_merge_server::server", &Level::WARN));
        assert!(!general.would_enable("tower_http::trace", &Level::INFO));
    }
}
