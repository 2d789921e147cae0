use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

pub const TIMING_TARGET: &str = "merge.timing";

/// Timing record for one inbound merge request, written to the timing log.
#[derive(Debug)]
pub struct RequestTimer {
    operation: String,
    client_address: String,
    style: Option<String>,
    model: Option<String>,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: String,
    detail: Option<String>,
    completed: bool,
}

impl RequestTimer {
    pub fn new(
        operation: &str,
        client_address: &str,
        style: Option<&str>,
        model: Option<&str>,
    ) -> Self {
        RequestTimer {
            operation: operation.to_string(),
            client_address: client_address.to_string(),
            style: style.map(|value| value.to_string()),
            model: model.map(|value| value.to_string()),
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "success".to_string(),
            detail: None,
            completed: false,
        }
    }

    pub fn log_received(&self) {
        info!(
            target: TIMING_TARGET,
            "event=request_received operation={} client={} style={:?} model={:?} received_at={}",
            self.operation,
            self.client_address,
            self.style,
            self.model,
            self.started_at.to_rfc3339()
        );
    }

    pub fn mark_status(&mut self, status: &str, detail: Option<String>) {
        self.status = status.to_string();
        self.detail = detail;
    }

    pub fn log_completed(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let completed_at = Utc::now();
        let duration = self.started_perf.elapsed().as_secs_f64();
        info!(
            target: TIMING_TARGET,
            "event=request_completed operation={} client={} started_at={} completed_at={} duration_s={:.3} status={} detail={}",
            self.operation,
            self.client_address,
            self.started_at.to_rfc3339(),
            completed_at.to_rfc3339(),
            duration,
            self.status,
            self.detail.clone().unwrap_or_default()
        );
    }
}

pub fn start_request_timer(
    operation: &str,
    client_address: &str,
    style: Option<&str>,
    model: Option<&str>,
) -> RequestTimer {
    let timer = RequestTimer::new(operation, client_address, style, model);
    timer.log_received();
    timer
}

pub fn complete_request_timer(timer: &mut RequestTimer, status: &str, detail: Option<String>) {
    timer.mark_status(status, detail);
    timer.log_completed();
}

pub async fn log_llm_timing<T, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, anyhow::Error>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: TIMING_TARGET,
        "event=llm_request provider={} model={} operation={} started_at={} metadata={}",
        provider,
        model,
        operation,
        started_at.to_rfc3339(),
        metadata_text
    );

    let mut status = "success";
    let result = call().await;
    if result.is_err() {
        status = "error";
    }

    let completed_at = Utc::now();
    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: TIMING_TARGET,
        "event=llm_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={} metadata={}",
        provider,
        model,
        operation,
        completed_at.to_rfc3339(),
        duration,
        status,
        metadata_text
    );

    result
}
