//! Service counters, emitted as trace events under `tl.metrics`.
//!
//! No exporter is wired in; any subscriber that enables TRACE for these events can
//! aggregate them.

use std::time::Duration;
use tracing::trace;

/// One hit on an API route.
pub fn api_request(route: &'static str) {
    trace!(target = "tl.metrics", route, "api_requests_total_inc");
}

/// Wall time of one pipeline stage (`fetch_auction`, `fetch_manifest`, `process`).
pub fn stage_elapsed(stage: &'static str, elapsed: Duration) {
    trace!(
        target = "tl.metrics",
        stage,
        elapsed_ms = elapsed.as_millis() as u64,
        "pipeline_stage_elapsed"
    );
}

pub fn fetch_attempt(client: &'static str, outcome: &'static str) {
    trace!(
        target = "tl.metrics",
        client,
        outcome,
        "fetch_attempts_total_inc"
    );
}

/// One worksheet link handled by the batch loop; `outcome` is `ok` or `failed`.
pub fn batch_link(outcome: &'static str) {
    trace!(target = "tl.metrics", outcome, "batch_links_total_inc");
}

pub fn batch_finished(cancelled: bool, processed: usize, failed: usize) {
    trace!(
        target = "tl.metrics",
        cancelled,
        processed = processed as u64,
        failed = failed as u64,
        "batch_runs_total_inc"
    );
}
