use tracing::trace;

// Lightweight metrics helpers layered on tracing targets, alongside the
// Prometheus recorder installed at startup.

pub fn inc_requests(route: &'static str) {
    trace!(target = "teed.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "teed.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}
