use std::time::Instant;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Add the prometheus endpoint to a router, should be called last.
pub fn setup_metrics_routes(router: Router) -> Router {
    let recorder_handle = setup_metrics_recorder();
    router.route(
        "/metrics",
        get(move || std::future::ready(recorder_handle.render())),
    )
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    const BUCKETS: &[f64] = &[
        1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)
        .unwrap()
        .install_recorder()
        .unwrap()
}

// Shorthand for common metric types
pub fn inc(name: &'static str, labels: &[(String, String)], value: u64) {
    metrics::counter!(name, labels).increment(value);
}

pub fn gauge(name: &'static str, labels: &[(String, String)], value: f64) {
    metrics::gauge!(name, labels).set(value);
}

pub fn histogram(name: &'static str, labels: &[(String, String)], value: f64) {
    metrics::histogram!(name, labels).record(value);
}

/// A guard that records the time between creation and drop as a histogram
/// entry, in milliseconds.
pub struct TimingGuard<'a> {
    name: &'static str,
    labels: TimingGuardLabels<'a>,
    start: Instant,
}

pub fn timing_guard<'a>(name: &'static str, labels: &'a [(String, String)]) -> TimingGuard<'a> {
    TimingGuard {
        name,
        labels: TimingGuardLabels::new(labels),
        start: Instant::now(),
    }
}

// Timing guards start out cheap to construct, but pushing extra labels onto
// them allocates. This enum tracks that state.
enum TimingGuardLabels<'a> {
    None,
    Borrowed(&'a [(String, String)]),
    Owned(Vec<(String, String)>),
}

impl TimingGuard<'_> {
    /// Consumes the guard, so "label this span and immediately report the
    /// timing" is a one-liner (simply don't re-bind the return value).
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.push_label(key, value);
        self
    }

    pub fn fin(self) {}
}

impl Drop for TimingGuard<'_> {
    fn drop(&mut self) {
        let labels = self.labels.as_slice();
        metrics::histogram!(self.name, labels).record(self.start.elapsed().as_millis() as f64);
    }
}

impl<'a> TimingGuardLabels<'a> {
    fn new(labels: &'a [(String, String)]) -> Self {
        if labels.is_empty() {
            TimingGuardLabels::None
        } else {
            TimingGuardLabels::Borrowed(labels)
        }
    }

    fn as_slice(&self) -> &[(String, String)] {
        match self {
            TimingGuardLabels::None => &[],
            TimingGuardLabels::Borrowed(labels) => labels,
            TimingGuardLabels::Owned(labels) => labels,
        }
    }

    fn push_label(&mut self, key: &str, value: &str) {
        match self {
            TimingGuardLabels::None => {
                *self = TimingGuardLabels::Owned(vec![(key.to_string(), value.to_string())]);
            }
            TimingGuardLabels::Borrowed(labels) => {
                let mut existing = labels.to_vec();
                existing.push((key.to_string(), value.to_string()));
                *self = TimingGuardLabels::Owned(existing);
            }
            TimingGuardLabels::Owned(labels) => {
                labels.push((key.to_string(), value.to_string()));
            }
        };
    }
}
