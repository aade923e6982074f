//! Names of the metrics that Gust records on its own.

use crate::sample::MetricKind;

/// Number of HTTP requests made.
pub const HTTP_REQS: &str = "http_reqs";
/// Time from sending an HTTP request until the full response body was read, in milliseconds.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// Share of HTTP requests that failed, either at the transport level or with an unexpected status.
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
/// Response body bytes received.
pub const DATA_RECEIVED: &str = "data_received";
/// Number of completed scenario iterations.
pub const ITERATIONS: &str = "iterations";
/// Wall time of one scenario iteration, in milliseconds.
pub const ITERATION_DURATION: &str = "iteration_duration";
/// Share of checks that passed.
pub const CHECKS: &str = "checks";
/// Active virtual users.
pub const VUS: &str = "vus";
/// Highest target the stage profile will reach.
pub const VUS_MAX: &str = "vus_max";

/// Tag holding the check name on [CHECKS] samples.
pub const CHECK_TAG: &str = "check";

/// The kind of a built-in metric, or `None` for a custom metric.
pub fn builtin_kind(metric: &str) -> Option<MetricKind> {
    match metric {
        HTTP_REQS | DATA_RECEIVED | ITERATIONS => Some(MetricKind::Counter),
        HTTP_REQ_DURATION | ITERATION_DURATION => Some(MetricKind::Trend),
        HTTP_REQ_FAILED | CHECKS => Some(MetricKind::Rate),
        VUS | VUS_MAX => Some(MetricKind::Gauge),
        _ => None,
    }
}
