use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

/// Tag set on samples that represent a pass/fail outcome. The value is either `pass` or `fail`.
pub const OUTCOME_TAG: &str = "outcome";

/// How the values of a metric are combined by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Cumulative total, for example the number of requests made.
    #[display("counter")]
    Counter,
    /// Point in time value where the latest sample wins, for example the number of active VUs.
    #[display("gauge")]
    Gauge,
    /// Fraction of samples with a non-zero value, for example the share of failed requests.
    #[display("rate")]
    Rate,
    /// Distribution of values that supports percentiles, for example request durations in ms.
    #[display("trend")]
    Trend,
}

/// A single measurement emitted by a virtual user.
///
/// The timestamp is taken when the sample is created, not when it reaches the aggregator, so
/// queueing between the VU and the aggregator does not skew it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    timestamp: SystemTime,
    metric: String,
    kind: MetricKind,
    value: f64,
    tags: BTreeMap<String, String>,
}

impl Sample {
    pub fn new(metric: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            timestamp: SystemTime::now(),
            metric: metric.into(),
            kind,
            value,
            tags: BTreeMap::new(),
        }
    }

    pub fn counter(metric: impl Into<String>, value: f64) -> Self {
        Self::new(metric, MetricKind::Counter, value)
    }

    pub fn gauge(metric: impl Into<String>, value: f64) -> Self {
        Self::new(metric, MetricKind::Gauge, value)
    }

    /// A rate sample counts towards the rate when `hit` is true.
    pub fn rate(metric: impl Into<String>, hit: bool) -> Self {
        Self::new(metric, MetricKind::Rate, if hit { 1.0 } else { 0.0 })
    }

    /// A trend sample with a value in milliseconds.
    pub fn trend_ms(metric: impl Into<String>, millis: f64) -> Self {
        Self::new(metric, MetricKind::Trend, millis)
    }

    pub fn trend_duration(metric: impl Into<String>, duration: Duration) -> Self {
        Self::trend_ms(metric, duration.as_secs_f64() * 1000.0)
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    pub fn with_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.tags
            .extend(tags.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_outcome(self, passed: bool) -> Self {
        self.with_tag(OUTCOME_TAG, if passed { "pass" } else { "fail" })
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }

    pub fn is_failure(&self) -> bool {
        self.tag(OUTCOME_TAG) == Some("fail")
    }
}
