use crate::aggregator::{MetricSummary, MetricsSnapshot};
use crate::metrics::builtin_kind;
use crate::sample::MetricKind;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThresholdParseError {
    #[error("threshold has no metric name")]
    MissingMetric,
    #[error("threshold `{0}` has no comparison operator, expected one of <, <=, >, >=, ==, !=")]
    MissingOperator(String),
    #[error("unknown aggregation `{0}`, expected avg, min, max, med, count, rate, value or p(N)")]
    UnknownAggregation(String),
    #[error("percentile `{0}` must be a number between 0 and 100")]
    InvalidPercentile(String),
    #[error("threshold bound `{0}` is not a number")]
    InvalidBound(String),
    #[error("`{aggregation}` cannot be applied to `{metric}`, which is a {kind}")]
    NotApplicable {
        metric: String,
        aggregation: Aggregation,
        kind: MetricKind,
    },
}

/// The statistic a threshold reads from a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Value,
    Percentile(f64),
}

impl Aggregation {
    fn parse(s: &str) -> Result<Self, ThresholdParseError> {
        let s = s.trim();
        let aggregation = match s {
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "med" => Aggregation::Med,
            "count" => Aggregation::Count,
            "rate" => Aggregation::Rate,
            "value" => Aggregation::Value,
            _ => {
                // Both `p(95)` and the shorter `p95` are accepted.
                let Some(rest) = s.strip_prefix('p') else {
                    return Err(ThresholdParseError::UnknownAggregation(s.to_string()));
                };
                let inner = rest
                    .strip_prefix('(')
                    .and_then(|r| r.strip_suffix(')'))
                    .unwrap_or(rest)
                    .trim();
                let percentile: f64 = inner
                    .parse()
                    .map_err(|_| ThresholdParseError::InvalidPercentile(inner.to_string()))?;
                if !(0.0..=100.0).contains(&percentile) {
                    return Err(ThresholdParseError::InvalidPercentile(inner.to_string()));
                }
                Aggregation::Percentile(percentile)
            }
        };

        Ok(aggregation)
    }

    pub fn applies_to(&self, kind: MetricKind) -> bool {
        match self {
            Aggregation::Avg
            | Aggregation::Min
            | Aggregation::Max
            | Aggregation::Med
            | Aggregation::Percentile(_) => kind == MetricKind::Trend,
            Aggregation::Count => true,
            Aggregation::Rate => kind == MetricKind::Rate,
            Aggregation::Value => kind == MetricKind::Gauge,
        }
    }

    fn observe(&self, summary: &MetricSummary) -> Option<f64> {
        if !self.applies_to(summary.kind()) {
            return None;
        }

        match self {
            Aggregation::Avg => summary.avg(),
            Aggregation::Min => summary.min(),
            Aggregation::Max => summary.max(),
            Aggregation::Med => summary.median(),
            Aggregation::Percentile(p) => summary.percentile(*p),
            // A counter counts its total, everything else counts its samples.
            Aggregation::Count => match summary.kind() {
                MetricKind::Counter => Some(summary.sum()),
                _ => Some(summary.count() as f64),
            },
            Aggregation::Rate => summary.rate(),
            Aggregation::Value => summary.last(),
        }
    }
}

impl Display for Aggregation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Aggregation::Avg => write!(f, "avg"),
            Aggregation::Min => write!(f, "min"),
            Aggregation::Max => write!(f, "max"),
            Aggregation::Med => write!(f, "med"),
            Aggregation::Count => write!(f, "count"),
            Aggregation::Rate => write!(f, "rate"),
            Aggregation::Value => write!(f, "value"),
            Aggregation::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    // Two character operators come first so that `<=` is not read as `<`.
    const OPERATORS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            // Exact, as in k6. Counts, sums and last values are usually whole numbers anyway.
            Comparison::Eq => observed == bound,
            Comparison::Ne => observed != bound,
        }
    }
}

/// A pass/fail criterion over one aggregated metric, written as in `p(95)<500` or `rate<0.1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    metric: String,
    expression: String,
    aggregation: Aggregation,
    comparison: Comparison,
    bound: f64,
}

impl Threshold {
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ThresholdParseError> {
        let metric = metric.trim();
        if metric.is_empty() {
            return Err(ThresholdParseError::MissingMetric);
        }

        let expression = expression.trim();
        let (position, token, comparison) = Comparison::OPERATORS
            .iter()
            .filter_map(|(token, comparison)| {
                expression
                    .find(token)
                    .map(|position| (position, *token, *comparison))
            })
            // Earliest operator wins, ties go to the longer token listed first.
            .min_by_key(|(position, _, _)| *position)
            .ok_or_else(|| ThresholdParseError::MissingOperator(expression.to_string()))?;

        let aggregation = Aggregation::parse(&expression[..position])?;
        let bound_str = expression[position + token.len()..].trim();
        let bound: f64 = bound_str
            .parse()
            .map_err(|_| ThresholdParseError::InvalidBound(bound_str.to_string()))?;

        if let Some(kind) = builtin_kind(metric) {
            if !aggregation.applies_to(kind) {
                return Err(ThresholdParseError::NotApplicable {
                    metric: metric.to_string(),
                    aggregation,
                    kind,
                });
            }
        }

        Ok(Self {
            metric: metric.to_string(),
            expression: expression.to_string(),
            aggregation,
            comparison,
            bound,
        })
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    pub fn comparison(&self) -> Comparison {
        self.comparison
    }

    pub fn bound(&self) -> f64 {
        self.bound
    }

    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdResult {
        let observed = snapshot
            .get(&self.metric)
            .and_then(|summary| self.aggregation.observe(summary));

        let passed = observed
            .map(|observed| self.comparison.holds(observed, self.bound))
            .unwrap_or(false);

        ThresholdResult {
            metric: self.metric.clone(),
            expression: self.expression.clone(),
            observed,
            passed,
        }
    }
}

impl Display for Threshold {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    /// `None` when the metric has no samples or the aggregation does not apply to it.
    pub observed: Option<f64>,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdReport {
    results: Vec<ThresholdResult>,
}

impl ThresholdReport {
    /// True when every threshold passed, including when there are no thresholds.
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn results(&self) -> &[ThresholdResult] {
        &self.results
    }

    pub fn failed(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

pub fn evaluate_thresholds(thresholds: &[Threshold], snapshot: &MetricsSnapshot) -> ThresholdReport {
    ThresholdReport {
        results: thresholds.iter().map(|t| t.evaluate(snapshot)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::MetricsAggregator;
    use crate::metrics::{HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS, VUS};
    use crate::sample::Sample;
    use pretty_assertions::assert_eq;

    /// 100 durations where the 95th value is `p95` and the 99th is `p99`.
    fn durations_snapshot(p95: f64, p99: f64) -> MetricsSnapshot {
        let aggregator = MetricsAggregator::new();
        for i in 1..=100 {
            let value = match i {
                1..=94 => 100.0,
                95..=98 => p95,
                _ => p99,
            };
            aggregator
                .ingest(&Sample::trend_ms(HTTP_REQ_DURATION, value))
                .unwrap();
        }
        aggregator.snapshot()
    }

    fn latency_thresholds() -> Vec<Threshold> {
        vec![
            Threshold::parse(HTTP_REQ_DURATION, "p(95)<500").unwrap(),
            Threshold::parse(HTTP_REQ_DURATION, "p(99)<1000").unwrap(),
        ]
    }

    #[test]
    fn parse_percentile_threshold() {
        let threshold = Threshold::parse(HTTP_REQ_DURATION, "p(95)<500").unwrap();
        assert_eq!(Aggregation::Percentile(95.0), threshold.aggregation());
        assert_eq!(Comparison::Lt, threshold.comparison());
        assert_eq!(500.0, threshold.bound());
        assert_eq!("http_req_duration: p(95)<500", threshold.to_string());
    }

    #[test]
    fn parse_with_whitespace_and_short_percentile() {
        let threshold = Threshold::parse(HTTP_REQ_DURATION, " p95 <= 250.5 ").unwrap();
        assert_eq!(Aggregation::Percentile(95.0), threshold.aggregation());
        assert_eq!(Comparison::Le, threshold.comparison());
        assert_eq!(250.5, threshold.bound());
    }

    #[test]
    fn parse_every_operator() {
        for (expression, comparison) in [
            ("rate<0.1", Comparison::Lt),
            ("rate<=0.1", Comparison::Le),
            ("rate>0.1", Comparison::Gt),
            ("rate>=0.1", Comparison::Ge),
            ("rate==0.1", Comparison::Eq),
            ("rate!=0.1", Comparison::Ne),
        ] {
            let threshold = Threshold::parse(HTTP_REQ_FAILED, expression).unwrap();
            assert_eq!(comparison, threshold.comparison(), "{expression}");
        }
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            ThresholdParseError::MissingOperator("p(95)".to_string()),
            Threshold::parse(HTTP_REQ_DURATION, "p(95)").unwrap_err()
        );
        assert_eq!(
            ThresholdParseError::UnknownAggregation("mean".to_string()),
            Threshold::parse(HTTP_REQ_DURATION, "mean<5").unwrap_err()
        );
        assert_eq!(
            ThresholdParseError::InvalidPercentile("120".to_string()),
            Threshold::parse(HTTP_REQ_DURATION, "p(120)<5").unwrap_err()
        );
        assert_eq!(
            ThresholdParseError::InvalidBound("fast".to_string()),
            Threshold::parse(HTTP_REQ_DURATION, "avg<fast").unwrap_err()
        );
        assert_eq!(
            ThresholdParseError::MissingMetric,
            Threshold::parse(" ", "avg<5").unwrap_err()
        );
        assert!(matches!(
            Threshold::parse(HTTP_REQ_FAILED, "p(95)<5").unwrap_err(),
            ThresholdParseError::NotApplicable { .. }
        ));
    }

    #[test]
    fn latency_within_thresholds_passes() {
        let snapshot = durations_snapshot(400.0, 900.0);
        let report = evaluate_thresholds(&latency_thresholds(), &snapshot);

        assert!(report.passed());
        assert_eq!(2, report.results().len());
        let p95 = report.results()[0].observed.unwrap();
        assert!((p95 - 400.0).abs() < 1.0, "p95 was {p95}");
    }

    #[test]
    fn slow_p95_fails() {
        let snapshot = durations_snapshot(600.0, 900.0);
        let report = evaluate_thresholds(&latency_thresholds(), &snapshot);

        assert!(!report.passed());
        let failed = report.failed().collect::<Vec<_>>();
        assert_eq!(1, failed.len());
        assert_eq!("p(95)<500", failed[0].expression);
    }

    #[test]
    fn missing_metric_fails_without_observation() {
        let snapshot = MetricsAggregator::new().snapshot();
        let threshold = Threshold::parse(HTTP_REQ_FAILED, "rate<0.1").unwrap();
        let result = threshold.evaluate(&snapshot);

        assert_eq!(None, result.observed);
        assert!(!result.passed);
    }

    #[test]
    fn custom_metric_with_wrong_aggregation_fails() {
        let aggregator = MetricsAggregator::new();
        aggregator
            .ingest(&Sample::counter("orders_placed", 4.0))
            .unwrap();
        let threshold = Threshold::parse("orders_placed", "avg<10").unwrap();

        let result = threshold.evaluate(&aggregator.snapshot());
        assert_eq!(None, result.observed);
        assert!(!result.passed);
    }

    #[test]
    fn count_rate_and_value() {
        let aggregator = MetricsAggregator::new();
        for _ in 0..3 {
            aggregator.ingest(&Sample::counter(HTTP_REQS, 2.0)).unwrap();
        }
        for failed in [true, false, false, false] {
            aggregator
                .ingest(&Sample::rate(HTTP_REQ_FAILED, failed).with_outcome(!failed))
                .unwrap();
        }
        aggregator.ingest(&Sample::gauge(VUS, 7.0)).unwrap();
        aggregator.ingest(&Sample::gauge(VUS, 3.0)).unwrap();
        let snapshot = aggregator.snapshot();

        let report = evaluate_thresholds(
            &[
                Threshold::parse(HTTP_REQS, "count==6").unwrap(),
                Threshold::parse(HTTP_REQ_FAILED, "rate<0.1").unwrap(),
                Threshold::parse(VUS, "value==3").unwrap(),
            ],
            &snapshot,
        );

        let observed = report
            .results()
            .iter()
            .map(|r| (r.observed, r.passed))
            .collect::<Vec<_>>();
        assert_eq!(
            vec![(Some(6.0), true), (Some(0.25), false), (Some(3.0), true)],
            observed
        );
        assert!(!report.passed());
    }

    #[test]
    fn equality_is_exact_for_large_bounds() {
        let aggregator = MetricsAggregator::new();
        aggregator.ingest(&Sample::counter(HTTP_REQS, 1_000_000.0)).unwrap();
        aggregator.ingest(&Sample::counter(HTTP_REQS, 0.5)).unwrap();
        aggregator.ingest(&Sample::gauge(VUS, 1_000_000.5)).unwrap();
        let snapshot = aggregator.snapshot();

        let report = evaluate_thresholds(
            &[
                Threshold::parse(HTTP_REQS, "count==1000000.5").unwrap(),
                Threshold::parse(HTTP_REQS, "count!=1000000.5").unwrap(),
                Threshold::parse(VUS, "value==1000000.25").unwrap(),
                Threshold::parse(VUS, "value!=1000000.25").unwrap(),
            ],
            &snapshot,
        );

        let passed = report.results().iter().map(|r| r.passed).collect::<Vec<_>>();
        assert_eq!(vec![true, false, false, true], passed);
    }

    #[test]
    fn no_thresholds_pass() {
        let report = evaluate_thresholds(&[], &MetricsSnapshot::default());
        assert!(report.passed());
    }
}
