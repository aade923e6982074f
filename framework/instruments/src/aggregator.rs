use crate::sample::{MetricKind, Sample};
use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Significant figures kept by trend histograms. Relative error of any percentile is below 0.1%.
const TREND_SIGNIFICANT_FIGURES: u8 = 3;

/// Trend values are recorded in microseconds so that sub-millisecond timings keep their precision.
const TREND_SCALE: f64 = 1000.0;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("metric `{metric}` is a {existing} but received a {received} sample")]
    KindMismatch {
        metric: String,
        existing: MetricKind,
        received: MetricKind,
    },
    #[error("metric `{metric}` ({kind}) cannot record the value {value}")]
    InvalidValue {
        metric: String,
        kind: MetricKind,
        value: f64,
    },
    #[error("histogram for metric `{metric}` rejected a value: {reason}")]
    Histogram { metric: String, reason: String },
}

/// Collects samples from any number of virtual users.
///
/// Each metric has its own lock, so VUs reporting different metrics do not contend. A sample is
/// applied to its metric entirely or, if [MetricsAggregator::ingest] returns an error, not at all.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    series: RwLock<HashMap<String, Arc<Series>>>,
    ingested: AtomicU64,
}

#[derive(Debug)]
struct Series {
    kind: MetricKind,
    stats: Mutex<SeriesStats>,
}

#[derive(Debug, Clone)]
struct SeriesStats {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
    non_zero: u64,
    failed: u64,
    histogram: Option<Histogram<u64>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&self, sample: &Sample) -> Result<(), IngestError> {
        let series = self.series_for(sample)?;
        series.stats.lock().record(sample)?;
        self.ingested.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Total number of samples that have been accepted.
    pub fn ingested(&self) -> u64 {
        self.ingested.load(Ordering::Relaxed)
    }

    /// Point in time copy of every metric. Ingestion can continue while the copy is used.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let series = self.series.read();
        let metrics = series
            .iter()
            .map(|(name, series)| {
                let stats = series.stats.lock().clone();
                (name.clone(), MetricSummary::new(series.kind, stats))
            })
            .collect();

        MetricsSnapshot {
            metrics,
            ingested: self.ingested(),
        }
    }

    fn series_for(&self, sample: &Sample) -> Result<Arc<Series>, IngestError> {
        if let Some(series) = self.series.read().get(sample.metric()) {
            return check_kind(series, sample).map(|_| series.clone());
        }

        let mut guard = self.series.write();
        if let Some(series) = guard.get(sample.metric()) {
            return check_kind(series, sample).map(|_| series.clone());
        }

        log::trace!("Registering metric {} ({})", sample.metric(), sample.kind());
        let series = Arc::new(Series {
            kind: sample.kind(),
            stats: Mutex::new(SeriesStats::new(sample.metric(), sample.kind())?),
        });
        guard.insert(sample.metric().to_string(), series.clone());

        Ok(series)
    }
}

fn check_kind(series: &Series, sample: &Sample) -> Result<(), IngestError> {
    if series.kind != sample.kind() {
        return Err(IngestError::KindMismatch {
            metric: sample.metric().to_string(),
            existing: series.kind,
            received: sample.kind(),
        });
    }

    Ok(())
}

/// Auto-resizing histogram, so there is no upper bound to configure.
fn trend_histogram(metric: &str, significant_figures: u8) -> Result<Histogram<u64>, IngestError> {
    Histogram::new(significant_figures).map_err(|e| IngestError::Histogram {
        metric: metric.to_string(),
        reason: format!("{e:?}"),
    })
}

impl SeriesStats {
    fn new(metric: &str, kind: MetricKind) -> Result<Self, IngestError> {
        let histogram = match kind {
            MetricKind::Trend => Some(trend_histogram(metric, TREND_SIGNIFICANT_FIGURES)?),
            _ => None,
        };

        Ok(Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            last: 0.0,
            non_zero: 0,
            failed: 0,
            histogram,
        })
    }

    /// Everything that can fail happens before the first field is updated.
    fn record(&mut self, sample: &Sample) -> Result<(), IngestError> {
        let value = sample.value();
        let kind = sample.kind();

        let negative_allowed = matches!(kind, MetricKind::Gauge | MetricKind::Rate);
        if !value.is_finite() || (value < 0.0 && !negative_allowed) {
            return Err(IngestError::InvalidValue {
                metric: sample.metric().to_string(),
                kind,
                value,
            });
        }

        if let Some(histogram) = self.histogram.as_mut() {
            let scaled = (value * TREND_SCALE).round();
            if scaled > u64::MAX as f64 {
                return Err(IngestError::InvalidValue {
                    metric: sample.metric().to_string(),
                    kind,
                    value,
                });
            }

            histogram
                .record(scaled as u64)
                .map_err(|e| IngestError::Histogram {
                    metric: sample.metric().to_string(),
                    reason: format!("{e:?}"),
                })?;
        }

        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last = value;
        if value != 0.0 {
            self.non_zero += 1;
        }
        if sample.is_failure() {
            self.failed += 1;
        }

        Ok(())
    }
}

/// Aggregated view of one metric.
#[derive(Debug, Clone)]
pub struct MetricSummary {
    kind: MetricKind,
    stats: SeriesStats,
}

impl MetricSummary {
    fn new(kind: MetricKind, stats: SeriesStats) -> Self {
        Self { kind, stats }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn count(&self) -> u64 {
        self.stats.count
    }

    pub fn sum(&self) -> f64 {
        self.stats.sum
    }

    pub fn failed(&self) -> u64 {
        self.stats.failed
    }

    pub fn min(&self) -> Option<f64> {
        self.non_empty(self.stats.min)
    }

    pub fn max(&self) -> Option<f64> {
        self.non_empty(self.stats.max)
    }

    pub fn avg(&self) -> Option<f64> {
        self.non_empty(self.stats.sum / self.stats.count as f64)
    }

    /// The most recent value, which is what a gauge reports.
    pub fn last(&self) -> Option<f64> {
        self.non_empty(self.stats.last)
    }

    /// Fraction of samples with a non-zero value.
    pub fn rate(&self) -> Option<f64> {
        self.non_empty(self.stats.non_zero as f64 / self.stats.count as f64)
    }

    /// Fraction of samples tagged with a failed outcome.
    pub fn error_rate(&self) -> Option<f64> {
        self.non_empty(self.stats.failed as f64 / self.stats.count as f64)
    }

    /// Percentile in the range `0..=100`. Only trends keep the distribution needed for this.
    pub fn percentile(&self, percentile: f64) -> Option<f64> {
        let histogram = self.stats.histogram.as_ref()?;
        if histogram.len() == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        Some(histogram.value_at_quantile(percentile / 100.0) as f64 / TREND_SCALE)
    }

    pub fn median(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    fn non_empty(&self, value: f64) -> Option<f64> {
        (self.stats.count > 0).then_some(value)
    }
}

/// Every metric the aggregator knows about at one point in time, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    metrics: BTreeMap<String, MetricSummary>,
    ingested: u64,
}

impl MetricsSnapshot {
    pub fn get(&self, metric: &str) -> Option<&MetricSummary> {
        self.metrics.get(metric)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricSummary)> {
        self.metrics.iter()
    }

    pub fn ingested(&self) -> u64 {
        self.ingested
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{HTTP_REQ_DURATION, HTTP_REQ_FAILED};

    fn ingest_all(aggregator: &MetricsAggregator, samples: impl IntoIterator<Item = Sample>) {
        for sample in samples {
            aggregator.ingest(&sample).unwrap();
        }
    }

    #[test]
    fn error_rate_is_failed_over_total() {
        let aggregator = MetricsAggregator::new();
        let outcomes = [true, false, true, true, false, true, true, false, true, true, true];
        ingest_all(
            &aggregator,
            outcomes
                .iter()
                .map(|ok| Sample::rate(HTTP_REQ_FAILED, !ok).with_outcome(*ok)),
        );

        let snapshot = aggregator.snapshot();
        let summary = snapshot.get(HTTP_REQ_FAILED).unwrap();
        let failed = outcomes.iter().filter(|ok| !**ok).count();

        assert_eq!(outcomes.len() as u64, summary.count());
        assert_eq!(failed as u64, summary.failed());
        assert_eq!(
            Some(failed as f64 / outcomes.len() as f64),
            summary.error_rate()
        );
        assert_eq!(summary.error_rate(), summary.rate());
    }

    #[test]
    fn percentiles_of_one_to_hundred() {
        let aggregator = MetricsAggregator::new();
        ingest_all(
            &aggregator,
            (1..=100).map(|ms| Sample::trend_ms(HTTP_REQ_DURATION, ms as f64)),
        );

        let snapshot = aggregator.snapshot();
        let summary = snapshot.get(HTTP_REQ_DURATION).unwrap();

        let p95 = summary.percentile(95.0).unwrap();
        let p99 = summary.percentile(99.0).unwrap();
        let med = summary.median().unwrap();
        assert!((p95 - 95.0).abs() <= 1.0, "p95 was {p95}");
        assert!((p99 - 99.0).abs() <= 1.0, "p99 was {p99}");
        assert!((med - 50.0).abs() <= 1.0, "median was {med}");

        assert_eq!(Some(1.0), summary.min());
        assert_eq!(Some(100.0), summary.max());
        assert_eq!(Some(50.5), summary.avg());
    }

    #[test]
    fn percentile_out_of_range_is_none() {
        let aggregator = MetricsAggregator::new();
        aggregator
            .ingest(&Sample::trend_ms(HTTP_REQ_DURATION, 12.0))
            .unwrap();
        let snapshot = aggregator.snapshot();
        let summary = snapshot.get(HTTP_REQ_DURATION).unwrap();

        assert!(summary.percentile(101.0).is_none());
        assert!(summary.percentile(-1.0).is_none());
    }

    #[test]
    fn percentiles_only_for_trends() {
        let aggregator = MetricsAggregator::new();
        aggregator.ingest(&Sample::counter("http_reqs", 1.0)).unwrap();
        let snapshot = aggregator.snapshot();

        assert!(snapshot.get("http_reqs").unwrap().percentile(95.0).is_none());
    }

    #[test]
    fn kind_mismatch_is_rejected_without_side_effects() {
        let aggregator = MetricsAggregator::new();
        aggregator.ingest(&Sample::counter("things", 2.0)).unwrap();

        let err = aggregator
            .ingest(&Sample::trend_ms("things", 3.0))
            .unwrap_err();
        assert!(matches!(err, IngestError::KindMismatch { .. }));

        let snapshot = aggregator.snapshot();
        assert_eq!(1, snapshot.get("things").unwrap().count());
        assert_eq!(1, aggregator.ingested());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let aggregator = MetricsAggregator::new();

        assert!(aggregator
            .ingest(&Sample::trend_ms(HTTP_REQ_DURATION, -1.0))
            .is_err());
        assert!(aggregator
            .ingest(&Sample::counter("http_reqs", f64::NAN))
            .is_err());
        assert!(aggregator.ingest(&Sample::gauge("vus", -1.0)).is_ok());
        assert_eq!(1, aggregator.ingested());
    }

    #[test]
    fn histogram_creation_failure_is_reported() {
        assert!(trend_histogram(HTTP_REQ_DURATION, TREND_SIGNIFICANT_FIGURES).is_ok());

        // hdrhistogram supports at most 5 significant figures.
        match trend_histogram(HTTP_REQ_DURATION, 6) {
            Err(IngestError::Histogram { metric, .. }) => assert_eq!(HTTP_REQ_DURATION, metric),
            other => panic!("expected a histogram error, got {other:?}"),
        }
    }

    #[test]
    fn concurrent_ingestion_loses_nothing() {
        let aggregator = Arc::new(MetricsAggregator::new());
        let writers = 50;
        let per_writer = 200;

        let handles = (0..writers)
            .map(|writer| {
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    for i in 0..per_writer {
                        aggregator
                            .ingest(&Sample::trend_ms(HTTP_REQ_DURATION, (i % 50) as f64))
                            .unwrap();
                        aggregator
                            .ingest(
                                &Sample::rate(HTTP_REQ_FAILED, writer % 2 == 0)
                                    .with_outcome(writer % 2 != 0),
                            )
                            .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = aggregator.snapshot();
        let total = (writers * per_writer) as u64;
        assert_eq!(total * 2, snapshot.ingested());
        assert_eq!(total, snapshot.get(HTTP_REQ_DURATION).unwrap().count());

        let failed = snapshot.get(HTTP_REQ_FAILED).unwrap();
        assert_eq!(total, failed.count());
        assert_eq!(total / 2, failed.failed());
        assert_eq!(Some(0.5), failed.error_rate());
    }
}
