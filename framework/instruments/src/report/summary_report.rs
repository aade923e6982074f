mod tables;

use crate::aggregator::{MetricSummary, MetricsSnapshot};
use crate::metrics::{CHECKS, CHECK_TAG};
use crate::report::summary_report::tables::{
    float2, percent, CheckRow, MetricRow, ThresholdRow,
};
use crate::report::ReportCollector;
use crate::sample::{MetricKind, Sample};
use crate::threshold::ThresholdReport;
use std::collections::BTreeMap;
use tabled::settings::Style;
use tabled::Table;

/// Prints a summary of every metric, check and threshold when the run finishes.
///
/// Metric statistics come from the aggregator snapshot. Checks are grouped by name here because
/// the aggregator only keeps one series per metric.
#[derive(Default)]
pub struct SummaryReportCollector {
    checks: BTreeMap<String, (u64, u64)>,
}

impl SummaryReportCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn metric_rows(snapshot: &MetricsSnapshot) -> Vec<MetricRow> {
        snapshot
            .iter()
            .map(|(name, summary)| metric_row(name, summary))
            .collect()
    }

    pub(crate) fn check_rows(&self) -> Vec<CheckRow> {
        self.checks
            .iter()
            .map(|(check, (passes, fails))| CheckRow {
                check: check.clone(),
                passes: *passes,
                fails: *fails,
                rate: percent(Some(*passes as f64 / (*passes + *fails) as f64)),
            })
            .collect()
    }

    pub(crate) fn threshold_rows(thresholds: &ThresholdReport) -> Vec<ThresholdRow> {
        thresholds
            .results()
            .iter()
            .map(|result| ThresholdRow {
                metric: result.metric.clone(),
                threshold: result.expression.clone(),
                observed: float2(result.observed),
                result: if result.passed { "✓ pass" } else { "✗ fail" }.to_string(),
            })
            .collect()
    }

    fn print_summary(&self, snapshot: &MetricsSnapshot, thresholds: &ThresholdReport) {
        println!("\nSummary of metrics");
        let mut table = Table::new(Self::metric_rows(snapshot));
        table.with(Style::modern());
        println!("{table}");

        let checks = self.check_rows();
        if !checks.is_empty() {
            println!("\nChecks");
            let mut table = Table::new(checks);
            table.with(Style::modern());
            println!("{table}");
        }

        let rows = Self::threshold_rows(thresholds);
        if !rows.is_empty() {
            println!("\nThresholds");
            let mut table = Table::new(rows);
            table.with(Style::modern());
            println!("{table}");
        }

        println!(
            "\nResult: {}",
            if thresholds.passed() { "PASSED" } else { "FAILED" }
        );
    }
}

fn metric_row(name: &str, summary: &MetricSummary) -> MetricRow {
    let trend = summary.kind() == MetricKind::Trend;
    let when_trend = |value: Option<f64>| float2(value.filter(|_| trend));

    MetricRow {
        metric: name.to_string(),
        kind: summary.kind().to_string(),
        count: summary.count(),
        avg: when_trend(summary.avg()),
        min: float2(summary.min()),
        med: when_trend(summary.median()),
        max: float2(summary.max()),
        p90: when_trend(summary.percentile(90.0)),
        p95: when_trend(summary.percentile(95.0)),
        p99: when_trend(summary.percentile(99.0)),
        rate: match summary.kind() {
            MetricKind::Rate => percent(summary.rate()),
            _ => "-".to_string(),
        },
    }
}

impl ReportCollector for SummaryReportCollector {
    fn add_sample(&mut self, sample: &Sample) {
        if sample.metric() != CHECKS {
            return;
        }

        let name = sample.tag(CHECK_TAG).unwrap_or("unnamed");
        let entry = self.checks.entry(name.to_string()).or_insert((0, 0));
        if sample.value() != 0.0 {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
    }

    fn finalize(&self, snapshot: &MetricsSnapshot, thresholds: &ThresholdReport) {
        self.print_summary(snapshot, thresholds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::MetricsAggregator;
    use crate::metrics::{HTTP_REQ_DURATION, HTTP_REQ_FAILED};
    use crate::threshold::{evaluate_thresholds, Threshold};
    use pretty_assertions::assert_eq;

    #[test]
    fn checks_are_grouped_by_name() {
        let mut collector = SummaryReportCollector::new();
        for passed in [true, true, false, true] {
            collector.add_sample(
                &Sample::rate(CHECKS, passed)
                    .with_tag(CHECK_TAG, "status is 200")
                    .with_outcome(passed),
            );
        }
        collector.add_sample(
            &Sample::rate(CHECKS, false)
                .with_tag(CHECK_TAG, "fast")
                .with_outcome(false),
        );
        collector.add_sample(&Sample::trend_ms(HTTP_REQ_DURATION, 4.0));

        let rows = collector
            .check_rows()
            .into_iter()
            .map(|row| (row.check, row.passes, row.fails, row.rate))
            .collect::<Vec<_>>();

        assert_eq!(
            vec![
                ("fast".to_string(), 0, 1, "0.00%".to_string()),
                ("status is 200".to_string(), 3, 1, "75.00%".to_string()),
            ],
            rows
        );
    }

    #[test]
    fn rows_only_show_statistics_that_apply() {
        let aggregator = MetricsAggregator::new();
        aggregator
            .ingest(&Sample::trend_ms(HTTP_REQ_DURATION, 10.0))
            .unwrap();
        aggregator
            .ingest(&Sample::rate(HTTP_REQ_FAILED, true).with_outcome(false))
            .unwrap();
        let snapshot = aggregator.snapshot();

        let rows = SummaryReportCollector::metric_rows(&snapshot);
        assert_eq!(2, rows.len());

        let duration = &rows[0];
        assert_eq!(HTTP_REQ_DURATION, duration.metric);
        assert_eq!("10.00", duration.avg);
        assert_eq!("-", duration.rate);

        let failed = &rows[1];
        assert_eq!(HTTP_REQ_FAILED, failed.metric);
        assert_eq!("-", failed.p95);
        assert_eq!("100.00%", failed.rate);

        let thresholds = evaluate_thresholds(
            &[Threshold::parse(HTTP_REQ_FAILED, "rate<0.1").unwrap()],
            &snapshot,
        );
        let threshold_rows = SummaryReportCollector::threshold_rows(&thresholds);
        assert_eq!("1.00", threshold_rows[0].observed);
        assert_eq!("✗ fail", threshold_rows[0].result);
    }
}
