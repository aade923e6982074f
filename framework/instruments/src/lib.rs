mod aggregator;
pub mod metrics;
mod report;
mod sample;
mod threshold;

pub use aggregator::{IngestError, MetricSummary, MetricsAggregator, MetricsSnapshot};
pub use report::{
    JsonlFileReportCollector, ReportCollector, ReportConfig, Reporter, SummaryReportCollector,
};
pub use sample::{MetricKind, Sample, OUTCOME_TAG};
pub use threshold::{
    evaluate_thresholds, Aggregation, Comparison, Threshold, ThresholdParseError,
    ThresholdReport, ThresholdResult,
};
