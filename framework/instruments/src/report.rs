mod jsonl_file_reporter;
mod summary_report;

use crate::aggregator::{MetricsAggregator, MetricsSnapshot};
use crate::metrics::{CHECKS, CHECK_TAG};
use crate::sample::Sample;
use crate::threshold::ThresholdReport;
use gust_core::prelude::ShutdownHandle;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;

pub use jsonl_file_reporter::JsonlFileReportCollector;
pub use summary_report::SummaryReportCollector;

/// Receives every sample that the aggregator accepted, and the final results once the run is over.
pub trait ReportCollector: Send {
    fn add_sample(&mut self, sample: &Sample);

    fn finalize(&self, snapshot: &MetricsSnapshot, thresholds: &ThresholdReport);
}

/// Selects the collectors that a [Reporter] feeds.
#[derive(Debug, Default)]
pub struct ReportConfig {
    summary: bool,
    jsonl_dir: Option<PathBuf>,
}

impl ReportConfig {
    /// Print a metrics, checks and thresholds summary to stdout at the end of the run.
    pub fn enable_summary(mut self) -> Self {
        self.summary = true;
        self
    }

    /// Stream every sample to a JSON lines file in `dir`.
    pub fn enable_jsonl_file(mut self, dir: PathBuf) -> Self {
        self.jsonl_dir = Some(dir);
        self
    }

    pub fn init(
        self,
        runtime: &Runtime,
        shutdown_handle: ShutdownHandle,
        scenario_name: &str,
    ) -> Reporter {
        let mut collectors: Vec<Box<dyn ReportCollector>> = Vec::new();

        if self.summary {
            collectors.push(Box::new(SummaryReportCollector::new()));
        }

        if let Some(dir) = self.jsonl_dir {
            collectors.push(Box::new(JsonlFileReportCollector::new(
                runtime,
                shutdown_handle.new_listener(),
                dir,
                scenario_name.to_string(),
            )));
        }

        Reporter::new(collectors, shutdown_handle)
    }
}

/// Entry point for every sample produced during a run.
///
/// Samples are ingested by the [MetricsAggregator] and then passed on to each collector. If the
/// aggregator rejects a sample the run cannot produce a trustworthy result, so the error is kept
/// as the run's fatal error and the shutdown signal is sent.
pub struct Reporter {
    aggregator: Arc<MetricsAggregator>,
    collectors: Vec<Mutex<Box<dyn ReportCollector>>>,
    fatal_error: Mutex<Option<String>>,
    shutdown_handle: ShutdownHandle,
}

impl Reporter {
    pub fn new(collectors: Vec<Box<dyn ReportCollector>>, shutdown_handle: ShutdownHandle) -> Self {
        Self {
            aggregator: Arc::new(MetricsAggregator::new()),
            collectors: collectors.into_iter().map(Mutex::new).collect(),
            fatal_error: Mutex::new(None),
            shutdown_handle,
        }
    }

    pub fn add_sample(&self, sample: Sample) {
        if let Err(e) = self.aggregator.ingest(&sample) {
            log::error!("Failed to record sample, stopping the run: {e}");
            self.fatal_error.lock().get_or_insert_with(|| e.to_string());
            self.shutdown_handle.shutdown();
            return;
        }

        for collector in &self.collectors {
            collector.lock().add_sample(&sample);
        }
    }

    /// Record the outcome of a named check.
    pub fn add_check(&self, name: &str, passed: bool) {
        self.add_sample(
            Sample::rate(CHECKS, passed)
                .with_tag(CHECK_TAG, name)
                .with_outcome(passed),
        );
    }

    pub fn aggregator(&self) -> &Arc<MetricsAggregator> {
        &self.aggregator
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.aggregator.snapshot()
    }

    /// The first ingestion error of the run, if there was one.
    pub fn fatal_error(&self) -> Option<String> {
        self.fatal_error.lock().clone()
    }

    pub fn finalize(&self, snapshot: &MetricsSnapshot, thresholds: &ThresholdReport) {
        for collector in &self.collectors {
            collector.lock().finalize(snapshot, thresholds);
        }
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("ingested", &self.aggregator.ingested())
            .field("collectors", &self.collectors.len())
            .finish()
    }
}
