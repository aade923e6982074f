use crate::aggregator::MetricsSnapshot;
use crate::report::ReportCollector;
use crate::sample::{MetricKind, Sample};
use crate::threshold::ThresholdReport;
use anyhow::Context;
use gust_core::prelude::DelegatedShutdownListener;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::runtime::Runtime;
use tokio::select;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Write every sample to disk as one JSON object per line.
///
/// Writing happens on a background task so that VUs never wait on the file system. The file is
/// named `<scenario>-<unix seconds>.jsonl` inside the configured directory.
pub struct JsonlFileReportCollector {
    join_handle: JoinHandle<()>,
    writer: UnboundedSender<SampleRecord>,
    flush_complete: Arc<AtomicBool>,
}

/// On-disk form of a [Sample].
#[derive(Debug, Serialize)]
pub(crate) struct SampleRecord {
    timestamp_ms: u64,
    metric: String,
    kind: MetricKind,
    value: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    tags: BTreeMap<String, String>,
}

impl From<&Sample> for SampleRecord {
    fn from(sample: &Sample) -> Self {
        Self {
            timestamp_ms: unix_millis(sample.timestamp()),
            metric: sample.metric().to_string(),
            kind: sample.kind(),
            value: sample.value(),
            tags: sample.tags().clone(),
        }
    }
}

impl JsonlFileReportCollector {
    pub fn new(
        runtime: &Runtime,
        shutdown_listener: DelegatedShutdownListener,
        dir: PathBuf,
        scenario_name: String,
    ) -> Self {
        let flush_complete = Arc::new(AtomicBool::new(false));
        let (join_handle, writer) = start_sample_file_write_task(
            runtime,
            shutdown_listener,
            dir,
            scenario_name,
            flush_complete.clone(),
        );

        Self {
            join_handle,
            writer,
            flush_complete,
        }
    }
}

impl ReportCollector for JsonlFileReportCollector {
    fn add_sample(&mut self, sample: &Sample) {
        if let Err(e) = self.writer.send(SampleRecord::from(sample)) {
            if self.flush_complete.load(Ordering::Relaxed) {
                log::info!("Failed to write sample because the write task has finished: {e}");
            } else {
                log::warn!("Failed to write sample: {e}");
            }
        }
    }

    fn finalize(&self, _snapshot: &MetricsSnapshot, _thresholds: &ThresholdReport) {
        let wait_started = std::time::Instant::now();
        let mut notify_timer = std::time::Instant::now();
        while !self.flush_complete.load(Ordering::Relaxed) {
            if notify_timer.elapsed().as_secs() > 10 {
                log::warn!(
                    "Still waiting for samples to flush after {} seconds.",
                    wait_started.elapsed().as_secs()
                );
                notify_timer = std::time::Instant::now();
            }

            // If the write task has exited then there's no point trying to wait for it to finish
            // any longer.
            if self.join_handle.is_finished() {
                break;
            }

            std::thread::sleep(std::time::Duration::from_millis(100));
        }

        log::debug!(
            "Samples flushed after {} seconds",
            wait_started.elapsed().as_secs()
        );
    }
}

fn start_sample_file_write_task(
    runtime: &Runtime,
    mut shutdown_listener: DelegatedShutdownListener,
    dir: PathBuf,
    scenario_name: String,
    flush_complete: Arc<AtomicBool>,
) -> (JoinHandle<()>, UnboundedSender<SampleRecord>) {
    let (writer, mut receiver) = tokio::sync::mpsc::unbounded_channel::<SampleRecord>();
    let join_handle = runtime.spawn(async move {
        let path = dir.join(format!(
            "{}-{}.jsonl",
            scenario_name,
            unix_millis(SystemTime::now()) / 1000
        ));

        let file = match open_sample_file(&dir, &path).await {
            Ok(file) => file,
            Err(e) => {
                log::error!("Sample file reporter is disabled: {e:?}");
                flush_complete.store(true, Ordering::Relaxed);
                return;
            }
        };
        let mut file = BufWriter::new(file);

        // Listen and write samples until shutdown
        loop {
            select! {
                _ = shutdown_listener.wait_for_shutdown() => {
                    log::debug!("Shutting down sample file reporter");
                    break;
                }
                record = receiver.recv() => {
                    match record {
                        Some(record) => write_record(&mut file, &record).await,
                        None => break,
                    }
                }
            }
        }

        log::debug!("Draining any remaining samples before shutting down...");
        let mut drain_count = 0;

        while let Ok(record) = receiver.try_recv() {
            write_record(&mut file, &record).await;
            drain_count += 1;

            if drain_count % 1000 == 0 {
                log::debug!("Drained {} remaining samples", drain_count);
            }
        }

        // Ensure everything that's buffered has been written to disk.
        if let Err(e) = file.flush().await {
            log::error!("Failed to flush sample file {}: {e}", path.display());
        }

        log::debug!("Drained {} remaining samples", drain_count);

        // Signal the 'finalize' method that the write task has finished.
        flush_complete.store(true, Ordering::Relaxed);
    });

    (join_handle, writer)
}

async fn open_sample_file(dir: &Path, path: &Path) -> anyhow::Result<File> {
    if !dir.exists() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Could not create directory {}", dir.display()))?;
    }

    File::options()
        .create_new(true)
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("Could not create sample file {}", path.display()))
}

async fn write_record<W>(writer: &mut W, record: &SampleRecord)
where
    W: AsyncWriteExt + Unpin,
{
    let result = async {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        anyhow::Ok(())
    }
    .await;

    if let Err(e) = result {
        log::warn!("Failed to write sample for {}: {e}", record.metric);
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
