use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::HashMap;
use std::io::{BufRead, Read, Write};
use std::path::Path;

/// One stage of the load profile as it was configured for a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSummary {
    /// Length of the stage in milliseconds
    pub duration_ms: u64,
    /// Number of virtual users to reach by the end of the stage
    pub target: u64,
}

/// Outcome of one threshold expression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    /// The value the expression was compared against, if the metric had any data
    pub observed: Option<f64>,
    pub passed: bool,
}

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner. Unique for each run.
    pub run_id: String,
    /// The name of the scenario that was run
    pub scenario_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The virtual user count the run started from
    pub start_vus: u64,
    /// The stage profile the run was configured with
    pub stages: Vec<StageSummary>,
    /// The highest number of virtual users that were active at the same time
    ///
    /// This can be lower than the highest stage target if the run was stopped early.
    pub peak_vus: u64,
    /// The number of iterations that completed
    pub iterations: u64,
    /// The result of each threshold, in the order they were configured
    pub thresholds: Vec<ThresholdOutcome>,
    /// Whether every threshold passed
    pub passed: bool,
    /// Environment variables set for the run
    ///
    /// This won't capture all environment variables. Just the ones that the runner is aware of or
    /// that are included by the scenario itself.
    pub env: HashMap<String, String>,
    /// The version of Gust that was used for this run
    pub gust_version: String,
}

impl RunSummary {
    /// Create a new run summary
    ///
    /// Results start out empty and are filled in with [RunSummary::set_results] once the run
    /// has finished.
    pub fn new(
        run_id: String,
        scenario_name: String,
        started_at: i64,
        start_vus: u64,
        stages: Vec<StageSummary>,
        gust_version: String,
    ) -> Self {
        Self {
            run_id,
            scenario_name,
            started_at,
            start_vus,
            stages,
            peak_vus: 0,
            iterations: 0,
            thresholds: Vec::new(),
            passed: false,
            env: HashMap::with_capacity(0),
            gust_version,
        }
    }

    /// Record the results of a finished run
    pub fn set_results(
        &mut self,
        peak_vus: u64,
        iterations: u64,
        thresholds: Vec<ThresholdOutcome>,
    ) {
        self.peak_vus = peak_vus;
        self.iterations = iterations;
        self.passed = thresholds.iter().all(|t| t.passed);
        self.thresholds = thresholds;
    }

    /// Add an environment variable
    pub fn add_env(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint is intended to uniquely identify the configuration used to run the scenario.
    /// It uses the
    ///     - Scenario name
    ///     - Start VUs and stages
    ///     - Threshold expressions
    ///     - Selected environment variables
    ///     - Gust version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.scenario_name.as_bytes());
        Digest::update(&mut hasher, self.start_vus.to_le_bytes());
        for stage in &self.stages {
            Digest::update(&mut hasher, stage.duration_ms.to_le_bytes());
            Digest::update(&mut hasher, stage.target.to_le_bytes());
        }
        self.thresholds
            .iter()
            .sorted_by(|a, b| (&a.metric, &a.expression).cmp(&(&b.metric, &b.expression)))
            .for_each(|t| {
                Digest::update(&mut hasher, t.metric.as_bytes());
                Digest::update(&mut hasher, t.expression.as_bytes());
            });
        self.env
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.as_bytes());
            });
        Digest::update(&mut hasher, self.gust_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the run summary to a file
///
/// The summary will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_run_summary(run_summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary].
pub fn load_summary_runs(path: &Path) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run: RunSummary = serde_json::from_str(&line)?;
        runs.push(run);
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_summary(run_id: &str) -> RunSummary {
        let mut summary = RunSummary::new(
            run_id.to_string(),
            "catalog_browse".to_string(),
            1_700_000_000,
            0,
            vec![
                StageSummary {
                    duration_ms: 30_000,
                    target: 20,
                },
                StageSummary {
                    duration_ms: 90_000,
                    target: 50,
                },
                StageSummary {
                    duration_ms: 30_000,
                    target: 0,
                },
            ],
            "0.1.0".to_string(),
        );
        summary.set_results(
            50,
            1234,
            vec![ThresholdOutcome {
                metric: "http_req_duration".to_string(),
                expression: "p(95)<500".to_string(),
                observed: Some(321.5),
                passed: true,
            }],
        );
        summary
    }

    #[test]
    fn appended_summaries_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summaries.jsonl");

        append_run_summary(&sample_summary("a"), &path).unwrap();
        append_run_summary(&sample_summary("b"), &path).unwrap();

        let runs = load_summary_runs(&path).unwrap();
        assert_eq!(vec![sample_summary("a"), sample_summary("b")], runs);
    }

    #[test]
    fn results_decide_pass() {
        let mut summary = sample_summary("a");
        assert!(summary.passed);

        summary.set_results(
            50,
            10,
            vec![ThresholdOutcome {
                metric: "http_req_failed".to_string(),
                expression: "rate<0.1".to_string(),
                observed: Some(0.5),
                passed: false,
            }],
        );
        assert!(!summary.passed);
    }

    #[test]
    fn fingerprint_ignores_run_identity_and_results() {
        let a = sample_summary("a");
        let mut b = sample_summary("b");
        b.started_at += 600;
        b.set_results(10, 5, a.thresholds.clone());

        assert_eq!(a.fingerprint(), b.fingerprint());

        b.stages[1].target = 60;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
