use crate::config::parse_threshold_flag;
use crate::stages::Stage;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ReporterOpt {
    /// Print the metrics, checks and thresholds summary to stdout at the end of the run.
    #[default]
    Summary,

    /// Print the summary and also write every sample to a JSON lines file.
    ///
    /// Files are written to the directory given by `--sample-dir`.
    JsonlFile,

    /// Only aggregate metrics for threshold evaluation, without printing anything.
    Noop,
}

#[derive(Debug, Default, Parser)]
#[command(about, long_about = None)]
pub struct GustScenarioCli {
    /// Base URL of the service to test, for example `http://localhost:8080`.
    ///
    /// Overrides `target_url` in the load profile.
    #[clap(long)]
    pub target_url: Option<String>,

    /// Path to a TOML load profile.
    ///
    /// The profile can set the target URL, the stages, the thresholds and the graceful stop time.
    /// Values given on the command line take precedence over the profile.
    #[clap(long)]
    pub profile: Option<PathBuf>,

    /// A stage of the load profile in the format `duration:target`. For example `--stage 30s:20`.
    ///
    /// You can specify multiple stages by using the flag multiple times. Stages run in the order
    /// they are given, and replace any stages from the profile or the scenario defaults.
    #[clap(long = "stage", value_parser = parse_stage)]
    pub stages: Vec<Stage>,

    /// The number of VUs to ramp from at the start of the first stage
    #[clap(long)]
    pub start_vus: Option<u64>,

    /// A threshold in the format `metric=expression`. For example
    /// `--threshold 'http_req_duration=p(95)<500'`.
    ///
    /// Can be repeated. Thresholds given here replace the thresholds of the same metric from the
    /// profile or the scenario defaults.
    #[clap(long = "threshold", value_parser = parse_threshold_flag)]
    pub thresholds: Vec<(String, String)>,

    /// How long VUs get to finish their current iteration after the last stage, for example `10s`
    #[clap(long, value_parser = humantime::parse_duration)]
    pub graceful_stop: Option<Duration>,

    /// Stop each VU after it has completed this many iterations
    #[clap(long)]
    pub iterations_per_vu: Option<u64>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// The reporter to use.
    #[arg(long, value_enum, default_value_t = ReporterOpt::Summary)]
    pub reporter: ReporterOpt,

    /// Directory for the sample files written by the `jsonl-file` reporter. Defaults to `gust-samples`.
    #[clap(long)]
    pub sample_dir: Option<PathBuf>,

    /// The ID of this run, used to identify it in the run summary.
    ///
    /// A random ID is generated if none is given.
    #[clap(long)]
    pub run_id: Option<String>,

    /// Append a summary of this run to the given JSON lines file.
    #[clap(long)]
    pub summary_file: Option<PathBuf>,
}

fn parse_stage(s: &str) -> anyhow::Result<Stage> {
    Ok(s.parse::<Stage>()?)
}
