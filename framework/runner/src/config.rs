use crate::cli::GustScenarioCli;
use crate::stages::{Stage, StageSchedule};
use gust_instruments::{Threshold, ThresholdParseError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// How long VUs get to finish their current iteration once the schedule has completed.
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No stages configured, at least one stage is required")]
    NoStages,
    #[error("Invalid stage `{input}`: {reason}")]
    InvalidStage { input: String, reason: String },
    #[error("The stage profile is too long to schedule")]
    ProfileTooLong,
    #[error("Invalid threshold `{input}`, expected `metric=expression`")]
    InvalidThresholdFlag { input: String },
    #[error("Invalid threshold for {metric}: {source}")]
    Threshold {
        metric: String,
        #[source]
        source: ThresholdParseError,
    },
    #[error("Invalid target URL `{url}`: {source}")]
    InvalidTargetUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("`iterations_per_vu` must be greater than zero")]
    ZeroIterations,
    #[error("Could not read load profile {}: {source}", path.display())]
    ReadProfile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not parse load profile {}: {source}", path.display())]
    ParseProfile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// A load profile file.
///
/// ```toml
/// target_url = "http://localhost:8080"
/// graceful_stop = "10s"
///
/// [[stages]]
/// duration = "30s"
/// target = 20
///
/// [thresholds]
/// http_req_duration = ["p(95)<500", "p(99)<1000"]
/// http_req_failed = "rate<0.1"
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadProfile {
    pub target_url: Option<String>,
    pub start_vus: Option<u64>,
    pub graceful_stop: Option<ProfileDuration>,
    pub iterations_per_vu: Option<u64>,
    #[serde(default)]
    pub stages: Vec<ProfileStage>,
    #[serde(default)]
    pub thresholds: BTreeMap<String, ProfileThresholds>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileStage {
    pub duration: ProfileDuration,
    pub target: u64,
}

/// A duration written either as a human readable string (`1m30s`) or as whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileDuration(pub Duration);

impl<'de> Deserialize<'de> for ProfileDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct DurationVisitor;

        impl serde::de::Visitor<'_> for DurationVisitor {
            type Value = ProfileDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a duration such as \"1m30s\" or a whole number of seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(ProfileDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| ProfileDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                humantime::parse_duration(v)
                    .map(ProfileDuration)
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

/// Threshold expressions for one metric, either a single string or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProfileThresholds {
    One(String),
    Many(Vec<String>),
}

impl ProfileThresholds {
    fn into_vec(self) -> Vec<String> {
        match self {
            ProfileThresholds::One(expression) => vec![expression],
            ProfileThresholds::Many(expressions) => expressions,
        }
    }
}

impl LoadProfile {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadProfile {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::ParseProfile {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Settings that a scenario provides in code, used when neither the CLI nor a profile sets them.
#[derive(Debug, Default, Clone)]
pub(crate) struct ConfigDefaults {
    pub start_vus: u64,
    pub stages: Vec<Stage>,
    pub thresholds: Vec<(String, String)>,
    pub iterations_per_vu: Option<u64>,
}

/// Fully resolved configuration for a run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target_url: Option<Url>,
    pub schedule: StageSchedule,
    pub thresholds: Vec<Threshold>,
    pub graceful_stop: Duration,
    pub iterations_per_vu: Option<u64>,
}

impl RunConfig {
    /// Merge the command line, the optional profile and the scenario's defaults.
    ///
    /// The command line wins over the profile, which wins over the defaults. Stages are replaced
    /// as a whole. Thresholds are replaced per metric, so a CLI threshold on `http_req_duration`
    /// leaves a profile threshold on `http_req_failed` in place.
    pub(crate) fn resolve(
        cli: &GustScenarioCli,
        profile: LoadProfile,
        defaults: ConfigDefaults,
    ) -> Result<Self, ConfigError> {
        let target_url = cli
            .target_url
            .clone()
            .or(profile.target_url)
            .map(|url| {
                Url::parse(&url).map_err(|source| ConfigError::InvalidTargetUrl { url, source })
            })
            .transpose()?;

        let stages = if !cli.stages.is_empty() {
            cli.stages.clone()
        } else if !profile.stages.is_empty() {
            profile
                .stages
                .into_iter()
                .map(|s| Stage::new(s.duration.0, s.target))
                .collect()
        } else {
            defaults.stages
        };
        let start_vus = cli
            .start_vus
            .or(profile.start_vus)
            .unwrap_or(defaults.start_vus);
        let schedule = StageSchedule::new(start_vus, stages)?;

        let mut expressions = BTreeMap::<String, Vec<String>>::new();
        for (metric, expression) in defaults.thresholds {
            expressions.entry(metric).or_default().push(expression);
        }
        for (metric, profile_expressions) in profile.thresholds {
            expressions.insert(metric, profile_expressions.into_vec());
        }
        let mut cli_expressions = BTreeMap::<String, Vec<String>>::new();
        for (metric, expression) in &cli.thresholds {
            cli_expressions
                .entry(metric.clone())
                .or_default()
                .push(expression.clone());
        }
        expressions.extend(cli_expressions);

        let thresholds = expressions
            .iter()
            .flat_map(|(metric, exprs)| exprs.iter().map(move |expr| (metric, expr)))
            .map(|(metric, expr)| {
                Threshold::parse(metric, expr).map_err(|source| ConfigError::Threshold {
                    metric: metric.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let graceful_stop = cli
            .graceful_stop
            .or(profile.graceful_stop.map(|d| d.0))
            .unwrap_or(DEFAULT_GRACEFUL_STOP);

        let iterations_per_vu = cli
            .iterations_per_vu
            .or(profile.iterations_per_vu)
            .or(defaults.iterations_per_vu);
        if iterations_per_vu == Some(0) {
            return Err(ConfigError::ZeroIterations);
        }

        Ok(RunConfig {
            target_url,
            schedule,
            thresholds,
            graceful_stop,
            iterations_per_vu,
        })
    }
}

/// Parse a `metric=expression` threshold flag.
pub(crate) fn parse_threshold_flag(s: &str) -> Result<(String, String), ConfigError> {
    match s.split_once('=') {
        Some((metric, expression))
            if !metric.trim().is_empty() && !expression.trim().is_empty() =>
        {
            Ok((metric.trim().to_string(), expression.trim().to_string()))
        }
        _ => Err(ConfigError::InvalidThresholdFlag {
            input: s.to_string(),
        }),
    }
}
