use crate::cli::{GustScenarioCli, ReporterOpt};
use crate::config::{ConfigDefaults, LoadProfile, RunConfig};
use crate::context::{RunnerContext, UserValuesConstraint, VuContext};
use crate::stages::Stage;
use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub type HookResult = anyhow::Result<()>;

pub type GlobalHookMut<RV> = fn(&mut RunnerContext<RV>) -> HookResult;
pub type GlobalHook<RV> = fn(Arc<RunnerContext<RV>>) -> HookResult;
pub type VuHookMut<RV, V> = fn(&mut VuContext<RV, V>) -> HookResult;

/// The builder for a scenario definition.
///
/// This must be used at the start of a test to define the scenario that you want to run.
pub struct ScenarioDefinitionBuilder<RV: UserValuesConstraint, V: UserValuesConstraint> {
    /// The name of the scenario, which should be unique within the test suite.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    /// This value is initialised for you and you cannot change it.
    #[doc(hidden)]
    cli: GustScenarioCli,
    /// Stages, thresholds and limits used when neither the CLI nor a load profile sets them.
    defaults: ConfigDefaults,
    /// Environment variables to record in the run summary.
    capture_env: HashSet<String>,
    /// Global setup hook for this scenario. It will be run once, before any VUs are started.
    setup_fn: Option<GlobalHookMut<RV>>,
    /// Setup hook for a VU, which is run each time a VU is started for a slot.
    ///
    /// If it fails, the VU does not run any iterations.
    setup_vu_fn: Option<VuHookMut<RV, V>>,
    /// The scenario function, run once per iteration by every active VU.
    scenario_fn: Option<VuHookMut<RV, V>>,
    /// Teardown hook for a VU, run when the VU stops. Failures are logged and otherwise ignored.
    teardown_vu_fn: Option<VuHookMut<RV, V>>,
    /// Global teardown hook, run once after every VU has stopped. Failures are logged and
    /// otherwise ignored.
    teardown_fn: Option<GlobalHook<RV>>,
}

pub(crate) struct ScenarioDefinition<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub(crate) name: String,
    pub(crate) config: RunConfig,
    pub(crate) no_progress: bool,
    pub(crate) reporter: ReporterOpt,
    pub(crate) sample_dir: PathBuf,
    pub(crate) run_id: Option<String>,
    pub(crate) summary_file: Option<PathBuf>,
    pub(crate) capture_env: HashSet<String>,
    pub(crate) setup_fn: Option<GlobalHookMut<RV>>,
    pub(crate) setup_vu_fn: Option<VuHookMut<RV, V>>,
    pub(crate) scenario_fn: VuHookMut<RV, V>,
    pub(crate) teardown_vu_fn: Option<VuHookMut<RV, V>>,
    pub(crate) teardown_fn: Option<GlobalHook<RV>>,
}

const DEFAULT_SAMPLE_DIR: &str = "gust-samples";

impl<RV: UserValuesConstraint, V: UserValuesConstraint> ScenarioDefinitionBuilder<RV, V> {
    /// Initialise logging, parse the command line and create a new scenario definition.
    ///
    /// Logging is configured from `RUST_LOG` and defaults to `info`.
    pub fn new_with_init(name: &str) -> anyhow::Result<Self> {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init()?;
        let cli = GustScenarioCli::parse();

        Ok(Self::new(name, cli))
    }

    /// Create a new scenario definition from the scenario name and command line arguments.
    /// See the [ScenarioDefinitionBuilder::name] for more information about the name.
    pub fn new(name: &str, cli: GustScenarioCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            defaults: ConfigDefaults::default(),
            capture_env: HashSet::with_capacity(0),
            setup_fn: None,
            setup_vu_fn: None,
            scenario_fn: None,
            teardown_vu_fn: None,
            teardown_fn: None,
        }
    }

    /// Stages to run when none are given on the command line or in a load profile.
    ///
    /// Each entry is a `(duration, target)` pair.
    pub fn with_default_stages(mut self, stages: &[(Duration, u64)]) -> Self {
        self.defaults.stages = stages
            .iter()
            .map(|(duration, target)| Stage::new(*duration, *target))
            .collect();
        self
    }

    /// The VU count to ramp from at the start of the first stage. Defaults to 0.
    pub fn with_default_start_vus(mut self, start_vus: u64) -> Self {
        self.defaults.start_vus = start_vus;
        self
    }

    /// Thresholds for `metric`, for example `("http_req_duration", &["p(95)<500", "p(99)<1000"])`.
    ///
    /// Can be called once per metric. A threshold for the same metric on the command line or in a
    /// load profile replaces these.
    pub fn with_default_thresholds(mut self, metric: &str, expressions: &[&str]) -> Self {
        self.defaults.thresholds.extend(
            expressions
                .iter()
                .map(|expression| (metric.to_string(), expression.to_string())),
        );
        self
    }

    /// Stop each VU after this many iterations, unless overridden at run time.
    pub fn with_default_iterations_per_vu(mut self, iterations: u64) -> Self {
        self.defaults.iterations_per_vu = Some(iterations);
        self
    }

    /// Record the value of an environment variable in the run summary, if it is set.
    pub fn add_capture_env(mut self, key: &str) -> Self {
        self.capture_env.insert(key.to_string());
        self
    }

    /// Set the global setup hook [ScenarioDefinitionBuilder::setup_fn] for this scenario.
    pub fn use_setup(mut self, setup_fn: GlobalHookMut<RV>) -> Self {
        self.setup_fn = Some(setup_fn);
        self
    }

    /// Set the VU setup hook [ScenarioDefinitionBuilder::setup_vu_fn] for this scenario.
    pub fn use_vu_setup(mut self, setup_vu_fn: VuHookMut<RV, V>) -> Self {
        self.setup_vu_fn = Some(setup_vu_fn);
        self
    }

    /// Set the scenario function [ScenarioDefinitionBuilder::scenario_fn]. This is required.
    pub fn use_scenario(mut self, scenario_fn: VuHookMut<RV, V>) -> Self {
        self.scenario_fn = Some(scenario_fn);
        self
    }

    /// Set the VU teardown hook [ScenarioDefinitionBuilder::teardown_vu_fn] for this scenario.
    pub fn use_vu_teardown(mut self, teardown_vu_fn: VuHookMut<RV, V>) -> Self {
        self.teardown_vu_fn = Some(teardown_vu_fn);
        self
    }

    /// Set the global teardown hook [ScenarioDefinitionBuilder::teardown_fn] for this scenario.
    pub fn use_teardown(mut self, teardown_fn: GlobalHook<RV>) -> Self {
        self.teardown_fn = Some(teardown_fn);
        self
    }

    /// Validate the definition and resolve the run configuration.
    pub(crate) fn build(self) -> anyhow::Result<ScenarioDefinition<RV, V>> {
        let scenario_fn = self.scenario_fn.ok_or_else(|| {
            anyhow::anyhow!(
                "No scenario function set for {}, call `use_scenario`",
                self.name
            )
        })?;

        let profile = match &self.cli.profile {
            Some(path) => LoadProfile::from_file(path)?,
            None => LoadProfile::default(),
        };
        let config = RunConfig::resolve(&self.cli, profile, self.defaults)?;

        Ok(ScenarioDefinition {
            name: self.name,
            config,
            no_progress: self.cli.no_progress,
            reporter: self.cli.reporter,
            sample_dir: self
                .cli
                .sample_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SAMPLE_DIR)),
            run_id: self.cli.run_id,
            summary_file: self.cli.summary_file,
            capture_env: self.capture_env,
            setup_fn: self.setup_fn,
            setup_vu_fn: self.setup_vu_fn,
            scenario_fn,
            teardown_vu_fn: self.teardown_vu_fn,
            teardown_fn: self.teardown_fn,
        })
    }
}
