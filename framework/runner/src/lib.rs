mod cli;
mod config;
mod context;
mod definition;
mod executor;
mod monitor;
mod progress;
mod run;
mod run_state;
mod shutdown;
mod stages;
mod types;

pub mod prelude {
    pub use crate::cli::{GustScenarioCli, ReporterOpt};
    pub use crate::config::{
        ConfigError, LoadProfile, ProfileDuration, ProfileStage, ProfileThresholds, RunConfig,
        DEFAULT_GRACEFUL_STOP,
    };
    pub use crate::context::{RunnerContext, UserValuesConstraint, VuContext};
    pub use crate::definition::{
        GlobalHook, GlobalHookMut, HookResult, ScenarioDefinitionBuilder, VuHookMut,
    };
    pub use crate::executor::Executor;
    pub use crate::run::{run, RunOutcome};
    pub use crate::run_state::RunState;
    pub use crate::stages::{Stage, StageSchedule, StageTarget};
    pub use crate::types::GustResult;

    pub use gust_core::prelude::{ShutdownSignalError, VuBailError};
    pub use gust_instruments::metrics;
    pub use gust_instruments::{MetricKind, MetricsSnapshot, Reporter, Sample, ThresholdReport};
}
