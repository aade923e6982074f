use crate::definition::HookResult;
use crate::executor::Executor;
use crate::run_state::RunState;
use gust_core::prelude::{DelegatedShutdownListener, ShutdownHandle};
use gust_instruments::Reporter;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub trait UserValuesConstraint: Default + Debug + Send + Sync + 'static {}

/// State shared by every VU in a run.
///
/// Scenarios can store their own shared values in `RV`, which can only be modified in the global
/// setup hook, before any VU has started.
#[derive(Debug)]
pub struct RunnerContext<RV: UserValuesConstraint> {
    executor: Arc<Executor>,
    reporter: Arc<Reporter>,
    shutdown_handle: ShutdownHandle,
    target_url: Option<Url>,
    run_state: Arc<RunState>,
    value: RV,
}

impl<RV: UserValuesConstraint> RunnerContext<RV> {
    pub(crate) fn new(
        executor: Arc<Executor>,
        reporter: Arc<Reporter>,
        shutdown_handle: ShutdownHandle,
        target_url: Option<Url>,
        run_state: Arc<RunState>,
    ) -> Self {
        Self {
            executor,
            reporter,
            shutdown_handle,
            target_url,
            run_state,
            value: Default::default(),
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn reporter(&self) -> Arc<Reporter> {
        self.reporter.clone()
    }

    pub fn run_state(&self) -> &Arc<RunState> {
        &self.run_state
    }

    /// The base URL of the service under test, if one was configured.
    pub fn target_url(&self) -> Option<&Url> {
        self.target_url.as_ref()
    }

    /// Stop the run now, without waiting for the remaining stages.
    ///
    /// In-flight requests and pauses are cancelled. Thresholds are still evaluated against the
    /// samples recorded so far.
    pub fn force_stop_scenario(&self) {
        self.shutdown_handle.shutdown();
    }

    pub fn new_shutdown_listener(&self) -> DelegatedShutdownListener {
        self.shutdown_handle.new_listener()
    }

    pub fn get_mut(&mut self) -> &mut RV {
        &mut self.value
    }

    pub fn get(&self) -> &RV {
        &self.value
    }
}

/// The context of a single virtual user.
///
/// A fresh context, with a default `V`, is created each time a VU is started for a slot.
pub struct VuContext<RV: UserValuesConstraint, V: UserValuesConstraint> {
    vu_id: String,
    slot: u64,
    iteration: u64,
    runner_context: Arc<RunnerContext<RV>>,
    shutdown_listener: DelegatedShutdownListener,
    value: V,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> VuContext<RV, V> {
    pub(crate) fn new(
        vu_id: String,
        slot: u64,
        runner_context: Arc<RunnerContext<RV>>,
        shutdown_listener: DelegatedShutdownListener,
    ) -> Self {
        Self {
            vu_id,
            slot,
            iteration: 0,
            runner_context,
            shutdown_listener,
            value: Default::default(),
        }
    }

    /// A unique ID for this VU within the run, for example `vu-3-1` for the second VU started in slot 3.
    pub fn vu_id(&self) -> &str {
        &self.vu_id
    }

    /// The scheduling slot of this VU. The VU keeps running while the target is above its slot.
    pub fn slot(&self) -> u64 {
        self.slot
    }

    /// The number of iterations this VU has completed so far.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub(crate) fn set_iteration(&mut self, iteration: u64) {
        self.iteration = iteration;
    }

    pub fn runner_context(&self) -> &Arc<RunnerContext<RV>> {
        &self.runner_context
    }

    pub fn shutdown_listener(&mut self) -> &mut DelegatedShutdownListener {
        &mut self.shutdown_listener
    }

    /// Think time between requests. Returns early with an error if the run is shut down, so use
    /// `?` to end the iteration.
    pub fn pause(&self, duration: Duration) -> HookResult {
        self.runner_context.executor().sleep(duration)
    }

    /// Record a named check and return its outcome.
    ///
    /// A failed check does not fail the iteration. Use a threshold on `checks` to fail the run.
    pub fn check(&self, name: &str, passed: bool) -> bool {
        self.runner_context.reporter.add_check(name, passed);
        passed
    }

    pub fn get_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn get(&self) -> &V {
        &self.value
    }
}
