use crate::cli::ReporterOpt;
use crate::context::{RunnerContext, UserValuesConstraint, VuContext};
use crate::definition::{ScenarioDefinition, ScenarioDefinitionBuilder, VuHookMut};
use crate::executor::Executor;
use crate::monitor::start_monitor;
use crate::progress::start_progress;
use crate::run_state::RunState;
use crate::shutdown::start_shutdown_listener;
use crate::stages::StageTarget;
use anyhow::Context;
use gust_core::prelude::{ShutdownSignalError, VuBailError};
use gust_instruments::metrics::{ITERATIONS, ITERATION_DURATION, VUS, VUS_MAX};
use gust_instruments::{
    evaluate_thresholds, MetricsSnapshot, ReportConfig, Reporter, Sample, ThresholdReport,
};
use gust_summary_model::{append_run_summary, RunSummary, StageSummary, ThresholdOutcome};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How often the controller re-reads the schedule and adjusts the VU count.
const CONTROL_INTERVAL: Duration = Duration::from_millis(50);

/// How long VU threads get to exit after the shutdown signal before they are abandoned.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The result of a completed run.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub snapshot: MetricsSnapshot,
    pub thresholds: ThresholdReport,
    pub iterations: u64,
    pub peak_vus: u64,
    /// VU threads that were still running when the run finished.
    pub abandoned_vus: usize,
}

impl RunOutcome {
    /// True if every threshold passed.
    pub fn passed(&self) -> bool {
        self.thresholds.passed()
    }

    /// `0` if every threshold passed, otherwise `1`.
    pub fn exit_code(&self) -> ExitCode {
        if self.passed() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        }
    }
}

/// Why a VU thread stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VuExit {
    /// The target dropped to or below the VU's slot. The slot may be started again.
    Drained,
    /// The run is shutting down.
    Shutdown,
    /// The VU completed its iteration limit.
    Exhausted,
    /// The scenario returned a [VuBailError].
    Bailed,
    /// The VU setup hook failed.
    SetupFailed,
}

impl VuExit {
    /// Whether a new VU may be started in the same slot later in the run.
    fn retires_slot(self) -> bool {
        matches!(self, VuExit::Exhausted | VuExit::Bailed | VuExit::SetupFailed)
    }
}

struct VuHooks<RV: UserValuesConstraint, V: UserValuesConstraint> {
    setup: Option<VuHookMut<RV, V>>,
    scenario: VuHookMut<RV, V>,
    teardown: Option<VuHookMut<RV, V>>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> Clone for VuHooks<RV, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> Copy for VuHooks<RV, V> {}

#[derive(Default)]
struct VuSlot {
    handle: Option<JoinHandle<VuExit>>,
    started: u64,
    retired: bool,
}

/// Run a scenario to completion.
///
/// VUs are started and stopped to follow the configured stages. Once the last stage has finished,
/// VUs get the graceful stop period to finish their current iteration before the run is shut down.
/// Thresholds are then evaluated and the summary is reported.
///
/// Returns an error if the configuration is invalid, the global setup hook fails, or a sample could
/// not be recorded. Failed thresholds are not an error, check [RunOutcome::passed].
pub fn run<RV: UserValuesConstraint, V: UserValuesConstraint>(
    definition: ScenarioDefinitionBuilder<RV, V>,
) -> anyhow::Result<RunOutcome> {
    let definition = definition.build()?;
    let config = &definition.config;

    log::info!("Running scenario: {}", definition.name);

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(&runtime);
    let reporter = Arc::new(
        report_config(&definition).init(&runtime, shutdown_handle.clone(), &definition.name),
    );
    let executor = Arc::new(Executor::new(runtime, shutdown_handle.clone()));
    let run_id = definition
        .run_id
        .clone()
        .unwrap_or_else(|| nanoid::nanoid!());
    let started_at = chrono::Utc::now().timestamp();

    let run_state = Arc::new(RunState::new(
        config.schedule.clone(),
        reporter.aggregator().clone(),
    ));
    let mut runner_context = RunnerContext::new(
        executor,
        reporter.clone(),
        shutdown_handle.clone(),
        config.target_url.clone(),
        run_state.clone(),
    );

    if let Some(setup_fn) = definition.setup_fn {
        if let Err(e) = setup_fn(&mut runner_context) {
            shutdown_handle.shutdown();
            return Err(e);
        }
    }

    let runner_context = Arc::new(runner_context);

    if !definition.no_progress {
        start_progress(run_state.clone(), shutdown_handle.new_listener())?;
    }

    // Ready to start spawning VUs so start the resource monitor to report high usage by VUs
    // which might lead to a misleading outcome.
    start_monitor(shutdown_handle.new_listener())?;

    reporter.add_sample(Sample::gauge(VUS_MAX, config.schedule.max_target() as f64));

    let hooks = VuHooks {
        setup: definition.setup_vu_fn,
        scenario: definition.scenario_fn,
        teardown: definition.teardown_vu_fn,
    };
    let mut slots = Vec::<VuSlot>::new();
    let mut reported_vus = None;

    log::info!(
        "Starting {} stage(s) over {}, up to {} VUs",
        config.schedule.stages().len(),
        humantime::format_duration(config.schedule.total_duration()),
        config.schedule.max_target()
    );
    run_state.start_clock();

    loop {
        if shutdown_handle.is_shutdown() {
            log::info!("Run stopped before the last stage completed");
            break;
        }

        let target = match run_state.schedule().target_at(run_state.elapsed()) {
            StageTarget::Active(target) => target,
            StageTarget::Complete => break,
        };
        run_state.set_target(target);

        reap_finished(&mut slots);
        for slot in 0..target {
            let index = slot as usize;
            if slots.len() <= index {
                slots.resize_with(index + 1, VuSlot::default);
            }

            let vu_slot = &mut slots[index];
            if vu_slot.handle.is_some() || vu_slot.retired {
                continue;
            }

            match spawn_vu(
                slot,
                vu_slot.started,
                runner_context.clone(),
                hooks,
                config.iterations_per_vu,
            ) {
                Ok(handle) => vu_slot.handle = Some(handle),
                Err(e) => {
                    shutdown_handle.shutdown();
                    return Err(e);
                }
            }
            vu_slot.started += 1;
        }

        report_active_vus(&reporter, &run_state, &mut reported_vus);
        std::thread::sleep(CONTROL_INTERVAL);
    }

    // Stop handing out new iterations and give in-flight ones time to finish.
    run_state.set_target(0);
    if !shutdown_handle.is_shutdown() && live_count(&slots) > 0 {
        log::info!(
            "All stages complete, waiting up to {} for {} VU(s) to finish",
            humantime::format_duration(config.graceful_stop),
            live_count(&slots)
        );
    }
    let drain_started = Instant::now();
    while live_count(&slots) > 0
        && drain_started.elapsed() < config.graceful_stop
        && !shutdown_handle.is_shutdown()
    {
        std::thread::sleep(CONTROL_INTERVAL);
        reap_finished(&mut slots);
        report_active_vus(&reporter, &run_state, &mut reported_vus);
    }

    let abandoned_vus = if live_count(&slots) > 0 {
        log::warn!(
            "{} VU(s) still running after the graceful stop, interrupting them",
            live_count(&slots)
        );
        shutdown_handle.shutdown();
        stop_stragglers(&mut slots)
    } else {
        0
    };
    report_active_vus(&reporter, &run_state, &mut reported_vus);

    if let Some(teardown_fn) = definition.teardown_fn {
        // Don't crash the runner if the teardown fails. We still want the reporting and runner
        // shutdown to happen cleanly. The hook is documented as 'best effort'
        if let Err(e) = teardown_fn(runner_context.clone()) {
            log::error!("Teardown failed: {:?}", e);
        }
    }

    // Stops the progress bar, the resource monitor and any file reporters.
    shutdown_handle.shutdown();

    let snapshot = reporter.snapshot();
    let thresholds = evaluate_thresholds(&config.thresholds, &snapshot);
    for failed in thresholds.failed() {
        match failed.observed {
            Some(observed) => log::warn!(
                "Threshold failed: {}: {} (observed {:.2})",
                failed.metric,
                failed.expression,
                observed
            ),
            None => log::warn!(
                "Threshold failed: {}: {} (no data)",
                failed.metric,
                failed.expression
            ),
        }
    }
    reporter.finalize(&snapshot, &thresholds);

    if let Some(e) = reporter.fatal_error() {
        anyhow::bail!("Run aborted because a sample could not be recorded: {e}");
    }

    let outcome = RunOutcome {
        run_id,
        snapshot,
        thresholds,
        iterations: run_state.iterations(),
        peak_vus: run_state.peak_vus(),
        abandoned_vus,
    };

    if let Some(path) = &definition.summary_file {
        let summary = build_run_summary(&definition, &outcome, started_at);
        match append_run_summary(&summary, path) {
            Ok(()) => log::info!(
                "Appended run summary to {} with fingerprint {}",
                path.display(),
                summary.fingerprint()
            ),
            Err(e) => log::error!("Failed to write run summary to {}: {e:?}", path.display()),
        }
    }

    log::info!(
        "Scenario {} finished with {} iterations, thresholds {}",
        definition.name,
        outcome.iterations,
        if outcome.passed() { "passed" } else { "failed" }
    );

    Ok(outcome)
}

fn report_config<RV: UserValuesConstraint, V: UserValuesConstraint>(
    definition: &ScenarioDefinition<RV, V>,
) -> ReportConfig {
    match definition.reporter {
        ReporterOpt::Summary => ReportConfig::default().enable_summary(),
        ReporterOpt::JsonlFile => ReportConfig::default()
            .enable_summary()
            .enable_jsonl_file(definition.sample_dir.clone()),
        ReporterOpt::Noop => ReportConfig::default(),
    }
}

fn spawn_vu<RV: UserValuesConstraint, V: UserValuesConstraint>(
    slot: u64,
    generation: u64,
    runner_context: Arc<RunnerContext<RV>>,
    hooks: VuHooks<RV, V>,
    iterations_per_vu: Option<u64>,
) -> anyhow::Result<JoinHandle<VuExit>> {
    let vu_id = format!("vu-{slot}-{generation}");

    std::thread::Builder::new()
        .name(vu_id.clone())
        .spawn(move || run_vu(vu_id, slot, runner_context, hooks, iterations_per_vu))
        .with_context(|| format!("Failed to spawn thread for VU in slot {slot}"))
}

fn run_vu<RV: UserValuesConstraint, V: UserValuesConstraint>(
    vu_id: String,
    slot: u64,
    runner_context: Arc<RunnerContext<RV>>,
    hooks: VuHooks<RV, V>,
    iterations_per_vu: Option<u64>,
) -> VuExit {
    let run_state = runner_context.run_state().clone();
    let reporter = runner_context.reporter();
    let _active = run_state.vu_started();

    // For us to check if the VU should shut down between iterations
    let mut cycle_shutdown_listener = runner_context.new_shutdown_listener();
    // For the scenario implementation to listen for shutdown and respond appropriately
    let delegated_shutdown_listener = runner_context.new_shutdown_listener();

    let mut context = VuContext::new(
        vu_id.clone(),
        slot,
        runner_context,
        delegated_shutdown_listener,
    );
    log::debug!("Starting {}", vu_id);

    if let Some(setup) = hooks.setup {
        if let Err(e) = setup(&mut context) {
            log::error!("VU setup failed for {}: {:?}", vu_id, e);
            return VuExit::SetupFailed;
        }
    }

    let mut completed = 0;
    let exit = loop {
        if cycle_shutdown_listener.should_shutdown() {
            break VuExit::Shutdown;
        }
        if !run_state.is_slot_wanted(slot) {
            break VuExit::Drained;
        }
        if iterations_per_vu.is_some_and(|limit| completed >= limit) {
            break VuExit::Exhausted;
        }

        let iteration_started = Instant::now();
        let passed = match (hooks.scenario)(&mut context) {
            Ok(()) => true,
            Err(e) if e.is::<ShutdownSignalError>() => {
                // Expected if the run is shutting down, the check at the top of the loop will
                // catch this and break out.
                continue;
            }
            Err(e) if e.is::<VuBailError>() => {
                log::warn!("{} is bailing: {}", vu_id, e);
                break VuExit::Bailed;
            }
            Err(e) => {
                log::error!("Scenario iteration failed for {}: {:?}", vu_id, e);
                false
            }
        };

        reporter.add_sample(Sample::counter(ITERATIONS, 1.0).with_outcome(passed));
        reporter.add_sample(
            Sample::trend_duration(ITERATION_DURATION, iteration_started.elapsed())
                .with_outcome(passed),
        );
        run_state.iteration_completed();

        completed += 1;
        context.set_iteration(completed);
    };

    if let Some(teardown) = hooks.teardown {
        if let Err(e) = teardown(&mut context) {
            log::error!("VU teardown failed for {}: {:?}", vu_id, e);
        }
    }

    log::debug!("Stopping {} after {} iterations ({:?})", vu_id, completed, exit);
    exit
}

/// Join VU threads that have finished and retire their slots if they may not restart.
fn reap_finished(slots: &mut [VuSlot]) {
    for (index, slot) in slots.iter_mut().enumerate() {
        if !slot.handle.as_ref().is_some_and(JoinHandle::is_finished) {
            continue;
        }
        let Some(handle) = slot.handle.take() else {
            continue;
        };

        match handle.join() {
            Ok(exit) => {
                if exit.retires_slot() {
                    slot.retired = true;
                }
            }
            Err(_) => {
                log::error!("VU in slot {} panicked, retiring the slot", index);
                slot.retired = true;
            }
        }
    }
}

fn live_count(slots: &[VuSlot]) -> usize {
    slots.iter().filter(|slot| slot.handle.is_some()).count()
}

/// Wait a little for interrupted VUs to exit, then give up on the rest.
fn stop_stragglers(slots: &mut [VuSlot]) -> usize {
    let deadline = Instant::now() + SHUTDOWN_GRACE;
    while live_count(slots) > 0 && Instant::now() < deadline {
        std::thread::sleep(CONTROL_INTERVAL);
        reap_finished(slots);
    }

    let mut abandoned = 0;
    for (index, slot) in slots.iter_mut().enumerate() {
        if slot.handle.take().is_some() {
            log::warn!(
                "VU in slot {} did not stop after the shutdown signal and was abandoned",
                index
            );
            abandoned += 1;
        }
    }

    abandoned
}

fn report_active_vus(reporter: &Reporter, run_state: &RunState, reported: &mut Option<u64>) {
    let active = run_state.active_vus();
    if *reported != Some(active) {
        reporter.add_sample(Sample::gauge(VUS, active as f64));
        *reported = Some(active);
    }
}

fn build_run_summary<RV: UserValuesConstraint, V: UserValuesConstraint>(
    definition: &ScenarioDefinition<RV, V>,
    outcome: &RunOutcome,
    started_at: i64,
) -> RunSummary {
    let schedule = &definition.config.schedule;
    let mut summary = RunSummary::new(
        outcome.run_id.clone(),
        definition.name.clone(),
        started_at,
        schedule.start_target(),
        schedule
            .stages()
            .iter()
            .map(|stage| StageSummary {
                duration_ms: u64::try_from(stage.duration.as_millis()).unwrap_or(u64::MAX),
                target: stage.target,
            })
            .collect(),
        env!("CARGO_PKG_VERSION").to_string(),
    );

    for key in &definition.capture_env {
        if let Ok(value) = std::env::var(key) {
            summary.add_env(key.clone(), value);
        }
    }

    summary.set_results(
        outcome.peak_vus,
        outcome.iterations,
        outcome
            .thresholds
            .results()
            .iter()
            .map(|result| ThresholdOutcome {
                metric: result.metric.clone(),
                expression: result.expression.clone(),
                observed: result.observed,
                passed: result.passed,
            })
            .collect(),
    );

    summary
}
