use gust_runner::prelude::{
    metrics, run, GustScenarioCli, HookResult, ReporterOpt, RunnerContext,
    ScenarioDefinitionBuilder, UserValuesConstraint, VuBailError, VuContext,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default, Debug)]
struct RunnerContextValue {}

impl UserValuesConstraint for RunnerContextValue {}

#[derive(Default, Debug)]
struct VuContextValue {
    value: i32,
}

impl UserValuesConstraint for VuContextValue {}

fn sample_cli_cfg() -> GustScenarioCli {
    GustScenarioCli {
        target_url: Some("http://localhost:1".to_string()),
        graceful_stop: Some(Duration::from_secs(5)),
        no_progress: true,
        reporter: ReporterOpt::Noop,
        ..Default::default()
    }
}

fn one_second_two_vus() -> [(Duration, u64); 2] {
    [(Duration::ZERO, 2), (Duration::from_secs(1), 2)]
}

fn idle(ctx: &mut VuContext<RunnerContextValue, VuContextValue>) -> HookResult {
    ctx.pause(Duration::from_millis(10))
}

#[test]
fn propagate_error_in_setup_hook() {
    fn setup(_ctx: &mut RunnerContext<RunnerContextValue>) -> HookResult {
        Err(anyhow::anyhow!("Error in setup hook"))
    }

    let scenario = ScenarioDefinitionBuilder::<RunnerContextValue, VuContextValue>::new(
        "propagate_error_in_setup_hook",
        sample_cli_cfg(),
    )
    .with_default_stages(&one_second_two_vus())
    .use_setup(setup)
    .use_scenario(idle);

    let result = run(scenario);

    assert!(result.is_err());
    assert_eq!(result.unwrap_err().to_string(), "Error in setup hook");
}

#[test]
fn missing_scenario_is_rejected() {
    let scenario = ScenarioDefinitionBuilder::<RunnerContextValue, VuContextValue>::new(
        "missing_scenario_is_rejected",
        sample_cli_cfg(),
    )
    .with_default_stages(&one_second_two_vus());

    assert!(run(scenario).is_err());
}

#[test]
fn invalid_threshold_fails_before_any_vu_starts() {
    fn scenario(_ctx: &mut VuContext<RunnerContextValue, VuContextValue>) -> HookResult {
        panic!("No VU should start with an invalid configuration");
    }

    let scenario = ScenarioDefinitionBuilder::<RunnerContextValue, VuContextValue>::new(
        "invalid_threshold_fails_before_any_vu_starts",
        sample_cli_cfg(),
    )
    .with_default_stages(&one_second_two_vus())
    .with_default_thresholds("http_req_duration", &["p(95)<<500"])
    .use_scenario(scenario);

    assert!(run(scenario).is_err());
}

#[test]
fn capture_error_in_vu_setup() {
    fn vu_setup(_ctx: &mut VuContext<RunnerContextValue, VuContextValue>) -> HookResult {
        Err(anyhow::anyhow!("Error in VU setup hook"))
    }

    fn scenario(_ctx: &mut VuContext<RunnerContextValue, VuContextValue>) -> HookResult {
        panic!("The scenario should not run after a failed VU setup");
    }

    let scenario = ScenarioDefinitionBuilder::<RunnerContextValue, VuContextValue>::new(
        "capture_error_in_vu_setup",
        sample_cli_cfg(),
    )
    .with_default_stages(&one_second_two_vus())
    .use_vu_setup(vu_setup)
    .use_scenario(scenario);

    let outcome = run(scenario).unwrap();

    assert_eq!(0, outcome.iterations);
    assert!(outcome.passed());
}

#[test]
fn capture_error_in_scenario_and_continue() {
    fn scenario(ctx: &mut VuContext<RunnerContextValue, VuContextValue>) -> HookResult {
        if ctx.get().value < 5 {
            ctx.get_mut().value += 1;
        } else {
            // Save time running this test by shutting down once this has run a few times.
            ctx.runner_context().force_stop_scenario();
        }

        Err(anyhow::anyhow!("Error in scenario"))
    }

    let mut cfg = sample_cli_cfg();
    cfg.stages = vec!["0s:1".parse().unwrap(), "30s:1".parse().unwrap()];
    let scenario = ScenarioDefinitionBuilder::<RunnerContextValue, VuContextValue>::new(
        "capture_error_in_scenario_and_continue",
        cfg,
    )
    .use_scenario(scenario);

    let outcome = run(scenario).unwrap();

    assert!(outcome.iterations >= 6);
    let iterations = outcome.snapshot.get(metrics::ITERATIONS).unwrap();
    assert_eq!(iterations.count(), iterations.failed());
}

#[test]
fn bail_error_stops_vu() {
    fn scenario(ctx: &mut VuContext<RunnerContextValue, VuContextValue>) -> HookResult {
        if ctx.slot() == 0 {
            return Err(VuBailError::default().into());
        }

        ctx.pause(Duration::from_millis(10))
    }

    let scenario = ScenarioDefinitionBuilder::<RunnerContextValue, VuContextValue>::new(
        "bail_error_stops_vu",
        sample_cli_cfg(),
    )
    .with_default_stages(&one_second_two_vus())
    .use_scenario(scenario);

    let outcome = run(scenario).unwrap();

    // The bailing VU is never restarted, so every recorded iteration comes from slot 1.
    assert!(outcome.iterations > 0);
    assert_eq!(
        0,
        outcome.snapshot.get(metrics::ITERATIONS).unwrap().failed()
    );
}

#[test]
fn capture_error_in_vu_teardown() {
    fn vu_teardown(_ctx: &mut VuContext<RunnerContextValue, VuContextValue>) -> HookResult {
        Err(anyhow::anyhow!("Error in VU teardown hook"))
    }

    let scenario = ScenarioDefinitionBuilder::<RunnerContextValue, VuContextValue>::new(
        "capture_error_in_vu_teardown",
        sample_cli_cfg(),
    )
    .with_default_stages(&one_second_two_vus())
    .use_scenario(idle)
    .use_vu_teardown(vu_teardown);

    let result = run(scenario);

    assert!(result.is_ok());
}

#[test]
fn capture_error_in_teardown() {
    fn teardown(_ctx: Arc<RunnerContext<RunnerContextValue>>) -> HookResult {
        Err(anyhow::anyhow!("Error in teardown hook"))
    }

    let scenario = ScenarioDefinitionBuilder::<RunnerContextValue, VuContextValue>::new(
        "capture_error_in_teardown",
        sample_cli_cfg(),
    )
    .with_default_stages(&one_second_two_vus())
    .use_scenario(idle)
    .use_teardown(teardown);

    let result = run(scenario);

    assert!(result.is_ok());
}

#[test]
fn slow_vus_are_interrupted_after_graceful_stop() {
    fn scenario(ctx: &mut VuContext<RunnerContextValue, VuContextValue>) -> HookResult {
        ctx.pause(Duration::from_secs(60))
    }

    let mut cfg = sample_cli_cfg();
    cfg.graceful_stop = Some(Duration::from_millis(200));
    let scenario = ScenarioDefinitionBuilder::<RunnerContextValue, VuContextValue>::new(
        "slow_vus_are_interrupted_after_graceful_stop",
        cfg,
    )
    .with_default_stages(&[(Duration::ZERO, 3), (Duration::from_millis(300), 3)])
    .use_scenario(scenario);

    let started = std::time::Instant::now();
    let outcome = run(scenario).unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(0, outcome.abandoned_vus);
    assert_eq!(0, outcome.iterations);
    assert_eq!(3, outcome.peak_vus);
}
