use crate::config::ConfigError;
use std::str::FromStr;
use std::time::Duration;

/// One step of the load profile: ramp linearly to `target` VUs over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Parses the `duration:target` form used on the command line, for example `1m30s:50`.
impl FromStr for Stage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidStage {
            input: s.to_string(),
            reason,
        };

        let (duration, target) = s
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected `duration:target`".to_string()))?;

        let duration = humantime::parse_duration(duration.trim())
            .map_err(|e| invalid(format!("bad duration: {e}")))?;
        let target = target
            .trim()
            .parse::<u64>()
            .map_err(|e| invalid(format!("bad target: {e}")))?;

        Ok(Stage::new(duration, target))
    }
}

/// What the schedule asks for at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageTarget {
    /// The number of VUs that should be running.
    Active(u64),
    /// Every stage has elapsed.
    Complete,
}

/// A validated, ordered list of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSchedule {
    start_target: u64,
    stages: Vec<Stage>,
    total_duration: Duration,
}

impl StageSchedule {
    /// Create a schedule that starts from `start_target` VUs.
    ///
    /// At least one stage is required.
    pub fn new(start_target: u64, stages: Vec<Stage>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::NoStages);
        }

        let total_duration = stages
            .iter()
            .try_fold(Duration::ZERO, |total, stage| {
                total.checked_add(stage.duration)
            })
            .ok_or(ConfigError::ProfileTooLong)?;

        Ok(Self {
            start_target,
            stages,
            total_duration,
        })
    }

    pub fn start_target(&self) -> u64 {
        self.start_target
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    /// The highest VU count the schedule will ask for.
    pub fn max_target(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_target, u64::max)
    }

    /// The target VU count `elapsed` after the run started.
    ///
    /// Inside a stage the target moves linearly from the previous stage's target to this stage's
    /// target and is truncated toward the previous target, so it never leaves that range. A zero
    /// length stage jumps straight to its target. The final target is still reported at exactly
    /// [StageSchedule::total_duration], and anything after that is [StageTarget::Complete].
    pub fn target_at(&self, elapsed: Duration) -> StageTarget {
        if elapsed > self.total_duration {
            return StageTarget::Complete;
        }

        let mut from = self.start_target;
        let mut stage_start = Duration::ZERO;
        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let into_stage = (elapsed - stage_start).as_nanos();
                return StageTarget::Active(interpolate(
                    from,
                    stage.target,
                    into_stage,
                    stage.duration.as_nanos(),
                ));
            }

            from = stage.target;
            stage_start = stage_end;
        }

        StageTarget::Active(from)
    }
}

/// `from + (to - from) * num / den`, truncated toward `from`. Requires `num < den`.
fn interpolate(from: u64, to: u64, num: u128, den: u128) -> u64 {
    let (low, high) = (from.min(to), from.max(to));
    let span = u128::from(high - low);

    let step = match span.checked_mul(num) {
        Some(product) => product / den,
        None => (span as f64 * (num as f64 / den as f64)) as u128,
    };
    // `num < den` keeps the step below the span, the clamp covers float rounding
    let step = step.min(span) as u64;

    if to >= from {
        from + step
    } else {
        from - step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn production_profile() -> StageSchedule {
        StageSchedule::new(
            0,
            vec![
                Stage::new(secs(30), 20),
                Stage::new(secs(90), 50),
                Stage::new(secs(30), 0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn ramps_between_stage_boundaries() {
        let schedule = production_profile();

        assert_eq!(StageTarget::Active(0), schedule.target_at(Duration::ZERO));
        assert_eq!(StageTarget::Active(10), schedule.target_at(secs(15)));
        assert_eq!(StageTarget::Active(20), schedule.target_at(secs(30)));
        assert_eq!(StageTarget::Active(35), schedule.target_at(secs(75)));
        assert_eq!(StageTarget::Active(50), schedule.target_at(secs(120)));
        assert_eq!(StageTarget::Active(25), schedule.target_at(secs(135)));
    }

    #[test]
    fn final_target_is_exact_at_total_duration() {
        let schedule = production_profile();

        assert_eq!(secs(150), schedule.total_duration());
        assert_eq!(StageTarget::Active(0), schedule.target_at(secs(150)));
        assert_eq!(
            StageTarget::Complete,
            schedule.target_at(secs(150) + Duration::from_nanos(1))
        );

        let plateau = StageSchedule::new(5, vec![Stage::new(secs(10), 50)]).unwrap();
        assert_eq!(StageTarget::Active(50), plateau.target_at(secs(10)));
    }

    #[test]
    fn target_stays_within_stage_endpoints() {
        let schedule = production_profile();
        let bounds = [(0, 0, 20), (30, 20, 50), (120, 50, 0)];

        for (start, from, to) in bounds {
            let (low, high) = (u64::min(from, to), u64::max(from, to));
            for ms in (0..30_000u64).step_by(7) {
                let elapsed = secs(start) + Duration::from_millis(ms);
                match schedule.target_at(elapsed) {
                    StageTarget::Active(target) => assert!(
                        (low..=high).contains(&target),
                        "{target} outside [{low}, {high}] at {elapsed:?}"
                    ),
                    StageTarget::Complete => panic!("schedule completed early at {elapsed:?}"),
                }
            }
        }
    }

    #[test]
    fn ramp_down_truncates_toward_previous_target() {
        let schedule = StageSchedule::new(10, vec![Stage::new(secs(10), 0)]).unwrap();

        // 10 - 10 * 0.05 = 9.5, truncated toward 10
        assert_eq!(
            StageTarget::Active(10),
            schedule.target_at(Duration::from_millis(500))
        );
        assert_eq!(
            StageTarget::Active(9),
            schedule.target_at(Duration::from_millis(1000))
        );
    }

    #[test]
    fn zero_duration_stage_jumps() {
        let schedule = StageSchedule::new(
            0,
            vec![Stage::new(Duration::ZERO, 30), Stage::new(secs(10), 30)],
        )
        .unwrap();

        assert_eq!(StageTarget::Active(30), schedule.target_at(Duration::ZERO));
        assert_eq!(StageTarget::Active(30), schedule.target_at(secs(5)));
        assert_eq!(30, schedule.max_target());
    }

    #[test]
    fn start_target_applies_to_first_stage() {
        let schedule = StageSchedule::new(10, vec![Stage::new(secs(10), 20)]).unwrap();

        assert_eq!(StageTarget::Active(10), schedule.target_at(Duration::ZERO));
        assert_eq!(StageTarget::Active(15), schedule.target_at(secs(5)));
    }

    #[test]
    fn empty_stage_list_is_rejected() {
        assert!(matches!(
            StageSchedule::new(0, vec![]),
            Err(ConfigError::NoStages)
        ));
    }

    #[test]
    fn huge_targets_do_not_overflow() {
        let schedule = StageSchedule::new(0, vec![Stage::new(secs(u64::MAX), u64::MAX)]).unwrap();

        match schedule.target_at(secs(u64::MAX / 2)) {
            StageTarget::Active(target) => assert!(target <= u64::MAX / 2 + 1),
            StageTarget::Complete => panic!("should still be active"),
        }
    }

    #[test]
    fn parse_stage_flag() {
        assert_eq!(
            Stage::new(secs(90), 50),
            "1m30s:50".parse::<Stage>().unwrap()
        );
        assert_eq!(Stage::new(secs(30), 0), "30s:0".parse::<Stage>().unwrap());

        for bad in ["30s", "30s:", "thirty:20", "30s:-1", ":5"] {
            assert!(
                matches!(bad.parse::<Stage>(), Err(ConfigError::InvalidStage { .. })),
                "{bad} should not parse"
            );
        }
    }
}
