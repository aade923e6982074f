use crate::stages::StageSchedule;
use gust_instruments::MetricsAggregator;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Live state of a run, shared between the controller and every VU.
///
/// The controller is the only writer of the target. VUs read it between iterations to decide
/// whether their slot is still wanted. The clock starts once setup has finished and the first
/// VUs are about to be scheduled.
#[derive(Debug)]
pub struct RunState {
    started: OnceLock<Instant>,
    schedule: StageSchedule,
    current_target: AtomicU64,
    active_vus: AtomicU64,
    peak_vus: AtomicU64,
    iterations: AtomicU64,
    aggregator: Arc<MetricsAggregator>,
}

impl RunState {
    pub(crate) fn new(schedule: StageSchedule, aggregator: Arc<MetricsAggregator>) -> Self {
        Self {
            started: OnceLock::new(),
            current_target: AtomicU64::new(schedule.start_target()),
            schedule,
            active_vus: AtomicU64::new(0),
            peak_vus: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
            aggregator,
        }
    }

    pub(crate) fn start_clock(&self) {
        self.started.get_or_init(Instant::now);
    }

    /// Time since the schedule started, or zero if it has not started yet.
    pub fn elapsed(&self) -> Duration {
        self.started
            .get()
            .map(Instant::elapsed)
            .unwrap_or_default()
    }

    pub fn schedule(&self) -> &StageSchedule {
        &self.schedule
    }

    /// The number of VUs the schedule currently wants.
    pub fn current_target(&self) -> u64 {
        self.current_target.load(Ordering::Acquire)
    }

    pub(crate) fn set_target(&self, target: u64) {
        self.current_target.store(target, Ordering::Release);
    }

    /// The VU in `slot` may start another iteration while this is true.
    pub fn is_slot_wanted(&self, slot: u64) -> bool {
        slot < self.current_target()
    }

    /// The number of VUs running right now.
    pub fn active_vus(&self) -> u64 {
        self.active_vus.load(Ordering::Acquire)
    }

    pub fn peak_vus(&self) -> u64 {
        self.peak_vus.load(Ordering::Acquire)
    }

    /// Completed iterations across all VUs, including ones that returned an error.
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Acquire)
    }

    pub fn aggregator(&self) -> &Arc<MetricsAggregator> {
        &self.aggregator
    }

    pub(crate) fn vu_started(&self) -> ActiveVuGuard<'_> {
        let active = self.active_vus.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_vus.fetch_max(active, Ordering::AcqRel);
        ActiveVuGuard { state: self }
    }

    pub(crate) fn iteration_completed(&self) {
        self.iterations.fetch_add(1, Ordering::AcqRel);
    }
}

/// Counts a VU as active for as long as it is held.
pub(crate) struct ActiveVuGuard<'a> {
    state: &'a RunState,
}

impl Drop for ActiveVuGuard<'_> {
    fn drop(&mut self) {
        self.state.active_vus.fetch_sub(1, Ordering::AcqRel);
    }
}
