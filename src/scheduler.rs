//! Poll scheduling state machine.
//!
//! Owns the repeating timer and reacts to visibility changes:
//!
//! - `Stopped → Running` on start: immediate forced fetch, then a
//!   repeating timer at the configured interval.
//! - `Running → Suspended` while the host is hidden (when configured):
//!   timer cleared, no fetch.
//! - `Suspended → Running` on return to visible: timer re-armed, with a
//!   forced fetch depending on [`ResumeBehavior`] and payload age.
//!
//! The scheduler only decides *when* to fetch and whether the result must
//! be accepted unconditionally; issuing the fetch and accepting the result
//! belong to the synchronizer.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// What to do when visibility returns after a suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeBehavior {
    /// Force a fetch as soon as the host becomes visible again.
    ImmediateRefresh,
    /// Force a fetch only if the payload is older than `stale_after`.
    RefreshIfStale,
}

/// Polling schedule, immutable per synchronizer.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Nominal polling period.
    pub interval: Duration,
    /// Suspend the timer while the host is not visible.
    pub pause_when_hidden: bool,
    /// Action taken when visibility returns.
    pub resume_behavior: ResumeBehavior,
    /// Payload age beyond which `RefreshIfStale` refreshes on resume.
    pub stale_after: Duration,
}

impl ScheduleConfig {
    /// Schedule that polls every `interval`, keeps polling while hidden,
    /// and refreshes on resume only when stale (stale = one full interval).
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            pause_when_hidden: false,
            resume_behavior: ResumeBehavior::RefreshIfStale,
            stale_after: interval,
        }
    }

    pub fn pause_when_hidden(mut self, pause: bool) -> Self {
        self.pause_when_hidden = pause;
        self
    }

    pub fn resume_behavior(mut self, behavior: ResumeBehavior) -> Self {
        self.resume_behavior = behavior;
        self
    }

    pub fn stale_after(mut self, age: Duration) -> Self {
        self.stale_after = age;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stopped,
    Running,
    Suspended,
}

/// Fetch instruction returned by scheduler transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDirective {
    /// No fetch; only timer state changed.
    None,
    /// Fetch and accept the result regardless of fingerprint match.
    Forced,
    /// Fetch subject to fingerprint comparison.
    Unforced,
}

pub struct Scheduler {
    config: ScheduleConfig,
    phase: Phase,
    timer: Option<Interval>,
}

impl Scheduler {
    pub fn new(config: ScheduleConfig) -> Self {
        Self {
            config,
            phase: Phase::Stopped,
            timer: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// `Stopped → Running`. The caller performs the returned forced fetch.
    pub fn start(&mut self) -> FetchDirective {
        if self.phase != Phase::Stopped {
            return FetchDirective::None;
        }
        self.arm();
        self.phase = Phase::Running;
        FetchDirective::Forced
    }

    /// `Running → Suspended` when the host goes hidden. No-op unless
    /// running with `pause_when_hidden` set.
    pub fn suspend(&mut self) {
        if self.phase == Phase::Running && self.config.pause_when_hidden {
            self.timer = None;
            self.phase = Phase::Suspended;
        }
    }

    /// `Suspended → Running` on a transition back to visible.
    ///
    /// `payload_age` is the time since the last accepted payload; `None`
    /// (nothing accepted yet) counts as stale.
    pub fn resume(&mut self, payload_age: Option<Duration>) -> FetchDirective {
        if self.phase != Phase::Suspended {
            return FetchDirective::None;
        }
        self.arm();
        self.phase = Phase::Running;

        match self.config.resume_behavior {
            ResumeBehavior::ImmediateRefresh => FetchDirective::Forced,
            ResumeBehavior::RefreshIfStale => match payload_age {
                None => FetchDirective::Forced,
                Some(age) if age > self.config.stale_after => FetchDirective::Forced,
                Some(_) => FetchDirective::None,
            },
        }
    }

    /// Clear the timer and stop. Does not cancel an in-flight fetch; the
    /// synchronizer discards its result on arrival.
    pub fn stop(&mut self) {
        self.timer = None;
        self.phase = Phase::Stopped;
    }

    /// Wait for the next natural timer tick. Pends forever while stopped
    /// or suspended, so it is safe to poll unconditionally in a select.
    pub async fn tick(&mut self) -> FetchDirective {
        match self.timer.as_mut() {
            Some(timer) => {
                timer.tick().await;
                FetchDirective::Unforced
            }
            None => std::future::pending().await,
        }
    }

    fn arm(&mut self) {
        // First tick one full interval out; the transition that armed the
        // timer already decided whether to fetch right now.
        let mut timer = interval_at(Instant::now() + self.config.interval, self.config.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(ms: u64) -> ScheduleConfig {
        ScheduleConfig::every(Duration::from_millis(ms))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_forced_once() {
        let mut scheduler = Scheduler::new(schedule(1000));
        assert_eq!(scheduler.phase(), Phase::Stopped);

        assert_eq!(scheduler.start(), FetchDirective::Forced);
        assert_eq!(scheduler.phase(), Phase::Running);

        // Already running; a second start does nothing.
        assert_eq!(scheduler.start(), FetchDirective::None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_requires_pause_when_hidden() {
        let mut scheduler = Scheduler::new(schedule(1000));
        scheduler.start();

        scheduler.suspend();
        assert_eq!(scheduler.phase(), Phase::Running);

        let mut pausing = Scheduler::new(schedule(1000).pause_when_hidden(true));
        pausing.start();
        pausing.suspend();
        assert_eq!(pausing.phase(), Phase::Suspended);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_if_stale_decides_by_age() {
        let config = schedule(1000)
            .pause_when_hidden(true)
            .stale_after(Duration::from_millis(5000));
        let mut scheduler = Scheduler::new(config);
        scheduler.start();
        scheduler.suspend();

        // Fresh payload: re-arm without fetching.
        assert_eq!(
            scheduler.resume(Some(Duration::from_millis(100))),
            FetchDirective::None
        );
        assert_eq!(scheduler.phase(), Phase::Running);

        scheduler.suspend();
        assert_eq!(
            scheduler.resume(Some(Duration::from_millis(6000))),
            FetchDirective::Forced
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_with_no_payload_counts_as_stale() {
        let mut scheduler = Scheduler::new(schedule(1000).pause_when_hidden(true));
        scheduler.start();
        scheduler.suspend();
        assert_eq!(scheduler.resume(None), FetchDirective::Forced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_immediate_always_fetches() {
        let config = schedule(1000)
            .pause_when_hidden(true)
            .resume_behavior(ResumeBehavior::ImmediateRefresh);
        let mut scheduler = Scheduler::new(config);
        scheduler.start();
        scheduler.suspend();
        assert_eq!(
            scheduler.resume(Some(Duration::ZERO)),
            FetchDirective::Forced
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_while_running_is_noop() {
        let mut scheduler = Scheduler::new(schedule(1000));
        scheduler.start();
        assert_eq!(scheduler.resume(None), FetchDirective::None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_the_interval() {
        let mut scheduler = Scheduler::new(schedule(1000));
        scheduler.start();

        let started = Instant::now();
        assert_eq!(scheduler.tick().await, FetchDirective::Unforced);
        assert_eq!(started.elapsed(), Duration::from_millis(1000));

        assert_eq!(scheduler.tick().await, FetchDirective::Unforced);
        assert_eq!(started.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_pends_while_stopped() {
        let mut scheduler = Scheduler::new(schedule(1000));
        let waited =
            tokio::time::timeout(Duration::from_secs(10), scheduler.tick()).await;
        assert!(waited.is_err(), "stopped scheduler must never tick");
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_clears_the_timer() {
        let mut scheduler = Scheduler::new(schedule(1000).pause_when_hidden(true));
        scheduler.start();
        scheduler.suspend();

        let waited =
            tokio::time::timeout(Duration::from_secs(10), scheduler.tick()).await;
        assert!(waited.is_err(), "suspended scheduler must never tick");
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_rearms_from_now() {
        let config = schedule(1000)
            .pause_when_hidden(true)
            .stale_after(Duration::from_secs(60));
        let mut scheduler = Scheduler::new(config);
        scheduler.start();
        scheduler.suspend();

        tokio::time::advance(Duration::from_millis(3500)).await;

        // Fresh enough: no fetch, but the timer restarts at a full
        // interval from the resume point.
        assert_eq!(
            scheduler.resume(Some(Duration::from_secs(1))),
            FetchDirective::None
        );
        let resumed = Instant::now();
        scheduler.tick().await;
        assert_eq!(resumed.elapsed(), Duration::from_millis(1000));
    }
}
