//! Background scheduler: one daily analysis timer and one retry timer.
//!
//! The daily timer fires at a wall-clock time in the configured zone, but
//! partitions are UTC days. Each firing sweeps every UTC partition that had
//! fully ended by then, going back over the retry window, so records that
//! land in a partition after its first sweep are picked up the next day.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::orchestrator::{wait_for_shutdown, AnalysisOrchestrator};
use super::retry::{RetryCoordinator, RetryPassSummary};
use super::types::{PipelineError, PipelineResult, RunKind, RunSummary, TriggerOutcome};
use crate::config::Schedule;
use crate::sync::DEFAULT_MAX_IDLE_AGE;

/// Owns the orchestrator and retry coordinator until started.
pub struct AnalysisScheduler {
    orchestrator: AnalysisOrchestrator,
    retry: RetryCoordinator,
    schedule: Schedule,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl AnalysisScheduler {
    pub fn new(orchestrator: AnalysisOrchestrator, schedule: Schedule) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let orchestrator = orchestrator.with_shutdown(shutdown_rx.clone());
        let retry = RetryCoordinator::new(orchestrator.clone(), schedule.max_retry_attempts);
        Self {
            orchestrator,
            retry,
            schedule,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Spawn both timers and return a handle for triggering and shutdown.
    pub fn start(self) -> SchedulerHandle {
        let inner = Arc::new(Inner {
            orchestrator: self.orchestrator,
            retry: self.retry,
            schedule: self.schedule,
            shutdown: self.shutdown_rx.clone(),
            daily_running: AtomicBool::new(false),
            retry_running: AtomicBool::new(false),
        });

        let daily = tokio::spawn(daily_loop(inner.clone(), self.shutdown_rx.clone()));
        let retry = tokio::spawn(retry_loop(inner.clone(), self.shutdown_rx));

        info!(
            daily_time = %inner.schedule.daily_time,
            time_zone = %inner.schedule.time_zone,
            retry_every_secs = inner.schedule.retry_interval.as_secs(),
            "Scheduler started"
        );

        SchedulerHandle {
            inner,
            shutdown_tx: self.shutdown_tx,
            tasks: vec![daily, retry],
        }
    }
}

/// Outcome of one scheduled sweep.
#[derive(Debug, Clone, Default)]
pub struct ScheduledPass {
    pub runs: Vec<RunSummary>,
    /// Days another run still held after every re-arm.
    pub busy_days: Vec<NaiveDate>,
    /// A shutdown interrupted the sweep.
    pub cancelled: bool,
}

struct Inner {
    orchestrator: AnalysisOrchestrator,
    retry: RetryCoordinator,
    schedule: Schedule,
    shutdown: watch::Receiver<bool>,
    daily_running: AtomicBool,
    retry_running: AtomicBool,
}

impl Inner {
    async fn run_daily(&self, day: NaiveDate, kind: RunKind) -> PipelineResult<TriggerOutcome> {
        let Some(_running) = RunningFlag::set(&self.daily_running) else {
            debug!(day = %day, "Daily analysis already running, skipping trigger");
            return Ok(TriggerOutcome::AlreadyRunning);
        };

        match self.orchestrator.run_for_day(day, kind).await {
            Ok(summary) => Ok(TriggerOutcome::Completed(summary)),
            Err(PipelineError::DayBusy(_)) => Ok(TriggerOutcome::AlreadyRunning),
            Err(e) => Err(e),
        }
    }

    /// Sweep the complete partitions as of `now`.
    ///
    /// Days held by a retry pass or a manual run are tried again after
    /// `busy_retry_delay`, up to `busy_retry_limit` times.
    async fn run_scheduled(&self, now: DateTime<Utc>) -> ScheduledPass {
        let mut pass = ScheduledPass::default();
        let mut pending = self.days_to_sweep(now).await;
        let mut rearms = 0;

        loop {
            let busy = match RunningFlag::set(&self.daily_running) {
                None => pending.clone(),
                Some(_running) => {
                    let mut busy = Vec::new();
                    for day in pending.iter().copied() {
                        match self.orchestrator.run_for_day(day, RunKind::Scheduled).await {
                            Ok(summary) => pass.runs.push(summary),
                            Err(PipelineError::DayBusy(day)) => busy.push(day),
                            Err(PipelineError::Cancelled(_)) => {
                                pass.cancelled = true;
                                return pass;
                            }
                            Err(e) => error!(day = %day, error = %e, "Scheduled analysis failed"),
                        }
                    }
                    busy
                }
            };

            if busy.is_empty() {
                return pass;
            }
            if rearms >= self.schedule.busy_retry_limit {
                warn!(days = ?busy, "Partitions still busy, leaving them for the next sweep");
                pass.busy_days = busy;
                return pass;
            }
            rearms += 1;
            info!(
                days = ?busy,
                delay_secs = self.schedule.busy_retry_delay.as_secs(),
                "Partitions busy, re-arming scheduled analysis"
            );

            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(self.schedule.busy_retry_delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    pass.cancelled = true;
                    return pass;
                }
            }
            pending = busy;
        }
    }

    /// The newest complete day always runs; older days in the window only
    /// when they still hold unanalyzed records.
    async fn days_to_sweep(&self, now: DateTime<Utc>) -> Vec<NaiveDate> {
        let days = sweep_window(now, self.schedule.max_retry_attempts);
        let latest = days.last().copied();

        let mut selected = Vec::with_capacity(days.len());
        for day in days {
            if Some(day) == latest || self.has_unanalyzed(day).await {
                selected.push(day);
            }
        }
        selected
    }

    async fn has_unanalyzed(&self, day: NaiveDate) -> bool {
        match self.orchestrator.store().load(day).await {
            Ok(logs) => logs.iter().any(|l| !l.is_analyzed),
            // Let the run report it.
            Err(_) => true,
        }
    }

    async fn run_retry(&self) -> Option<RetryPassSummary> {
        let _running = RunningFlag::set(&self.retry_running)?;
        Some(self.retry.run_pass(Utc::now().date_naive()).await)
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    inner: Arc<Inner>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Run the daily analysis now for `day` (default: the last complete UTC day).
    pub async fn trigger(&self, day: Option<NaiveDate>) -> PipelineResult<TriggerOutcome> {
        let day = day.unwrap_or_else(|| last_complete_day(Utc::now()));
        self.inner.run_daily(day, RunKind::Manual).await
    }

    /// Run the sweep the daily timer runs, as of `now`.
    pub async fn run_scheduled(&self, now: DateTime<Utc>) -> ScheduledPass {
        self.inner.run_scheduled(now).await
    }

    /// Run a retry pass now. `None` if one is already in progress.
    pub async fn retry_now(&self) -> Option<RetryPassSummary> {
        self.inner.run_retry().await
    }

    pub fn is_running(&self) -> bool {
        self.inner.daily_running.load(Ordering::SeqCst)
    }

    /// Stop both timers. A run between dispatch and persist exits without saving.
    pub async fn shutdown(self) {
        info!("Scheduler shutting down");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

async fn daily_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let now = Utc::now();
        let next_run = next_daily_run(now, inner.schedule.daily_time, inner.schedule.time_zone);
        let delay = next_run
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);

        debug!(next_run = %next_run, delay_secs = delay.as_secs(), "Daily analysis timer armed");

        tokio::select! {
            _ = tokio::time::sleep_until(Instant::now() + delay) => {
                let pass = inner.run_scheduled(Utc::now()).await;
                if pass.cancelled {
                    break;
                }
            }
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }
    debug!("Daily analysis timer stopped");
}

async fn retry_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let period = inner.schedule.retry_interval;
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if inner.run_retry().await.is_none() {
                    debug!("Retry pass already running, skipped");
                }
                inner.orchestrator.store().locks().cleanup_stale(DEFAULT_MAX_IDLE_AGE);
            }
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }
    debug!("Retry timer stopped");
}

/// The newest UTC partition day that had fully ended at `now`.
pub fn last_complete_day(now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    today.pred_opt().unwrap_or(today)
}

/// The `window_days` complete UTC days up to [`last_complete_day`], oldest first.
pub fn sweep_window(now: DateTime<Utc>, window_days: u32) -> Vec<NaiveDate> {
    let newest = last_complete_day(now);
    (0..window_days.max(1) as i64)
        .rev()
        .filter_map(|back| newest.checked_sub_signed(Duration::days(back)))
        .collect()
}

/// Next instant strictly after `now` at which the wall clock in `tz` reads `at`.
///
/// A time skipped by a DST jump fires one hour later; a repeated time fires
/// at its first occurrence.
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let mut date = local_now.date_naive();

    for _ in 0..3 {
        let naive = date.and_time(at);
        let candidate = tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest());

        if let Some(t) = candidate {
            if t > local_now {
                return t.with_timezone(&Utc);
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }

    now + Duration::days(1)
}

/// Clears the flag when dropped.
struct RunningFlag<'a>(&'a AtomicBool);

impl<'a> RunningFlag<'a> {
    fn set(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::{America::New_York, Asia::Tokyo};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn hms(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn next_run_later_today() {
        let next = next_daily_run(utc(2024, 1, 15, 0, 30), hms(1, 0), Tz::UTC);
        assert_eq!(next, utc(2024, 1, 15, 1, 0));
    }

    #[test]
    fn next_run_rolls_to_tomorrow() {
        let next = next_daily_run(utc(2024, 1, 15, 1, 0), hms(1, 0), Tz::UTC);
        assert_eq!(next, utc(2024, 1, 16, 1, 0));
    }

    #[test]
    fn next_run_respects_time_zone() {
        // 01:00 in Tokyo is 16:00 UTC the previous day.
        let next = next_daily_run(utc(2024, 1, 15, 12, 0), hms(1, 0), Tokyo);
        assert_eq!(next, utc(2024, 1, 15, 16, 0));
    }

    #[test]
    fn next_run_shifts_past_dst_gap() {
        // 2024-03-10 02:30 does not exist in New York.
        let next = next_daily_run(utc(2024, 3, 10, 5, 0), hms(2, 30), New_York);
        assert_eq!(next, utc(2024, 3, 10, 7, 30));
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn tokyo_firing_targets_only_ended_partitions() {
        // 01:00 Tokyo on the 16th is 16:00 UTC on the 15th, while the
        // 2024-01-15 partition is still filling.
        let fire = next_daily_run(utc(2024, 1, 15, 12, 0), hms(1, 0), Tokyo);
        assert_eq!(fire, utc(2024, 1, 15, 16, 0));
        assert_eq!(last_complete_day(fire), date(14));

        // The next firing covers the 15th once it has ended.
        let next = next_daily_run(fire, hms(1, 0), Tokyo);
        assert_eq!(last_complete_day(next), date(15));
    }

    #[test]
    fn sweep_window_covers_recent_complete_days() {
        let now = utc(2024, 1, 16, 16, 0);
        assert_eq!(sweep_window(now, 3), vec![date(13), date(14), date(15)]);
        assert_eq!(sweep_window(now, 0), vec![date(15)]);
    }

    #[test]
    fn running_flag_is_exclusive() {
        let flag = AtomicBool::new(false);
        let held = RunningFlag::set(&flag).unwrap();
        assert!(RunningFlag::set(&flag).is_none());
        drop(held);
        assert!(RunningFlag::set(&flag).is_some());
    }
}
