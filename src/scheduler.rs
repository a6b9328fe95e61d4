//! Per-source poll pacing.
//!
//! Each source runs its own loop: scan, then sleep a jittered interval. A source
//! can be paused from outside (HTTP 429) with `trigger_backoff`; while paused the
//! loop sleeps until the deadline, and the first tick after it runs at twice the
//! usual interval. Failed scans never end the loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::latency::{LatencySnapshot, LatencyStats};
use crate::config::{SchedulerConfig, SourceSchedule, ADAPTIVE_SLOWDOWN, ADAPTIVE_SPEEDUP, BACKOFF_MULTIPLIER};
use crate::error::Result;
use crate::types::now_ms;

struct SourceState {
    schedule: SourceSchedule,
    current_interval: Duration,
    last_scan_ms: Option<u64>,
    scans_performed: u64,
    pairs_found: u64,
    errors: u64,
    backoff_until: Option<Instant>,
    latency: Arc<LatencyStats>,
}

impl SourceState {
    fn new(schedule: SourceSchedule) -> Self {
        Self {
            schedule,
            current_interval: schedule.interval_min,
            last_scan_ms: None,
            scans_performed: 0,
            pairs_found: 0,
            errors: 0,
            backoff_until: None,
            latency: Arc::new(LatencyStats::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStats {
    pub source: String,
    pub interval_min_secs: f64,
    pub interval_max_secs: f64,
    pub current_interval_secs: f64,
    pub scans_performed: u64,
    pub pairs_found: u64,
    pub errors: u64,
    pub last_scan_ms: Option<u64>,
    pub backoff_active: bool,
    pub backoff_remaining_secs: Option<f64>,
    pub scan_latency: LatencySnapshot,
}

/// What the loop should do about backoff before ticking.
enum BackoffState {
    None,
    /// Deadline still ahead; sleep this long.
    Waiting(Duration),
    /// Deadline passed on this check; cleared.
    Expired,
}

pub struct Scheduler {
    sources: DashMap<String, SourceState>,
    adaptive_scaling: bool,
    activity_threshold: usize,
}

impl Scheduler {
    pub fn new(cfg: &SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            sources: DashMap::new(),
            adaptive_scaling: cfg.adaptive_scaling,
            activity_threshold: cfg.activity_threshold,
        })
    }

    /// Drive `scan` until `cancel` fires. The callback returns the number of
    /// admitted events, which feeds adaptive pacing. An in-flight scan is
    /// allowed to finish; cancellation is checked between ticks.
    pub async fn schedule<F, Fut>(
        &self,
        source_id: &str,
        schedule: SourceSchedule,
        cancel: CancellationToken,
        mut scan: F,
    ) where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<usize>>,
    {
        self.sources
            .entry(source_id.to_string())
            .and_modify(|s| s.schedule = schedule)
            .or_insert_with(|| SourceState::new(schedule));

        info!(
            source = source_id,
            min_secs = schedule.interval_min.as_secs_f64(),
            max_secs = schedule.interval_max.as_secs_f64(),
            "[SCHEDULER] {source_id} loop started"
        );

        while !cancel.is_cancelled() {
            let backed_off = self.backoff_active(source_id);
            let mut interval = jittered(schedule.interval_min, schedule.interval_max);
            if backed_off {
                interval = interval.mul_f64(BACKOFF_MULTIPLIER);
            }

            match self.check_backoff(source_id) {
                BackoffState::Waiting(wait) => {
                    warn!(
                        source = source_id,
                        wait_secs = wait.as_secs_f64(),
                        "[SCHEDULER] {source_id} in backoff"
                    );
                    if sleep_or_cancel(wait, &cancel).await {
                        break;
                    }
                    continue;
                }
                BackoffState::Expired => {
                    info!(source = source_id, "[SCHEDULER] {source_id} backoff elapsed");
                }
                BackoffState::None => {}
            }

            let started_ms = now_ms();
            let started = Instant::now();
            let outcome = scan().await;
            let elapsed = started.elapsed();

            let pause = match outcome {
                Ok(found) => {
                    if self.adaptive_scaling && !backed_off {
                        interval = self.adapt(interval, found, &schedule);
                    }
                    self.record_scan(source_id, started_ms, elapsed, found, interval);
                    info!(
                        source = source_id,
                        found,
                        scan_ms = elapsed.as_millis() as u64,
                        next_secs = interval.as_secs_f64(),
                        "[SCHEDULER] {source_id} scan complete"
                    );
                    interval
                }
                Err(e) => {
                    self.record_error(source_id);
                    error!(
                        source = source_id,
                        backoff_secs = schedule.error_backoff.as_secs_f64(),
                        "[SCHEDULER] {source_id} scan failed: {e}"
                    );
                    schedule.error_backoff
                }
            };

            if sleep_or_cancel(pause, &cancel).await {
                break;
            }
        }

        info!(source = source_id, "[SCHEDULER] {source_id} loop stopped");
    }

    /// Pause a source for `duration`. Returns false if the source is not registered.
    pub fn trigger_backoff(&self, source_id: &str, duration: Duration) -> bool {
        let Some(mut state) = self.sources.get_mut(source_id) else {
            return false;
        };
        state.backoff_until = Some(Instant::now() + duration);
        warn!(
            source = source_id,
            secs = duration.as_secs_f64(),
            "[SCHEDULER] {source_id} backoff triggered"
        );
        true
    }

    pub fn clear_backoff(&self, source_id: &str) {
        if let Some(mut state) = self.sources.get_mut(source_id) {
            if state.backoff_until.take().is_some() {
                info!(source = source_id, "[SCHEDULER] {source_id} backoff cleared");
            }
        }
    }

    pub fn backoff_active(&self, source_id: &str) -> bool {
        self.sources
            .get(source_id)
            .is_some_and(|s| s.backoff_until.is_some())
    }

    pub fn stats(&self) -> Vec<SourceStats> {
        let now = Instant::now();
        let mut out: Vec<SourceStats> = self
            .sources
            .iter()
            .map(|entry| {
                let s = entry.value();
                SourceStats {
                    source: entry.key().clone(),
                    interval_min_secs: s.schedule.interval_min.as_secs_f64(),
                    interval_max_secs: s.schedule.interval_max.as_secs_f64(),
                    current_interval_secs: s.current_interval.as_secs_f64(),
                    scans_performed: s.scans_performed,
                    pairs_found: s.pairs_found,
                    errors: s.errors,
                    last_scan_ms: s.last_scan_ms,
                    backoff_active: s.backoff_until.is_some(),
                    backoff_remaining_secs: s
                        .backoff_until
                        .map(|until| until.saturating_duration_since(now).as_secs_f64()),
                    scan_latency: s.latency.snapshot(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.source.cmp(&b.source));
        out
    }

    pub fn source_stats(&self, source_id: &str) -> Option<SourceStats> {
        self.stats().into_iter().find(|s| s.source == source_id)
    }

    fn check_backoff(&self, source_id: &str) -> BackoffState {
        let Some(mut state) = self.sources.get_mut(source_id) else {
            return BackoffState::None;
        };
        match state.backoff_until {
            None => BackoffState::None,
            Some(until) => {
                let now = Instant::now();
                if now < until {
                    BackoffState::Waiting(until - now)
                } else {
                    state.backoff_until = None;
                    BackoffState::Expired
                }
            }
        }
    }

    fn adapt(&self, interval: Duration, found: usize, schedule: &SourceSchedule) -> Duration {
        if found >= self.activity_threshold {
            interval.mul_f64(ADAPTIVE_SPEEDUP).max(schedule.interval_min)
        } else {
            interval.mul_f64(ADAPTIVE_SLOWDOWN).min(schedule.interval_max)
        }
    }

    fn record_scan(&self, source_id: &str, started_ms: u64, elapsed: Duration, found: usize, next: Duration) {
        if let Some(mut state) = self.sources.get_mut(source_id) {
            state.scans_performed += 1;
            state.pairs_found += found as u64;
            state.last_scan_ms = Some(started_ms);
            state.current_interval = next;
            state.latency.record(elapsed);
        }
    }

    fn record_error(&self, source_id: &str) {
        if let Some(mut state) = self.sources.get_mut(source_id) {
            state.errors += 1;
        }
    }
}

/// Uniform random duration in `[min, max]`.
fn jittered(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let secs = rand::thread_rng().gen_range(min.as_secs_f64()..=max.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Sleep unless cancelled first. Returns true on cancellation.
async fn sleep_or_cancel(d: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(d) => false,
    }
}

/// Lets a fetcher pause its own source when the upstream API rate-limits it.
#[derive(Clone)]
pub struct BackoffSignal {
    scheduler: Arc<Scheduler>,
    source_id: String,
}

impl BackoffSignal {
    pub fn new(scheduler: Arc<Scheduler>, source_id: impl Into<String>) -> Self {
        Self { scheduler, source_id: source_id.into() }
    }

    pub fn fire(&self, duration: Duration) {
        self.scheduler.trigger_backoff(&self.source_id, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler(adaptive: bool) -> Arc<Scheduler> {
        Scheduler::new(&SchedulerConfig {
            adaptive_scaling: adaptive,
            ..SchedulerConfig::default()
        })
    }

    fn fixed(secs: u64, error_backoff_secs: u64) -> SourceSchedule {
        SourceSchedule::new(secs, secs, error_backoff_secs)
    }

    /// Spawn a loop whose callback counts calls and reports `found` events.
    fn spawn_counting(
        sched: &Arc<Scheduler>,
        schedule: SourceSchedule,
        cancel: &CancellationToken,
        found: usize,
    ) -> (Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(sched);
        let c = cancel.clone();
        let counter = Arc::clone(&calls);
        let handle = tokio::spawn(async move {
            s.schedule("test", schedule, c, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(found)
                }
            })
            .await;
        });
        (calls, handle)
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let (min, max) = (Duration::from_secs(30), Duration::from_secs(60));
        for _ in 0..1_000 {
            let d = jittered(min, max);
            assert!(d >= min && d <= max, "{d:?}");
        }
        assert_eq!(jittered(max, min), max);
    }

    #[tokio::test(start_paused = true)]
    async fn scans_once_per_interval_until_cancelled() {
        let sched = scheduler(false);
        let cancel = CancellationToken::new();
        let (calls, handle) = spawn_counting(&sched, fixed(10, 60), &cancel, 1);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        cancel.cancel();
        handle.await.unwrap();
        let stats = sched.source_stats("test").unwrap();
        assert_eq!(stats.scans_performed, 4);
        assert_eq!(stats.pairs_found, 4);
        assert!(stats.last_scan_ms.is_some());
        assert_eq!(stats.scan_latency.samples, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_lets_in_flight_scan_finish() {
        use std::sync::atomic::AtomicBool;

        let sched = scheduler(false);
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        let s = Arc::clone(&sched);
        let c = cancel.clone();
        let done = Arc::clone(&finished);
        let handle = tokio::spawn(async move {
            s.schedule("slow", fixed(10, 60), c, move || {
                let done = Arc::clone(&done);
                async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    done.store(true, Ordering::SeqCst);
                    Ok(1)
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(finished.load(Ordering::SeqCst));
        let stats = sched.source_stats("slow").unwrap();
        assert_eq!(stats.scans_performed, 1);
        assert_eq!(stats.pairs_found, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_scan_waits_error_backoff_and_keeps_running() {
        let sched = scheduler(false);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&sched);
        let c = cancel.clone();
        let counter = Arc::clone(&calls);
        let handle = tokio::spawn(async move {
            s.schedule("flaky", fixed(10, 60), c, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<usize, _>(AppError::Scan("upstream down".to_string()))
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_secs(150)).await;
        // t = 0, 60, 120
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = sched.source_stats("flaky").unwrap();
        assert_eq!(stats.errors, 3);
        assert_eq!(stats.scans_performed, 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_pauses_until_deadline_then_doubles_next_interval() {
        let sched = scheduler(false);
        let cancel = CancellationToken::new();
        let (calls, handle) = spawn_counting(&sched, fixed(10, 60), &cancel, 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sched.trigger_backoff("test", Duration::from_secs(100)));
        assert!(sched.backoff_active("test"));

        tokio::time::sleep(Duration::from_secs(95)).await; // t = 100
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await; // t = 110, scanned at 105
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!sched.backoff_active("test"));

        tokio::time::sleep(Duration::from_secs(10)).await; // t = 120, next scan at 125
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(10)).await; // t = 130
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn clear_backoff_resumes_immediately_on_next_check() {
        let sched = scheduler(false);
        let cancel = CancellationToken::new();
        let (calls, handle) = spawn_counting(&sched, fixed(10, 60), &cancel, 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        sched.trigger_backoff("test", Duration::from_secs(1_000));
        sched.clear_backoff("test");
        assert!(!sched.backoff_active("test"));

        tokio::time::sleep(Duration::from_secs(10)).await; // t = 11
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn busy_source_speeds_up_and_quiet_source_slows_down() {
        let cancel = CancellationToken::new();
        let bounds = SourceSchedule::new(10, 20, 60);

        let busy = scheduler(true);
        let (_, busy_handle) = spawn_counting(&busy, bounds, &cancel, 10);
        let quiet = scheduler(true);
        let (_, quiet_handle) = spawn_counting(&quiet, bounds, &cancel, 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let busy_next = busy.source_stats("test").unwrap().current_interval_secs;
        let quiet_next = quiet.source_stats("test").unwrap().current_interval_secs;
        assert!((10.0..=16.0 + 1e-6).contains(&busy_next), "busy={busy_next}");
        assert!((12.0 - 1e-6..=20.0).contains(&quiet_next), "quiet={quiet_next}");

        cancel.cancel();
        busy_handle.await.unwrap();
        quiet_handle.await.unwrap();
    }

    #[test]
    fn backoff_on_unknown_source_is_ignored() {
        let sched = scheduler(true);
        assert!(!sched.trigger_backoff("nope", Duration::from_secs(5)));
        assert!(sched.stats().is_empty());
    }
}
