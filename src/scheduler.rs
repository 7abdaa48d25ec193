use std::cell::Cell;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use color_eyre::eyre::eyre;
use color_eyre::{Report, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::system::provider::SnapshotProvider;
use crate::system::snapshot::Snapshot;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

thread_local! {
    /// Address of the scheduler state whose `on_event` is running on this
    /// thread, or 0.
    static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Sampling,
    Stopped,
}

#[derive(Debug)]
pub enum SamplerEvent {
    Sample(Snapshot),
    Failed(Report),
}

/// Pulls one snapshot per interval, with at most one fetch in flight.
///
/// The first fetch starts immediately. A tick that lands while a fetch is
/// still pending is dropped rather than queued. Once [`stop`](Self::stop)
/// returns no further event is delivered, even if a pending fetch completes
/// later. `stop` waits for a delivery running on another thread to finish.
/// Calling it from inside `on_event` is allowed and takes effect for every
/// later delivery.
pub struct SamplingScheduler {
    state: Arc<Mutex<SchedulerState>>,
    stop_tx: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

impl SamplingScheduler {
    pub fn start<P, F>(provider: Arc<P>, interval: Duration, on_event: F) -> Self
    where
        P: SnapshotProvider + Send + Sync + 'static,
        F: FnMut(SamplerEvent) + Send + 'static,
    {
        let state = Arc::new(Mutex::new(SchedulerState::Idle));
        let (stop_tx, stop_rx) = watch::channel(false);
        let interval = interval.max(MIN_INTERVAL);

        let task = tokio::spawn(run_loop(
            provider,
            interval,
            Arc::clone(&state),
            stop_rx,
            on_event,
        ));

        Self {
            state,
            stop_tx,
            _task: task,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *lock(&self.state)
    }

    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
        if DELIVERING.get() == state_key(&self.state) {
            // Called from our own callback: the lock is already held further
            // up this stack. The run loop marks itself stopped on return.
            return;
        }
        *lock(&self.state) = SchedulerState::Stopped;
    }
}

impl Drop for SamplingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn state_key(state: &Arc<Mutex<SchedulerState>>) -> usize {
    Arc::as_ptr(state) as usize
}

fn lock(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Move to `next` unless the scheduler was stopped meanwhile.
fn transition(state: &Mutex<SchedulerState>, next: SchedulerState) -> bool {
    let mut current = lock(state);
    if *current == SchedulerState::Stopped {
        return false;
    }
    *current = next;
    true
}

/// Deliver under the state lock so `stop` cannot interleave with a delivery.
fn deliver<F>(
    state: &Arc<Mutex<SchedulerState>>,
    stop_rx: &watch::Receiver<bool>,
    on_event: &mut F,
    event: SamplerEvent,
) -> bool
where
    F: FnMut(SamplerEvent),
{
    let mut current = lock(state);
    if *current == SchedulerState::Stopped {
        return false;
    }
    *current = SchedulerState::Scheduled;

    let outer = DELIVERING.replace(state_key(state));
    on_event(event);
    DELIVERING.set(outer);

    if *stop_rx.borrow() {
        *current = SchedulerState::Stopped;
        return false;
    }
    true
}

async fn wait_in_flight<T>(slot: &mut Option<JoinHandle<T>>) -> Option<Result<T, tokio::task::JoinError>> {
    match slot {
        Some(handle) => Some(handle.await),
        None => std::future::pending().await,
    }
}

async fn run_loop<P, F>(
    provider: Arc<P>,
    interval: Duration,
    state: Arc<Mutex<SchedulerState>>,
    mut stop_rx: watch::Receiver<bool>,
    mut on_event: F,
) where
    P: SnapshotProvider + Send + Sync + 'static,
    F: FnMut(SamplerEvent) + Send + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<Result<Snapshot>>> = None;

    if !transition(&state, SchedulerState::Scheduled) {
        return;
    }

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if in_flight.is_some() {
                    tracing::debug!("previous sample still in flight, skipping tick");
                    continue;
                }
                if !transition(&state, SchedulerState::Sampling) {
                    break;
                }
                let provider = Arc::clone(&provider);
                in_flight = Some(tokio::spawn(async move { provider.fetch_snapshot().await }));
            }
            Some(joined) = wait_in_flight(&mut in_flight) => {
                in_flight = None;
                let event = match joined {
                    Ok(Ok(snapshot)) => SamplerEvent::Sample(snapshot),
                    Ok(Err(err)) => {
                        tracing::warn!(error = %err, "snapshot fetch failed");
                        SamplerEvent::Failed(err)
                    }
                    Err(join_err) => {
                        tracing::warn!(error = %join_err, "snapshot task aborted");
                        SamplerEvent::Failed(eyre!("snapshot task aborted: {join_err}"))
                    }
                };
                if !deliver(&state, &stop_rx, &mut on_event, event) {
                    break;
                }
            }
        }
    }

    tracing::debug!("sampling scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct SlowProvider {
        delay: Duration,
        started: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        fail_first: bool,
    }

    impl SnapshotProvider for SlowProvider {
        async fn fetch_snapshot(&self) -> Result<Snapshot> {
            let call = self.started.fetch_add(1, Ordering::SeqCst);
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail_first && call == 0 {
                return Err(eyre!("provider unavailable"));
            }
            Ok(Snapshot {
                captured_at_ms: call as u64 + 1,
                ..Snapshot::default()
            })
        }
    }

    struct GatedProvider {
        started: AtomicUsize,
        release: Notify,
    }

    impl SnapshotProvider for GatedProvider {
        async fn fetch_snapshot(&self) -> Result<Snapshot> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(Snapshot::default())
        }
    }

    fn collect_events() -> (Arc<Mutex<Vec<SamplerEvent>>>, impl FnMut(SamplerEvent) + Send + 'static) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        (events, move |event| sink.lock().unwrap().push(event))
    }

    #[tokio::test(start_paused = true)]
    async fn first_sample_is_immediate() {
        let provider = Arc::new(SlowProvider::default());
        let (events, on_event) = collect_events();
        let scheduler = SamplingScheduler::start(Arc::clone(&provider), Duration::from_secs(2), on_event);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(provider.started.load(Ordering::SeqCst), 1);
        assert_eq!(events.lock().unwrap().len(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_never_overlaps() {
        let provider = Arc::new(SlowProvider {
            delay: Duration::from_millis(250),
            ..SlowProvider::default()
        });
        let (events, on_event) = collect_events();
        let _scheduler =
            SamplingScheduler::start(Arc::clone(&provider), Duration::from_millis(100), on_event);

        tokio::time::sleep(Duration::from_millis(1_050)).await;

        assert_eq!(provider.max_active.load(Ordering::SeqCst), 1);
        let started = provider.started.load(Ordering::SeqCst);
        assert!((3..=5).contains(&started), "started {started} fetches");
        let delivered = events.lock().unwrap().len();
        assert!(delivered >= 2 && delivered <= started);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_does_not_halt_ticking() {
        let provider = Arc::new(SlowProvider {
            fail_first: true,
            ..SlowProvider::default()
        });
        let (events, on_event) = collect_events();
        let _scheduler =
            SamplingScheduler::start(Arc::clone(&provider), Duration::from_millis(100), on_event);

        tokio::time::sleep(Duration::from_millis(350)).await;

        let events = events.lock().unwrap();
        assert!(matches!(events[0], SamplerEvent::Failed(_)));
        assert!(events[1..].iter().all(|e| matches!(e, SamplerEvent::Sample(_))));
        assert!(events.len() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_in_flight_result() {
        let provider = Arc::new(GatedProvider {
            started: AtomicUsize::new(0),
            release: Notify::new(),
        });
        let (events, on_event) = collect_events();
        let scheduler =
            SamplingScheduler::start(Arc::clone(&provider), Duration::from_millis(100), on_event);

        while provider.started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(scheduler.state(), SchedulerState::Sampling);

        scheduler.stop();
        provider.release.notify_one();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(provider.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn no_delivery_after_concurrent_stop_returns() {
        for _ in 0..20 {
            let delivered = Arc::new(AtomicUsize::new(0));
            let late = Arc::new(AtomicUsize::new(0));
            let stop_returned = Arc::new(AtomicBool::new(false));
            let on_event = {
                let delivered = Arc::clone(&delivered);
                let late = Arc::clone(&late);
                let stop_returned = Arc::clone(&stop_returned);
                move |_event| {
                    delivered.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_micros(300));
                    if stop_returned.load(Ordering::SeqCst) {
                        late.fetch_add(1, Ordering::SeqCst);
                    }
                }
            };
            let scheduler = Arc::new(SamplingScheduler::start(
                Arc::new(SlowProvider::default()),
                Duration::from_millis(1),
                on_event,
            ));
            while delivered.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }

            let stopper = Arc::clone(&scheduler);
            let flag = Arc::clone(&stop_returned);
            tokio::task::spawn_blocking(move || {
                stopper.stop();
                flag.store(true, Ordering::SeqCst);
            })
            .await
            .unwrap();

            let seen = delivered.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(late.load(Ordering::SeqCst), 0);
            assert_eq!(delivered.load(Ordering::SeqCst), seen);
            assert_eq!(scheduler.state(), SchedulerState::Stopped);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_from_the_callback_ends_delivery() {
        let provider = Arc::new(SlowProvider::default());
        let slot: Arc<Mutex<Option<SamplingScheduler>>> = Arc::new(Mutex::new(None));
        let delivered = Arc::new(AtomicUsize::new(0));
        let on_event = {
            let slot = Arc::clone(&slot);
            let delivered = Arc::clone(&delivered);
            move |_event| {
                delivered.fetch_add(1, Ordering::SeqCst);
                if let Some(scheduler) = slot.lock().unwrap().as_ref() {
                    scheduler.stop();
                }
            }
        };
        let scheduler =
            SamplingScheduler::start(Arc::clone(&provider), Duration::from_millis(100), on_event);
        *slot.lock().unwrap() = Some(scheduler);

        tokio::time::sleep(Duration::from_millis(1_000)).await;

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(provider.started.load(Ordering::SeqCst), 1);
        let scheduler = slot.lock().unwrap().take().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_scheduler_stops_it() {
        let provider = Arc::new(SlowProvider::default());
        let (events, on_event) = collect_events();
        let scheduler =
            SamplingScheduler::start(Arc::clone(&provider), Duration::from_millis(100), on_event);
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(scheduler);

        let seen = events.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(events.lock().unwrap().len(), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_clamped() {
        let provider = Arc::new(SlowProvider::default());
        let (events, on_event) = collect_events();
        let _scheduler = SamplingScheduler::start(Arc::clone(&provider), Duration::ZERO, on_event);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!events.lock().unwrap().is_empty());
    }
}
