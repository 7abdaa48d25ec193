use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use color_eyre::eyre::eyre;
use color_eyre::{Report, Result};
use tokio::sync::watch;

use crate::model::history::{HistoricalDataPoint, HistoryBuffer};
use crate::model::pipeline::Pipeline;
use crate::model::view::{ProcessView, ViewState, process_view};
use crate::scheduler::{SamplerEvent, SamplingScheduler};
use crate::system::kill::{KillOutcome, KillSignal};
use crate::system::process::Process;
use crate::system::provider::{ProcessController, SnapshotProvider};
use crate::system::snapshot::{Snapshot, unix_millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub history_capacity: usize,
    /// Start the history full of zeroed points so readers never see an
    /// empty series. On by default.
    pub prefill_history: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            history_capacity: crate::model::history::DEFAULT_CAPACITY,
            prefill_history: true,
        }
    }
}

/// What readers see. Every field is immutable once published.
#[derive(Debug, Clone)]
pub struct ModelState {
    pub snapshot: Option<Arc<Snapshot>>,
    pub history: Arc<HistoryBuffer>,
    pub cycles: u64,
}

#[derive(Debug)]
pub enum MonitorEvent {
    Sample {
        snapshot: Arc<Snapshot>,
        point: HistoricalDataPoint,
    },
    Failed(Report),
}

struct Shared {
    pipeline: Mutex<Pipeline>,
    state: watch::Sender<ModelState>,
    hidden: Mutex<HashSet<u32>>,
}

impl Shared {
    fn ingest(&self, raw: Snapshot) -> (Arc<Snapshot>, HistoricalDataPoint) {
        let snapshot = Arc::new(raw.sanitized().stamped());

        let (point, history) = {
            let mut pipeline = lock(&self.pipeline);
            let point = pipeline.ingest(&snapshot);
            (point, pipeline.history())
        };

        {
            let mut hidden = lock(&self.hidden);
            if !hidden.is_empty() {
                let present: HashSet<u32> = snapshot.processes.iter().map(|p| p.pid).collect();
                hidden.retain(|pid| present.contains(pid));
            }
        }

        let published = Arc::clone(&snapshot);
        self.state.send_modify(move |state| {
            state.snapshot = Some(published);
            state.history = history;
            state.cycles += 1;
        });

        (snapshot, point)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Ties a provider to the derivation pipeline and hands out read-only views.
pub struct Monitor<P> {
    provider: Arc<P>,
    interval: Duration,
    shared: Arc<Shared>,
    scheduler: Option<SamplingScheduler>,
}

impl<P> Monitor<P>
where
    P: SnapshotProvider + ProcessController + Send + Sync + 'static,
{
    pub fn new(provider: Arc<P>, settings: MonitorSettings) -> Self {
        let pipeline = if settings.prefill_history {
            Pipeline::seeded(settings.history_capacity, settings.interval, unix_millis())
        } else {
            Pipeline::new(HistoryBuffer::new(settings.history_capacity))
        };
        let (state, _) = watch::channel(ModelState {
            snapshot: None,
            history: pipeline.history(),
            cycles: 0,
        });

        Self {
            provider,
            interval: settings.interval,
            shared: Arc::new(Shared {
                pipeline: Mutex::new(pipeline),
                state,
                hidden: Mutex::new(HashSet::new()),
            }),
            scheduler: None,
        }
    }

    /// Begin periodic sampling. `on_event` sees every completed cycle after
    /// it has been folded into the published state.
    pub fn start<F>(&mut self, mut on_event: F) -> Result<()>
    where
        F: FnMut(MonitorEvent) + Send + 'static,
    {
        if self.scheduler.is_some() {
            return Err(eyre!("monitor is already running"));
        }
        let shared = Arc::clone(&self.shared);
        let scheduler = SamplingScheduler::start(
            Arc::clone(&self.provider),
            self.interval,
            move |event| match event {
                SamplerEvent::Sample(raw) => {
                    let (snapshot, point) = shared.ingest(raw);
                    on_event(MonitorEvent::Sample { snapshot, point });
                }
                SamplerEvent::Failed(err) => on_event(MonitorEvent::Failed(err)),
            },
        );
        self.scheduler = Some(scheduler);
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "monitor started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop();
            tracing::info!("monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Run a single cycle by hand. Refused while the scheduler owns the timeline.
    pub async fn sample_once(&self) -> Result<HistoricalDataPoint> {
        if self.is_running() {
            return Err(eyre!("cannot sample manually while the monitor is running"));
        }
        let raw = self.provider.fetch_snapshot().await?;
        let (_, point) = self.shared.ingest(raw);
        Ok(point)
    }

    pub fn history(&self, window: Option<usize>) -> Vec<HistoricalDataPoint> {
        self.shared.state.borrow().history.snapshot(window)
    }

    pub fn latest_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.state.borrow().snapshot.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ModelState> {
        self.shared.state.subscribe()
    }

    pub fn process_view(&self, view: &ViewState) -> ProcessView {
        let Some(snapshot) = self.latest_snapshot() else {
            return process_view(&[], view);
        };
        let hidden = lock(&self.shared.hidden).clone();
        if hidden.is_empty() {
            return process_view(&snapshot.processes, view);
        }
        let visible: Vec<Process> = snapshot
            .processes
            .iter()
            .filter(|p| !hidden.contains(&p.pid))
            .cloned()
            .collect();
        process_view(&visible, view)
    }

    pub fn kill_process(&self, pid: u32) -> KillOutcome {
        let outcome = self.provider.kill_process(pid, KillSignal::Kill);
        if outcome.success {
            lock(&self.shared.hidden).insert(pid);
            tracing::info!(pid, "{outcome}");
        } else {
            tracing::warn!(pid, "{outcome}");
        }
        outcome
    }
}

impl<P> Drop for Monitor<P> {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop();
        }
    }
}
