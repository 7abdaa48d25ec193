use std::future::Future;

use color_eyre::Result;

use super::kill::{KillOutcome, KillSignal};
use super::snapshot::Snapshot;

/// Source of raw telemetry. One call produces one complete snapshot.
pub trait SnapshotProvider {
    fn fetch_snapshot(&self) -> impl Future<Output = Result<Snapshot>> + Send;
}

/// Something that can deliver a signal to a process on our behalf.
pub trait ProcessController {
    fn kill_process(&self, pid: u32, signal: KillSignal) -> KillOutcome;
}
