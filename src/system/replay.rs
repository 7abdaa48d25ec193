use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};

use super::kill::{KillOutcome, KillSignal};
use super::provider::{ProcessController, SnapshotProvider};
use super::snapshot::Snapshot;

/// Plays back recorded snapshots, one per fetch.
pub struct ReplayProvider {
    pending: Mutex<VecDeque<Snapshot>>,
}

impl ReplayProvider {
    pub fn from_snapshots(snapshots: impl IntoIterator<Item = Snapshot>) -> Self {
        Self {
            pending: Mutex::new(snapshots.into_iter().collect()),
        }
    }

    /// Read a JSON-lines file, one snapshot per non-blank line.
    pub fn from_jsonl(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read replay file {}", path.display()))?;
        Self::parse_jsonl(&contents)
    }

    pub fn parse_jsonl(contents: &str) -> Result<Self> {
        let snapshots = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                Snapshot::from_json(line).wrap_err_with(|| format!("replay line {}", idx + 1))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_snapshots(snapshots))
    }

    pub fn remaining(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl SnapshotProvider for ReplayProvider {
    async fn fetch_snapshot(&self) -> Result<Snapshot> {
        let next = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.ok_or_else(|| eyre!("no data available: replay exhausted"))
    }
}

impl ProcessController for ReplayProvider {
    fn kill_process(&self, pid: u32, _signal: KillSignal) -> KillOutcome {
        KillOutcome::failed(format!(
            "Cannot signal PID {pid}: process control is unavailable for replayed snapshots"
        ))
    }
}
