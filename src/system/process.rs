use std::fmt;

use serde::{Deserialize, Serialize};

/// Scheduler state of a process as reported by the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    Running,
    Sleep,
    Idle,
    Zombie,
    Stopped,
    Dead,
    Tracing,
    Wakekill,
    Waking,
    Parked,
    Blocked,
    DiskSleep,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ProcessState {
    pub fn label(self) -> &'static str {
        match self {
            ProcessState::Running => "Running",
            ProcessState::Sleep => "Sleep",
            ProcessState::Idle => "Idle",
            ProcessState::Zombie => "Zombie",
            ProcessState::Stopped => "Stopped",
            ProcessState::Dead => "Dead",
            ProcessState::Tracing => "Tracing",
            ProcessState::Wakekill => "Wakekill",
            ProcessState::Waking => "Waking",
            ProcessState::Parked => "Parked",
            ProcessState::Blocked => "Blocked",
            ProcessState::DiskSleep => "DiskSleep",
            ProcessState::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One row of the provider's process list.
///
/// `pid` is only unique within a single snapshot. A `ppid` of 0, or one that
/// names no process in the same snapshot, makes the process a root.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Process {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    pub memory_percent: f32,
    pub user: String,
    pub run_time_seconds: u64,
    pub cpu_time_seconds: u64,
    pub status: ProcessState,
    pub command: String,
    pub disk_read: u64,
    pub disk_write: u64,
    /// Display hint only; threads are placed in the tree like processes.
    pub is_thread: bool,
}

impl Process {
    pub(crate) fn sanitize(&mut self) {
        self.cpu_percent = finite_or_zero(self.cpu_percent);
        self.memory_percent = finite_or_zero(self.memory_percent);
    }
}

pub(crate) fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        0.0
    }
}
