use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KillSignal {
    Terminate,
    #[default]
    Kill,
}

impl KillSignal {
    pub fn name(self) -> &'static str {
        match self {
            KillSignal::Terminate => "SIGTERM",
            KillSignal::Kill => "SIGKILL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillResult {
    Success(u32, KillSignal),
    Failed(u32, String),
    NotFound(u32),
}

/// What the caller of `kill_process` gets back, reported verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KillOutcome {
    pub success: bool,
    pub message: String,
}

impl KillOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl From<KillResult> for KillOutcome {
    fn from(result: KillResult) -> Self {
        match result {
            KillResult::Success(pid, signal) => KillOutcome {
                success: true,
                message: format!("Sent {} to PID {pid}", signal.name()),
            },
            KillResult::Failed(_, message) => KillOutcome::failed(message),
            KillResult::NotFound(pid) => KillOutcome::failed(format!("Process {pid} not found")),
        }
    }
}

impl fmt::Display for KillOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
