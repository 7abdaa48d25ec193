use std::cmp::Ordering;
use std::collections::HashSet;
use std::str::FromStr;

use color_eyre::Report;
use color_eyre::eyre::eyre;

use super::tree::{ProcessForest, TreeRow};
use crate::action::ViewAction;
use crate::system::process::Process;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortKey {
    Pid,
    Cpu,
    MemoryBytes,
    MemoryPercentage,
    RunTime,
    CpuTime,
    DiskRead,
    DiskWrite,
    Name,
    User,
    Status,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKind {
    Numeric,
    Text,
}

impl SortKey {
    pub const ALL: [SortKey; 12] = [
        SortKey::Pid,
        SortKey::Cpu,
        SortKey::MemoryBytes,
        SortKey::MemoryPercentage,
        SortKey::RunTime,
        SortKey::CpuTime,
        SortKey::DiskRead,
        SortKey::DiskWrite,
        SortKey::Name,
        SortKey::User,
        SortKey::Status,
        SortKey::Command,
    ];

    pub fn kind(self) -> SortKind {
        match self {
            SortKey::Name | SortKey::User | SortKey::Status | SortKey::Command => SortKind::Text,
            _ => SortKind::Numeric,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortKey::Pid => "pid",
            SortKey::Cpu => "cpu",
            SortKey::MemoryBytes => "memoryBytes",
            SortKey::MemoryPercentage => "memoryPercentage",
            SortKey::RunTime => "runTime",
            SortKey::CpuTime => "cpuTime",
            SortKey::DiskRead => "diskRead",
            SortKey::DiskWrite => "diskWrite",
            SortKey::Name => "name",
            SortKey::User => "user",
            SortKey::Status => "status",
            SortKey::Command => "command",
        }
    }

    fn numeric(self, p: &Process) -> f64 {
        match self {
            SortKey::Pid => p.pid as f64,
            SortKey::Cpu => p.cpu_percent as f64,
            SortKey::MemoryBytes => p.memory_bytes as f64,
            SortKey::MemoryPercentage => p.memory_percent as f64,
            SortKey::RunTime => p.run_time_seconds as f64,
            SortKey::CpuTime => p.cpu_time_seconds as f64,
            SortKey::DiskRead => p.disk_read as f64,
            SortKey::DiskWrite => p.disk_write as f64,
            _ => 0.0,
        }
    }

    fn text(self, p: &Process) -> &str {
        match self {
            SortKey::Name => &p.name,
            SortKey::User => &p.user,
            SortKey::Status => p.status.label(),
            SortKey::Command => &p.command,
            _ => "",
        }
    }

    /// Ascending comparison of two processes on this key.
    pub fn compare(self, a: &Process, b: &Process) -> Ordering {
        match self.kind() {
            SortKind::Numeric => self.numeric(a).total_cmp(&self.numeric(b)),
            SortKind::Text => compare_case_insensitive(self.text(a), self.text(b)),
        }
    }
}

impl FromStr for SortKey {
    type Err = Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        let key = match normalized.as_str() {
            "pid" => SortKey::Pid,
            "cpu" => SortKey::Cpu,
            "memory" | "mem" | "memorybytes" => SortKey::MemoryBytes,
            "memorypercentage" | "memorypercent" | "mem%" => SortKey::MemoryPercentage,
            "runtime" => SortKey::RunTime,
            "cputime" => SortKey::CpuTime,
            "diskread" => SortKey::DiskRead,
            "diskwrite" => SortKey::DiskWrite,
            "name" => SortKey::Name,
            "user" => SortKey::User,
            "status" => SortKey::Status,
            "command" | "cmd" => SortKey::Command,
            _ => return Err(eyre!("unknown sort key `{s}`")),
        };
        Ok(key)
    }
}

fn compare_case_insensitive(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// The single active sort column and its direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortState {
    pub key: SortKey,
    pub descending: bool,
}

impl Default for SortState {
    fn default() -> Self {
        Self {
            key: SortKey::Cpu,
            descending: true,
        }
    }
}

impl SortState {
    pub fn new(key: SortKey, descending: bool) -> Self {
        Self { key, descending }
    }

    /// Same key flips the direction; a different key starts descending.
    pub fn select(&mut self, key: SortKey) {
        if self.key == key {
            self.descending = !self.descending;
        } else {
            self.key = key;
            self.descending = true;
        }
    }

    pub fn compare(&self, a: &Process, b: &Process) -> Ordering {
        let ord = self.key.compare(a, b);
        if self.descending { ord.reverse() } else { ord }
    }
}

/// Case-insensitive substring match on the process name.
/// `needle_lower` must already be lowercase.
pub fn matches_filter(process: &Process, needle_lower: &str) -> bool {
    needle_lower.is_empty() || process.name.to_lowercase().contains(needle_lower)
}

pub fn filter_processes<'a>(processes: &'a [Process], filter_text: &str) -> Vec<&'a Process> {
    let needle = filter_text.to_lowercase();
    processes
        .iter()
        .filter(|p| matches_filter(p, &needle))
        .collect()
}

/// Stable sort: rows that tie keep their relative order.
pub fn sort_processes(rows: &mut [&Process], sort: SortState) {
    rows.sort_by(|a, b| sort.compare(a, b));
}

/// Filter then sort a flat process list.
pub fn view(processes: &[Process], filter_text: &str, sort: SortState) -> Vec<Process> {
    let mut rows = filter_processes(processes, filter_text);
    sort_processes(&mut rows, sort);
    rows.into_iter().cloned().collect()
}

/// Which tree nodes are expanded: a default plus the pids toggled away from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    default_expanded: bool,
    toggled: HashSet<u32>,
}

impl Default for Expansion {
    fn default() -> Self {
        Self::all_expanded()
    }
}

impl Expansion {
    pub fn all_expanded() -> Self {
        Self {
            default_expanded: true,
            toggled: HashSet::new(),
        }
    }

    pub fn all_collapsed() -> Self {
        Self {
            default_expanded: false,
            toggled: HashSet::new(),
        }
    }

    pub fn is_expanded(&self, pid: u32) -> bool {
        self.default_expanded != self.toggled.contains(&pid)
    }

    pub fn toggle(&mut self, pid: u32) {
        if !self.toggled.remove(&pid) {
            self.toggled.insert(pid);
        }
    }
}

/// View state owned by the caller and passed into every view query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub filter_text: String,
    pub sort: SortState,
    pub tree_mode: bool,
    pub expansion: Expansion,
}

impl ViewState {
    pub fn dispatch(&mut self, action: ViewAction) {
        match action {
            ViewAction::SortBy(key) => self.sort.select(key),
            ViewAction::ToggleExpanded(pid) => self.expansion.toggle(pid),
            ViewAction::ExpandAll => self.expansion = Expansion::all_expanded(),
            ViewAction::CollapseAll => self.expansion = Expansion::all_collapsed(),
            ViewAction::UpdateFilter(text) => self.filter_text = text,
            ViewAction::ClearFilter => self.filter_text.clear(),
            ViewAction::ToggleTreeMode => self.tree_mode = !self.tree_mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessView {
    Flat(Vec<Process>),
    Tree(Vec<TreeRow>),
}

impl ProcessView {
    pub fn len(&self) -> usize {
        match self {
            ProcessView::Flat(rows) => rows.len(),
            ProcessView::Tree(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row pids in display order.
    pub fn pids(&self) -> Vec<u32> {
        match self {
            ProcessView::Flat(rows) => rows.iter().map(|p| p.pid).collect(),
            ProcessView::Tree(rows) => rows.iter().map(|r| r.process.pid).collect(),
        }
    }
}

pub fn process_view(processes: &[Process], state: &ViewState) -> ProcessView {
    if state.tree_mode {
        let forest = ProcessForest::build(processes);
        ProcessView::Tree(forest.flatten(state.sort, &state.filter_text, &state.expansion))
    } else {
        ProcessView::Flat(view(processes, &state.filter_text, state.sort))
    }
}
