use std::sync::{Arc, Mutex, MutexGuard};

use color_eyre::Result;
use color_eyre::eyre::eyre;
use serde::Serialize;
use sysinfo::{
    Disks, Networks, Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System,
    Users,
};

use super::kill::{KillOutcome, KillResult, KillSignal};
use super::process::{Process, ProcessState};
use super::provider::{ProcessController, SnapshotProvider};
use super::snapshot::{
    BatteryReading, BatteryState, CpuReading, DiskReading, DiskVolume, InterfaceKind,
    MemoryReading, NetworkInterface, NetworkReading, SCHEMA_VERSION, Snapshot, unix_millis,
};

const APFS_DATA_VOLUME: &str = "/System/Volumes/Data";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OsInfo {
    pub name: String,
    pub version: String,
    pub kernel_version: String,
    pub hostname: String,
    pub uptime_seconds: u64,
}

/// Reads the local machine through `sysinfo`.
pub struct Collector {
    sys: System,
    users: Users,
    networks: Networks,
    disks: Disks,
    show_threads: bool,
}

impl Collector {
    pub fn new(show_threads: bool) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_all();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );
        Collector {
            sys,
            users: Users::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
            show_threads,
        }
    }

    pub fn os_info() -> OsInfo {
        let unknown = || "Unknown".to_string();
        OsInfo {
            name: System::name().unwrap_or_else(unknown),
            version: System::os_version().unwrap_or_else(unknown),
            kernel_version: System::kernel_version().unwrap_or_else(unknown),
            hostname: System::host_name().unwrap_or_else(unknown),
            uptime_seconds: System::uptime(),
        }
    }

    pub fn refresh(&mut self) -> Snapshot {
        let _refresh_span = tracing::debug_span!("collector.refresh").entered();

        self.sys.refresh_memory();
        self.sys.refresh_cpu_all();
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );
        self.networks.refresh(true);
        self.disks.refresh(true);

        Snapshot {
            schema_version: SCHEMA_VERSION,
            captured_at_ms: unix_millis(),
            cpu: self.cpu_reading(),
            memory: self.memory_reading(),
            disk: self.disk_reading(),
            network: self.network_reading(),
            processes: self.processes(),
            battery: battery_reading(),
        }
    }

    fn cpu_reading(&self) -> CpuReading {
        let cpus = self.sys.cpus();
        CpuReading {
            usage: self.sys.global_cpu_usage(),
            cores: cpus.len(),
            brand: cpus.first().map(|c| c.brand().to_string()).unwrap_or_default(),
            per_core: cpus.iter().map(|c| c.cpu_usage()).collect(),
        }
    }

    fn memory_reading(&self) -> MemoryReading {
        MemoryReading {
            total: self.sys.total_memory(),
            used: self.sys.used_memory(),
            free: self.sys.free_memory(),
            total_swap: self.sys.total_swap(),
            used_swap: self.sys.used_swap(),
            free_swap: self.sys.free_swap(),
        }
    }

    fn disk_reading(&self) -> DiskReading {
        let list = self.disks.list();
        let (read, write) = list.iter().fold((0u64, 0u64), |(r, w), disk| {
            let usage = disk.usage();
            (
                r.saturating_add(usage.read_bytes),
                w.saturating_add(usage.written_bytes),
            )
        });

        let has_data_volume = list
            .iter()
            .any(|d| d.mount_point().to_string_lossy() == APFS_DATA_VOLUME);
        let volumes = list
            .iter()
            .filter(|disk| {
                !is_redundant_volume(&disk.mount_point().to_string_lossy(), has_data_volume)
            })
            .map(|disk| DiskVolume {
                name: disk.name().to_string_lossy().to_string(),
                mount_point: disk.mount_point().to_string_lossy().to_string(),
                total_space: disk.total_space(),
                available_space: disk.available_space(),
                used_space: disk.total_space().saturating_sub(disk.available_space()),
                file_system: disk.file_system().to_string_lossy().to_string(),
            })
            .collect();

        DiskReading {
            read,
            write,
            volumes,
        }
    }

    fn network_reading(&self) -> NetworkReading {
        let mut reading = NetworkReading::default();
        for (name, data) in self.networks.iter() {
            // Totals cover every interface, the list only physical ones.
            reading.rx_cumulative = reading.rx_cumulative.saturating_add(data.total_received());
            reading.tx_cumulative = reading.tx_cumulative.saturating_add(data.total_transmitted());
            if is_virtual_interface(name) {
                continue;
            }
            reading.interfaces.push(NetworkInterface {
                name: name.clone(),
                kind: InterfaceKind::classify(name),
                received: data.total_received(),
                transmitted: data.total_transmitted(),
                packets_received: data.total_packets_received(),
                packets_transmitted: data.total_packets_transmitted(),
            });
        }
        reading.interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        reading
    }

    fn processes(&self) -> Vec<Process> {
        let now_secs = unix_millis() / 1000;
        let total_memory = self.sys.total_memory();

        let mut processes: Vec<Process> = self
            .sys
            .processes()
            .iter()
            .filter(|(_, process)| self.show_threads || process.thread_kind().is_none())
            .map(|(pid, process)| {
                let user = process
                    .user_id()
                    .map(|uid| {
                        self.users
                            .get_user_by_id(uid)
                            .map(|u| u.name().to_string())
                            .unwrap_or_else(|| format!("{uid:?}"))
                    })
                    .unwrap_or_else(|| "unknown".to_string());
                let command = process
                    .cmd()
                    .iter()
                    .map(|s| s.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");
                let disk = process.disk_usage();
                let memory_percent = if total_memory == 0 {
                    0.0
                } else {
                    (process.memory() as f64 / total_memory as f64 * 100.0) as f32
                };

                Process {
                    pid: pid.as_u32(),
                    ppid: process.parent().map(|p| p.as_u32()).unwrap_or(0),
                    name: process.name().to_string_lossy().to_string(),
                    cpu_percent: process.cpu_usage(),
                    memory_bytes: process.memory(),
                    memory_percent,
                    user,
                    run_time_seconds: now_secs.saturating_sub(process.start_time()),
                    cpu_time_seconds: process.run_time(),
                    status: map_status(process.status()),
                    command,
                    disk_read: disk.read_bytes,
                    disk_write: disk.written_bytes,
                    is_thread: process.thread_kind().is_some(),
                }
            })
            .collect();

        processes.sort_by_key(|p| p.pid);
        processes
    }

    pub fn kill(&self, pid: u32, signal: KillSignal) -> KillResult {
        let Some(process) = self.sys.process(Pid::from_u32(pid)) else {
            return KillResult::NotFound(pid);
        };
        let sys_signal = match signal {
            KillSignal::Terminate => Signal::Term,
            KillSignal::Kill => Signal::Kill,
        };
        match process.kill_with(sys_signal) {
            Some(true) => KillResult::Success(pid, signal),
            Some(false) => KillResult::Failed(
                pid,
                format!("Failed to send {} to PID {pid}", signal.name()),
            ),
            None => {
                // Signal not supported on this platform, fall back to kill()
                if process.kill() {
                    KillResult::Success(pid, signal)
                } else {
                    KillResult::Failed(pid, format!("Failed to kill PID {pid} (permission denied?)"))
                }
            }
        }
    }
}

fn map_status(status: ProcessStatus) -> ProcessState {
    match status {
        ProcessStatus::Run => ProcessState::Running,
        ProcessStatus::Sleep => ProcessState::Sleep,
        ProcessStatus::Idle => ProcessState::Idle,
        ProcessStatus::Zombie => ProcessState::Zombie,
        ProcessStatus::Stop => ProcessState::Stopped,
        ProcessStatus::Dead => ProcessState::Dead,
        ProcessStatus::Tracing => ProcessState::Tracing,
        ProcessStatus::Wakekill => ProcessState::Wakekill,
        ProcessStatus::Waking => ProcessState::Waking,
        ProcessStatus::Parked => ProcessState::Parked,
        ProcessStatus::LockBlocked => ProcessState::Blocked,
        ProcessStatus::UninterruptibleDiskSleep => ProcessState::DiskSleep,
        _ => ProcessState::Unknown,
    }
}

/// The battery manager is not `Send`, so one is opened per refresh on the
/// blocking thread.
fn battery_reading() -> Option<BatteryReading> {
    use battery::units::energy::watt_hour;
    use battery::units::ratio::percent;
    use battery::units::thermodynamic_temperature::degree_celsius;
    use battery::units::time::minute;

    let manager = match battery::Manager::new() {
        Ok(manager) => manager,
        Err(err) => {
            tracing::debug!(%err, "battery manager unavailable");
            return None;
        }
    };
    let battery = match manager.batteries().ok()?.next()? {
        Ok(battery) => battery,
        Err(err) => {
            tracing::debug!(%err, "failed to read battery");
            return None;
        }
    };

    Some(BatteryReading {
        percentage: battery.state_of_charge().get::<percent>(),
        state: map_battery_state(battery.state()),
        energy: battery.energy().get::<watt_hour>(),
        energy_full: battery.energy_full().get::<watt_hour>(),
        energy_full_design: battery.energy_full_design().get::<watt_hour>(),
        time_to_full: battery.time_to_full().map(|t| t.get::<minute>()),
        time_to_empty: battery.time_to_empty().map(|t| t.get::<minute>()),
        temperature_celsius: battery.temperature().map(|t| t.get::<degree_celsius>()),
    })
}

fn map_battery_state(state: battery::State) -> BatteryState {
    match state {
        battery::State::Charging => BatteryState::Charging,
        battery::State::Discharging => BatteryState::Discharging,
        battery::State::Full => BatteryState::Full,
        battery::State::Empty => BatteryState::Empty,
        _ => BatteryState::Unknown,
    }
}

/// Loopback and virtual adapters are left out of the interface list.
pub fn is_virtual_interface(name: &str) -> bool {
    const VIRTUAL_PREFIXES: [&str; 8] =
        ["lo", "bridge", "utun", "awdl", "llw", "ap", "gif", "stf"];
    VIRTUAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// On APFS the root volume duplicates `/System/Volumes/Data`, and the other
/// `/System/Volumes/*` mounts are internal.
pub fn is_redundant_volume(mount_point: &str, has_data_volume: bool) -> bool {
    if mount_point == "/" {
        has_data_volume
    } else {
        mount_point.starts_with("/System/Volumes/") && mount_point != APFS_DATA_VOLUME
    }
}

/// `Collector` behind the provider and controller traits.
#[derive(Clone)]
pub struct SysinfoProvider {
    collector: Arc<Mutex<Collector>>,
}

impl SysinfoProvider {
    pub fn new(show_threads: bool) -> Self {
        Self {
            collector: Arc::new(Mutex::new(Collector::new(show_threads))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Collector> {
        self.collector.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SnapshotProvider for SysinfoProvider {
    async fn fetch_snapshot(&self) -> Result<Snapshot> {
        let collector = Arc::clone(&self.collector);
        let snapshot = tokio::task::spawn_blocking(move || {
            let mut collector = collector.lock().unwrap_or_else(|e| e.into_inner());
            collector.refresh()
        })
        .await
        .map_err(|e| eyre!("system collector task failed: {e}"))?;
        Ok(snapshot)
    }
}

impl ProcessController for SysinfoProvider {
    fn kill_process(&self, pid: u32, signal: KillSignal) -> KillOutcome {
        self.lock().kill(pid, signal).into()
    }
}
