use std::time::{SystemTime, UNIX_EPOCH};

use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use serde::{Deserialize, Serialize};

use super::process::{Process, finite_or_zero};

/// Current snapshot schema. Version 0 means "unversioned" and is accepted.
pub const SCHEMA_VERSION: u32 = 1;

/// One complete, timestamped reading of every monitored metric.
///
/// Every field is optional on input: missing readings default to zero so that
/// derived percentages and rates never see undefined values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Snapshot {
    pub schema_version: u32,
    pub captured_at_ms: u64,
    pub cpu: CpuReading,
    pub memory: MemoryReading,
    pub disk: DiskReading,
    pub network: NetworkReading,
    pub processes: Vec<Process>,
    /// `None` on machines without a battery or when it cannot be read.
    pub battery: Option<BatteryReading>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CpuReading {
    pub usage: f32,
    pub cores: usize,
    pub brand: String,
    pub per_core: Vec<f32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryReading {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub total_swap: u64,
    pub used_swap: u64,
    pub free_swap: u64,
}

/// Disk I/O since the provider's previous reading, not cumulative.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiskReading {
    pub read: u64,
    pub write: u64,
    pub volumes: Vec<DiskVolume>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiskVolume {
    pub name: String,
    pub mount_point: String,
    pub total_space: u64,
    pub available_space: u64,
    pub used_space: u64,
    pub file_system: String,
}

/// Cumulative byte counters summed over all interfaces.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkReading {
    pub rx_cumulative: u64,
    pub tx_cumulative: u64,
    pub interfaces: Vec<NetworkInterface>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceKind {
    #[serde(rename = "Ethernet/Wi-Fi")]
    EthernetOrWifi,
    FireWire,
    #[serde(rename = "Peer-to-Peer")]
    PeerToPeer,
    Bridge,
    #[serde(rename = "VPN Tunnel")]
    VpnTunnel,
    #[serde(rename = "Apple Wireless Direct Link")]
    AppleWirelessDirectLink,
    #[default]
    #[serde(other)]
    Other,
}

impl InterfaceKind {
    /// Infer the interface type from its name prefix.
    pub fn classify(name: &str) -> Self {
        if name.starts_with("en") {
            InterfaceKind::EthernetOrWifi
        } else if name.starts_with("fw") {
            InterfaceKind::FireWire
        } else if name.starts_with("p2p") {
            InterfaceKind::PeerToPeer
        } else if name.starts_with("bridge") {
            InterfaceKind::Bridge
        } else if name.starts_with("utun") {
            InterfaceKind::VpnTunnel
        } else if name.starts_with("awdl") {
            InterfaceKind::AppleWirelessDirectLink
        } else {
            InterfaceKind::Other
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,
    pub kind: InterfaceKind,
    pub received: u64,
    pub transmitted: u64,
    pub packets_received: u64,
    pub packets_transmitted: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryState {
    Charging,
    Discharging,
    Full,
    Empty,
    #[default]
    #[serde(other)]
    Unknown,
}

/// First battery reported by the platform. Energies are in watt-hours.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatteryReading {
    /// State of charge, 0-100.
    pub percentage: f32,
    pub state: BatteryState,
    pub energy: f32,
    pub energy_full: f32,
    pub energy_full_design: f32,
    /// Minutes.
    pub time_to_full: Option<f32>,
    /// Minutes.
    pub time_to_empty: Option<f32>,
    pub temperature_celsius: Option<f32>,
}

impl BatteryReading {
    /// Current full capacity as a percentage of design capacity. An unknown
    /// design capacity reports 100.
    pub fn health_percent(&self) -> f32 {
        if self.energy_full_design > 0.0 {
            self.energy_full / self.energy_full_design * 100.0
        } else {
            100.0
        }
    }

    fn sanitize(&mut self) {
        self.percentage = finite_or_zero(self.percentage).min(100.0);
        self.energy = finite_or_zero(self.energy);
        self.energy_full = finite_or_zero(self.energy_full);
        self.energy_full_design = finite_or_zero(self.energy_full_design);
        for minutes in [&mut self.time_to_full, &mut self.time_to_empty] {
            *minutes = minutes.filter(|m| m.is_finite() && *m >= 0.0);
        }
        self.temperature_celsius = self.temperature_celsius.filter(|t| t.is_finite());
    }
}

impl Snapshot {
    /// Parse one serialized snapshot, validating the schema version and
    /// default-filling anything the producer left out.
    pub fn from_json(input: &str) -> Result<Self> {
        let snapshot: Snapshot =
            serde_json::from_str(input).wrap_err("malformed snapshot payload")?;
        if snapshot.schema_version > SCHEMA_VERSION {
            return Err(eyre!(
                "unsupported snapshot schema version {} (newest supported is {SCHEMA_VERSION})",
                snapshot.schema_version
            ));
        }
        Ok(snapshot.sanitized())
    }

    /// Replace non-finite or negative percentages with zero.
    pub fn sanitized(mut self) -> Self {
        self.cpu.usage = finite_or_zero(self.cpu.usage);
        for core in &mut self.cpu.per_core {
            *core = finite_or_zero(*core);
        }
        for process in &mut self.processes {
            process.sanitize();
        }
        if let Some(battery) = &mut self.battery {
            battery.sanitize();
        }
        self
    }

    /// Use the current time if the provider left the capture time out.
    pub fn stamped(mut self) -> Self {
        if self.captured_at_ms == 0 {
            self.captured_at_ms = unix_millis();
        }
        self
    }
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
