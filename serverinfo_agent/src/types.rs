//! Data types sent to dashboard clients over WebSocket.
//! Keep this module minimal and stable — it defines the wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Ram,
    Disk,
    Network,
    Container,
    Software,
    Uptime,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Ram => "ram",
            MetricKind::Disk => "disk",
            MetricKind::Network => "network",
            MetricKind::Container => "container",
            MetricKind::Software => "software",
            MetricKind::Uptime => "uptime",
        }
    }

    /// `purpose` of the message pushed to clients after each sample.
    pub fn update_purpose(self) -> &'static str {
        match self {
            MetricKind::Cpu => "updateCpuData",
            MetricKind::Ram => "updateRamData",
            MetricKind::Disk => "updateHddData",
            MetricKind::Network => "updateNetLoadData",
            MetricKind::Container => "updateContainerData",
            MetricKind::Software => "updateSoftVerData",
            MetricKind::Uptime => "updateUptimeData",
        }
    }
}

/// One point of a rolling chart series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub y: f64,
    pub t: DateTime<Utc>,
}

impl Sample {
    pub fn now(y: f64) -> Self {
        Self { y, t: Utc::now() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CpuPercentages {
    pub user: f64,
    pub nice: f64,
    pub sys: f64,
    pub idle: f64,
    pub iowait: f64,
    pub irq: f64,
    pub softirq: f64,
}

impl CpuPercentages {
    pub fn sum(&self) -> f64 {
        self.user + self.nice + self.sys + self.idle + self.iowait + self.irq + self.softirq
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuSnapshot {
    pub percentage: CpuPercentages,
    /// 1, 5 and 15 minute load averages.
    pub sysload: [f64; 3],
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RamSnapshot {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub shared: u64,
    pub cache: u64,
    pub avail: u64,
    pub percent_used: f64,
    pub percent_not_free: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskSnapshot {
    pub path: String,
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub percent: f64,
}

/// Byte counts for one direction of an interface. Windows without a stored
/// baseline are left out of the JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Traffic {
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yesterday: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub today: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lasthour: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSnapshot {
    pub interface: String,
    #[serde(rename = "in")]
    pub rx: Traffic,
    pub out: Traffic,
    /// Average outbound bytes/sec over the current hour.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avgload: Option<f64>,
    /// `avgload` as a share of a 100 Mbit/s link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    pub status: String,
    pub cpu: f64,
    pub ram: f64,
    pub cpu_avg: f64,
    pub cpu_max: f64,
    pub ram_avg: f64,
    pub ram_max: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContainerListSnapshot {
    pub containers: Vec<ContainerInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoftwareVersion {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UptimeSnapshot {
    pub seconds: u64,
    pub formatted: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorSnapshot {
    pub error: String,
}

/// Latest value of one monitored metric. Serialized without a variant tag;
/// clients know the shape from the message purpose or the entry `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Snapshot {
    Cpu(CpuSnapshot),
    Ram(RamSnapshot),
    Disk(DiskSnapshot),
    Network(NetworkSnapshot),
    Containers(ContainerListSnapshot),
    Software(Vec<SoftwareVersion>),
    Uptime(UptimeSnapshot),
    Error(ErrorSnapshot),
}

impl Snapshot {
    pub fn error(msg: impl Into<String>) -> Self {
        Snapshot::Error(ErrorSnapshot { error: msg.into() })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Snapshot::Error(_))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContainerArchive {
    pub cpu: Vec<Sample>,
    pub ram: Vec<Sample>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Archive {
    Series(Vec<Sample>),
    Containers(BTreeMap<String, ContainerArchive>),
}

/// `{"purpose":"update<Kind>Data","id":..,"data":..}`
#[derive(Debug, Serialize)]
pub struct UpdateMessage<'a> {
    pub purpose: &'static str,
    pub id: &'a str,
    pub data: &'a Snapshot,
}

#[derive(Debug, Serialize)]
pub struct InitEntry {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub id: String,
    pub data: Option<Arc<Snapshot>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<Archive>,
}

/// Full-state reply to `{"purpose":"init"}`.
#[derive(Debug, Serialize)]
pub struct InitialData {
    pub purpose: &'static str,
    pub data: Vec<InitEntry>,
}

impl InitialData {
    pub fn new(data: Vec<InitEntry>) -> Self {
        Self {
            purpose: "initialData",
            data,
        }
    }
}

/// Anything a client sends; only `purpose` is inspected.
#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub purpose: String,
}
