//! Per-interface traffic: live counters from sysfs compared against
//! baselines captured at the top of every hour and at midnight.

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::calc::{counter_delta, round2};
use crate::history::MetricStore;
use crate::metrics::SampleError;
use crate::types::{NetworkSnapshot, Traffic};

pub const SYS_CLASS_NET: &str = "/sys/class/net";

/// Link speed the throughput percentage is measured against.
pub const LINK_CAPACITY_MBIT: f64 = 100.0;

/// Cumulative byte counters of one interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    #[serde(rename = "in")]
    pub rx: u64,
    pub out: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineSpan {
    Hourly,
    Daily,
    Yesterday,
}

impl BaselineSpan {
    pub fn key(self, iface: &str) -> String {
        let span = match self {
            BaselineSpan::Hourly => "hourly",
            BaselineSpan::Daily => "daily",
            BaselineSpan::Yesterday => "yesterday",
        };
        format!("{span}_{iface}")
    }
}

/// Stored counters an interface's windows are measured from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Baselines {
    pub hourly: Option<Counters>,
    pub daily: Option<Counters>,
    pub yesterday: Option<Counters>,
}

impl Baselines {
    pub fn load(store: &MetricStore, iface: &str) -> Self {
        let get = |span: BaselineSpan| {
            store
                .get(&span.key(iface))
                .and_then(|v| serde_json::from_value::<Counters>(v).ok())
        };
        Self {
            hourly: get(BaselineSpan::Hourly),
            daily: get(BaselineSpan::Daily),
            yesterday: get(BaselineSpan::Yesterday),
        }
    }
}

/// Pull persisted baselines for `iface` into memory.
pub fn sync_baselines(store: &MetricStore, iface: &str) {
    for span in [BaselineSpan::Hourly, BaselineSpan::Daily, BaselineSpan::Yesterday] {
        store.sync(&span.key(iface));
    }
}

async fn read_counter(path: &Path) -> Result<u64, SampleError> {
    let s = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SampleError::Read {
            path: path.display().to_string(),
            source,
        })?;
    s.trim()
        .parse()
        .map_err(|_| SampleError::Format("interface byte counter"))
}

/// Read rx/tx byte counters of `iface` below `root` (normally /sys/class/net).
pub async fn read_counters(root: &Path, iface: &str) -> Result<Counters, SampleError> {
    let dir = root.join(iface);
    if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
        return Err(SampleError::MissingInterface(iface.to_string()));
    }
    let stats = dir.join("statistics");
    Ok(Counters {
        rx: read_counter(&stats.join("rx_bytes")).await?,
        out: read_counter(&stats.join("tx_bytes")).await?,
    })
}

fn traffic(total: u64, b: &Baselines, pick: fn(&Counters) -> u64) -> Traffic {
    Traffic {
        total,
        yesterday: match (b.daily, b.yesterday) {
            (Some(d), Some(y)) => Some(counter_delta(pick(&d), pick(&y))),
            _ => None,
        },
        today: b.daily.map(|d| counter_delta(total, pick(&d))),
        lasthour: b.hourly.map(|h| counter_delta(total, pick(&h))),
    }
}

/// Derive the traffic windows and average outbound load. `minute_of_hour`
/// is clamped to at least 1.
pub fn compute_load(
    iface: &str,
    total: Counters,
    baselines: &Baselines,
    minute_of_hour: u32,
) -> NetworkSnapshot {
    let rx = traffic(total.rx, baselines, |c| c.rx);
    let out = traffic(total.out, baselines, |c| c.out);

    let minutes = f64::from(minute_of_hour.max(1));
    let avgload = out.lasthour.map(|bytes| bytes as f64 / minutes / 60.0);
    let capacity_kb = LINK_CAPACITY_MBIT / 8.0 * 1024.0;
    let percent = avgload.map(|load| round2(load / 1024.0 / capacity_kb * 100.0));

    NetworkSnapshot {
        interface: iface.to_string(),
        rx,
        out,
        avgload: avgload.map(round2),
        percent,
    }
}

pub async fn sample_network(
    root: &Path,
    iface: &str,
    store: &MetricStore,
) -> Result<NetworkSnapshot, SampleError> {
    let total = read_counters(root, iface).await?;
    let baselines = Baselines::load(store, iface);
    Ok(compute_load(iface, total, &baselines, Local::now().minute()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Hourly,
    Daily,
}

/// Store `current` as the new baseline. The daily rotation first moves the
/// previous daily baseline into `yesterday`.
pub fn rotate(store: &MetricStore, iface: &str, rotation: Rotation, current: Counters) {
    let span = match rotation {
        Rotation::Hourly => BaselineSpan::Hourly,
        Rotation::Daily => {
            if let Some(prev) = store.get(&BaselineSpan::Daily.key(iface)) {
                store.set_and_persist(&BaselineSpan::Yesterday.key(iface), prev);
            }
            BaselineSpan::Daily
        }
    };
    match serde_json::to_value(current) {
        Ok(v) => store.set_and_persist(&span.key(iface), v),
        Err(e) => warn!("encoding baseline for {iface} failed: {e}"),
    }
}

pub async fn rotate_all(
    store: &MetricStore,
    root: &Path,
    interfaces: &[String],
    rotation: Rotation,
) {
    info!("{rotation:?} traffic baseline rotation for {} interfaces", interfaces.len());
    for iface in interfaces {
        match read_counters(root, iface).await {
            Ok(current) => rotate(store, iface, rotation, current),
            Err(e) => warn!("skipping {rotation:?} rotation for {iface}: {e}"),
        }
    }
}

/// Next top of the hour (hourly) or next midnight (daily) after `now`, in
/// `now`'s time zone.
pub fn next_rotation<Tz: TimeZone>(
    rotation: Rotation,
    now: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    let local = now.naive_local();
    let next: NaiveDateTime = match rotation {
        Rotation::Hourly => local.date().and_hms_opt(local.hour(), 0, 0)? + TimeDelta::hours(1),
        Rotation::Daily => local.date().succ_opt()?.and_hms_opt(0, 0, 0)?,
    };
    now.timezone().from_local_datetime(&next).earliest()
}

/// Like [`next_rotation`], but never at or before `last_fired`, so a clock
/// stepping backwards cannot repeat a boundary that already ran.
pub fn next_rotation_after<Tz: TimeZone>(
    rotation: Rotation,
    now: &DateTime<Tz>,
    last_fired: Option<&DateTime<Tz>>,
) -> Option<DateTime<Tz>> {
    let from = match last_fired {
        Some(last) => {
            let floor = last.clone() + TimeDelta::seconds(1);
            if floor > *now {
                floor
            } else {
                now.clone()
            }
        }
        None => now.clone(),
    };
    next_rotation(rotation, &from)
}
