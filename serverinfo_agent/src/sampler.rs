//! Background sampler: one periodic task per monitored value, plus the
//! hourly and daily traffic baseline rotations. Each task samples, updates
//! the snapshot cache and history, then pushes the result to every client.

use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::calc::{average, maximum, round2};
use crate::config::{MetricDefinition, MetricParams};
use crate::containers::sample_containers;
use crate::history::{
    container_series_key, container_series_prefix, cpu_series_key, ram_series_key,
    CONTAINER_HISTORY_LEN, CPU_HISTORY_LEN, RAM_HISTORY_LEN,
};
use crate::metrics::{
    sample_cpu, sample_disk, sample_ram, sample_software, sample_uptime, CPU_SAMPLE_DELAY,
};
use crate::netload::{next_rotation_after, rotate_all, sample_network, Rotation};
use crate::state::MonitoringState;
use crate::types::{ContainerInfo, ContainerListSnapshot, Sample, Snapshot};

/// Owns every periodic task; started and stopped as a unit.
pub struct Sampler {
    state: Arc<MonitoringState>,
    stop: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Sampler {
    pub fn new(state: Arc<MonitoringState>) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            state,
            stop,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn one task per metric (first sample fires immediately) and the
    /// two rotation jobs.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        info!("starting sampler with {} metrics", self.state.definitions().len());

        for def in self.state.definitions() {
            handles.push(spawn_metric_task(
                self.state.clone(),
                def.clone(),
                self.stop.subscribe(),
            ));
        }

        if !self.state.config.monitored_interfaces().is_empty() {
            for rotation in [Rotation::Hourly, Rotation::Daily] {
                handles.push(spawn_rotation_task(
                    self.state.clone(),
                    rotation,
                    self.stop.subscribe(),
                ));
            }
        }
    }

    /// Signal every task and wait for them to finish.
    pub async fn shutdown(&self) {
        let _ = self.stop.send(());
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for h in handles {
            let _ = h.await;
        }
        info!("sampler stopped");
    }
}

pub fn spawn_metric_task(
    state: Arc<MonitoringState>,
    def: MetricDefinition,
    mut stop_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(def.interval);
        // A sample that overruns its interval skips ticks instead of
        // queueing a burst; samples of one metric never overlap.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = ticker.tick() => {
                    tick(&state, &def).await;
                }
            }
        }
    })
}

fn spawn_rotation_task(
    state: Arc<MonitoringState>,
    rotation: Rotation,
    stop_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(run_rotation(state, rotation, Local::now, stop_rx))
}

/// Sleep until each hourly or daily boundary read off `clock`, then rotate
/// every monitored interface's baseline.
async fn run_rotation<C>(
    state: Arc<MonitoringState>,
    rotation: Rotation,
    clock: C,
    mut stop_rx: broadcast::Receiver<()>,
) where
    C: Fn() -> DateTime<Local>,
{
    let interfaces = state.config.monitored_interfaces();
    let mut last_fired: Option<DateTime<Local>> = None;
    loop {
        let now = clock();
        let due = next_rotation_after(rotation, &now, last_fired.as_ref());
        let wait = due
            .and_then(|at| (at - now).to_std().ok())
            .unwrap_or(Duration::from_secs(60));
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = tokio::time::sleep(wait) => {
                // No boundary (DST gap): look again after the fallback wait.
                if due.is_some() {
                    rotate_all(&state.store, &state.net_root, &interfaces, rotation).await;
                    last_fired = due;
                }
            }
        }
    }
}

/// Sample `def` once, cache and record the result, and publish it.
pub async fn tick(state: &MonitoringState, def: &MetricDefinition) -> Arc<Snapshot> {
    let snapshot = Arc::new(collect(state, def).await);
    state.set_snapshot(&def.id, snapshot.clone());
    state.broadcaster.publish_update(def, &snapshot);
    snapshot
}

async fn collect(state: &MonitoringState, def: &MetricDefinition) -> Snapshot {
    let timeout = state.config.command_timeout;
    let result = match &def.params {
        MetricParams::Cpu => sample_cpu(CPU_SAMPLE_DELAY).await.map(|cpu| {
            state.store.push(
                &cpu_series_key(&def.id),
                Sample::now(round2(100.0 - cpu.percentage.idle)),
                CPU_HISTORY_LEN,
            );
            Snapshot::Cpu(cpu)
        }),
        MetricParams::Ram => {
            let ram = sample_ram(&state.sys).await;
            state.store.push(
                &ram_series_key(&def.id),
                Sample::now(ram.percent_used),
                RAM_HISTORY_LEN,
            );
            Ok(Snapshot::Ram(ram))
        }
        MetricParams::Disk { path } => sample_disk(path.clone()).await.map(Snapshot::Disk),
        MetricParams::Network { interface } => {
            sample_network(&state.net_root, interface, &state.store)
                .await
                .map(Snapshot::Network)
        }
        MetricParams::Container => sample_containers(timeout).await.map(|rows| {
            let names: Vec<&str> = rows.iter().map(|row| row.name.as_str()).collect();
            forget_removed_containers(state, def, &names);
            let containers = rows
                .into_iter()
                .map(|row| {
                    let cpu = record_container(state, def, &row.name, "cpu", row.cpu);
                    let ram = record_container(state, def, &row.name, "ram", row.ram);
                    ContainerInfo {
                        name: row.name,
                        image: row.image,
                        status: row.status,
                        cpu: row.cpu,
                        ram: row.ram,
                        cpu_avg: cpu.0,
                        cpu_max: cpu.1,
                        ram_avg: ram.0,
                        ram_max: ram.1,
                    }
                })
                .collect();
            Snapshot::Containers(ContainerListSnapshot { containers })
        }),
        MetricParams::Software { instructions } => {
            Ok(Snapshot::Software(sample_software(instructions, timeout).await))
        }
        MetricParams::Uptime => Ok(Snapshot::Uptime(sample_uptime())),
    };

    result.unwrap_or_else(|e| {
        warn!("sampling {} failed: {e}", def.id);
        Snapshot::error(e.to_string())
    })
}

/// Push one container reading and return (avg, max) over the retained window.
fn record_container(
    state: &MonitoringState,
    def: &MetricDefinition,
    container: &str,
    field: &str,
    value: f64,
) -> (f64, f64) {
    let window = state.store.push(
        &container_series_key(&def.id, container, field),
        Sample::now(value),
        CONTAINER_HISTORY_LEN,
    );
    let values: Vec<f64> = window.iter().map(|s| s.y).collect();
    (
        round2(average(&values).unwrap_or(value)),
        round2(maximum(&values).unwrap_or(value)),
    )
}

/// Drop the in-memory series of containers missing from the latest listing.
fn forget_removed_containers(state: &MonitoringState, def: &MetricDefinition, names: &[&str]) {
    let keep: HashSet<String> = names
        .iter()
        .flat_map(|name| {
            ["cpu", "ram"].map(|field| container_series_key(&def.id, name, field))
        })
        .collect();
    let dropped = state
        .store
        .prune_series(&container_series_prefix(&def.id), &keep);
    if dropped > 0 {
        debug!("dropped {dropped} series of removed containers under {}", def.id);
    }
}
