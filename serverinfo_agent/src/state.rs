//! Shared agent state: configuration, latest snapshots, history and the
//! client registry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use sysinfo::System;
use tokio::sync::Mutex;

use crate::broadcast::Broadcaster;
use crate::config::{Config, MetricDefinition, MetricParams};
use crate::history::{
    container_series_key, container_series_prefix, cpu_series_key, ram_series_key, MetricStore,
};
use crate::netload::SYS_CLASS_NET;
use crate::types::{Archive, ContainerArchive, InitEntry, InitialData, Snapshot};

pub type SharedSystem = Arc<Mutex<System>>;

pub struct MonitoringState {
    pub config: Config,
    pub store: MetricStore,
    pub broadcaster: Broadcaster,
    // Persistent sysinfo handle for memory refreshes
    pub sys: SharedSystem,
    /// Root holding per-interface counter directories.
    pub net_root: PathBuf,
    snapshots: RwLock<HashMap<String, Arc<Snapshot>>>,
}

impl MonitoringState {
    pub fn new(config: Config, store: MetricStore) -> Self {
        Self {
            config,
            store,
            broadcaster: Broadcaster::new(),
            sys: Arc::new(Mutex::new(System::new())),
            net_root: PathBuf::from(SYS_CLASS_NET),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_net_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.net_root = root.into();
        self
    }

    pub fn definitions(&self) -> &[MetricDefinition] {
        &self.config.monitored
    }

    /// Replace the cached snapshot for `id`.
    pub fn set_snapshot(&self, id: &str, snapshot: Arc<Snapshot>) {
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), snapshot);
    }

    pub fn snapshot(&self, id: &str) -> Option<Arc<Snapshot>> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn archive(&self, def: &MetricDefinition, latest: Option<&Snapshot>) -> Option<Archive> {
        match &def.params {
            MetricParams::Cpu => Some(Archive::Series(self.store.series(&cpu_series_key(&def.id)))),
            MetricParams::Ram => Some(Archive::Series(self.store.series(&ram_series_key(&def.id)))),
            MetricParams::Container => {
                let names: BTreeSet<String> = match latest {
                    Some(Snapshot::Containers(list)) => {
                        list.containers.iter().map(|c| c.name.clone()).collect()
                    }
                    // Not sampled since start: take names from persisted series.
                    _ => self.persisted_container_names(&def.id),
                };
                let per_container = names
                    .into_iter()
                    .map(|name| {
                        let series =
                            |field| self.store.series(&container_series_key(&def.id, &name, field));
                        let archive = ContainerArchive {
                            cpu: series("cpu"),
                            ram: series("ram"),
                        };
                        (name, archive)
                    })
                    .collect::<BTreeMap<_, _>>();
                Some(Archive::Containers(per_container))
            }
            MetricParams::Disk { .. }
            | MetricParams::Network { .. }
            | MetricParams::Software { .. }
            | MetricParams::Uptime => None,
        }
    }

    fn persisted_container_names(&self, id: &str) -> BTreeSet<String> {
        let prefix = container_series_prefix(id);
        self.store
            .persisted_keys()
            .iter()
            .filter_map(|key| {
                let rest = key.strip_prefix(&prefix)?;
                rest.strip_suffix("_cpu").or_else(|| rest.strip_suffix("_ram"))
            })
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Everything a freshly connected client needs: one entry per
    /// configured metric, in configuration order.
    pub fn initial_data(&self) -> InitialData {
        let entries = self
            .definitions()
            .iter()
            .map(|def| {
                let data = self.snapshot(&def.id);
                let archive = self.archive(def, data.as_deref());
                InitEntry {
                    kind: def.kind(),
                    id: def.id.clone(),
                    data,
                    archive,
                }
            })
            .collect();
        InitialData::new(entries)
    }
}
