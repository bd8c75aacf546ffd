//! Rolling history survives a restart through the SQLite store.
use serverinfo_agent::config::{Config, MetricDefinition, MetricParams};
use serverinfo_agent::history::{container_series_key, cpu_series_key, MetricStore, CPU_HISTORY_LEN};
use serverinfo_agent::kv::SqliteKv;
use serverinfo_agent::state::MonitoringState;
use serverinfo_agent::types::Sample;
use std::sync::Arc;

fn open(path: &std::path::Path) -> MetricStore {
    MetricStore::with_backing(Arc::new(SqliteKv::open(path).expect("open store")))
}

#[test]
fn window_keeps_last_n_in_push_order() {
    let store = MetricStore::in_memory();
    for i in 0..500 {
        store.push("cpuArchive_cpu", Sample::now(i as f64), 360);
    }
    let got = store.get_series("cpuArchive_cpu").unwrap();
    assert_eq!(got.len(), 360);
    let ys: Vec<f64> = got.iter().map(|s| s.y).collect();
    let expected: Vec<f64> = (140..500).map(|i| i as f64).collect();
    assert_eq!(ys, expected);
}

#[test]
fn persisted_series_reloads_identically() {
    let tmp = tempfile::NamedTempFile::new().expect("tempfile");
    let before = {
        let store = open(tmp.path());
        for i in 0..20 {
            store.push("ramArchive_ram", Sample::now(i as f64 * 1.5), 10);
        }
        store.get_series("ramArchive_ram").unwrap()
    };

    // simulated restart
    let store = open(tmp.path());
    assert!(store.get_series("ramArchive_ram").is_none());
    assert!(store.hydrate("ramArchive_ram"));
    assert_eq!(store.get_series("ramArchive_ram").unwrap(), before);
    assert!(store.persisted_keys().contains(&"ramArchive_ram".to_string()));
}

#[test]
fn unknown_key_does_not_hydrate() {
    let tmp = tempfile::NamedTempFile::new().expect("tempfile");
    let store = open(tmp.path());
    assert!(!store.hydrate("nothing"));
    assert!(store.get_series("nothing").is_none());
}

#[test]
fn init_after_restart_carries_persisted_archives() {
    let tmp = tempfile::NamedTempFile::new().expect("tempfile");
    {
        let store = open(tmp.path());
        for i in 0..5 {
            store.push(&cpu_series_key("cpu"), Sample::now(i as f64), CPU_HISTORY_LEN);
        }
        store.push(&container_series_key("container", "web_1", "cpu"), Sample::now(3.0), 60);
        store.push(&container_series_key("container", "web_1", "ram"), Sample::now(9.0), 60);
    }

    // restart: nothing has been sampled yet when the client asks for init
    let config = Config {
        monitored: vec![
            MetricDefinition::new("cpu", MetricParams::Cpu),
            MetricDefinition::new("container", MetricParams::Container),
        ],
        ..Config::default()
    };
    let state = MonitoringState::new(config, open(tmp.path()));
    let init = serde_json::to_value(state.initial_data()).unwrap();

    let cpu = init["data"][0]["archive"].as_array().unwrap();
    let ys: Vec<f64> = cpu.iter().map(|s| s["y"].as_f64().unwrap()).collect();
    assert_eq!(ys, vec![0.0, 1.0, 2.0, 3.0, 4.0]);

    let containers = &init["data"][1]["archive"];
    assert_eq!(containers["web_1"]["cpu"][0]["y"], 3.0);
    assert_eq!(containers["web_1"]["ram"][0]["y"], 9.0);
}
