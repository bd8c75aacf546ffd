//! serverinfo_agent: samples host metrics and serves them to dashboard
//! clients over WebSocket at /ws.

use anyhow::Context;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use serverinfo_agent::config::Config;
use serverinfo_agent::history::MetricStore;
use serverinfo_agent::kv::SqliteKv;
use serverinfo_agent::netload::sync_baselines;
use serverinfo_agent::sampler::Sampler;
use serverinfo_agent::state::MonitoringState;
use serverinfo_agent::ws::router;

struct ParsedArgs {
    config: Option<PathBuf>,
    port: Option<u16>,
}

fn usage(prog: &str) -> String {
    format!("Usage: {prog} [--config PATH|-c PATH] [--port PORT|-p PORT]")
}

fn value_for(
    flag: &str,
    it: &mut impl Iterator<Item = String>,
    prog: &str,
) -> Result<String, String> {
    it.next()
        .ok_or_else(|| format!("Missing value for {flag}. {}", usage(prog)))
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "serverinfo_agent".into());
    let mut config: Option<PathBuf> = None;
    let mut port: Option<String> = None;

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(usage(&prog)),
            "--config" | "-c" => config = Some(PathBuf::from(value_for(&arg, &mut it, &prog)?)),
            "--port" | "-p" => port = Some(value_for(&arg, &mut it, &prog)?),
            _ if arg.starts_with("--config=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        config = Some(PathBuf::from(v));
                    }
                }
            }
            _ if arg.starts_with("--port=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    port = Some(v.to_string());
                }
            }
            _ => return Err(format!("Unexpected argument '{arg}'. {}", usage(&prog))),
        }
    }

    let port = match port {
        Some(p) => Some(p.parse::<u16>().map_err(|_| format!("Invalid port '{p}'"))?),
        None => None,
    };
    Ok(ParsedArgs { config, port })
}

fn open_store(config: &Config) -> MetricStore {
    let Some(path) = config.store.as_ref() else {
        info!("no persistence store configured; history is kept in memory only");
        return MetricStore::in_memory();
    };
    match SqliteKv::open(path) {
        Ok(kv) => {
            info!("persisting history to {}", path.display());
            MetricStore::with_backing(Arc::new(kv))
        }
        Err(e) => {
            warn!(
                "persistence store {} unavailable ({e}); history is kept in memory only",
                path.display()
            );
            MetricStore::in_memory()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            if msg.starts_with("Usage:") {
                return Ok(());
            }
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("serverinfo_agent=info")),
        )
        .init();

    let mut config = Config::load(parsed.config.as_deref()).context("loading configuration")?;
    if let Some(port) = parsed.port {
        config.port = port;
    }
    info!("monitoring {} values", config.monitored.len());

    let store = open_store(&config);
    if store.is_persistent() {
        info!("found {} persisted entries", store.persisted_keys().len());
    }
    for iface in config.monitored_interfaces() {
        sync_baselines(&store, &iface);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = Arc::new(MonitoringState::new(config, store));
    let sampler = Sampler::new(state.clone());
    sampler.start();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("serverinfo agent listening on ws://{}/ws", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("serving websocket endpoint")?;

    sampler.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        std::iter::once("serverinfo_agent")
            .chain(v.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn port_long_short_and_assign() {
        assert_eq!(parse_args(args(&["--port", "9001"])).unwrap().port, Some(9001));
        assert_eq!(parse_args(args(&["-p", "9002"])).unwrap().port, Some(9002));
        assert_eq!(parse_args(args(&["--port=9003"])).unwrap().port, Some(9003));
        assert_eq!(parse_args(args(&[])).unwrap().port, None);
        assert!(parse_args(args(&["--port", "nope"])).is_err());
    }

    #[test]
    fn config_path_and_errors() {
        let p = parse_args(args(&["-c", "/etc/si.json"])).unwrap();
        assert_eq!(p.config, Some(PathBuf::from("/etc/si.json")));
        let p = parse_args(args(&["--config=/tmp/x.json"])).unwrap();
        assert_eq!(p.config, Some(PathBuf::from("/tmp/x.json")));
        assert!(parse_args(args(&["--help"])).is_err());
        assert!(parse_args(args(&["stray"])).is_err());
    }

    #[test]
    fn flag_without_value_is_an_error() {
        for flag in ["--config", "-c", "--port", "-p"] {
            let err = parse_args(args(&[flag])).err().unwrap();
            assert!(err.starts_with(&format!("Missing value for {flag}")), "{err}");
        }
        assert!(parse_args(args(&["-p", "9000", "--config"])).is_err());
    }
}
