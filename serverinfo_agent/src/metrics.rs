//! Metrics collection: /proc counters, sysinfo handles and version commands.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Disks, System};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use crate::calc::{humanize_duration, percent};
use crate::command::{run_shell, CommandError};
use crate::config::SoftwareCheck;
use crate::types::{
    CpuPercentages, CpuSnapshot, DiskSnapshot, RamSnapshot, SoftwareVersion, UptimeSnapshot,
};

pub const PROC_STAT: &str = "/proc/stat";
pub const PROC_MEMINFO: &str = "/proc/meminfo";

/// Pause between the two /proc/stat reads of one CPU sample.
pub const CPU_SAMPLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("unexpected format in {0}")]
    Format(&'static str),
    #[error("{0} is not on a mounted filesystem")]
    NotMounted(String),
    #[error("interface {0} doesn't exist")]
    MissingInterface(String),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("sampler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Aggregate jiffies from the first line of /proc/stat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCounters {
    pub user: u64,
    pub nice: u64,
    pub sys: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
}

impl CpuCounters {
    /// Parse "cpu  user nice system idle iowait irq softirq ..." from the
    /// contents of /proc/stat.
    pub fn parse(stat: &str) -> Option<Self> {
        let line = stat.lines().next()?;
        let mut it = line.split_whitespace();
        if it.next()? != "cpu" {
            return None;
        }
        let mut v = [0u64; 7];
        for slot in v.iter_mut() {
            *slot = it.next()?.parse().ok()?;
        }
        Some(Self {
            user: v[0],
            nice: v[1],
            sys: v[2],
            idle: v[3],
            iowait: v[4],
            irq: v[5],
            softirq: v[6],
        })
    }

    /// Share of each state over the interval since `earlier`. With no
    /// elapsed jiffies the CPU is reported fully idle.
    pub fn percentages_since(&self, earlier: &CpuCounters) -> CpuPercentages {
        let d = [
            self.user.saturating_sub(earlier.user),
            self.nice.saturating_sub(earlier.nice),
            self.sys.saturating_sub(earlier.sys),
            self.idle.saturating_sub(earlier.idle),
            self.iowait.saturating_sub(earlier.iowait),
            self.irq.saturating_sub(earlier.irq),
            self.softirq.saturating_sub(earlier.softirq),
        ];
        let total: u64 = d.iter().sum();
        if total == 0 {
            return CpuPercentages {
                idle: 100.0,
                ..CpuPercentages::default()
            };
        }
        let p = |x: u64| percent(x as f64, total as f64);
        CpuPercentages {
            user: p(d[0]),
            nice: p(d[1]),
            sys: p(d[2]),
            idle: p(d[3]),
            iowait: p(d[4]),
            irq: p(d[5]),
            softirq: p(d[6]),
        }
    }
}

async fn read_cpu_counters() -> Result<CpuCounters, SampleError> {
    let s = tokio::fs::read_to_string(PROC_STAT)
        .await
        .map_err(|source| SampleError::Read {
            path: PROC_STAT.to_string(),
            source,
        })?;
    CpuCounters::parse(&s).ok_or(SampleError::Format(PROC_STAT))
}

fn load_average() -> [f64; 3] {
    let l = System::load_average();
    [l.one, l.five, l.fifteen]
}

/// Two reads of /proc/stat `delay` apart. Only this task sleeps in between.
pub async fn sample_cpu(delay: Duration) -> Result<CpuSnapshot, SampleError> {
    let first = read_cpu_counters().await?;
    tokio::time::sleep(delay).await;
    let second = read_cpu_counters().await?;
    Ok(CpuSnapshot {
        percentage: second.percentages_since(&first),
        sysload: load_average(),
    })
}

/// Values of /proc/meminfo in bytes, keyed by field name.
pub fn parse_meminfo(s: &str) -> HashMap<&str, u64> {
    s.lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
            Some((key.trim(), kb.saturating_mul(1024)))
        })
        .collect()
}

pub async fn sample_ram(sys: &Mutex<System>) -> RamSnapshot {
    let (total, used, free, avail) = {
        let mut sys = sys.lock().await;
        sys.refresh_memory();
        (
            sys.total_memory(),
            sys.used_memory(),
            sys.free_memory(),
            sys.available_memory(),
        )
    };

    // sysinfo has no shared/cache split; take it from meminfo when present.
    let (shared, cache) = match tokio::fs::read_to_string(PROC_MEMINFO).await {
        Ok(s) => {
            let m = parse_meminfo(&s);
            (
                m.get("Shmem").copied().unwrap_or(0),
                m.get("Cached").copied().unwrap_or(0) + m.get("Buffers").copied().unwrap_or(0),
            )
        }
        Err(e) => {
            warn!("reading {PROC_MEMINFO} failed: {e}");
            (0, 0)
        }
    };

    RamSnapshot {
        total,
        used,
        free,
        shared,
        cache,
        avail,
        percent_used: percent(used as f64, total as f64),
        percent_not_free: percent(total.saturating_sub(free) as f64, total as f64),
    }
}

/// Index of the mount point that is the longest prefix of `path`.
pub fn best_mount<'a, I>(path: &Path, mounts: I) -> Option<usize>
where
    I: IntoIterator<Item = &'a Path>,
{
    mounts
        .into_iter()
        .enumerate()
        .filter(|(_, m)| path.starts_with(m))
        .max_by_key(|(_, m)| m.components().count())
        .map(|(i, _)| i)
}

/// Usage of the filesystem holding `path`. Runs on the blocking pool since
/// enumerating mounts touches the filesystem.
pub async fn sample_disk(path: PathBuf) -> Result<DiskSnapshot, SampleError> {
    tokio::task::spawn_blocking(move || -> Result<DiskSnapshot, SampleError> {
        let display = path.display().to_string();
        let resolved = path
            .canonicalize()
            .map_err(|_| SampleError::NotMounted(display.clone()))?;
        let disks = Disks::new_with_refreshed_list();
        let list = disks.list();
        let idx = best_mount(&resolved, list.iter().map(|d| d.mount_point()))
            .ok_or_else(|| SampleError::NotMounted(display.clone()))?;
        let disk = &list[idx];
        let total = disk.total_space();
        let free = disk.available_space();
        let used = total.saturating_sub(free);
        Ok(DiskSnapshot {
            path: display,
            total,
            free,
            used,
            percent: percent(used as f64, total as f64),
        })
    })
    .await?
}

pub fn sample_uptime() -> UptimeSnapshot {
    let seconds = System::uptime();
    UptimeSnapshot {
        seconds,
        formatted: humanize_duration(seconds),
    }
}

/// Run every configured version check. A failing check is logged and left
/// out; the others still report.
pub async fn sample_software(checks: &[SoftwareCheck], timeout: Duration) -> Vec<SoftwareVersion> {
    let mut versions = Vec::with_capacity(checks.len());
    for check in checks {
        match run_shell(&check.cmd, timeout).await {
            Ok(out) => versions.push(SoftwareVersion {
                name: check.name.clone(),
                value: out.trim().to_string(),
            }),
            Err(e) => warn!("version check '{}' failed: {e}", check.name),
        }
    }
    versions
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT_A: &str = "cpu  100 10 50 1000 20 5 5 0 0 0\ncpu0 1 2 3 4 5 6 7\n";
    const STAT_B: &str = "cpu  160 10 80 1090 30 7 13 0 0 0\ncpu0 1 2 3 4 5 6 7\n";

    #[test]
    fn parses_aggregate_cpu_line() {
        let c = CpuCounters::parse(STAT_A).unwrap();
        assert_eq!(c.user, 100);
        assert_eq!(c.softirq, 5);
        assert!(CpuCounters::parse("intr 1 2 3").is_none());
        assert!(CpuCounters::parse("cpu 1 2 x").is_none());
        assert!(CpuCounters::parse("").is_none());
    }

    #[test]
    fn cpu_percentages_sum_to_100() {
        let a = CpuCounters::parse(STAT_A).unwrap();
        let b = CpuCounters::parse(STAT_B).unwrap();
        let p = b.percentages_since(&a);
        // deltas: 60 0 30 90 10 2 8 -> total 200
        assert_eq!(p.user, 30.0);
        assert_eq!(p.sys, 15.0);
        assert_eq!(p.idle, 45.0);
        assert!((p.sum() - 100.0).abs() < 0.05);
    }

    #[test]
    fn cpu_percentages_with_uneven_deltas() {
        let a = CpuCounters::default();
        let b = CpuCounters {
            user: 1,
            nice: 1,
            sys: 1,
            idle: 0,
            iowait: 0,
            irq: 0,
            softirq: 0,
        };
        let p = b.percentages_since(&a);
        assert!((p.sum() - 100.0).abs() < 0.05);
    }

    #[test]
    fn idle_when_no_jiffies_elapsed() {
        let a = CpuCounters::parse(STAT_A).unwrap();
        let p = a.percentages_since(&a);
        assert_eq!(p.idle, 100.0);
        assert_eq!(p.sum(), 100.0);
    }

    #[test]
    fn meminfo_values_are_bytes() {
        let m = parse_meminfo("MemTotal:  2048 kB\nShmem:   1 kB\nHugePages_Total: 0\nbogus\n");
        assert_eq!(m.get("MemTotal"), Some(&(2048 * 1024)));
        assert_eq!(m.get("Shmem"), Some(&1024));
        assert_eq!(m.get("HugePages_Total"), Some(&0));
    }

    #[test]
    fn longest_mount_prefix_wins() {
        let mounts = [Path::new("/"), Path::new("/home"), Path::new("/home/user/data")];
        assert_eq!(best_mount(Path::new("/home/user/x"), mounts), Some(1));
        assert_eq!(best_mount(Path::new("/home/user/data/a"), mounts), Some(2));
        assert_eq!(best_mount(Path::new("/etc"), mounts), Some(0));
        assert_eq!(best_mount(Path::new("/etc"), [Path::new("/home")]), None);
    }

    #[tokio::test]
    async fn missing_disk_path_is_an_error() {
        let err = sample_disk(PathBuf::from("/definitely/not/here")).await.unwrap_err();
        assert!(matches!(err, SampleError::NotMounted(_)));
    }

    #[tokio::test]
    async fn software_checks_report_what_succeeded() {
        let checks = vec![
            SoftwareCheck {
                name: "first".into(),
                cmd: "echo 1.2.3".into(),
            },
            SoftwareCheck {
                name: "broken".into(),
                cmd: "exit 1".into(),
            },
            SoftwareCheck {
                name: "last".into(),
                cmd: "printf 'v9\\n\\n'".into(),
            },
        ];
        let got = sample_software(&checks, Duration::from_secs(5)).await;
        assert_eq!(
            got,
            vec![
                SoftwareVersion {
                    name: "first".into(),
                    value: "1.2.3".into()
                },
                SoftwareVersion {
                    name: "last".into(),
                    value: "v9".into()
                },
            ]
        );
    }
}
