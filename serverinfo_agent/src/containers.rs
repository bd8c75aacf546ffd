//! Container status via the docker CLI.
//!
//! `docker ps` and `docker stats` are separate invocations, so their rows are
//! joined on the container name rather than on position.

use std::collections::HashMap;
use std::time::Duration;

use crate::command::run;
use crate::metrics::SampleError;

const PS_ARGS: [&str; 4] = ["ps", "--all", "--format", "{{.Names}}|{{.Image}}|{{.Status}}"];
const STATS_ARGS: [&str; 5] = [
    "stats",
    "--all",
    "--no-stream",
    "--format",
    "{{.Name}}|{{.CPUPerc}}|{{.MemPerc}}",
];

/// One container with its instantaneous cpu / memory share.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRow {
    pub name: String,
    pub image: String,
    pub status: String,
    pub cpu: f64,
    pub ram: f64,
}

/// "12.5%" -> 12.5
fn parse_percent(s: &str) -> Option<f64> {
    s.trim().trim_end_matches('%').trim().parse().ok()
}

/// Join `ps` and `stats` listings by name and sort by name (byte order).
/// Rows with the wrong column count, unparsable percentages or no matching
/// stats row are dropped.
pub fn merge_listings(ps: &str, stats: &str) -> Vec<ContainerRow> {
    let usage: HashMap<&str, (f64, f64)> = stats
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('|').collect();
            if cols.len() != 3 {
                return None;
            }
            Some((cols[0].trim(), (parse_percent(cols[1])?, parse_percent(cols[2])?)))
        })
        .collect();

    let mut rows: Vec<ContainerRow> = ps
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('|').collect();
            if cols.len() != 3 {
                return None;
            }
            let name = cols[0].trim();
            let (cpu, ram) = *usage.get(name)?;
            Some(ContainerRow {
                name: name.to_string(),
                image: cols[1].trim().to_string(),
                status: cols[2].trim().to_string(),
                cpu,
                ram,
            })
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    rows
}

pub async fn sample_containers(timeout: Duration) -> Result<Vec<ContainerRow>, SampleError> {
    let ps = run("docker", &PS_ARGS, timeout).await?;
    let stats = run("docker", &STATS_ARGS, timeout).await?;
    Ok(merge_listings(&ps, &stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_by_name_regardless_of_order() {
        let ps = "web|nginx:1.25|Up 3 hours\ndb|postgres:16|Up 3 hours\n";
        let stats = "db|1.50%|20.00%\nweb|0.25%|3.10%\n";
        let rows = merge_listings(ps, stats);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "db");
        assert_eq!(rows[0].image, "postgres:16");
        assert_eq!(rows[0].cpu, 1.5);
        assert_eq!(rows[0].ram, 20.0);
        assert_eq!(rows[1].name, "web");
        assert_eq!(rows[1].cpu, 0.25);
    }

    #[test]
    fn sorts_case_sensitively() {
        let ps = "beta|i|s\nAlpha|i|s\nalpha|i|s\n";
        let stats = "alpha|0%|0%\nAlpha|0%|0%\nbeta|0%|0%\n";
        let names: Vec<_> = merge_listings(ps, stats).into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Alpha", "alpha", "beta"]);
    }

    #[test]
    fn malformed_rows_are_dropped() {
        let ps = "ok|img|Up\nbroken|img\n|||\nnostats|img|Exited (0)\nbadpct|img|Up\n";
        let stats = "ok|1%|2%\nbroken|1%|2%\nbadpct|n/a|2%\ntoo|many|cols|here\n";
        let rows = merge_listings(ps, stats);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "ok");
    }

    #[test]
    fn empty_output_yields_no_rows() {
        assert!(merge_listings("", "").is_empty());
    }
}
