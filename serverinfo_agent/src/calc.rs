//! Pure helpers for derived metrics: rounding, percentages, rolling aggregates
//! and the human readable byte / duration strings shown on the dashboard.

const BYTE_UNITS: [&str; 7] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB"];

/// Round to two decimal places.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// `part / total * 100`, rounded to two decimals. A zero total yields 0.
pub fn percent(part: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    round2(part / total * 100.0)
}

/// Difference between a live cumulative counter and a stored baseline.
/// Counter resets (baseline ahead of the live value) floor at zero.
pub fn counter_delta(current: u64, baseline: u64) -> u64 {
    current.saturating_sub(baseline)
}

pub fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn maximum(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

/// Format a byte count with a binary unit suffix, e.g. `1536 -> "1.50 KB"`.
///
/// The value is divided by 1024 while it is at least 1024 and a larger unit
/// is available. Negative inputs are treated as zero.
pub fn humanize_bytes(bytes: f64) -> String {
    let mut value = if bytes.is_finite() && bytes > 0.0 {
        bytes
    } else {
        0.0
    };
    let mut unit = 0;
    while value >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", BYTE_UNITS[unit])
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const YEAR: u64 = 365 * DAY;

/// Format an uptime in seconds as German prose, e.g.
/// `3661 -> "1 Stunde und 1 Minute"`.
///
/// Zero components are left out; anything below one minute collapses to
/// "Weniger als eine Minute".
pub fn humanize_duration(seconds: u64) -> String {
    let units: [(u64, &str, &str); 4] = [
        (YEAR, "Jahr", "Jahre"),
        (DAY, "Tag", "Tage"),
        (HOUR, "Stunde", "Stunden"),
        (MINUTE, "Minute", "Minuten"),
    ];

    let mut rest = seconds;
    let mut parts: Vec<String> = Vec::with_capacity(units.len());
    for (size, singular, plural) in units {
        let n = rest / size;
        rest %= size;
        match n {
            0 => {}
            1 => parts.push(format!("1 {singular}")),
            _ => parts.push(format!("{n} {plural}")),
        }
    }

    match parts.len() {
        0 => "Weniger als eine Minute".to_string(),
        1 => parts.remove(0),
        n => {
            let last = parts.remove(n - 1);
            format!("{} und {last}", parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_escalate_units() {
        assert_eq!(humanize_bytes(0.0), "0.00 Bytes");
        assert_eq!(humanize_bytes(512.0), "512.00 Bytes");
        assert_eq!(humanize_bytes(1536.0), "1.50 KB");
        assert_eq!(humanize_bytes(1_073_741_824.0), "1.00 GB");
        assert_eq!(humanize_bytes(-5.0), "0.00 Bytes");
    }

    #[test]
    fn bytes_stop_at_exabytes() {
        let huge = 1024f64.powi(8);
        assert_eq!(humanize_bytes(huge), "1024.00 EB");
    }

    #[test]
    fn duration_under_a_minute() {
        assert_eq!(humanize_duration(0), "Weniger als eine Minute");
        assert_eq!(humanize_duration(45), "Weniger als eine Minute");
    }

    #[test]
    fn duration_joins_last_with_conjunction() {
        assert_eq!(humanize_duration(3661), "1 Stunde und 1 Minute");
        assert_eq!(
            humanize_duration(2 * DAY + 3 * HOUR + 4 * MINUTE),
            "2 Tage, 3 Stunden und 4 Minuten"
        );
    }

    #[test]
    fn duration_omits_zero_components() {
        assert_eq!(humanize_duration(DAY + 5 * MINUTE), "1 Tag und 5 Minuten");
        assert_eq!(humanize_duration(2 * HOUR), "2 Stunden");
        assert_eq!(humanize_duration(YEAR + DAY), "1 Jahr und 1 Tag");
    }

    #[test]
    fn percent_and_rounding() {
        assert_eq!(percent(1.0, 3.0), 33.33);
        assert_eq!(percent(5.0, 0.0), 0.0);
        assert_eq!(round2(2.005_1), 2.01);
    }

    #[test]
    fn rolling_aggregates() {
        assert_eq!(average(&[]), None);
        assert_eq!(average(&[1.0, 2.0, 3.0]), Some(2.0));
        assert_eq!(maximum(&[1.0, 7.5, 3.0]), Some(7.5));
        assert_eq!(counter_delta(1000, 600), 400);
        assert_eq!(counter_delta(10, 600), 0);
    }
}
