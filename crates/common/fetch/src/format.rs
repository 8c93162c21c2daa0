//! Human-readable units for the progress reporter.

/// Binary-prefixed byte count, e.g. `2.50MiB`.
pub fn format_size(size: i64) -> String {
    match size {
        _ if size < (1 << 10) => format!("{size}B"),
        _ if size < (1 << 20) => format!("{:.2}kiB", size as f64 / (1 << 10) as f64),
        _ if size < (1 << 30) => format!("{:.2}MiB", size as f64 / (1 << 20) as f64),
        _ => format!("{:.1}GiB", size as f64 / (1 << 30) as f64),
    }
}

/// `h:mm:ss`; a negative duration (unknown ETA) renders as `-:--:--`.
pub fn format_duration(duration: i64) -> String {
    if duration < 0 {
        return "-:--:--".into();
    }
    let hours = duration / 3600;
    let minutes = (duration % 3600) / 60;
    let seconds = duration % 60;
    format!("{hours}:{minutes:02}:{seconds:02}")
}

/// Decimal-prefixed bits per second, e.g. `1.5Mb/s`.
pub fn format_bandwidth(bandwidth: f64) -> String {
    match bandwidth {
        _ if bandwidth < 1000.0 => format!("{bandwidth:.0}b/s"),
        _ if bandwidth < 1000.0 * 1000.0 => format!("{:.0}kb/s", bandwidth / 1000.0),
        _ if bandwidth < 1000.0 * 1000.0 * 1000.0 => {
            format!("{:.1}Mb/s", bandwidth / (1000.0 * 1000.0))
        }
        _ => format!("{:.1}Gb/s", bandwidth / (1000.0 * 1000.0 * 1000.0)),
    }
}
