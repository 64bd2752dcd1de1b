//! Terminal rendering of transfer progress.

use picstash_transfer::ProgressSnapshot;

/// One progress line, e.g. `33.3% (100 / 300 bytes, 1.2 KiB/s)`.
pub fn progress_line(snapshot: &ProgressSnapshot, bytes_per_second: f64) -> String {
    match (snapshot.percent_complete(), snapshot.total_bytes) {
        (Some(percent), Some(total)) => format!(
            "{percent:.1}% ({} / {total} bytes, {})",
            snapshot.bytes_transferred,
            format_rate(bytes_per_second)
        ),
        _ => format!("{} bytes (size unknown)", snapshot.bytes_transferred),
    }
}

pub fn format_rate(bytes_per_second: f64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    if bytes_per_second >= MIB {
        format!("{:.1} MiB/s", bytes_per_second / MIB)
    } else if bytes_per_second >= KIB {
        format!("{:.1} KiB/s", bytes_per_second / KIB)
    } else {
        format!("{bytes_per_second:.0} B/s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_total() {
        let line = progress_line(&ProgressSnapshot::new(100, Some(300)), 2048.0);
        assert_eq!(line, "33.3% (100 / 300 bytes, 2.0 KiB/s)");
    }

    #[test]
    fn unknown_or_zero_total() {
        assert_eq!(
            progress_line(&ProgressSnapshot::new(42, None), 0.0),
            "42 bytes (size unknown)"
        );
        assert_eq!(
            progress_line(&ProgressSnapshot::new(0, Some(0)), 0.0),
            "0 bytes (size unknown)"
        );
    }

    #[test]
    fn rate_units() {
        assert_eq!(format_rate(12.4), "12 B/s");
        assert_eq!(format_rate(1536.0), "1.5 KiB/s");
        assert_eq!(format_rate(3.0 * 1024.0 * 1024.0), "3.0 MiB/s");
    }
}
