//! Byte sizes: KMG parsing and human-readable formatting.

use std::time::Duration;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

/// Parse a byte count with an optional `K`, `M` or `G` suffix (powers of 1024).
///
/// ```
/// assert_eq!(perf::size::parse_size("10M"), Ok(10 * 1024 * 1024));
/// assert_eq!(perf::size::parse_size("512"), Ok(512));
/// ```
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim().to_uppercase();
    let (num, multiplier) = if let Some(n) = s.strip_suffix('G') {
        (n, GIB)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, MIB)
    } else if let Some(n) = s.strip_suffix('K') {
        (n, KIB)
    } else {
        (s.as_str(), 1)
    };

    let n = num
        .parse::<u64>()
        .map_err(|e| format!("invalid size {:?}: {}", s, e))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| format!("size {:?} overflows a 64-bit byte count", s))
}

/// Format a byte count with the largest binary suffix that still keeps the value >= 1.
pub fn bytes_to_human(bytes: u64) -> String {
    const UNITS: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

    if bytes < KIB {
        return format!("{} B", bytes);
    }
    let mut div = KIB;
    let mut exp = 0;
    let mut n = bytes / KIB;
    while n >= KIB {
        div *= KIB;
        exp += 1;
        n /= KIB;
    }
    format!("{:.2} {}iB", bytes as f64 / div as f64, UNITS[exp])
}

/// Format a transfer rate in bits per second with decimal suffixes.
pub fn bandwidth_to_human(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "n/a".to_string();
    }
    let bps = (bytes as f64 * 8.0) / secs;
    if bps >= 1e9 {
        format!("{:.2} Gbps", bps / 1e9)
    } else if bps >= 1e6 {
        format!("{:.2} Mbps", bps / 1e6)
    } else if bps >= 1e3 {
        format!("{:.2} kbps", bps / 1e3)
    } else {
        format!("{:.2} bps", bps)
    }
}

/// Bytes per second, for the `uploaded X: Ys (Z/s)` summary lines.
pub fn rate_to_human(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "n/a".to_string();
    }
    format!("{}/s", bytes_to_human((bytes as f64 / secs) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(parse_size("10M"), Ok(10 * 1024 * 1024));
        assert_eq!(parse_size("10m"), Ok(10 * 1024 * 1024));
        assert_eq!(parse_size("4K"), Ok(4096));
        assert_eq!(parse_size("1G"), Ok(1024 * 1024 * 1024));
        assert_eq!(parse_size("0"), Ok(0));
        assert_eq!(parse_size("123"), Ok(123));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("M").is_err());
        assert!(parse_size("1.5M").is_err());
        assert!(parse_size("-1K").is_err());
        assert!(parse_size("10T").is_err());
        assert!(parse_size("99999999999G").is_err());
    }

    #[test]
    fn test_parse_is_stable_for_canonical_forms() {
        for s in ["1K", "10M", "3G", "77"] {
            let n = parse_size(s).unwrap();
            let canonical = match n {
                n if n >= GIB && n % GIB == 0 => format!("{}G", n / GIB),
                n if n >= MIB && n % MIB == 0 => format!("{}M", n / MIB),
                n if n >= KIB && n % KIB == 0 => format!("{}K", n / KIB),
                n => n.to_string(),
            };
            assert_eq!(canonical, s);
            assert_eq!(parse_size(&canonical), Ok(n));
        }
    }

    #[test]
    fn test_bytes_to_human() {
        assert_eq!(bytes_to_human(999), "999 B");
        assert_eq!(bytes_to_human(1024), "1.00 KiB");
        assert_eq!(bytes_to_human(1024 * 1024), "1.00 MiB");
        assert_eq!(bytes_to_human(1024 * 1024 * 1024), "1.00 GiB");
        assert_eq!(bytes_to_human(1024 * 1024 * 1024 * 1024), "1.00 TiB");
        assert_eq!(bytes_to_human(1024 * 1024 * 345 / 100), "3.45 MiB");
    }

    #[test]
    fn test_bandwidth_to_human() {
        let sec = Duration::from_secs(1);
        assert_eq!(bandwidth_to_human(100, sec), "800.00 bps");
        assert_eq!(bandwidth_to_human(100, 2 * sec), "400.00 bps");
        assert_eq!(bandwidth_to_human(125, sec), "1.00 kbps");
        assert_eq!(bandwidth_to_human(1_000_000, sec), "8.00 Mbps");
        assert_eq!(bandwidth_to_human(1_000_000, 5 * sec), "1.60 Mbps");
        assert_eq!(bandwidth_to_human(1234, sec), "9.87 kbps");
        assert_eq!(bandwidth_to_human(1234, Duration::ZERO), "n/a");
    }

    #[test]
    fn test_rate_to_human() {
        assert_eq!(rate_to_human(2048, Duration::from_secs(2)), "1.00 KiB/s");
    }
}
