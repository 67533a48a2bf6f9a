// ABOUTME: Pure parsers for one-shot container telemetry text.
// ABOUTME: Byte-unit normalization distinguishes binary and decimal units.

use serde::Serialize;

/// Resource usage snapshot parsed from a stats row.
///
/// Every field degrades independently to zero on malformed input; parsing
/// never fails once a row has enough columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub block_read_bytes: u64,
    pub block_write_bytes: u64,
    pub pids: u64,
}

/// Parse a pipe-delimited stats row: `id|cpu%|mem use/limit|mem%|net|block|pids`.
/// Returns `None` only when the row has too few columns.
pub fn parse_stats_row(line: &str) -> Option<ContainerStats> {
    let fields: Vec<&str> = line.trim().split('|').collect();
    if fields.len() < 7 {
        return None;
    }

    let (memory_usage, memory_limit) = parse_byte_pair(fields[2]);
    let (network_rx_bytes, network_tx_bytes) = parse_byte_pair(fields[4]);
    let (block_read_bytes, block_write_bytes) = parse_byte_pair(fields[5]);

    Some(ContainerStats {
        cpu_percent: parse_percent(fields[1]),
        memory_usage,
        memory_limit,
        memory_percent: parse_percent(fields[3]),
        network_rx_bytes,
        network_tx_bytes,
        block_read_bytes,
        block_write_bytes,
        pids: parse_count(fields[6]),
    })
}

/// Parse an `"X / Y"` pair of byte sizes. A missing separator yields zeros.
pub fn parse_byte_pair(s: &str) -> (u64, u64) {
    match s.split_once('/') {
        Some((left, right)) => (parse_bytes(left), parse_bytes(right)),
        None => (0, 0),
    }
}

/// Parse a human-readable byte size like `512MiB` or `2.5GB` into bytes.
///
/// Binary units (KiB, MiB, GiB, TiB) use powers of 1024; decimal units
/// (kB, MB, GB, TB) use powers of 1000. The base is chosen per the observed
/// suffix, never globally. Malformed input yields zero.
pub fn parse_bytes(s: &str) -> u64 {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("n/a") || s == "--" {
        return 0;
    }
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let Ok(value) = number.parse::<f64>() else {
        return 0;
    };
    let Some(multiplier) = unit_multiplier(unit) else {
        return 0;
    };
    let bytes = value * multiplier;
    if bytes.is_finite() && bytes >= 0.0 {
        bytes.round() as u64
    } else {
        0
    }
}

fn unit_multiplier(unit: &str) -> Option<f64> {
    let unit = unit.trim();
    if unit.is_empty() || unit.eq_ignore_ascii_case("b") {
        return Some(1.0);
    }
    const UNITS: [(&str, f64); 8] = [
        ("kib", 1024.0),
        ("mib", 1024.0 * 1024.0),
        ("gib", 1024.0 * 1024.0 * 1024.0),
        ("tib", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("kb", 1e3),
        ("mb", 1e6),
        ("gb", 1e9),
        ("tb", 1e12),
    ];
    let lower = unit.to_ascii_lowercase();
    UNITS
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, multiplier)| *multiplier)
}

/// Parse a percentage like `12.5%`; `N/A` or garbage yields zero.
pub fn parse_percent(s: &str) -> f64 {
    let s = s.trim().trim_end_matches('%').trim();
    if s.is_empty() || s.eq_ignore_ascii_case("n/a") {
        return 0.0;
    }
    s.parse().unwrap_or(0.0)
}

/// Parse an integer field such as the process count; zero on failure.
pub fn parse_count(s: &str) -> u64 {
    s.trim().parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_units_use_powers_of_1024() {
        assert_eq!(parse_bytes("512MiB"), 536_870_912);
        assert_eq!(parse_bytes("1GiB"), 1_073_741_824);
        assert_eq!(parse_bytes("2KiB"), 2048);
        assert_eq!(parse_bytes("1TiB"), 1_099_511_627_776);
    }

    #[test]
    fn decimal_units_use_powers_of_1000() {
        assert_eq!(parse_bytes("2.5GB"), 2_500_000_000);
        assert_eq!(parse_bytes("4TB"), 4_000_000_000_000);
        assert_eq!(parse_bytes("1kB"), 1000);
        assert_eq!(parse_bytes("800B"), 800);
    }

    #[test]
    fn pair_parsing_is_base_consistent_per_unit() {
        assert_eq!(parse_byte_pair("512MiB / 1GiB"), (536_870_912, 1_073_741_824));
        assert_eq!(parse_byte_pair("2.5GB / 4TB"), (2_500_000_000, 4_000_000_000_000));
        assert_eq!(parse_byte_pair("1kB / 800B"), (1000, 800));
    }

    #[test]
    fn malformed_sizes_degrade_to_zero() {
        assert_eq!(parse_bytes("N/A"), 0);
        assert_eq!(parse_bytes("--"), 0);
        assert_eq!(parse_bytes("12XB"), 0);
        assert_eq!(parse_bytes("abc"), 0);
        assert_eq!(parse_byte_pair("no separator"), (0, 0));
    }

    #[test]
    fn percent_strips_suffix_and_degrades() {
        assert_eq!(parse_percent("12.5%"), 12.5);
        assert_eq!(parse_percent(" 80 % "), 80.0);
        assert_eq!(parse_percent("N/A%"), 0.0);
        assert_eq!(parse_percent("invalid%"), 0.0);
    }

    #[test]
    fn stats_row_degrades_field_by_field() {
        let stats =
            parse_stats_row("abc|invalid%|512MiB / 1GiB|N/A%|1kB / 800B|1MB / 500kB|invalid")
                .expect("enough fields");
        assert_eq!(stats.cpu_percent, 0.0);
        assert_eq!(stats.memory_usage, 536_870_912);
        assert_eq!(stats.memory_limit, 1_073_741_824);
        assert_eq!(stats.memory_percent, 0.0);
        assert_eq!(stats.network_rx_bytes, 1000);
        assert_eq!(stats.network_tx_bytes, 800);
        assert_eq!(stats.block_read_bytes, 1_000_000);
        assert_eq!(stats.block_write_bytes, 500_000);
        assert_eq!(stats.pids, 0);
    }

    #[test]
    fn short_row_is_rejected() {
        assert_eq!(parse_stats_row("abc|1%|2MiB / 4MiB"), None);
    }
}
