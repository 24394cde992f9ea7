pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Convert a (possibly fractional) GiB amount from configuration into bytes.
/// Negative and non-finite inputs clamp to zero.
pub fn gib_to_bytes(gib: f64) -> u64 {
    if !gib.is_finite() || gib <= 0.0 {
        return 0;
    }
    (gib * GIB as f64).round() as u64
}

/// Human readable size with two decimals, e.g. `1.50 GB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
