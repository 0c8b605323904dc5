//! Rate conversion into the canonical unit (megabits per second).

const BITS_PER_BYTE: f64 = 8.0;
const BITS_PER_MEGABIT: f64 = 1_000_000.0;

/// Converts a raw bytes/sec rate into Mbps at full precision.
///
/// Absent, negative and non-finite inputs are "not available" and yield 0.0.
/// Rounding is applied once by [`super::MeasurementRecord`] construction, never here.
pub fn rate_to_canonical(bytes_per_sec: Option<f64>) -> f64 {
    match bytes_per_sec {
        Some(rate) if rate.is_finite() && rate >= 0.0 => rate * BITS_PER_BYTE / BITS_PER_MEGABIT,
        _ => 0.0,
    }
}

/// Rounds half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
