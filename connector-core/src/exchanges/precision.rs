//! Lot/tick quantization helpers

/// Tolerance, in step units, absorbing binary floating point error before flooring.
const STEP_EPSILON: f64 = 1e-9;

/// Decimal places kept after quantizing, matching the exchange's maximum precision.
pub const MAX_DECIMALS: u32 = 8;

/// Round to specified decimal places
pub fn round_to_precision(value: f64, precision: u32) -> f64 {
    let multiplier = 10_f64.powi(precision as i32);
    (value * multiplier).round() / multiplier
}

/// Floor `value` to the nearest multiple of `step` (lot size rule)
pub fn floor_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    let units = (value / step + STEP_EPSILON).floor();
    round_to_precision(units * step, MAX_DECIMALS)
}

/// Round `value` to the nearest multiple of `step` (tick size rule)
pub fn round_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    round_to_precision((value / step).round() * step, MAX_DECIMALS)
}

/// Number of decimals implied by a step string such as `"0.01000000"` (2) or `"1.0"` (0)
pub fn decimals_from_step(step: &str) -> u32 {
    match step.split_once('.') {
        Some((_, fraction)) => fraction.trim_end_matches('0').len() as u32,
        None => 0,
    }
}

/// Step implied by a decimal precision, e.g. 2 -> 0.01
pub fn step_from_decimals(decimals: u32) -> f64 {
    round_to_precision(10_f64.powi(-(decimals as i32)), MAX_DECIMALS)
}

/// Fixed-point formatting with exactly `decimals` places
pub fn format_decimal(value: f64, decimals: u32) -> String {
    format!("{:.*}", decimals as usize, value)
}
