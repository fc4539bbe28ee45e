// DSP utilities - Level conversions and audio hygiene
//
// Small helpers called from the render path. Everything here is inline,
// branch-light and allocation-free.

/// Silence floor used when converting a zero magnitude to decibels
pub const MIN_DB: f32 = -144.0;

/// Flush denormals to zero
///
/// Very small values can slow some CPUs down dramatically; anything under
/// 1e-15 is far below 32-bit float noise anyway.
#[inline]
pub fn flush_denormals_to_zero(x: f32) -> f32 {
    if x.abs() < 1e-15 { 0.0 } else { x }
}

/// Linear magnitude to dBFS. Zero maps to [`MIN_DB`].
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        return MIN_DB;
    }
    (20.0 * linear.log10()).max(MIN_DB)
}

/// dBFS to linear magnitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Hard clip into [-1, 1]
#[inline]
pub fn hard_clip(x: f32) -> f32 {
    x.clamp(-1.0, 1.0)
}
