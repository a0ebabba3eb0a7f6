//! Per-pixel outlier pre-filtering.
//!
//! Cloud contamination shows up in a pixel's history as sudden drops toward
//! zero or steep one-step jumps. Before the curve fit, each series gets one
//! destructive left-to-right pass that replaces such samples with points on
//! the local secant line. The pass is deliberately order-dependent: a
//! correction at index i feeds the condition evaluated at i+1, so it must
//! not be parallelized or reordered within one series.

/// Replaces locally implausible samples with linear interpolation.
///
/// Scans i from 1 to `len - 3`. When `values[i + 1] >= values[i] + jump` or
/// `values[i] < floor`, the four samples `values[i-1..=i+2]` are placed on
/// the line through `(i-1, values[i-1])` and `(i+2, values[i+2])` at equal
/// spacing. The two endpoints already lie on that line, so only the middle
/// pair is rewritten.
///
/// Sentinel-filled samples fall below any sensible `floor` and are repaired
/// by the same rule.
pub fn despike(values: &mut [f32], jump: f32, floor: f32) {
    let n = values.len();
    if n < 4 {
        return;
    }
    for i in 1..n - 2 {
        if values[i + 1] >= values[i] + jump || values[i] < floor {
            let left = values[i - 1];
            let step = (values[i + 2] - left) / 3.0;
            values[i] = left + step;
            values[i + 1] = left + 2.0 * step;
        }
    }
}

/// Counts samples equal to the no-data sentinel.
pub fn sentinel_count(values: &[f32], sentinel: f32) -> usize {
    values.iter().filter(|&&v| v == sentinel).count()
}

/// A history with more sentinel entries than `skip_count` carries too little
/// signal to smooth; the pixel is passed through as all-sentinel instead.
pub fn is_unsmoothable(values: &[f32], sentinel: f32, skip_count: usize) -> bool {
    sentinel_count(values, sentinel) > skip_count
}
