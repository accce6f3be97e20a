/// Linear remap of `x` from `[min_in, max_in]` onto `[min_out, max_out]`.
///
/// Returns `None` when the input domain is empty (`max_in == min_in`), which
/// callers treat as "no data available yet".
pub fn map_value(x: f64, min_in: f64, max_in: f64, min_out: f64, max_out: f64) -> Option<f64> {
    let span = max_in - min_in;
    if span == 0.0 || !span.is_finite() {
        return None;
    }
    Some((x - min_in) * (max_out - min_out) / span + min_out)
}

/// Rounds up to the next multiple of one hundred; zero and negatives yield 0.
pub fn round_up_to_hundred(n: i64) -> i64 {
    if n <= 0 {
        return 0;
    }
    (n + 99) / 100 * 100
}

/// Maps `x` and floors the result into `[0, max_index]`.
pub fn map_to_index(x: f64, min_in: f64, max_in: f64, max_index: usize) -> Option<usize> {
    let mapped = map_value(x, min_in, max_in, 0.0, max_index as f64)?;
    if !mapped.is_finite() || mapped <= 0.0 {
        return Some(0);
    }
    Some((mapped.floor() as usize).min(max_index))
}
