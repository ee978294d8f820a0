//! Small statistics helpers shared by the load generator and the correlator

/// Percentile `q` (0-100) of an ascending-sorted slice, interpolating
/// linearly between the closest ranks
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    match sorted.len() {
        0 => None,
        1 => Some(sorted[0]),
        n => {
            let pos = (n - 1) as f64 * (q / 100.0);
            let low = pos.floor() as usize;
            let high = pos.ceil() as usize;
            if low == high {
                return Some(sorted[low]);
            }
            let weight = pos - low as f64;
            Some(sorted[low] * (1.0 - weight) + sorted[high] * weight)
        }
    }
}

/// Sort a copy of `values` and take percentile `q`
pub fn percentile_of(values: &[f64], q: f64) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile(&sorted, q)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}
