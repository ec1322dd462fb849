//! Knee-point selection over denoise results.
//!
//! For each tested strength the efficiency is the size reduction against the
//! undenoised baseline divided by the square root of the strength; the root
//! scaling keeps heavier levels from being penalized linearly. The chosen
//! strength is the smallest whose efficiency reaches the configured fraction
//! of the maximum.

use super::DenoiseResult;

/// Returns the knee-point strength for a result set, 0.0 when no tested
/// strength yields a positive size reduction.
pub fn knee_point_strength(results: &[DenoiseResult], baseline: u64, knee_threshold: f64) -> f64 {
    if baseline == 0 {
        return 0.0;
    }

    let mut efficiencies: Vec<(f64, f64)> = results
        .iter()
        .filter(|r| r.strength > 0.0 && r.size > 0)
        .filter_map(|r| {
            let reduction = baseline.saturating_sub(r.size) as f64;
            if reduction <= 0.0 {
                return None;
            }
            let efficiency = reduction / r.strength.sqrt();
            efficiency.is_finite().then_some((r.strength, efficiency))
        })
        .collect();

    if efficiencies.is_empty() {
        return 0.0;
    }

    let max_efficiency = efficiencies
        .iter()
        .map(|&(_, e)| e)
        .fold(0.0_f64, f64::max);
    if max_efficiency <= 0.0 {
        return 0.0;
    }

    let threshold = knee_threshold * max_efficiency;
    efficiencies.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    efficiencies
        .into_iter()
        .find(|&(_, e)| e >= threshold)
        .map(|(strength, _)| strength)
        .unwrap_or(0.0)
}
