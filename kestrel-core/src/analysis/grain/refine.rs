//! Adaptive refinement of grain estimates.
//!
//! When the per-sample knee-point estimates disagree, intermediate hqdn3d
//! strengths between the neighboring predefined levels are generated and
//! tested so the final knee-point works from a denser curve.

use log::debug;

use super::{GrainLevel, ALL_LEVELS};

/// hqdn3d component anchors per predefined strength (luma spatial, chroma
/// spatial, luma temporal, chroma temporal).
const HQDN3D_ANCHORS: [(f64, f64, f64, f64); 5] = [
    (0.0, 0.0, 0.0, 0.0),
    (0.5, 0.3, 3.0, 3.0),
    (1.0, 0.7, 4.0, 4.0),
    (1.5, 1.0, 6.0, 6.0),
    (2.0, 1.3, 8.0, 8.0),
];

/// Population standard deviation of the estimates' strengths.
fn std_dev(levels: &[GrainLevel]) -> Option<f64> {
    if levels.len() <= 1 {
        return None;
    }
    let values: Vec<f64> = levels.iter().map(|l| l.strength()).collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let sd = variance.sqrt();
    sd.is_finite().then_some(sd)
}

/// Refinement is worthwhile once the estimates spread beyond half a level.
pub fn needs_refinement(estimates: &[GrainLevel]) -> bool {
    std_dev(estimates).map(|sd| sd > 0.5).unwrap_or(false)
}

/// Range of levels the refinement should cover: the median extended by a
/// delta scaled from the standard deviation.
pub fn refinement_range(estimates: &[GrainLevel]) -> (GrainLevel, GrainLevel) {
    if estimates.is_empty() {
        return (GrainLevel::VeryClean, GrainLevel::VeryLight);
    }

    let mut sorted = estimates.to_vec();
    sorted.sort();
    let median = sorted[(sorted.len() - 1) / 2];
    let median_idx = ALL_LEVELS.iter().position(|&l| l == median).unwrap_or(0);

    const ADAPTIVE_FACTOR: f64 = 1.5;
    let delta = match std_dev(estimates) {
        Some(sd) if sd > 0.0 => ((sd * ADAPTIVE_FACTOR).round() as usize).max(1),
        _ => 1,
    };

    let lower = ALL_LEVELS[median_idx.saturating_sub(delta)];
    let upper = ALL_LEVELS[(median_idx + delta).min(ALL_LEVELS.len() - 1)];
    debug!(
        "refinement range: median {:?}, delta {}, range {:?}..{:?}",
        median, delta, lower, upper
    );
    (lower, upper)
}

/// hqdn3d parameters for a continuous strength, linearly interpolated
/// between the predefined anchors.
pub fn hqdn3d_for_strength(strength: f64) -> String {
    let s = strength.clamp(0.0, 4.0);
    let lo = s.floor() as usize;
    let hi = (lo + 1).min(4);
    let t = s - lo as f64;

    let (a, b) = (HQDN3D_ANCHORS[lo], HQDN3D_ANCHORS[hi]);
    let lerp = |x: f64, y: f64| x + (y - x) * t;
    format!(
        "{:.2}:{:.2}:{:.2}:{:.2}",
        lerp(a.0, b.0),
        lerp(a.1, b.1),
        lerp(a.2, b.2),
        lerp(a.3, b.3)
    )
}

/// Intermediate (strength, hqdn3d) test points strictly between two levels.
///
/// Wider ranges get more points, between 3 and 5, matching how much curve
/// there is to fill in.
pub fn interpolated_params(lower: GrainLevel, upper: GrainLevel) -> Vec<(f64, String)> {
    let lo = lower.strength();
    let hi = upper.strength();
    if hi <= lo + 0.1 {
        return Vec::new();
    }

    let count = ((hi - lo) * 2.0).round().clamp(3.0, 5.0) as usize;
    let step = (hi - lo) / (count as f64 + 1.0);

    (1..=count)
        .map(|i| {
            let strength = lo + step * i as f64;
            (strength, hqdn3d_for_strength(strength))
        })
        // Points landing on a predefined level are already covered by the
        // baseline sweep.
        .filter(|(s, _)| (s - s.round()).abs() > 1e-6)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use GrainLevel::*;

    #[test]
    fn identical_estimates_need_no_refinement() {
        assert!(!needs_refinement(&[Light, Light, Light]));
        assert!(!needs_refinement(&[Light]));
        assert!(!needs_refinement(&[]));
    }

    #[test]
    fn spread_estimates_trigger_refinement() {
        assert!(needs_refinement(&[VeryClean, Light, Medium]));
    }

    #[test]
    fn range_centers_on_median() {
        let (lo, hi) = refinement_range(&[Light, Light, Visible]);
        assert!(lo <= Light);
        assert!(hi >= Visible);
    }

    #[test]
    fn range_saturates_at_extremes() {
        let (lo, hi) = refinement_range(&[VeryClean, VeryClean, Medium]);
        assert_eq!(lo, VeryClean);
        assert!(hi >= Light);
        let (lo2, _) = refinement_range(&[]);
        assert_eq!(lo2, VeryClean);
    }

    #[test]
    fn interpolation_matches_anchors_at_integers() {
        assert_eq!(hqdn3d_for_strength(2.0), "1.00:0.70:4.00:4.00");
        assert_eq!(hqdn3d_for_strength(4.0), "2.00:1.30:8.00:8.00");
    }

    #[test]
    fn interpolation_is_componentwise_linear() {
        // Midpoint of Light (1,0.7,4,4) and Visible (1.5,1.0,6,6).
        assert_eq!(hqdn3d_for_strength(2.5), "1.25:0.85:5.00:5.00");
    }

    #[test]
    fn interpolated_points_stay_strictly_inside() {
        let points = interpolated_params(Light, Medium);
        assert!(!points.is_empty());
        for (s, params) in &points {
            assert!(*s > Light.strength() && *s < Medium.strength());
            assert_eq!(params.split(':').count(), 4);
        }
    }

    #[test]
    fn degenerate_range_yields_no_points() {
        assert!(interpolated_params(Light, Light).is_empty());
    }
}
