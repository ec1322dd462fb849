//! Interpolation ladder for the CRF search.
//!
//! Probes are (score, crf) points with scores strictly ascending. Each round
//! the search evaluates "CRF as a function of score" at the target score,
//! with a method chosen by how many probes exist: linear for two, monotone
//! cubic Hermite (Fritsch-Carlson) for three, PCHIP for four, and an Akima
//! spline from five up. The monotone methods never overshoot the probe
//! envelope, which keeps the predicted CRF inside the searched range.
//!
//! Every function returns `None` on degenerate input (too few points,
//! duplicate or unsorted abscissas); the caller falls back to a binary
//! midpoint.

/// Evaluation target outside the sampled range clamps to the nearest end
/// point rather than extrapolating.
fn clamp_target(xs: &[f64], target: f64) -> f64 {
    target.clamp(xs[0], xs[xs.len() - 1])
}

fn strictly_ascending(xs: &[f64]) -> bool {
    xs.windows(2).all(|w| w[1] > w[0])
}

/// Cubic Hermite evaluation on `[x0, x1]` with tangents `m0`, `m1`.
fn hermite(x: f64, x0: f64, x1: f64, y0: f64, y1: f64, m0: f64, m1: f64) -> f64 {
    let h = x1 - x0;
    let t = (x - x0) / h;
    let t2 = t * t;
    let t3 = t2 * t;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;
    h00 * y0 + h10 * h * m0 + h01 * y1 + h11 * h * m1
}

/// Evaluate a Hermite spline defined by per-point tangents.
fn eval_hermite_spline(xs: &[f64], ys: &[f64], tangents: &[f64], target: f64) -> f64 {
    let x = clamp_target(xs, target);
    let i = match xs.windows(2).position(|w| x >= w[0] && x <= w[1]) {
        Some(i) => i,
        None => xs.len() - 2,
    };
    hermite(x, xs[i], xs[i + 1], ys[i], ys[i + 1], tangents[i], tangents[i + 1])
}

/// Straight line through two points.
pub fn linear_interpolate(xs: &[f64], ys: &[f64], target: f64) -> Option<f64> {
    if xs.len() < 2 || ys.len() < xs.len() || !strictly_ascending(&xs[..2]) {
        return None;
    }
    let x = clamp_target(&xs[..2], target);
    let t = (x - xs[0]) / (xs[1] - xs[0]);
    Some(ys[0] + t * (ys[1] - ys[0]))
}

/// Apply the Fritsch-Carlson monotonicity limiter to Hermite tangents:
/// wherever `alpha^2 + beta^2 > 9`, scale both tangents by `3 / sqrt(..)`.
fn limit_tangents(secants: &[f64], tangents: &mut [f64]) {
    for i in 0..secants.len() {
        if secants[i] == 0.0 {
            tangents[i] = 0.0;
            tangents[i + 1] = 0.0;
            continue;
        }
        let alpha = tangents[i] / secants[i];
        let beta = tangents[i + 1] / secants[i];
        // Opposite-signed tangent would break monotonicity outright.
        if alpha < 0.0 {
            tangents[i] = 0.0;
            continue;
        }
        if beta < 0.0 {
            tangents[i + 1] = 0.0;
            continue;
        }
        let norm_sq = alpha * alpha + beta * beta;
        if norm_sq > 9.0 {
            let tau = 3.0 / norm_sq.sqrt();
            tangents[i] = tau * alpha * secants[i];
            tangents[i + 1] = tau * beta * secants[i];
        }
    }
}

/// Fritsch-Carlson monotone cubic Hermite through three or more points,
/// with arithmetic-mean interior tangents.
pub fn fritsch_carlson_interpolate(xs: &[f64], ys: &[f64], target: f64) -> Option<f64> {
    let n = xs.len();
    if n < 3 || ys.len() != n || !strictly_ascending(xs) {
        return None;
    }

    let secants: Vec<f64> = (0..n - 1)
        .map(|i| (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i]))
        .collect();

    let mut tangents = vec![0.0; n];
    tangents[0] = secants[0];
    tangents[n - 1] = secants[n - 2];
    for i in 1..n - 1 {
        tangents[i] = if secants[i - 1] * secants[i] <= 0.0 {
            0.0
        } else {
            (secants[i - 1] + secants[i]) / 2.0
        };
    }
    limit_tangents(&secants, &mut tangents);

    Some(eval_hermite_spline(xs, ys, &tangents, target))
}

/// PCHIP: shape-preserving Hermite with weighted-harmonic-mean tangents
/// (Fritsch-Butland), plus the same `tau^2 <= 9` safeguard.
pub fn pchip_interpolate(xs: &[f64], ys: &[f64], target: f64) -> Option<f64> {
    let n = xs.len();
    if n < 4 || ys.len() != n || !strictly_ascending(xs) {
        return None;
    }

    let h: Vec<f64> = (0..n - 1).map(|i| xs[i + 1] - xs[i]).collect();
    let secants: Vec<f64> = (0..n - 1).map(|i| (ys[i + 1] - ys[i]) / h[i]).collect();

    let mut tangents = vec![0.0; n];
    for i in 1..n - 1 {
        if secants[i - 1] * secants[i] <= 0.0 {
            tangents[i] = 0.0;
        } else {
            let w1 = 2.0 * h[i] + h[i - 1];
            let w2 = h[i] + 2.0 * h[i - 1];
            tangents[i] = (w1 + w2) / (w1 / secants[i - 1] + w2 / secants[i]);
        }
    }
    // One-sided endpoint tangents, clipped to preserve the end intervals.
    tangents[0] = endpoint_tangent(h[0], h[1], secants[0], secants[1]);
    tangents[n - 1] = endpoint_tangent(h[n - 2], h[n - 3], secants[n - 2], secants[n - 3]);
    limit_tangents(&secants, &mut tangents);

    Some(eval_hermite_spline(xs, ys, &tangents, target))
}

/// Non-centered three-point endpoint derivative with the standard PCHIP
/// clipping rules.
fn endpoint_tangent(h0: f64, h1: f64, s0: f64, s1: f64) -> f64 {
    let t = ((2.0 * h0 + h1) * s0 - h0 * s1) / (h0 + h1);
    if t * s0 <= 0.0 {
        0.0
    } else if s0 * s1 <= 0.0 && t.abs() > 3.0 * s0.abs() {
        3.0 * s0
    } else {
        t
    }
}

/// Akima spline through five or more points.
pub fn akima_interpolate(xs: &[f64], ys: &[f64], target: f64) -> Option<f64> {
    let n = xs.len();
    if n < 5 || ys.len() != n || !strictly_ascending(xs) {
        return None;
    }

    // Secants extended by two ghost intervals on each side.
    let m: Vec<f64> = (0..n - 1)
        .map(|i| (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i]))
        .collect();
    let mut ext = Vec::with_capacity(n + 3);
    ext.push(0.0); // placeholder, filled below
    ext.push(0.0);
    ext.extend_from_slice(&m);
    ext.push(2.0 * m[n - 2] - m[n - 3]);
    ext.push(2.0 * ext[ext.len() - 1] - m[n - 2]);
    ext[1] = 2.0 * m[0] - m[1];
    ext[0] = 2.0 * ext[1] - m[0];

    let mut tangents = vec![0.0; n];
    for (i, tangent) in tangents.iter_mut().enumerate() {
        // ext[i] is the secant two intervals left of point i.
        let m_m2 = ext[i];
        let m_m1 = ext[i + 1];
        let m_0 = ext[i + 2];
        let m_p1 = ext[i + 3];
        let w1 = (m_p1 - m_0).abs();
        let w2 = (m_m1 - m_m2).abs();
        *tangent = if w1 + w2 == 0.0 {
            (m_m1 + m_0) / 2.0
        } else {
            (w1 * m_m1 + w2 * m_0) / (w1 + w2)
        };
    }

    Some(eval_hermite_spline(xs, ys, &tangents, target))
}
