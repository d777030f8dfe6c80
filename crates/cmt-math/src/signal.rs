//! Waveform measures used by the window-measurement pass.
//!
//! Cross-correlation alignment, amplitude ratios and trace norms. The
//! direct O(n²) correlation is fine at measurement-window lengths.

/// Full normalized cross-correlation of `d` against `s`.
///
/// Returns `(max_cc, shift)` where `shift` is the integer lag (in
/// samples) maximizing the correlation and `max_cc` the normalized
/// coefficient there. Zero-energy inputs yield `(0.0, 0)`.
pub fn xcorr(d: &[f64], s: &[f64]) -> (f64, i64) {
    if d.is_empty() || s.is_empty() {
        return (0.0, 0);
    }
    let energy = (d.iter().map(|v| v * v).sum::<f64>()
        * s.iter().map(|v| v * v).sum::<f64>())
    .sqrt();
    if energy == 0.0 {
        return (0.0, 0);
    }

    let mut best_cc = f64::NEG_INFINITY;
    let mut best_shift = 0i64;
    for shift in -(s.len() as i64 - 1)..(d.len() as i64) {
        let mut cc = 0.0;
        for (i, &sv) in s.iter().enumerate() {
            let j = i as i64 + shift;
            if j >= 0 && (j as usize) < d.len() {
                cc += d[j as usize] * sv;
            }
        }
        if cc > best_cc {
            best_cc = cc;
            best_shift = shift;
        }
    }
    (best_cc / energy, best_shift)
}

/// Shift a window `[left, right)` on the observed trace by `shift`
/// samples and clamp to `[0, npts)`, returning the corrected index
/// pairs for the observed and synthetic trace. `None` when the shifted
/// window falls entirely off the trace.
pub fn correct_window_index(
    left: usize,
    right: usize,
    shift: i64,
    npts: usize,
) -> Option<((usize, usize), (usize, usize))> {
    let d_left = (left as i64 + shift).max(0);
    let d_right = (right as i64 + shift).min(npts as i64);
    if d_left >= d_right {
        return None;
    }
    let s_left = d_left - shift;
    let s_right = d_right - shift;
    if s_left < 0 || s_right > npts as i64 {
        return None;
    }
    Some((
        (d_left as usize, d_right as usize),
        (s_left as usize, s_right as usize),
    ))
}

/// L1 norm Σ|d| dt.
pub fn norm1(d: &[f64], dt: f64) -> f64 {
    d.iter().map(|v| v.abs()).sum::<f64>() * dt
}

/// Half energy 0.5 Σ d² dt.
pub fn norm2(d: &[f64], dt: f64) -> f64 {
    0.5 * d.iter().map(|v| v * v).sum::<f64>() * dt
}

/// L1 residual norm Σ|d - s| dt.
pub fn dnorm1(d: &[f64], s: &[f64], dt: f64) -> f64 {
    d.iter()
        .zip(s)
        .map(|(a, b)| (a - b).abs())
        .sum::<f64>()
        * dt
}

/// Half residual energy 0.5 Σ (d - s)² dt.
pub fn dnorm2(d: &[f64], s: &[f64], dt: f64) -> f64 {
    0.5 * d
        .iter()
        .zip(s)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        * dt
}

/// L1 power ratio in dB, 10 log10(Σ|d| / Σ|s|). A zero-energy window
/// on either side measures 0 instead of a non-finite ratio.
pub fn power_l1(d: &[f64], s: &[f64]) -> f64 {
    let num: f64 = d.iter().map(|v| v.abs()).sum();
    let den: f64 = s.iter().map(|v| v.abs()).sum();
    if num <= 0.0 || den <= 0.0 {
        return 0.0;
    }
    10.0 * (num / den).log10()
}

/// L2 power ratio in dB, 10 log10(Σd² / Σs²). Zero-energy windows
/// measure 0.
pub fn power_l2(d: &[f64], s: &[f64]) -> f64 {
    let num: f64 = d.iter().map(|v| v * v).sum();
    let den: f64 = s.iter().map(|v| v * v).sum();
    if num <= 0.0 || den <= 0.0 {
        return 0.0;
    }
    10.0 * (num / den).log10()
}

/// Amplitude anomaly 0.5 ln(Σd² / Σs²). Zero-energy windows measure 0.
pub fn dlna(d: &[f64], s: &[f64]) -> f64 {
    let num: f64 = d.iter().map(|v| v * v).sum();
    let den: f64 = s.iter().map(|v| v * v).sum();
    if num <= 0.0 || den <= 0.0 {
        return 0.0;
    }
    0.5 * (num / den).ln()
}

/// Central-difference time derivative, one-sided at the ends.
pub fn differentiate(d: &[f64], dt: f64) -> Vec<f64> {
    let n = d.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mut out = vec![0.0; n];
    out[0] = (d[1] - d[0]) / dt;
    for i in 1..n - 1 {
        out[i] = (d[i + 1] - d[i - 1]) / (2.0 * dt);
    }
    out[n - 1] = (d[n - 1] - d[n - 2]) / dt;
    out
}
