//! Window tapers.

use std::f64::consts::PI;

/// Tukey (tapered cosine) window of length `n` with taper fraction
/// `alpha` in [0, 1]. `alpha = 0` is a boxcar, `alpha = 1` a Hann
/// window. Matches `scipy.signal.windows.tukey(n, alpha)`.
pub fn tukey(n: usize, alpha: f64) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![1.0];
    }
    let alpha = alpha.clamp(0.0, 1.0);
    if alpha == 0.0 {
        return vec![1.0; n];
    }

    let width = alpha * (n as f64 - 1.0) / 2.0;
    let mut w = vec![1.0; n];
    for (i, v) in w.iter_mut().enumerate() {
        let x = i as f64;
        if x < width {
            *v = 0.5 * (1.0 + (PI * (x / width - 1.0)).cos());
        } else if x > (n as f64 - 1.0) - width {
            *v = 0.5 * (1.0 + (PI * ((x - (n as f64 - 1.0)) / width + 1.0)).cos());
        }
    }
    w
}
