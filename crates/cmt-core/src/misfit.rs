// ─────────────────────────────────────────────────────────────────────
// SCPN Seismo Core — Windowed Waveform Misfit
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Tapered least-squares waveform misfit and its Gauss-Newton
//! derivatives.
//!
//! Cost, gradient and Hessian all accumulate over the same selected
//! windows with the same per-trace factor, so the three quantities are
//! consistent by construction. The Hessian is the Gauss-Newton
//! approximation: products of first derivatives only.

use cmt_types::stream::{Stream, Trace};
use ndarray::{Array1, Array2};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct MisfitOptions {
    /// Divide each trace's contribution by its windowed data energy.
    pub normalize: bool,
    /// Multiply each trace's contribution by its precomputed weight.
    pub weighted: bool,
}

/// Per-trace scale factor shared by cost, gradient and Hessian.
/// `None` drops the trace from the misfit entirely.
fn trace_factor(obs: &Trace, opts: MisfitOptions) -> Option<f64> {
    let mut factor = 1.0;
    if opts.weighted {
        factor *= obs.weight.unwrap_or(1.0);
    }
    if opts.normalize {
        let energy = obs.windowed_energy();
        if energy <= 0.0 {
            warn!(trace = %obs.stats.id(), "zero windowed energy, dropping trace");
            return None;
        }
        factor /= energy;
    }
    Some(factor)
}

/// Windowed misfit 0.5 Σ w(t) (s - d)² dt accumulated over all traces.
pub fn cost(observed: &Stream, synthetic: &Stream, opts: MisfitOptions) -> f64 {
    let mut total = 0.0;
    for obs in observed.iter() {
        let Some(syn) = synthetic.select(
            &obs.stats.network,
            &obs.stats.station,
            &obs.stats.component,
        ) else {
            debug!(trace = %obs.stats.id(), "no matching synthetic, skipping");
            continue;
        };
        let Some(factor) = trace_factor(obs, opts) else {
            continue;
        };
        let dt = obs.stats.delta;
        let npts = obs.data.len().min(syn.data.len());
        for (iw, win) in obs.windows.iter().enumerate() {
            let right = win.right.min(npts);
            if win.left >= right {
                continue;
            }
            let taper = &obs.tapers[iw];
            let mut acc = 0.0;
            for k in win.left..right {
                let r = syn.data[k] - obs.data[k];
                acc += taper[k - win.left] * r * r;
            }
            total += 0.5 * acc * dt * factor;
        }
    }
    total
}

/// Cost, gradient and Gauss-Newton Hessian in one pass.
///
/// `frechets[i]` holds the synthetic partial derivatives with respect
/// to model parameter `i`. A trace missing from the synthetics or from
/// any Fréchet stream is skipped whole, so all three outputs see the
/// same station set.
pub fn cost_gradient_hessian(
    observed: &Stream,
    synthetic: &Stream,
    frechets: &[Stream],
    opts: MisfitOptions,
) -> (f64, Array1<f64>, Array2<f64>) {
    let npar = frechets.len();
    let mut total = 0.0;
    let mut grad = Array1::zeros(npar);
    let mut hess = Array2::zeros((npar, npar));

    'traces: for obs in observed.iter() {
        let net = &obs.stats.network;
        let sta = &obs.stats.station;
        let comp = &obs.stats.component;
        let Some(syn) = synthetic.select(net, sta, comp) else {
            debug!(trace = %obs.stats.id(), "no matching synthetic, skipping");
            continue;
        };
        let mut dsyn: Vec<&Trace> = Vec::with_capacity(npar);
        for fr in frechets {
            match fr.select(net, sta, comp) {
                Some(tr) => dsyn.push(tr),
                None => {
                    debug!(trace = %obs.stats.id(), "incomplete derivative set, skipping");
                    continue 'traces;
                }
            }
        }
        let Some(factor) = trace_factor(obs, opts) else {
            continue;
        };

        let dt = obs.stats.delta;
        let mut npts = obs.data.len().min(syn.data.len());
        for d in &dsyn {
            npts = npts.min(d.data.len());
        }

        for (iw, win) in obs.windows.iter().enumerate() {
            let right = win.right.min(npts);
            if win.left >= right {
                continue;
            }
            let taper = &obs.tapers[iw];
            let mut c_acc = 0.0;
            let mut g_acc = vec![0.0; npar];
            let mut h_acc = vec![0.0; npar * npar];
            for k in win.left..right {
                let w = taper[k - win.left];
                let r = syn.data[k] - obs.data[k];
                c_acc += w * r * r;
                for i in 0..npar {
                    let di = dsyn[i].data[k];
                    g_acc[i] += w * r * di;
                    for j in i..npar {
                        h_acc[i * npar + j] += w * di * dsyn[j].data[k];
                    }
                }
            }
            total += 0.5 * c_acc * dt * factor;
            for i in 0..npar {
                grad[i] += g_acc[i] * dt * factor;
                for j in i..npar {
                    let v = h_acc[i * npar + j] * dt * factor;
                    hess[[i, j]] += v;
                    if j != i {
                        hess[[j, i]] += v;
                    }
                }
            }
        }
    }
    (total, grad, hess)
}
