// ─────────────────────────────────────────────────────────────────────
// SCPN Seismo Core — Gauss-Newton Optimizer
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Gauss-Newton model updates with a strong-Wolfe line search.
//!
//! Every objective evaluation is a batch of forward simulations, so the
//! search is frugal: the accepted trial's cost, gradient and Hessian
//! are carried into the next iteration instead of re-evaluated, and
//! bracketing starts from the full Newton step.

use cmt_math::linalg::lu_solve;
use cmt_types::error::{CmtError, CmtResult};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One full evaluation of the misfit at a model point.
pub trait Objective {
    fn eval(&mut self, model: &Array1<f64>) -> CmtResult<(f64, Array1<f64>, Array2<f64>)>;
}

#[derive(Debug, Clone, Copy)]
pub struct OptOptions {
    pub niter_max: usize,
    /// Line-search trials per iteration before giving up.
    pub nls_max: usize,
    /// Armijo sufficient-decrease constant.
    pub wolfe_c1: f64,
    /// Strong curvature constant.
    pub wolfe_c2: f64,
    /// Bracket expansion factor while the right edge is open.
    pub expand_factor: f64,
    /// Relative cost-change threshold between accepted iterates.
    pub cost_change_tol: f64,
    /// Scaled model-step norm threshold.
    pub model_change_tol: f64,
    /// Gradient-norm threshold relative to the initial gradient.
    pub grad_tol: f64,
}

impl Default for OptOptions {
    fn default() -> Self {
        OptOptions {
            niter_max: 20,
            nls_max: 10,
            wolfe_c1: 1e-4,
            wolfe_c2: 0.9,
            expand_factor: 10.0,
            cost_change_tol: 1e-4,
            model_change_tol: 1e-6,
            grad_tol: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    GradientConverged,
    CostConverged,
    ModelConverged,
    MaxIterations,
    LineSearchFailed,
    /// An objective evaluation failed after at least one accepted
    /// iterate; the result carries the best model reached before it.
    Aborted,
}

/// Snapshot of one accepted iterate, serialized into the optimizer's
/// JSON history artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptState {
    pub iteration: usize,
    pub cost: f64,
    pub gradient_norm: f64,
    pub model: Vec<f64>,
    pub alpha: f64,
    pub line_search_trials: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptResult {
    pub model: Vec<f64>,
    pub cost: f64,
    pub stop: StopReason,
    pub history: Vec<OptState>,
}

/// Strong Wolfe conditions at a trial point.
///
/// `q` and `q_new` are directional derivatives g·p at the current and
/// trial model; `w3` is the precondition that p descends at all.
pub fn wolfe_conditions(
    f: f64,
    f_new: f64,
    q: f64,
    q_new: f64,
    alpha: f64,
    c1: f64,
    c2: f64,
) -> (bool, bool, bool) {
    let w1 = f_new <= f + c1 * alpha * q;
    let w2 = q_new.abs() <= c2 * q.abs();
    let w3 = q < 0.0;
    (w1, w2, w3)
}

/// Next trial step and updated bracket.
///
/// A failed sufficient-decrease closes the bracket from the right and
/// bisects; a failed curvature condition moves the left edge up and
/// either bisects or, with an open right edge, expands the step.
pub fn update_alpha(
    w1: bool,
    alpha: f64,
    alpha_l: f64,
    alpha_r: f64,
    factor: f64,
) -> (f64, f64, f64) {
    if !w1 {
        let alpha_r = alpha;
        ((alpha_l + alpha_r) / 2.0, alpha_l, alpha_r)
    } else {
        let alpha_l = alpha;
        if alpha_r.is_finite() {
            ((alpha_l + alpha_r) / 2.0, alpha_l, alpha_r)
        } else {
            (factor * alpha, alpha_l, alpha_r)
        }
    }
}

pub struct Optimization {
    pub opts: OptOptions,
}

impl Optimization {
    pub fn new(opts: OptOptions) -> Self {
        Optimization { opts }
    }

    /// Minimize the objective from `initial`. A stalled line search or
    /// non-descending direction stops the loop at the best accepted
    /// iterate rather than erroring, so partial progress survives.
    pub fn solve<O: Objective>(
        &self,
        objective: &mut O,
        initial: Array1<f64>,
    ) -> CmtResult<OptResult> {
        let opts = self.opts;
        let mut model = initial;
        let (mut f, mut g, mut h) = objective.eval(&model)?;
        let g0_norm = norm(&g);
        let mut history = Vec::new();
        history.push(OptState {
            iteration: 0,
            cost: f,
            gradient_norm: g0_norm,
            model: model.to_vec(),
            alpha: 0.0,
            line_search_trials: 0,
        });
        info!(cost = f, grad_norm = g0_norm, "optimization started");

        let mut stop = StopReason::MaxIterations;
        for iteration in 1..=opts.niter_max {
            if norm(&g) <= opts.grad_tol * g0_norm.max(f64::MIN_POSITIVE) {
                stop = StopReason::GradientConverged;
                break;
            }

            // Gauss-Newton direction H p = -g
            let rhs = g.mapv(|v| -v);
            let p = lu_solve(&h, &rhs).ok_or_else(|| {
                CmtError::LinAlg("singular Gauss-Newton Hessian".to_string())
            })?;
            let q = g.dot(&p);
            if q >= 0.0 {
                warn!(iteration, q, "update direction does not descend");
                stop = StopReason::LineSearchFailed;
                break;
            }

            // Strong-Wolfe search starting from the full Newton step
            let mut alpha = 1.0;
            let mut alpha_l = 0.0;
            let mut alpha_r = f64::INFINITY;
            let mut accepted = None;
            let mut aborted = false;
            let mut trials = 0;
            while trials < opts.nls_max {
                trials += 1;
                let trial = &model + &(p.mapv(|v| v * alpha));
                let (f_new, g_new, h_new) = match objective.eval(&trial) {
                    Ok(v) => v,
                    Err(e) => {
                        // Keep the best accepted iterate instead of
                        // losing the whole run to one failed solve batch
                        warn!(iteration, error = %e, "objective evaluation failed");
                        aborted = true;
                        break;
                    }
                };
                if !f_new.is_finite() {
                    // Step overshot into a non-physical model
                    alpha_r = alpha;
                    alpha = (alpha_l + alpha_r) / 2.0;
                    continue;
                }
                let q_new = g_new.dot(&p);
                let (w1, w2, _) =
                    wolfe_conditions(f, f_new, q, q_new, alpha, opts.wolfe_c1, opts.wolfe_c2);
                if w1 && w2 {
                    accepted = Some((trial, f_new, g_new, h_new, alpha));
                    break;
                }
                let (a, l, r) = update_alpha(w1, alpha, alpha_l, alpha_r, opts.expand_factor);
                alpha = a;
                alpha_l = l;
                alpha_r = r;
            }

            if aborted {
                stop = StopReason::Aborted;
                break;
            }
            let Some((new_model, f_new, g_new, h_new, alpha)) = accepted else {
                warn!(iteration, trials, "line search exhausted");
                stop = StopReason::LineSearchFailed;
                break;
            };

            let step_norm = norm(&(&new_model - &model));
            let cost_change = (f - f_new).abs() / f.max(f64::MIN_POSITIVE);
            model = new_model;
            let f_old = f;
            f = f_new;
            g = g_new;
            h = h_new;
            history.push(OptState {
                iteration,
                cost: f,
                gradient_norm: norm(&g),
                model: model.to_vec(),
                alpha,
                line_search_trials: trials,
            });
            info!(iteration, cost = f, alpha, trials, "iterate accepted");

            if cost_change < opts.cost_change_tol && f < f_old {
                stop = StopReason::CostConverged;
                break;
            }
            if step_norm < opts.model_change_tol {
                stop = StopReason::ModelConverged;
                break;
            }
        }

        info!(?stop, cost = f, "optimization finished");
        Ok(OptResult {
            model: model.to_vec(),
            cost: f,
            stop,
            history,
        })
    }
}

fn norm(v: &Array1<f64>) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}
