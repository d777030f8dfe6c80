// ─────────────────────────────────────────────────────────────────────
// SCPN Seismo Core — Inversion Driver
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Event-level orchestration of one CMT inversion.
//!
//! The driver owns the data streams, the simulation directories and
//! the model/scale bookkeeping, and exposes itself as an [`Objective`]
//! so the optimizer never sees waveforms. External concerns, namely
//! instrument processing, window selection, the forward solver and
//! waveform IO, enter through [`Hooks`].

use crate::exec::{map_ordered, ExecMode};
use crate::measure::write_measurements;
use crate::misfit::{self, MisfitOptions};
use crate::optimizer::{Objective, OptOptions, OptResult, Optimization, StopReason};
use serde::{Deserialize, Serialize};
use crate::sim::{
    check_source_consistency, ParFile, SimDirs, SimKind, SimRunner, TraceLoader, DATA_DIR,
    SOURCE_FILE,
};
use crate::weights::compute_weights;
use cmt_math::geo::{azimuth_deg, gc_distance_deg};
use cmt_math::signal::differentiate;
use cmt_math::taper::tukey;
use cmt_types::config::{EventMeta, InversionConfig, ProcessSpec, WindowSpec};
use cmt_types::error::{CmtError, CmtResult};
use cmt_types::params::{Param, ParamDict};
use cmt_types::source::CmtSource;
use cmt_types::stream::{merge_windows, Station, Stream, Trace, Window};
use ndarray::{Array1, Array2};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub type ProcessFn = dyn Fn(&Trace, &EventMeta, &ProcessSpec) -> CmtResult<Trace> + Send + Sync;
pub type WindowFn = dyn Fn(&Trace, &Trace, &[WindowSpec]) -> Vec<Window> + Send + Sync;

/// External collaborators of the driver.
pub struct Hooks {
    pub process: Box<ProcessFn>,
    pub window: Box<WindowFn>,
    pub runner: Box<dyn SimRunner>,
    pub loader: Box<dyn TraceLoader>,
}

/// Lifecycle of one inversion. Stages only ever advance; the guards in
/// the driver make out-of-order calls cheap no-ops or hard errors
/// instead of silently recomputing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    DirectoryReady,
    DataLoaded,
    Windowed,
    Iterating,
    Converged,
    Failed,
}

/// Everything the driver needs besides its hooks.
pub struct InversionSetup {
    pub config: InversionConfig,
    pub params: ParamDict,
    pub source: CmtSource,
    pub stations: Vec<Station>,
    /// Unprocessed observed waveforms, all stations and components.
    pub raw: Stream,
    pub sim_root: PathBuf,
    pub out_dir: PathBuf,
    pub par_template: ParFile,
}

pub struct CmtInversion {
    config: InversionConfig,
    params: ParamDict,
    source: CmtSource,
    event: EventMeta,
    hooks: Hooks,
    dirs: SimDirs,
    out_dir: PathBuf,
    raw: Stream,
    /// Processed, windowed observed data per wave type.
    observed: BTreeMap<String, Stream>,
    scale: Vec<f64>,
    scaled_initial: Vec<f64>,
    cost_norm: Option<f64>,
    stage: Stage,
}

impl CmtInversion {
    /// Validate the configuration against the event, stage the
    /// simulation directories and derive the scaling.
    pub fn new(setup: InversionSetup, hooks: Hooks) -> CmtResult<Self> {
        let InversionSetup {
            mut config,
            params,
            source,
            stations,
            mut raw,
            sim_root,
            out_dir,
            par_template,
        } = setup;

        config.validate()?;
        config.adapt_for_event(source.moment_magnitude(), source.depth_in_m)?;

        if params.index_of(Param::HalfDuration).is_some() {
            return Err(CmtError::ConfigError(
                "half duration has no usable derivative; invert time shift instead".to_string(),
            ));
        }

        let event = EventMeta {
            latitude: source.latitude,
            longitude: source.longitude,
            origin_time: source.origin_time,
            cmt_time: source.cmt_time(),
            duration: config.duration,
        };

        // Event geometry onto every trace, for weighting
        for tr in raw.iter_mut() {
            tr.stats.distance = gc_distance_deg(
                event.latitude,
                event.longitude,
                tr.stats.latitude,
                tr.stats.longitude,
            );
            tr.stats.azimuth = azimuth_deg(
                event.latitude,
                event.longitude,
                tr.stats.latitude,
                tr.stats.longitude,
            );
        }

        let dirs = SimDirs::new(sim_root, &params);
        if !config.overwrite {
            for dir in dirs.dirs() {
                check_source_consistency(&dir, &source)?;
            }
        }
        dirs.prepare(&par_template, config.duration, &stations)?;
        std::fs::create_dir_all(&out_dir)?;

        let scale = params.scale_vector(&source)?;
        let physical = params.model_vector(&source);
        let scaled_initial: Vec<f64> =
            physical.iter().zip(&scale).map(|(m, s)| m / s).collect();

        info!(
            event = %source.event_name,
            magnitude = source.moment_magnitude(),
            params = params.len(),
            "inversion initialized"
        );

        Ok(CmtInversion {
            config,
            params,
            source,
            event,
            hooks,
            dirs,
            out_dir,
            raw,
            observed: BTreeMap::new(),
            scale,
            scaled_initial,
            cost_norm: None,
            stage: Stage::DirectoryReady,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Process the raw data once per wave type.
    pub fn process_data(&mut self) -> CmtResult<()> {
        let mode = ExecMode::from_width(self.config.multiprocesses);
        for (wtype, spec) in &self.config.wave_types {
            let traces = self.raw.traces.clone();
            let event = self.event;
            let pspec = spec.process.clone();
            let process = &self.hooks.process;
            let processed = map_ordered(mode, traces, |tr| process(&tr, &event, &pspec))?;
            info!(wave_type = %wtype, traces = processed.len(), "observed data processed");
            self.observed.insert(wtype.clone(), Stream::new(processed));
        }
        self.stage = self.stage.max(Stage::DataLoaded);
        Ok(())
    }

    /// Select measurement windows against the starting synthetics.
    ///
    /// Runs once per inversion: the windows and tapers chosen here are
    /// frozen so every later model is measured on identical samples.
    pub fn window_data(&mut self) -> CmtResult<()> {
        if self.stage >= Stage::Windowed {
            debug!("windows already selected, keeping them");
            return Ok(());
        }
        if self.stage < Stage::DataLoaded {
            self.process_data()?;
        }

        self.dirs.write_sources(&self.source, &self.params)?;
        self.hooks.runner.run(&[self.dirs.dir(SimKind::Baseline)])?;
        let synthetics = self.load_processed(SimKind::Baseline)?;

        let alpha = self.config.taper_alpha;
        for (wtype, stream) in self.observed.iter_mut() {
            let spec = &self.config.wave_types[wtype];
            let syn_stream = &synthetics[wtype];
            let window_fn = &self.hooks.window;

            let mut kept = Vec::new();
            for mut tr in std::mem::take(&mut stream.traces) {
                let Some(syn) = syn_stream.select(
                    &tr.stats.network,
                    &tr.stats.station,
                    &tr.stats.component,
                ) else {
                    debug!(trace = %tr.stats.id(), "no synthetic, dropping from inversion");
                    continue;
                };
                let windows = merge_windows(window_fn(&tr, syn, &spec.windows));
                if windows.is_empty() {
                    debug!(trace = %tr.stats.id(), "no acceptable windows");
                    continue;
                }
                tr.tapers = windows.iter().map(|w| tukey(w.len(), alpha)).collect();
                tr.windows = windows;
                kept.push(tr);
            }
            info!(wave_type = %wtype, traces = kept.len(), "windows selected");
            stream.traces = kept;
        }
        self.stage = Stage::Windowed;

        write_measurements(
            &self.observed,
            &synthetics,
            &self.out_dir.join("measurements_initial.json"),
        )?;
        Ok(())
    }

    /// Station weighting over the windowed data.
    pub fn compute_weights(&mut self) -> CmtResult<()> {
        let report = compute_weights(&mut self.observed, &self.config)?;
        report.write_file(&self.out_dir.join("weights.json"))?;
        Ok(())
    }

    /// Scaled starting model for the optimizer, with the zero-trace
    /// multiplier appended when the constraint is active.
    pub fn initial_model(&self) -> Array1<f64> {
        let mut m = self.scaled_initial.clone();
        if self.constrained() {
            m.push(0.0);
        }
        Array1::from_vec(m)
    }

    fn constrained(&self) -> bool {
        self.config.zero_trace && self.params.inverts_tensor()
    }

    /// Physical source for a scaled model vector (multiplier ignored).
    pub fn model_to_source(&self, model: &Array1<f64>) -> CmtSource {
        let mut src = self.source.clone();
        for (i, (par, _)) in self.params.iter().enumerate() {
            src.set_param(par, model[i] * self.scale[i]);
        }
        src
    }

    fn misfit_options(&self) -> MisfitOptions {
        MisfitOptions {
            normalize: self.config.normalize,
            weighted: self.config.weighting,
        }
    }

    /// Load one directory's synthetics and process them per wave type.
    /// Response removal never applies to synthetic data.
    fn load_processed(&self, kind: SimKind) -> CmtResult<BTreeMap<String, Stream>> {
        let stream = self.hooks.loader.load(&self.dirs.dir(kind))?;
        let mode = ExecMode::from_width(self.config.multiprocesses);
        let mut out = BTreeMap::new();
        for (wtype, spec) in &self.config.wave_types {
            let mut pspec = spec.process.clone();
            pspec.remove_response = false;
            let event = self.event;
            let process = &self.hooks.process;
            let processed =
                map_ordered(mode, stream.traces.clone(), |tr| process(&tr, &event, &pspec))?;
            out.insert(wtype.clone(), Stream::new(processed));
        }
        Ok(out)
    }

    /// Fréchet derivative streams in dictionary order, one per
    /// parameter, derived from the finished simulation batch.
    fn load_frechets(
        &self,
        baseline: &BTreeMap<String, Stream>,
    ) -> CmtResult<Vec<BTreeMap<String, Stream>>> {
        let mut out = Vec::with_capacity(self.params.len());
        for (par, spec) in self.params.iter() {
            if !par.needs_simulation() {
                // d/d(time shift) shifts the source time function, so the
                // derivative is the negated velocity of the baseline.
                let mut shifted = BTreeMap::new();
                for (wtype, stream) in baseline {
                    let mut traces = Vec::with_capacity(stream.len());
                    for tr in stream.iter() {
                        let mut d = tr.clone();
                        d.data = differentiate(&tr.data, tr.stats.delta);
                        for v in &mut d.data {
                            *v = -*v;
                        }
                        traces.push(d);
                    }
                    shifted.insert(wtype.clone(), Stream::new(traces));
                }
                out.push(shifted);
                continue;
            }

            let mut loaded = self.load_processed(SimKind::Frechet(par))?;
            match spec.pert {
                Some(pert) if par.is_tensor() => {
                    // The isolated-element source is linear in the element,
                    // so the run itself is pert × the derivative.
                    for stream in loaded.values_mut() {
                        stream.scale(1.0 / pert);
                    }
                }
                Some(pert) => {
                    // One-sided finite difference against the baseline
                    for (wtype, stream) in loaded.iter_mut() {
                        let base = &baseline[wtype];
                        for tr in stream.iter_mut() {
                            let Some(b) = base.select(
                                &tr.stats.network,
                                &tr.stats.station,
                                &tr.stats.component,
                            ) else {
                                continue;
                            };
                            let n = tr.data.len().min(b.data.len());
                            for k in 0..n {
                                tr.data[k] = (tr.data[k] - b.data[k]) / pert;
                            }
                        }
                    }
                }
                None => {
                    if par == Param::Depth {
                        // Solver's analytic depth derivative is per
                        // kilometer; the model tracks meters.
                        for stream in loaded.values_mut() {
                            stream.scale(1.0e-3);
                        }
                    }
                }
            }
            out.push(loaded);
        }
        Ok(out)
    }

    /// Aggregate cost/gradient/Hessian over wave types at the given
    /// physical source.
    fn accumulate(
        &self,
        baseline: &BTreeMap<String, Stream>,
        frechets: &[BTreeMap<String, Stream>],
    ) -> (f64, Array1<f64>, Array2<f64>) {
        let n = self.params.len();
        let opts = self.misfit_options();
        let mut cost = 0.0;
        let mut grad = Array1::zeros(n);
        let mut hess = Array2::zeros((n, n));
        for (wtype, obs) in &self.observed {
            let weight = self.config.wave_types[wtype].weight;
            let syn = &baseline[wtype];
            let fr: Vec<Stream> = frechets.iter().map(|f| f[wtype].clone()).collect();
            let (c, g, h) = misfit::cost_gradient_hessian(obs, syn, &fr, opts);
            cost += weight * c;
            for i in 0..n {
                grad[i] += weight * g[i];
                for j in 0..n {
                    hess[[i, j]] += weight * h[[i, j]];
                }
            }
        }
        (cost, grad, hess)
    }

    /// Forward-model the baseline at a scaled model and return the cost
    /// only. Used by grid searches; does not touch cost normalization.
    pub fn forward_cost(&mut self, source: &CmtSource) -> CmtResult<f64> {
        source
            .write_file(&self.dirs.dir(SimKind::Baseline).join(DATA_DIR).join(SOURCE_FILE))?;
        self.hooks.runner.run(&[self.dirs.dir(SimKind::Baseline)])?;
        let synthetics = self.load_processed(SimKind::Baseline)?;
        let opts = self.misfit_options();
        let mut cost = 0.0;
        for (wtype, obs) in &self.observed {
            cost += self.config.wave_types[wtype].weight
                * misfit::cost(obs, &synthetics[wtype], opts);
        }
        Ok(cost)
    }

    /// One-dimensional misfit profile over candidate depths (meters).
    ///
    /// Each point is a full objective evaluation, so the profile also
    /// reports the depth sensitivity and curvature alongside the cost.
    /// Requires `Depth` in the parameter dictionary and selected
    /// windows.
    pub fn misfit_walk_depth(&mut self, depths: &[f64]) -> CmtResult<Vec<DepthWalkPoint>> {
        let idx = self.params.index_of(Param::Depth).ok_or_else(|| {
            CmtError::ConfigError("depth walk needs depth in the parameter dictionary".to_string())
        })?;
        let mut profile = Vec::with_capacity(depths.len());
        for &depth in depths {
            let mut model = self.initial_model();
            model[idx] = depth / self.scale[idx];
            let (cost, grad, hess) = self.eval(&model)?;
            info!(depth, cost, "depth walk point");
            profile.push(DepthWalkPoint {
                depth_in_m: depth,
                cost,
                gradient: grad[idx],
                curvature: hess[[idx, idx]],
            });
        }
        self.source
            .write_file(&self.dirs.dir(SimKind::Baseline).join(DATA_DIR).join(SOURCE_FILE))?;
        Ok(profile)
    }

    /// Run the complete inversion: windows, weights, Gauss-Newton loop,
    /// final artifacts. Returns the optimized source and the optimizer
    /// history.
    pub fn solve(&mut self, opts: OptOptions) -> CmtResult<(CmtSource, OptResult)> {
        self.window_data()?;
        if self.config.weighting {
            self.compute_weights()?;
        }

        let initial = self.initial_model();
        self.stage = Stage::Iterating;
        let result = Optimization::new(opts).solve(self, initial)?;
        // Hitting the iteration cap is a failure to converge, not a
        // converged inversion; its artifacts still get written below.
        self.stage = match result.stop {
            StopReason::LineSearchFailed
            | StopReason::Aborted
            | StopReason::MaxIterations => Stage::Failed,
            _ => Stage::Converged,
        };

        let best = self.model_to_source(&Array1::from_vec(result.model.clone()));
        best.write_file(&self.out_dir.join(format!("{}_inverted", best.event_name)))?;
        std::fs::write(
            self.out_dir.join("optimization.json"),
            serde_json::to_string_pretty(&result)?,
        )?;

        // Final-model measurements for quality control
        self.dirs.write_sources(&best, &self.params)?;
        self.hooks.runner.run(&[self.dirs.dir(SimKind::Baseline)])?;
        let synthetics = self.load_processed(SimKind::Baseline)?;
        write_measurements(
            &self.observed,
            &synthetics,
            &self.out_dir.join("measurements_final.json"),
        )?;

        Ok((best, result))
    }
}

/// One sample of a depth misfit profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DepthWalkPoint {
    pub depth_in_m: f64,
    pub cost: f64,
    /// Scaled-space misfit derivative with respect to depth.
    pub gradient: f64,
    pub curvature: f64,
}

/// Border the system with the zero-trace constraint row. The extra
/// unknown is the Lagrange multiplier; the appended gradient entry is
/// the scaled trace of the current tensor.
pub fn augment_zero_trace(
    grad: &Array1<f64>,
    hess: &Array2<f64>,
    model: &Array1<f64>,
    lambda: f64,
    params: &ParamDict,
) -> (Array1<f64>, Array2<f64>) {
    let n = grad.len();
    let mut g = Array1::zeros(n + 1);
    let mut h = Array2::zeros((n + 1, n + 1));
    let mut trace = 0.0;
    for (i, (par, _)) in params.iter().enumerate() {
        g[i] = grad[i];
        if par.is_tensor_diagonal() {
            g[i] += lambda;
            h[[n, i]] = 1.0;
            h[[i, n]] = 1.0;
            trace += model[i];
        }
        for (j, _) in params.iter().enumerate() {
            h[[i, j]] = hess[[i, j]];
        }
    }
    g[n] = trace;
    (g, h)
}

/// Largest absolute Hessian diagonal over the hypocentral parameters
/// only. Tensor rows carry a much larger diagonal and must not set the
/// hypocentral damping scale.
fn hypo_max_abs_diag(hess: &Array2<f64>, params: &ParamDict) -> f64 {
    let mut max = 0.0f64;
    for (i, (par, _)) in params.iter().enumerate() {
        if par.is_hypocentral() {
            max = max.max(hess[[i, i]].abs());
        }
    }
    max
}

impl Objective for CmtInversion {
    /// One full evaluation: write sources, run every simulation, load
    /// and process results, assemble the scaled, damped, constrained
    /// system.
    fn eval(&mut self, model: &Array1<f64>) -> CmtResult<(f64, Array1<f64>, Array2<f64>)> {
        if self.stage < Stage::Windowed {
            return Err(CmtError::ConfigError(
                "objective evaluated before window selection".to_string(),
            ));
        }
        let n = self.params.len();
        let src = self.model_to_source(model);
        self.dirs.write_sources(&src, &self.params)?;
        self.hooks.runner.run(&self.dirs.dirs())?;

        let baseline = self.load_processed(SimKind::Baseline)?;
        let frechets = self.load_frechets(&baseline)?;
        let (mut cost, mut grad, mut hess) = self.accumulate(&baseline, &frechets);

        // First evaluation defines the cost normalization
        let norm = match self.cost_norm {
            Some(v) => v,
            None => {
                let v = if cost > 0.0 { cost } else { 1.0 };
                debug!(cost_norm = v, "caching cost normalization");
                self.cost_norm = Some(v);
                v
            }
        };
        cost /= norm;
        grad.mapv_inplace(|v| v / norm);
        hess.mapv_inplace(|v| v / norm);

        // Chain rule onto the scaled model space
        for i in 0..n {
            grad[i] *= self.scale[i];
            for j in 0..n {
                hess[[i, j]] *= self.scale[i] * self.scale[j];
            }
        }

        if self.config.damping > 0.0 {
            let factor = self.config.damping * cmt_math::linalg::max_abs_diag(&hess);
            for i in 0..n {
                grad[i] += factor * (model[i] - self.scaled_initial[i]);
                hess[[i, i]] += factor;
            }
        } else if self.config.hypo_damping > 0.0 {
            let factor = self.config.hypo_damping * hypo_max_abs_diag(&hess, &self.params);
            for (i, (par, _)) in self.params.iter().enumerate() {
                if par.is_hypocentral() {
                    grad[i] += factor * (model[i] - self.scaled_initial[i]);
                    hess[[i, i]] += factor;
                }
            }
        }

        if self.constrained() {
            if model.len() != n + 1 {
                return Err(CmtError::ConfigError(
                    "constrained model vector is missing its multiplier".to_string(),
                ));
            }
            let lambda = model[n];
            let (g, h) = augment_zero_trace(&grad, &hess, model, lambda, &self.params);
            warn_if_nonfinite(cost, &g);
            return Ok((cost, g, h));
        }

        warn_if_nonfinite(cost, &grad);
        Ok((cost, grad, hess))
    }
}

fn warn_if_nonfinite(cost: f64, grad: &Array1<f64>) {
    if !cost.is_finite() || grad.iter().any(|v| !v.is_finite()) {
        warn!(cost, "non-finite objective; line search will backtrack");
    }
}
