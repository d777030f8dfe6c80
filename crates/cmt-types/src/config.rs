// ─────────────────────────────────────────────────────────────────────
// SCPN Seismo Core — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Inversion configuration and per-wave-type processing specs.

use crate::error::{CmtError, CmtResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Signal-processing sub-spec for one wave type. The pre-filter corners
/// are periods in seconds, descending: [t0, t1, t2, t3] with the pass
/// band between t1 and t2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub pre_filt: [f64; 4],
    pub relative_starttime: f64,
    pub relative_endtime: f64,
    #[serde(default)]
    pub remove_response: bool,
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: f64,
}

fn default_sampling_rate() -> f64 {
    1.0
}

/// Window-selection sub-spec handed to the external window function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub min_period: f64,
    pub max_period: f64,
    #[serde(default = "default_min_cc")]
    pub min_cc: f64,
    #[serde(default = "default_max_shift")]
    pub max_shift_s: f64,
}

fn default_min_cc() -> f64 {
    0.7
}

fn default_max_shift() -> f64 {
    30.0
}

/// One wave-type category: scalar misfit weight, processing spec and one
/// or more windowing specs. Frozen after per-event adaptation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveTypeSpec {
    pub weight: f64,
    pub process: ProcessSpec,
    pub windows: Vec<WindowSpec>,
}

/// Event context handed to the external processing/window functions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    pub latitude: f64,
    pub longitude: f64,
    pub origin_time: f64,
    pub cmt_time: f64,
    pub duration: f64,
}

/// Top-level inversion configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InversionConfig {
    pub wave_types: BTreeMap<String, WaveTypeSpec>,
    /// Levenberg-Marquardt-style global damping coefficient.
    #[serde(default)]
    pub damping: f64,
    /// Damping restricted to the hypocentral sub-block. Mutually
    /// exclusive with `damping`.
    #[serde(default)]
    pub hypo_damping: f64,
    #[serde(default)]
    pub zero_trace: bool,
    #[serde(default = "default_true")]
    pub normalize: bool,
    #[serde(default = "default_true")]
    pub weighting: bool,
    /// Requested record duration in seconds.
    pub duration: f64,
    /// Job-scheduler prefix prepended to the solver invocation.
    #[serde(default)]
    pub launch_prefix: Vec<String>,
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Worker-pool width for trace processing; <= 1 runs serially.
    #[serde(default)]
    pub multiprocesses: usize,
    #[serde(default = "default_taper_alpha")]
    pub taper_alpha: f64,
    #[serde(default)]
    pub overwrite: bool,
    /// Per-component misfit weights (R/T/Z).
    #[serde(default = "default_component_weights")]
    pub component_weights: BTreeMap<String, f64>,
}

fn default_true() -> bool {
    true
}

fn default_executable() -> String {
    "./bin/xspecfem3D".to_string()
}

fn default_taper_alpha() -> f64 {
    0.25
}

fn default_component_weights() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("R".to_string(), 1.0),
        ("T".to_string(), 1.0),
        ("Z".to_string(), 1.0),
    ])
}

impl InversionConfig {
    pub fn from_file(path: &std::path::Path) -> CmtResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CmtResult<()> {
        if self.wave_types.is_empty() {
            return Err(CmtError::ConfigError(
                "at least one wave type must be configured".to_string(),
            ));
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(CmtError::ConfigError(
                "duration must be finite and > 0".to_string(),
            ));
        }
        if self.damping < 0.0 || !self.damping.is_finite() {
            return Err(CmtError::ConfigError(
                "damping must be finite and >= 0".to_string(),
            ));
        }
        if self.hypo_damping < 0.0 || !self.hypo_damping.is_finite() {
            return Err(CmtError::ConfigError(
                "hypo_damping must be finite and >= 0".to_string(),
            ));
        }
        if self.damping > 0.0 && self.hypo_damping > 0.0 {
            return Err(CmtError::ConfigError(
                "damping and hypo_damping are mutually exclusive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.taper_alpha) {
            return Err(CmtError::ConfigError(
                "taper_alpha must be in [0, 1]".to_string(),
            ));
        }
        for (name, spec) in &self.wave_types {
            if !spec.weight.is_finite() || spec.weight < 0.0 {
                return Err(CmtError::ConfigError(format!(
                    "wave type {name}: weight must be finite and >= 0"
                )));
            }
            let f = &spec.process.pre_filt;
            if f.windows(2).any(|w| w[0] <= w[1]) {
                return Err(CmtError::ConfigError(format!(
                    "wave type {name}: pre_filt periods must be strictly descending"
                )));
            }
            if spec.process.relative_endtime <= spec.process.relative_starttime {
                return Err(CmtError::ConfigError(format!(
                    "wave type {name}: relative_endtime must exceed relative_starttime"
                )));
            }
        }
        Ok(())
    }

    /// Adapt the wave-type specs to one event and freeze them.
    ///
    /// Body waves are always kept. Surface waves are dropped for very
    /// large events (fundamental modes saturate), mantle waves are only
    /// kept for large or very deep events. Pass bands shift with
    /// magnitude, record lengths are capped at the configured duration,
    /// and the window period bands follow the adapted filter corners.
    /// Remaining wave-type weights are renormalized to sum to one.
    pub fn adapt_for_event(&mut self, magnitude: f64, depth_in_m: f64) -> CmtResult<()> {
        let mut dropped: Vec<String> = Vec::new();
        for (name, spec) in self.wave_types.iter_mut() {
            let keep = match name.as_str() {
                "body" => true,
                "surface" => magnitude < SURFACE_MAX_MAGNITUDE,
                "mantle" => {
                    magnitude >= MANTLE_MIN_MAGNITUDE || depth_in_m >= MANTLE_MIN_DEPTH_M
                }
                _ => true,
            };
            if !keep {
                dropped.push(name.clone());
                continue;
            }
            // Long-period corners stretch with magnitude above Mw 6.5.
            let stretch = 1.0 + 0.1 * (magnitude - 6.5).max(0.0);
            spec.process.pre_filt[0] *= stretch;
            spec.process.pre_filt[1] *= stretch;
            if spec.process.relative_endtime > self.duration {
                spec.process.relative_endtime = self.duration;
            }
            for win in &mut spec.windows {
                win.min_period = spec.process.pre_filt[3];
                win.max_period = spec.process.pre_filt[0];
            }
        }
        for name in &dropped {
            self.wave_types.remove(name);
        }
        if self.wave_types.is_empty() {
            return Err(CmtError::ConfigError(
                "event adaptation removed all wave types".to_string(),
            ));
        }
        let total: f64 = self.wave_types.values().map(|s| s.weight).sum();
        if total <= 0.0 {
            return Err(CmtError::ConfigError(
                "wave-type weights sum to zero after adaptation".to_string(),
            ));
        }
        for spec in self.wave_types.values_mut() {
            spec.weight /= total;
        }
        Ok(())
    }
}

const SURFACE_MAX_MAGNITUDE: f64 = 7.5;
const MANTLE_MIN_MAGNITUDE: f64 = 7.0;
const MANTLE_MIN_DEPTH_M: f64 = 300_000.0;
