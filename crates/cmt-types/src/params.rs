// ─────────────────────────────────────────────────────────────────────
// SCPN Seismo Core — Inversion Parameters
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! The ordered parameter dictionary defining the inversion's unknown vector.

use crate::error::{CmtError, CmtResult};
use crate::source::CmtSource;
use serde::{Deserialize, Serialize};

/// Invertible source parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Param {
    Depth,
    TimeShift,
    Latitude,
    Longitude,
    HalfDuration,
    Mrr,
    Mtt,
    Mpp,
    Mrt,
    Mrp,
    Mtp,
}

pub const TENSOR_PARAMS: [Param; 6] = [
    Param::Mrr,
    Param::Mtt,
    Param::Mpp,
    Param::Mrt,
    Param::Mrp,
    Param::Mtp,
];

pub const HYPO_PARAMS: [Param; 4] = [
    Param::Depth,
    Param::TimeShift,
    Param::Latitude,
    Param::Longitude,
];

impl Param {
    pub fn name(&self) -> &'static str {
        match self {
            Param::Depth => "depth",
            Param::TimeShift => "time_shift",
            Param::Latitude => "latitude",
            Param::Longitude => "longitude",
            Param::HalfDuration => "half_duration",
            Param::Mrr => "m_rr",
            Param::Mtt => "m_tt",
            Param::Mpp => "m_pp",
            Param::Mrt => "m_rt",
            Param::Mrp => "m_rp",
            Param::Mtp => "m_tp",
        }
    }

    pub fn is_tensor(&self) -> bool {
        TENSOR_PARAMS.contains(self)
    }

    /// Diagonal tensor elements entering the zero-trace constraint.
    pub fn is_tensor_diagonal(&self) -> bool {
        matches!(self, Param::Mrr | Param::Mtt | Param::Mpp)
    }

    pub fn is_hypocentral(&self) -> bool {
        HYPO_PARAMS.contains(self)
    }

    /// Time shift and half duration are derivable from the baseline
    /// synthetics and need no forward simulation of their own.
    pub fn needs_simulation(&self) -> bool {
        !matches!(self, Param::TimeShift | Param::HalfDuration)
    }

    /// Source-derivative direction selector understood by the solver
    /// (1 = depth, 2 = latitude, 3 = longitude).
    pub fn derivative_direction(&self) -> Option<u8> {
        match self {
            Param::Depth => Some(1),
            Param::Latitude => Some(2),
            Param::Longitude => Some(3),
            _ => None,
        }
    }
}

impl std::fmt::Display for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-parameter inversion record: non-dimensionalization scale and an
/// optional finite-difference perturbation size (None selects the solver's
/// analytic derivative mode where supported).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub scale: f64,
    #[serde(default)]
    pub pert: Option<f64>,
}

/// Ordered parameter dictionary. Order defines the model vector layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDict {
    entries: Vec<(Param, ParamSpec)>,
}

impl ParamDict {
    pub fn new(entries: Vec<(Param, ParamSpec)>) -> CmtResult<Self> {
        let dict = ParamDict { entries };
        dict.validate()?;
        Ok(dict)
    }

    fn validate(&self) -> CmtResult<()> {
        if self.entries.is_empty() {
            return Err(CmtError::ConfigError(
                "parameter dictionary must not be empty".to_string(),
            ));
        }
        for (i, (par, _)) in self.entries.iter().enumerate() {
            if self.entries[..i].iter().any(|(p, _)| p == par) {
                return Err(CmtError::ConfigError(format!(
                    "duplicate parameter {par} in dictionary"
                )));
            }
        }
        // If any moment-tensor element is inverted, all six must be.
        let n_tensor = self.entries.iter().filter(|(p, _)| p.is_tensor()).count();
        if n_tensor > 0 && n_tensor != TENSOR_PARAMS.len() {
            return Err(CmtError::ConfigError(
                "if one moment-tensor element is inverted, all six must be".to_string(),
            ));
        }
        for (par, spec) in &self.entries {
            if let Some(pert) = spec.pert {
                if !pert.is_finite() || pert == 0.0 {
                    return Err(CmtError::ConfigError(format!(
                        "perturbation for {par} must be finite and nonzero"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn params(&self) -> impl Iterator<Item = Param> + '_ {
        self.entries.iter().map(|(p, _)| *p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Param, ParamSpec)> + '_ {
        self.entries.iter().copied()
    }

    pub fn get(&self, par: Param) -> Option<ParamSpec> {
        self.entries.iter().find(|(p, _)| *p == par).map(|(_, s)| *s)
    }

    pub fn index_of(&self, par: Param) -> Option<usize> {
        self.entries.iter().position(|(p, _)| *p == par)
    }

    pub fn inverts_tensor(&self) -> bool {
        self.entries.iter().any(|(p, _)| p.is_tensor())
    }

    /// Number of forward simulations one objective evaluation needs:
    /// the baseline plus one per simulated parameter.
    pub fn n_simulations(&self) -> usize {
        1 + self
            .entries
            .iter()
            .filter(|(p, _)| p.needs_simulation())
            .count()
    }

    /// Scale vector in dictionary order. Tensor elements scale with the
    /// source's scalar moment, other parameters with the magnitude of
    /// their configured scale (which must be strictly positive).
    pub fn scale_vector(&self, source: &CmtSource) -> CmtResult<Vec<f64>> {
        let m0 = source.m0();
        let mut out = Vec::with_capacity(self.entries.len());
        for (par, spec) in &self.entries {
            let s = if par.is_tensor() { m0 } else { spec.scale };
            if !s.is_finite() || s <= 0.0 {
                return Err(CmtError::ConfigError(format!(
                    "scale for {par} must be finite and > 0, got {s}"
                )));
            }
            out.push(s);
        }
        Ok(out)
    }

    /// Model vector in dictionary order, read from the source.
    pub fn model_vector(&self, source: &CmtSource) -> Vec<f64> {
        self.entries
            .iter()
            .map(|(p, _)| source.param_value(*p))
            .collect()
    }
}

impl CmtSource {
    pub fn param_value(&self, par: Param) -> f64 {
        match par {
            Param::Depth => self.depth_in_m,
            Param::TimeShift => self.time_shift,
            Param::Latitude => self.latitude,
            Param::Longitude => self.longitude,
            Param::HalfDuration => self.half_duration,
            Param::Mrr => self.m_rr,
            Param::Mtt => self.m_tt,
            Param::Mpp => self.m_pp,
            Param::Mrt => self.m_rt,
            Param::Mrp => self.m_rp,
            Param::Mtp => self.m_tp,
        }
    }

    pub fn set_param(&mut self, par: Param, value: f64) {
        match par {
            Param::Depth => self.depth_in_m = value,
            Param::TimeShift => self.time_shift = value,
            Param::Latitude => self.latitude = value,
            Param::Longitude => self.longitude = value,
            Param::HalfDuration => self.half_duration = value,
            Param::Mrr => self.m_rr = value,
            Param::Mtt => self.m_tt = value,
            Param::Mpp => self.m_pp = value,
            Param::Mrt => self.m_rt = value,
            Param::Mrp => self.m_rp = value,
            Param::Mtp => self.m_tp = value,
        }
    }

    /// Finite-difference source for one parameter. Tensor perturbations
    /// isolate the element (the other five are zeroed) so the perturbed
    /// run yields that element's sensitivity directly; scalar parameters
    /// are shifted in place.
    pub fn perturbed(&self, par: Param, pert: f64) -> CmtSource {
        let mut out = self.clone();
        if par.is_tensor() {
            for el in TENSOR_PARAMS {
                out.set_param(el, 0.0);
            }
            out.set_param(par, pert);
        } else {
            out.set_param(par, self.param_value(par) + pert);
        }
        out
    }
}
