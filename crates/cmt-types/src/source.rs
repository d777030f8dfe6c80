// ─────────────────────────────────────────────────────────────────────
// SCPN Seismo Core — CMT Source
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Centroid-moment-tensor point source and its keyed on-disk format.

use crate::error::{CmtError, CmtResult};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

/// One earthquake's source parameters. Immutable snapshot per iteration;
/// the driver perturbs working copies to generate derivative sources.
///
/// Times are seconds relative to a common epoch, depth is meters,
/// tensor elements are dyne-cm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmtSource {
    pub event_name: String,
    pub origin_time: f64,
    pub time_shift: f64,
    pub half_duration: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_in_m: f64,
    pub m_rr: f64,
    pub m_tt: f64,
    pub m_pp: f64,
    pub m_rt: f64,
    pub m_rp: f64,
    pub m_tp: f64,
}

impl CmtSource {
    /// Centroid time = origin time + time shift.
    pub fn cmt_time(&self) -> f64 {
        self.origin_time + self.time_shift
    }

    /// Scalar moment, Frobenius norm of the full tensor over sqrt(2).
    pub fn m0(&self) -> f64 {
        let diag = self.m_rr * self.m_rr + self.m_tt * self.m_tt + self.m_pp * self.m_pp;
        let off = self.m_rt * self.m_rt + self.m_rp * self.m_rp + self.m_tp * self.m_tp;
        ((diag + 2.0 * off) / 2.0).sqrt()
    }

    /// Moment magnitude (Hanks & Kanamori, dyne-cm convention).
    pub fn moment_magnitude(&self) -> f64 {
        2.0 / 3.0 * self.m0().log10() - 10.7
    }

    pub fn tensor(&self) -> [f64; 6] {
        [
            self.m_rr, self.m_tt, self.m_pp, self.m_rt, self.m_rp, self.m_tp,
        ]
    }

    /// Serialize to the solver's keyed plain-text source format.
    pub fn to_keyed_text(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "event name:    {}", self.event_name);
        let _ = writeln!(s, "origin time:   {}", self.origin_time);
        let _ = writeln!(s, "time shift:    {}", self.time_shift);
        let _ = writeln!(s, "half duration: {}", self.half_duration);
        let _ = writeln!(s, "latitude:      {}", self.latitude);
        let _ = writeln!(s, "longitude:     {}", self.longitude);
        let _ = writeln!(s, "depth:         {}", self.depth_in_m);
        let _ = writeln!(s, "Mrr:           {}", self.m_rr);
        let _ = writeln!(s, "Mtt:           {}", self.m_tt);
        let _ = writeln!(s, "Mpp:           {}", self.m_pp);
        let _ = writeln!(s, "Mrt:           {}", self.m_rt);
        let _ = writeln!(s, "Mrp:           {}", self.m_rp);
        let _ = writeln!(s, "Mtp:           {}", self.m_tp);
        s
    }

    pub fn write_file(&self, path: &Path) -> CmtResult<()> {
        std::fs::write(path, self.to_keyed_text())?;
        Ok(())
    }

    pub fn from_file(path: &Path) -> CmtResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_keyed_text(&text).map_err(|message| CmtError::SourceParse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_keyed_text(text: &str) -> Result<Self, String> {
        let mut event_name: Option<String> = None;
        let mut fields = std::collections::HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| format!("missing ':' in line {line:?}"))?;
            let key = key.trim();
            let value = value.trim();
            if key == "event name" {
                event_name = Some(value.to_string());
            } else {
                let v: f64 = value
                    .parse()
                    .map_err(|_| format!("bad float {value:?} for key {key:?}"))?;
                fields.insert(key.to_string(), v);
            }
        }
        let get = |k: &str| -> Result<f64, String> {
            fields.get(k).copied().ok_or_else(|| format!("missing key {k:?}"))
        };
        Ok(CmtSource {
            event_name: event_name.ok_or("missing key \"event name\"")?,
            origin_time: get("origin time")?,
            time_shift: get("time shift")?,
            half_duration: get("half duration")?,
            latitude: get("latitude")?,
            longitude: get("longitude")?,
            depth_in_m: get("depth")?,
            m_rr: get("Mrr")?,
            m_tt: get("Mtt")?,
            m_pp: get("Mpp")?,
            m_rt: get("Mrt")?,
            m_rp: get("Mrp")?,
            m_tp: get("Mtp")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CmtSource {
        CmtSource {
            event_name: "C202106010000A".to_string(),
            origin_time: 0.0,
            time_shift: 12.5,
            half_duration: 5.0,
            latitude: -5.32,
            longitude: 130.1,
            depth_in_m: 35000.0,
            m_rr: 1.0e24,
            m_tt: -0.5e24,
            m_pp: -0.5e24,
            m_rt: 0.2e24,
            m_rp: -0.1e24,
            m_tp: 0.3e24,
        }
    }

    #[test]
    fn test_keyed_text_round_trip() {
        let src = sample();
        let parsed = CmtSource::from_keyed_text(&src.to_keyed_text()).unwrap();
        assert_eq!(parsed, src);
    }

    #[test]
    fn test_scalar_moment_isotropic() {
        // Pure isotropic tensor: M0 = sqrt(3 m^2 / 2)
        let mut src = sample();
        src.m_rr = 2.0;
        src.m_tt = 2.0;
        src.m_pp = 2.0;
        src.m_rt = 0.0;
        src.m_rp = 0.0;
        src.m_tp = 0.0;
        assert!((src.m0() - (6.0f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_cmt_time_offset() {
        let src = sample();
        assert!((src.cmt_time() - 12.5).abs() < 1e-12);
    }

    #[test]
    fn test_from_keyed_text_rejects_missing_field() {
        let text = "event name: X\norigin time: 0.0\n";
        assert!(CmtSource::from_keyed_text(text).is_err());
    }
}
