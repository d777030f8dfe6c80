// ─────────────────────────────────────────────────────────────────────
// SCPN Seismo Core — Station Weighting
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Azimuthal and geographical station weighting.
//!
//! Dense regional networks would otherwise dominate the misfit; both
//! schemes down-weight clustered stations and the combined weight is
//! renormalized per wave type so wave-type balance stays under the
//! configured wave-type weights alone.

use cmt_math::geo::gc_distance_deg;
use cmt_types::config::InversionConfig;
use cmt_types::error::{CmtError, CmtResult};
use cmt_types::stream::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

pub const AZI_NBINS: usize = 12;
pub const AZI_EXPONENT: f64 = 0.5;

/// Azimuthal bin weights: each trace is weighted by the inverse bin
/// occupancy to the given exponent, normalized to unit mean.
pub fn azimuthal_weights(azimuths: &[f64], nbins: usize, exponent: f64) -> Vec<f64> {
    if azimuths.is_empty() {
        return Vec::new();
    }
    let binwidth = 360.0 / nbins as f64;
    let bin_of = |az: f64| -> usize {
        let az = az.rem_euclid(360.0);
        ((az / binwidth) as usize).min(nbins - 1)
    };
    let mut counts = vec![0usize; nbins];
    for &az in azimuths {
        counts[bin_of(az)] += 1;
    }
    let mut w: Vec<f64> = azimuths
        .iter()
        .map(|&az| (1.0 / counts[bin_of(az)] as f64).powf(exponent))
        .collect();
    let mean = w.iter().sum::<f64>() / w.len() as f64;
    for v in &mut w {
        *v /= mean;
    }
    w
}

/// Gaussian declustering weights over station locations.
///
/// The reference distance is the median nearest-neighbor great-circle
/// distance, so the kernel width adapts to the network's density.
pub struct GeoWeights {
    points: Vec<(f64, f64)>,
}

impl GeoWeights {
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        GeoWeights { points }
    }

    /// Median nearest-neighbor distance in degrees. Zero for fewer
    /// than two points.
    pub fn reference_distance(&self) -> f64 {
        let n = self.points.len();
        if n < 2 {
            return 0.0;
        }
        let mut nearest: Vec<f64> = Vec::with_capacity(n);
        for i in 0..n {
            let mut min = f64::INFINITY;
            for j in 0..n {
                if i == j {
                    continue;
                }
                let d = gc_distance_deg(
                    self.points[i].0,
                    self.points[i].1,
                    self.points[j].0,
                    self.points[j].1,
                );
                min = min.min(d);
            }
            nearest.push(min);
        }
        nearest.sort_by(|a, b| a.total_cmp(b));
        if n % 2 == 1 {
            nearest[n / 2]
        } else {
            0.5 * (nearest[n / 2 - 1] + nearest[n / 2])
        }
    }

    /// Weights with unit mean. A single station gets weight one, a
    /// pair splits evenly.
    pub fn weights(&self) -> Vec<f64> {
        let n = self.points.len();
        match n {
            0 => return Vec::new(),
            1 => return vec![1.0],
            2 => return vec![0.5, 0.5],
            _ => {}
        }
        let delta0 = self.reference_distance();
        if delta0 <= 0.0 {
            // Fully co-located network, no information to decluster on
            return vec![1.0; n];
        }
        let mut w: Vec<f64> = Vec::with_capacity(n);
        for i in 0..n {
            let mut density = 0.0;
            for j in 0..n {
                let d = gc_distance_deg(
                    self.points[i].0,
                    self.points[i].1,
                    self.points[j].0,
                    self.points[j].1,
                );
                density += (-(d / delta0).powi(2)).exp();
            }
            w.push(1.0 / density);
        }
        let mean = w.iter().sum::<f64>() / n as f64;
        for v in &mut w {
            *v /= mean;
        }
        w
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceWeightEntry {
    pub id: String,
    pub component: String,
    pub azimuthal: f64,
    pub geographical: f64,
    /// Normalized per-trace weight (sums to one within the wave type).
    pub combined: f64,
    /// combined × wave-type weight; the number the misfit actually sees.
    pub final_weight: f64,
}

/// Per-wave-type weight breakdown, written next to the iteration
/// artifacts for later inspection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeightReport {
    pub wave_types: BTreeMap<String, Vec<TraceWeightEntry>>,
}

impl WeightReport {
    pub fn write_file(&self, path: &Path) -> CmtResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Compute and attach per-trace weights for every wave type.
///
/// combined_i = component_weight(comp_i) × azimuthal_i × geographical_i,
/// then normalized so Σ combined = 1 within each wave type. The
/// azimuthal and geographical weights are computed within each
/// component's station group: pooling components would hand the
/// declustering kernel every station location once per component, and
/// co-located duplicates drive the nearest-neighbor reference distance
/// to zero.
pub fn compute_weights(
    streams: &mut BTreeMap<String, Stream>,
    config: &InversionConfig,
) -> CmtResult<WeightReport> {
    let mut report = WeightReport::default();

    for (wtype, stream) in streams.iter_mut() {
        if stream.is_empty() {
            continue;
        }
        let wtype_weight = config
            .wave_types
            .get(wtype)
            .map(|s| s.weight)
            .ok_or_else(|| {
                CmtError::ConfigError(format!("no wave-type spec for stream {wtype}"))
            })?;

        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, tr) in stream.iter().enumerate() {
            groups
                .entry(tr.stats.component.clone())
                .or_default()
                .push(i);
        }

        let mut azi = vec![0.0; stream.len()];
        let mut geo = vec![0.0; stream.len()];
        for indices in groups.values() {
            let azimuths: Vec<f64> = indices
                .iter()
                .map(|&i| stream.traces[i].stats.azimuth)
                .collect();
            let group_azi = azimuthal_weights(&azimuths, AZI_NBINS, AZI_EXPONENT);

            let points: Vec<(f64, f64)> = indices
                .iter()
                .map(|&i| {
                    let stats = &stream.traces[i].stats;
                    (stats.latitude, stats.longitude)
                })
                .collect();
            let group_geo = GeoWeights::new(points).weights();

            for (k, &i) in indices.iter().enumerate() {
                azi[i] = group_azi[k];
                geo[i] = group_geo[k];
            }
        }

        let mut combined: Vec<f64> = Vec::with_capacity(stream.len());
        for (i, tr) in stream.iter().enumerate() {
            let comp_weight = config
                .component_weights
                .get(&tr.stats.component)
                .copied()
                .unwrap_or(1.0);
            combined.push(comp_weight * azi[i] * geo[i]);
        }
        let total: f64 = combined.iter().sum();
        if total <= 0.0 {
            return Err(CmtError::ConfigError(format!(
                "combined weights for wave type {wtype} sum to zero"
            )));
        }
        for v in &mut combined {
            *v /= total;
        }

        let mut entries = Vec::with_capacity(stream.len());
        for (i, tr) in stream.iter_mut().enumerate() {
            tr.weight = Some(combined[i]);
            entries.push(TraceWeightEntry {
                id: tr.stats.id(),
                component: tr.stats.component.clone(),
                azimuthal: azi[i],
                geographical: geo[i],
                combined: combined[i],
                final_weight: wtype_weight * combined[i],
            });
        }
        info!(wave_type = %wtype, traces = entries.len(), "station weights computed");
        report.wave_types.insert(wtype.clone(), entries);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmt_types::stream::{Trace, TraceStats};

    fn trace(sta: &str, comp: &str, az: f64, lat: f64, lon: f64) -> Trace {
        Trace::new(
            TraceStats {
                network: "II".to_string(),
                station: sta.to_string(),
                component: comp.to_string(),
                delta: 1.0,
                starttime: 0.0,
                latitude: lat,
                longitude: lon,
                distance: 30.0,
                azimuth: az,
            },
            vec![0.0; 10],
        )
    }

    #[test]
    fn test_azimuthal_uniform_network_is_flat() {
        let az: Vec<f64> = (0..12).map(|i| i as f64 * 30.0 + 5.0).collect();
        let w = azimuthal_weights(&az, AZI_NBINS, AZI_EXPONENT);
        for v in w {
            assert!((v - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_azimuthal_cluster_downweighted() {
        // Nine stations in one bin, one alone
        let mut az = vec![10.0; 9];
        az.push(200.0);
        let w = azimuthal_weights(&az, AZI_NBINS, AZI_EXPONENT);
        assert!(w[9] > w[0]);
        let mean = w.iter().sum::<f64>() / w.len() as f64;
        assert!((mean - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_geo_weights_degenerate_sizes() {
        assert_eq!(GeoWeights::new(vec![(0.0, 0.0)]).weights(), vec![1.0]);
        assert_eq!(
            GeoWeights::new(vec![(0.0, 0.0), (10.0, 10.0)]).weights(),
            vec![0.5, 0.5]
        );
    }

    #[test]
    fn test_geo_weights_cluster_downweighted() {
        // Tight pair near the equator plus two isolated stations
        let pts = vec![(0.0, 0.0), (0.1, 0.1), (40.0, 80.0), (-40.0, -120.0)];
        let w = GeoWeights::new(pts).weights();
        assert!(w[2] > w[0]);
        assert!(w[3] > w[1]);
        let mean = w.iter().sum::<f64>() / 4.0;
        assert!((mean - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_geo_weights_grouped_by_component() {
        // Two clustered stations and one isolated, recorded on all
        // three components. Pooling the nine traces would feed the
        // kernel each location three times, collapse the reference
        // distance to zero and flatten the weights.
        let mut traces = Vec::new();
        for comp in ["R", "T", "Z"] {
            traces.push(trace("AAA", comp, 10.0, 0.0, 0.0));
            traces.push(trace("AAB", comp, 12.0, 0.5, 0.5));
            traces.push(trace("CCC", comp, 200.0, 40.0, 80.0));
        }
        let mut streams = BTreeMap::new();
        streams.insert("body".to_string(), Stream::new(traces));
        let config_json = serde_json::json!({
            "wave_types": {
                "body": {
                    "weight": 1.0,
                    "process": {
                        "pre_filt": [150.0, 100.0, 50.0, 40.0],
                        "relative_starttime": 0.0,
                        "relative_endtime": 3600.0
                    },
                    "windows": []
                }
            },
            "duration": 7200.0
        });
        let config: InversionConfig = serde_json::from_value(config_json).unwrap();
        let report = compute_weights(&mut streams, &config).unwrap();

        let entries = &report.wave_types["body"];
        assert_eq!(entries.len(), 9);
        for group in entries.chunks(3) {
            // Isolated station up-weighted against the clustered pair
            assert!(group[2].geographical > group[0].geographical);
            assert!(group[2].geographical > 1.0);
            assert!(group[0].geographical < 1.0);
        }
        // Identical geometry per component gives identical group weights
        assert!((entries[0].geographical - entries[3].geographical).abs() < 1e-12);
        assert!((entries[2].azimuthal - entries[5].azimuthal).abs() < 1e-12);
    }

    #[test]
    fn test_compute_weights_sum_to_one_per_wave_type() {
        let mut streams = BTreeMap::new();
        streams.insert(
            "body".to_string(),
            Stream::new(vec![
                trace("AAK", "Z", 10.0, 42.6, 74.5),
                trace("ANMO", "Z", 250.0, 34.9, -106.4),
                trace("BFO", "R", 320.0, 48.3, 8.3),
            ]),
        );
        let config_json = serde_json::json!({
            "wave_types": {
                "body": {
                    "weight": 0.4,
                    "process": {
                        "pre_filt": [150.0, 100.0, 50.0, 40.0],
                        "relative_starttime": 0.0,
                        "relative_endtime": 3600.0
                    },
                    "windows": []
                }
            },
            "duration": 7200.0
        });
        let config: InversionConfig = serde_json::from_value(config_json).unwrap();
        let report = compute_weights(&mut streams, &config).unwrap();

        let entries = &report.wave_types["body"];
        let combined: f64 = entries.iter().map(|e| e.combined).sum();
        let final_sum: f64 = entries.iter().map(|e| e.final_weight).sum();
        assert!((combined - 1.0).abs() < 1e-12);
        assert!((final_sum - 0.4).abs() < 1e-12);
        for tr in streams["body"].iter() {
            assert!(tr.weight.is_some());
        }
    }
}
