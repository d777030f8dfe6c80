//! Per-window waveform measurements.
//!
//! After windowing (and again after the final model), every selected
//! window gets cross-correlation alignment and amplitude measurements
//! recorded to a JSON artifact for quality control.

use cmt_math::signal::{correct_window_index, dlna, dnorm2, power_l1, power_l2, xcorr};
use cmt_types::error::CmtResult;
use cmt_types::stream::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub id: String,
    pub wave_type: String,
    /// Window start and end relative to the first sample, seconds.
    pub start_s: f64,
    pub end_s: f64,
    pub max_cc: f64,
    /// Cross-correlation time shift, seconds (positive: observed late).
    pub time_shift_s: f64,
    pub dlna: f64,
    pub power_l1_db: f64,
    pub power_l2_db: f64,
    /// Windowed half residual energy against the unshifted synthetic.
    pub misfit: f64,
}

/// Measure every window of every trace against its synthetic.
pub fn measure_windows(
    wave_type: &str,
    observed: &Stream,
    synthetic: &Stream,
) -> Vec<MeasurementRecord> {
    let mut records = Vec::new();
    for obs in observed.iter() {
        let Some(syn) = synthetic.select(
            &obs.stats.network,
            &obs.stats.station,
            &obs.stats.component,
        ) else {
            debug!(trace = %obs.stats.id(), "no synthetic to measure against");
            continue;
        };
        let dt = obs.stats.delta;
        let npts = obs.data.len().min(syn.data.len());
        for win in &obs.windows {
            let right = win.right.min(npts);
            if win.left >= right {
                continue;
            }
            let d = &obs.data[win.left..right];
            let s = &syn.data[win.left..right];
            if s.iter().all(|v| *v == 0.0) {
                debug!(trace = %obs.stats.id(), "zero-energy synthetic window");
            }

            let (max_cc, shift) = xcorr(d, s);
            // Amplitude measures on the aligned overlap
            let (adl, al1, al2) =
                match correct_window_index(win.left, right, shift, npts) {
                    Some(((dl, dr), (sl, sr))) => {
                        let da = &obs.data[dl..dr];
                        let sa = &syn.data[sl..sr];
                        (dlna(da, sa), power_l1(da, sa), power_l2(da, sa))
                    }
                    None => (dlna(d, s), power_l1(d, s), power_l2(d, s)),
                };

            records.push(MeasurementRecord {
                id: obs.stats.id(),
                wave_type: wave_type.to_string(),
                start_s: win.left as f64 * dt,
                end_s: right as f64 * dt,
                max_cc,
                time_shift_s: shift as f64 * dt,
                dlna: adl,
                power_l1_db: al1,
                power_l2_db: al2,
                misfit: dnorm2(d, s, dt),
            });
        }
    }
    records
}

/// Measure all wave types and write one JSON artifact.
pub fn write_measurements(
    observed: &BTreeMap<String, Stream>,
    synthetics: &BTreeMap<String, Stream>,
    path: &Path,
) -> CmtResult<Vec<MeasurementRecord>> {
    let mut all = Vec::new();
    for (wtype, obs) in observed {
        if let Some(syn) = synthetics.get(wtype) {
            all.extend(measure_windows(wtype, obs, syn));
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(&all)?)?;
    Ok(all)
}
