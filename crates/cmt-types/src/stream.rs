// ─────────────────────────────────────────────────────────────────────
// SCPN Seismo Core — Waveform Streams
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Trace, stream and window value types.
//!
//! Windows, tapers and weights are explicit structured fields on the trace
//! rather than ad hoc attributes, and lookups return `Option` so a missing
//! station is a logged skip at the call site, never an exception path.

use serde::{Deserialize, Serialize};

/// Station inventory entry, written to the solver's station list file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub network: String,
    pub station: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub elevation: f64,
    #[serde(default)]
    pub burial: f64,
}

/// Half-open sample-index interval [left, right) on a trace, annotated
/// with the cross-correlation alignment found during window selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub left: usize,
    pub right: usize,
    /// Time of the trace's first sample (epoch seconds).
    pub time_of_first_sample: f64,
    pub max_cc: f64,
    /// Integer-sample shift of the cross-correlation maximum.
    pub cc_shift: i64,
}

impl Window {
    pub fn new(left: usize, right: usize, time_of_first_sample: f64) -> Option<Self> {
        if left >= right {
            return None;
        }
        Some(Window {
            left,
            right,
            time_of_first_sample,
            max_cc: 0.0,
            cc_shift: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.right - self.left
    }

    pub fn is_empty(&self) -> bool {
        self.left >= self.right
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.left < other.right && other.left < self.right
    }
}

/// Merge overlapping or touching windows on one trace into their union.
/// Alignment annotations of merged windows are reset; the measurement
/// pass recomputes them on the merged interval.
pub fn merge_windows(mut windows: Vec<Window>) -> Vec<Window> {
    if windows.len() < 2 {
        return windows;
    }
    windows.sort_by_key(|w| w.left);
    let mut merged: Vec<Window> = Vec::with_capacity(windows.len());
    for win in windows {
        match merged.last_mut() {
            Some(last) if win.left <= last.right => {
                last.right = last.right.max(win.right);
                last.max_cc = 0.0;
                last.cc_shift = 0;
            }
            _ => merged.push(win),
        }
    }
    merged
}

/// Per-trace identity and geometry metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStats {
    pub network: String,
    pub station: String,
    pub component: String,
    /// Sampling interval in seconds.
    pub delta: f64,
    /// Epoch time of the first sample.
    pub starttime: f64,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    /// Great-circle distance to the event, degrees.
    #[serde(default)]
    pub distance: f64,
    /// Event-to-station azimuth, degrees.
    #[serde(default)]
    pub azimuth: f64,
}

impl TraceStats {
    pub fn id(&self) -> String {
        format!("{}.{}.{}", self.network, self.station, self.component)
    }
}

/// One seismogram plus the inversion's per-trace annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub stats: TraceStats,
    pub data: Vec<f64>,
    #[serde(default)]
    pub windows: Vec<Window>,
    /// One taper per window, same length as the window.
    #[serde(default)]
    pub tapers: Vec<Vec<f64>>,
    /// Normalized misfit weight; None until the weighting pass runs.
    #[serde(default)]
    pub weight: Option<f64>,
}

impl Trace {
    pub fn new(stats: TraceStats, data: Vec<f64>) -> Self {
        Trace {
            stats,
            data,
            windows: Vec::new(),
            tapers: Vec::new(),
            weight: None,
        }
    }

    /// Total windowed energy Σ d² dt over all windows, used by the
    /// misfit engine's normalization.
    pub fn windowed_energy(&self) -> f64 {
        let dt = self.stats.delta;
        self.windows
            .iter()
            .map(|w| {
                self.data[w.left..w.right.min(self.data.len())]
                    .iter()
                    .map(|v| v * v)
                    .sum::<f64>()
                    * dt
            })
            .sum()
    }
}

/// An ordered collection of traces for one wave type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub traces: Vec<Trace>,
}

impl Stream {
    pub fn new(traces: Vec<Trace>) -> Self {
        Stream { traces }
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trace> {
        self.traces.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Trace> {
        self.traces.iter_mut()
    }

    /// Lookup by network + station + component.
    pub fn select(&self, network: &str, station: &str, component: &str) -> Option<&Trace> {
        self.traces.iter().find(|tr| {
            tr.stats.network == network
                && tr.stats.station == station
                && tr.stats.component == component
        })
    }

    pub fn select_mut(
        &mut self,
        network: &str,
        station: &str,
        component: &str,
    ) -> Option<&mut Trace> {
        self.traces.iter_mut().find(|tr| {
            tr.stats.network == network
                && tr.stats.station == station
                && tr.stats.component == component
        })
    }

    /// Multiply every sample of every trace in place.
    pub fn scale(&mut self, factor: f64) {
        for tr in &mut self.traces {
            for v in &mut tr.data {
                *v *= factor;
            }
        }
    }
}
