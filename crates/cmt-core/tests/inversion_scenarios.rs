// ─────────────────────────────────────────────────────────────────────
// SCPN Seismo Core — Inversion Scenario Tests
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! End-to-end inversion scenarios against a closed-form mock solver.
//!
//! The mock reads whatever source file the driver staged in each
//! simulation directory and writes Gaussian-pulse seismograms whose
//! arrival time shifts with depth and time shift and whose amplitude
//! decays with depth and projects the moment tensor per station. Every
//! path the real solver exercises (source staging, output loading,
//! finite differences) runs for real.

use cmt_core::driver::{CmtInversion, Hooks, InversionSetup, Stage};
use cmt_core::optimizer::{OptOptions, StopReason};
use cmt_core::sim::{NpyTraceLoader, ParFile, SimRunner, DATA_DIR, OUTPUT_DIR, SOURCE_FILE};
use cmt_types::config::InversionConfig;
use cmt_types::error::CmtResult;
use cmt_types::params::{Param, ParamDict, ParamSpec, TENSOR_PARAMS};
use cmt_types::source::CmtSource;
use cmt_types::stream::{Station, Stream, Trace, TraceStats, Window};
use ndarray::Array1;
use std::path::{Path, PathBuf};

const NPTS: usize = 240;
const DT: f64 = 1.0;
const V_M_PER_S: f64 = 8000.0;
const DECAY_M: f64 = 50_000.0;
const BASE_ARRIVAL_S: f64 = 40.0;
const SIGMA_S: f64 = 6.0;
const M_REF: f64 = 1.0e24;

fn station_stats(idx: usize) -> TraceStats {
    TraceStats {
        network: "II".to_string(),
        station: format!("S{idx:02}"),
        component: "Z".to_string(),
        delta: DT,
        starttime: 0.0,
        latitude: -60.0 + 15.0 * idx as f64,
        longitude: -150.0 + 40.0 * idx as f64,
        distance: 0.0,
        azimuth: 0.0,
    }
}

/// Deterministic per-station projection of the moment tensor.
fn tensor_coeff(idx: usize, el: usize) -> f64 {
    ((idx * 7 + el * 13 + 3) as f64).sin() + 1.5
}

/// Closed-form seismogram for one station and source.
fn synthesize(src: &CmtSource, idx: usize) -> Vec<f64> {
    let mut amp = 0.0;
    for (el, m) in src.tensor().iter().enumerate() {
        amp += tensor_coeff(idx, el) * m / M_REF;
    }
    amp *= (-src.depth_in_m / DECAY_M).exp();
    let center = BASE_ARRIVAL_S + src.time_shift + src.depth_in_m / V_M_PER_S;
    (0..NPTS)
        .map(|i| {
            let t = i as f64 * DT;
            amp * (-((t - center) / SIGMA_S).powi(2) / 2.0).exp()
        })
        .collect()
}

/// Stands in for the forward solver: simulates the staged source file
/// of every directory it is handed.
struct MockSolver {
    stations: Vec<usize>,
}

impl SimRunner for MockSolver {
    fn run(&self, dirs: &[PathBuf]) -> CmtResult<()> {
        for dir in dirs {
            let src = CmtSource::from_file(&dir.join(DATA_DIR).join(SOURCE_FILE))?;
            let out = dir.join(OUTPUT_DIR);
            std::fs::create_dir_all(&out)?;
            for &idx in &self.stations {
                let stats = station_stats(idx);
                let data = Array1::from_vec(synthesize(&src, idx));
                let stem = stats.id();
                ndarray_npy::write_npy(out.join(format!("{stem}.npy")), &data)
                    .map_err(|e| std::io::Error::other(e.to_string()))?;
                std::fs::write(
                    out.join(format!("{stem}.json")),
                    serde_json::to_string(&stats)?,
                )?;
            }
        }
        Ok(())
    }
}

fn hooks(stations: Vec<usize>) -> Hooks {
    Hooks {
        process: Box::new(|tr, _event, _spec| Ok(tr.clone())),
        window: Box::new(|tr, _syn, _specs| {
            vec![Window::new(0, tr.data.len(), tr.stats.starttime).unwrap()]
        }),
        runner: Box::new(MockSolver { stations }),
        loader: Box::new(NpyTraceLoader),
    }
}

fn config(weighting: bool, zero_trace: bool) -> InversionConfig {
    serde_json::from_value(serde_json::json!({
        "wave_types": {
            "body": {
                "weight": 1.0,
                "process": {
                    "pre_filt": [150.0, 100.0, 50.0, 40.0],
                    "relative_starttime": 0.0,
                    "relative_endtime": 240.0
                },
                "windows": [
                    {"min_period": 40.0, "max_period": 150.0}
                ]
            }
        },
        "duration": 240.0,
        "normalize": true,
        "weighting": weighting,
        "zero_trace": zero_trace,
        "overwrite": true
    }))
    .unwrap()
}

fn source(depth_in_m: f64, time_shift: f64, tensor: [f64; 6]) -> CmtSource {
    CmtSource {
        event_name: "C202001010000A".to_string(),
        origin_time: 0.0,
        time_shift,
        half_duration: 2.0,
        latitude: 10.0,
        longitude: 20.0,
        depth_in_m,
        m_rr: tensor[0],
        m_tt: tensor[1],
        m_pp: tensor[2],
        m_rt: tensor[3],
        m_rp: tensor[4],
        m_tp: tensor[5],
    }
}

fn observed_for(truth: &CmtSource, stations: &[usize]) -> Stream {
    Stream::new(
        stations
            .iter()
            .map(|&idx| Trace::new(station_stats(idx), synthesize(truth, idx)))
            .collect(),
    )
}

fn station_list(stations: &[usize]) -> Vec<Station> {
    stations
        .iter()
        .map(|&idx| {
            let stats = station_stats(idx);
            Station {
                network: stats.network,
                station: stats.station,
                latitude: stats.latitude,
                longitude: stats.longitude,
                elevation: 0.0,
                burial: 0.0,
            }
        })
        .collect()
}

fn setup(
    config: InversionConfig,
    params: ParamDict,
    start: CmtSource,
    truth: &CmtSource,
    stations: &[usize],
    root: &Path,
) -> InversionSetup {
    InversionSetup {
        config,
        params,
        source: start,
        stations: station_list(stations),
        raw: observed_for(truth, stations),
        sim_root: root.join("sims"),
        out_dir: root.join("out"),
        par_template: ParFile::from_text("SIMULATION_TYPE = 1\n"),
    }
}

const TENSOR: [f64; 6] = [1.0e24, -0.4e24, -0.6e24, 0.3e24, -0.2e24, 0.5e24];

#[test]
fn depth_and_time_shift_recovered() {
    let tmp = tempfile::tempdir().unwrap();
    let stations: Vec<usize> = (0..6).collect();
    let truth = source(30_000.0, 15.0, TENSOR);
    let start = source(27_000.0, 13.5, TENSOR);

    let params = ParamDict::new(vec![
        (Param::Depth, ParamSpec { scale: 1000.0, pert: Some(-500.0) }),
        (Param::TimeShift, ParamSpec { scale: 10.0, pert: None }),
    ])
    .unwrap();

    let mut inv = CmtInversion::new(
        setup(config(false, false), params, start, &truth, &stations, tmp.path()),
        hooks(stations.clone()),
    )
    .unwrap();

    let opts = OptOptions {
        niter_max: 30,
        ..OptOptions::default()
    };
    let (best, result) = inv.solve(opts).unwrap();

    assert!(
        (best.depth_in_m - 30_000.0).abs() < 300.0,
        "depth {} not recovered",
        best.depth_in_m
    );
    assert!(
        (best.time_shift - 15.0).abs() < 0.3,
        "time shift {} not recovered",
        best.time_shift
    );
    // Misfit must have collapsed relative to the normalized start of 1
    assert!(result.cost < 1e-2, "final cost {}", result.cost);
    assert!(tmp.path().join("out/optimization.json").exists());
    assert!(tmp.path().join("out/measurements_final.json").exists());
}

#[test]
fn linear_tensor_inversion_converges_fast() {
    let tmp = tempfile::tempdir().unwrap();
    let stations: Vec<usize> = (0..8).collect();
    let truth = source(20_000.0, 10.0, TENSOR);
    let start = source(
        20_000.0,
        10.0,
        [0.8e24, -0.2e24, -0.8e24, 0.1e24, 0.1e24, 0.2e24],
    );

    let entries: Vec<_> = TENSOR_PARAMS
        .iter()
        .map(|p| (*p, ParamSpec { scale: 1.0, pert: Some(1.0e23) }))
        .collect();
    let params = ParamDict::new(entries).unwrap();

    let mut inv = CmtInversion::new(
        setup(config(true, false), params, start, &truth, &stations, tmp.path()),
        hooks(stations.clone()),
    )
    .unwrap();

    let (best, result) = inv.solve(OptOptions::default()).unwrap();

    // The forward model is linear in the tensor, so Gauss-Newton nails
    // it in very few iterations.
    for (got, want) in best.tensor().iter().zip(TENSOR) {
        assert!(
            (got - want).abs() < 1e-3 * M_REF,
            "tensor element {got} vs {want}"
        );
    }
    assert!(result.history.len() <= 4, "took {} iterates", result.history.len());
    assert!(tmp.path().join("out/weights.json").exists());
}

#[test]
fn depth_walk_has_single_minimum_at_truth() {
    let tmp = tempfile::tempdir().unwrap();
    let stations: Vec<usize> = (0..4).collect();
    let truth = source(30_000.0, 15.0, TENSOR);
    // Same time shift, only depth wrong
    let start = source(25_000.0, 15.0, TENSOR);

    let params = ParamDict::new(vec![(
        Param::Depth,
        ParamSpec { scale: 1000.0, pert: Some(-500.0) },
    )])
    .unwrap();

    let mut inv = CmtInversion::new(
        setup(config(false, false), params, start, &truth, &stations, tmp.path()),
        hooks(stations.clone()),
    )
    .unwrap();
    inv.process_data().unwrap();
    inv.window_data().unwrap();

    let depths: Vec<f64> = (20..=40).map(|k| k as f64 * 1000.0).collect();
    let profile = inv.misfit_walk_depth(&depths).unwrap();

    let min_point = profile
        .iter()
        .min_by(|a, b| a.cost.total_cmp(&b.cost))
        .unwrap();
    assert_eq!(min_point.depth_in_m, 30_000.0);

    // Strictly decreasing into the minimum, increasing out of it, with
    // the sensitivity changing sign across it
    let min_idx = profile
        .iter()
        .position(|p| p.depth_in_m == 30_000.0)
        .unwrap();
    for pair in profile[..=min_idx].windows(2) {
        assert!(pair[1].cost < pair[0].cost);
    }
    for pair in profile[min_idx..].windows(2) {
        assert!(pair[1].cost > pair[0].cost);
    }
    assert!(profile[min_idx - 1].gradient < 0.0);
    assert!(profile[min_idx + 1].gradient > 0.0);
    assert!(profile[min_idx].curvature > 0.0);
}

#[test]
fn station_without_synthetic_is_dropped_not_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    // The solver only produces stations 0..4; station 9 exists in the
    // observed data but never in the synthetics.
    let solver_stations: Vec<usize> = (0..4).collect();
    let mut data_stations = solver_stations.clone();
    data_stations.push(9);

    let truth = source(30_000.0, 15.0, TENSOR);
    let start = source(28_000.0, 14.0, TENSOR);
    let params = ParamDict::new(vec![(
        Param::Depth,
        ParamSpec { scale: 1000.0, pert: Some(-500.0) },
    )])
    .unwrap();

    let mut inv = CmtInversion::new(
        setup(
            config(false, false),
            params,
            start,
            &truth,
            &data_stations,
            tmp.path(),
        ),
        hooks(solver_stations),
    )
    .unwrap();

    inv.process_data().unwrap();
    inv.window_data().unwrap();
    // The orphan trace is gone; the inversion proceeds with the rest
    let (best, _) = inv.solve(OptOptions::default()).unwrap();
    assert!((best.depth_in_m - 30_000.0).abs() < 300.0);
}

#[test]
fn iteration_capped_run_ends_failed() {
    let tmp = tempfile::tempdir().unwrap();
    let stations: Vec<usize> = (0..4).collect();
    let truth = source(30_000.0, 15.0, TENSOR);
    let start = source(27_000.0, 15.0, TENSOR);
    let params = ParamDict::new(vec![(
        Param::Depth,
        ParamSpec { scale: 1000.0, pert: Some(-500.0) },
    )])
    .unwrap();

    let mut inv = CmtInversion::new(
        setup(config(false, false), params, start, &truth, &stations, tmp.path()),
        hooks(stations.clone()),
    )
    .unwrap();

    // One iteration improves the model a lot but cannot satisfy the
    // cost-change tolerance, so the cap is what stops the loop.
    let opts = OptOptions {
        niter_max: 1,
        ..OptOptions::default()
    };
    let (_, result) = inv.solve(opts).unwrap();
    assert_eq!(result.stop, StopReason::MaxIterations);
    assert_eq!(inv.stage(), Stage::Failed);
}

#[test]
fn windows_are_selected_exactly_once() {
    let tmp = tempfile::tempdir().unwrap();
    let stations: Vec<usize> = (0..3).collect();
    let truth = source(30_000.0, 15.0, TENSOR);
    let start = source(28_000.0, 15.0, TENSOR);
    let params = ParamDict::new(vec![(
        Param::Depth,
        ParamSpec { scale: 1000.0, pert: Some(-500.0) },
    )])
    .unwrap();

    let mut inv = CmtInversion::new(
        setup(config(false, false), params, start, &truth, &stations, tmp.path()),
        hooks(stations.clone()),
    )
    .unwrap();
    inv.process_data().unwrap();
    inv.window_data().unwrap();
    let first = std::fs::read_to_string(tmp.path().join("out/measurements_initial.json")).unwrap();
    // A second call must not re-window or rewrite the artifact
    inv.window_data().unwrap();
    let second = std::fs::read_to_string(tmp.path().join("out/measurements_initial.json")).unwrap();
    assert_eq!(first, second);
}
