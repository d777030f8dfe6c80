// ─────────────────────────────────────────────────────────────────────
// SCPN Seismo Core — Forward-Simulation Orchestration
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Simulation directory layout, par-file editing and solver execution.
//!
//! One directory per required forward run: the baseline source plus one
//! per simulated parameter. Directories are prepared once and the
//! source files rewritten each objective evaluation, so the expensive
//! mesh staging never repeats.

use cmt_types::error::{CmtError, CmtResult};
use cmt_types::params::{Param, ParamDict};
use cmt_types::source::CmtSource;
use cmt_types::stream::{Station, Stream, Trace, TraceStats};
use ndarray::Array1;
use ndarray_npy::read_npy;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

pub const SOURCE_FILE: &str = "CMTSOLUTION";
pub const STATIONS_FILE: &str = "STATIONS";
pub const PAR_FILE: &str = "Par_file";
pub const DATA_DIR: &str = "DATA";
pub const OUTPUT_DIR: &str = "OUTPUT_FILES";

const KEY_RECORD_LENGTH: &str = "RECORD_LENGTH_IN_MINUTES";
const KEY_SOURCE_DERIVATIVE: &str = "SOURCE_DERIVATIVE";
const KEY_DERIVATIVE_DIRECTION: &str = "SOURCE_DERIVATIVE_DIRECTION";

/// What one simulation directory computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimKind {
    Baseline,
    Frechet(Param),
}

impl SimKind {
    pub fn dir_name(&self) -> String {
        match self {
            SimKind::Baseline => "synt".to_string(),
            SimKind::Frechet(par) => format!("dsyn_{}", par.name()),
        }
    }
}

/// Fortran-style `KEY = value` parameter file, edited in place so
/// comments and unrelated keys survive a rewrite.
#[derive(Debug, Clone)]
pub struct ParFile {
    lines: Vec<String>,
}

impl ParFile {
    pub fn from_text(text: &str) -> Self {
        ParFile {
            lines: text.lines().map(|l| l.to_string()).collect(),
        }
    }

    pub fn read(path: &Path) -> CmtResult<Self> {
        Ok(Self::from_text(&std::fs::read_to_string(path)?))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        for line in &self.lines {
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') {
                continue;
            }
            if let Some((k, v)) = trimmed.split_once('=') {
                if k.trim() == key {
                    return Some(v.trim());
                }
            }
        }
        None
    }

    /// Replace a key's value, appending the key when absent.
    pub fn set(&mut self, key: &str, value: &str) {
        for line in &mut self.lines {
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') {
                continue;
            }
            if let Some((k, _)) = trimmed.split_once('=') {
                if k.trim() == key {
                    *line = format!("{key} = {value}");
                    return;
                }
            }
        }
        self.lines.push(format!("{key} = {value}"));
    }

    pub fn to_text(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    pub fn write(&self, path: &Path) -> CmtResult<()> {
        std::fs::write(path, self.to_text())?;
        Ok(())
    }
}

/// The set of simulation directories for one event.
#[derive(Debug, Clone)]
pub struct SimDirs {
    root: PathBuf,
    entries: Vec<SimKind>,
}

impl SimDirs {
    /// Baseline plus one Fréchet directory per simulated parameter,
    /// in dictionary order.
    pub fn new(root: PathBuf, params: &ParamDict) -> Self {
        let mut entries = vec![SimKind::Baseline];
        for par in params.params() {
            if par.needs_simulation() {
                entries.push(SimKind::Frechet(par));
            }
        }
        SimDirs { root, entries }
    }

    pub fn kinds(&self) -> &[SimKind] {
        &self.entries
    }

    pub fn dir(&self, kind: SimKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    pub fn dirs(&self) -> Vec<PathBuf> {
        self.entries.iter().map(|k| self.dir(*k)).collect()
    }

    /// Create the directory tree and write the per-directory par and
    /// station files. Derivative directories get the solver's source-
    /// derivative mode switched on with the matching direction.
    pub fn prepare(
        &self,
        par_template: &ParFile,
        duration_s: f64,
        stations: &[Station],
    ) -> CmtResult<()> {
        for kind in &self.entries {
            let dir = self.dir(*kind);
            std::fs::create_dir_all(dir.join(DATA_DIR))?;
            std::fs::create_dir_all(dir.join(OUTPUT_DIR))?;

            let mut par = par_template.clone();
            par.set(KEY_RECORD_LENGTH, &format!("{}", duration_s / 60.0));
            match kind {
                SimKind::Frechet(p) if p.derivative_direction().is_some() => {
                    par.set(KEY_SOURCE_DERIVATIVE, ".true.");
                    par.set(
                        KEY_DERIVATIVE_DIRECTION,
                        &p.derivative_direction().unwrap().to_string(),
                    );
                }
                _ => {
                    par.set(KEY_SOURCE_DERIVATIVE, ".false.");
                }
            }
            par.write(&dir.join(DATA_DIR).join(PAR_FILE))?;
            write_stations(&dir.join(DATA_DIR).join(STATIONS_FILE), stations)?;
        }
        info!(root = %self.root.display(), dirs = self.entries.len(), "simulation directories prepared");
        Ok(())
    }

    /// Write the baseline source and every derivative source for the
    /// current model. Parameters handled analytically by the solver
    /// keep the baseline source; finite-difference parameters get a
    /// perturbed copy.
    pub fn write_sources(&self, source: &CmtSource, params: &ParamDict) -> CmtResult<()> {
        for kind in &self.entries {
            let path = self.dir(*kind).join(DATA_DIR).join(SOURCE_FILE);
            match kind {
                SimKind::Baseline => source.write_file(&path)?,
                SimKind::Frechet(par) => {
                    let spec = params.get(*par).ok_or_else(|| {
                        CmtError::ConfigError(format!("{par} missing from parameter dictionary"))
                    })?;
                    match spec.pert {
                        Some(pert) => source.perturbed(*par, pert).write_file(&path)?,
                        None => source.write_file(&path)?,
                    }
                }
            }
        }
        Ok(())
    }
}

/// Station list in the solver's fixed-column format.
pub fn write_stations(path: &Path, stations: &[Station]) -> CmtResult<()> {
    let mut out = String::new();
    for sta in stations {
        out.push_str(&format!(
            "{:<8} {:<4} {:12.4} {:12.4} {:8.1} {:8.1}\n",
            sta.station, sta.network, sta.latitude, sta.longitude, sta.elevation, sta.burial
        ));
    }
    std::fs::write(path, out)?;
    Ok(())
}

/// Verify that a directory's existing source file matches the source
/// this inversion was asked to run. A stale directory from a different
/// event must fail loudly instead of silently inverting the wrong one.
pub fn check_source_consistency(dir: &Path, expected: &CmtSource) -> CmtResult<()> {
    let path = dir.join(DATA_DIR).join(SOURCE_FILE);
    if !path.exists() {
        return Ok(());
    }
    let found = CmtSource::from_file(&path)?;
    if found != *expected {
        return Err(CmtError::SourceMismatch { path });
    }
    Ok(())
}

/// Runs a batch of prepared simulation directories to completion.
pub trait SimRunner: Send + Sync {
    fn run(&self, dirs: &[PathBuf]) -> CmtResult<()>;
}

/// Launches the forward solver as a subprocess per directory, all
/// directories concurrently, and fails on the first non-zero exit.
pub struct SubprocessRunner {
    pub launch_prefix: Vec<String>,
    pub executable: String,
}

impl SimRunner for SubprocessRunner {
    fn run(&self, dirs: &[PathBuf]) -> CmtResult<()> {
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(dirs.len());
            for dir in dirs {
                handles.push((dir, scope.spawn(move || self.run_one(dir))));
            }
            for (dir, handle) in handles {
                handle
                    .join()
                    .map_err(|_| CmtError::Interrupted(format!("solver thread for {} panicked", dir.display())))??;
            }
            Ok(())
        })
    }
}

impl SubprocessRunner {
    fn run_one(&self, dir: &Path) -> CmtResult<()> {
        let (program, args) = match self.launch_prefix.split_first() {
            Some((head, rest)) => {
                let mut args: Vec<&str> = rest.iter().map(|s| s.as_str()).collect();
                args.push(&self.executable);
                (head.as_str(), args)
            }
            None => (self.executable.as_str(), Vec::new()),
        };
        debug!(dir = %dir.display(), program, "launching forward solver");
        let status = Command::new(program).args(args).current_dir(dir).status()?;
        if !status.success() {
            return Err(CmtError::SolverFailed {
                dir: dir.to_path_buf(),
                code: status.code(),
            });
        }
        Ok(())
    }
}

/// Reads the synthetic waveforms a finished simulation left behind.
pub trait TraceLoader: Send + Sync {
    fn load(&self, dir: &Path) -> CmtResult<Stream>;
}

/// Loads `OUTPUT_FILES/*.npy` sample arrays, each with a JSON sidecar
/// of the same stem holding the trace metadata.
pub struct NpyTraceLoader;

impl TraceLoader for NpyTraceLoader {
    fn load(&self, dir: &Path) -> CmtResult<Stream> {
        let out_dir = dir.join(OUTPUT_DIR);
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(&out_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("npy") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut traces = Vec::with_capacity(paths.len());
        for path in paths {
            let sidecar = path.with_extension("json");
            let stats: TraceStats = serde_json::from_str(&std::fs::read_to_string(&sidecar)?)?;
            let data: Array1<f64> = read_npy(&path).map_err(|e| {
                CmtError::Interrupted(format!("reading {}: {e}", path.display()))
            })?;
            traces.push(Trace::new(stats, data.to_vec()));
        }
        Ok(Stream::new(traces))
    }
}
