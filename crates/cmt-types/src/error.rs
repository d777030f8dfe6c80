use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CmtError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Source file at {path} disagrees with the requested source")]
    SourceMismatch { path: PathBuf },

    #[error("Forward solver failed in {dir} with exit code {code:?}")]
    SolverFailed { dir: PathBuf, code: Option<i32> },

    #[error("Malformed source file {path}: {message}")]
    SourceParse { path: PathBuf, message: String },

    #[error("Linear algebra error: {0}")]
    LinAlg(String),

    #[error("Inversion interrupted: {0}")]
    Interrupted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CmtResult<T> = Result<T, CmtError>;
