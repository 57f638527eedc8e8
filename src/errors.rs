use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeqmatchError {
    #[error(transparent)]
    FileMapError(#[from] FileMapError),
    #[error(transparent)]
    ConfigError(#[from] ConfigError),
    #[error(transparent)]
    InputError(#[from] InputError),
    #[error(transparent)]
    SearchError(#[from] SearchError),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SeqmatchError>;

impl SeqmatchError {
    pub fn custom(msg: impl std::fmt::Display) -> Self {
        Self::Other(msg.to_string())
    }
}

/// Fatal errors raised while opening or mapping a file.
/// These are never retried.
#[derive(Debug, Error)]
pub enum FileMapError {
    #[error("unable to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to map {len} bytes at offset {offset}: {source}")]
    MapFailure {
        offset: u64,
        len: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("offset {offset} is outside of a file of {len} bytes")]
    OutOfBounds { offset: u64, len: u64 },
    #[error("{path} is truncated: expected at least {expected} bytes, found {found}")]
    Truncated {
        path: PathBuf,
        expected: u64,
        found: u64,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required key `{key}` missing from {path}")]
    MissingKey { key: String, path: PathBuf },
    #[error("invalid value `{value}` for key `{key}`")]
    InvalidValue { key: String, value: String },
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Malformed user supplied values, each variant names the offending field.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("invalid accession `{value}`")]
    InvalidAccession { value: String },
    #[error("entry index {index} out of range, database has {num_entries} entries")]
    EntryOutOfRange { index: u32, num_entries: u32 },
    #[error("invalid elemental formula `{formula}`: {reason}")]
    InvalidFormula { formula: String, reason: String },
    #[error("invalid tolerance `{value}`")]
    InvalidTolerance { value: String },
    #[error("invalid specificity `{line}`")]
    InvalidSpecificity { line: String },
    #[error("invalid modification record at line {line_number}: {reason}")]
    InvalidModificationRecord { line_number: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("more than {limit} peptide hits, search rejected")]
    TooManyPeptideHits { limit: usize },
    #[error("worker {worker} failed: {message}")]
    WorkerFailed { worker: usize, message: String },
    #[error("timed out waiting for lock {path}")]
    LockTimeout { path: PathBuf },
    #[error("unable to handle result file {path}: {message}")]
    ResultIo { path: PathBuf, message: String },
}
