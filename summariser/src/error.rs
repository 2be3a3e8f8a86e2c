use std::path::PathBuf;

use fleet_tunnel_summary_model::JsonlError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("Run directory {0} does not exist")]
    MissingRunDirectory(PathBuf),
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read execution records from {path}: {source}")]
    Records {
        path: PathBuf,
        #[source]
        source: JsonlError,
    },
    #[error("Failed to read resource samples from {path}: {source}")]
    Resources {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Failed to write the summary report: {0}")]
    Report(#[from] serde_json::Error),
}

impl SummaryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
