use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CheckError>;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Excel error: {0}")]
    Excel(String),

    #[error("input is missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("failed to serialize progress summary: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

impl CheckError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CheckError::Io {
            path: path.into(),
            source,
        }
    }
}
