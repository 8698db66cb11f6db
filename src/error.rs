use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid vector: {0}")]
    InvalidVector(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid bounding box: {0}")]
    InvalidBounds(String),

    #[error("matrix file {}: {reason}", path.display())]
    MatrixFile { path: PathBuf, reason: String },

    #[error("no {prefix}*.json matrix file in {}", dir.display())]
    MissingDataset { prefix: String, dir: PathBuf },

    #[error("{0}: no sample fell inside the grid, refusing to write an empty matrix")]
    EmptyDataset(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("unparsable llm reply: {0}")]
    LlmReply(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<async_openai::error::OpenAIError> for Error {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        Error::Llm(err.to_string())
    }
}

impl Error {
    pub fn matrix_file(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::MatrixFile {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
