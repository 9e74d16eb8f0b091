use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Failed to fetch image from {url}: {reason}")]
    FetchFailed { url: String, reason: String },
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Preprocessing failed: {0}")]
    PreprocessFailed(#[source] Box<ClassifierError>),
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    #[error("Failed to load model from {path:?}: {reason}")]
    ModelLoadFailed { path: PathBuf, reason: String },
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    #[error("Model returned an empty output")]
    EmptyOutput,
    #[error("Class index {index} out of range for a table of {len} labels")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Label table unavailable: {0}")]
    LabelTableUnavailable(String),
}

impl ClassifierError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifierError::FetchFailed { .. } => "FetchFailed",
            ClassifierError::InvalidImage(_) => "InvalidImage",
            ClassifierError::PreprocessFailed(_) => "PreprocessFailed",
            ClassifierError::ModelNotFound(_) => "ModelNotFound",
            ClassifierError::ModelLoadFailed { .. } => "ModelLoadFailed",
            ClassifierError::InferenceFailed(_) => "InferenceFailed",
            ClassifierError::EmptyOutput => "EmptyOutput",
            ClassifierError::IndexOutOfRange { .. } => "IndexOutOfRange",
            ClassifierError::LabelTableUnavailable(_) => "LabelTableUnavailable",
        }
    }
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
