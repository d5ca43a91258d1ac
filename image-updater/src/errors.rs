use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    /// The definition file as a whole could not be used.
    #[error("couldn't load configuration {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// One image definition could not be loaded, the rest are still usable.
    #[error("couldn't load image definition {key:?}: {reason}")]
    Spec { key: String, reason: String },

    #[error("{operation} failed: {reason}")]
    Collaborator { operation: String, reason: String },

    #[error("failed to build {image}: {reason}")]
    Build { image: String, reason: String },

    #[error("images depend on each other: {}", cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },
}

impl UpdateError {
    pub fn collaborator<O, R>(operation: O, reason: R) -> UpdateError
    where
        O: Into<String>,
        R: ToString,
    {
        UpdateError::Collaborator {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}
