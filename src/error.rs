use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::api::ApiError;

/// Failures that stop `asky` before a question can be answered.
///
/// Per-question failures never show up here: the assistant turns them into
/// answer text instead (see `Assistant::ask`).
#[derive(Debug, Error)]
pub enum AskyError {
    #[error("Unable to determine the home directory")]
    NoHomeDirectory,

    #[error("No permission to create directory {}", .0.display())]
    ConfigPermission(PathBuf),

    #[error("Error creating configuration directory: {0}")]
    ConfigDirectory(#[source] io::Error),

    #[error("Error reading configuration: {0}")]
    ConfigRead(#[source] io::Error),

    #[error("Invalid configuration file format")]
    ConfigFormat,

    #[error("Error saving configuration: {0}")]
    ConfigWrite(#[source] io::Error),

    #[error("The API key must be a non-empty string")]
    Validation,

    #[error("API key is not configured. Use --set-api-key to set it.")]
    MissingCredential,

    #[error("Model initialization error: {0}")]
    ModelInit(#[source] ApiError),
}

impl AskyError {
    /// The line printed on stderr when this error ends the process.
    ///
    /// Credential and model problems are instructions to the user and are
    /// printed as-is; everything else gets an `Error:` prefix.
    pub fn diagnostic(&self) -> String {
        match self {
            AskyError::MissingCredential | AskyError::ModelInit(_) => self.to_string(),
            _ => format!("Error: {}", self),
        }
    }
}
