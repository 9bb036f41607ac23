//! Common error types for the sandbox verifier

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("File not found: {}", .0.display())]
    SampleNotFound(PathBuf),

    #[error("No .{extension} files found in {}", .dir.display())]
    NoSamplesFound { dir: PathBuf, extension: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Sandbox provisioning failed at {}: {source}", .path.display())]
    Provisioning {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact inspection failed at {}: {source}", .path.display())]
    Inspection {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Sandbox cleanup failed at {}: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl VerifierError {
    pub fn provisioning(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VerifierError::Provisioning {
            path: path.into(),
            source,
        }
    }

    pub fn inspection(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VerifierError::Inspection {
            path: path.into(),
            source,
        }
    }

    /// Input errors stop the tool before any sample is run.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            VerifierError::SampleNotFound(_)
                | VerifierError::NoSamplesFound { .. }
                | VerifierError::InvalidInput(_)
        )
    }

    /// Exit status the binary uses when this error reaches `main`.
    pub fn exit_code(&self) -> u8 {
        match self {
            VerifierError::Configuration(_) => 2,
            _ => 1,
        }
    }
}

pub type VerifierResult<T> = std::result::Result<T, VerifierError>;
