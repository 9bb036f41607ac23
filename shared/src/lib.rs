//! Shared utilities and types for the sandbox verifier

// Re-export common dependencies
pub use anyhow;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tracing;
pub use uuid;

pub mod observability;
pub mod types;

pub use types::error::{VerifierError, VerifierResult};
