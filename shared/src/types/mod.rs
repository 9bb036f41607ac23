//! Shared type definitions for the sandbox verifier
//!
//! Currently this is only the error taxonomy shared by the library and the
//! `verify-malicious` binary.

pub mod error;

pub use error::{VerifierError, VerifierResult};
