//! Behavioral verification of suspected ransomware samples.
//!
//! Each sample is copied into a throwaway profile directory, run under an
//! emulation runtime with a hard timeout, and judged by what it leaves in the
//! decoy `Documents` folder: encrypted files or a ransom note.

pub mod analyzers;
pub mod config;
pub mod models;
pub mod sandbox;

pub use analyzers::{DynamicAnalyzer, SampleSelection};
pub use config::VerifierConfig;
pub use models::{BatchSummary, SampleReport, Verdict};
