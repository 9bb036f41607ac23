/// Sandbox module for isolated dynamic analysis
///
/// This module provides the disposable environment a sample runs in:
/// - Provisioning of a per-sample profile directory with a decoy document
/// - Execution of the sample under the emulation runtime with a hard timeout
/// - Inspection of the documents directory after the run
/// - Report rendering for researchers

pub mod executor;
pub mod inspector;
pub mod provisioner;
pub mod report_generator;

pub use executor::SampleExecutor;
pub use inspector::ArtifactInspector;
pub use provisioner::Sandbox;
pub use report_generator::ReportGenerator;
