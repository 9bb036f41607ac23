pub mod classifier;
pub mod dynamic_analyzer;

pub use classifier::classify;
pub use dynamic_analyzer::{discover_samples, resolve_samples, DynamicAnalyzer, SampleSelection};
