pub mod analysis_result;

pub use analysis_result::{
    ArtifactSet, BatchSummary, ExecutionOutcome, ExecutionResult, RansomNote, RunStage,
    SampleReport, SeedFileState, StageTiming, Verdict,
};
