use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// How the sample's process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed,
    TimedOut,
    LaunchFailed(String),
    /// The process started but could not be waited on
    WaitFailed(String),
}

/// Result of running the sample under the emulation runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub outcome: ExecutionOutcome,
    /// `None` when the process was killed by a signal or never started
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn launch_failed(reason: impl Into<String>) -> Self {
        Self {
            outcome: ExecutionOutcome::LaunchFailed(reason.into()),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            duration_ms: 0,
        }
    }

    pub fn completed_normally(&self) -> bool {
        self.outcome == ExecutionOutcome::Completed
    }
}

/// Ransom note found in the documents directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RansomNote {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Leading excerpt for the report; never interpreted
    pub preview: String,
}

/// What happened to the decoy document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedFileState {
    Intact,
    Modified,
    Missing,
    /// The seed exists but could not be read back
    Unknown,
}

/// Evidence collected from the sandbox after the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSet {
    /// Files carrying the encryption marker, sorted by name
    pub encrypted_files: Vec<PathBuf>,
    pub ransom_note: Option<RansomNote>,
    pub seed_file: SeedFileState,
    pub documents_dir_present: bool,
}

impl ArtifactSet {
    /// Empty evidence for a documents directory that no longer exists
    pub fn documents_removed() -> Self {
        Self {
            encrypted_files: Vec::new(),
            ransom_note: None,
            seed_file: SeedFileState::Missing,
            documents_dir_present: false,
        }
    }

    /// Evidence used when a run never reached inspection
    pub fn not_inspected() -> Self {
        Self {
            encrypted_files: Vec::new(),
            ransom_note: None,
            seed_file: SeedFileState::Unknown,
            documents_dir_present: false,
        }
    }

    pub fn encrypted_count(&self) -> usize {
        self.encrypted_files.len()
    }

    pub fn encrypted_file_names(&self) -> Vec<String> {
        self.encrypted_files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }
}

/// Classification of one sample run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_malicious: bool,
    pub artifacts: ArtifactSet,
    pub indicators: Vec<String>,
}

impl Verdict {
    /// Default verdict for a run whose evidence could not be collected
    pub fn inconclusive(artifacts: ArtifactSet) -> Self {
        Self {
            is_malicious: false,
            artifacts,
            indicators: Vec::new(),
        }
    }
}

/// Lifecycle stages of a single sample run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Provisioning,
    Executing,
    Settling,
    Inspecting,
    Classifying,
    Cleanup,
    Done,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Provisioning => "provisioning",
            RunStage::Executing => "executing",
            RunStage::Settling => "settling",
            RunStage::Inspecting => "inspecting",
            RunStage::Classifying => "classifying",
            RunStage::Cleanup => "cleanup",
            RunStage::Done => "done",
        }
    }
}

/// Elapsed time for a stage of the run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: RunStage,
    pub elapsed_ms: u64,
}

/// Everything known about one sample after its run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleReport {
    pub run_id: Uuid,
    pub sample: PathBuf,
    pub started_at: DateTime<Utc>,
    /// Sandbox used for the run; removed by the time the report exists
    pub sandbox_root: Option<PathBuf>,
    pub execution: Option<ExecutionResult>,
    pub verdict: Verdict,
    /// Provisioning, inspection or cleanup failure note
    pub error: Option<String>,
    pub stages: Vec<StageTiming>,
}

impl SampleReport {
    pub fn sample_name(&self) -> String {
        self.sample
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.sample.display().to_string())
    }

    pub fn is_malicious(&self) -> bool {
        self.verdict.is_malicious
    }
}

/// Aggregate over a batch of sample runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub malicious: usize,
    pub reports: Vec<SampleReport>,
}

impl BatchSummary {
    pub fn from_reports(reports: Vec<SampleReport>) -> Self {
        let malicious = reports.iter().filter(|r| r.is_malicious()).count();
        Self {
            total: reports.len(),
            malicious,
            reports,
        }
    }

    pub fn all_malicious(&self) -> bool {
        self.total > 0 && self.malicious == self.total
    }
}
