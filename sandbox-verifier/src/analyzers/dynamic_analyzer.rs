use chrono::Utc;
use shared::{VerifierError, VerifierResult};
use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::analyzers::classify;
use crate::config::{DiscoverySettings, VerifierConfig};
use crate::models::{
    ArtifactSet, BatchSummary, ExecutionResult, RunStage, SampleReport, StageTiming, Verdict,
};
use crate::sandbox::{ArtifactInspector, Sandbox, SampleExecutor};

/// Samples selected for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSelection {
    /// One explicitly named sample
    Single(PathBuf),
    /// Every sample found in the input directory
    Batch(Vec<PathBuf>),
}

/// Drives provisioning, execution, inspection, classification and cleanup
/// for each sample, one sample at a time.
pub struct DynamicAnalyzer {
    config: VerifierConfig,
    executor: SampleExecutor,
    inspector: ArtifactInspector,
}

impl DynamicAnalyzer {
    pub fn new(config: VerifierConfig) -> VerifierResult<Self> {
        config.validate()?;

        let executor = SampleExecutor::new(config.execution.clone());
        let inspector = ArtifactInspector::new(config.inspection.clone());

        Ok(Self {
            config,
            executor,
            inspector,
        })
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Run one sample through the full lifecycle.
    ///
    /// Never fails: every problem ends up in the report, and the sandbox is
    /// removed before this returns.
    pub async fn analyze_sample(&self, sample: &Path) -> SampleReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("sample_run", %run_id, sample = %sample.display());
        self.run(run_id, sample).instrument(span).await
    }

    /// Run every sample in order. Reports are handed to `on_report` as they complete.
    pub async fn analyze_batch_with<F>(&self, samples: &[PathBuf], mut on_report: F) -> BatchSummary
    where
        F: FnMut(&SampleReport),
    {
        info!(total = samples.len(), "Starting batch");

        let mut reports = Vec::with_capacity(samples.len());
        for sample in samples {
            let report = self.analyze_sample(sample).await;
            on_report(&report);
            reports.push(report);
        }

        let summary = BatchSummary::from_reports(reports);
        info!(
            total = summary.total,
            malicious = summary.malicious,
            "Batch complete"
        );
        summary
    }

    pub async fn analyze_batch(&self, samples: &[PathBuf]) -> BatchSummary {
        self.analyze_batch_with(samples, |_| {}).await
    }

    async fn run(&self, run_id: Uuid, sample: &Path) -> SampleReport {
        let started_at = Utc::now();
        let mut stages = StageTimer::default();
        info!("Testing sample");

        stages.enter(RunStage::Provisioning);
        let sandbox = match Sandbox::provision(&self.config.sandbox) {
            Ok(sandbox) => sandbox,
            Err(e) => {
                error!(error = %e, "Sandbox provisioning failed");
                return SampleReport {
                    run_id,
                    sample: sample.to_path_buf(),
                    started_at,
                    sandbox_root: None,
                    execution: None,
                    verdict: Verdict::inconclusive(ArtifactSet::not_inspected()),
                    error: Some(e.to_string()),
                    stages: stages.finish(),
                };
            }
        };
        let sandbox_root = sandbox.root().to_path_buf();

        let RunOutcome {
            execution,
            verdict,
            mut error,
        } = self.execute_and_inspect(&sandbox, sample, &mut stages).await;

        stages.enter(RunStage::Cleanup);
        if let Err(e) = sandbox.teardown() {
            warn!(error = %e, "Sandbox cleanup failed");
            error = Some(match error {
                Some(previous) => format!("{}; {}", previous, e),
                None => e.to_string(),
            });
        }

        if verdict.is_malicious {
            info!(indicators = ?verdict.indicators, "Malicious behavior confirmed");
        } else {
            info!("No malicious behavior detected");
        }

        SampleReport {
            run_id,
            sample: sample.to_path_buf(),
            started_at,
            sandbox_root: Some(sandbox_root),
            execution,
            verdict,
            error,
            stages: stages.finish(),
        }
    }

    async fn execute_and_inspect(
        &self,
        sandbox: &Sandbox,
        sample: &Path,
        stages: &mut StageTimer,
    ) -> RunOutcome {
        let staged = match sandbox.stage_sample(sample) {
            Ok(staged) => staged,
            Err(e) => {
                error!(error = %e, "Failed to stage sample");
                return RunOutcome::failed(None, e);
            }
        };

        stages.enter(RunStage::Executing);
        let execution = self.executor.execute(sandbox, &staged).await;
        if !execution.completed_normally() {
            warn!(outcome = ?execution.outcome, "Sample did not complete normally, inspecting anyway");
        }

        stages.enter(RunStage::Settling);
        self.inspector.settle(sandbox.documents_dir()).await;

        stages.enter(RunStage::Inspecting);
        let artifacts = match self.inspector.inspect(
            sandbox.documents_dir(),
            sandbox.seed_file(),
            sandbox.seed_content(),
        ) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                error!(error = %e, "Artifact inspection failed");
                return RunOutcome::failed(Some(execution), e);
            }
        };

        stages.enter(RunStage::Classifying);
        RunOutcome {
            execution: Some(execution),
            verdict: classify(artifacts),
            error: None,
        }
    }
}

struct RunOutcome {
    execution: Option<ExecutionResult>,
    verdict: Verdict,
    error: Option<String>,
}

impl RunOutcome {
    fn failed(execution: Option<ExecutionResult>, error: VerifierError) -> Self {
        Self {
            execution,
            verdict: Verdict::inconclusive(ArtifactSet::not_inspected()),
            error: Some(error.to_string()),
        }
    }
}

/// Records how long each stage of a run took. Stages only move forward.
#[derive(Default)]
struct StageTimer {
    current: Option<(RunStage, Instant)>,
    completed: Vec<StageTiming>,
}

impl StageTimer {
    fn enter(&mut self, stage: RunStage) {
        debug_assert!(
            self.completed.iter().all(|t| t.stage != stage),
            "stage {:?} entered twice",
            stage
        );
        self.close_current();
        debug!(stage = stage.as_str(), "Entering stage");
        if stage != RunStage::Done {
            self.current = Some((stage, Instant::now()));
        }
    }

    fn close_current(&mut self) {
        if let Some((stage, since)) = self.current.take() {
            self.completed.push(StageTiming {
                stage,
                elapsed_ms: since.elapsed().as_millis() as u64,
            });
        }
    }

    fn finish(mut self) -> Vec<StageTiming> {
        self.enter(RunStage::Done);
        self.completed
    }
}

/// Find every sample with the given extension directly inside `dir`, sorted by path.
pub fn discover_samples(dir: &Path, extension: &str) -> VerifierResult<Vec<PathBuf>> {
    let no_samples = || VerifierError::NoSamplesFound {
        dir: dir.to_path_buf(),
        extension: extension.to_string(),
    };

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(no_samples()),
        Err(e) => {
            return Err(VerifierError::InvalidInput(format!(
                "Cannot read input directory {}: {}",
                dir.display(),
                e
            )))
        }
    };

    let mut samples: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension() == Some(OsStr::new(extension)))
        .collect();

    if samples.is_empty() {
        return Err(no_samples());
    }

    samples.sort();
    debug!(count = samples.len(), dir = %dir.display(), "Discovered samples");
    Ok(samples)
}

/// Resolve what to test: the explicit sample if one was given, otherwise discovery.
pub fn resolve_samples(
    explicit: Option<&Path>,
    discovery: &DiscoverySettings,
) -> VerifierResult<SampleSelection> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(VerifierError::SampleNotFound(path.to_path_buf()));
            }
            if path.is_dir() {
                return Err(VerifierError::InvalidInput(format!(
                    "Sample path is a directory: {}",
                    path.display()
                )));
            }
            Ok(SampleSelection::Single(path.to_path_buf()))
        }
        None => discover_samples(&discovery.input_dir, &discovery.extension).map(SampleSelection::Batch),
    }
}
