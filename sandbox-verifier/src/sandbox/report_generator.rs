/// Rendering of per-sample reports and batch summaries
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::str::FromStr;

use crate::models::{BatchSummary, ExecutionOutcome, SampleReport, SeedFileState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Text,
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!("unknown report format: {}", other)),
        }
    }
}

/// Report generator
pub struct ReportGenerator {
    format: ReportFormat,
}

impl ReportGenerator {
    pub fn new(format: ReportFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> ReportFormat {
        self.format
    }

    /// Line printed before a batch starts
    pub fn batch_header(&self, total: usize) -> Option<String> {
        match self.format {
            ReportFormat::Text => Some(format!("[*] Testing {} malware variants\n", total)),
            ReportFormat::Json => None,
        }
    }

    /// Render one sample's report
    pub fn render_sample(&self, report: &SampleReport) -> serde_json::Result<String> {
        match self.format {
            ReportFormat::Text => Ok(render_sample_text(report)),
            ReportFormat::Json => serde_json::to_string_pretty(report),
        }
    }

    /// Render the aggregate for a batch. In JSON mode this carries every report.
    pub fn render_summary(&self, summary: &BatchSummary) -> serde_json::Result<String> {
        match self.format {
            ReportFormat::Text => Ok(render_summary_text(summary)),
            ReportFormat::Json => serde_json::to_string_pretty(summary),
        }
    }
}

fn render_sample_text(report: &SampleReport) -> String {
    let mut out = String::new();
    let artifacts = &report.verdict.artifacts;

    let _ = writeln!(out, "[*] Testing: {}", report.sample_name());

    if let Some(execution) = &report.execution {
        match &execution.outcome {
            ExecutionOutcome::Completed => {
                let code = execution
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "killed by signal".to_string());
                let _ = writeln!(out, "  Exit code: {}", code);
            }
            ExecutionOutcome::TimedOut => {
                let _ = writeln!(out, "  Execution: timed out after {} ms", execution.duration_ms);
            }
            ExecutionOutcome::LaunchFailed(reason) => {
                let _ = writeln!(out, "  Execution: launch failed ({})", reason);
            }
            ExecutionOutcome::WaitFailed(reason) => {
                let _ = writeln!(out, "  Execution: lost track of process ({})", reason);
            }
        }
    }

    let _ = writeln!(out, "  Files encrypted: {}", artifacts.encrypted_count());
    let _ = writeln!(out, "  Ransom note created: {}", artifacts.ransom_note.is_some());

    if !artifacts.encrypted_files.is_empty() {
        let _ = writeln!(out, "  Encrypted files: {:?}", artifacts.encrypted_file_names());
    }

    if let Some(note) = &artifacts.ransom_note {
        let _ = writeln!(out, "  Ransom note size: {} bytes", note.size_bytes);
        let _ = writeln!(out, "  Preview: {}...", note.preview);
    }

    // Uninspected runs also lack the directory but report `Unknown` for the seed.
    if !artifacts.documents_dir_present && artifacts.seed_file == SeedFileState::Missing {
        let _ = writeln!(out, "  Documents directory was removed");
    } else if matches!(artifacts.seed_file, SeedFileState::Missing | SeedFileState::Modified) {
        let _ = writeln!(out, "  Seed file: {:?}", artifacts.seed_file);
    }

    if let Some(error) = &report.error {
        let _ = writeln!(out, "  [!] Error: {}", error);
    }

    if report.verdict.is_malicious {
        let _ = writeln!(out, "  [✓] MALICIOUS BEHAVIOR CONFIRMED");
    } else {
        let _ = writeln!(out, "  [!] No malicious behavior detected");
    }

    out
}

fn render_summary_text(summary: &BatchSummary) -> String {
    let mut out = format!(
        "[*] Summary: {}/{} variants demonstrated malicious behavior\n",
        summary.malicious, summary.total
    );
    if summary.all_malicious() {
        out.push_str("[✓] All variants are clearly malicious\n");
    } else {
        out.push_str("[!] Some variants did not demonstrate malicious behavior\n");
    }
    out
}
