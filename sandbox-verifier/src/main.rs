//! verify-malicious
//!
//! Checks whether suspected ransomware samples actually encrypt files or
//! drop a ransom note when run in a disposable sandbox.
//!
//! # Usage
//!
//! ```bash
//! verify-malicious generated_malware/variant_01.exe
//! verify-malicious --input-dir generated_malware --timeout-secs 20
//! verify-malicious --runtime wine --format json
//! ```

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use shared::observability::{init_logging, LogFormat, LogLevel};
use tracing::error;

use sandbox_verifier::analyzers::resolve_samples;
use sandbox_verifier::config::{default_log_config, SettleStrategy, VerifierConfig};
use sandbox_verifier::sandbox::report_generator::{ReportFormat, ReportGenerator};
use sandbox_verifier::{DynamicAnalyzer, SampleSelection};

#[derive(Parser, Debug)]
#[command(name = "verify-malicious")]
#[command(version)]
#[command(about = "Run suspected ransomware samples in a sandbox and confirm malicious behavior", long_about = None)]
struct Cli {
    /// Sample to test. When omitted, every matching sample in --input-dir is tested
    sample: Option<PathBuf>,

    /// Directory searched for samples when no sample is given
    #[arg(long, default_value = "generated_malware")]
    input_dir: PathBuf,

    /// Sample file extension used for discovery
    #[arg(long, default_value = "exe")]
    extension: String,

    /// Emulation runtime used to execute samples
    #[arg(long, default_value = "wine64")]
    runtime: PathBuf,

    /// Extra argument passed to the runtime before the sample path (repeatable)
    #[arg(long = "runtime-arg", allow_hyphen_values = true)]
    runtime_args: Vec<String>,

    /// Wall-clock limit for each sample
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Delay between the end of execution and inspection
    #[arg(long, default_value_t = 1000)]
    settle_ms: u64,

    /// Stop settling early once the documents directory stops changing
    #[arg(long)]
    quiescence: bool,

    /// Extra environment variable pointed at the sandbox (repeatable). USERPROFILE is always set
    #[arg(long = "home-env")]
    home_env: Vec<String>,

    /// Directory in which sandboxes are created
    #[arg(long)]
    sandbox_parent: Option<PathBuf>,

    /// Report format
    #[arg(long, short, default_value = "text")]
    format: ReportFormat,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: LogLevel,

    /// Log output format
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,
}

impl Cli {
    fn to_config(&self) -> VerifierConfig {
        let mut config = VerifierConfig::default();

        config.discovery.input_dir = self.input_dir.clone();
        config.discovery.extension = self.extension.clone();

        config.execution.runtime_program = self.runtime.clone();
        config.execution.runtime_args = self.runtime_args.clone();
        config.execution.timeout = Duration::from_secs(self.timeout_secs);
        for name in &self.home_env {
            if !config.execution.home_env_vars.contains(name) {
                config.execution.home_env_vars.push(name.clone());
            }
        }

        config.sandbox.parent_dir = self.sandbox_parent.clone();

        let settle = Duration::from_millis(self.settle_ms);
        config.inspection.settle = if self.quiescence {
            SettleStrategy::quiescence_within(settle)
        } else {
            SettleStrategy::Fixed { delay: settle }
        };

        config
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = default_log_config();
    log_config.level = cli.log_level;
    log_config.format = cli.log_format;
    if let Err(e) = init_logging(&log_config) {
        eprintln!("[!] {}", e);
    }

    let stdout = io::stdout();
    match run(&cli, &mut stdout.lock()).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("[!] Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Run the selected samples, writing reports to `out`. Input and configuration
/// errors go to stderr and only decide the exit code.
async fn run<W: Write>(cli: &Cli, out: &mut W) -> Result<ExitCode> {
    let analyzer = match DynamicAnalyzer::new(cli.to_config()) {
        Ok(analyzer) => analyzer,
        Err(e) => {
            eprintln!("[!] {}", e);
            return Ok(ExitCode::from(e.exit_code()));
        }
    };

    let selection = match resolve_samples(cli.sample.as_deref(), &analyzer.config().discovery) {
        Ok(selection) => selection,
        Err(e) => {
            eprintln!("[!] {}", e);
            return Ok(ExitCode::from(e.exit_code()));
        }
    };

    let generator = ReportGenerator::new(cli.format);

    match selection {
        SampleSelection::Single(sample) => {
            let report = analyzer.analyze_sample(&sample).await;
            let rendered = generator
                .render_sample(&report)
                .context("Failed to render sample report")?;
            writeln!(out, "{}", rendered).context("Failed to write report")?;
        }
        SampleSelection::Batch(samples) => {
            if let Some(header) = generator.batch_header(samples.len()) {
                writeln!(out, "{}", header).context("Failed to write report")?;
            }

            let summary = analyzer
                .analyze_batch_with(&samples, |report| {
                    if generator.format() != ReportFormat::Text {
                        return;
                    }
                    let written = generator
                        .render_sample(report)
                        .map_err(anyhow::Error::from)
                        .and_then(|rendered| Ok(writeln!(out, "{}", rendered)?));
                    if let Err(e) = written {
                        error!(error = %e, "Failed to write sample report");
                    }
                })
                .await;

            let rendered = generator
                .render_summary(&summary)
                .context("Failed to render batch summary")?;
            write!(out, "{}", rendered).context("Failed to write report")?;
        }
    }

    out.flush().context("Failed to flush report output")?;
    Ok(ExitCode::SUCCESS)
}
