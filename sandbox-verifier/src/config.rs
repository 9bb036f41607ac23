/// Configuration module for the sandbox verifier
///
/// Every value has a default matching the behaviour researchers expect from
/// the tool out of the box; the binary only overrides what the command line
/// asks for. There is no configuration file.
use serde::{Deserialize, Serialize};
use shared::observability::LogConfig;
use shared::{VerifierError, VerifierResult};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifierConfig {
    pub sandbox: SandboxSettings,
    pub execution: ExecutionSettings,
    pub inspection: InspectionSettings,
    pub discovery: DiscoverySettings,
}

impl VerifierConfig {
    /// Validate configuration
    pub fn validate(&self) -> VerifierResult<()> {
        self.sandbox.validate()?;
        self.execution.validate()?;
        self.inspection.validate()?;
        self.discovery.validate()?;
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> VerifierError {
    VerifierError::Configuration(msg.into())
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\') && name != "." && name != ".."
}

/// Layout of the per-sample sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Where sandboxes are created; the system temp dir when unset
    pub parent_dir: Option<PathBuf>,
    pub dir_prefix: String,
    pub documents_dir_name: String,
    pub seed_file_name: String,
    pub seed_line: String,
    pub seed_repeat: usize,
}

impl SandboxSettings {
    /// Content written to the decoy document
    pub fn seed_content(&self) -> String {
        self.seed_line.repeat(self.seed_repeat)
    }

    pub fn validate(&self) -> VerifierResult<()> {
        if !is_plain_file_name(&self.dir_prefix) {
            return Err(invalid("Sandbox directory prefix must be a plain name"));
        }
        if !is_plain_file_name(&self.documents_dir_name) {
            return Err(invalid("Documents directory name must be a plain name"));
        }
        if !is_plain_file_name(&self.seed_file_name) {
            return Err(invalid("Seed file name must be a plain name"));
        }
        if self.seed_line.is_empty() || self.seed_repeat < 2 {
            return Err(invalid(
                "Seed content must be at least two non-empty lines",
            ));
        }
        Ok(())
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            parent_dir: None,
            dir_prefix: "malware_test_".to_string(),
            documents_dir_name: "Documents".to_string(),
            seed_file_name: "test.txt".to_string(),
            seed_line: "This is a test file that should be encrypted.\n".to_string(),
            seed_repeat: 5,
        }
    }
}

/// How the sample is launched under the emulation runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    pub runtime_program: PathBuf,
    /// Arguments placed between the runtime program and the sample path
    pub runtime_args: Vec<String>,
    pub timeout: Duration,
    /// Variables pointed at the sandbox root in the child's environment
    pub home_env_vars: Vec<String>,
    /// How long to keep reading output pipes once the child is gone
    pub output_drain_grace: Duration,
    pub max_output_bytes: usize,
}

impl ExecutionSettings {
    pub fn validate(&self) -> VerifierResult<()> {
        if self.runtime_program.as_os_str().is_empty() {
            return Err(invalid("Emulation runtime program cannot be empty"));
        }
        if self.timeout.is_zero() {
            return Err(invalid("Execution timeout must be greater than zero"));
        }
        if self.home_env_vars.is_empty() {
            return Err(invalid(
                "At least one home environment variable must be redirected",
            ));
        }
        for name in &self.home_env_vars {
            if name.is_empty() || name.contains('=') || name.contains('\0') {
                return Err(invalid(format!("Invalid environment variable name: {:?}", name)));
            }
        }
        Ok(())
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            runtime_program: PathBuf::from("wine64"),
            runtime_args: Vec::new(),
            timeout: Duration::from_secs(10),
            home_env_vars: vec!["USERPROFILE".to_string()],
            output_drain_grace: Duration::from_millis(500),
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Wait applied between the end of execution and artifact inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SettleStrategy {
    Fixed {
        delay: Duration,
    },
    /// Stop waiting once the documents directory stops changing, bounded by `ceiling`
    Quiescence {
        poll_interval: Duration,
        quiet_window: Duration,
        ceiling: Duration,
    },
}

impl SettleStrategy {
    /// Quiescence polling bounded by the given fixed delay
    pub fn quiescence_within(ceiling: Duration) -> Self {
        SettleStrategy::Quiescence {
            poll_interval: Duration::from_millis(100),
            quiet_window: Duration::from_millis(300).min(ceiling),
            ceiling,
        }
    }

    /// Longest time this strategy can wait
    pub fn ceiling(&self) -> Duration {
        match *self {
            SettleStrategy::Fixed { delay } => delay,
            SettleStrategy::Quiescence { ceiling, .. } => ceiling,
        }
    }
}

impl Default for SettleStrategy {
    fn default() -> Self {
        SettleStrategy::Fixed {
            delay: Duration::from_secs(1),
        }
    }
}

/// What counts as evidence after the run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionSettings {
    pub encrypted_suffix: String,
    pub ransom_note_name: String,
    pub preview_chars: usize,
    pub settle: SettleStrategy,
}

impl InspectionSettings {
    pub fn validate(&self) -> VerifierResult<()> {
        if self.encrypted_suffix.is_empty() {
            return Err(invalid("Encrypted file suffix cannot be empty"));
        }
        if !is_plain_file_name(&self.ransom_note_name) {
            return Err(invalid("Ransom note name must be a plain name"));
        }
        if let SettleStrategy::Quiescence {
            poll_interval,
            quiet_window,
            ceiling,
        } = self.settle
        {
            if poll_interval.is_zero() {
                return Err(invalid("Quiescence poll interval must be greater than zero"));
            }
            if quiet_window > ceiling {
                return Err(invalid("Quiescence window cannot exceed the settle ceiling"));
            }
        }
        Ok(())
    }
}

impl Default for InspectionSettings {
    fn default() -> Self {
        Self {
            encrypted_suffix: ".encrypted".to_string(),
            ransom_note_name: "README_ENCRYPTED.txt".to_string(),
            preview_chars: 80,
            settle: SettleStrategy::default(),
        }
    }
}

/// Batch-mode sample discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    pub input_dir: PathBuf,
    /// Extension without the leading dot, matched case-sensitively
    pub extension: String,
}

impl DiscoverySettings {
    pub fn validate(&self) -> VerifierResult<()> {
        if self.extension.is_empty() || self.extension.starts_with('.') {
            return Err(invalid("Sample extension must be non-empty and given without a dot"));
        }
        Ok(())
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("generated_malware"),
            extension: "exe".to_string(),
        }
    }
}

/// Logging defaults for the binary
pub fn default_log_config() -> LogConfig {
    LogConfig {
        service_name: "verify-malicious".to_string(),
        ..LogConfig::default()
    }
}
