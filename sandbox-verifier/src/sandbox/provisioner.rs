/// Per-sample sandbox provisioning
///
/// A sandbox is a fresh temporary directory laid out like a user profile:
/// the sample is staged at its root and a `Documents` subdirectory holds one
/// decoy file with known content. The directory lives exactly as long as the
/// `Sandbox` value; `teardown` removes it and reports failures, and dropping
/// an un-torn-down sandbox removes it as well. Drop also runs while a panic
/// unwinds, so the workspace profiles must not set `panic = "abort"`.
use shared::{VerifierError, VerifierResult};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::config::SandboxSettings;

pub struct Sandbox {
    dir: TempDir,
    documents_dir: PathBuf,
    seed_file: PathBuf,
    seed_content: String,
}

impl Sandbox {
    /// Create a new sandbox tree. Nothing outside the new directory is touched.
    pub fn provision(settings: &SandboxSettings) -> VerifierResult<Self> {
        let parent = settings
            .parent_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);

        let dir = tempfile::Builder::new()
            .prefix(&settings.dir_prefix)
            .tempdir_in(&parent)
            .map_err(|e| VerifierError::provisioning(&parent, e))?;

        // From here on, an early return drops `dir` and removes the partial tree.
        let documents_dir = dir.path().join(&settings.documents_dir_name);
        fs::create_dir(&documents_dir)
            .map_err(|e| VerifierError::provisioning(&documents_dir, e))?;

        let seed_file = documents_dir.join(&settings.seed_file_name);
        let seed_content = settings.seed_content();
        fs::write(&seed_file, seed_content.as_bytes())
            .map_err(|e| VerifierError::provisioning(&seed_file, e))?;

        info!(sandbox = %dir.path().display(), "Sandbox provisioned");

        Ok(Self {
            dir,
            documents_dir,
            seed_file,
            seed_content,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    pub fn seed_file(&self) -> &Path {
        &self.seed_file
    }

    pub fn seed_content(&self) -> &str {
        &self.seed_content
    }

    /// Copy the sample into the sandbox root and mark it executable.
    ///
    /// The copy's mode is set explicitly; the source's permissions are not relied on.
    pub fn stage_sample(&self, sample: &Path) -> VerifierResult<PathBuf> {
        let file_name = sample.file_name().ok_or_else(|| {
            VerifierError::InvalidInput(format!("Sample has no file name: {}", sample.display()))
        })?;

        let staged = self.root().join(file_name);
        if staged == self.documents_dir {
            return Err(VerifierError::InvalidInput(format!(
                "Sample name collides with the documents directory: {}",
                sample.display()
            )));
        }

        fs::copy(sample, &staged).map_err(|e| VerifierError::provisioning(&staged, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&staged, fs::Permissions::from_mode(0o755))
                .map_err(|e| VerifierError::provisioning(&staged, e))?;
        }

        debug!(staged = %staged.display(), "Sample staged");
        Ok(staged)
    }

    /// Remove the sandbox tree.
    pub fn teardown(self) -> VerifierResult<()> {
        let root = self.root().to_path_buf();
        self.dir
            .close()
            .map_err(|e| VerifierError::Cleanup { path: root.clone(), source: e })?;
        debug!(sandbox = %root.display(), "Sandbox removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings_in(parent: &Path) -> SandboxSettings {
        SandboxSettings {
            parent_dir: Some(parent.to_path_buf()),
            ..SandboxSettings::default()
        }
    }

    #[test]
    fn test_provision_creates_documents_and_seed() {
        let parent = TempDir::new().unwrap();
        let sandbox = Sandbox::provision(&settings_in(parent.path())).unwrap();

        assert!(sandbox.root().starts_with(parent.path()));
        let root_name = sandbox.root().file_name().unwrap().to_string_lossy().into_owned();
        assert!(root_name.starts_with("malware_test_"));
        assert!(sandbox.documents_dir().is_dir());

        let content = fs::read_to_string(sandbox.seed_file()).unwrap();
        assert_eq!(content, SandboxSettings::default().seed_content());
        assert_eq!(content, sandbox.seed_content());
    }

    #[test]
    fn test_each_sandbox_is_unique() {
        let parent = TempDir::new().unwrap();
        let settings = settings_in(parent.path());
        let a = Sandbox::provision(&settings).unwrap();
        let b = Sandbox::provision(&settings).unwrap();
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn test_teardown_removes_tree() {
        let parent = TempDir::new().unwrap();
        let sandbox = Sandbox::provision(&settings_in(parent.path())).unwrap();
        let root = sandbox.root().to_path_buf();
        fs::write(sandbox.documents_dir().join("extra.bin"), b"data").unwrap();

        sandbox.teardown().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_drop_removes_tree() {
        let parent = TempDir::new().unwrap();
        let root = {
            let sandbox = Sandbox::provision(&settings_in(parent.path())).unwrap();
            sandbox.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[test]
    fn test_panic_during_run_still_removes_tree() {
        let parent = TempDir::new().unwrap();
        let settings = settings_in(parent.path());

        let outcome = std::panic::catch_unwind(|| {
            let sandbox = Sandbox::provision(&settings).unwrap();
            fs::write(sandbox.documents_dir().join("half.encrypted"), b"x").unwrap();
            panic!("run aborted");
        });

        assert!(outcome.is_err());
        assert_eq!(fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_provision_fails_for_missing_parent() {
        let parent = TempDir::new().unwrap();
        let missing = parent.path().join("does-not-exist");
        let err = Sandbox::provision(&settings_in(&missing)).err().unwrap();
        assert!(matches!(err, VerifierError::Provisioning { .. }));
        assert!(!missing.exists());
    }

    #[test]
    fn test_stage_sample_copies_and_marks_executable() {
        let parent = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        let sample = source_dir.path().join("variant.exe");
        fs::write(&sample, b"MZ-not-really").unwrap();

        let sandbox = Sandbox::provision(&settings_in(parent.path())).unwrap();
        let staged = sandbox.stage_sample(&sample).unwrap();

        assert_eq!(staged, sandbox.root().join("variant.exe"));
        assert_eq!(fs::read(&staged).unwrap(), b"MZ-not-really");
        // The original is left alone.
        assert!(sample.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&staged).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_stage_sample_rejects_documents_name() {
        let parent = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        let sample = source_dir.path().join("Documents");
        fs::write(&sample, b"x").unwrap();

        let sandbox = Sandbox::provision(&settings_in(parent.path())).unwrap();
        assert!(matches!(
            sandbox.stage_sample(&sample),
            Err(VerifierError::InvalidInput(_))
        ));
    }
}
