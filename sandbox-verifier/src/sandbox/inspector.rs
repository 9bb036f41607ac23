/// Post-run inspection of the sandbox documents directory
///
/// Inspection is read-only. It looks for two kinds of evidence:
/// - files whose name carries the encryption marker suffix
/// - the well-known ransom note, with its size and a short preview
///
/// The state of the decoy seed file is recorded as well, for the report only.
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use shared::{VerifierError, VerifierResult};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{InspectionSettings, SettleStrategy};
use crate::models::{ArtifactSet, RansomNote, SeedFileState};

type DirSnapshot = BTreeMap<OsString, (u64, Option<SystemTime>)>;

pub struct ArtifactInspector {
    settings: InspectionSettings,
}

impl ArtifactInspector {
    pub fn new(settings: InspectionSettings) -> Self {
        Self { settings }
    }

    /// Give background writers of the sample time to land. Returns the time waited.
    pub async fn settle(&self, documents_dir: &Path) -> Duration {
        let started = Instant::now();

        match self.settings.settle {
            SettleStrategy::Fixed { delay } => sleep(delay).await,
            SettleStrategy::Quiescence {
                poll_interval,
                quiet_window,
                ceiling,
            } => {
                let deadline = started + ceiling;
                let mut last = snapshot(documents_dir);
                let mut quiet_since = Instant::now();

                loop {
                    let now = Instant::now();
                    if now >= deadline || now.duration_since(quiet_since) >= quiet_window {
                        break;
                    }
                    sleep(poll_interval.min(deadline - now)).await;

                    let current = snapshot(documents_dir);
                    if current != last {
                        last = current;
                        quiet_since = Instant::now();
                    }
                }
            }
        }

        let waited = started.elapsed();
        debug!("Settled for {:?}", waited);
        waited
    }

    /// Collect the artifact set from the documents directory.
    ///
    /// A documents directory that no longer exists is not an error; it yields
    /// an empty artifact set.
    pub fn inspect(
        &self,
        documents_dir: &Path,
        seed_file: &Path,
        seed_content: &str,
    ) -> VerifierResult<ArtifactSet> {
        let entries = match fs::read_dir(documents_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(dir = %documents_dir.display(), "Documents directory is gone");
                return Ok(ArtifactSet::documents_removed());
            }
            Err(e) => return Err(VerifierError::inspection(documents_dir, e)),
        };

        let mut encrypted_files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| VerifierError::inspection(documents_dir, e))?;
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(&self.settings.encrypted_suffix) {
                encrypted_files.push(entry.path());
            }
        }
        encrypted_files.sort();

        let ransom_note = self.read_ransom_note(&documents_dir.join(&self.settings.ransom_note_name))?;
        let seed_file = seed_state(seed_file, seed_content);

        info!(
            encrypted = encrypted_files.len(),
            ransom_note = ransom_note.is_some(),
            seed = ?seed_file,
            "Inspection complete"
        );

        Ok(ArtifactSet {
            encrypted_files,
            ransom_note,
            seed_file,
            documents_dir_present: true,
        })
    }

    /// Presence comes from the link itself; only a regular file is opened for the preview.
    fn read_ransom_note(&self, path: &Path) -> VerifierResult<Option<RansomNote>> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(VerifierError::inspection(path, e)),
        };

        let preview = if metadata.file_type().is_file() {
            match read_preview(path, self.settings.preview_chars) {
                Ok(preview) => preview,
                Err(e) => {
                    warn!(note = %path.display(), error = %e, "Ransom note present but unreadable");
                    String::new()
                }
            }
        } else {
            warn!(
                note = %path.display(),
                file_type = ?metadata.file_type(),
                "Ransom note is not a regular file, skipping preview"
            );
            String::new()
        };

        Ok(Some(RansomNote {
            path: PathBuf::from(path),
            size_bytes: metadata.len(),
            preview,
        }))
    }
}

/// First `chars` characters of a file, decoded lossily.
fn read_preview(path: &Path, chars: usize) -> std::io::Result<String> {
    let mut head = Vec::new();
    // Four bytes per character covers any UTF-8 sequence.
    File::open(path)?
        .take((chars as u64).saturating_mul(4))
        .read_to_end(&mut head)?;
    Ok(String::from_utf8_lossy(&head).chars().take(chars).collect())
}

/// Anything other than a regular file holding exactly `expected` counts as modified.
/// Links and special files are never opened.
fn seed_state(seed_file: &Path, expected: &str) -> SeedFileState {
    let metadata = match fs::symlink_metadata(seed_file) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return SeedFileState::Missing,
        Err(_) => return SeedFileState::Unknown,
    };

    if !metadata.file_type().is_file() || metadata.len() != expected.len() as u64 {
        return SeedFileState::Modified;
    }

    let mut content = Vec::with_capacity(expected.len());
    let read = File::open(seed_file).and_then(|file| {
        file.take(expected.len() as u64 + 1).read_to_end(&mut content)
    });

    match read {
        Ok(_) if content == expected.as_bytes() => SeedFileState::Intact,
        Ok(_) => SeedFileState::Modified,
        Err(_) => SeedFileState::Unknown,
    }
}

/// Name, size and mtime of every entry; empty when the directory is unreadable.
fn snapshot(dir: &Path) -> DirSnapshot {
    let Ok(entries) = fs::read_dir(dir) else {
        return DirSnapshot::new();
    };

    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            let meta = entry.metadata().ok();
            let len = meta.as_ref().map(|m| m.len()).unwrap_or(0);
            let modified = meta.and_then(|m| m.modified().ok());
            (entry.file_name(), (len, modified))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const SEED: &str = "line one\nline two\n";

    fn documents() -> (TempDir, PathBuf, PathBuf) {
        let root = TempDir::new().unwrap();
        let docs = root.path().join("Documents");
        fs::create_dir(&docs).unwrap();
        let seed = docs.join("test.txt");
        fs::write(&seed, SEED).unwrap();
        (root, docs, seed)
    }

    fn inspector() -> ArtifactInspector {
        ArtifactInspector::new(InspectionSettings::default())
    }

    #[test]
    fn test_untouched_documents_have_no_artifacts() {
        let (_root, docs, seed) = documents();
        let artifacts = inspector().inspect(&docs, &seed, SEED).unwrap();

        assert_eq!(
            artifacts,
            ArtifactSet {
                encrypted_files: Vec::new(),
                ransom_note: None,
                seed_file: SeedFileState::Intact,
                documents_dir_present: true,
            }
        );
    }

    #[test]
    fn test_finds_encrypted_files_sorted() {
        let (_root, docs, seed) = documents();
        fs::write(docs.join("b.docx.encrypted"), b"\x00\x01").unwrap();
        fs::write(docs.join("test.txt.encrypted"), b"\x02\x03").unwrap();
        fs::write(docs.join("notes.encrypted.bak"), b"x").unwrap();
        fs::remove_file(&seed).unwrap();

        let artifacts = inspector().inspect(&docs, &seed, SEED).unwrap();
        assert_eq!(
            artifacts.encrypted_file_names(),
            vec!["b.docx.encrypted".to_string(), "test.txt.encrypted".to_string()]
        );
        assert_eq!(artifacts.seed_file, SeedFileState::Missing);
        assert!(artifacts.ransom_note.is_none());
    }

    #[test]
    fn test_reads_ransom_note_size_and_preview() {
        let (_root, docs, seed) = documents();
        let note = "Your files have been encrypted! ".repeat(10);
        fs::write(docs.join("README_ENCRYPTED.txt"), &note).unwrap();

        let artifacts = inspector().inspect(&docs, &seed, SEED).unwrap();
        assert_eq!(artifacts.encrypted_count(), 0);
        let found = artifacts.ransom_note.as_ref().expect("note should be found");
        assert_eq!(found.size_bytes, note.len() as u64);
        assert_eq!(found.preview.chars().count(), 80);
        assert!(note.starts_with(&found.preview));
    }

    #[test]
    fn test_short_note_preview_is_whole_note() {
        let (_root, docs, seed) = documents();
        fs::write(docs.join("README_ENCRYPTED.txt"), "pay up").unwrap();

        let artifacts = inspector().inspect(&docs, &seed, SEED).unwrap();
        assert_eq!(artifacts.ransom_note.unwrap().preview, "pay up");
    }

    #[test]
    fn test_missing_documents_dir_is_empty_not_error() {
        let (_root, docs, seed) = documents();
        fs::remove_dir_all(&docs).unwrap();

        let artifacts = inspector().inspect(&docs, &seed, SEED).unwrap();
        assert_eq!(artifacts, ArtifactSet::documents_removed());
    }

    #[test]
    fn test_modified_seed_is_reported() {
        let (_root, docs, seed) = documents();
        fs::write(&seed, "line one\n").unwrap();

        let artifacts = inspector().inspect(&docs, &seed, SEED).unwrap();
        assert_eq!(artifacts.seed_file, SeedFileState::Modified);
        assert_eq!(artifacts.encrypted_count(), 0);
    }

    #[test]
    fn test_same_length_seed_with_other_content_is_modified() {
        let (_root, docs, seed) = documents();
        fs::write(&seed, "LINE ONE\nLINE TWO\n").unwrap();

        let artifacts = inspector().inspect(&docs, &seed, SEED).unwrap();
        assert_eq!(artifacts.seed_file, SeedFileState::Modified);
    }

    #[cfg(unix)]
    mod special_files {
        use super::*;
        use pretty_assertions::assert_eq;
        use crate::analyzers::classify;
        use nix::sys::stat::Mode;
        use nix::unistd::mkfifo;
        use std::os::unix::fs::symlink;
        use std::sync::mpsc;

        /// Run inspection on a worker thread so a blocking open fails the test instead of hanging it.
        fn inspect_within(docs: PathBuf, seed: PathBuf, limit: Duration) -> ArtifactSet {
            let (tx, rx) = mpsc::channel();
            std::thread::spawn(move || {
                let _ = tx.send(inspector().inspect(&docs, &seed, SEED));
            });
            rx.recv_timeout(limit)
                .expect("inspection blocked on a special file")
                .unwrap()
        }

        #[test]
        fn test_fifo_seed_is_modified_without_blocking() {
            let (_root, docs, seed) = documents();
            fs::remove_file(&seed).unwrap();
            mkfifo(&seed, Mode::S_IRWXU).unwrap();

            let artifacts = inspect_within(docs, seed, Duration::from_secs(3));
            assert_eq!(artifacts.seed_file, SeedFileState::Modified);
        }

        #[test]
        fn test_seed_symlinked_to_device_is_not_read() {
            let (_root, docs, seed) = documents();
            fs::remove_file(&seed).unwrap();
            symlink("/dev/zero", &seed).unwrap();

            let artifacts = inspect_within(docs, seed, Duration::from_secs(3));
            assert_eq!(artifacts.seed_file, SeedFileState::Modified);
        }

        #[test]
        fn test_fifo_ransom_note_still_counts_as_evidence() {
            let (_root, docs, seed) = documents();
            mkfifo(&docs.join("README_ENCRYPTED.txt"), Mode::S_IRWXU).unwrap();

            let artifacts = inspect_within(docs, seed, Duration::from_secs(3));
            let note = artifacts.ransom_note.as_ref().expect("note should be found");
            assert_eq!(note.preview, "");
            assert_eq!(artifacts.seed_file, SeedFileState::Intact);
            assert!(classify(artifacts).is_malicious);
        }

        #[test]
        fn test_symlinked_ransom_note_is_not_followed() {
            let (_root, docs, seed) = documents();
            symlink("/dev/zero", docs.join("README_ENCRYPTED.txt")).unwrap();

            let artifacts = inspect_within(docs, seed, Duration::from_secs(3));
            assert_eq!(artifacts.ransom_note.as_ref().unwrap().preview, "");
            assert!(classify(artifacts).is_malicious);
        }
    }

    #[test]
    fn test_inspection_does_not_mutate() {
        let (_root, docs, seed) = documents();
        fs::write(docs.join("x.encrypted"), b"x").unwrap();
        let before = snapshot(&docs);

        inspector().inspect(&docs, &seed, SEED).unwrap();
        assert_eq!(snapshot(&docs), before);
    }

    #[tokio::test]
    async fn test_fixed_settle_waits_full_delay() {
        let (_root, docs, _seed) = documents();
        let mut settings = InspectionSettings::default();
        settings.settle = SettleStrategy::Fixed {
            delay: Duration::from_millis(150),
        };

        let waited = ArtifactInspector::new(settings).settle(&docs).await;
        assert!(waited >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_quiescence_returns_early_when_idle() {
        let (_root, docs, _seed) = documents();
        let mut settings = InspectionSettings::default();
        settings.settle = SettleStrategy::Quiescence {
            poll_interval: Duration::from_millis(20),
            quiet_window: Duration::from_millis(100),
            ceiling: Duration::from_secs(5),
        };

        let waited = ArtifactInspector::new(settings).settle(&docs).await;
        assert!(waited >= Duration::from_millis(100));
        assert!(waited < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_quiescence_bounded_by_ceiling_while_writes_continue() {
        let (_root, docs, _seed) = documents();
        let writer_dir = docs.clone();
        let writer = tokio::spawn(async move {
            for i in 0..100 {
                let _ = fs::write(writer_dir.join(format!("chunk{}.encrypted", i)), b"x");
                sleep(Duration::from_millis(10)).await;
            }
        });

        let mut settings = InspectionSettings::default();
        settings.settle = SettleStrategy::Quiescence {
            poll_interval: Duration::from_millis(20),
            quiet_window: Duration::from_millis(200),
            ceiling: Duration::from_millis(400),
        };

        let waited = ArtifactInspector::new(settings).settle(&docs).await;
        writer.abort();
        assert!(waited >= Duration::from_millis(400));
        assert!(waited < Duration::from_millis(1000));
    }
}
