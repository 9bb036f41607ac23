use crate::models::{ArtifactSet, SeedFileState, Verdict};

/// Decide whether the artifacts prove malicious behaviour.
///
/// Either signal is enough: at least one encrypted file, or a ransom note.
/// The seed file's fate is reported as an indicator but never decides the verdict.
pub fn classify(artifacts: ArtifactSet) -> Verdict {
    let is_malicious = artifacts.encrypted_count() > 0 || artifacts.ransom_note.is_some();
    let indicators = indicators(&artifacts);

    Verdict {
        is_malicious,
        artifacts,
        indicators,
    }
}

fn indicators(artifacts: &ArtifactSet) -> Vec<String> {
    let mut indicators = Vec::new();

    for name in artifacts.encrypted_file_names() {
        indicators.push(format!("Encrypted file: {}", name));
    }

    if let Some(note) = &artifacts.ransom_note {
        indicators.push(format!("Ransom note ({} bytes)", note.size_bytes));
    }

    if !artifacts.documents_dir_present {
        indicators.push("Documents directory missing after run".to_string());
    } else {
        match artifacts.seed_file {
            SeedFileState::Missing => indicators.push("Seed file removed".to_string()),
            SeedFileState::Modified => indicators.push("Seed file modified".to_string()),
            SeedFileState::Intact | SeedFileState::Unknown => {}
        }
    }

    indicators
}
