//! Claim verification.
//!
//! Attempts to ground claims against an optional code tree: filename
//! existence, bounded substring scan, then LLM judgement. Verification
//! never gates a response; its results only annotate query output.

use crate::llm::{GenerationRequest, LlmProvider, extract_json_from_response};
use crate::models::{AtomicClaim, ClaimId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Verification stops scanning after this many files.
const MAX_SCANNED_FILES: usize = 200;

/// Files larger than this are skipped.
const MAX_FILE_BYTES: u64 = 262_144;

/// Combined signal weight needed to call a claim verified.
const VERIFIED_THRESHOLD: f32 = 0.5;

/// One piece of grounding evidence.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationSignal {
    /// Signal kind: `file_exists`, `content_match`, or `llm_judgement`.
    #[serde(rename = "type")]
    pub signal_type: String,
    /// Contribution toward the verified threshold.
    pub weight: f32,
}

/// Per-claim verification outcome.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    /// The verified claim.
    pub claim_id: ClaimId,
    /// Whether the combined signal weight crossed the threshold.
    pub verified: bool,
    /// Evidence gathered.
    pub signals: Vec<VerificationSignal>,
    /// The strongest signal kind, or `none`.
    pub method: String,
}

#[derive(Debug, Deserialize)]
struct LlmVerdict {
    #[serde(default)]
    supported: bool,
}

/// Cross-checks claims against optional code/doc evidence.
pub struct ClaimVerifier {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl ClaimVerifier {
    /// Creates a verifier.
    #[must_use]
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }

    /// Verifies a batch of claims against a code tree root.
    ///
    /// With no root, only the LLM judgement path can fire.
    #[must_use]
    pub fn verify(
        &self,
        claims: &[AtomicClaim],
        codebase_path: Option<&Path>,
    ) -> Vec<VerificationResult> {
        let files = codebase_path.map(|root| collect_files(root, MAX_SCANNED_FILES));
        claims
            .iter()
            .map(|claim| self.verify_one(claim, codebase_path, files.as_deref()))
            .collect()
    }

    fn verify_one(
        &self,
        claim: &AtomicClaim,
        root: Option<&Path>,
        files: Option<&[PathBuf]>,
    ) -> VerificationResult {
        let mut signals = Vec::new();

        if let Some(root) = root {
            for candidate in path_candidates(claim) {
                if root.join(&candidate).exists() {
                    signals.push(VerificationSignal {
                        signal_type: "file_exists".to_string(),
                        weight: 0.6,
                    });
                    break;
                }
            }
        }

        if let Some(files) = files {
            if content_matches(claim, files) {
                signals.push(VerificationSignal {
                    signal_type: "content_match".to_string(),
                    weight: 0.8,
                });
            }
        }

        if signals.is_empty() {
            if let Some(llm) = &self.llm {
                if llm_supports(llm.as_ref(), claim) {
                    signals.push(VerificationSignal {
                        signal_type: "llm_judgement".to_string(),
                        weight: 0.7,
                    });
                }
            }
        }

        let total: f32 = signals.iter().map(|s| s.weight).sum();
        let method = signals
            .iter()
            .max_by(|a, b| a.weight.total_cmp(&b.weight))
            .map_or_else(|| "none".to_string(), |s| s.signal_type.clone());

        VerificationResult {
            claim_id: claim.id,
            verified: total >= VERIFIED_THRESHOLD,
            signals,
            method,
        }
    }
}

/// Path-shaped tokens mentioned by a claim.
fn path_candidates(claim: &AtomicClaim) -> Vec<String> {
    let mut candidates = Vec::new();
    for text in [&claim.subject, &claim.object] {
        for token in text.split_whitespace() {
            let token = token.trim_matches(['`', '"', '\'', ',', '(', ')']);
            let looks_like_path = token.contains('/')
                || Path::new(token)
                    .extension()
                    .is_some_and(|ext| !ext.is_empty());
            if looks_like_path && !token.is_empty() {
                candidates.push(token.to_string());
            }
        }
    }
    candidates
}

/// Bounded recursive file listing, skipping hidden and build dirs.
fn collect_files(root: &Path, limit: usize) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        if files.len() >= limit {
            break;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            if files.len() >= limit {
                break;
            }
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || name == "target" || name == "node_modules" {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files
}

/// Grep-level substring match of the claim against the scanned files.
fn content_matches(claim: &AtomicClaim, files: &[PathBuf]) -> bool {
    let needles: Vec<&str> = [claim.original_text.as_str(), claim.object.as_str()]
        .into_iter()
        .filter(|n| n.len() >= 4)
        .collect();
    if needles.is_empty() {
        return false;
    }

    for path in files {
        let small_enough = std::fs::metadata(path)
            .map(|m| m.len() <= MAX_FILE_BYTES)
            .unwrap_or(false);
        if !small_enough {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(path) else {
            continue;
        };
        let lowered = content.to_lowercase();
        if needles
            .iter()
            .any(|needle| lowered.contains(&needle.to_lowercase()))
        {
            return true;
        }
    }
    false
}

fn llm_supports(llm: &dyn LlmProvider, claim: &AtomicClaim) -> bool {
    let request = GenerationRequest::new(format!(
        "Claim: {}\nIs this claim plausibly supported as stated?\n\
         Respond with ONLY JSON: {{\"supported\": true}} or {{\"supported\": false}}",
        claim.as_sentence()
    ))
    .with_temperature(0.0)
    .with_max_tokens(32);

    match llm.generate(&request) {
        Ok(response) => {
            serde_json::from_str::<LlmVerdict>(extract_json_from_response(&response))
                .map(|v| v.supported)
                .unwrap_or(false)
        },
        Err(err) => {
            tracing::debug!("claim verification skipping LLM judgement: {err}");
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentId, SectionId};
    use chrono::Utc;

    fn claim(subject: &str, object: &str, original: &str) -> AtomicClaim {
        AtomicClaim {
            id: ClaimId::new(),
            document_id: DocumentId::new(),
            section_id: SectionId::new(),
            subject: subject.to_string(),
            predicate: "is".to_string(),
            object: object.to_string(),
            original_text: original.to_string(),
            paraphrased: false,
            confidence: 0.8,
            deprecated: false,
            deprecated_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_file_exists_signal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "retries = 3\n").unwrap();

        let verifier = ClaimVerifier::new(None);
        let claims = vec![claim("config.toml", "the config file", "config.toml holds settings")];
        let results = verifier.verify(&claims, Some(dir.path()));
        assert!(results[0].verified);
        assert_eq!(results[0].method, "file_exists");
    }

    #[test]
    fn test_content_match_signal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("settings.rs"), "pub const RETRIES: u32 = 3;\n").unwrap();

        let verifier = ClaimVerifier::new(None);
        let claims = vec![claim("the service", "RETRIES", "RETRIES")];
        let results = verifier.verify(&claims, Some(dir.path()));
        assert!(results[0].verified);
        assert_eq!(results[0].method, "content_match");
    }

    #[test]
    fn test_unverifiable_claim() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = ClaimVerifier::new(None);
        let claims = vec![claim("the moon", "made of cheese", "The moon is made of cheese.")];
        let results = verifier.verify(&claims, Some(dir.path()));
        assert!(!results[0].verified);
        assert_eq!(results[0].method, "none");
        assert!(results[0].signals.is_empty());
    }

    #[test]
    fn test_no_codebase_no_llm() {
        let verifier = ClaimVerifier::new(None);
        let claims = vec![claim("x", "y", "x is y")];
        let results = verifier.verify(&claims, None);
        assert!(!results[0].verified);
    }
}
