//! Pipeline services: claim extraction, entity resolution, conflict
//! detection, merging, overlap analysis, verification, and answer
//! synthesis.

pub mod conflicts;
pub mod entities;
pub mod extraction;
pub mod merge;
pub mod overlap;
pub mod synthesis;
pub mod verification;

pub use conflicts::ConflictDetector;
pub use entities::EntityResolver;
pub use extraction::{ClaimDraft, ClaimExtractor, ExtractionOutcome};
pub use merge::{MergeEngine, MergeInput, MergeOutcome, PendingConflict, ResolvedConflict};
pub use overlap::{ClusterReport, OverlapAnalyzer};
pub use synthesis::{AnswerSynthesizer, ScoredSource, SynthesizedAnswer, truncate_excerpt};
pub use verification::{ClaimVerifier, VerificationResult, VerificationSignal};
