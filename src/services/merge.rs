//! The merge engine.
//!
//! Combines sections from multiple documents under a declared strategy,
//! routes detected conflicts into auto / pending-review / human-required
//! buckets, resolves the auto bucket, and renders the merged document
//! with a provenance map.

use crate::models::{
    AtomicClaim, ClaimId, Conflict, ConflictType, Document, DocumentFormat, DocumentId,
    MergeStrategy, Section, normalize_term,
};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// Everything a merge needs, assembled by the orchestrator.
pub struct MergeInput<'a> {
    /// Ordered source documents.
    pub sources: &'a [Document],
    /// Sections per source document.
    pub sections: &'a HashMap<DocumentId, Vec<Section>>,
    /// All claims across the sources.
    pub claims: &'a [AtomicClaim],
    /// Detected conflicts among those claims.
    pub conflicts: &'a [Conflict],
    /// Merge strategy.
    pub strategy: MergeStrategy,
    /// Explicit document priority for `authority_wins`.
    pub authority_order: Option<&'a [DocumentId]>,
    /// Minimum conflict confidence for auto resolution.
    pub conflict_confidence_threshold: f32,
    /// Conflicts below this strength auto-resolve.
    pub auto_resolve_below: f32,
    /// Conflicts above this strength require human review.
    pub require_human_above: f32,
    /// Requested output format.
    pub output_format: DocumentFormat,
    /// Whether rendered output carries source annotations.
    pub include_provenance: bool,
}

/// An auto-resolved conflict.
#[derive(Debug, Clone)]
pub struct ResolvedConflict {
    /// The conflict.
    pub conflict: Conflict,
    /// The claim the strategy kept.
    pub winner: ClaimId,
}

/// A conflict surfaced for review.
#[derive(Debug, Clone)]
pub struct PendingConflict {
    /// The conflict.
    pub conflict: Conflict,
    /// Whether its strength mandates human review.
    pub requires_human: bool,
}

/// One section of the merged output.
#[derive(Debug, Clone)]
pub struct MergedSection {
    /// Section header (original casing of the base section).
    pub header: String,
    /// Merged content.
    pub content: String,
    /// Heading level for rendering.
    pub level: u8,
    /// Source documents this section was built from; never empty.
    pub provenance: Vec<DocumentId>,
}

/// The result of a merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Title for the output document.
    pub title: String,
    /// Rendered content in the requested format.
    pub content: String,
    /// The format `content` was rendered in.
    pub format: DocumentFormat,
    /// Merged sections in output order.
    pub sections: Vec<MergedSection>,
    /// Header → contributing source documents.
    pub provenance_map: BTreeMap<String, Vec<DocumentId>>,
    /// Auto-resolved conflicts.
    pub resolved: Vec<ResolvedConflict>,
    /// Conflicts awaiting review.
    pub pending: Vec<PendingConflict>,
    /// Sections contributed per source document.
    pub sections_used: HashMap<DocumentId, u32>,
    /// Claims carried into the output per source document.
    pub claims_included: HashMap<DocumentId, u32>,
}

/// Stateless merge engine.
pub struct MergeEngine;

impl MergeEngine {
    /// Merges the sources.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when no sources are given, and
    /// [`Error::Internal`] when the rendered output fails its round-trip
    /// check.
    pub fn merge(input: &MergeInput<'_>) -> Result<MergeOutcome> {
        if input.sources.is_empty() {
            return Err(Error::InvalidInput("no source documents to merge".to_string()));
        }

        let doc_by_id: HashMap<DocumentId, &Document> =
            input.sources.iter().map(|d| (d.id, d)).collect();
        let claim_by_id: HashMap<ClaimId, &AtomicClaim> =
            input.claims.iter().map(|c| (c.id, c)).collect();
        let section_header: HashMap<_, _> = input
            .sections
            .values()
            .flatten()
            .map(|s| (s.id, normalize_term(&s.header)))
            .collect();

        let (resolved, pending) = route_conflicts(input, &doc_by_id, &claim_by_id);

        // Per-document wins in each header group drive the smart
        // strategy's base-section choice.
        let mut wins: HashMap<(String, DocumentId), u32> = HashMap::new();
        for r in &resolved {
            if let Some(claim) = claim_by_id.get(&r.winner) {
                if let Some(header) = section_header.get(&claim.section_id) {
                    *wins.entry((header.clone(), claim.document_id)).or_default() += 1;
                }
            }
        }

        let groups = group_sections(input);
        let mut sections = Vec::with_capacity(groups.len());
        let mut provenance_map = BTreeMap::new();
        let mut sections_used: HashMap<DocumentId, u32> = HashMap::new();

        for group in &groups {
            let merged = merge_group(input, group, &doc_by_id, &wins);
            for doc_id in &merged.provenance {
                *sections_used.entry(*doc_id).or_default() += 1;
            }
            provenance_map.insert(
                if merged.header.is_empty() {
                    "(preamble)".to_string()
                } else {
                    merged.header.clone()
                },
                merged.provenance.clone(),
            );
            sections.push(merged);
        }

        let claims_included = count_claims_included(input, &resolved, &claim_by_id);
        let title = format!("Consolidated: {}", primary_source(input.sources).title);
        let content = render(&sections, input.output_format, input.include_provenance)?;
        verify_round_trip(&content, input.output_format, &sections)?;

        Ok(MergeOutcome {
            title,
            content,
            format: input.output_format,
            sections,
            provenance_map,
            resolved,
            pending,
            sections_used,
            claims_included,
        })
    }
}

/// The primary source: highest authority, ties to newest.
fn primary_source(sources: &[Document]) -> &Document {
    let mut best = &sources[0];
    for doc in &sources[1..] {
        if (doc.authority_level, doc.updated_at) > (best.authority_level, best.updated_at) {
            best = doc;
        }
    }
    best
}

/// Routes every non-agreement conflict into auto / pending / human
/// buckets and resolves the auto bucket by strategy.
fn route_conflicts(
    input: &MergeInput<'_>,
    doc_by_id: &HashMap<DocumentId, &Document>,
    claim_by_id: &HashMap<ClaimId, &AtomicClaim>,
) -> (Vec<ResolvedConflict>, Vec<PendingConflict>) {
    let mut resolved = Vec::new();
    let mut pending = Vec::new();

    for conflict in input.conflicts {
        if conflict.conflict_type == ConflictType::Agreement {
            continue;
        }
        let requires_human = conflict.strength > input.require_human_above;
        let auto_eligible = !requires_human
            && conflict.strength < input.auto_resolve_below
            && conflict.confidence >= input.conflict_confidence_threshold
            && input.strategy != MergeStrategy::MergeAll;

        if auto_eligible {
            if let Some(winner) = pick_winner(input, conflict, doc_by_id, claim_by_id) {
                resolved.push(ResolvedConflict {
                    conflict: conflict.clone(),
                    winner,
                });
                continue;
            }
        }
        pending.push(PendingConflict {
            conflict: conflict.clone(),
            requires_human,
        });
    }

    (resolved, pending)
}

/// Applies the per-strategy resolution rule to a single conflict.
fn pick_winner(
    input: &MergeInput<'_>,
    conflict: &Conflict,
    doc_by_id: &HashMap<DocumentId, &Document>,
    claim_by_id: &HashMap<ClaimId, &AtomicClaim>,
) -> Option<ClaimId> {
    let a = claim_by_id.get(&conflict.claim_a)?;
    let b = claim_by_id.get(&conflict.claim_b)?;
    let doc_a = doc_by_id.get(&a.document_id)?;
    let doc_b = doc_by_id.get(&b.document_id)?;

    let newer = |x: &Document, y: &Document| {
        x.updated_at.max(x.created_at) >= y.updated_at.max(y.created_at)
    };
    let authority = |x: &Document, y: &Document| {
        authority_score(input, x.id, doc_by_id) >= authority_score(input, y.id, doc_by_id)
    };

    let a_wins = match input.strategy {
        MergeStrategy::NewestWins => {
            let (ta, tb) = (
                doc_a.updated_at.max(doc_a.created_at),
                doc_b.updated_at.max(doc_b.created_at),
            );
            if ta == tb {
                authority(doc_a, doc_b)
            } else {
                ta > tb
            }
        },
        MergeStrategy::AuthorityWins => {
            if authority(doc_a, doc_b) && authority(doc_b, doc_a) {
                newer(doc_a, doc_b)
            } else {
                authority(doc_a, doc_b)
            }
        },
        MergeStrategy::Smart => {
            if (a.confidence - b.confidence).abs() < f32::EPSILON {
                if authority(doc_a, doc_b) && authority(doc_b, doc_a) {
                    newer(doc_a, doc_b)
                } else {
                    authority(doc_a, doc_b)
                }
            } else {
                a.confidence > b.confidence
            }
        },
        // merge_all retains both claims; never called for it.
        MergeStrategy::MergeAll => return None,
    };

    Some(if a_wins { conflict.claim_a } else { conflict.claim_b })
}

/// A document's merge precedence: explicit `authority_order` position
/// outranks any authority level; otherwise the level decides.
fn authority_score(
    input: &MergeInput<'_>,
    doc_id: DocumentId,
    doc_by_id: &HashMap<DocumentId, &Document>,
) -> i64 {
    if let Some(order) = input.authority_order {
        if let Some(pos) = order.iter().position(|id| *id == doc_id) {
            return i64::MAX - i64::try_from(pos).unwrap_or(0);
        }
    }
    doc_by_id
        .get(&doc_id)
        .map_or(0, |d| i64::from(d.authority_level))
}

/// A header group: sections across sources sharing a normalized header.
struct SectionGroup<'a> {
    normalized: String,
    members: Vec<&'a Section>,
}

/// Groups sections by normalized header, preserving first-seen order.
/// Headerless sections are kept only from the primary source, each as
/// its own group.
fn group_sections<'a>(input: &'a MergeInput<'_>) -> Vec<SectionGroup<'a>> {
    let primary = primary_source(input.sources).id;
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, Vec<&Section>> = HashMap::new();

    for source in input.sources {
        let Some(sections) = input.sections.get(&source.id) else {
            continue;
        };
        for section in sections {
            let normalized = normalize_term(&section.header);
            let key = if normalized.is_empty() {
                if source.id != primary {
                    continue;
                }
                format!("(preamble {})", section.section_order)
            } else {
                normalized
            };
            if !by_key.contains_key(&key) {
                order.push(key.clone());
            }
            by_key.entry(key).or_default().push(section);
        }
    }

    order
        .into_iter()
        .map(|key| {
            let members = by_key.remove(&key).unwrap_or_default();
            SectionGroup {
                normalized: key,
                members,
            }
        })
        .collect()
}

/// Merges one header group into an output section.
fn merge_group(
    input: &MergeInput<'_>,
    group: &SectionGroup<'_>,
    doc_by_id: &HashMap<DocumentId, &Document>,
    wins: &HashMap<(String, DocumentId), u32>,
) -> MergedSection {
    let base = pick_base(input, group, doc_by_id, wins);
    let mut content = base.content.trim_end().to_string();
    let mut provenance = vec![base.document_id];

    if input.strategy == MergeStrategy::MergeAll {
        let mut known: Vec<String> = paragraphs(&content)
            .iter()
            .map(|p| normalize_term(p))
            .collect();
        for section in &group.members {
            if section.id == base.id {
                continue;
            }
            let mut contributed = false;
            for paragraph in paragraphs(&section.content) {
                let normalized = normalize_term(&paragraph);
                if normalized.is_empty() || known.contains(&normalized) {
                    continue;
                }
                if !content.is_empty() {
                    content.push_str("\n\n");
                }
                content.push_str(paragraph.trim());
                known.push(normalized);
                contributed = true;
            }
            if contributed && !provenance.contains(&section.document_id) {
                provenance.push(section.document_id);
            }
        }
    }

    MergedSection {
        header: base.header.clone(),
        content,
        level: if base.level == 0 { 0 } else { base.level.clamp(2, 6) },
        provenance,
    }
}

/// Chooses the base section of a group per strategy.
fn pick_base<'a>(
    input: &MergeInput<'_>,
    group: &SectionGroup<'a>,
    doc_by_id: &HashMap<DocumentId, &Document>,
    wins: &HashMap<(String, DocumentId), u32>,
) -> &'a Section {
    let authority = |section: &Section| authority_score(input, section.document_id, doc_by_id);
    let updated = |section: &Section| {
        doc_by_id
            .get(&section.document_id)
            .map_or_else(chrono::DateTime::<chrono::Utc>::default, |d| {
                d.updated_at.max(d.created_at)
            })
    };

    let mut best = group.members[0];
    for section in &group.members[1..] {
        let better = match input.strategy {
            MergeStrategy::NewestWins => {
                (updated(section), authority(section)) > (updated(best), authority(best))
            },
            MergeStrategy::Smart => {
                let win_count = |s: &Section| {
                    wins.get(&(group.normalized.clone(), s.document_id))
                        .copied()
                        .unwrap_or(0)
                };
                (win_count(section), authority(section), updated(section))
                    > (win_count(best), authority(best), updated(best))
            },
            MergeStrategy::AuthorityWins | MergeStrategy::MergeAll => {
                (authority(section), updated(section)) > (authority(best), updated(best))
            },
        };
        if better {
            best = section;
        }
    }
    best
}

/// Splits content into blank-line-delimited paragraphs.
fn paragraphs(content: &str) -> Vec<String> {
    content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Per-source counts of claims carried into the output: every source
/// claim minus the losing side of each auto-resolved conflict.
fn count_claims_included(
    input: &MergeInput<'_>,
    resolved: &[ResolvedConflict],
    claim_by_id: &HashMap<ClaimId, &AtomicClaim>,
) -> HashMap<DocumentId, u32> {
    let mut counts: HashMap<DocumentId, u32> = HashMap::new();
    for claim in input.claims {
        *counts.entry(claim.document_id).or_default() += 1;
    }
    if input.strategy != MergeStrategy::MergeAll {
        for r in resolved {
            let loser = if r.winner == r.conflict.claim_a {
                r.conflict.claim_b
            } else {
                r.conflict.claim_a
            };
            if let Some(claim) = claim_by_id.get(&loser) {
                if let Some(count) = counts.get_mut(&claim.document_id) {
                    *count = count.saturating_sub(1);
                }
            }
        }
    }
    counts
}

/// Renders merged sections in the requested format.
fn render(
    sections: &[MergedSection],
    format: DocumentFormat,
    include_provenance: bool,
) -> Result<String> {
    match format {
        DocumentFormat::Markdown | DocumentFormat::Text => {
            Ok(render_markdown(sections, include_provenance))
        }
        DocumentFormat::Json => render_json(sections, include_provenance),
        DocumentFormat::Yaml => render_yaml(sections, include_provenance),
    }
}

fn render_markdown(sections: &[MergedSection], include_provenance: bool) -> String {
    let mut out = String::new();
    for section in sections {
        if !section.header.is_empty() {
            out.push_str(&crate::parser::markdown_heading(section.level, &section.header));
            out.push_str("\n\n");
        }
        out.push_str(section.content.trim_end());
        out.push('\n');
        if include_provenance {
            let ids: Vec<String> = section.provenance.iter().map(ToString::to_string).collect();
            out.push_str(&format!("\n<!-- sources: {} -->\n", ids.join(", ")));
        }
        out.push('\n');
    }
    out.trim_end().to_string() + "\n"
}

fn section_value(section: &MergedSection, include_provenance: bool) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    object.insert(
        "content".to_string(),
        serde_json::Value::String(section.content.clone()),
    );
    if include_provenance {
        object.insert(
            "sources".to_string(),
            serde_json::Value::Array(
                section
                    .provenance
                    .iter()
                    .map(|id| serde_json::Value::String(id.to_string()))
                    .collect(),
            ),
        );
    }
    serde_json::Value::Object(object)
}

fn render_json(sections: &[MergedSection], include_provenance: bool) -> Result<String> {
    let mut root = serde_json::Map::new();
    for section in sections {
        let key = if section.header.is_empty() {
            format!("section_{}", root.len())
        } else {
            section.header.clone()
        };
        root.insert(key, section_value(section, include_provenance));
    }
    serde_json::to_string_pretty(&serde_json::Value::Object(root))
        .map_err(|e| Error::internal("render_json", e))
}

fn render_yaml(sections: &[MergedSection], include_provenance: bool) -> Result<String> {
    let mut root = serde_yaml_ng::Mapping::new();
    for section in sections {
        let key = if section.header.is_empty() {
            format!("section_{}", root.len())
        } else {
            section.header.clone()
        };
        let value: serde_yaml_ng::Value =
            serde_json::from_value::<serde_yaml_ng::Value>(section_value(section, include_provenance))
                .map_err(|e| Error::internal("render_yaml", e))?;
        root.insert(serde_yaml_ng::Value::String(key), value);
    }
    serde_yaml_ng::to_string(&serde_yaml_ng::Value::Mapping(root))
        .map_err(|e| Error::internal("render_yaml", e))
}

/// Re-parses the rendered output and checks every named section header
/// survives as a section boundary.
fn verify_round_trip(
    content: &str,
    format: DocumentFormat,
    sections: &[MergedSection],
) -> Result<()> {
    // Plain text has no headed sections to check.
    if format == DocumentFormat::Text {
        return Ok(());
    }
    let reparsed = crate::parser::parse(content, format, None)?;
    for section in sections {
        if section.header.is_empty() {
            continue;
        }
        let found = reparsed
            .sections
            .iter()
            .any(|s| normalize_term(&s.header) == normalize_term(&section.header));
        if !found {
            return Err(Error::internal(
                "merge_round_trip",
                format!("section '{}' lost in rendered output", section.header),
            ));
        }
    }
    Ok(())
}
