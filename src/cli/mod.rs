//! CLI command implementations.
//!
//! Thin glue over the pipeline: each subcommand builds the matching
//! request, runs the handler, and prints the JSON response. Errors
//! print the common error shape to stderr.

use crate::config::DoctrineConfig;
use crate::models::{DocumentFormat, DocumentId, DocumentType, MergeStrategy, QueryType};
use crate::pipeline::{
    ConsolidateRequest, DeprecateRequest, ErrorResponse, FindOverlapsRequest, IngestRequest,
    Pipeline, QueryRequest, Scope,
};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Document consolidation engine.
#[derive(Debug, Parser)]
#[command(name = "doctrine", version, about)]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true, env = "DOCTRINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the database path.
    #[arg(long, global = true, env = "DOCTRINE_DB_PATH")]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands: the five pipeline operations plus shell completions.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest a document from a file, inline content, or URL.
    Ingest {
        /// Read the document from this file.
        #[arg(long, conflicts_with_all = ["content", "url"])]
        file: Option<String>,
        /// Ingest this inline content.
        #[arg(long)]
        content: Option<String>,
        /// Fetch the document from this URL.
        #[arg(long, conflicts_with = "content")]
        url: Option<String>,
        /// Document type: spec, guide, handoff, prompt, report,
        /// reference, decision, archive.
        #[arg(long = "type")]
        document_type: String,
        /// Declared format (sniffed when omitted).
        #[arg(long)]
        format: Option<String>,
        /// Tags (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Authority level, 1..10.
        #[arg(long, default_value_t = 5)]
        authority: u8,
        /// Documents this one supersedes (repeatable).
        #[arg(long)]
        supersedes: Vec<String>,
        /// Skip claim extraction.
        #[arg(long)]
        no_claims: bool,
        /// Skip embedding generation.
        #[arg(long)]
        no_embeddings: bool,
        /// Skip entity graph updates.
        #[arg(long)]
        no_entities: bool,
    },
    /// Find overlap clusters across the corpus.
    Overlaps {
        /// Restrict to these documents (repeatable).
        #[arg(long = "document-id")]
        document_ids: Vec<String>,
        /// Restrict to source paths matching these patterns (repeatable).
        #[arg(long = "pattern")]
        patterns: Vec<String>,
        /// Similarity threshold (config default when omitted).
        #[arg(long)]
        threshold: Option<f32>,
        /// Minimum cluster size.
        #[arg(long, default_value_t = 2)]
        min_cluster_size: usize,
        /// Skip claim-conflict aggregation.
        #[arg(long)]
        no_conflicts: bool,
    },
    /// Consolidate documents into one authoritative artifact.
    Consolidate {
        /// Source documents (repeatable).
        #[arg(long = "document-id")]
        document_ids: Vec<String>,
        /// A persisted overlap cluster.
        #[arg(long)]
        cluster: Option<Uuid>,
        /// Source paths matching these patterns (repeatable).
        #[arg(long = "pattern")]
        patterns: Vec<String>,
        /// Merge strategy: smart, newest_wins, authority_wins, merge_all.
        #[arg(long, default_value = "smart")]
        strategy: String,
        /// Explicit authority order (repeatable, highest first).
        #[arg(long = "authority-order")]
        authority_order: Vec<String>,
        /// Minimum conflict confidence for auto resolution.
        #[arg(long, default_value_t = 0.7)]
        conflict_threshold: f32,
        /// Conflicts below this strength auto-resolve.
        #[arg(long, default_value_t = 0.3)]
        auto_resolve_below: f32,
        /// Conflicts above this strength require human review.
        #[arg(long, default_value_t = 0.9)]
        require_human_above: f32,
        /// Output format: markdown, json, yaml.
        #[arg(long, default_value = "markdown")]
        format: String,
        /// Omit source annotations from the output.
        #[arg(long)]
        no_provenance: bool,
        /// Render without persisting anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Ask the corpus a question and get a cited answer.
    Query {
        /// The question.
        query: String,
        /// Query type: factual, procedural, conceptual, comparative.
        #[arg(long = "type", default_value = "factual")]
        query_type: String,
        /// Restrict to these documents (repeatable).
        #[arg(long = "document-id")]
        document_ids: Vec<String>,
        /// Include deprecated documents.
        #[arg(long)]
        include_deprecated: bool,
        /// Minimum claim confidence for supporting claims.
        #[arg(long, default_value_t = 0.7)]
        confidence_threshold: f32,
        /// Source cap, 1..20.
        #[arg(long, default_value_t = 5)]
        max_sources: usize,
        /// Skip claim verification.
        #[arg(long)]
        no_verify: bool,
        /// Code tree root for claim verification.
        #[arg(long)]
        codebase: Option<String>,
    },
    /// Deprecate a document, optionally superseding it.
    Deprecate {
        /// The document to retire.
        document_id: String,
        /// Why it is being retired.
        #[arg(long)]
        reason: String,
        /// The replacing document.
        #[arg(long)]
        superseded_by: Option<String>,
        /// Leave inbound references untouched.
        #[arg(long)]
        no_migrate: bool,
        /// Archive instead of a frontmatter deprecation.
        #[arg(long)]
        archive: bool,
    },
    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

/// Runs a parsed CLI invocation.
///
/// # Errors
///
/// Returns an error when the pipeline fails; the error shape has
/// already been printed to stderr.
pub fn run(cli: &Cli) -> anyhow::Result<()> {
    if let Command::Completions { shell } = &cli.command {
        clap_complete::generate(
            *shell,
            &mut Cli::command(),
            "doctrine",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let mut config = DoctrineConfig::load(cli.config.as_deref())?;
    if let Some(db_path) = &cli.db_path {
        config.storage.db_path = Some(db_path.clone());
    }
    crate::observability::init(&config.logging);

    let pipeline = Pipeline::from_config(&config)?;
    match &cli.command {
        Command::Ingest {
            file,
            content,
            url,
            document_type,
            format,
            tags,
            authority,
            supersedes,
            no_claims,
            no_embeddings,
            no_entities,
        } => {
            let request = IngestRequest {
                file_path: file.clone(),
                content: content.clone(),
                url: url.clone(),
                format: format
                    .as_deref()
                    .map(DocumentFormat::from_str)
                    .transpose()?,
                document_type: Some(DocumentType::from_str(document_type)?),
                tags: tags.clone(),
                authority_level: *authority,
                supersedes: parse_ids(supersedes)?,
                extract_claims: !no_claims,
                generate_embeddings: !no_embeddings,
                build_entity_graph: !no_entities,
            };
            emit(pipeline.ingest_document(&request))
        },
        Command::Overlaps {
            document_ids,
            patterns,
            threshold,
            min_cluster_size,
            no_conflicts,
        } => {
            let request = FindOverlapsRequest {
                scope: scope_from(document_ids, patterns)?,
                min_cluster_size: *min_cluster_size,
                similarity_threshold: *threshold,
                include_claim_conflicts: !no_conflicts,
            };
            emit(pipeline.find_overlaps(&request))
        },
        Command::Consolidate {
            document_ids,
            cluster,
            patterns,
            strategy,
            authority_order,
            conflict_threshold,
            auto_resolve_below,
            require_human_above,
            format,
            no_provenance,
            dry_run,
        } => {
            let ids = parse_ids(document_ids)?;
            let request = ConsolidateRequest {
                document_ids: (!ids.is_empty()).then_some(ids),
                scope: if cluster.is_none() && document_ids.is_empty() {
                    scope_from(&[], patterns)?
                } else {
                    None
                },
                cluster_id: *cluster,
                strategy: MergeStrategy::from_str(strategy)?,
                authority_order: {
                    let order = parse_ids(authority_order)?;
                    (!order.is_empty()).then_some(order)
                },
                conflict_threshold: *conflict_threshold,
                auto_resolve_below: *auto_resolve_below,
                require_human_above: *require_human_above,
                output_format: DocumentFormat::from_str(format)?,
                include_provenance: !no_provenance,
                dry_run: *dry_run,
            };
            emit(pipeline.consolidate_documents(&request))
        },
        Command::Query {
            query,
            query_type,
            document_ids,
            include_deprecated,
            confidence_threshold,
            max_sources,
            no_verify,
            codebase,
        } => {
            let request = QueryRequest {
                query: Some(query.clone()),
                query_type: parse_query_type(query_type)?,
                scope: scope_from(document_ids, &[])?,
                include_deprecated: *include_deprecated,
                confidence_threshold: *confidence_threshold,
                max_sources: *max_sources,
                verify_claims: !no_verify,
                codebase_path: codebase.clone(),
            };
            emit(pipeline.get_source_of_truth(&request))
        },
        Command::Deprecate {
            document_id,
            reason,
            superseded_by,
            no_migrate,
            archive,
        } => {
            let request = DeprecateRequest {
                document_id: parse_id_str(document_id)?,
                reason: reason.clone(),
                superseded_by: superseded_by.as_deref().map(parse_id_str).transpose()?,
                migrate_references: !no_migrate,
                archive: *archive,
            };
            emit(pipeline.deprecate_document(&request))
        },
        Command::Completions { .. } => Ok(()),
    }
}

fn parse_id_str(raw: &str) -> crate::Result<DocumentId> {
    DocumentId::from_str(raw)
        .map_err(|e| crate::Error::InvalidInput(format!("bad document id '{raw}': {e}")))
}

fn parse_ids(raw: &[String]) -> crate::Result<Vec<DocumentId>> {
    raw.iter().map(|s| parse_id_str(s)).collect()
}

fn parse_query_type(raw: &str) -> crate::Result<QueryType> {
    match raw {
        "factual" => Ok(QueryType::Factual),
        "procedural" => Ok(QueryType::Procedural),
        "conceptual" => Ok(QueryType::Conceptual),
        "comparative" => Ok(QueryType::Comparative),
        other => Err(crate::Error::InvalidInput(format!(
            "unknown query type: {other}"
        ))),
    }
}

fn scope_from(document_ids: &[String], patterns: &[String]) -> crate::Result<Option<Scope>> {
    if !document_ids.is_empty() {
        return Ok(Some(Scope::Ids {
            document_ids: parse_ids(document_ids)?,
        }));
    }
    if !patterns.is_empty() {
        return Ok(Some(Scope::Patterns {
            path_patterns: patterns.to_vec(),
        }));
    }
    Ok(None)
}

/// Prints a handler result: the response JSON on stdout, or the common
/// error shape on stderr.
fn emit<T: Serialize>(result: crate::Result<T>) -> anyhow::Result<()> {
    match result {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        },
        Err(err) => {
            let shape = ErrorResponse::from(&err);
            eprintln!("{}", serde_json::to_string_pretty(&shape)?);
            Err(err.into())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_ingest() {
        let cli = Cli::try_parse_from([
            "doctrine", "ingest", "--content", "# T\nbody", "--type", "spec", "--tag", "a",
            "--authority", "7",
        ])
        .unwrap();
        match cli.command {
            Command::Ingest {
                content,
                document_type,
                tags,
                authority,
                ..
            } => {
                assert_eq!(content.as_deref(), Some("# T\nbody"));
                assert_eq!(document_type, "spec");
                assert_eq!(tags, vec!["a".to_string()]);
                assert_eq!(authority, 7);
            },
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_cli_rejects_conflicting_sources() {
        let result = Cli::try_parse_from([
            "doctrine", "ingest", "--file", "a.md", "--content", "x", "--type", "spec",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parses_query_defaults() {
        let cli = Cli::try_parse_from(["doctrine", "query", "How many retries?"]).unwrap();
        match cli.command {
            Command::Query {
                query,
                query_type,
                max_sources,
                no_verify,
                ..
            } => {
                assert_eq!(query, "How many retries?");
                assert_eq!(query_type, "factual");
                assert_eq!(max_sources, 5);
                assert!(!no_verify);
            },
            _ => panic!("wrong command"),
        }
    }
}
