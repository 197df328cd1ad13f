//! Command-line front end for the paperdex retrieval index.
//!
//! Builds an index from a scraped `papers.json` and answers keyword or semantic queries
//! against it, printing the same JSON shape the search API returns.
//!
//! # Usage
//!
//! ```bash
//! # Build (or rebuild) the index under the default data directory
//! cargo run -p paperdex-cli -- index --papers papers.json
//!
//! # Keyword search
//! cargo run -p paperdex-cli -- search "diffusion" --mode exact --limit 5
//!
//! # Semantic search, with debug logging
//! RUST_LOG=paperdex_retrieval=debug cargo run -p paperdex-cli -- search "image generation" --mode semantic
//! ```
//!
//! Embeddings come from a feature-hashing stub, so semantic results reflect shared words only.

mod embedder;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use paperdex_retrieval::{
    BuildStage, IndexConfig, IndexError, JsonFileSource, ScoredRecord, SearchContext,
    parse_request,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::embedder::{DEFAULT_DIM, HashingEmbedder};

/// Build and query a hybrid lexical/semantic paper index.
#[derive(Parser, Debug)]
#[command(name = "paperdex", version, about)]
struct Args {
    /// Directory holding the document store and the vector bundle.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Embedding dimension of the hashing embedder. Must match the one used to build.
    #[arg(long, global = true, default_value_t = DEFAULT_DIM)]
    dim: usize,

    /// Timeout in seconds for each storage and embedding call.
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the index from a JSON array of papers.
    Index {
        /// Path to the scraped papers file.
        #[arg(long, default_value = "papers.json")]
        papers: PathBuf,
    },
    /// Search the index.
    Search {
        /// Query text.
        query: String,

        /// `exact` / `lexical` for keyword search, `semantic` for vector search.
        #[arg(short, long, default_value = "exact")]
        mode: String,

        /// Maximum number of results. Defaults to the index configuration's limit.
        #[arg(short, long, allow_negative_numbers = true)]
        limit: Option<i64>,
    },
    /// Show what is currently indexed.
    Status,
}

#[derive(Serialize)]
struct SearchResponse<'a> {
    query: &'a str,
    mode: &'a str,
    count: usize,
    results: Vec<SearchHit>,
}

#[derive(Serialize)]
struct SearchHit {
    id: u64,
    title: String,
    authors: String,
    link: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    keywords: Vec<String>,
    score: f32,
}

impl From<ScoredRecord> for SearchHit {
    fn from(hit: ScoredRecord) -> Self {
        let document = hit.record.document;
        Self {
            id: hit.record.id.as_u64(),
            title: document.title,
            authors: document.authors,
            link: document.external_id,
            keywords: document.keywords,
            score: hit.score,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let validation = err
                .downcast_ref::<IndexError>()
                .is_some_and(IndexError::is_validation);
            let response = ErrorResponse {
                error: format!("{err:#}"),
            };
            match serde_json::to_string(&response) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("{err:#}"),
            }
            if validation {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("paperdex")
}

fn config_for(args: &Args) -> IndexConfig {
    let data_dir = args.data_dir.clone().unwrap_or_else(default_data_dir);
    let mut builder = IndexConfig::builder()
        .store_path(data_dir.join("documents.redb"))
        .bundle_dir(data_dir.join("vectors"));
    if let Some(secs) = args.timeout_secs {
        let timeout = Duration::from_secs(secs);
        builder = builder.embed_timeout(timeout).storage_timeout(timeout);
    }
    builder.build()
}

async fn run(args: Args) -> Result<()> {
    let config = config_for(&args);
    let ctx = SearchContext::open(config, HashingEmbedder::new(args.dim))
        .await
        .context("failed to open the index")?;

    match &args.command {
        Command::Index { papers } => {
            let source = JsonFileSource::new(papers);
            let report = ctx
                .builder()
                .rebuild_with_progress(&source, |progress| {
                    if let BuildStage::Skipped { reason } = &progress.stage {
                        info!(
                            processed = progress.processed,
                            total = progress.total,
                            %reason,
                            "record kept without embedding"
                        );
                    }
                })
                .await
                .with_context(|| format!("failed to index {}", papers.display()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Search { query, mode, limit } => {
            let limit = limit.unwrap_or_else(|| {
                i64::try_from(ctx.config().default_limit).unwrap_or(i64::MAX)
            });
            let (parsed, limit) = parse_request(query, mode, limit)?;
            let hits = ctx.router().search_scored(query, parsed, limit).await?;

            let response = SearchResponse {
                query,
                mode: mode.as_str(),
                count: hits.len(),
                results: hits.into_iter().map(SearchHit::from).collect(),
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Status => {
            let snapshot = ctx.snapshot();
            let status = serde_json::json!({
                "documents": ctx.store().len()?,
                "vectors": snapshot.vectors().len(),
                "lexical": snapshot.lexical().len(),
                "dimension": snapshot.vectors().dimension(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    ctx.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(data_dir: &std::path::Path, command: &[&str]) -> Args {
        let mut argv = vec!["paperdex", "--data-dir", data_dir.to_str().unwrap()];
        argv.extend_from_slice(command);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn data_dir_drives_config() {
        let args = Args::try_parse_from([
            "paperdex",
            "--data-dir",
            "/srv/paperdex",
            "--timeout-secs",
            "3",
            "status",
        ])
        .unwrap();
        let config = config_for(&args);
        assert_eq!(
            config.store_path,
            Some(PathBuf::from("/srv/paperdex/documents.redb"))
        );
        assert_eq!(config.bundle_dir, Some(PathBuf::from("/srv/paperdex/vectors")));
        assert_eq!(config.embed_timeout, Duration::from_secs(3));
        assert_eq!(config.storage_timeout, Duration::from_secs(3));
    }

    #[test]
    fn search_defaults_to_exact_mode() {
        let args = Args::try_parse_from(["paperdex", "search", "diffusion"]).unwrap();
        match args.command {
            Command::Search { query, mode, limit } => {
                assert_eq!(query, "diffusion");
                assert_eq!(mode, "exact");
                assert_eq!(limit, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn index_then_search_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let papers = dir.path().join("papers.json");
        std::fs::write(
            &papers,
            r#"[
                {"title": "Denoising Diffusion Models", "authors": "Ho", "link": "https://papers.example/a"},
                {"title": "Graph Neural Networks", "authors": "Kipf", "link": "https://papers.example/b"},
                {"title": "No link here", "authors": "Anon"}
            ]"#,
        )
        .unwrap();
        let data = dir.path().join("data");

        run(args(&data, &["index", "--papers", papers.to_str().unwrap()]))
            .await
            .unwrap();
        run(args(&data, &["search", "diffusion", "--mode", "semantic"]))
            .await
            .unwrap();
        run(args(&data, &["status"])).await.unwrap();

        let config = config_for(&args(&data, &["status"]));
        let ctx = SearchContext::open(config, HashingEmbedder::default())
            .await
            .unwrap();
        assert_eq!(ctx.store().len().unwrap(), 2);
        assert_eq!(ctx.snapshot().vectors().len(), 2);
        let hits = ctx.router().search("diffusion", "exact", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.external_id, "https://papers.example/a");
        ctx.close().await;
    }

    #[tokio::test]
    async fn bad_limit_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(args(dir.path(), &["search", "diffusion", "--limit", "0"]))
            .await
            .unwrap_err();
        assert!(
            err.downcast_ref::<IndexError>()
                .is_some_and(IndexError::is_validation)
        );
    }
}
