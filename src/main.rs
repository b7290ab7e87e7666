use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rag_ingest::config::Config;
use rag_ingest::embedding::{EmbeddingPort, FastEmbedEmbedder, model_dimension};
use rag_ingest::events::TracingEventPublisher;
use rag_ingest::pipeline::IngestionPipeline;
use rag_ingest::repository::{GitRepository, LocalRepository, RepositoryPort};
use rag_ingest::types::RunStatus;
use rag_ingest::vector_db::{MemoryVectorStore, VectorStorePort};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (built ",
    env!("BUILD_TIMESTAMP"),
    ", commit ",
    env!("GIT_COMMIT_HASH"),
    ", stores: ",
    env!("VECTOR_STORE_BACKENDS"),
    ")"
);

/// Incremental code ingestion into a vector index
#[derive(Parser)]
#[command(name = "rag-ingest", version = VERSION)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, env = "RAG_INGEST_CONFIG")]
    config: Option<PathBuf>,

    /// Snapshot file of the memory store
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a directory or git repository
    Ingest {
        path: PathBuf,
        /// Repository id (defaults to the directory name)
        #[arg(long)]
        repo_id: Option<String>,
        /// Commit reference to ingest
        #[arg(long, default_value = "HEAD")]
        commit_ref: String,
        /// Read the committed tree at --commit-ref instead of the working directory
        #[arg(long)]
        git: bool,
    },
    /// Search the index
    Search {
        query: String,
        #[arg(long)]
        repo_id: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// List the ids stored for a repository
    List { repo_id: String },
    /// Print the effective configuration as TOML
    Config,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_or_default()?,
    };
    config.apply_env_overrides();
    if let Some(snapshot) = &cli.snapshot {
        config.vector_store.snapshot_path = snapshot.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn open_store(config: &Config, dimension: usize) -> Result<Arc<dyn VectorStorePort>> {
    match config.vector_store.backend.as_str() {
        "memory" => {
            let store = MemoryVectorStore::open(&config.vector_store.snapshot_path)?;
            tracing::info!(
                "Using memory store at {}",
                config.vector_store.snapshot_path.display()
            );
            Ok(Arc::new(store))
        }
        #[cfg(feature = "qdrant-backend")]
        "qdrant" => {
            let store = rag_ingest::vector_db::QdrantVectorStore::connect(
                &config.vector_store.qdrant_url,
                &config.vector_store.collection_name,
            )
            .await?;
            store.initialize(dimension).await?;
            Ok(Arc::new(store))
        }
        other => {
            let _ = dimension;
            bail!("vector store backend '{}' is not available in this build", other)
        }
    }
}

fn default_repo_id(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .context("cannot derive a repository id from the path, pass --repo-id")
}

async fn ingest(
    config: &Config,
    path: PathBuf,
    repo_id: Option<String>,
    commit_ref: String,
    git: bool,
) -> Result<()> {
    let path = path
        .canonicalize()
        .with_context(|| format!("cannot access {}", path.display()))?;
    let repo_id = match repo_id {
        Some(id) => id,
        None => default_repo_id(&path)?,
    };

    let repository: Arc<dyn RepositoryPort> = if git {
        Arc::new(GitRepository::new(&config.repository)?.with_root(&repo_id, &path))
    } else {
        Arc::new(LocalRepository::new(&config.repository)?.with_root(&repo_id, &path))
    };
    let embedder = Arc::new(FastEmbedEmbedder::with_model_name(
        &config.embedding.model_name,
    )?);
    let store = open_store(config, embedder.dimension()).await?;

    let pipeline = IngestionPipeline::new(
        config,
        repository,
        embedder,
        store,
        Arc::new(TracingEventPublisher),
    )?;

    let ticket = pipeline.trigger(&repo_id, &commit_ref).await?;
    let report = tokio::select! {
        report = ticket.wait() => report,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, cancelling run");
            pipeline.shutdown().await;
            pipeline.last_report(&repo_id).await.context("run did not report")?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.status != RunStatus::Succeeded {
        std::process::exit(1);
    }
    Ok(())
}

async fn search(
    config: &Config,
    query: String,
    repo_id: Option<String>,
    limit: usize,
) -> Result<()> {
    let embedder = FastEmbedEmbedder::with_model_name(&config.embedding.model_name)?;
    let store = open_store(config, embedder.dimension()).await?;

    let mut vectors = embedder.embed(vec![query]).await?;
    let vector = vectors.pop().context("embedding service returned no vector")?;

    let results = store.search(repo_id.as_deref(), &vector, limit).await?;
    for result in results {
        let payload = &result.payload;
        println!(
            "{:.3}  {}:{}-{}  {}",
            result.score,
            payload.file_path,
            payload.start_line,
            payload.end_line,
            payload.symbol_name.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn list(config: &Config, repo_id: String) -> Result<()> {
    let dimension = model_dimension(&config.embedding.model_name)?;
    let store = open_store(config, dimension).await?;

    let mut ids: Vec<_> = store.list_ids(&repo_id).await?.into_iter().collect();
    ids.sort();
    for id in &ids {
        println!("{}", id);
    }
    eprintln!("{} ids stored for {}", ids.len(), repo_id);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Ingest {
            path,
            repo_id,
            commit_ref,
            git,
        } => ingest(&config, path, repo_id, commit_ref, git).await,
        Command::Search {
            query,
            repo_id,
            limit,
        } => search(&config, query, repo_id, limit).await,
        Command::List { repo_id } => list(&config, repo_id).await,
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
