use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mrcis::embedding::{Embedder, EmbeddingClient};
use mrcis::extractors::ExtractorRegistry;
use mrcis::indexing::{FileIndexingPipeline, IndexingService};
use mrcis::runtime::ServerRuntime;
use mrcis::storage::{RelationGraph, StateDb, VectorStore};
use mrcis::{Settings, logging, mcp, tools};

#[derive(Parser)]
#[command(name = "mrcis")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-repository code intelligence service")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "mrcis.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration file
    Init {
        /// Overwrite an existing configuration file
        #[arg(short, long)]
        force: bool,
    },

    /// Run the indexing server and MCP endpoint over stdio
    Serve,

    /// Show indexing status for configured repositories
    Status {
        /// Limit output to one repository
        #[arg(short, long)]
        repository: Option<String>,
    },

    /// Queue a repository for reindexing
    Reindex {
        /// Name of the repository to reindex
        repository: String,

        /// Reindex all files and reset failure counts
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = &cli.command {
        let path = Settings::init_config_file(*force)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("failed to create configuration")?;
        println!("Created configuration at {}", path.display());
        return Ok(());
    }

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),

        Commands::Serve => {
            let mut runtime = ServerRuntime::new();
            runtime
                .start(settings)
                .await
                .context("server startup failed")?;
            let context = runtime.context()?;

            let serve_result = tokio::select! {
                result = mcp::serve_stdio(context) => result,
                _ = tokio::signal::ctrl_c() => Ok(()),
            };

            runtime.stop().await;
            serve_result.context("MCP server failed")?;
        }

        Commands::Status { repository } => {
            // One-shot query against the shared state database; this
            // process never holds the writer lock.
            let state = StateDb::open(&settings.state_db_path())
                .await
                .context("failed to open state database")?;
            let status = tools::get_index_status(&state, repository.as_deref(), false).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            state.close().await;
        }

        Commands::Reindex { repository, force } => {
            // Queue rows directly; the running writer drains them from the
            // shared queue.
            let state = StateDb::open(&settings.state_db_path())
                .await
                .context("failed to open state database")?;
            let graph = RelationGraph::new(&state);
            let vectors = Arc::new(
                VectorStore::open(&settings.vectors_path(), settings.embedding.dimensions)
                    .context("failed to open vector store")?,
            );
            let embedder: Arc<dyn Embedder> =
                Arc::new(EmbeddingClient::new(settings.embedding.clone())?);
            let registry = ExtractorRegistry::create_default(&settings.files)
                .context("failed to initialize extractors")?;
            let pipeline = FileIndexingPipeline::new(
                Arc::clone(&vectors),
                graph.clone(),
                registry,
                embedder,
            );
            let repo_configs: HashMap<_, _> = settings
                .repositories
                .iter()
                .map(|r| (r.name.clone(), r.clone()))
                .collect();
            let indexer = Arc::new(IndexingService::new(
                state.clone(),
                graph,
                vectors,
                pipeline,
                repo_configs,
                &settings.indexing,
                settings.files.clone(),
            ));

            let response =
                tools::reindex_repository(&state, &indexer, &repository, force).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            state.close().await;
        }
    }

    Ok(())
}
