use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use extract::OllamaClient;
use pipeline::{AppConfig, CorpusSearch, Pipeline};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::{
    AnalysisStore, ChunkRecord, EmbeddingClient, GraphExporter, MemoryStore, QdrantChunkIndex,
    embed_checked,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apor")]
#[command(about = "Build an Actor/Policy/Outcome/Risk knowledge graph from documents", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full analysis over the given files or directories
    Run {
        /// Question the analysis is about
        #[arg(short, long)]
        query: String,

        /// .txt or .md files, or directories containing them
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn read_sources(paths: &[PathBuf]) -> Result<Vec<(String, String)>> {
    let mut documents = Vec::new();
    for path in paths {
        if path.is_dir() {
            documents.extend(ingest::FileReader::read_directory(path).await?);
        } else {
            let content = ingest::FileReader::read_file(path).await?;
            documents.push((path.to_string_lossy().to_string(), content));
        }
    }
    Ok(documents)
}

/// Chunk the documents into the shared corpus and index them in Qdrant, so
/// the searching stage can pick the chunks relevant to the query.
async fn index_corpus(
    config: &AppConfig,
    store: &dyn AnalysisStore,
    embedder: &EmbeddingClient,
    index: &QdrantChunkIndex,
    documents: &[(String, String)],
) -> Result<usize> {
    index
        .ensure_collection(config.search.embedding_dimension)
        .await?;

    let mut indexed = 0;
    for (title, text) in documents {
        let document_id = ingest::generate_doc_id(title);
        store.save_document(&document_id, title).await?;
        let chunks = ingest::ingest_text(&document_id, text, &config.chunker_config());
        let records: Vec<ChunkRecord> = chunks
            .iter()
            .cloned()
            .map(|c| ChunkRecord::from_chunk(c, None))
            .collect();
        store.insert_chunks(None, chunks).await?;

        let texts: Vec<String> = records.iter().map(|r| r.content.clone()).collect();
        let vectors = embed_checked(embedder, &texts, Some(config.search.embedding_dimension))
            .await
            .with_context(|| format!("Failed to embed {}", title))?;
        index.upsert_chunks(&records, vectors).await?;
        let ids: Vec<_> = records.into_iter().map(|r| r.id).collect();
        indexed += store.mark_indexed(&ids).await?;
    }

    info!(chunks = indexed, "Indexed corpus");
    Ok(indexed)
}

async fn run(config: AppConfig, query: String, files: Vec<PathBuf>) -> Result<()> {
    let llm = OllamaClient::new(&config.llm.base_url, &config.llm.model)
        .with_timeout(config.request_timeout())?
        .with_retry(config.retry_policy());
    let store = Arc::new(MemoryStore::new());

    let mut pipeline = Pipeline::new(store.clone(), Arc::new(llm))
        .with_config(config.pipeline_config())
        .with_extractor_config(config.extractor_config())
        .with_resolver_config(config.resolver_config());

    let documents = read_sources(&files).await?;
    let job = pipeline.create_analysis(&query).await?;

    if config.search.enabled {
        let embedder = EmbeddingClient::new(&config.llm.base_url, &config.llm.embedding_model)
            .with_timeout(config.request_timeout())?
            .with_retry(config.retry_policy());
        let index = QdrantChunkIndex::new(&config.search.qdrant_url, &config.search.collection);
        index_corpus(&config, store.as_ref(), &embedder, &index, &documents).await?;

        pipeline = pipeline.with_search(CorpusSearch {
            embedder: Arc::new(embedder),
            retriever: Arc::new(index),
        });
    } else {
        for (title, text) in &documents {
            pipeline.add_document(job.id, title, text).await?;
        }
    }

    let report = pipeline.run(job.id).await?;
    let graph = store.graph(job.id).await?;

    if let Some(neo4j) = &config.export.neo4j {
        let exporter = GraphExporter::connect(&neo4j.uri, &neo4j.user, &neo4j.password).await?;
        exporter.init_schema().await?;
        exporter.export(&graph).await?;
    }

    let output = serde_json::json!({
        "analysis": store.get_analysis(job.id).await?,
        "report": report,
        "graph": graph,
        "merge_log": store.merge_log(job.id).await?,
        "knowledge": pipeline.knowledge_stats().await?,
        "metrics": pipeline.metrics(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    AppConfig::load(path).context("Failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(cli.json_logs || config.logging.json);

    match cli.command {
        Commands::Run { query, files } => run(config, query, files).await,
    }
}
