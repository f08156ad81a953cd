pub mod config;
pub mod error;
pub mod expansion;
pub mod metrics;
pub mod summary;

pub use config::AppConfig;
pub use error::PipelineError;
pub use expansion::{EXPAND_QUERY_TASK, QueryExpander, query_hash};
pub use metrics::{Metrics, MetricsSnapshot, TimedOperation};
pub use summary::{ENTITY_SUMMARY_TASK, EntitySummarizer, summary_cache_key};

use extract::{EntityType, Extractor, ExtractorConfig, LlmClient};
use ingest::ChunkerConfig;
use resolve::{MergeStats, Resolver, ResolverConfig};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use store::{
    AnalysisId, AnalysisJob, AnalysisStore, ChunkId, ChunkRecord, ChunkRetriever, CommitSummary,
    Embedder, EntityConnections, EntityCounts, EntityId, EntitySummary, EventKind,
    ExtractionStatus, KnowledgeStats, Stage, embed_checked,
};
use tracing::{debug, error, info, warn};

const SEARCH_PERCENT: u8 = 5;
const INGEST_PERCENT: u8 = 10;
const RESOLVE_PERCENT: u8 = 90;
const COMPLETE_PERCENT: u8 = 100;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunking: ChunkerConfig,
    /// Consecutive external-service chunk failures that fail the job
    pub circuit_breaker_threshold: usize,
    /// Extraction progress is reported linearly across this percent range
    pub progress_start: u8,
    pub progress_end: u8,
    pub search_top_k: usize,
    /// Search variations requested from the LLM; 0 searches with the query alone
    pub num_expansions: usize,
    pub embedding_dimension: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkerConfig::default(),
            circuit_breaker_threshold: 3,
            progress_start: 30,
            progress_end: 90,
            search_top_k: 20,
            num_expansions: 15,
            embedding_dimension: None,
        }
    }
}

/// Embedding collaborator plus the pre-indexed corpus it searches.
#[derive(Clone)]
pub struct CorpusSearch {
    pub embedder: Arc<dyn Embedder>,
    pub retriever: Arc<dyn ChunkRetriever>,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub analysis_id: AnalysisId,
    pub chunks_total: usize,
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    /// Entities extracted during this run, before deduplication
    pub extracted: EntityCounts,
    pub merge_stats: MergeStats,
}

#[derive(Debug, Default)]
struct ExtractionTally {
    total: usize,
    processed: usize,
    failed: usize,
    counts: EntityCounts,
}

/// Sequences one analysis through search, ingestion, extraction and
/// resolution, reporting progress as events and checkpoints.
///
/// Stages run strictly in order; chunks are extracted one at a time in
/// sequence order so each relationship pass can see entities from earlier
/// chunks.
pub struct Pipeline {
    store: Arc<dyn AnalysisStore>,
    extractor: Extractor,
    resolver: Resolver,
    expander: QueryExpander,
    summarizer: EntitySummarizer,
    search: Option<CorpusSearch>,
    config: PipelineConfig,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn AnalysisStore>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            store,
            extractor: Extractor::new(llm.clone()),
            resolver: Resolver::new(llm.clone()),
            expander: QueryExpander::new(llm.clone()),
            summarizer: EntitySummarizer::new(llm),
            search: None,
            config: PipelineConfig::default(),
            metrics: Metrics::new(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_extractor_config(mut self, config: ExtractorConfig) -> Self {
        self.extractor = self.extractor.with_config(config);
        self
    }

    pub fn with_resolver_config(mut self, config: ResolverConfig) -> Self {
        self.resolver = self.resolver.with_config(config);
        self
    }

    pub fn with_search(mut self, search: CorpusSearch) -> Self {
        self.search = Some(search);
        self
    }

    pub fn store(&self) -> &Arc<dyn AnalysisStore> {
        &self.store
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn create_analysis(&self, query: &str) -> Result<AnalysisJob, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::Validation("Analysis query is empty".into()));
        }

        let job = self.store.create_analysis(query).await?;
        info!(analysis_id = %job.id, query, "Created analysis");
        Ok(job)
    }

    /// Chunk a document and attach its chunks to the analysis.
    pub async fn add_document(
        &self,
        analysis_id: AnalysisId,
        title: &str,
        text: &str,
    ) -> Result<Vec<ChunkId>, PipelineError> {
        self.store.get_analysis(analysis_id).await?;

        // Scoped by analysis so the same file can feed several analyses
        let document_id = ingest::generate_doc_id(&format!("{}/{}", analysis_id, title));
        let chunks = ingest::ingest_text(&document_id, text, &self.config.chunking);
        if chunks.is_empty() {
            return Err(PipelineError::Validation(format!(
                "Document '{}' produced no chunks",
                title
            )));
        }

        self.store.save_document(&document_id, title).await?;
        let ids = self.store.insert_chunks(Some(analysis_id), chunks).await?;
        info!(analysis_id = %analysis_id, title, chunks = ids.len(), "Added document");
        Ok(ids)
    }

    /// Search variations for a query, from the cache when present.
    ///
    /// When the LLM cannot expand the query the query alone is searched;
    /// that fallback is not cached.
    pub async fn expand_query(&self, query: &str) -> Result<Vec<String>, PipelineError> {
        let query = query.trim();
        if self.config.num_expansions == 0 {
            return Ok(vec![query.to_string()]);
        }

        let hash = query_hash(query);
        if let Some(cached) = self.store.cached_expansion(&hash).await? {
            debug!(query, variations = cached.len(), "Using cached query expansion");
            return Ok(cached);
        }

        match self.expander.expand(query, self.config.num_expansions).await {
            Ok(variations) => {
                self.store.save_expansion(&hash, &variations).await?;
                info!(query, variations = variations.len(), "Expanded query");
                Ok(variations)
            }
            Err(e) => {
                warn!(query, error = %e, "Query expansion failed, searching with the query alone");
                Ok(vec![query.to_string()])
            }
        }
    }

    /// Live neighbours of an entity, limited to `types` unless it is empty.
    pub async fn connections(
        &self,
        analysis_id: AnalysisId,
        entity_id: EntityId,
        types: &[EntityType],
    ) -> Result<EntityConnections, PipelineError> {
        let mut connections = self.store.connections(analysis_id, entity_id).await?;
        if !types.is_empty() {
            connections.groups.retain(|t, _| types.contains(t));
        }
        Ok(connections)
    }

    /// Cited summary of an entity through its connections of the selected
    /// types (every type when empty). Results are cached per entity,
    /// analysis and type selection.
    pub async fn summarize_entity(
        &self,
        analysis_id: AnalysisId,
        entity_id: EntityId,
        types: &[EntityType],
    ) -> Result<EntitySummary, PipelineError> {
        let types = if types.is_empty() { &EntityType::ALL[..] } else { types };
        let key = summary_cache_key(analysis_id, entity_id, types);
        if let Some(cached) = self.store.cached_summary(&key).await? {
            debug!(analysis_id = %analysis_id, entity_id = %entity_id, "Using cached summary");
            return Ok(cached);
        }

        let summary = self
            .summarizer
            .summarize(self.store.as_ref(), analysis_id, entity_id, types)
            .await?;
        self.store.save_summary(&key, &summary).await?;
        Ok(summary)
    }

    pub async fn knowledge_stats(&self) -> Result<KnowledgeStats, PipelineError> {
        Ok(self.store.knowledge_stats().await?)
    }

    /// Run the analysis to completion.
    ///
    /// Any error escaping a stage fails the job: the message is stored on
    /// the job and an `error` event is emitted. Entities persisted before
    /// the failure stay queryable.
    pub async fn run(&self, analysis_id: AnalysisId) -> Result<RunReport, PipelineError> {
        let job = self.store.get_analysis(analysis_id).await?;
        if job.current_stage.is_terminal() {
            return Err(PipelineError::Validation(format!(
                "Analysis {} has already finished ({})",
                analysis_id, job.current_stage
            )));
        }

        match self.execute(&job).await {
            Ok(report) => {
                self.metrics.record_run(true);
                info!(
                    analysis_id = %analysis_id,
                    metrics = ?self.metrics.snapshot(),
                    "Pipeline complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.metrics.record_run(false);
                self.fail(analysis_id, &e).await;
                Err(e)
            }
        }
    }

    async fn execute(&self, job: &AnalysisJob) -> Result<RunReport, PipelineError> {
        let analysis_id = job.id;

        if let Some(search) = &self.search {
            self.enter_stage(analysis_id, Stage::Searching, SEARCH_PERCENT).await?;
            self.run_search(search, job).await?;
        }

        self.enter_stage(analysis_id, Stage::Ingesting, INGEST_PERCENT).await?;
        self.run_ingestion(analysis_id).await?;
        self.store.save_checkpoint(analysis_id, Stage::Ingesting).await?;

        self.enter_stage(analysis_id, Stage::Extracting, self.config.progress_start)
            .await?;
        let tally = self.run_extraction(analysis_id).await?;
        self.store.save_checkpoint(analysis_id, Stage::Extracting).await?;

        self.enter_stage(analysis_id, Stage::Resolving, RESOLVE_PERCENT).await?;
        let merge_stats = self.run_resolution(analysis_id).await?;
        self.store.save_checkpoint(analysis_id, Stage::Resolving).await?;

        self.store.update_stage(analysis_id, Stage::Complete, None).await?;
        self.emit(
            analysis_id,
            EventKind::StageChange,
            json!({"stage": Stage::Complete, "percent": COMPLETE_PERCENT}),
        )
        .await?;
        self.emit(
            analysis_id,
            EventKind::Done,
            json!({
                "entities": merge_stats.unique_entities,
                "relationships": merge_stats.relationships_after,
            }),
        )
        .await?;

        Ok(RunReport {
            analysis_id,
            chunks_total: tally.total,
            chunks_processed: tally.processed,
            chunks_failed: tally.failed,
            extracted: tally.counts,
            merge_stats,
        })
    }

    async fn enter_stage(
        &self,
        analysis_id: AnalysisId,
        stage: Stage,
        percent: u8,
    ) -> Result<(), PipelineError> {
        self.store.update_stage(analysis_id, stage, None).await?;
        self.emit(
            analysis_id,
            EventKind::StageChange,
            json!({"stage": stage, "percent": percent}),
        )
        .await?;
        info!(analysis_id = %analysis_id, stage = %stage, "Entering stage");
        Ok(())
    }

    async fn emit(
        &self,
        analysis_id: AnalysisId,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Result<(), PipelineError> {
        self.store.append_event(analysis_id, kind, payload).await?;
        Ok(())
    }

    /// Best effort; a failure here must not hide the original error.
    async fn fail(&self, analysis_id: AnalysisId, e: &PipelineError) {
        error!(analysis_id = %analysis_id, kind = e.kind(), error = %e, "Pipeline failed");

        if let Err(store_err) = self
            .store
            .update_stage(analysis_id, Stage::Failed, Some(e.to_string()))
            .await
        {
            warn!(analysis_id = %analysis_id, error = %store_err, "Could not mark job failed");
        }
        if let Err(store_err) = self
            .store
            .append_event(
                analysis_id,
                EventKind::Error,
                json!({"kind": e.kind(), "message": e.to_string()}),
            )
            .await
        {
            warn!(analysis_id = %analysis_id, error = %store_err, "Could not emit error event");
        }
    }

    /// Pull the query's nearest corpus chunks into the analysis. Search
    /// trouble is reported as a warning; the run goes on with whatever
    /// chunks the analysis already has.
    async fn run_search(
        &self,
        search: &CorpusSearch,
        job: &AnalysisJob,
    ) -> Result<(), PipelineError> {
        let timer = TimedOperation::start();
        let found = self.search_chunks(search, job).await;
        self.metrics.record_search(timer.elapsed());

        match found {
            Ok((variations, attached)) => {
                self.emit(
                    job.id,
                    EventKind::StatsUpdate,
                    json!({"chunks_found": attached, "query_variations": variations}),
                )
                .await
            }
            Err(e) => {
                warn!(analysis_id = %job.id, error = %e, "Corpus search failed, continuing");
                self.emit(
                    job.id,
                    EventKind::Warning,
                    json!({"stage": Stage::Searching, "message": e.to_string()}),
                )
                .await
            }
        }
    }

    /// Search every query variation and attach the union of the hits,
    /// first-seen order. Fails only when no variation could be searched.
    /// Returns `(variations, attached)`.
    async fn search_chunks(
        &self,
        search: &CorpusSearch,
        job: &AnalysisJob,
    ) -> Result<(usize, usize), PipelineError> {
        let queries = self.expand_query(&job.query).await?;
        let vectors = embed_checked(
            search.embedder.as_ref(),
            &queries,
            self.config.embedding_dimension,
        )
        .await?;

        let mut seen = HashSet::new();
        let mut chunk_ids: Vec<ChunkId> = Vec::new();
        let mut searched = 0;
        let mut last_error = None;
        for (query, vector) in queries.iter().zip(&vectors) {
            match search.retriever.search(vector, self.config.search_top_k).await {
                Ok(hits) => {
                    searched += 1;
                    chunk_ids.extend(hits.into_iter().filter(|id| seen.insert(id.clone())));
                }
                Err(e) => {
                    warn!(analysis_id = %job.id, query = %query, error = %e, "Search variation failed");
                    last_error = Some(e);
                }
            }
        }
        if searched == 0 {
            if let Some(e) = last_error {
                return Err(PipelineError::classify(&e));
            }
        }

        let attached = self.store.associate_chunks(job.id, &chunk_ids).await?;

        info!(
            analysis_id = %job.id,
            variations = queries.len(),
            found = chunk_ids.len(),
            attached,
            "Corpus search complete"
        );
        Ok((queries.len(), attached))
    }

    async fn run_ingestion(&self, analysis_id: AnalysisId) -> Result<(), PipelineError> {
        let chunks = self.store.chunks(analysis_id).await?;

        if chunks.is_empty() {
            warn!(analysis_id = %analysis_id, "No chunks found for analysis");
            self.emit(
                analysis_id,
                EventKind::Warning,
                json!({"stage": Stage::Ingesting, "message": "No chunks found for analysis"}),
            )
            .await
        } else {
            info!(analysis_id = %analysis_id, chunks = chunks.len(), "Found chunks");
            self.emit(analysis_id, EventKind::StatsUpdate, json!({"chunks": chunks.len()}))
                .await
        }
    }

    async fn run_extraction(&self, analysis_id: AnalysisId) -> Result<ExtractionTally, PipelineError> {
        let pending: Vec<ChunkRecord> = self
            .store
            .chunks(analysis_id)
            .await?
            .into_iter()
            .filter(|c| c.extraction_status == ExtractionStatus::Pending)
            .collect();

        let mut tally = ExtractionTally {
            total: pending.len(),
            ..Default::default()
        };
        let mut consecutive_failures = 0;

        for (index, chunk) in pending.iter().enumerate() {
            let timer = TimedOperation::start();

            match self.process_chunk(analysis_id, chunk).await {
                Ok(summary) => {
                    consecutive_failures = 0;
                    tally.processed += 1;
                    tally.counts.add(&summary.entities_created);
                    self.metrics.record_chunk(
                        timer.elapsed(),
                        summary.entities_created.total(),
                        summary.relationships_created,
                    );
                    self.store.set_entity_counts(analysis_id, tally.counts).await?;
                }
                Err(e) => {
                    tally.failed += 1;
                    self.metrics.record_chunk_failure(timer.elapsed());
                    self.record_chunk_failure(analysis_id, chunk, &e).await?;

                    if e.is_external_service() {
                        consecutive_failures += 1;
                        if consecutive_failures >= self.config.circuit_breaker_threshold {
                            error!(
                                analysis_id = %analysis_id,
                                failures = consecutive_failures,
                                "Circuit breaker tripped"
                            );
                            return Err(PipelineError::ExternalService(format!(
                                "Extraction aborted after {} consecutive external service failures: {}",
                                consecutive_failures,
                                e.message()
                            )));
                        }
                    }
                }
            }

            self.emit(
                analysis_id,
                EventKind::StatsUpdate,
                json!({
                    "stats": tally.counts.by_key(),
                    "percent": self.extraction_percent(index + 1, tally.total),
                    "chunks_processed": index + 1,
                    "chunks_total": tally.total,
                }),
            )
            .await?;
        }

        info!(
            analysis_id = %analysis_id,
            processed = tally.processed,
            failed = tally.failed,
            entities = tally.counts.total(),
            "Extraction complete"
        );
        Ok(tally)
    }

    async fn process_chunk(
        &self,
        analysis_id: AnalysisId,
        chunk: &ChunkRecord,
    ) -> Result<CommitSummary, PipelineError> {
        debug!(analysis_id = %analysis_id, chunk = chunk.sequence, "Extracting chunk");
        let extraction = self.extractor.extract(&chunk.content).await?;

        if !extraction.failed_passes.is_empty() {
            let passes: Vec<&str> = extraction.failed_passes.iter().map(|t| t.as_str()).collect();
            self.emit(
                analysis_id,
                EventKind::Warning,
                json!({
                    "chunk_id": chunk.id,
                    "message": "Some extraction passes failed",
                    "failed_passes": passes,
                }),
            )
            .await?;
        }

        let summary = self
            .store
            .commit_extraction(analysis_id, &chunk.id, &extraction)
            .await?;
        if summary.relationships_dropped > 0 {
            debug!(
                chunk = chunk.sequence,
                dropped = summary.relationships_dropped,
                "Relationships with unknown endpoints dropped"
            );
        }
        Ok(summary)
    }

    async fn record_chunk_failure(
        &self,
        analysis_id: AnalysisId,
        chunk: &ChunkRecord,
        e: &PipelineError,
    ) -> Result<(), PipelineError> {
        warn!(
            analysis_id = %analysis_id,
            chunk = chunk.sequence,
            kind = e.kind(),
            error = %e,
            "Chunk extraction failed"
        );
        self.store
            .set_chunk_status(&chunk.id, ExtractionStatus::Failed)
            .await?;
        self.emit(
            analysis_id,
            EventKind::ChunkFailed,
            json!({
                "chunk_id": chunk.id,
                "sequence": chunk.sequence,
                "kind": e.kind(),
                "error": e.to_string(),
            }),
        )
        .await
    }

    fn extraction_percent(&self, done: usize, total: usize) -> u8 {
        let start = usize::from(self.config.progress_start);
        let end = usize::from(self.config.progress_end.max(self.config.progress_start));
        if total == 0 {
            return self.config.progress_end;
        }
        (start + done * (end - start) / total) as u8
    }

    async fn run_resolution(&self, analysis_id: AnalysisId) -> Result<MergeStats, PipelineError> {
        let timer = TimedOperation::start();
        let stats = self.resolver.resolve(self.store.as_ref(), analysis_id).await?;
        self.metrics
            .record_resolution(timer.elapsed(), stats.total_merged());

        // Job counts now describe the deduplicated graph
        let mut live = EntityCounts::default();
        for entity in self.store.graph(analysis_id).await?.entities {
            live.increment(entity.entity_type);
        }
        self.store.set_entity_counts(analysis_id, live).await?;

        let payload =
            serde_json::to_value(&stats).map_err(|e| PipelineError::Unexpected(e.to_string()))?;
        self.emit(analysis_id, EventKind::ResolutionComplete, payload)
            .await?;
        Ok(stats)
    }
}
