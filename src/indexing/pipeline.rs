//! Per-file indexing pipeline.
//!
//! Idempotent single-file processing: clean prior records, extract, embed,
//! persist. The reset happens before any new write so a crashed prior
//! attempt can never leave duplicate rows. Queue management and
//! orchestration live in [`IndexingService`](crate::indexing::IndexingService).

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::error::{IndexError, IndexResult};
use crate::extractors::{ExtractionContext, ExtractorRegistry};
use crate::model::{IndexedFile, ParseDiagnostic};
use crate::storage::{RelationGraph, VectorRecord, VectorStore};

use super::text::EmbeddingTextBuilder;

/// Result of processing one file.
#[derive(Debug, Default)]
pub struct ProcessingResult {
    pub entity_count: u64,
    pub parse_errors: Vec<ParseDiagnostic>,
}

pub struct FileIndexingPipeline {
    vector_store: Arc<VectorStore>,
    graph: RelationGraph,
    extractors: Mutex<ExtractorRegistry>,
    embedder: Arc<dyn Embedder>,
    text_builder: EmbeddingTextBuilder,
}

impl FileIndexingPipeline {
    pub fn new(
        vector_store: Arc<VectorStore>,
        graph: RelationGraph,
        extractors: ExtractorRegistry,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            vector_store,
            graph,
            extractors: Mutex::new(extractors),
            embedder,
            text_builder: EmbeddingTextBuilder::new(),
        }
    }

    /// Process a single file. Never fails for parse errors; those ride back
    /// in the result. Fails for I/O, embedding, or persistence errors, in
    /// which case the next attempt re-enters the reset path.
    pub async fn process(
        &self,
        file: &IndexedFile,
        full_path: &Path,
        language: Option<&str>,
    ) -> IndexResult<ProcessingResult> {
        tracing::debug!(file = %file.path, "processing file");

        // Idempotent reset: drop any partial output of a prior attempt
        self.vector_store.delete_by_file(file.id)?;
        self.graph.delete_entities_for_file(file.id).await?;

        // Single read; the extractor gets the bytes to avoid re-reads
        let source = std::fs::read(full_path).map_err(|e| IndexError::FileRead {
            path: full_path.to_path_buf(),
            source: e,
        })?;

        let extraction = {
            let mut registry = self.extractors.lock().await;
            let Some(extractor) = registry.get_for(full_path) else {
                tracing::debug!(path = %full_path.display(), "no extractor for file");
                return Ok(ProcessingResult::default());
            };
            let ctx = ExtractionContext {
                file_path: full_path,
                file_id: file.id,
                repository_id: file.repository_id,
                source: &source,
            };
            extractor.extract(&ctx)?
        };

        if !extraction.parse_errors.is_empty() {
            tracing::warn!(
                file = %file.path,
                errors = extraction.parse_errors.len(),
                "parse errors encountered"
            );
        }

        let mut entities = extraction.entities;
        if entities.is_empty() {
            return Ok(ProcessingResult {
                entity_count: 0,
                parse_errors: extraction.parse_errors,
            });
        }

        // One logical batch; the client slices to provider batch size
        let texts: Vec<String> = entities.iter().map(|e| self.text_builder.build(e)).collect();
        let vectors = self.embedder.embed_texts(&texts).await?;

        let language = language.unwrap_or("unknown");
        let mut vector_records = Vec::with_capacity(entities.len());
        for ((entity, vector), text) in entities.iter_mut().zip(vectors).zip(&texts) {
            let vector_id = Uuid::new_v4();
            entity.vector_id = Some(vector_id);

            vector_records.push(VectorRecord {
                id: vector_id,
                repository_id: file.repository_id,
                file_id: file.id,
                qualified_name: entity.qualified_name.clone(),
                simple_name: entity.name.clone(),
                entity_type: entity.entity_type.as_str().to_string(),
                language: entity.language.clone(),
                file_path: file.path.clone(),
                line_start: entity.line_start,
                line_end: entity.line_end,
                vector,
                embedding_text: text.clone(),
                visibility: entity.visibility.as_str().to_string(),
                is_exported: entity.is_exported,
                has_docstring: entity.docstring.is_some(),
                signature: entity.signature.clone(),
                docstring: entity.docstring.clone(),
            });

            self.graph.add_entity(entity).await?;
        }

        self.vector_store.upsert(vector_records)?;

        for relation in &extraction.relations {
            self.graph
                .add_relation(
                    relation.source_id,
                    relation.target_id,
                    relation.relation_type,
                    relation.line_number,
                    relation.context_snippet.as_deref(),
                    relation.weight,
                )
                .await?;
        }

        for pending in &extraction.pending_references {
            self.graph
                .add_pending_reference(file.repository_id, pending)
                .await?;
        }

        Ok(ProcessingResult {
            entity_count: entities.len() as u64,
            parse_errors: extraction.parse_errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilesConfig;
    use crate::embedding::HashingEmbedder;
    use crate::model::FileStatus;
    use crate::storage::{SearchFilters, StateDb};
    use chrono::Utc;
    use tempfile::TempDir;

    async fn setup(dir: &TempDir) -> (StateDb, FileIndexingPipeline, Arc<VectorStore>) {
        let state = StateDb::in_memory().await.unwrap();
        let graph = RelationGraph::new(&state);
        let vectors =
            Arc::new(VectorStore::open(&dir.path().join("vectors.json"), 16).unwrap());
        let registry = ExtractorRegistry::create_default(&FilesConfig::default()).unwrap();
        let pipeline = FileIndexingPipeline::new(
            Arc::clone(&vectors),
            graph,
            registry,
            Arc::new(HashingEmbedder { dims: 16 }),
        );
        (state, pipeline, vectors)
    }

    fn file_row(repo_id: Uuid, path: &str) -> IndexedFile {
        IndexedFile {
            id: Uuid::new_v4(),
            repository_id: repo_id,
            path: path.to_string(),
            checksum: "c".to_string(),
            file_size: 0,
            language: Some("python".to_string()),
            status: FileStatus::Processing,
            failure_count: 0,
            error_message: None,
            entity_count: 0,
            last_modified_at: Utc::now(),
            last_indexed_at: None,
        }
    }

    #[tokio::test]
    async fn test_pipeline_persists_entities_vectors_and_refs() {
        let dir = TempDir::new().unwrap();
        let (state, pipeline, vectors) = setup(&dir).await;
        let repo_id = state.create_repository("sdk").await.unwrap();

        let source_path = dir.path().join("service.py");
        std::fs::write(
            &source_path,
            "class Service:\n    def run(self):\n        self.helper()\n    def helper(self):\n        pass\n",
        )
        .unwrap();

        let file = file_row(repo_id, "service.py");
        let result = pipeline
            .process(&file, &source_path, Some("python"))
            .await
            .unwrap();

        assert_eq!(result.entity_count, 3); // class + two methods
        assert!(result.parse_errors.is_empty());

        // Vector/entity parity: every emitted entity has a vector
        assert_eq!(vectors.count_for_file(file.id), 3);

        let graph = RelationGraph::new(&state);
        let entities = graph.get_entities_for_file(file.id).await.unwrap();
        assert_eq!(entities.len(), 3);
        assert!(entities.iter().all(|e| e.vector_id.is_some()));

        let pending = graph.get_pending_references(100).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].target_qualified_name, "Service.helper");
    }

    #[tokio::test]
    async fn test_pipeline_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (state, pipeline, vectors) = setup(&dir).await;
        let repo_id = state.create_repository("sdk").await.unwrap();

        let source_path = dir.path().join("mod.py");
        std::fs::write(&source_path, "def a():\n    pass\n\ndef b():\n    pass\n").unwrap();

        let file = file_row(repo_id, "mod.py");
        let first = pipeline
            .process(&file, &source_path, Some("python"))
            .await
            .unwrap();
        let second = pipeline
            .process(&file, &source_path, Some("python"))
            .await
            .unwrap();

        assert_eq!(first.entity_count, second.entity_count);
        // No duplicate rows after the second pass
        assert_eq!(vectors.count_for_file(file.id), 2);
        let graph = RelationGraph::new(&state);
        let entities = graph.get_entities_for_file(file.id).await.unwrap();
        assert_eq!(entities.len(), 2);

        let mut names: Vec<_> = entities.iter().map(|e| e.qualified_name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["mod.a", "mod.b"]);
    }

    #[tokio::test]
    async fn test_unsupported_file_yields_zero_entities() {
        let dir = TempDir::new().unwrap();
        let (state, pipeline, vectors) = setup(&dir).await;
        let repo_id = state.create_repository("sdk").await.unwrap();

        let source_path = dir.path().join("image.bin");
        std::fs::write(&source_path, [0u8, 1, 2]).unwrap();

        let file = file_row(repo_id, "image.bin");
        let result = pipeline.process(&file, &source_path, None).await.unwrap();
        assert_eq!(result.entity_count, 0);
        assert_eq!(vectors.count_for_file(file.id), 0);
    }

    #[tokio::test]
    async fn test_partial_entities_survive_parse_errors() {
        let dir = TempDir::new().unwrap();
        let (state, pipeline, _vectors) = setup(&dir).await;
        let repo_id = state.create_repository("sdk").await.unwrap();

        let source_path = dir.path().join("broken.py");
        std::fs::write(&source_path, "def good():\n    pass\n\ndef broken(:\n").unwrap();

        let file = file_row(repo_id, "broken.py");
        let result = pipeline
            .process(&file, &source_path, Some("python"))
            .await
            .unwrap();
        assert!(!result.parse_errors.is_empty());
        assert!(result.entity_count >= 1);
    }

    #[tokio::test]
    async fn test_search_finds_indexed_entity() {
        let dir = TempDir::new().unwrap();
        let (state, pipeline, vectors) = setup(&dir).await;
        let repo_id = state.create_repository("sdk").await.unwrap();

        let source_path = dir.path().join("util.py");
        std::fs::write(&source_path, "def parse_json(data):\n    pass\n").unwrap();

        let file = file_row(repo_id, "util.py");
        pipeline
            .process(&file, &source_path, Some("python"))
            .await
            .unwrap();

        let embedder = HashingEmbedder { dims: 16 };
        let builder = EmbeddingTextBuilder::new();
        let graph = RelationGraph::new(&state);
        let entity = &graph.get_entities_for_file(file.id).await.unwrap()[0];
        let query_vec = embedder.embed_query(&builder.build(entity)).await.unwrap();

        let hits = vectors.search(&query_vec, 5, &SearchFilters::default());
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0.qualified_name, "util.parse_json");
        assert!(hits[0].1 > 0.99);
    }
}
