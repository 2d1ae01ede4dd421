//! Dense-vector store with cosine k-nearest-neighbor search.
//!
//! Vectors live in memory keyed by vector id and are persisted as a JSON
//! snapshot in the data directory (loaded on open, flushed after every
//! mutation via temp-file rename). Search is brute-force cosine similarity
//! with attribute pre-filters, scores mapped into [0, 1].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// One stored vector with the entity attributes search filters on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub file_id: Uuid,
    pub qualified_name: String,
    pub simple_name: String,
    pub entity_type: String,
    pub language: String,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub vector: Vec<f32>,
    pub embedding_text: String,
    pub visibility: String,
    pub is_exported: bool,
    pub has_docstring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
}

/// Attribute filters applied before scoring.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub repository_id: Option<Uuid>,
    pub language: Option<String>,
    pub entity_type: Option<String>,
}

impl SearchFilters {
    fn matches(&self, record: &VectorRecord) -> bool {
        if let Some(repo) = self.repository_id
            && record.repository_id != repo
        {
            return false;
        }
        if let Some(lang) = &self.language
            && !record.language.eq_ignore_ascii_case(lang)
        {
            return false;
        }
        if let Some(ty) = &self.entity_type
            && !record.entity_type.eq_ignore_ascii_case(ty)
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    dimensions: usize,
    records: Vec<VectorRecord>,
}

/// Snapshot-backed vector store.
pub struct VectorStore {
    path: PathBuf,
    dimensions: usize,
    records: RwLock<HashMap<Uuid, VectorRecord>>,
}

impl VectorStore {
    /// Open the store, loading an existing snapshot when present.
    pub fn open(path: &Path, dimensions: usize) -> StoreResult<Self> {
        let mut records = HashMap::new();
        if path.exists() {
            let data = std::fs::read_to_string(path).map_err(|e| StoreError::VectorSnapshot {
                path: path.to_path_buf(),
                operation: "read",
                reason: e.to_string(),
            })?;
            let snapshot: Snapshot =
                serde_json::from_str(&data).map_err(|e| StoreError::VectorSnapshot {
                    path: path.to_path_buf(),
                    operation: "parsed",
                    reason: e.to_string(),
                })?;
            for record in snapshot.records {
                records.insert(record.id, record);
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            dimensions,
            records: RwLock::new(records),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("vector store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace records by id, then flush the snapshot.
    pub fn upsert(&self, batch: Vec<VectorRecord>) -> StoreResult<()> {
        {
            let mut records = self.records.write().expect("vector store lock poisoned");
            for record in batch {
                records.insert(record.id, record);
            }
        }
        self.flush()
    }

    /// Remove every record belonging to a file. Returns how many were
    /// removed.
    pub fn delete_by_file(&self, file_id: Uuid) -> StoreResult<u64> {
        let removed = {
            let mut records = self.records.write().expect("vector store lock poisoned");
            let before = records.len();
            records.retain(|_, r| r.file_id != file_id);
            (before - records.len()) as u64
        };
        if removed > 0 {
            self.flush()?;
        }
        Ok(removed)
    }

    pub fn count_for_file(&self, file_id: Uuid) -> u64 {
        self.records
            .read()
            .expect("vector store lock poisoned")
            .values()
            .filter(|r| r.file_id == file_id)
            .count() as u64
    }

    /// k-nearest-neighbor search over records passing the filters. Returns
    /// `(record, score)` pairs, best first, scores in [0, 1].
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Vec<(VectorRecord, f64)> {
        let records = self.records.read().expect("vector store lock poisoned");
        let mut scored: Vec<(VectorRecord, f64)> = records
            .values()
            .filter(|r| filters.matches(r))
            .map(|r| {
                let score = (f64::from(cosine_similarity(query, &r.vector)) + 1.0) / 2.0;
                (r.clone(), score.clamp(0.0, 1.0))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }

    pub fn get(&self, id: Uuid) -> Option<VectorRecord> {
        self.records
            .read()
            .expect("vector store lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Write the snapshot atomically (temp file + rename).
    fn flush(&self) -> StoreResult<()> {
        let snapshot = {
            let records = self.records.read().expect("vector store lock poisoned");
            Snapshot {
                dimensions: self.dimensions,
                records: records.values().cloned().collect(),
            }
        };
        let data = serde_json::to_string(&snapshot).map_err(|e| StoreError::VectorSnapshot {
            path: self.path.clone(),
            operation: "serialized",
            reason: e.to_string(),
        })?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::VectorSnapshot {
                path: self.path.clone(),
                operation: "written",
                reason: e.to_string(),
            })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data).map_err(|e| StoreError::VectorSnapshot {
            path: self.path.clone(),
            operation: "written",
            reason: e.to_string(),
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StoreError::VectorSnapshot {
            path: self.path.clone(),
            operation: "written",
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

/// Cosine similarity between two vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }
    dot_product / (magnitude_a * magnitude_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(file_id: Uuid, qualified: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            file_id,
            qualified_name: qualified.to_string(),
            simple_name: qualified.rsplit('.').next().unwrap().to_string(),
            entity_type: "function".to_string(),
            language: "python".to_string(),
            file_path: "src/a.py".to_string(),
            line_start: 1,
            line_end: 5,
            vector,
            embedding_text: qualified.to_string(),
            visibility: "public".to_string(),
            is_exported: false,
            has_docstring: false,
            signature: None,
            docstring: None,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        let v1 = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&v1, &[1.0, 0.0, 0.0]) - 1.0).abs() < 0.001);
        assert!((cosine_similarity(&v1, &[0.0, 1.0, 0.0])).abs() < 0.001);
        assert!((cosine_similarity(&v1, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_search_orders_and_maps_scores() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(&dir.path().join("vectors.json"), 3).unwrap();
        let file_id = Uuid::new_v4();

        store
            .upsert(vec![
                record(file_id, "m.close_match", vec![1.0, 0.1, 0.0]),
                record(file_id, "m.far_match", vec![0.0, 1.0, 0.0]),
            ])
            .unwrap();

        let results = store.search(&[1.0, 0.0, 0.0], 10, &SearchFilters::default());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.qualified_name, "m.close_match");
        assert!(results[0].1 > results[1].1);
        for (_, score) in &results {
            assert!((0.0..=1.0).contains(score));
        }
    }

    #[test]
    fn test_filters_restrict_results() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(&dir.path().join("vectors.json"), 3).unwrap();
        let file_id = Uuid::new_v4();

        let mut py = record(file_id, "m.a", vec![1.0, 0.0, 0.0]);
        py.language = "python".to_string();
        let mut go = record(file_id, "m.b", vec![1.0, 0.0, 0.0]);
        go.language = "go".to_string();
        store.upsert(vec![py, go]).unwrap();

        let filters = SearchFilters {
            language: Some("go".to_string()),
            ..Default::default()
        };
        let results = store.search(&[1.0, 0.0, 0.0], 10, &filters);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.qualified_name, "m.b");
    }

    #[test]
    fn test_delete_by_file() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(&dir.path().join("vectors.json"), 3).unwrap();
        let keep_file = Uuid::new_v4();
        let drop_file = Uuid::new_v4();

        store
            .upsert(vec![
                record(keep_file, "m.keep", vec![1.0, 0.0, 0.0]),
                record(drop_file, "m.drop1", vec![0.0, 1.0, 0.0]),
                record(drop_file, "m.drop2", vec![0.0, 0.0, 1.0]),
            ])
            .unwrap();

        assert_eq!(store.delete_by_file(drop_file).unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.count_for_file(keep_file), 1);
        assert_eq!(store.count_for_file(drop_file), 0);
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.json");
        let file_id = Uuid::new_v4();

        {
            let store = VectorStore::open(&path, 3).unwrap();
            store
                .upsert(vec![record(file_id, "m.persisted", vec![1.0, 0.0, 0.0])])
                .unwrap();
        }

        let reopened = VectorStore::open(&path, 3).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.count_for_file(file_id), 1);
    }
}
