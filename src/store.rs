use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::embeddings::EmbeddingService;
use crate::ingest;

const INDEX_FILE: &str = "index.json";

/// Written only after a successful build. Its presence is the signal that a
/// persisted store exists and is consistent; a process killed mid-build
/// leaves no marker and the next start rebuilds.
const COMPLETE_MARKER: &str = ".complete";

const STORE_VERSION: u32 = 1;

/// A chunk as persisted: text, provenance, and its unit-normalized embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub page: usize,
    pub offset: usize,
    pub embedding: Vec<f32>,
}

#[derive(Serialize)]
struct PersistedState<'a> {
    version: u32,
    model: &'a str,
    chunks: &'a [StoredChunk],
}

#[derive(Deserialize)]
struct LoadedState {
    version: u32,
    model: String,
    chunks: Vec<StoredChunk>,
}

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub text: String,
    pub score: f32,
    pub page: usize,
}

/// Persisted vector store over one document, bound to the embedding client
/// used both at build time and at query time. Read-only after construction.
pub struct VectorStore {
    chunks: Vec<StoredChunk>,
    embeddings: Arc<EmbeddingService>,
    store_dir: PathBuf,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("chunks", &self.chunks.len())
            .field("store_dir", &self.store_dir)
            .finish_non_exhaustive()
    }
}

impl VectorStore {
    /// Build the store from the source PDF if no complete persisted copy
    /// exists, otherwise load the persisted copy. Exactly one of the two
    /// happens per process start.
    pub async fn build_or_load(config: &Config, embeddings: Arc<EmbeddingService>) -> Result<Self> {
        let store_dir = PathBuf::from(&config.store_dir);

        if Self::is_complete(&store_dir) {
            tracing::info!("Loading existing vector store from {:?}", store_dir);
            return Self::load(&store_dir, embeddings).await;
        }

        tracing::info!(
            "Creating vector store from PDF document {} ...",
            config.pdf_path
        );
        Self::build(&config.pdf_path, &store_dir, embeddings).await
    }

    /// True when the store directory holds a completed build.
    pub fn is_complete(store_dir: &Path) -> bool {
        store_dir.join(COMPLETE_MARKER).exists() && store_dir.join(INDEX_FILE).exists()
    }

    async fn build(
        pdf_path: &str,
        store_dir: &Path,
        embeddings: Arc<EmbeddingService>,
    ) -> Result<Self> {
        let path = PathBuf::from(pdf_path);
        let pages = tokio::task::spawn_blocking(move || ingest::load_pdf_pages(&path))
            .await
            .context("PDF extraction task failed")??;

        let fragments = ingest::chunk_pages(&pages);
        if fragments.is_empty() {
            return Err(anyhow::anyhow!("Document produced no chunks"));
        }
        tracing::info!("Created {} chunks", fragments.len());

        let texts: Vec<String> = fragments.iter().map(|c| c.text.clone()).collect();
        let vectors = embeddings.embed_texts(&texts).await?;
        if vectors.len() != fragments.len() {
            return Err(anyhow::anyhow!(
                "Received {} embeddings for {} chunks",
                vectors.len(),
                fragments.len()
            ));
        }

        let chunks: Vec<StoredChunk> = fragments
            .into_iter()
            .zip(vectors)
            .map(|(fragment, mut embedding)| {
                normalize(&mut embedding);
                StoredChunk {
                    id: Uuid::new_v4().to_string(),
                    text: fragment.text,
                    page: fragment.page,
                    offset: fragment.offset,
                    embedding,
                }
            })
            .collect();

        let store = Self {
            chunks,
            embeddings,
            store_dir: store_dir.to_path_buf(),
        };
        store.save().await?;

        tracing::info!(
            "Vector store created and persisted with {} chunks",
            store.chunks.len()
        );
        Ok(store)
    }

    /// Persist the chunks atomically, then write the completion marker.
    async fn save(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.store_dir)
            .await
            .context("Failed to create store directory")?;

        let final_path = self.store_dir.join(INDEX_FILE);
        let temp_path = self.store_dir.join(format!("{INDEX_FILE}.tmp"));

        let state = PersistedState {
            version: STORE_VERSION,
            model: self.embeddings.model_name(),
            chunks: &self.chunks,
        };
        let data = serde_json::to_string(&state)?;

        tokio::fs::write(&temp_path, data)
            .await
            .context("Failed to write index to temporary file")?;
        tokio::fs::rename(&temp_path, &final_path)
            .await
            .context("Failed to commit index file (atomic rename)")?;

        tokio::fs::write(self.store_dir.join(COMPLETE_MARKER), b"")
            .await
            .context("Failed to write completion marker")?;

        Ok(())
    }

    async fn load(store_dir: &Path, embeddings: Arc<EmbeddingService>) -> Result<Self> {
        let data = tokio::fs::read_to_string(store_dir.join(INDEX_FILE))
            .await
            .context("Failed to read persisted index")?;
        let state: LoadedState =
            serde_json::from_str(&data).context("Failed to parse persisted index")?;

        if state.version != STORE_VERSION {
            return Err(anyhow::anyhow!(
                "Unsupported store version {} (expected {})",
                state.version,
                STORE_VERSION
            ));
        }

        if state.model != embeddings.model_name() {
            tracing::warn!(
                "Persisted store was built with model '{}' but '{}' is configured; \
                 delete {:?} to rebuild",
                state.model,
                embeddings.model_name(),
                store_dir
            );
        }

        tracing::info!("Loaded {} chunks from persisted store", state.chunks.len());

        Ok(Self {
            chunks: state.chunks,
            embeddings,
            store_dir: store_dir.to_path_buf(),
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Embed the query and return the `top_k` nearest chunks.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let mut query_embedding = self.embeddings.get_query_embedding(query).await?;
        normalize(&mut query_embedding);
        Ok(self.search_by_embedding(&query_embedding, top_k))
    }

    /// Nearest-neighbor lookup over the stored chunks by normalized dot
    /// product, descending.
    pub fn search_by_embedding(&self, query_embedding: &[f32], top_k: usize) -> Vec<SearchResult> {
        let mut scored: Vec<(f32, &StoredChunk)> = self
            .chunks
            .iter()
            .map(|chunk| (dot_product(query_embedding, &chunk.embedding), chunk))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(top_k)
            .map(|(score, chunk)| SearchResult {
                text: chunk.text.clone(),
                score,
                page: chunk.page,
            })
            .collect()
    }

    #[cfg(test)]
    fn from_parts(
        chunks: Vec<StoredChunk>,
        embeddings: Arc<EmbeddingService>,
        store_dir: PathBuf,
    ) -> Self {
        Self {
            chunks,
            embeddings,
            store_dir,
        }
    }
}

/// Scale the vector to unit length. Near-zero vectors are left unchanged.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::IamTokenProvider;

    fn test_embeddings() -> Arc<EmbeddingService> {
        let iam = Arc::new(IamTokenProvider::new("test-key").unwrap());
        Arc::new(EmbeddingService::new("https://example.invalid", "proj", iam).unwrap())
    }

    fn chunk(id: &str, text: &str, page: usize, embedding: Vec<f32>) -> StoredChunk {
        StoredChunk {
            id: id.to_string(),
            text: text.to_string(),
            page,
            offset: 0,
            embedding,
        }
    }

    #[test]
    fn normalize_produces_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        let mut v = vec![0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn dot_product_of_mismatched_lengths_is_zero() {
        assert_eq!(dot_product(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn search_orders_by_score_and_respects_top_k() {
        let temp = tempfile::tempdir().unwrap();
        let store = VectorStore::from_parts(
            vec![
                chunk("a", "far", 1, vec![0.0, 1.0]),
                chunk("b", "near", 2, vec![1.0, 0.0]),
                chunk("c", "middling", 3, {
                    let mut v = vec![1.0, 1.0];
                    normalize(&mut v);
                    v
                }),
            ],
            test_embeddings(),
            temp.path().to_path_buf(),
        );

        let results = store.search_by_embedding(&[1.0, 0.0], 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "near");
        assert_eq!(results[0].page, 2);
        assert_eq!(results[1].text, "middling");
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn search_returns_all_chunks_when_k_exceeds_store() {
        let temp = tempfile::tempdir().unwrap();
        let store = VectorStore::from_parts(
            vec![chunk("a", "only", 1, vec![1.0, 0.0])],
            test_embeddings(),
            temp.path().to_path_buf(),
        );
        assert_eq!(store.search_by_embedding(&[1.0, 0.0], 10).len(), 1);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().to_path_buf();
        let store = VectorStore::from_parts(
            vec![
                chunk("a", "first chunk", 1, vec![1.0, 0.0]),
                chunk("b", "second chunk", 4, vec![0.0, 1.0]),
            ],
            test_embeddings(),
            dir.clone(),
        );

        store.save().await.unwrap();
        assert!(VectorStore::is_complete(&dir));

        let loaded = VectorStore::load(&dir, test_embeddings()).await.unwrap();
        assert_eq!(loaded.chunk_count(), 2);
        let results = loaded.search_by_embedding(&[0.0, 1.0], 1);
        assert_eq!(results[0].text, "second chunk");
        assert_eq!(results[0].page, 4);
    }

    #[tokio::test]
    async fn directory_without_marker_is_not_complete() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().to_path_buf();
        let store = VectorStore::from_parts(
            vec![chunk("a", "text", 1, vec![1.0])],
            test_embeddings(),
            dir.clone(),
        );
        store.save().await.unwrap();

        // Simulate a kill between index write and marker write.
        std::fs::remove_file(dir.join(COMPLETE_MARKER)).unwrap();
        assert!(!VectorStore::is_complete(&dir));
    }

    #[tokio::test]
    async fn load_rejects_unknown_version() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().to_path_buf();
        std::fs::write(
            dir.join(INDEX_FILE),
            r#"{"version": 99, "model": "m", "chunks": []}"#,
        )
        .unwrap();

        let err = VectorStore::load(&dir, test_embeddings())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("version"));
    }
}
