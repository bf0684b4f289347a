use std::{cmp::Ordering, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    config_manager::ConfigManager,
    errors::{AppError, AppResult},
};

/// A chunk of a learned file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    /// Path of the file the chunk was read from.
    pub source: String,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn relevant_documents(&self, query: &str, k: usize) -> AppResult<Vec<Document>>;
}

/// In-memory vector store ranked by cosine similarity
#[derive(Default)]
pub struct EmbeddingIndex {
    entries: RwLock<Vec<(Document, Vec<f32>)>>,
}

impl EmbeddingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, documents: Vec<Document>, vectors: Vec<Vec<f32>>) -> AppResult<()> {
        if documents.len() != vectors.len() {
            return Err(AppError::internal(
                "mismatching number of documents and embeddings",
                serde_json::json!({ "documents": documents.len(), "embeddings": vectors.len() }),
            ));
        }
        self.entries.write().await.extend(documents.into_iter().zip(vectors));
        Ok(())
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// The `k` documents closest to `query`, best first.
    pub async fn search(&self, query: &[f32], k: usize) -> Vec<Document> {
        let entries = self.entries.read().await;
        let mut scored: Vec<(f32, &Document)> = entries
            .iter()
            .map(|(document, vector)| (cosine_similarity(query, vector), document))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.into_iter().take(k).map(|(_, d)| d.clone()).collect()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Retrieves learned documents using the selected embedding model
pub struct IndexRetriever {
    index: Arc<EmbeddingIndex>,
    config_manager: Arc<ConfigManager>,
}

impl IndexRetriever {
    pub fn new(index: Arc<EmbeddingIndex>, config_manager: Arc<ConfigManager>) -> Self {
        Self { index, config_manager }
    }
}

#[async_trait]
impl Retriever for IndexRetriever {
    async fn relevant_documents(&self, query: &str, k: usize) -> AppResult<Vec<Document>> {
        if self.index.is_empty().await {
            return Ok(Vec::new());
        }
        let (provider, model) = self
            .config_manager
            .embedding_model()
            .await?
            .ok_or_else(|| AppError::bad_request("No embedding model selected"))?;
        let query_vector = provider.embed_query(&model, query).await?;
        Ok(self.index.search(&query_vector, k).await)
    }
}

/// Split `text` into windows of `chunk_size` characters, consecutive
/// windows sharing `overlap` characters.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}
