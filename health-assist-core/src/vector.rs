//! Embedded vector retriever.
//!
//! A from-scratch brute-force cosine-similarity index over a small curated
//! health-document corpus. There is no embedding model available in this
//! deployment, so documents and queries are projected into a fixed-size
//! vector via a deterministic hashed bag-of-words scheme rather than a real
//! embedding model — this is a disclosed simplification of the distilled
//! system's ChromaDB-backed retriever, documented further in `DESIGN.md`.
//! The index is a process-wide singleton: it loads (or seeds) once and is
//! reused for the life of the process, matching the lazy-init-once semantics
//! of the retriever it replaces.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::VectorConfig;

const EMBEDDING_DIM: usize = 256;

/// A single retrieved passage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: String,
    pub id: String,
    pub source: String,
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedDocument {
    id: String,
    source: String,
    topic: String,
    chunk: String,
    embedding: Vec<f32>,
}

/// Persisted shape of the index file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedIndex {
    documents: Vec<IndexedDocument>,
}

/// Anaphoric markers that indicate a query is a follow-up referring back to
/// the conversation rather than standing alone.
const ANAPHORIC_MARKERS: &[&str] = &[
    "it", "that", "this", "those", "these", "again", "also", "too", "what about", "and",
];

pub struct VectorRetriever {
    config: Option<VectorConfig>,
    index: RwLock<Option<Vec<IndexedDocument>>>,
}

impl VectorRetriever {
    /// Construct a retriever. The index is not built until the first call to
    /// [`Self::retrieve`] — building it eagerly would slow process startup
    /// for a component most requests don't need on the graph-routed path.
    pub fn new(config: Option<VectorConfig>) -> Self {
        Self {
            config,
            index: RwLock::new(None),
        }
    }

    /// Small curated corpus, so a clone-out per call is cheap; avoids tying
    /// a borrowed reference to the lock guard across an `.await` boundary.
    async fn documents(&self) -> Vec<IndexedDocument> {
        if let Some(docs) = self.index.read().await.as_ref() {
            return docs.clone();
        }

        let mut guard = self.index.write().await;
        if guard.is_none() {
            *guard = Some(self.load_or_seed().await);
        }
        guard.as_ref().unwrap().clone()
    }

    async fn load_or_seed(&self) -> Vec<IndexedDocument> {
        let Some(config) = self.config.as_ref() else {
            return Self::seed_documents();
        };

        match Self::load_from_disk(&config.index_path).await {
            Ok(Some(docs)) if !docs.is_empty() => {
                tracing::info!(path = %config.index_path.display(), count = docs.len(), "loaded persisted vector index");
                docs
            }
            Ok(_) => {
                tracing::info!("no persisted vector index found, seeding builtin corpus");
                Self::seed_documents()
            }
            Err(e) => {
                tracing::warn!(error = %e, "vector index file is corrupt, falling back to builtin corpus without crashing");
                Self::seed_documents()
            }
        }
    }

    async fn load_from_disk(path: &PathBuf) -> std::io::Result<Option<Vec<IndexedDocument>>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = tokio::fs::read(path).await?;
        match bincode::deserialize::<PersistedIndex>(&bytes) {
            Ok(index) => Ok(Some(index.documents)),
            Err(e) => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        }
    }

    /// Persist the current in-memory index (builtin or loaded) to disk.
    pub async fn persist(&self) -> std::io::Result<()> {
        let Some(config) = self.config.as_ref() else {
            return Ok(());
        };
        let docs = self.documents().await;
        let bytes = bincode::serialize(&PersistedIndex { documents: docs })
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        if let Some(parent) = config.index_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&config.index_path, bytes).await
    }

    /// Retrieve the `k` most similar passages to `query`, optionally
    /// enhancing the query with keywords drawn from recent conversation
    /// history when it looks like a short follow-up.
    pub async fn retrieve(&self, query: &str, k: usize, history: &[String]) -> Vec<RetrievedChunk> {
        let effective_query = enhance_query(query, history);
        let query_embedding = embed(&effective_query);

        let docs = self.documents().await;
        let mut scored: Vec<(f32, &IndexedDocument)> = docs
            .iter()
            .map(|d| (cosine_similarity(&query_embedding, &d.embedding), d))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(k)
            .map(|(_, d)| RetrievedChunk {
                chunk: d.chunk.clone(),
                id: d.id.clone(),
                source: d.source.clone(),
                topic: d.topic.clone(),
            })
            .collect()
    }

    fn seed_documents() -> Vec<IndexedDocument> {
        let seed: &[(&str, &str, &str)] = &[
            (
                "fever-basics",
                "fever",
                "A fever is a temporary rise in body temperature, often due to illness. \
                 Stay hydrated, rest, and use fever-reducing medication as directed. \
                 Seek care if the fever is very high or lasts more than three days.",
            ),
            (
                "body-ache-fatigue",
                "fever",
                "Body ache and fatigue commonly accompany viral infections such as the flu. \
                 Gentle movement, rest, and adequate fluids typically help recovery.",
            ),
            (
                "chest-pain-overview",
                "chest pain",
                "Chest pain has many causes, from muscle strain to heart conditions. \
                 Sudden, severe, or crushing chest pain, especially with shortness of breath \
                 or sweating, needs emergency evaluation.",
            ),
            (
                "diabetes-management",
                "diabetes",
                "Managing diabetes involves monitoring blood sugar, following a balanced diet \
                 low in refined sugar, staying active, and taking prescribed medication \
                 consistently.",
            ),
            (
                "hypertension-management",
                "hypertension",
                "Hypertension is commonly managed with a low-sodium diet, regular exercise, \
                 stress reduction, and consistent blood pressure monitoring.",
            ),
            (
                "pregnancy-general-care",
                "pregnancy",
                "Routine prenatal checkups, balanced nutrition, and avoiding contraindicated \
                 medication are central to a healthy pregnancy. Severe symptoms should be \
                 reported to an obstetrician immediately.",
            ),
            (
                "asthma-triggers",
                "asthma",
                "Asthma symptoms are often triggered by allergens, cold air, or exertion. \
                 A rescue inhaler and an action plan from a clinician help manage flare-ups.",
            ),
            (
                "headache-types",
                "headache",
                "Tension headaches, migraines, and sinus headaches have different patterns. \
                 Frequent or unusually severe headaches warrant medical review.",
            ),
        ];

        seed.iter()
            .map(|(id, topic, chunk)| IndexedDocument {
                id: (*id).to_string(),
                source: "curated-health-corpus".to_string(),
                topic: (*topic).to_string(),
                chunk: (*chunk).to_string(),
                embedding: embed(chunk),
            })
            .collect()
    }
}

/// Expand a short, anaphoric-looking query with keywords drawn from the most
/// recent conversation turns, so a follow-up like "what about it" still
/// retrieves relevant context.
fn enhance_query(query: &str, history: &[String]) -> String {
    let word_count = query.split_whitespace().count();
    let looks_like_followup = word_count < 5
        || ANAPHORIC_MARKERS
            .iter()
            .any(|marker| query.to_lowercase().contains(marker));

    if !looks_like_followup || history.is_empty() {
        return query.to_string();
    }

    let recent_keywords: Vec<&str> = history
        .iter()
        .rev()
        .take(4)
        .flat_map(|turn| turn.split_whitespace())
        .filter(|w| w.len() > 4)
        .take(12)
        .collect();

    if recent_keywords.is_empty() {
        query.to_string()
    } else {
        format!("{} {}", query, recent_keywords.join(" "))
    }
}

/// Deterministic pseudo-embedding: hash each lowercased word into a bucket
/// of a fixed-size vector and accumulate, then L2-normalize. Not a semantic
/// embedding — it approximates lexical overlap, which is sufficient for the
/// small curated corpus this index serves.
fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0f32; EMBEDDING_DIM];
    for word in text.to_lowercase().split_whitespace() {
        let bucket = hash_word(word) % EMBEDDING_DIM as u64;
        vector[bucket as usize] += 1.0;
    }
    normalize(&mut vector);
    vector
}

fn hash_word(word: &str) -> u64 {
    // FNV-1a, good enough for deterministic bucket assignment.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retrieve_returns_topically_relevant_chunk() {
        let retriever = VectorRetriever::new(None);
        let results = retriever.retrieve("I have a high fever and body ache", 2, &[]).await;
        assert!(!results.is_empty());
        assert!(results.iter().any(|r| r.topic == "fever"));
    }

    #[tokio::test]
    async fn retrieve_respects_k() {
        let retriever = VectorRetriever::new(None);
        let results = retriever.retrieve("diabetes management", 1, &[]).await;
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn enhance_query_expands_short_followups() {
        let history = vec!["I have chest pain and shortness of breath".to_string()];
        let enhanced = enhance_query("what about it", &history);
        assert!(enhanced.contains("shortness"));
    }

    #[test]
    fn enhance_query_leaves_full_questions_alone() {
        let history = vec!["unrelated prior turn".to_string()];
        let query = "what foods should a diabetic avoid eating daily";
        assert_eq!(enhance_query(query, &history), query);
    }

    #[test]
    fn embeddings_are_normalized() {
        let v = embed("fever and body ache");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }
}
