//! Vector retrieval
//!
//! A spawned worker task owns the in-memory fragment mirror, loading it from
//! the backing store lazily on first use. Callers talk to it over an mpsc
//! channel with oneshot replies, so similarity scans and store mutations are
//! serialized off the caller's task.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

/// One embedded chunk of saved knowledge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeFragment {
    pub id: String,
    /// Source document this chunk came from
    pub parent_id: Option<String>,
    pub content: String,
    pub embedding: Vec<f64>,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// Durable backing store for knowledge fragments
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<KnowledgeFragment>>;
    async fn add(&self, fragments: Vec<KnowledgeFragment>) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// Produces embeddings for query text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f64>>;
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 for empty, mismatched-length, or zero vectors; never NaN.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    dot / denom
}

enum Request {
    Search {
        request_id: u64,
        embedding: Vec<f64>,
        top_k: usize,
        threshold: f64,
        reply: oneshot::Sender<Result<Vec<KnowledgeFragment>>>,
    },
    Add {
        request_id: u64,
        fragments: Vec<KnowledgeFragment>,
        reply: oneshot::Sender<Result<()>>,
    },
    Clear {
        request_id: u64,
        reply: oneshot::Sender<Result<()>>,
    },
    List {
        request_id: u64,
        reply: oneshot::Sender<Result<Vec<KnowledgeFragment>>>,
    },
}

/// Handle to the retrieval worker. Cloning is cheap.
#[derive(Clone)]
pub struct Retriever {
    tx: mpsc::Sender<Request>,
    next_id: Arc<AtomicU64>,
}

impl Retriever {
    /// Spawn the worker task around a backing store.
    pub fn spawn(store: Arc<dyn KnowledgeStore>) -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(worker(store, rx));
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send<T>(
        &self,
        request: Request,
        reply_rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.tx
            .send(request)
            .await
            .map_err(|_| Error::Retrieval("retrieval worker stopped".into()))?;
        reply_rx
            .await
            .map_err(|_| Error::Retrieval("retrieval worker dropped request".into()))?
    }

    /// Score every fragment against the query embedding, keep those at or
    /// above the threshold, and return the top_k best matches in descending
    /// order of similarity.
    pub async fn search(
        &self,
        embedding: Vec<f64>,
        top_k: usize,
        threshold: f64,
    ) -> Result<Vec<KnowledgeFragment>> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(
            Request::Search {
                request_id: self.request_id(),
                embedding,
                top_k,
                threshold,
                reply,
            },
            reply_rx,
        )
        .await
    }

    pub async fn add(&self, fragments: Vec<KnowledgeFragment>) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(
            Request::Add {
                request_id: self.request_id(),
                fragments,
                reply,
            },
            reply_rx,
        )
        .await
    }

    pub async fn clear(&self) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(
            Request::Clear {
                request_id: self.request_id(),
                reply,
            },
            reply_rx,
        )
        .await
    }

    pub async fn list(&self) -> Result<Vec<KnowledgeFragment>> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(
            Request::List {
                request_id: self.request_id(),
                reply,
            },
            reply_rx,
        )
        .await
    }
}

async fn worker(store: Arc<dyn KnowledgeStore>, mut rx: mpsc::Receiver<Request>) {
    let mut cache: Vec<KnowledgeFragment> = Vec::new();
    let mut loaded = false;

    while let Some(request) = rx.recv().await {
        match request {
            Request::Search {
                request_id,
                embedding,
                top_k,
                threshold,
                reply,
            } => {
                let result = match ensure_loaded(&store, &mut cache, &mut loaded).await {
                    Ok(()) => Ok(search_cache(&cache, &embedding, top_k, threshold)),
                    Err(e) => {
                        tracing::warn!("Retrieval search {} failed to load store: {}", request_id, e);
                        Err(e)
                    }
                };
                let _ = reply.send(result);
            }
            Request::Add {
                request_id,
                fragments,
                reply,
            } => {
                let result = match store.add(fragments.clone()).await {
                    Ok(()) => {
                        if loaded {
                            cache.extend(fragments);
                        }
                        Ok(())
                    }
                    Err(e) => {
                        tracing::warn!("Retrieval add {} failed: {}", request_id, e);
                        Err(e)
                    }
                };
                let _ = reply.send(result);
            }
            Request::Clear { request_id, reply } => {
                let result = match store.clear().await {
                    Ok(()) => {
                        cache.clear();
                        loaded = true;
                        Ok(())
                    }
                    Err(e) => {
                        tracing::warn!("Retrieval clear {} failed: {}", request_id, e);
                        Err(e)
                    }
                };
                let _ = reply.send(result);
            }
            Request::List { request_id, reply } => {
                let result = match ensure_loaded(&store, &mut cache, &mut loaded).await {
                    Ok(()) => Ok(cache.clone()),
                    Err(e) => {
                        tracing::warn!("Retrieval list {} failed to load store: {}", request_id, e);
                        Err(e)
                    }
                };
                let _ = reply.send(result);
            }
        }
    }
}

async fn ensure_loaded(
    store: &Arc<dyn KnowledgeStore>,
    cache: &mut Vec<KnowledgeFragment>,
    loaded: &mut bool,
) -> Result<()> {
    if !*loaded {
        *cache = store.load_all().await?;
        *loaded = true;
    }
    Ok(())
}

fn search_cache(
    cache: &[KnowledgeFragment],
    embedding: &[f64],
    top_k: usize,
    threshold: f64,
) -> Vec<KnowledgeFragment> {
    let mut scored: Vec<(f64, &KnowledgeFragment)> = cache
        .iter()
        .map(|fragment| (cosine_similarity(embedding, &fragment.embedding), fragment))
        .filter(|(score, _)| *score >= threshold)
        .collect();

    // sort_by is stable, so equal scores keep insertion order.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored.into_iter().map(|(_, f)| f.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;

    fn fragment(id: &str, embedding: Vec<f64>) -> KnowledgeFragment {
        KnowledgeFragment {
            id: id.into(),
            parent_id: None,
            content: format!("content for {id}"),
            embedding,
            chunk_index: 0,
            total_chunks: 1,
        }
    }

    struct MockStore {
        fragments: Mutex<Vec<KnowledgeFragment>>,
        load_count: AtomicU32,
    }

    impl MockStore {
        fn new(fragments: Vec<KnowledgeFragment>) -> Arc<Self> {
            Arc::new(Self {
                fragments: Mutex::new(fragments),
                load_count: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl KnowledgeStore for MockStore {
        async fn load_all(&self) -> Result<Vec<KnowledgeFragment>> {
            self.load_count.fetch_add(1, Ordering::Relaxed);
            Ok(self.fragments.lock().clone())
        }

        async fn add(&self, fragments: Vec<KnowledgeFragment>) -> Result<()> {
            self.fragments.lock().extend(fragments);
            Ok(())
        }

        async fn clear(&self) -> Result<()> {
            self.fragments.lock().clear();
            Ok(())
        }
    }

    #[test]
    fn test_cosine_self_similarity() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_zero_not_nan() {
        let zero = vec![0.0, 0.0, 0.0];
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&zero, &v);
        assert_eq!(sim, 0.0);
        assert!(!sim.is_nan());
    }

    #[test]
    fn test_cosine_mismatched_and_empty() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_lazy_load_happens_once() {
        let store = MockStore::new(vec![fragment("a", vec![1.0, 0.0])]);
        let retriever = Retriever::spawn(store.clone());

        retriever.search(vec![1.0, 0.0], 5, 0.0).await.unwrap();
        retriever.search(vec![0.0, 1.0], 5, 0.0).await.unwrap();

        assert_eq!(store.load_count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_search_ranks_filters_and_truncates() {
        let store = MockStore::new(vec![
            fragment("orthogonal", vec![0.0, 1.0]),
            fragment("exact", vec![1.0, 0.0]),
            fragment("partial", vec![1.0, 1.0]),
        ]);
        let retriever = Retriever::spawn(store);

        let results = retriever.search(vec![1.0, 0.0], 2, 0.5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "exact");
        assert_eq!(results[1].id, "partial");

        let strict = retriever.search(vec![1.0, 0.0], 10, 0.99).await.unwrap();
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].id, "exact");
    }

    #[tokio::test]
    async fn test_add_is_visible_without_reload() {
        let store = MockStore::new(vec![fragment("a", vec![1.0, 0.0])]);
        let retriever = Retriever::spawn(store.clone());

        // Force the lazy load first.
        retriever.search(vec![1.0, 0.0], 5, 0.0).await.unwrap();
        retriever
            .add(vec![fragment("b", vec![1.0, 0.0])])
            .await
            .unwrap();

        let results = retriever.search(vec![1.0, 0.0], 5, 0.0).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(store.load_count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_clear_empties_cache_and_store() {
        let store = MockStore::new(vec![fragment("a", vec![1.0, 0.0])]);
        let retriever = Retriever::spawn(store.clone());

        retriever.clear().await.unwrap();
        let results = retriever.search(vec![1.0, 0.0], 5, 0.0).await.unwrap();
        assert!(results.is_empty());
        assert!(store.fragments.lock().is_empty());
    }

    #[tokio::test]
    async fn test_list_returns_all_fragments() {
        let store = MockStore::new(vec![
            fragment("a", vec![1.0, 0.0]),
            fragment("b", vec![0.0, 1.0]),
        ]);
        let retriever = Retriever::spawn(store);

        let all = retriever.list().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
