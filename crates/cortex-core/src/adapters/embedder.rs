//! The Embedder adapter: text → vector, and vector–vector similarity.
//!
//! The core never assumes cosine, and never leaks vector dimensionality into
//! the engines — engines only ever call `embed`/`similarity` and pass the
//! resulting opaque `Vec<f32>` around.

use crate::error::AdapterError;
use async_trait::async_trait;
use lru::LruCache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Text→vector embedding and vector similarity, supplied by a deployment.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Declared vector dimension, D. Every embedding this adapter returns has
    /// exactly this length.
    fn dimensions(&self) -> usize;

    /// Embed a single piece of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AdapterError>;

    /// Similarity between two embeddings, in `[0, 1]`.
    fn similarity(&self, a: &[f32], b: &[f32]) -> f32;
}

/// Wraps any `Embedder` with a bounded, never-invalidated `text-hash →
/// vector` cache. Owned by the adapter, not by engines, so every caller
/// benefits without threading cache state through engine constructors.
pub struct CachedEmbedder<E: Embedder> {
    inner: E,
    cache: Mutex<LruCache<u64, Vec<f32>>>,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn hash_text(text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CachedEmbedder<E> {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AdapterError> {
        let key = Self::hash_text(text);
        if let Some(cached) = self.cache.lock().unwrap().get(&key) {
            return Ok(cached.clone());
        }
        let vector = self.inner.embed(text).await?;
        self.cache.lock().unwrap().put(key, vector.clone());
        Ok(vector)
    }

    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        self.inner.similarity(a, b)
    }
}

/// Cosine similarity, clamped to `[0, 1]` (negative cosines floor to 0 so the
/// result always satisfies the Embedder contract's declared range).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom <= 0.0 {
        0.0
    } else {
        (dot / denom).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn dimensions(&self) -> usize {
            4
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut v = vec![0.0f32; 4];
            for (i, b) in text.bytes().enumerate() {
                v[i % 4] += b as f32;
            }
            Ok(v)
        }

        fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
            cosine_similarity(a, b)
        }
    }

    #[tokio::test]
    async fn cache_avoids_repeat_embed_calls() {
        let embedder = CachedEmbedder::new(
            CountingEmbedder {
                calls: AtomicUsize::new(0),
            },
            16,
        );
        let v1 = embedder.embed("hello world").await.unwrap();
        let v2 = embedder.embed("hello world").await.unwrap();
        assert_eq!(v1, v2);
        assert_eq!(embedder.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cosine_similarity_identical_is_one() {
        let a = [1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_is_zero() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }
}
