//! Deterministic stand-ins for the external collaborators.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ChainError, EmbeddingError, LlmError, SessionError, VectorStoreError};
use crate::models::{Identity, RetrievalConfig, VectorStoreConfig};
use crate::services::chain::{ChainFactory, DefaultChainFactory, RetrievalChain};
use crate::services::identity::IdentityResolver;
use crate::services::{Embedder, LanguageModel};
use crate::services::session::Clock;
use crate::services::vector_store::{MemoryBackend, VectorBackend};

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// Text between `<tag>` and `</tag>` block delimiters of a rendered prompt.
pub fn prompt_section<'a>(prompt: &'a str, tag: &str) -> &'a str {
    let open = format!("\n<{tag}>\n");
    let close = format!("\n</{tag}>");
    let Some(start) = prompt.find(&open).map(|i| i + open.len()) else {
        return "";
    };
    match prompt[start..].find(&close) {
        Some(end) => &prompt[start..start + end],
        None => "",
    }
}

/// Bag-of-words embedder: each word bumps one hashed dimension.
pub struct HashEmbedder {
    dimension: usize,
    batch_calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            batch_calls: AtomicUsize::new(0),
        }
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for word in words(text) {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            v[(hasher.finish() % self.dimension as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Answers with the first context line sharing a word (longer than three
/// letters) with the question, and declines with the marker otherwise.
pub struct ContextEchoModel {
    marker: String,
}

impl ContextEchoModel {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
        }
    }
}

#[async_trait]
impl LanguageModel for ContextEchoModel {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let question: HashSet<String> = words(prompt_section(prompt, "qs"))
            .filter(|w| w.len() > 3)
            .collect();

        let answer = prompt_section(prompt, "ctx")
            .lines()
            .find(|line| words(line).any(|w| question.contains(&w)));

        Ok(match answer {
            Some(line) => line.trim().to_string(),
            None => self.marker.clone(),
        })
    }

    fn name(&self) -> &str {
        "context-echo"
    }
}

/// Slow model recording the order questions reach it and how many calls
/// overlap.
pub struct RecordingModel {
    delay: Duration,
    order: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingModel {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            order: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for RecordingModel {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let question = prompt_section(prompt, "qs").to_string();
        self.order.lock().unwrap().push(question.clone());
        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(format!("answer to {question}"))
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Fixed token table.
#[derive(Default)]
pub struct StaticIdentityResolver {
    identities: HashMap<String, Identity>,
    calls: AtomicUsize,
}

impl StaticIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, token: &str, identity: Identity) -> Self {
        self.identities.insert(token.to_string(), identity);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, bearer_token: &str) -> Result<Identity, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.identities
            .get(bearer_token)
            .cloned()
            .ok_or_else(|| SessionError::IdentityResolution("unknown token".to_string()))
    }
}

/// Real chains over an in-memory backend, counting how many were built.
pub struct CountingChainFactory {
    inner: DefaultChainFactory,
    builds: AtomicUsize,
    failing: Mutex<HashSet<String>>,
}

impl CountingChainFactory {
    pub const DIMENSION: usize = 32;

    pub fn new() -> Self {
        let backend: Arc<dyn VectorBackend> = Arc::new(MemoryBackend::new(
            &VectorStoreConfig::default(),
            Self::DIMENSION,
        ));
        Self::with_backend(backend)
    }

    pub fn with_backend(backend: Arc<dyn VectorBackend>) -> Self {
        let config = RetrievalConfig::default();
        let model = Arc::new(ContextEchoModel::new(&config.insufficient_context_marker));
        Self {
            inner: DefaultChainFactory::new(
                backend,
                Arc::new(HashEmbedder::new(Self::DIMENSION)),
                model,
                config,
            ),
            builds: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Make every later build for `tenant_id` fail.
    pub fn fail_builds_for(&self, tenant_id: &str) {
        self.failing.lock().unwrap().insert(tenant_id.to_string());
    }
}

#[async_trait]
impl ChainFactory for CountingChainFactory {
    async fn build(&self, tenant_id: &str) -> Result<Arc<RetrievalChain>, ChainError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        // Widen the race window for concurrent first resolutions.
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.failing.lock().unwrap().contains(tenant_id) {
            return Err(ChainError::VectorStore(VectorStoreError::ConnectionError(
                "vector store unavailable".to_string(),
            )));
        }
        self.inner.build(tenant_id).await
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += TimeDelta::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
