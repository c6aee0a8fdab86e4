//! Retrieval chain: retrieve, assemble prompt, generate.
//!
//! A [`RetrievalChain`] binds one tenant's index to the shared embedder and
//! language model, and keeps a bounded conversation memory for the session
//! that owns it. Chains are built by a [`ChainFactory`] so the session layer
//! can be tested without real backends.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::ChainError;
use crate::models::{RetrievalConfig, RetrievalResult, ScoredChunk, SourceExcerpt};
use crate::services::embedding::Embedder;
use crate::services::llm::LanguageModel;
use crate::services::vector_store::{VectorBackend, VectorIndex};
use crate::utils::estimate_tokens;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Turn {
    query: String,
    answer: String,
}

impl Turn {
    fn render(&self) -> String {
        format!("Human: {}\nAssistant: {}\n", self.query, self.answer)
    }
}

/// Recent question/answer turns, oldest evicted first once the rendered
/// history exceeds the token budget.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    token_budget: usize,
}

impl ConversationMemory {
    pub fn new(token_budget: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            token_budget,
        }
    }

    pub fn push(&mut self, query: impl Into<String>, answer: impl Into<String>) {
        self.turns.push_back(Turn {
            query: query.into(),
            answer: answer.into(),
        });
        while !self.turns.is_empty() && self.estimated_tokens() > self.token_budget {
            self.turns.pop_front();
        }
    }

    pub fn render(&self) -> String {
        self.turns.iter().map(Turn::render).collect()
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.render())
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// The grounded-answer prompt.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    insufficient_context_marker: String,
    answer_language: Option<String>,
}

impl PromptTemplate {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            insufficient_context_marker: config.insufficient_context_marker.clone(),
            answer_language: config.answer_language.clone(),
        }
    }

    pub fn insufficient_context_marker(&self) -> &str {
        &self.insufficient_context_marker
    }

    pub fn render(&self, context: &[ScoredChunk], history: &str, question: &str) -> String {
        let context_text = context
            .iter()
            .map(|c| c.chunk.text.trim())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut instruction = format!(
            "Use the following context (delimited by <ctx></ctx>) and the chat history \
             (delimited by <hs></hs>) to answer the question (delimited by <qs></qs>). \
             Answer based solely on the context. If you cannot answer solely based on the \
             context, reply with exactly \"{}\" instead of making something up.",
            self.insufficient_context_marker
        );
        if let Some(language) = &self.answer_language {
            instruction.push_str(&format!(" Answer in {language}."));
        }

        format!(
            "{instruction}\n------\n<ctx>\n{context_text}\n</ctx>\n------\n<hs>\n{history}\n</hs>\n------\n<qs>\n{question}\n</qs>\nAnswer:\n"
        )
    }
}

/// Keep the top-ranked chunks whose combined estimated tokens fit `budget`.
///
/// Stops at the first chunk that would overflow; chunks are never cut.
pub fn fit_to_budget(chunks: Vec<ScoredChunk>, budget: usize) -> Vec<ScoredChunk> {
    let mut used = 0;
    let mut kept = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let tokens = estimate_tokens(&chunk.chunk.text);
        if used + tokens > budget {
            break;
        }
        used += tokens;
        kept.push(chunk);
    }
    kept
}

/// Answers queries against one tenant's documents.
pub struct RetrievalChain {
    tenant_id: String,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn LanguageModel>,
    template: PromptTemplate,
    retrieval_k: usize,
    context_token_budget: usize,
    memory: Mutex<ConversationMemory>,
}

impl RetrievalChain {
    pub fn new(
        tenant_id: impl Into<String>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            index,
            embedder,
            model,
            template: PromptTemplate::new(config),
            retrieval_k: config.retrieval_k as usize,
            context_token_budget: config.context_token_budget as usize,
            memory: Mutex::new(ConversationMemory::new(config.memory_token_budget as usize)),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Number of turns currently remembered.
    pub fn memory_len(&self) -> usize {
        self.memory.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Retrieve, prompt, generate, and remember the turn.
    ///
    /// An empty retrieval is not an error: the model still runs and is
    /// expected to decline.
    pub async fn answer(&self, query: &str) -> Result<RetrievalResult, ChainError> {
        let embedding = self.embedder.embed(query).await?;
        let retrieved = self.index.query(&embedding, self.retrieval_k).await?;
        let retrieved_count = retrieved.len();
        let context = fit_to_budget(retrieved, self.context_token_budget);

        if context.len() < retrieved_count {
            tracing::debug!(
                tenant = %self.tenant_id,
                retrieved = retrieved_count,
                kept = context.len(),
                "context budget reduced retrieved chunks"
            );
        }

        let history = self
            .memory
            .lock()
            .map_err(|e| ChainError::Memory(e.to_string()))?
            .render();
        let prompt = self.template.render(&context, &history, query);

        let answer_text = self.model.generate(&prompt).await?;

        self.memory
            .lock()
            .map_err(|e| ChainError::Memory(e.to_string()))?
            .push(query, answer_text.clone());

        let sources = context
            .into_iter()
            .map(|c| SourceExcerpt {
                source_path: c.chunk.source_path,
                excerpt_text: c.chunk.text,
            })
            .collect();

        Ok(RetrievalResult {
            answer_text,
            sources,
        })
    }
}

/// Builds retrieval chains for tenants.
#[async_trait]
pub trait ChainFactory: Send + Sync {
    async fn build(&self, tenant_id: &str) -> Result<Arc<RetrievalChain>, ChainError>;
}

/// Builds chains over a vector backend with shared model handles.
pub struct DefaultChainFactory {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn LanguageModel>,
    config: RetrievalConfig,
}

impl DefaultChainFactory {
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            backend,
            embedder,
            model,
            config,
        }
    }
}

#[async_trait]
impl ChainFactory for DefaultChainFactory {
    async fn build(&self, tenant_id: &str) -> Result<Arc<RetrievalChain>, ChainError> {
        let start = std::time::Instant::now();
        let index = self.backend.open(tenant_id).await?;
        let chain = RetrievalChain::new(
            tenant_id,
            index,
            Arc::clone(&self.embedder),
            Arc::clone(&self.model),
            &self.config,
        );
        tracing::debug!(
            tenant = tenant_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "built retrieval chain"
        );
        Ok(Arc::new(chain))
    }
}
