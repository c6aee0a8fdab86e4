mod batch;
pub mod chain;
mod chunker;
mod embedding;
pub mod identity;
pub mod ingestion;
mod llm;
pub mod metrics;
pub mod scheduler;
pub mod session;
pub mod tenant;
pub mod vector_store;

pub use batch::embed_chunks;
pub use chain::{ChainFactory, ConversationMemory, DefaultChainFactory, PromptTemplate, RetrievalChain};
pub use chunker::TextSplitter;
pub use embedding::{Embedder, EmbeddingClient, InstructionType};
pub use identity::{HttpIdentityResolver, IdentityResolver};
pub use ingestion::{IngestionPipeline, IngestionReport};
pub use llm::{LanguageModel, OllamaClient};
pub use metrics::{InferenceRecord, MetricsStore, MetricsSummary};
pub use scheduler::{CompletedTask, InferenceScheduler, TaskHandle};
pub use session::{Clock, Session, SessionRegistry, SystemClock};
pub use tenant::{IngestSummary, TenantManager, TenantStatus};
pub use vector_store::{IndexFilter, VectorBackend, VectorIndex, create_backend};
