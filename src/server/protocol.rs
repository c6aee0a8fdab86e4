use serde::{Deserialize, Serialize};

use crate::models::{RetrievalResult, VectorDriver};
use crate::services::MetricsSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub source: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub id: String,
    pub result: String,
    pub sources: Vec<SourceEntry>,
}

impl QueryResponse {
    pub fn new(id: String, result: RetrievalResult) -> Self {
        Self {
            id,
            result: result.answer_text,
            sources: result
                .sources
                .into_iter()
                .map(|s| SourceEntry {
                    source: s.source_path,
                    content: s.excerpt_text,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub message: String,
    pub session_id: String,
    pub tenant: String,
    pub admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub message: String,
    pub added: usize,
    pub files_loaded: usize,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFileResponse {
    pub message: String,
    pub removed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub vector_store: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub uptime_secs: u64,
    pub queue_depth: usize,
    pub active_sessions: usize,
    pub vector_driver: VectorDriver,
    pub metrics: Option<MetricsSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceExcerpt;

    #[test]
    fn test_query_response_shape() {
        let response = QueryResponse::new(
            "task-1".to_string(),
            RetrievalResult {
                answer_text: "Monthly.".to_string(),
                sources: vec![SourceExcerpt {
                    source_path: "/docs/acme/a.txt".to_string(),
                    excerpt_text: "Invoices are sent monthly.".to_string(),
                }],
            },
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["id"], "task-1");
        assert_eq!(json["result"], "Monthly.");
        assert_eq!(json["sources"][0]["source"], "/docs/acme/a.txt");
        assert_eq!(json["sources"][0]["content"], "Invoices are sent monthly.");
    }
}
