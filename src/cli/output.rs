use std::fmt::Write as FmtWrite;

use console::style;
use serde::Serialize;

use crate::models::{OutputFormat, RetrievalResult};
use crate::services::{IngestSummary, MetricsSummary, TenantStatus};

pub trait Formatter {
    fn format_answer(&self, result: &RetrievalResult) -> String;
    fn format_ingest_summary(&self, summary: &IngestSummary, duration_ms: u64) -> String;
    fn format_tenant_status(&self, status: &TenantStatus) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub vector_store_driver: String,
    pub vector_store_url: String,
    pub vector_store_connected: bool,
    pub embedding_url: String,
    pub embedding_connected: bool,
    pub llm_url: String,
    pub llm_model: String,
    pub llm_connected: bool,
    pub tenant: Option<TenantStatus>,
    pub metrics: Option<MetricsSummary>,
}

fn marker(ok: bool, up: &str, down: &str) -> String {
    if ok {
        style(format!("[{up}]")).green().to_string()
    } else {
        style(format!("[{down}]")).red().to_string()
    }
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_answer(&self, result: &RetrievalResult) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "{}", result.answer_text.trim());

        if !result.sources.is_empty() {
            let _ = writeln!(output, "\n{}", style("Sources").bold());
            for (i, source) in result.sources.iter().enumerate() {
                let _ = writeln!(output, "{}. {}", i + 1, style(&source.source_path).cyan());
                let preview: String = source.excerpt_text.chars().take(200).collect();
                let ellipsis = if source.excerpt_text.chars().count() > 200 {
                    "..."
                } else {
                    ""
                };
                for line in format!("{preview}{ellipsis}").lines() {
                    let _ = writeln!(output, "   {}", line);
                }
            }
        }
        output
    }

    fn format_ingest_summary(&self, summary: &IngestSummary, duration_ms: u64) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Indexing Complete");
        let _ = writeln!(output, "-----------------");
        let _ = writeln!(output, "Collection:     {}", summary.tenant);
        let _ = writeln!(output, "Files loaded:   {}", summary.files_loaded);
        let _ = writeln!(output, "Files skipped:  {}", summary.files_skipped);
        let _ = writeln!(output, "Chunks added:   {}", summary.added_chunks);
        let _ = writeln!(
            output,
            "Chunks total:   {} -> {}",
            summary.count_before, summary.count_after
        );
        let _ = writeln!(output, "Duration:       {}ms", duration_ms);

        if !summary.failures.is_empty() {
            let _ = writeln!(
                output,
                "\n{} {} file(s) failed to load:",
                style("Warning:").yellow(),
                summary.failures.len()
            );
            for failure in &summary.failures {
                let _ = writeln!(output, "  {}", failure);
            }
        }
        output
    }

    fn format_tenant_status(&self, status: &TenantStatus) -> String {
        let mut output = String::new();
        if !status.exists {
            let _ = writeln!(output, "Collection {} does not exist", status.tenant);
            return output;
        }

        let _ = writeln!(output, "Collection:  {}", status.tenant);
        let _ = writeln!(output, "Chunks:      {}", status.count);
        let _ = writeln!(output, "Files:       {}", status.sources.len());
        for source in &status.sources {
            let _ = writeln!(output, "  {}", source);
        }
        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Status");
        let _ = writeln!(output, "------");

        let _ = writeln!(
            output,
            "Vector Store:  {} {}",
            status.vector_store_driver,
            marker(status.vector_store_connected, "CONNECTED", "DISCONNECTED")
        );
        let _ = writeln!(output, "  URL:         {}", status.vector_store_url);

        let _ = writeln!(
            output,
            "Embedding:     {}",
            marker(status.embedding_connected, "CONNECTED", "DISCONNECTED")
        );
        let _ = writeln!(output, "  URL:         {}", status.embedding_url);

        let _ = writeln!(
            output,
            "LLM:           {} {}",
            status.llm_model,
            marker(status.llm_connected, "CONNECTED", "DISCONNECTED")
        );
        let _ = writeln!(output, "  URL:         {}", status.llm_url);

        if let Some(ref m) = status.metrics {
            let _ = writeln!(output, "Inference:");
            let _ = writeln!(output, "  Requests:    {}", m.total_requests);
            let _ = writeln!(output, "  Avg Latency: {}ms", m.avg_latency_ms);
            let _ = writeln!(output, "  Avg Wait:    {}ms", m.avg_queue_wait_ms);
            if m.error_rate > 0.0 {
                let _ = writeln!(output, "  Error Rate:  {:.1}%", m.error_rate);
            }
        }

        if let Some(ref tenant) = status.tenant {
            let _ = writeln!(output);
            output.push_str(&self.format_tenant_status(tenant));
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("{} {}\n", style("Error:").red().bold(), error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render(&self, value: &impl Serialize) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_answer(&self, result: &RetrievalResult) -> String {
        self.render(result)
    }

    fn format_ingest_summary(&self, summary: &IngestSummary, duration_ms: u64) -> String {
        let failures: Vec<String> = summary.failures.iter().map(ToString::to_string).collect();
        self.render(&serde_json::json!({
            "collection": summary.tenant,
            "files_loaded": summary.files_loaded,
            "files_skipped": summary.files_skipped,
            "added_chunks": summary.added_chunks,
            "count_before": summary.count_before,
            "count_after": summary.count_after,
            "failures": failures,
            "duration_ms": duration_ms,
        }))
    }

    fn format_tenant_status(&self, status: &TenantStatus) -> String {
        self.render(status)
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        self.render(status)
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({"message": message}).to_string()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({"error": error}).to_string()
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LoadFailure, LoaderError};
    use crate::models::SourceExcerpt;
    use std::collections::BTreeSet;

    fn summary() -> IngestSummary {
        IngestSummary {
            tenant: "acme".to_string(),
            added_chunks: 3,
            files_loaded: 2,
            files_skipped: 1,
            failures: vec![LoadFailure::new(
                "/docs/acme/b.pdf",
                LoaderError::parse("bad xref"),
            )],
            count_before: 4,
            count_after: 7,
        }
    }

    #[test]
    fn test_text_ingest_summary_lists_failures() {
        console::set_colors_enabled(false);
        let text = TextFormatter.format_ingest_summary(&summary(), 12);
        assert!(text.contains("Chunks added:   3"));
        assert!(text.contains("4 -> 7"));
        assert!(text.contains("/docs/acme/b.pdf: parse error: bad xref"));
    }

    #[test]
    fn test_json_ingest_summary() {
        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter::new(false).format_ingest_summary(&summary(), 12))
                .unwrap();
        assert_eq!(json["collection"], "acme");
        assert_eq!(json["added_chunks"], 3);
        assert_eq!(json["failures"][0], "/docs/acme/b.pdf: parse error: bad xref");
    }

    #[test]
    fn test_text_answer_truncates_excerpts() {
        console::set_colors_enabled(false);
        let result = RetrievalResult {
            answer_text: "Monthly.".to_string(),
            sources: vec![SourceExcerpt {
                source_path: "/docs/acme/a.txt".to_string(),
                excerpt_text: "x".repeat(300),
            }],
        };
        let text = TextFormatter.format_answer(&result);
        assert!(text.starts_with("Monthly.\n"));
        assert!(text.contains("1. /docs/acme/a.txt"));
        assert!(text.contains(&format!("{}...", "x".repeat(200))));
    }

    #[test]
    fn test_missing_collection_status() {
        let status = TenantStatus {
            tenant: "acme".to_string(),
            exists: false,
            count: 0,
            sources: BTreeSet::new(),
        };
        assert_eq!(
            TextFormatter.format_tenant_status(&status),
            "Collection acme does not exist\n"
        );
        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter::new(true).format_tenant_status(&status)).unwrap();
        assert_eq!(json["exists"], false);
    }
}
