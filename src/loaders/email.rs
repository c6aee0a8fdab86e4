use mail_parser::{Message, MessageParser, PartType};

use super::markup::html_to_text;
use crate::error::LoaderError;
use crate::models::LoadedDocument;
use crate::utils::normalize_whitespace;

fn html_content(message: &Message<'_>) -> Result<String, LoaderError> {
    message
        .html_body
        .iter()
        .filter_map(|id| message.part(*id))
        .find_map(|part| match &part.body {
            PartType::Html(html) => Some(html_to_text(html)),
            _ => None,
        })
        .ok_or(LoaderError::NoHtmlContent)
}

fn text_content(message: &Message<'_>) -> Result<String, LoaderError> {
    message
        .text_body
        .iter()
        .filter_map(|id| message.part(*id))
        .find_map(|part| match &part.body {
            PartType::Text(text) => Some(normalize_whitespace(text)),
            _ => None,
        })
        .ok_or(LoaderError::NoTextContent)
}

/// HTML body first; a message with no HTML part falls back to its plain-text
/// body. Any other failure is returned as-is.
pub(super) fn load_email(bytes: &[u8], source_path: &str) -> Result<LoadedDocument, LoaderError> {
    let message = MessageParser::default()
        .parse(bytes)
        .ok_or_else(|| LoaderError::parse("not an RFC 5322 message"))?;

    let text = match html_content(&message) {
        Ok(text) => text,
        Err(LoaderError::NoHtmlContent) => {
            tracing::debug!(path = source_path, "no text/html part, using text/plain");
            text_content(&message)?
        }
        Err(e) => return Err(e),
    };

    let mut doc = LoadedDocument::new(text, source_path);
    if let Some(subject) = message.subject() {
        doc = doc.with_metadata("subject", subject);
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_html_part() {
        let raw = concat!(
            "From: a@example.com\r\n",
            "Subject: Invoice\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/alternative; boundary=\"b1\"\r\n",
            "\r\n",
            "--b1\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "plain version\r\n",
            "--b1\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<html><body><p>html version</p></body></html>\r\n",
            "--b1--\r\n",
        );
        let doc = load_email(raw.as_bytes(), "/d/m.eml").unwrap();
        assert_eq!(doc.text, "html version");
        assert_eq!(doc.metadata.get("subject").map(String::as_str), Some("Invoice"));
    }

    #[test]
    fn test_falls_back_to_plain_text() {
        let raw = concat!(
            "From: a@example.com\r\n",
            "Subject: Notes\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "Only plain   text here.\r\n",
        );
        let doc = load_email(raw.as_bytes(), "/d/m.eml").unwrap();
        assert_eq!(doc.text, "Only plain text here.");
    }
}
