use crate::error::LoaderError;
use crate::models::LoadedDocument;

pub(super) fn decode_utf8(bytes: &[u8]) -> Result<String, LoaderError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).map_err(LoaderError::parse)
}

pub(super) fn load_text(bytes: &[u8], source_path: &str) -> Result<LoadedDocument, LoaderError> {
    Ok(LoadedDocument::new(decode_utf8(bytes)?, source_path))
}

/// One document per row, rendered as `header: value` lines.
pub(super) fn load_csv(
    bytes: &[u8],
    source_path: &str,
) -> Result<Vec<LoadedDocument>, LoaderError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
    let headers = reader.headers().map_err(LoaderError::parse)?.clone();

    let mut documents = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(LoaderError::parse)?;
        let text = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| format!("{}: {}", header.trim(), value.trim()))
            .collect::<Vec<_>>()
            .join("\n");

        documents.push(LoadedDocument::new(text, source_path).with_metadata("row", row.to_string()));
    }

    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_one_document_per_row() {
        let data = b"name,role\nAda,engineer\nGrace, admiral \n";
        let docs = load_csv(data, "/d/people.csv").unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "name: Ada\nrole: engineer");
        assert_eq!(docs[1].text, "name: Grace\nrole: admiral");
        assert_eq!(docs[1].metadata.get("row").map(String::as_str), Some("1"));
        assert!(docs.iter().all(|d| d.source_path == "/d/people.csv"));
    }

    #[test]
    fn test_text_rejects_invalid_utf8() {
        assert!(matches!(
            load_text(&[0xff, 0xfe, 0x00], "/d/a.txt"),
            Err(LoaderError::Parse(_))
        ));
    }

    #[test]
    fn test_text_strips_bom() {
        let doc = load_text(b"\xEF\xBB\xBFhello", "/d/a.txt").unwrap();
        assert_eq!(doc.text, "hello");
    }
}
