//! Zipped XML office formats: docx, odt, pptx.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::Event;
use zip::ZipArchive;

use crate::error::LoaderError;
use crate::models::LoadedDocument;
use crate::utils::normalize_whitespace;

pub(super) type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

pub(super) fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, LoaderError> {
    ZipArchive::new(Cursor::new(bytes)).map_err(LoaderError::parse)
}

pub(super) fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<String, LoaderError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| LoaderError::Parse(format!("{name}: {e}")))?;
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    Ok(content)
}

/// Which elements carry text and which end a line, per format.
struct XmlRules {
    text: &'static [&'static [u8]],
    blocks: &'static [&'static [u8]],
    tabs: &'static [&'static [u8]],
    breaks: &'static [&'static [u8]],
    spaces: &'static [&'static [u8]],
}

const DOCX: XmlRules = XmlRules {
    text: &[b"w:t"],
    blocks: &[b"w:p"],
    tabs: &[b"w:tab"],
    breaks: &[b"w:br", b"w:cr"],
    spaces: &[],
};

const ODT: XmlRules = XmlRules {
    text: &[b"text:p", b"text:h"],
    blocks: &[b"text:p", b"text:h"],
    tabs: &[b"text:tab"],
    breaks: &[b"text:line-break"],
    spaces: &[b"text:s"],
};

const PPTX: XmlRules = XmlRules {
    text: &[b"a:t"],
    blocks: &[b"a:p"],
    tabs: &[],
    breaks: &[b"a:br"],
    spaces: &[],
};

fn contains(set: &[&[u8]], name: &[u8]) -> bool {
    set.iter().any(|n| *n == name)
}

fn extract_xml_text(xml: &str, rules: &XmlRules) -> Result<String, LoaderError> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event().map_err(LoaderError::parse)? {
            Event::Start(e) => {
                if contains(rules.text, e.name().as_ref()) {
                    depth += 1;
                }
            }
            Event::End(e) => {
                let name = e.name();
                if contains(rules.text, name.as_ref()) {
                    depth = depth.saturating_sub(1);
                }
                if contains(rules.blocks, name.as_ref()) {
                    out.push('\n');
                }
            }
            Event::Empty(e) => {
                let name = e.name();
                if contains(rules.tabs, name.as_ref()) {
                    out.push('\t');
                } else if contains(rules.breaks, name.as_ref())
                    || contains(rules.blocks, name.as_ref())
                {
                    out.push('\n');
                } else if contains(rules.spaces, name.as_ref()) {
                    out.push(' ');
                }
            }
            Event::Text(t) if depth > 0 => {
                out.push_str(&t.unescape().map_err(LoaderError::parse)?);
            }
            Event::CData(c) if depth > 0 => {
                out.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out)
}

pub(super) fn load_docx(bytes: &[u8], source_path: &str) -> Result<LoadedDocument, LoaderError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    let text = extract_xml_text(&xml, &DOCX)?;
    Ok(LoadedDocument::new(normalize_whitespace(&text), source_path))
}

pub(super) fn load_odt(bytes: &[u8], source_path: &str) -> Result<LoadedDocument, LoaderError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "content.xml")?;
    let text = extract_xml_text(&xml, &ODT)?;
    Ok(LoadedDocument::new(normalize_whitespace(&text), source_path))
}

fn slide_number(name: &str) -> Option<u32> {
    name.strip_prefix("ppt/slides/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

pub(super) fn load_pptx(bytes: &[u8], source_path: &str) -> Result<LoadedDocument, LoaderError> {
    let mut archive = open_archive(bytes)?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| slide_number(name).map(|n| (n, name.to_string())))
        .collect();
    slides.sort_by_key(|(n, _)| *n);

    let mut parts = Vec::with_capacity(slides.len());
    for (_, name) in &slides {
        let xml = read_entry(&mut archive, name)?;
        let text = normalize_whitespace(&extract_xml_text(&xml, &PPTX)?);
        if !text.is_empty() {
            parts.push(text);
        }
    }

    Ok(LoadedDocument::new(parts.join("\n\n"), source_path)
        .with_metadata("slides", slides.len().to_string()))
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    pub(in crate::loaders) fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            for (name, content) in entries {
                writer
                    .start_file(*name, SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_docx_paragraphs_and_tabs() {
        let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>
<w:p><w:r><w:t>Quarterly</w:t></w:r><w:r><w:t xml:space="preserve"> report</w:t></w:r></w:p>
<w:p><w:r><w:t>A</w:t><w:tab/><w:t>B &amp; C</w:t></w:r></w:p>
<w:p><w:r><w:instrText>IGNORED</w:instrText></w:r></w:p>
</w:body>
</w:document>"#;
        let bytes = build_zip(&[("word/document.xml", xml)]);
        let doc = load_docx(&bytes, "/d/r.docx").unwrap();
        assert_eq!(doc.text, "Quarterly report\nA B & C");
    }

    #[test]
    fn test_odt_headings_and_spaces() {
        let xml = r#"<office:document-content xmlns:office="o" xmlns:text="t">
<office:body><office:text>
<text:h>Title</text:h>
<text:p>one<text:s/>two <text:span>three</text:span></text:p>
</office:text></office:body></office:document-content>"#;
        let bytes = build_zip(&[("content.xml", xml)]);
        let doc = load_odt(&bytes, "/d/r.odt").unwrap();
        assert_eq!(doc.text, "Title\none two three");
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let slide = |t: &str| {
            format!(r#"<p:sld xmlns:p="p" xmlns:a="a"><a:p><a:r><a:t>{t}</a:t></a:r></a:p></p:sld>"#)
        };
        let s1 = slide("first");
        let s2 = slide("second");
        let s10 = slide("tenth");
        let bytes = build_zip(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
            ("ppt/slides/_rels/slide1.xml.rels", "<Relationships/>"),
        ]);
        let doc = load_pptx(&bytes, "/d/deck.pptx").unwrap();
        assert_eq!(doc.text, "first\n\nsecond\n\ntenth");
        assert_eq!(doc.metadata.get("slides").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_not_a_zip_is_parse_error() {
        assert!(matches!(
            load_docx(b"plain bytes", "/d/x.docx"),
            Err(LoaderError::Parse(_))
        ));
    }
}
