//! Markdown, HTML and the HTML-bodied containers (EPUB, Evernote exports).

use std::collections::HashMap;

use pulldown_cmark::{Event as MdEvent, Parser, Tag};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use scraper::{ElementRef, Html};

use super::office::{open_archive, read_entry};
use super::text::decode_utf8;
use crate::error::LoaderError;
use crate::models::LoadedDocument;
use crate::utils::normalize_whitespace;

const SKIPPED_ELEMENTS: [&str; 5] = ["script", "style", "noscript", "head", "template"];

const BLOCK_ELEMENTS: [&str; 20] = [
    "p", "div", "br", "li", "tr", "td", "th", "h1", "h2", "h3", "h4", "h5", "h6", "section",
    "article", "blockquote", "pre", "table", "ul", "ol",
];

/// Visible text of an HTML document with block structure kept as line breaks.
pub(super) fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    collect_text(document.root_element(), &mut out);
    normalize_whitespace(&out)
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_element) = ElementRef::wrap(child) {
            let name = child_element.value().name();
            if SKIPPED_ELEMENTS.contains(&name) {
                continue;
            }
            collect_text(child_element, out);
            if BLOCK_ELEMENTS.contains(&name) {
                out.push('\n');
            }
        }
    }
}

pub(super) fn load_html(bytes: &[u8], source_path: &str) -> Result<LoadedDocument, LoaderError> {
    let html = String::from_utf8_lossy(bytes);
    let document = Html::parse_document(&html);
    let title = scraper::Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|t| normalize_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let mut doc = LoadedDocument::new(html_to_text(&html), source_path);
    if let Some(title) = title {
        doc = doc.with_metadata("title", title);
    }
    Ok(doc)
}

pub(super) fn load_markdown(
    bytes: &[u8],
    source_path: &str,
) -> Result<LoadedDocument, LoaderError> {
    let source = decode_utf8(bytes)?;
    let mut out = String::with_capacity(source.len());

    for event in Parser::new(&source) {
        match event {
            MdEvent::Text(text) | MdEvent::Code(text) => out.push_str(&text),
            MdEvent::SoftBreak => out.push(' '),
            MdEvent::HardBreak => out.push('\n'),
            MdEvent::End(
                Tag::Paragraph
                | Tag::Heading(..)
                | Tag::Item
                | Tag::CodeBlock(_)
                | Tag::BlockQuote,
            ) => out.push_str("\n\n"),
            _ => {}
        }
    }

    Ok(LoadedDocument::new(normalize_whitespace(&out), source_path))
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>, LoaderError> {
    element
        .try_get_attribute(name)
        .map_err(LoaderError::parse)?
        .map(|attr| attr.unescape_value().map(|v| v.into_owned()))
        .transpose()
        .map_err(LoaderError::parse)
}

/// Path of the OPF package document named by `META-INF/container.xml`.
fn epub_rootfile(container: &str) -> Result<String, LoaderError> {
    let mut reader = Reader::from_str(container);
    loop {
        match reader.read_event().map_err(LoaderError::parse)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"rootfile" => {
                if let Some(path) = attribute(&e, "full-path")? {
                    return Ok(path);
                }
            }
            Event::Eof => return Err(LoaderError::parse("epub container has no rootfile")),
            _ => {}
        }
    }
}

/// Content documents of an OPF package in spine (reading) order.
fn epub_spine(opf: &str) -> Result<Vec<String>, LoaderError> {
    let mut reader = Reader::from_str(opf);
    let mut manifest: HashMap<String, String> = HashMap::new();
    let mut spine: Vec<String> = Vec::new();

    loop {
        match reader.read_event().map_err(LoaderError::parse)? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"item" => {
                    if let (Some(id), Some(href)) = (attribute(&e, "id")?, attribute(&e, "href")?)
                    {
                        manifest.insert(id, href);
                    }
                }
                b"itemref" => {
                    if let Some(idref) = attribute(&e, "idref")? {
                        spine.push(idref);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(spine
        .into_iter()
        .filter_map(|id| manifest.get(&id).cloned())
        .collect())
}

fn resolve_relative(base_dir: &str, href: &str) -> String {
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

pub(super) fn load_epub(bytes: &[u8], source_path: &str) -> Result<LoadedDocument, LoaderError> {
    let mut archive = open_archive(bytes)?;
    let container = read_entry(&mut archive, "META-INF/container.xml")?;
    let opf_path = epub_rootfile(&container)?;
    let opf = read_entry(&mut archive, &opf_path)?;
    let base_dir = opf_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");

    let chapters = epub_spine(&opf)?;
    let mut parts = Vec::with_capacity(chapters.len());
    for href in &chapters {
        let path = resolve_relative(base_dir, href);
        let xhtml = read_entry(&mut archive, &path)?;
        let text = html_to_text(&xhtml);
        if !text.is_empty() {
            parts.push(text);
        }
    }

    Ok(LoadedDocument::new(parts.join("\n\n"), source_path)
        .with_metadata("chapters", chapters.len().to_string()))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum NoteField {
    None,
    Title,
    Content,
}

/// One document per `<note>` of an Evernote export.
pub(super) fn load_enex(
    bytes: &[u8],
    source_path: &str,
) -> Result<Vec<LoadedDocument>, LoaderError> {
    let xml = decode_utf8(bytes)?;
    let mut reader = Reader::from_str(&xml);
    let mut documents = Vec::new();

    let mut field = NoteField::None;
    let mut title = String::new();
    let mut content = String::new();

    loop {
        match reader.read_event().map_err(LoaderError::parse)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"note" => {
                    title.clear();
                    content.clear();
                }
                b"title" => field = NoteField::Title,
                b"content" => field = NoteField::Content,
                _ => {}
            },
            Event::Text(t) => {
                let text = t.unescape().map_err(LoaderError::parse)?;
                match field {
                    NoteField::Title => title.push_str(&text),
                    NoteField::Content => content.push_str(&text),
                    NoteField::None => {}
                }
            }
            Event::CData(c) => {
                let data = c.into_inner();
                let text = String::from_utf8_lossy(&data);
                match field {
                    NoteField::Title => title.push_str(&text),
                    NoteField::Content => content.push_str(&text),
                    NoteField::None => {}
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"title" | b"content" => field = NoteField::None,
                b"note" => {
                    let title = title.trim().to_string();
                    let body = html_to_text(&content);
                    let text = match (title.is_empty(), body.is_empty()) {
                        (false, false) => format!("{title}\n\n{body}"),
                        (false, true) => title.clone(),
                        _ => body,
                    };
                    documents.push(
                        LoadedDocument::new(text, source_path).with_metadata("title", title),
                    );
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::super::office::tests::build_zip;
    use super::*;

    #[test]
    fn test_html_skips_scripts_and_keeps_blocks() {
        let html = concat!(
            "<html><head><title> Guide </title><style>p{}</style></head>",
            "<body><h1>Install</h1><script>var x = 1;</script>",
            "<p>Run the   <b>installer</b>.</p><ul><li>one</li><li>two</li></ul></body></html>",
        );
        let doc = load_html(html.as_bytes(), "/d/g.html").unwrap();
        assert_eq!(doc.text, "Install\nRun the installer.\none\ntwo");
        assert_eq!(doc.metadata.get("title").map(String::as_str), Some("Guide"));
    }

    #[test]
    fn test_markdown_strips_syntax() {
        let md = "# Title\n\nSome *emphasis* and `code`.\n\n- one\n- two\n";
        let doc = load_markdown(md.as_bytes(), "/d/r.md").unwrap();
        assert!(doc.text.starts_with("Title\n\nSome emphasis and code."));
        assert!(doc.text.contains("one"));
        assert!(!doc.text.contains('*'));
        assert!(!doc.text.contains('#'));
    }

    #[test]
    fn test_epub_follows_spine_order() {
        let container = r#"<?xml version="1.0"?>
<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container" version="1.0">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#;
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>
    <item id="c1" href="text/one.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="text/two.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine><itemref idref="c2"/><itemref idref="c1"/></spine>
</package>"#;
        let bytes = build_zip(&[
            ("META-INF/container.xml", container),
            ("OEBPS/content.opf", opf),
            ("OEBPS/text/one.xhtml", "<html><body><p>Chapter one</p></body></html>"),
            ("OEBPS/text/two.xhtml", "<html><body><p>Chapter two</p></body></html>"),
        ]);
        let doc = load_epub(&bytes, "/d/b.epub").unwrap();
        assert_eq!(doc.text, "Chapter two\n\nChapter one");
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(resolve_relative("OEBPS", "text/a.xhtml"), "OEBPS/text/a.xhtml");
        assert_eq!(resolve_relative("OEBPS/text", "../b.xhtml"), "OEBPS/b.xhtml");
        assert_eq!(resolve_relative("", "c.xhtml"), "c.xhtml");
    }

    #[test]
    fn test_enex_one_document_per_note() {
        let enex = r#"<?xml version="1.0" encoding="UTF-8"?>
<en-export>
  <note><title>Groceries</title>
    <content><![CDATA[<?xml version="1.0"?><en-note><div>Milk</div><div>Eggs</div></en-note>]]></content>
  </note>
  <note><title>Empty</title><content><![CDATA[<en-note></en-note>]]></content></note>
</en-export>"#;
        let docs = load_enex(enex.as_bytes(), "/d/n.enex").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "Groceries\n\nMilk\nEggs");
        assert_eq!(docs[0].metadata.get("title").map(String::as_str), Some("Groceries"));
        assert_eq!(docs[1].text, "Empty");
    }
}
