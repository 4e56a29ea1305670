use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::LazyLock;
use tokio::fs;
use tracing::{debug, warn};

use crate::count_words;

/// Word count at or above which an upload counts as a complete manuscript
pub const COMPLETE_THRESHOLD: usize = 50_000;
/// EPUBs are usually whole books, so they qualify earlier
pub const EPUB_COMPLETE_THRESHOLD: usize = 20_000;
/// Word count below which an upload counts as a single chapter
pub const SINGLE_CHAPTER_THRESHOLD: usize = 3_000;

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("valid regex"));
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("valid regex"));
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#?\w+;").expect("valid regex"));
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static DOCX_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManuscriptFormat {
    Text,
    Markdown,
    Docx,
    Epub,
    Pdf,
}

impl ManuscriptFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_lowercase();

        match extension.as_str() {
            "txt" => Some(Self::Text),
            "md" => Some(Self::Markdown),
            "docx" => Some(Self::Docx),
            "epub" => Some(Self::Epub),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Docx => "docx",
            Self::Epub => "epub",
            Self::Pdf => "pdf",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "markdown" => Some(Self::Markdown),
            "docx" => Some(Self::Docx),
            "epub" => Some(Self::Epub),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

/// How much of a book an upload appears to contain, judged by word count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadType {
    Complete,
    Partial,
    SingleChapter,
}

impl UploadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::SingleChapter => "single_chapter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "complete" => Some(Self::Complete),
            "partial" => Some(Self::Partial),
            "single_chapter" => Some(Self::SingleChapter),
            _ => None,
        }
    }
}

pub fn classify_upload(word_count: usize, format: ManuscriptFormat) -> UploadType {
    if word_count >= COMPLETE_THRESHOLD
        || (format == ManuscriptFormat::Epub && word_count >= EPUB_COMPLETE_THRESHOLD)
    {
        UploadType::Complete
    } else if word_count < SINGLE_CHAPTER_THRESHOLD {
        UploadType::SingleChapter
    } else {
        UploadType::Partial
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedManuscript {
    pub text: String,
    pub word_count: usize,
    pub format: ManuscriptFormat,
    pub upload_type: UploadType,
}

pub struct FileReader;

impl FileReader {
    pub async fn read_manuscript(path: &Path) -> Result<ExtractedManuscript> {
        let format = ManuscriptFormat::from_path(path).with_context(|| {
            format!(
                "Unsupported file format: {:?} (expected txt, md, docx, epub or pdf)",
                path.extension().unwrap_or_default()
            )
        })?;

        let text = match format {
            ManuscriptFormat::Text | ManuscriptFormat::Markdown => fs::read_to_string(path)
                .await
                .context(format!("Failed to read file: {:?}", path))?,
            ManuscriptFormat::Docx => {
                let bytes = fs::read(path)
                    .await
                    .context(format!("Failed to read file: {:?}", path))?;
                extract_docx_text(&bytes)?
            }
            ManuscriptFormat::Epub => {
                let bytes = fs::read(path)
                    .await
                    .context(format!("Failed to read file: {:?}", path))?;
                extract_epub_text(&bytes)?
            }
            ManuscriptFormat::Pdf => {
                let bytes = fs::read(path)
                    .await
                    .context(format!("Failed to read file: {:?}", path))?;
                // pdf parsing is CPU bound and can panic on malformed input
                tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
                    .await
                    .context("PDF extraction aborted")??
            }
        };

        let word_count = count_words(&text);
        debug!(
            path = %path.display(),
            format = format.as_str(),
            chars = text.len(),
            word_count,
            "Extracted manuscript text"
        );

        Ok(ExtractedManuscript {
            upload_type: classify_upload(word_count, format),
            text,
            word_count,
            format,
        })
    }
}

/// Text of `word/document.xml`, one paragraph per `<w:p>`.
pub fn extract_docx_text(bytes: &[u8]) -> Result<String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Failed to read DOCX as zip archive")?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .context("DOCX is missing word/document.xml")?
        .read_to_string(&mut xml)
        .context("Failed to read word/document.xml")?;

    let paragraphs: Vec<String> = xml
        .split("</w:p>")
        .map(|paragraph| {
            DOCX_TEXT_RE
                .captures_iter(paragraph)
                .map(|cap| decode_xml_entities(&cap[1]))
                .collect::<String>()
        })
        .filter(|paragraph| !paragraph.trim().is_empty())
        .collect();

    Ok(paragraphs.join("\n\n"))
}

/// Text layer of a PDF. Scanned pages without one yield nothing.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| anyhow!("Failed to extract PDF text: {e}"))?;
    Ok(text.trim().to_string())
}

/// Concatenated body text of every content document in an EPUB.
pub fn extract_epub_text(bytes: &[u8]) -> Result<String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Failed to read EPUB as zip archive")?;

    let mut sections = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().to_string();

        if file.is_dir() || !is_content_document(&name) {
            continue;
        }

        let mut markup = String::new();
        if let Err(e) = file.read_to_string(&mut markup) {
            warn!(entry = %name, error = %e, "Could not read EPUB entry");
            continue;
        }

        let text = strip_markup(&markup);
        if !text.is_empty() {
            sections.push(text);
        }
    }

    Ok(sections.join(" "))
}

fn is_content_document(name: &str) -> bool {
    let lower = name.to_lowercase();
    let is_markup =
        lower.ends_with(".html") || lower.ends_with(".xhtml") || lower.ends_with(".htm");

    is_markup && !lower.contains("nav") && !lower.contains("toc")
}

fn strip_markup(markup: &str) -> String {
    let text = SCRIPT_RE.replace_all(markup, "");
    let text = STYLE_RE.replace_all(&text, "");
    let text = TAG_RE.replace_all(&text, " ");
    let text = ENTITY_RE.replace_all(&text, " ");
    SPACE_RE.replace_all(&text, " ").trim().to_string()
}

fn decode_xml_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_classify_upload_thresholds() {
        assert_eq!(classify_upload(0, ManuscriptFormat::Text), UploadType::SingleChapter);
        assert_eq!(classify_upload(2_999, ManuscriptFormat::Text), UploadType::SingleChapter);
        assert_eq!(classify_upload(3_000, ManuscriptFormat::Text), UploadType::Partial);
        assert_eq!(classify_upload(49_999, ManuscriptFormat::Docx), UploadType::Partial);
        assert_eq!(classify_upload(50_000, ManuscriptFormat::Docx), UploadType::Complete);
        assert_eq!(classify_upload(20_000, ManuscriptFormat::Text), UploadType::Partial);
        assert_eq!(classify_upload(20_000, ManuscriptFormat::Epub), UploadType::Complete);
        assert_eq!(classify_upload(1_000, ManuscriptFormat::Epub), UploadType::SingleChapter);
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            ManuscriptFormat::from_path(Path::new("draft.TXT")),
            Some(ManuscriptFormat::Text)
        );
        assert_eq!(
            ManuscriptFormat::from_path(Path::new("book.epub")),
            Some(ManuscriptFormat::Epub)
        );
        assert_eq!(
            ManuscriptFormat::from_path(Path::new("scan.PDF")),
            Some(ManuscriptFormat::Pdf)
        );
        assert_eq!(ManuscriptFormat::from_path(Path::new("notes.rtf")), None);
        assert_eq!(ManuscriptFormat::from_path(Path::new("README")), None);
    }

    #[tokio::test]
    async fn test_read_plain_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chapter1.txt");
        std::fs::write(&path, "It was a dark and stormy night.\n\nThe end.").unwrap();

        let manuscript = FileReader::read_manuscript(&path).await.unwrap();

        assert_eq!(manuscript.format, ManuscriptFormat::Text);
        assert_eq!(manuscript.word_count, 9);
        assert_eq!(manuscript.upload_type, UploadType::SingleChapter);
        assert!(manuscript.text.starts_with("It was a dark"));
    }

    #[tokio::test]
    async fn test_unsupported_format_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.rtf");
        std::fs::write(&path, b"{\\rtf1 hello}").unwrap();

        let err = FileReader::read_manuscript(&path).await.unwrap_err();
        assert!(err.to_string().contains("Unsupported file format"));
    }

    #[tokio::test]
    async fn test_broken_pdf_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF-1.7 truncated").unwrap();

        let err = FileReader::read_manuscript(&path).await.unwrap_err();
        assert!(format!("{err:#}").contains("PDF"));
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = r#"<w:document><w:body>
            <w:p><w:r><w:t>Chapter One</w:t></w:r></w:p>
            <w:p><w:r><w:t xml:space="preserve">Rain &amp; wind </w:t></w:r><w:r><w:tab/><w:t>battered the pane.</w:t></w:r></w:p>
            <w:p></w:p>
        </w:body></w:document>"#;
        let bytes = zip_bytes(&[("word/document.xml", xml)]);

        let text = extract_docx_text(&bytes).unwrap();
        assert_eq!(text, "Chapter One\n\nRain & wind battered the pane.");
    }

    #[test]
    fn test_docx_without_document_xml_fails() {
        let bytes = zip_bytes(&[("other.xml", "<x/>")]);
        assert!(extract_docx_text(&bytes).is_err());
    }

    #[test]
    fn test_epub_skips_navigation_and_scripts() {
        let bytes = zip_bytes(&[
            ("mimetype", "application/epub+zip"),
            ("OEBPS/nav.xhtml", "<nav>Table of Contents</nav>"),
            (
                "OEBPS/chapter1.xhtml",
                "<html><head><style>p { color: red; }</style></head>\
                 <body><p>Maren climbed&nbsp;the stairs.</p><script>alert(1)</script></body></html>",
            ),
            ("OEBPS/chapter2.html", "<p>The lamp   was\n lit.</p>"),
        ]);

        let text = extract_epub_text(&bytes).unwrap();
        assert_eq!(text, "Maren climbed the stairs. The lamp was lit.");
    }

    #[tokio::test]
    async fn test_read_epub_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("novel.epub");
        let bytes = zip_bytes(&[("text/ch1.xhtml", "<p>Once upon a time</p>")]);
        std::fs::write(&path, bytes).unwrap();

        let manuscript = FileReader::read_manuscript(&path).await.unwrap();
        assert_eq!(manuscript.format, ManuscriptFormat::Epub);
        assert_eq!(manuscript.text, "Once upon a time");
        assert_eq!(manuscript.word_count, 4);
    }
}
