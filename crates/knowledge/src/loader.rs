//! Document loading and text extraction.
//!
//! Dispatches on the file extension to a PDF, DOCX or plain-text extractor
//! and yields ordered [`Segment`]s.

use inkchat_core::{AppError, AppResult};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
}

impl DocumentFormat {
    /// Detect the format from a file name's extension (case-insensitive).
    pub fn from_file_name(name: &str) -> AppResult<Self> {
        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("pdf") => Ok(Self::Pdf),
            Some("docx") => Ok(Self::Docx),
            Some("txt") => Ok(Self::Text),
            Some(other) => Err(AppError::UnsupportedFormat(format!(
                "{} (.{} files are not supported; use pdf, docx or txt)",
                name, other
            ))),
            None => Err(AppError::UnsupportedFormat(format!(
                "{} (no file extension; use pdf, docx or txt)",
                name
            ))),
        }
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Text => "txt",
        }
    }
}

/// A document as uploaded: raw bytes plus its declared format.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub format: DocumentFormat,
    pub bytes: Vec<u8>,
}

impl Document {
    /// Create a document, validating format and size before any parsing.
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, max_bytes: u64) -> AppResult<Self> {
        let name = name.into();
        let format = DocumentFormat::from_file_name(&name)?;
        check_size(&name, bytes.len() as u64, max_bytes)?;

        Ok(Self {
            name,
            format,
            bytes,
        })
    }

    /// SHA-256 of the raw bytes, hex encoded.
    pub fn fingerprint(&self) -> String {
        format!("{:x}", Sha256::digest(&self.bytes))
    }
}

/// Where a segment came from inside its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "index")]
pub enum SegmentLocation {
    /// 1-based PDF page number
    Page(u32),
    /// 1-based paragraph index (DOCX, TXT)
    Paragraph(u32),
}

/// A contiguous piece of extracted text.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub location: SegmentLocation,

    /// Char offset of this segment in the document's joined text
    pub offset: usize,
}

/// Separator placed between segments when a document's text is joined.
pub const SEGMENT_SEPARATOR: char = '\n';

fn check_size(name: &str, size: u64, limit: u64) -> AppResult<()> {
    if size > limit {
        return Err(AppError::FileTooLarge {
            name: name.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

/// Read a file from disk into a [`Document`].
///
/// Format and size are checked from the path and file metadata before the
/// bytes are read.
pub fn read_document(path: &Path, max_bytes: u64) -> AppResult<Document> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string());

    DocumentFormat::from_file_name(&name)?;
    let size = std::fs::metadata(path)?.len();
    check_size(&name, size, max_bytes)?;

    let bytes = std::fs::read(path)?;
    Document::new(name, bytes, max_bytes)
}

/// Expand the given paths into the list of files to upload.
///
/// Files are kept as given (their format is checked later). Directories are
/// walked and only supported files inside them are kept, sorted by path.
pub fn expand_paths(paths: &[PathBuf]) -> AppResult<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| DocumentFormat::from_file_name(n).is_ok())
                        .unwrap_or(false)
                })
                .collect();
            found.sort();
            tracing::debug!("Found {} supported files in {:?}", found.len(), path);
            files.extend(found);
        } else {
            return Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("No such file or directory: {}", path.display()),
            )));
        }
    }

    Ok(files)
}

/// Extract ordered segments from a document.
pub fn extract_segments(document: &Document) -> AppResult<Vec<Segment>> {
    let pieces = match document.format {
        DocumentFormat::Pdf => extract_pdf(&document.name, &document.bytes)?,
        DocumentFormat::Docx => extract_docx(&document.name, &document.bytes)?,
        DocumentFormat::Text => extract_text(&document.name, &document.bytes),
    };

    let mut segments = Vec::with_capacity(pieces.len());
    let mut offset = 0;
    for (text, location) in pieces {
        let len = text.chars().count();
        segments.push(Segment {
            text,
            location,
            offset,
        });
        offset += len + 1;
    }

    tracing::debug!(
        "Extracted {} segments from {} ({})",
        segments.len(),
        document.name,
        document.format.as_str()
    );

    Ok(segments)
}

/// Join segments into the document's text, separated by [`SEGMENT_SEPARATOR`].
pub fn joined_text(segments: &[Segment]) -> String {
    let mut text = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            text.push(SEGMENT_SEPARATOR);
        }
        text.push_str(&segment.text);
    }
    text
}

fn extract_pdf(name: &str, bytes: &[u8]) -> AppResult<Vec<(String, SegmentLocation)>> {
    let pdf = lopdf::Document::load_mem(bytes)
        .map_err(|e| AppError::Document(format!("Failed to parse PDF {}: {}", name, e)))?;

    let mut pages = Vec::new();
    for page_number in pdf.get_pages().keys().copied() {
        match pdf.extract_text(&[page_number]) {
            Ok(text) if !text.trim().is_empty() => {
                pages.push((text, SegmentLocation::Page(page_number)));
            }
            Ok(_) => tracing::debug!("{}: page {} has no text, skipping", name, page_number),
            Err(e) => {
                tracing::warn!("{}: could not extract page {}: {}", name, page_number, e)
            }
        }
    }

    Ok(pages)
}

fn extract_docx(name: &str, bytes: &[u8]) -> AppResult<Vec<(String, SegmentLocation)>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| AppError::Document(format!("Failed to open DOCX {}: {}", name, e)))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| AppError::Document(format!("{} has no document body: {}", name, e)))?
        .read_to_string(&mut xml)
        .map_err(|e| AppError::Document(format!("Failed to read DOCX {}: {}", name, e)))?;

    let paragraphs = docx_paragraphs(&xml)
        .map_err(|e| AppError::Document(format!("Malformed DOCX {}: {}", name, e)))?;

    Ok(paragraphs
        .into_iter()
        .enumerate()
        .map(|(i, text)| (text, SegmentLocation::Paragraph(i as u32 + 1)))
        .collect())
}

/// Collect the plain text of each non-empty `w:p` paragraph.
fn docx_paragraphs(xml: &str) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"p" => current.clear(),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => current.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !current.trim().is_empty() {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                    current.clear();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs)
}

fn extract_text(name: &str, bytes: &[u8]) -> Vec<(String, SegmentLocation)> {
    let raw = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            tracing::warn!("{} is not valid UTF-8; invalid bytes were replaced", name);
            String::from_utf8_lossy(bytes).into_owned()
        }
    };
    let normalized = raw.trim_start_matches('\u{feff}').replace("\r\n", "\n");

    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in normalized.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }

    paragraphs
        .into_iter()
        .enumerate()
        .map(|(i, text)| (text, SegmentLocation::Paragraph(i as u32 + 1)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const LIMIT: u64 = 1024 * 1024;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn pdf_bytes(pages: &[&str]) -> Vec<u8> {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Object, Stream};

        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in pages {
            let mut operations = Vec::new();
            if !text.is_empty() {
                operations = vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![100.into(), 600.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ];
            }
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let pages_dict = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages.len() as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(DocumentFormat::from_file_name("a.PDF").unwrap(), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_file_name("b.Docx").unwrap(), DocumentFormat::Docx);
        assert_eq!(DocumentFormat::from_file_name("c.txt").unwrap(), DocumentFormat::Text);
        assert!(matches!(
            DocumentFormat::from_file_name("book.epub"),
            Err(AppError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            DocumentFormat::from_file_name("README"),
            Err(AppError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_file_too_large_before_parsing() {
        // Not a valid PDF; the size check must fire first.
        let result = Document::new("big.pdf", vec![0u8; 11], 10);
        assert!(matches!(result, Err(AppError::FileTooLarge { size: 11, limit: 10, .. })));
    }

    #[test]
    fn test_text_paragraphs() {
        let doc = Document::new(
            "notes.txt",
            b"\xef\xbb\xbfFirst line\r\nstill first\r\n\r\n\r\nSecond\n   \nThird\n".to_vec(),
            LIMIT,
        )
        .unwrap();

        let segments = extract_segments(&doc).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].text, "First line\nstill first");
        assert_eq!(segments[0].location, SegmentLocation::Paragraph(1));
        assert_eq!(segments[1].text, "Second");
        assert_eq!(segments[1].offset, 23);
        assert_eq!(segments[2].location, SegmentLocation::Paragraph(3));

        assert_eq!(joined_text(&segments), "First line\nstill first\nSecond\nThird");
    }

    #[test]
    fn test_empty_text_has_no_segments() {
        let doc = Document::new("empty.txt", b"\n\n  \n".to_vec(), LIMIT).unwrap();
        assert!(extract_segments(&doc).unwrap().is_empty());
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Annual</w:t></w:r><w:r><w:t xml:space="preserve"> Report &amp; Notes</w:t></w:r></w:p>
    <w:p></w:p>
    <w:p><w:r><w:t>Col A</w:t><w:tab/><w:t>Col B</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let doc = Document::new("report.docx", docx_bytes(xml), LIMIT).unwrap();

        let segments = extract_segments(&doc).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Annual Report & Notes");
        assert_eq!(segments[1].text, "Col A\tCol B");
        assert_eq!(segments[1].location, SegmentLocation::Paragraph(2));
    }

    #[test]
    fn test_docx_without_body_is_document_error() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("other.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<x/>").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let doc = Document::new("broken.docx", bytes, LIMIT).unwrap();
        assert!(matches!(extract_segments(&doc), Err(AppError::Document(_))));
    }

    #[test]
    fn test_pdf_pages_skip_blank() {
        let doc = Document::new(
            "paper.pdf",
            pdf_bytes(&["Hello World", "", "Last page"]),
            LIMIT,
        )
        .unwrap();

        let segments = extract_segments(&doc).unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments[0].text.contains("Hello World"));
        assert_eq!(segments[0].location, SegmentLocation::Page(1));
        assert!(segments[1].text.contains("Last page"));
        assert_eq!(segments[1].location, SegmentLocation::Page(3));
    }

    #[test]
    fn test_corrupt_pdf_is_document_error() {
        let doc = Document::new("corrupt.pdf", b"not a pdf at all".to_vec(), LIMIT).unwrap();
        assert!(matches!(extract_segments(&doc), Err(AppError::Document(_))));
    }

    #[test]
    fn test_read_and_expand_paths() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("docs");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("b.txt"), "bee").unwrap();
        std::fs::write(dir.join("nested/a.TXT"), "ay").unwrap();
        std::fs::write(dir.join("cover.png"), [0u8; 4]).unwrap();
        let single = temp.path().join("single.epub");
        std::fs::write(&single, "x").unwrap();

        let files = expand_paths(&[dir.clone(), single.clone()]).unwrap();
        assert_eq!(files, vec![dir.join("b.txt"), dir.join("nested/a.TXT"), single.clone()]);

        let doc = read_document(&files[0], LIMIT).unwrap();
        assert_eq!(doc.name, "b.txt");
        assert_eq!(doc.bytes, b"bee");

        assert!(matches!(
            read_document(&single, LIMIT),
            Err(AppError::UnsupportedFormat(_))
        ));
        assert!(expand_paths(&[temp.path().join("missing.txt")]).is_err());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = Document::new("a.txt", b"same".to_vec(), LIMIT).unwrap();
        let b = Document::new("b.txt", b"same".to_vec(), LIMIT).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
