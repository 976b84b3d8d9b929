//! Text extraction from uploaded PDFs.
//!
//! The rest of the crate only sees the [`Extractor`] trait: bytes in, one
//! [`PageLayout`] per page out. [`PdfExtractor`] is the built-in
//! implementation on top of `pdf-extract`.

use crate::models::{PageLayout, Rect, TextFragment};

pub const MIME_PDF: &str = "application/pdf";

/// Ratio of an average glyph's advance to the font size.
const CHAR_WIDTH_RATIO: f64 = 0.5;

/// Extraction error. Never a panic: a bad upload fails the import only.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedContentType(String),
    Pdf(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedContentType(ct) => {
                write!(f, "unsupported content-type: {}", ct)
            }
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Turns an uploaded file into positioned text fragments, page by page.
pub trait Extractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<PageLayout>, ExtractError>;
}

/// Extracts per-page text with `pdf-extract` and lays each page's lines out
/// on a fixed text grid: one line per `font_size` vertically, one glyph per
/// `font_size * 0.5` horizontally. Blank lines keep their vertical space, so
/// paragraph breaks survive as gaps between fragments.
pub struct PdfExtractor {
    font_size: f64,
}

impl PdfExtractor {
    pub fn new(font_size: f64) -> Self {
        Self { font_size }
    }
}

impl Extractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<PageLayout>, ExtractError> {
        if !bytes.starts_with(b"%PDF") {
            return Err(ExtractError::UnsupportedContentType(
                sniff_content_type(bytes).to_string(),
            ));
        }
        // pdf-extract panics on some malformed streams
        let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
            .map_err(|_| ExtractError::Pdf("malformed PDF".to_string()))?
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;
        Ok(pages
            .iter()
            .map(|text| layout_page_text(text, self.font_size))
            .collect())
    }
}

fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"PK") {
        "application/zip"
    } else if std::str::from_utf8(bytes).is_ok() {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

/// Lay out plain page text on the text grid. One fragment per non-blank line.
pub fn layout_page_text(text: &str, font_size: f64) -> PageLayout {
    let char_width = font_size * CHAR_WIDTH_RATIO;
    let fragments = text
        .lines()
        .enumerate()
        .filter_map(|(line_idx, line)| {
            let content = line.trim_end();
            let trimmed = content.trim_start();
            if trimmed.is_empty() {
                return None;
            }
            let indent = content.chars().count() - trimmed.chars().count();
            let y0 = line_idx as f64 * font_size;
            let x0 = indent as f64 * char_width;
            let x1 = x0 + trimmed.chars().count() as f64 * char_width;
            Some(TextFragment {
                text: trimmed.to_string(),
                rect: Rect::new(x0, y0, x1, y0 + font_size),
                font_size: Some(font_size),
            })
        })
        .collect();
    PageLayout { fragments }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_pdf_bytes_are_rejected() {
        let err = PdfExtractor::new(12.0).extract(b"hello world").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(ct) if ct == "text/plain"));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = PdfExtractor::new(12.0)
            .extract(b"%PDF-1.4 garbage")
            .unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn grid_layout_keeps_blank_line_gaps() {
        let page = layout_page_text("First line\n  indented\n\nAfter gap", 10.0);
        assert_eq!(page.fragments.len(), 3);

        assert_eq!(page.fragments[0].text, "First line");
        assert_eq!(page.fragments[0].rect, Rect::new(0.0, 0.0, 50.0, 10.0));

        assert_eq!(page.fragments[1].text, "indented");
        assert_eq!(page.fragments[1].rect.x0, 10.0);
        assert_eq!(page.fragments[1].rect.y0, 10.0);

        // line index 3: the blank line at index 2 leaves a 10pt gap
        assert_eq!(page.fragments[2].rect.y0, 30.0);
    }

    #[test]
    fn blank_page_has_no_fragments() {
        assert!(layout_page_text("\n   \n", 12.0).fragments.is_empty());
    }
}
