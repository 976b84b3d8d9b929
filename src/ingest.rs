//! Document import.
//!
//! Turns per-page text layouts into stored pages, blocks and words inside a
//! single transaction: either the whole document lands or nothing does.
//! Starter seeding runs here once; afterwards only explicit toggles change
//! starter flags.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AnnotateError, Result};
use crate::layout::{build_blocks, seed_sentence_starters};
use crate::models::PageLayout;
use crate::store::{self, NewBlock, NewWord};

/// Counts reported after an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub pages: usize,
    pub blocks: usize,
    pub words: usize,
    pub starters: usize,
}

/// Store name for an upload: a random prefix plus the sanitized original name.
pub fn stored_filename(original: &str) -> String {
    let base = original.rsplit(&['/', '\\'][..]).next().unwrap_or_default();
    let safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = safe.trim_matches('.');
    let safe = if safe.is_empty() { "document.pdf" } else { safe };
    format!("{}_{}", Uuid::new_v4().simple(), safe)
}

/// Insert a document built from `pages`. Returns the new document id.
pub async fn import_pages(
    conn: &mut SqliteConnection,
    config: &Config,
    original_filename: &str,
    pages: &[PageLayout],
) -> Result<(i64, ImportStats)> {
    if original_filename.trim().is_empty() {
        return Err(AnnotateError::validation("filename must not be empty"));
    }
    if pages.is_empty() {
        return Err(AnnotateError::validation("document has no pages"));
    }

    let filename = stored_filename(original_filename);
    let document_id =
        store::insert_document(conn, &filename, original_filename, pages.len() as i64).await?;

    let mut stats = ImportStats::default();
    for (page_idx, page) in pages.iter().enumerate() {
        let page_number = page_idx as i64 + 1;
        let page_id = store::insert_page(conn, document_id, page_number).await?;
        stats.pages += 1;

        let mut blocks = build_blocks(page, &config.layout);
        if config.segmentation.auto_detect_starters {
            seed_sentence_starters(&mut blocks, &config.segmentation);
        }

        for (block_idx, block) in blocks.iter().enumerate() {
            let block_id = store::insert_block(
                conn,
                NewBlock {
                    document_id,
                    page_id,
                    page_number,
                    block_number: block_idx as i64 + 1,
                    text: &block.text,
                    bbox: block.bbox,
                },
            )
            .await?;
            stats.blocks += 1;

            for (word_idx, word) in block.words.iter().enumerate() {
                store::insert_word(
                    conn,
                    NewWord {
                        document_id,
                        block_id,
                        word_number: word_idx as i64 + 1,
                        text: &word.text,
                        bbox: word.bbox,
                        is_sentence_starter: word.is_sentence_starter,
                    },
                )
                .await?;
                stats.words += 1;
                if word.is_sentence_starter {
                    stats.starters += 1;
                }
            }
        }
    }

    tracing::info!(
        document_id,
        filename = %filename,
        pages = stats.pages,
        blocks = stats.blocks,
        words = stats.words,
        starters = stats.starters,
        "document imported"
    );
    Ok((document_id, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_filename_is_sanitized_and_unique() {
        let a = stored_filename("../reports/Q1 summary.pdf");
        let b = stored_filename("../reports/Q1 summary.pdf");
        assert!(a.ends_with("_Q1_summary.pdf"));
        assert_ne!(a, b);
        assert!(!a.contains('/'));
    }

    #[test]
    fn empty_name_gets_placeholder() {
        assert!(stored_filename("..").ends_with("_document.pdf"));
    }
}
