//! Core data types shared by the store, the numbering algorithms, the HTTP
//! API and the sync client.
//!
//! Everything that crosses the wire derives both `Serialize` and
//! `Deserialize`: the server produces these shapes and the client reads them
//! back unchanged.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in page coordinates (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}

/// One run of text produced by an extractor, in reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    pub text: String,
    pub rect: Rect,
    #[serde(default)]
    pub font_size: Option<f64>,
}

/// Extraction output for a single page. A page with no fragments is blank.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageLayout {
    #[serde(default)]
    pub fragments: Vec<TextFragment>,
}

/// Stored document row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: i64,
    pub filename: String,
    pub original_filename: String,
    pub page_count: i64,
    pub version: i64,
    pub created_at: String,
}

/// A text block. `activation_order` is `None` while the block is inactive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_id: i64,
    pub page_number: i64,
    pub block_number: i64,
    pub text: String,
    pub bbox: Rect,
    pub activation_order: Option<i64>,
}

impl Block {
    pub fn is_active(&self) -> bool {
        self.activation_order.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub word_id: i64,
    pub block_id: i64,
    pub page_number: i64,
    pub word_number: i64,
    pub text: String,
    pub bbox: Rect,
    pub is_sentence_starter: bool,
    pub sentence_number: Option<i64>,
}

/// Addresses a block either by surrogate id or by page/block position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockRef {
    Id { block_id: i64 },
    Position { page_number: i64, block_number: i64 },
}

impl BlockRef {
    pub fn position(page_number: i64, block_number: i64) -> Self {
        BlockRef::Position {
            page_number,
            block_number,
        }
    }

    pub fn id(block_id: i64) -> Self {
        BlockRef::Id { block_id }
    }

    pub fn matches(&self, block: &Block) -> bool {
        match *self {
            BlockRef::Id { block_id } => block.block_id == block_id,
            BlockRef::Position {
                page_number,
                block_number,
            } => block.page_number == page_number && block.block_number == block_number,
        }
    }
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockRef::Id { block_id } => write!(f, "block #{}", block_id),
            BlockRef::Position {
                page_number,
                block_number,
            } => write!(f, "block {} on page {}", block_number, page_number),
        }
    }
}

/// Complete authoritative state of a document's blocks, words and labels.
///
/// Returned by every mutating call and by `get_blocks`. `blocks` has exactly
/// `page_count` entries; blank pages are empty vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub document_id: i64,
    pub version: i64,
    pub page_count: i64,
    pub blocks: Vec<Vec<Block>>,
    pub words: Vec<Word>,
    /// Stored labels with their current staleness.
    #[serde(default)]
    pub labels: Vec<Label>,
}

impl Snapshot {
    pub fn iter_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().flatten()
    }

    pub fn find_block(&self, block_ref: &BlockRef) -> Option<&Block> {
        self.iter_blocks().find(|b| block_ref.matches(b))
    }

    /// `(block_id, activation_order)` for every active block, ordered by activation.
    pub fn activation_orders(&self) -> Vec<(i64, i64)> {
        let mut orders: Vec<(i64, i64)> = self
            .iter_blocks()
            .filter_map(|b| b.activation_order.map(|o| (b.block_id, o)))
            .collect();
        orders.sort_by_key(|&(_, order)| order);
        orders
    }
}

/// Result of `activate_block`: the target's new state plus the full snapshot.
/// Serializes as a snapshot with three extra fields, so clients that only
/// want the snapshot can read it as one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationOutcome {
    pub block_id: i64,
    pub activation_order: Option<i64>,
    pub renumber_required: bool,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

/// A derived sentence: the run of words from one starter up to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentence {
    pub sentence_number: i64,
    pub text: String,
    /// Block holding the sentence's starter word.
    pub block_id: i64,
    pub page_number: i64,
    pub block_number: i64,
    pub activation_order: i64,
    pub word_count: usize,
}

/// Rhetorical label attached to a sentence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub sentence_number: i64,
    pub function: String,
    pub relevance: i64,
    /// Sentence text at labeling time.
    pub text: String,
    /// SHA-256 of `text`; staleness is checked against this.
    #[serde(default)]
    pub text_hash: String,
    /// Set when the sentence under this number no longer has `text`.
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceView {
    #[serde(flatten)]
    pub sentence: Sentence,
    pub label: Option<Label>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentencesResponse {
    pub document_id: i64,
    pub sentences: Vec<SentenceView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelsResponse {
    pub document_id: i64,
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivateRequest {
    pub document_id: i64,
    pub block: BlockRef,
    pub is_activating: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToggleRequest {
    pub document_id: i64,
    pub block: BlockRef,
    pub word_number: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub document_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportLayoutRequest {
    pub filename: String,
    pub pages: Vec<PageLayout>,
}
