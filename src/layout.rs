//! Groups extracted text fragments into blocks and words.
//!
//! Runs once per page at import time. Fragments arrive in reading order; a
//! new block starts whenever the vertical gap to the previous fragment grows
//! beyond `block_gap_factor * font_size` or the font size changes. Each
//! fragment is split on whitespace and every word gets a rectangle
//! interpolated from its character offsets within the fragment.

use crate::config::{LayoutConfig, SegmentationConfig};
use crate::models::{PageLayout, Rect, TextFragment};

/// Font sizes closer than this are considered the same font.
const FONT_SIZE_TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutWord {
    pub text: String,
    pub bbox: Rect,
    pub is_sentence_starter: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBlock {
    pub text: String,
    pub bbox: Rect,
    pub words: Vec<LayoutWord>,
}

/// Build the blocks of one page, in reading order.
pub fn build_blocks(page: &PageLayout, config: &LayoutConfig) -> Vec<LayoutBlock> {
    let mut blocks: Vec<LayoutBlock> = Vec::new();
    let mut previous: Option<&TextFragment> = None;

    for fragment in &page.fragments {
        if fragment.text.trim().is_empty() {
            continue;
        }
        let starts_block = match previous {
            None => true,
            Some(prev) => breaks_block(prev, fragment, config),
        };

        let words = split_words(fragment);
        match blocks.last_mut() {
            Some(block) if !starts_block => {
                block.text.push('\n');
                block.text.push_str(fragment.text.trim());
                block.bbox = block.bbox.union(&fragment.rect);
                block.words.extend(words);
            }
            _ => blocks.push(LayoutBlock {
                text: fragment.text.trim().to_string(),
                bbox: fragment.rect,
                words,
            }),
        }
        previous = Some(fragment);
    }

    blocks
}

fn font_size(fragment: &TextFragment, config: &LayoutConfig) -> f64 {
    fragment.font_size.unwrap_or(config.default_font_size)
}

fn breaks_block(prev: &TextFragment, next: &TextFragment, config: &LayoutConfig) -> bool {
    let prev_size = font_size(prev, config);
    let next_size = font_size(next, config);
    if (prev_size - next_size).abs() > FONT_SIZE_TOLERANCE {
        return true;
    }
    let gap = next.rect.y0 - prev.rect.y1;
    gap > config.block_gap_factor * next_size
}

/// Split a fragment into words with interpolated rectangles.
fn split_words(fragment: &TextFragment) -> Vec<LayoutWord> {
    let chars: Vec<char> = fragment.text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let advance = (fragment.rect.x1 - fragment.rect.x0) / chars.len() as f64;

    let mut words = Vec::new();
    let mut start: Option<usize> = None;
    for (idx, ch) in chars.iter().enumerate() {
        match (ch.is_whitespace(), start) {
            (false, None) => start = Some(idx),
            (true, Some(s)) => {
                words.push(make_word(&chars[s..idx], s, fragment, advance));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        words.push(make_word(&chars[s..], s, fragment, advance));
    }
    words
}

fn make_word(chars: &[char], offset: usize, fragment: &TextFragment, advance: f64) -> LayoutWord {
    let x0 = fragment.rect.x0 + offset as f64 * advance;
    LayoutWord {
        text: chars.iter().collect(),
        bbox: Rect::new(
            x0,
            fragment.rect.y0,
            x0 + chars.len() as f64 * advance,
            fragment.rect.y1,
        ),
        is_sentence_starter: false,
    }
}

/// Pre-flag likely sentence starters in every block.
///
/// A word qualifies when it begins with an uppercase letter, is not one of
/// the configured non-starters, and either opens its block or follows a word
/// ending in `.`, `!` or `?`.
pub fn seed_sentence_starters(blocks: &mut [LayoutBlock], config: &SegmentationConfig) {
    for block in blocks.iter_mut() {
        let mut previous: Option<String> = None;
        for word in block.words.iter_mut() {
            word.is_sentence_starter =
                looks_like_starter(&word.text, previous.as_deref(), &config.non_starters);
            previous = Some(word.text.clone());
        }
    }
}

fn looks_like_starter(word: &str, previous: Option<&str>, non_starters: &[String]) -> bool {
    let capitalized = word.chars().next().map(char::is_uppercase).unwrap_or(false);
    if !capitalized {
        return false;
    }
    let bare = word.trim_end_matches(|c: char| c.is_ascii_punctuation());
    if non_starters.iter().any(|n| n == word || n == bare) {
        return false;
    }
    match previous {
        None => true,
        Some(prev) => prev.ends_with(&['.', '!', '?'][..]),
    }
}
