//! Sentence numbering over the activation-ordered word stream.
//!
//! Numbering is always a full recomputation. Activated blocks are visited
//! by `activation_order`, their words by `word_number`; a counter starting
//! at zero is bumped at each sentence starter and every word takes the
//! current value. Words seen while the counter is still zero, and all words
//! of inactive blocks, get no number.

use std::collections::HashMap;

use crate::models::{Block, Sentence, Word};

/// Activated blocks in activation order, each paired with its words in
/// `word_number` order.
fn activation_stream<'a>(blocks: &'a [Block], words: &'a [Word]) -> Vec<(&'a Block, Vec<&'a Word>)> {
    let mut by_block: HashMap<i64, Vec<&Word>> = HashMap::new();
    for word in words {
        by_block.entry(word.block_id).or_default().push(word);
    }

    let mut active: Vec<&Block> = blocks.iter().filter(|b| b.is_active()).collect();
    active.sort_by_key(|b| b.activation_order);

    active
        .into_iter()
        .map(|block| {
            let mut block_words = by_block.remove(&block.block_id).unwrap_or_default();
            block_words.sort_by_key(|w| w.word_number);
            (block, block_words)
        })
        .collect()
}

/// Compute the sentence number of every word. The result maps `word_id`
/// to its number and covers every word passed in.
pub fn renumber(blocks: &[Block], words: &[Word]) -> HashMap<i64, Option<i64>> {
    let mut numbers: HashMap<i64, Option<i64>> =
        words.iter().map(|w| (w.word_id, None)).collect();

    let mut counter = 0i64;
    for (_, block_words) in activation_stream(blocks, words) {
        for word in block_words {
            if word.is_sentence_starter {
                counter += 1;
            }
            let number = (counter > 0).then_some(counter);
            numbers.insert(word.word_id, number);
        }
    }

    numbers
}

/// Apply `renumber` to `words` in place and return the ids of words whose
/// number changed.
pub fn apply_renumber(blocks: &[Block], words: &mut [Word]) -> Vec<i64> {
    let numbers = renumber(blocks, words);
    let mut changed = Vec::new();
    for word in words.iter_mut() {
        let number = numbers.get(&word.word_id).copied().flatten();
        if word.sentence_number != number {
            word.sentence_number = number;
            changed.push(word.word_id);
        }
    }
    changed
}

/// Derive the sentence list from the current numbering.
///
/// Expects `words` to be numbered already (see [`apply_renumber`]).
pub fn assemble_sentences(blocks: &[Block], words: &[Word]) -> Vec<Sentence> {
    let mut sentences: Vec<Sentence> = Vec::new();
    let mut parts: Vec<&str> = Vec::new();

    for (block, block_words) in activation_stream(blocks, words) {
        for word in block_words {
            let Some(number) = word.sentence_number else {
                continue;
            };
            let is_new = sentences
                .last()
                .map(|s| s.sentence_number != number)
                .unwrap_or(true);
            if is_new {
                if let Some(last) = sentences.last_mut() {
                    last.text = parts.join(" ");
                }
                parts.clear();
                sentences.push(Sentence {
                    sentence_number: number,
                    text: String::new(),
                    block_id: block.block_id,
                    page_number: block.page_number,
                    block_number: block.block_number,
                    activation_order: block.activation_order.unwrap_or_default(),
                    word_count: 0,
                });
            }
            parts.push(&word.text);
            if let Some(last) = sentences.last_mut() {
                last.word_count += 1;
            }
        }
    }
    if let Some(last) = sentences.last_mut() {
        last.text = parts.join(" ");
    }

    sentences
}

/// Check the numbering post-conditions over the activation-ordered stream:
/// numbers never decrease, start at 1, and grow by exactly one at each
/// starter and nowhere else.
pub fn verify_numbering(blocks: &[Block], words: &[Word]) -> Result<(), String> {
    let mut expected = 0i64;
    for (block, block_words) in activation_stream(blocks, words) {
        for word in block_words {
            if word.is_sentence_starter {
                expected += 1;
            }
            let wanted = (expected > 0).then_some(expected);
            if word.sentence_number != wanted {
                return Err(format!(
                    "word {} in block {} has sentence {:?}, expected {:?}",
                    word.word_number, block.block_id, word.sentence_number, wanted
                ));
            }
        }
    }
    let inactive: Vec<i64> = blocks
        .iter()
        .filter(|b| !b.is_active())
        .map(|b| b.block_id)
        .collect();
    if let Some(word) = words
        .iter()
        .find(|w| w.sentence_number.is_some() && inactive.contains(&w.block_id))
    {
        return Err(format!(
            "word {} of inactive block {} carries sentence {:?}",
            word.word_number, word.block_id, word.sentence_number
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rect;

    fn block(block_id: i64, order: Option<i64>) -> Block {
        Block {
            block_id,
            page_number: 1,
            block_number: block_id,
            text: String::new(),
            bbox: Rect::default(),
            activation_order: order,
        }
    }

    /// Words `w{block}_{n}` with ids `block * 100 + n`.
    fn words(block_id: i64, count: i64, starters: &[i64]) -> Vec<Word> {
        (1..=count)
            .map(|n| Word {
                word_id: block_id * 100 + n,
                block_id,
                page_number: 1,
                word_number: n,
                text: format!("w{}_{}", block_id, n),
                bbox: Rect::default(),
                is_sentence_starter: starters.contains(&n),
                sentence_number: None,
            })
            .collect()
    }

    fn numbers_of(words: &[Word], block_id: i64) -> Vec<Option<i64>> {
        let mut ws: Vec<&Word> = words.iter().filter(|w| w.block_id == block_id).collect();
        ws.sort_by_key(|w| w.word_number);
        ws.iter().map(|w| w.sentence_number).collect()
    }

    #[test]
    fn starters_in_first_and_third_block() {
        let blocks = vec![block(1, Some(1)), block(2, None), block(3, Some(2))];
        let mut all = words(1, 3, &[1]);
        all.extend(words(2, 2, &[1]));
        all.extend(words(3, 2, &[1]));

        apply_renumber(&blocks, &mut all);

        assert_eq!(numbers_of(&all, 1), vec![Some(1), Some(1), Some(1)]);
        assert_eq!(numbers_of(&all, 2), vec![None, None]);
        assert_eq!(numbers_of(&all, 3), vec![Some(2), Some(2)]);
        verify_numbering(&blocks, &all).unwrap();
    }

    #[test]
    fn words_before_first_starter_have_no_number() {
        let blocks = vec![block(1, Some(1))];
        let mut all = words(1, 4, &[3]);
        apply_renumber(&blocks, &mut all);
        assert_eq!(numbers_of(&all, 1), vec![None, None, Some(1), Some(1)]);
    }

    #[test]
    fn activation_order_not_page_order_drives_numbering() {
        let blocks = vec![block(1, Some(2)), block(2, Some(1))];
        let mut all = words(1, 1, &[1]);
        all.extend(words(2, 1, &[1]));
        apply_renumber(&blocks, &mut all);
        assert_eq!(numbers_of(&all, 2), vec![Some(1)]);
        assert_eq!(numbers_of(&all, 1), vec![Some(2)]);
    }

    #[test]
    fn sentences_continue_across_blocks() {
        let blocks = vec![block(1, Some(1)), block(2, Some(2))];
        let mut all = words(1, 2, &[1]);
        all.extend(words(2, 2, &[2]));
        apply_renumber(&blocks, &mut all);

        let sentences = assemble_sentences(&blocks, &all);
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].text, "w1_1 w1_2 w2_1");
        assert_eq!(sentences[0].word_count, 3);
        assert_eq!(sentences[0].block_id, 1);
        assert_eq!(sentences[1].text, "w2_2");
        assert_eq!(sentences[1].block_id, 2);
        assert_eq!(sentences[1].activation_order, 2);
    }

    #[test]
    fn renumber_is_idempotent() {
        let blocks = vec![block(1, Some(1)), block(2, Some(2))];
        let mut all = words(1, 5, &[1, 4]);
        all.extend(words(2, 3, &[2]));
        apply_renumber(&blocks, &mut all);
        let first = all.clone();
        let changed = apply_renumber(&blocks, &mut all);
        assert!(changed.is_empty());
        assert_eq!(first, all);
    }

    #[test]
    fn deactivated_block_loses_numbers() {
        let mut blocks = vec![block(1, Some(1)), block(2, Some(2))];
        let mut all = words(1, 1, &[1]);
        all.extend(words(2, 1, &[1]));
        apply_renumber(&blocks, &mut all);

        blocks[1].activation_order = None;
        let changed = apply_renumber(&blocks, &mut all);
        assert_eq!(changed, vec![201]);
        assert_eq!(numbers_of(&all, 2), vec![None]);
        verify_numbering(&blocks, &all).unwrap();
    }

    #[test]
    fn verify_rejects_gapped_numbers() {
        let blocks = vec![block(1, Some(1))];
        let mut all = words(1, 2, &[1, 2]);
        apply_renumber(&blocks, &mut all);
        all[1].sentence_number = Some(3);
        assert!(verify_numbering(&blocks, &all).is_err());
    }
}
