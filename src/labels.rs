//! Label normalization and staleness.
//!
//! Labels are keyed by sentence number and carry the sentence text they were
//! computed for. A label is stale when the sentence now holding its number
//! has different text, or when no sentence has that number anymore.

use std::collections::{BTreeMap, HashMap};

use sha2::{Digest, Sha256};

use crate::models::{Label, Sentence};

pub const MISSING_FUNCTION: &str = "Unknown: Missing from analysis";

/// One result row as returned by a labeler, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLabel {
    pub sentence_number: i64,
    pub function: String,
    pub relevance: i64,
}

/// SHA-256 of a sentence text, hex encoded.
pub fn text_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Reconcile labeler output with the sentences that were sent.
///
/// Results for numbers that were not requested are dropped. Requested
/// numbers with no result get [`MISSING_FUNCTION`] and relevance 0. When the
/// labeler answers a number twice, the first answer wins. Relevance is
/// clamped into `0..=100`.
pub fn normalize_labels(requested: &[Sentence], raw: Vec<RawLabel>) -> Vec<Label> {
    let mut answers: HashMap<i64, RawLabel> = HashMap::new();
    for row in raw {
        answers.entry(row.sentence_number).or_insert(row);
    }

    requested
        .iter()
        .map(|sentence| match answers.remove(&sentence.sentence_number) {
            Some(row) => Label {
                sentence_number: sentence.sentence_number,
                function: row.function.trim().to_string(),
                relevance: row.relevance.clamp(0, 100),
                text: sentence.text.clone(),
                text_hash: text_hash(&sentence.text),
                stale: false,
            },
            None => Label {
                sentence_number: sentence.sentence_number,
                function: MISSING_FUNCTION.to_string(),
                relevance: 0,
                text: sentence.text.clone(),
                text_hash: text_hash(&sentence.text),
                stale: false,
            },
        })
        .collect()
}

/// Whether a label stored with `stored_hash` is stale against `current`.
pub fn is_stale(stored_hash: &str, current: Option<&Sentence>) -> bool {
    match current {
        Some(sentence) => text_hash(&sentence.text) != stored_hash,
        None => true,
    }
}

/// Recompute `stale` on every label. Returns the numbers whose flag changed.
pub fn refresh_staleness(labels: &mut [Label], sentences: &[Sentence]) -> Vec<i64> {
    let by_number: BTreeMap<i64, &Sentence> =
        sentences.iter().map(|s| (s.sentence_number, s)).collect();
    let mut changed = Vec::new();
    for label in labels.iter_mut() {
        let stale = is_stale(&label.text_hash, by_number.get(&label.sentence_number).copied());
        if stale != label.stale {
            label.stale = stale;
            changed.push(label.sentence_number);
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(n: i64, text: &str) -> Sentence {
        Sentence {
            sentence_number: n,
            text: text.to_string(),
            block_id: 1,
            page_number: 1,
            block_number: 1,
            activation_order: 1,
            word_count: text.split_whitespace().count(),
        }
    }

    fn raw(n: i64, function: &str, relevance: i64) -> RawLabel {
        RawLabel {
            sentence_number: n,
            function: function.to_string(),
            relevance,
        }
    }

    #[test]
    fn normalization_fills_drops_and_clamps() {
        let requested = vec![sentence(1, "One."), sentence(2, "Two."), sentence(3, "Three.")];
        let labels = normalize_labels(
            &requested,
            vec![
                raw(1, " Claim ", 140),
                raw(3, "Evidence", -5),
                raw(9, "Stray", 50),
                raw(1, "Duplicate", 10),
            ],
        );

        assert_eq!(labels.len(), 3);
        assert_eq!(labels[0].function, "Claim");
        assert_eq!(labels[0].relevance, 100);
        assert_eq!(labels[0].text, "One.");
        assert_eq!(labels[1].function, MISSING_FUNCTION);
        assert_eq!(labels[1].relevance, 0);
        assert_eq!(labels[2].relevance, 0);
        assert!(labels.iter().all(|l| !l.stale));
    }

    #[test]
    fn staleness_tracks_text_under_number() {
        let mut labels = normalize_labels(
            &[sentence(1, "One."), sentence(2, "Two.")],
            vec![raw(1, "Claim", 50), raw(2, "Claim", 50)],
        );

        // a starter was inserted before sentence 2: its text shifted to 3
        let current = vec![sentence(1, "One."), sentence(2, "Half"), sentence(3, "Two.")];
        let changed = refresh_staleness(&mut labels, &current);
        assert_eq!(changed, vec![2]);
        assert!(!labels[0].stale);
        assert!(labels[1].stale);

        // toggled back: fresh again
        let changed = refresh_staleness(&mut labels, &[sentence(1, "One."), sentence(2, "Two.")]);
        assert_eq!(changed, vec![2]);
        assert!(!labels[1].stale);
    }

    #[test]
    fn missing_sentence_makes_label_stale() {
        assert!(is_stale(&text_hash("Gone."), None));
        assert!(!is_stale(&text_hash("Here."), Some(&sentence(1, "Here."))));
    }

    #[test]
    fn staleness_reads_the_stored_hash() {
        let mut labels = normalize_labels(&[sentence(1, "Here.")], vec![raw(1, "Claim", 50)]);
        assert_eq!(labels[0].text_hash, text_hash("Here."));

        // the hash, not the display text, decides
        labels[0].text_hash = text_hash("Elsewhere.");
        let changed = refresh_staleness(&mut labels, &[sentence(1, "Here.")]);
        assert_eq!(changed, vec![1]);
        assert!(labels[0].stale);
    }

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            text_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
