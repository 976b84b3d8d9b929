//! The annotation service: every operation the HTTP API, the CLI and the
//! in-process client call.
//!
//! # Write discipline
//!
//! Mutations take the per-document lock, then run as one SQLite transaction
//! that ends with an optimistic version bump on the document row. A
//! `Conflict` (version moved, or SQLite reported busy) is retried once with a
//! fresh transaction before it is surfaced. Any error drops the transaction,
//! so readers never see a half-applied activation or renumber.
//!
//! Reads take no lock and run inside a read transaction, which gives them a
//! consistent snapshot under WAL.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};

use crate::activation::{apply_plan, plan_activation, verify_contiguous};
use crate::config::Config;
use crate::db;
use crate::error::{AnnotateError, Result};
use crate::extract::{ExtractError, Extractor, PdfExtractor};
use crate::ingest;
use crate::labeling::{create_labeler, Labeler, SentenceInput};
use crate::labels::{normalize_labels, refresh_staleness};
use crate::locks::DocumentLocks;
use crate::migrate;
use crate::models::{
    ActivationOutcome, Block, BlockRef, DocumentSummary, Label, LabelsResponse, PageLayout,
    Sentence, SentenceView, SentencesResponse, Snapshot, Word,
};
use crate::segment::{apply_renumber, assemble_sentences, verify_numbering};
use crate::store;

/// Attempts per mutation: the first try plus one retry on `Conflict`.
const MAX_ATTEMPTS: u32 = 2;

pub struct AnnotationService {
    pool: SqlitePool,
    config: Config,
    locks: DocumentLocks,
    labeler: Arc<dyn Labeler>,
    extractor: Arc<dyn Extractor>,
}

impl AnnotationService {
    pub fn new(
        pool: SqlitePool,
        config: Config,
        labeler: Arc<dyn Labeler>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            pool,
            config,
            locks: DocumentLocks::new(),
            labeler,
            extractor,
        }
    }

    /// Connect, make sure the schema exists and build the configured
    /// labeler and PDF extractor.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::create_schema(&pool).await?;
        let labeler: Arc<dyn Labeler> = Arc::from(create_labeler(&config.labeling)?);
        let extractor = Arc::new(PdfExtractor::new(config.layout.default_font_size));
        Ok(Self::new(pool, config, labeler, extractor))
    }

    /// Swap the labeling capability.
    pub fn with_labeler(mut self, labeler: Arc<dyn Labeler>) -> Self {
        self.labeler = labeler;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Documents whose write lock is currently held or awaited.
    pub fn locked_documents(&self) -> usize {
        self.locks.len()
    }

    /// Write transaction holding SQLite's write lock from its first
    /// statement, so no other commit can invalidate its read snapshot.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    // ============ Documents ============

    /// Import a document from already extracted page layouts.
    pub async fn import_layout(
        &self,
        original_filename: &str,
        pages: &[PageLayout],
    ) -> Result<DocumentSummary> {
        self.import(original_filename, pages, None).await
    }

    /// Extract an uploaded PDF, import it and keep the file under the
    /// document's stored name.
    pub async fn import_pdf(&self, original_filename: &str, bytes: Vec<u8>) -> Result<DocumentSummary> {
        if bytes.is_empty() {
            return Err(AnnotateError::validation("upload is empty"));
        }
        let extractor = self.extractor.clone();
        let (pages, bytes) =
            tokio::task::spawn_blocking(move || extractor.extract(&bytes).map(|pages| (pages, bytes)))
                .await
                .map_err(|e| ExtractError::Pdf(format!("extraction task failed: {}", e)))??;
        tracing::debug!(pages = pages.len(), "pdf extracted");
        self.import(original_filename, &pages, Some(&bytes)).await
    }

    /// The file is written before the commit; a failed write rolls the
    /// import back.
    async fn import(
        &self,
        original_filename: &str,
        pages: &[PageLayout],
        upload: Option<&[u8]>,
    ) -> Result<DocumentSummary> {
        let mut tx = self.begin_write().await?;
        let (document_id, _) =
            ingest::import_pages(&mut tx, &self.config, original_filename, pages).await?;
        let summary = store::get_document(&mut tx, document_id).await?;
        if let Some(bytes) = upload {
            let dir = &self.config.storage.upload_dir;
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(dir.join(&summary.filename), bytes).await?;
        }
        tx.commit().await?;
        Ok(summary)
    }

    /// Bytes of an uploaded PDF, by stored filename.
    pub async fn read_upload(&self, filename: &str) -> Result<Vec<u8>> {
        let mut conn = self.pool.acquire().await?;
        let document = store::find_document_by_filename(&mut conn, filename).await?;
        let path = self.config.storage.upload_dir.join(&document.filename);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AnnotateError::not_found(format!("file {}", filename)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let mut conn = self.pool.acquire().await?;
        store::list_documents(&mut conn).await
    }

    /// Delete a document, its rows and its stored upload.
    pub async fn delete_document(&self, document_id: i64) -> Result<()> {
        let guard = self.locks.acquire(document_id).await;
        let result = self.try_delete(document_id).await;
        self.locks.release(document_id, guard);
        let document = result?;

        let path = self.config.storage.upload_dir.join(&document.filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(document_id, path = %path.display(), error = %e, "could not remove upload"),
        }
        tracing::info!(document_id, "document deleted");
        Ok(())
    }

    async fn try_delete(&self, document_id: i64) -> Result<DocumentSummary> {
        let mut tx = self.begin_write().await?;
        let document = store::get_document(&mut tx, document_id).await?;
        store::delete_document(&mut tx, document_id).await?;
        tx.commit().await?;
        Ok(document)
    }

    // ============ Reads ============

    /// The authoritative snapshot of a document.
    pub async fn get_blocks(&self, document_id: i64) -> Result<Snapshot> {
        let mut tx = self.pool.begin().await?;
        let snapshot = store::read_snapshot(&mut tx, document_id).await?;
        tx.commit().await?;
        Ok(snapshot)
    }

    /// Current sentences with their labels, if any.
    pub async fn get_sentences(&self, document_id: i64) -> Result<SentencesResponse> {
        let mut tx = self.pool.begin().await?;
        let sentences = read_sentences(&mut tx, document_id).await?;
        let labels = store::load_labels(&mut tx, document_id).await?;
        tx.commit().await?;

        let mut by_number: BTreeMap<i64, Label> =
            labels.into_iter().map(|l| (l.sentence_number, l)).collect();
        let sentences = sentences
            .into_iter()
            .map(|sentence| SentenceView {
                label: by_number.remove(&sentence.sentence_number),
                sentence,
            })
            .collect();
        Ok(SentencesResponse {
            document_id,
            sentences,
        })
    }

    pub async fn get_labels(&self, document_id: i64) -> Result<LabelsResponse> {
        let mut conn = self.pool.acquire().await?;
        store::get_document(&mut conn, document_id).await?;
        let labels = store::load_labels(&mut conn, document_id).await?;
        Ok(LabelsResponse {
            document_id,
            labels,
        })
    }

    // ============ Mutations ============

    /// Move a block into or out of the activation sequence.
    pub async fn activate_block(
        &self,
        document_id: i64,
        block: &BlockRef,
        is_activating: bool,
    ) -> Result<ActivationOutcome> {
        validate_block_ref(block)?;
        let guard = self.locks.acquire(document_id).await;

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match self.try_activate(document_id, block, is_activating).await {
                Err(AnnotateError::Conflict(reason)) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(document_id, %reason, "activation conflicted, retrying");
                }
                result => break result,
            }
        };
        self.locks.release(document_id, guard);
        result
    }

    async fn try_activate(
        &self,
        document_id: i64,
        block_ref: &BlockRef,
        is_activating: bool,
    ) -> Result<ActivationOutcome> {
        let mut tx = self.begin_write().await?;
        let mut document = store::get_document(&mut tx, document_id).await?;
        let mut blocks = store::load_blocks(&mut tx, document_id).await?;
        let target = find_block(&blocks, block_ref, document_id)?;

        let plan = plan_activation(&blocks, &target, is_activating);
        let state = if plan.is_noop() {
            Renumbered {
                words: store::load_words(&mut tx, document_id).await?,
                labels: store::load_labels(&mut tx, document_id).await?,
                changed: 0,
            }
        } else {
            for change in &plan.changes {
                store::set_activation_order(&mut tx, change.block_id, change.order).await?;
            }
            apply_plan(&mut blocks, &plan);
            verify_contiguous(&blocks).map_err(AnnotateError::Invariant)?;

            let state = renumber_in_tx(&mut tx, document_id, &blocks).await?;
            document.version = store::bump_version(&mut tx, document_id, document.version).await?;
            tracing::info!(
                document_id,
                block_id = target.block_id,
                order = ?plan.new_order,
                renumbered = state.changed,
                "activation changed"
            );
            state
        };
        tx.commit().await?;

        Ok(ActivationOutcome {
            block_id: target.block_id,
            activation_order: plan.new_order,
            renumber_required: plan.renumber_required,
            snapshot: store::build_snapshot(&document, blocks, state.words, state.labels),
        })
    }

    /// Flip one word's sentence-starter flag and renumber.
    pub async fn toggle_sentence_starter(
        &self,
        document_id: i64,
        block: &BlockRef,
        word_number: i64,
    ) -> Result<Snapshot> {
        validate_block_ref(block)?;
        if word_number < 1 {
            return Err(AnnotateError::validation(format!(
                "word_number must be >= 1, got {}",
                word_number
            )));
        }
        let guard = self.locks.acquire(document_id).await;

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match self.try_toggle(document_id, block, word_number).await {
                Err(AnnotateError::Conflict(reason)) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(document_id, %reason, "starter toggle conflicted, retrying");
                }
                result => break result,
            }
        };
        self.locks.release(document_id, guard);
        result
    }

    async fn try_toggle(
        &self,
        document_id: i64,
        block_ref: &BlockRef,
        word_number: i64,
    ) -> Result<Snapshot> {
        let mut tx = self.begin_write().await?;
        let mut document = store::get_document(&mut tx, document_id).await?;
        let blocks = store::load_blocks(&mut tx, document_id).await?;
        let target = find_block(&blocks, block_ref, document_id)?;

        let word = store::load_words(&mut tx, document_id)
            .await?
            .into_iter()
            .find(|w| w.block_id == target.block_id && w.word_number == word_number)
            .ok_or_else(|| {
                AnnotateError::not_found(format!("word {} in {}", word_number, block_ref))
            })?;
        let flag = !word.is_sentence_starter;
        store::set_sentence_starter(&mut tx, word.word_id, flag).await?;

        let state = renumber_in_tx(&mut tx, document_id, &blocks).await?;
        document.version = store::bump_version(&mut tx, document_id, document.version).await?;
        tx.commit().await?;

        tracing::info!(
            document_id,
            block_id = target.block_id,
            word_number,
            is_sentence_starter = flag,
            renumbered = state.changed,
            "sentence starter toggled"
        );
        Ok(store::build_snapshot(&document, blocks, state.words, state.labels))
    }

    /// Recompute all sentence numbers. A no-op when nothing changed; the
    /// version only moves if some word was rewritten.
    pub async fn renumber(&self, document_id: i64) -> Result<Snapshot> {
        let guard = self.locks.acquire(document_id).await;

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match self.try_renumber(document_id).await {
                Err(AnnotateError::Conflict(reason)) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(document_id, %reason, "renumber conflicted, retrying");
                }
                result => break result,
            }
        };
        self.locks.release(document_id, guard);
        result
    }

    async fn try_renumber(&self, document_id: i64) -> Result<Snapshot> {
        let mut tx = self.begin_write().await?;
        let mut document = store::get_document(&mut tx, document_id).await?;
        let blocks = store::load_blocks(&mut tx, document_id).await?;
        let state = renumber_in_tx(&mut tx, document_id, &blocks).await?;
        if state.changed > 0 {
            document.version = store::bump_version(&mut tx, document_id, document.version).await?;
        }
        tx.commit().await?;
        tracing::info!(document_id, renumbered = state.changed, "document renumbered");
        Ok(store::build_snapshot(&document, blocks, state.words, state.labels))
    }

    /// Label every current sentence and replace the stored labels.
    ///
    /// The labeler runs without the document lock. If numbering moves while
    /// it runs, labels whose text no longer matches are stored as stale.
    pub async fn process_labels(&self, document_id: i64) -> Result<LabelsResponse> {
        let sentences = {
            let mut tx = self.pool.begin().await?;
            let sentences = read_sentences(&mut tx, document_id).await?;
            tx.commit().await?;
            sentences
        };
        if sentences.is_empty() {
            return Err(AnnotateError::validation(format!(
                "document {} has no sentences to label",
                document_id
            )));
        }

        let inputs: Vec<SentenceInput> = sentences
            .iter()
            .map(|s| SentenceInput {
                sentence_number: s.sentence_number,
                text: s.text.clone(),
            })
            .collect();
        tracing::info!(
            document_id,
            sentences = inputs.len(),
            provider = self.labeler.name(),
            "labeling sentences"
        );
        let raw = self
            .labeler
            .label(&inputs)
            .await
            .map_err(|e| AnnotateError::Upstream(format!("{:#}", e)))?;
        let mut labels = normalize_labels(&sentences, raw);

        let guard = self.locks.acquire(document_id).await;
        let persisted = self.persist_labels(document_id, &mut labels).await;
        self.locks.release(document_id, guard);
        let stale = persisted?;

        if !stale.is_empty() {
            tracing::warn!(
                document_id,
                stale = stale.len(),
                "numbering changed during labeling"
            );
        }
        Ok(LabelsResponse {
            document_id,
            labels,
        })
    }

    /// Store `labels` against the current numbering. Returns the numbers
    /// whose stale flag changed.
    async fn persist_labels(&self, document_id: i64, labels: &mut [Label]) -> Result<Vec<i64>> {
        let mut tx = self.begin_write().await?;
        let current = read_sentences(&mut tx, document_id).await?;
        let stale = refresh_staleness(labels, &current);
        store::replace_labels(&mut tx, document_id, labels).await?;
        tx.commit().await?;
        Ok(stale)
    }
}

fn validate_block_ref(block: &BlockRef) -> Result<()> {
    match *block {
        BlockRef::Id { block_id } if block_id < 1 => Err(AnnotateError::validation(format!(
            "block_id must be >= 1, got {}",
            block_id
        ))),
        BlockRef::Position {
            page_number,
            block_number,
        } if page_number < 1 || block_number < 1 => Err(AnnotateError::validation(format!(
            "page_number and block_number must be >= 1, got {}/{}",
            page_number, block_number
        ))),
        _ => Ok(()),
    }
}

fn find_block(blocks: &[Block], block_ref: &BlockRef, document_id: i64) -> Result<Block> {
    blocks
        .iter()
        .find(|b| block_ref.matches(b))
        .cloned()
        .ok_or_else(|| AnnotateError::not_found(format!("{} of document {}", block_ref, document_id)))
}

/// Document state after a renumber inside a mutation.
struct Renumbered {
    words: Vec<Word>,
    labels: Vec<Label>,
    /// Words whose sentence number was rewritten.
    changed: usize,
}

/// Renumber every word, write the ones that changed, check the result and
/// refresh label staleness.
async fn renumber_in_tx(
    conn: &mut SqliteConnection,
    document_id: i64,
    blocks: &[Block],
) -> Result<Renumbered> {
    let mut words = store::load_words(conn, document_id).await?;
    let changed: HashSet<i64> = apply_renumber(blocks, &mut words).into_iter().collect();
    for word in words.iter().filter(|w| changed.contains(&w.word_id)) {
        store::set_sentence_number(conn, word.word_id, word.sentence_number).await?;
    }
    verify_numbering(blocks, &words).map_err(AnnotateError::Invariant)?;

    let mut labels = store::load_labels(conn, document_id).await?;
    if !labels.is_empty() {
        let sentences = assemble_sentences(blocks, &words);
        for number in refresh_staleness(&mut labels, &sentences) {
            let stale = labels
                .iter()
                .find(|l| l.sentence_number == number)
                .map(|l| l.stale)
                .unwrap_or(true);
            store::set_label_stale(conn, document_id, number, stale).await?;
        }
    }

    Ok(Renumbered {
        words,
        labels,
        changed: changed.len(),
    })
}

async fn read_sentences(conn: &mut SqliteConnection, document_id: i64) -> Result<Vec<Sentence>> {
    store::get_document(conn, document_id).await?;
    let blocks = store::load_blocks(conn, document_id).await?;
    let words = store::load_words(conn, document_id).await?;
    Ok(assemble_sentences(&blocks, &words))
}
