//! SQLite access for documents, blocks, words and labels.
//!
//! Every function takes a `&mut SqliteConnection` so callers decide the
//! transaction boundary: pass `&mut *tx` to run inside a transaction. Nothing
//! here takes the document lock; that is the service's job.

use sqlx::{Row, SqliteConnection};

use crate::error::{AnnotateError, Result};
use crate::models::{Block, DocumentSummary, Label, Rect, Snapshot, Word};

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn rect_from(row: &sqlx::sqlite::SqliteRow) -> Rect {
    Rect::new(row.get("x0"), row.get("y0"), row.get("x1"), row.get("y1"))
}

fn document_from(row: &sqlx::sqlite::SqliteRow) -> DocumentSummary {
    DocumentSummary {
        id: row.get("id"),
        filename: row.get("filename"),
        original_filename: row.get("original_filename"),
        page_count: row.get("page_count"),
        version: row.get("version"),
        created_at: format_ts_iso(row.get("created_at")),
    }
}

// ============ Documents ============

pub async fn get_document(conn: &mut SqliteConnection, document_id: i64) -> Result<DocumentSummary> {
    let row = sqlx::query(
        "SELECT id, filename, original_filename, page_count, version, created_at FROM documents WHERE id = ?",
    )
    .bind(document_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref()
        .map(document_from)
        .ok_or_else(|| AnnotateError::not_found(format!("document {}", document_id)))
}

/// Look a document up by its stored upload name.
pub async fn find_document_by_filename(
    conn: &mut SqliteConnection,
    filename: &str,
) -> Result<DocumentSummary> {
    let row = sqlx::query(
        "SELECT id, filename, original_filename, page_count, version, created_at FROM documents WHERE filename = ?",
    )
    .bind(filename)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref()
        .map(document_from)
        .ok_or_else(|| AnnotateError::not_found(format!("file {}", filename)))
}

pub async fn list_documents(conn: &mut SqliteConnection) -> Result<Vec<DocumentSummary>> {
    let rows = sqlx::query(
        "SELECT id, filename, original_filename, page_count, version, created_at FROM documents ORDER BY id ASC",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(document_from).collect())
}

pub async fn insert_document(
    conn: &mut SqliteConnection,
    filename: &str,
    original_filename: &str,
    page_count: i64,
) -> Result<i64> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        "INSERT INTO documents (filename, original_filename, page_count, version, created_at) VALUES (?, ?, ?, 0, ?)",
    )
    .bind(filename)
    .bind(original_filename)
    .bind(page_count)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Returns `false` when no such document existed.
pub async fn delete_document(conn: &mut SqliteConnection, document_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(document_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Advance the document version, failing with `Conflict` if another writer
/// already moved it past `expected`.
pub async fn bump_version(
    conn: &mut SqliteConnection,
    document_id: i64,
    expected: i64,
) -> Result<i64> {
    let result = sqlx::query("UPDATE documents SET version = version + 1 WHERE id = ? AND version = ?")
        .bind(document_id)
        .bind(expected)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AnnotateError::Conflict(format!(
            "document {} changed since version {}",
            document_id, expected
        )));
    }
    Ok(expected + 1)
}

// ============ Pages, blocks, words ============

pub async fn insert_page(
    conn: &mut SqliteConnection,
    document_id: i64,
    page_number: i64,
) -> Result<i64> {
    let result = sqlx::query("INSERT INTO pages (document_id, page_number) VALUES (?, ?)")
        .bind(document_id)
        .bind(page_number)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

pub struct NewBlock<'a> {
    pub document_id: i64,
    pub page_id: i64,
    pub page_number: i64,
    pub block_number: i64,
    pub text: &'a str,
    pub bbox: Rect,
}

pub async fn insert_block(conn: &mut SqliteConnection, block: NewBlock<'_>) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO blocks (document_id, page_id, page_number, block_number, text, x0, y0, x1, y1, activation_order)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
        "#,
    )
    .bind(block.document_id)
    .bind(block.page_id)
    .bind(block.page_number)
    .bind(block.block_number)
    .bind(block.text)
    .bind(block.bbox.x0)
    .bind(block.bbox.y0)
    .bind(block.bbox.x1)
    .bind(block.bbox.y1)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub struct NewWord<'a> {
    pub document_id: i64,
    pub block_id: i64,
    pub word_number: i64,
    pub text: &'a str,
    pub bbox: Rect,
    pub is_sentence_starter: bool,
}

pub async fn insert_word(conn: &mut SqliteConnection, word: NewWord<'_>) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO words (document_id, block_id, word_number, text, x0, y0, x1, y1, is_sentence_starter, sentence_number)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
        "#,
    )
    .bind(word.document_id)
    .bind(word.block_id)
    .bind(word.word_number)
    .bind(word.text)
    .bind(word.bbox.x0)
    .bind(word.bbox.y0)
    .bind(word.bbox.x1)
    .bind(word.bbox.y1)
    .bind(word.is_sentence_starter as i64)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// All blocks of a document in page, then block order.
pub async fn load_blocks(conn: &mut SqliteConnection, document_id: i64) -> Result<Vec<Block>> {
    let rows = sqlx::query(
        r#"
        SELECT id, page_number, block_number, text, x0, y0, x1, y1, activation_order
        FROM blocks
        WHERE document_id = ?
        ORDER BY page_number ASC, block_number ASC
        "#,
    )
    .bind(document_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Block {
            block_id: row.get("id"),
            page_number: row.get("page_number"),
            block_number: row.get("block_number"),
            text: row.get("text"),
            bbox: rect_from(row),
            activation_order: row.get("activation_order"),
        })
        .collect())
}

/// All words of a document in page, block, then word order.
pub async fn load_words(conn: &mut SqliteConnection, document_id: i64) -> Result<Vec<Word>> {
    let rows = sqlx::query(
        r#"
        SELECT w.id, w.block_id, b.page_number, w.word_number, w.text,
               w.x0, w.y0, w.x1, w.y1, w.is_sentence_starter, w.sentence_number
        FROM words w
        JOIN blocks b ON b.id = w.block_id
        WHERE w.document_id = ?
        ORDER BY b.page_number ASC, b.block_number ASC, w.word_number ASC
        "#,
    )
    .bind(document_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Word {
            word_id: row.get("id"),
            block_id: row.get("block_id"),
            page_number: row.get("page_number"),
            word_number: row.get("word_number"),
            text: row.get("text"),
            bbox: rect_from(row),
            is_sentence_starter: row.get::<i64, _>("is_sentence_starter") != 0,
            sentence_number: row.get("sentence_number"),
        })
        .collect())
}

pub async fn set_activation_order(
    conn: &mut SqliteConnection,
    block_id: i64,
    order: Option<i64>,
) -> Result<()> {
    sqlx::query("UPDATE blocks SET activation_order = ? WHERE id = ?")
        .bind(order)
        .bind(block_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_sentence_starter(
    conn: &mut SqliteConnection,
    word_id: i64,
    is_sentence_starter: bool,
) -> Result<()> {
    sqlx::query("UPDATE words SET is_sentence_starter = ? WHERE id = ?")
        .bind(is_sentence_starter as i64)
        .bind(word_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_sentence_number(
    conn: &mut SqliteConnection,
    word_id: i64,
    sentence_number: Option<i64>,
) -> Result<()> {
    sqlx::query("UPDATE words SET sentence_number = ? WHERE id = ?")
        .bind(sentence_number)
        .bind(word_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Group blocks per page. The result always has `page_count` entries.
pub fn build_snapshot(
    document: &DocumentSummary,
    blocks: Vec<Block>,
    words: Vec<Word>,
    labels: Vec<Label>,
) -> Snapshot {
    let page_count = document.page_count.max(0) as usize;
    let mut pages: Vec<Vec<Block>> = vec![Vec::new(); page_count];
    for block in blocks {
        let idx = (block.page_number - 1).max(0) as usize;
        if idx >= pages.len() {
            pages.resize_with(idx + 1, Vec::new);
        }
        pages[idx].push(block);
    }
    Snapshot {
        document_id: document.id,
        version: document.version,
        page_count: document.page_count,
        blocks: pages,
        words,
        labels,
    }
}

pub async fn read_snapshot(conn: &mut SqliteConnection, document_id: i64) -> Result<Snapshot> {
    let document = get_document(conn, document_id).await?;
    let blocks = load_blocks(conn, document_id).await?;
    let words = load_words(conn, document_id).await?;
    let labels = load_labels(conn, document_id).await?;
    Ok(build_snapshot(&document, blocks, words, labels))
}

// ============ Labels ============

pub async fn load_labels(conn: &mut SqliteConnection, document_id: i64) -> Result<Vec<Label>> {
    let rows = sqlx::query(
        r#"
        SELECT sentence_number, function, relevance, text, text_hash, stale
        FROM labels
        WHERE document_id = ?
        ORDER BY sentence_number ASC
        "#,
    )
    .bind(document_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Label {
            sentence_number: row.get("sentence_number"),
            function: row.get("function"),
            relevance: row.get("relevance"),
            text: row.get("text"),
            text_hash: row.get("text_hash"),
            stale: row.get::<i64, _>("stale") != 0,
        })
        .collect())
}

/// Replace every label of a document.
pub async fn replace_labels(
    conn: &mut SqliteConnection,
    document_id: i64,
    labels: &[Label],
) -> Result<()> {
    sqlx::query("DELETE FROM labels WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *conn)
        .await?;

    let now = chrono::Utc::now().timestamp();
    for label in labels {
        sqlx::query(
            r#"
            INSERT INTO labels (document_id, sentence_number, function, relevance, text, text_hash, stale, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(document_id)
        .bind(label.sentence_number)
        .bind(&label.function)
        .bind(label.relevance)
        .bind(&label.text)
        .bind(&label.text_hash)
        .bind(label.stale as i64)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn set_label_stale(
    conn: &mut SqliteConnection,
    document_id: i64,
    sentence_number: i64,
    stale: bool,
) -> Result<()> {
    sqlx::query("UPDATE labels SET stale = ? WHERE document_id = ? AND sentence_number = ?")
        .bind(stale as i64)
        .bind(document_id)
        .bind(sentence_number)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(page_count: i64) -> DocumentSummary {
        DocumentSummary {
            id: 7,
            filename: "x.pdf".to_string(),
            original_filename: "x.pdf".to_string(),
            page_count,
            version: 3,
            created_at: format_ts_iso(0),
        }
    }

    fn block(block_id: i64, page_number: i64) -> Block {
        Block {
            block_id,
            page_number,
            block_number: 1,
            text: String::new(),
            bbox: Rect::default(),
            activation_order: None,
        }
    }

    #[test]
    fn snapshot_keeps_blank_pages() {
        let snapshot = build_snapshot(
            &document(3),
            vec![block(1, 1), block(2, 3)],
            Vec::new(),
            Vec::new(),
        );
        assert_eq!(snapshot.blocks.len(), 3);
        assert_eq!(snapshot.blocks[0].len(), 1);
        assert!(snapshot.blocks[1].is_empty());
        assert_eq!(snapshot.blocks[2][0].block_id, 2);
        assert_eq!(snapshot.version, 3);
    }

    #[test]
    fn timestamps_are_iso8601() {
        assert_eq!(format_ts_iso(0), "1970-01-01T00:00:00Z");
    }
}
