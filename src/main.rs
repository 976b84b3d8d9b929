//! # Block Annotator CLI (`annot`)
//!
//! Drives the annotation service from the terminal and runs its HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! annot --config ./config/annotate.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `annot init [--reset]` | Create (or recreate) the SQLite schema |
//! | `annot import <file>` | Import a PDF, or a JSON page layout with `--layout` |
//! | `annot documents` | List documents |
//! | `annot blocks <id>` | Show blocks with activation orders |
//! | `annot sentences <id>` | Show sentences and their labels |
//! | `annot activate <id> --page P --block B [--off]` | Activate or deactivate a block |
//! | `annot toggle <id> --page P --block B --word W` | Flip a sentence starter |
//! | `annot renumber <id>` | Recompute sentence numbers |
//! | `annot label <id>` | Label all sentences with the configured provider |
//! | `annot delete <id>` | Delete a document |
//! | `annot serve` | Start the HTTP API |
//!
//! Log output goes to stderr and is filtered by `RUST_LOG`
//! (default `block_annotator=info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use block_annotator::config::{self, Config};
use block_annotator::migrate;
use block_annotator::models::{BlockRef, PageLayout, Snapshot};
use block_annotator::server;
use block_annotator::service::AnnotationService;

#[derive(Parser)]
#[command(
    name = "annot",
    about = "Block Annotator: ordered block activation and sentence numbering for PDFs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/annotate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent unless `--reset` is given.
    Init {
        /// Drop all tables (and every document) before recreating them.
        #[arg(long)]
        reset: bool,
    },

    /// Import a document.
    Import {
        file: PathBuf,

        /// Treat `file` as a JSON array of page layouts instead of a PDF.
        #[arg(long)]
        layout: bool,
    },

    /// List documents.
    Documents,

    /// Show a document's blocks, page by page.
    Blocks { document_id: i64 },

    /// Show a document's sentences and labels.
    Sentences { document_id: i64 },

    /// Activate a block (or deactivate it with `--off`).
    Activate {
        document_id: i64,
        #[arg(long)]
        page: i64,
        #[arg(long)]
        block: i64,
        #[arg(long)]
        off: bool,
    },

    /// Flip the sentence-starter flag of one word.
    Toggle {
        document_id: i64,
        #[arg(long)]
        page: i64,
        #[arg(long)]
        block: i64,
        #[arg(long)]
        word: i64,
    },

    /// Recompute sentence numbers.
    Renumber { document_id: i64 },

    /// Label all sentences with the configured provider.
    Label { document_id: i64 },

    /// Delete a document and everything attached to it.
    Delete { document_id: i64 },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "block_annotator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init { reset } => {
            if reset {
                migrate::reset_database(&cfg).await?;
                println!("Database reset successfully.");
            } else {
                migrate::run_migrations(&cfg).await?;
                println!("Database initialized successfully.");
            }
        }
        command => run_command(cfg, command).await?,
    }

    Ok(())
}

async fn run_command(cfg: Config, command: Commands) -> anyhow::Result<()> {
    let service = AnnotationService::open(cfg).await?;

    match command {
        Commands::Init { .. } => {}
        Commands::Import { file, layout } => {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "document.pdf".to_string());
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let summary = if layout {
                let pages: Vec<PageLayout> = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Invalid page layout JSON in {}", file.display()))?;
                service.import_layout(&name, &pages).await?
            } else {
                service.import_pdf(&name, bytes).await?
            };
            println!(
                "Imported document {} ({} pages) as {}",
                summary.id, summary.page_count, summary.filename
            );
        }
        Commands::Documents => {
            let documents = service.list_documents().await?;
            if documents.is_empty() {
                println!("No documents.");
            }
            for doc in documents {
                println!(
                    "{:>4}  {:<40} pages={} version={} created={}",
                    doc.id, doc.original_filename, doc.page_count, doc.version, doc.created_at
                );
            }
        }
        Commands::Blocks { document_id } => {
            print_snapshot(&service.get_blocks(document_id).await?);
        }
        Commands::Sentences { document_id } => {
            let response = service.get_sentences(document_id).await?;
            if response.sentences.is_empty() {
                println!("No sentences. Activate blocks and mark sentence starters first.");
            }
            for view in response.sentences {
                let s = &view.sentence;
                println!(
                    "[{}] (page {}, block {}) {}",
                    s.sentence_number, s.page_number, s.block_number, s.text
                );
                if let Some(label) = view.label {
                    let stale = if label.stale { " (stale)" } else { "" };
                    println!("     {} [{}]{}", label.function, label.relevance, stale);
                }
            }
        }
        Commands::Activate {
            document_id,
            page,
            block,
            off,
        } => {
            let outcome = service
                .activate_block(document_id, &BlockRef::position(page, block), !off)
                .await?;
            match outcome.activation_order {
                Some(order) => println!("Block {} on page {} is active at order {}", block, page, order),
                None => println!("Block {} on page {} is inactive", block, page),
            }
            print_snapshot(&outcome.snapshot);
        }
        Commands::Toggle {
            document_id,
            page,
            block,
            word,
        } => {
            let snapshot = service
                .toggle_sentence_starter(document_id, &BlockRef::position(page, block), word)
                .await?;
            print_snapshot(&snapshot);
        }
        Commands::Renumber { document_id } => {
            print_snapshot(&service.renumber(document_id).await?);
        }
        Commands::Label { document_id } => {
            let response = service.process_labels(document_id).await?;
            for label in response.labels {
                println!(
                    "[{}] {} ({})",
                    label.sentence_number, label.function, label.relevance
                );
            }
        }
        Commands::Delete { document_id } => {
            service.delete_document(document_id).await?;
            println!("Deleted document {}", document_id);
        }
        Commands::Serve => {
            server::run_server(Arc::new(service)).await?;
        }
    }

    Ok(())
}

fn print_snapshot(snapshot: &Snapshot) {
    println!(
        "document {} version {} ({} pages)",
        snapshot.document_id, snapshot.version, snapshot.page_count
    );
    for (idx, page) in snapshot.blocks.iter().enumerate() {
        println!("--- page {} ({} blocks) ---", idx + 1, page.len());
        for block in page {
            let order = block
                .activation_order
                .map(|o| format!("#{}", o))
                .unwrap_or_else(|| "-".to_string());
            let numbers: Vec<String> = snapshot
                .words
                .iter()
                .filter(|w| w.block_id == block.block_id)
                .map(|w| {
                    let marker = if w.is_sentence_starter { "*" } else { "" };
                    match w.sentence_number {
                        Some(n) => format!("{}{}:{}", marker, w.text, n),
                        None => format!("{}{}", marker, w.text),
                    }
                })
                .collect();
            println!("  [{}] {:>4}  {}", block.block_number, order, numbers.join(" "));
        }
    }
}
