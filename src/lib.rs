//! # Block Annotator
//!
//! Server-authoritative sentence numbering for PDF annotation.
//!
//! A user activates text blocks of an imported PDF in a chosen order and
//! marks sentence-starter words. The server keeps the activation orders
//! contiguous and renumbers every sentence over the activation-ordered word
//! stream on each change, then hands the client a complete snapshot to
//! replace its cache with. Rhetorical labels from an external model attach
//! to sentence numbers and are flagged stale when numbering moves under them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────────┐   ┌──────────┐
//! │ Extract  │──▶│  Layout  │──▶│ Store (SQLite)    │◀──│ Service  │
//! │ PDF text │   │ blocks   │   │ blocks/words/lbl  │   │ lock+tx  │
//! └──────────┘   └──────────┘   └──────────────────┘   └────┬─────┘
//!                                                           │
//!                        ┌──────────────────┬───────────────┤
//!                        ▼                  ▼               ▼
//!                   ┌──────────┐      ┌──────────┐    ┌──────────┐
//!                   │   CLI    │      │   HTTP   │◀───│  Client  │
//!                   │ (annot)  │      │  (axum)  │    │  (sync)  │
//!                   └──────────┘      └──────────┘    └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and wire shapes |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | PDF text extraction |
//! | [`layout`] | Fragment → block/word grouping, starter seeding |
//! | [`segment`] | Sentence numbering |
//! | [`activation`] | Activation state machine |
//! | [`labels`] | Label normalization and staleness |
//! | [`labeling`] | Labeling provider abstraction |
//! | [`store`] | SQLite access |
//! | [`ingest`] | Document import |
//! | [`locks`] | Per-document write lock |
//! | [`service`] | Annotation operations |
//! | [`server`] | HTTP API |
//! | [`client`] | Sync client and transports |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod activation;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod labeling;
pub mod labels;
pub mod layout;
pub mod locks;
pub mod migrate;
pub mod models;
pub mod segment;
pub mod server;
pub mod service;
pub mod store;
