//! # rag-agent
//!
//! Retrieval-augmented question answering over a directory of PDF documents,
//! with per-user chat sessions.
//!
//! PDFs are extracted, split into overlapping sentence-aware chunks, embedded
//! and stored in a vector collection. A query retrieves the nearest chunks,
//! filters them by a relevance threshold, formats them into a cited context
//! block and asks a language model to answer from that context only.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │  PDFs    │──▶│ Extract +    │──▶│ VectorStore  │
//! │  (dir)   │   │ Chunk        │   │ SQLite/memory│
//! └──────────┘   └──────────────┘   └──────┬───────┘
//!                                          │
//!             ┌──────────────┐      ┌──────▼───────┐      ┌─────────┐
//!             │ SessionStore │◀────▶│    Agent     │─────▶│   LLM   │
//!             └──────────────┘      └──────┬───────┘      └─────────┘
//!                                          │
//!                             ┌────────────┴────────────┐
//!                             ▼                         ▼
//!                       ┌──────────┐              ┌──────────┐
//!                       │   CLI    │              │   HTTP   │
//!                       │ (ragent) │              │  (axum)  │
//!                       └──────────┘              └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragent index                         # index ./data/pdfs if the index is empty
//! ragent ask "What is the refund policy?"
//! ragent chat                          # interactive session
//! ragent serve                         # HTTP API on 127.0.0.1:5000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | PDF text extraction |
//! | [`chunk`] | Text chunking |
//! | [`ingest`] | Directory ingestion pipeline |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector collections |
//! | [`retriever`] | Relevance filtering and context assembly |
//! | [`session`] | Chat sessions with sliding expiry |
//! | [`llm`] | Completion providers |
//! | [`agent`] | Query orchestration |
//! | [`service`] | Process-wide service object |
//! | [`server`] | HTTP API |
//! | [`logging`] | Diagnostic output setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema setup |

pub mod agent;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod retriever;
pub mod server;
pub mod service;
pub mod session;
pub mod store;
