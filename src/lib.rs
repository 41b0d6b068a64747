//! # Folio
//!
//! Retrieval-augmented question answering over a folder of PDFs.
//!
//! Folio extracts the text of every PDF in a directory page by page, splits
//! it into overlapping chunks that remember their file and page, embeds the
//! chunks into a persisted vector index, and answers questions by retrieving
//! the closest chunks and asking a chat model to answer from them, citing
//! the pages it used.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐
//! │   Loader   │──▶│ Chunker  │──▶│ Embedder │──▶│ VectorIndex  │
//! │ data/*.pdf │   │ per page │   │ batches  │   │ faiss_index/ │
//! └────────────┘   └──────────┘   └──────────┘   └──────┬───────┘
//!                                                       │ IndexCache
//!                                                       ▼
//!           ┌──────────────┐   ┌────────────┐   ┌──────────────┐
//!           │ ChatSession  │◀──│   Answer   │◀──│  Retriever   │
//!           │  transcript  │   │ + sources  │   │    top-k     │
//!           └──────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_API_KEY=...
//! folio index                                  # build data/ into faiss_index/
//! folio ask "What certifications does he have?"
//! folio chat                                   # interactive session
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`extract`] | Per-page PDF text extraction |
//! | [`loader`] | Document folder scan and corpus fingerprint |
//! | [`chunk`] | Recursive character chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat-completion providers and streaming |
//! | [`index`] | Vector index and its on-disk format |
//! | [`cache`] | Memory/disk/rebuild index resolution |
//! | [`retriever`] | Top-k retrieval |
//! | [`answer`] | Grounded answers and citations |
//! | [`credential`] | API key resolution |
//! | [`session`] | Chat session and transcript |
//! | [`index_cmd`] | `index`, `refresh` and `status` commands |

pub mod answer;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod credential;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod index_cmd;
pub mod llm;
pub mod loader;
pub mod models;
pub mod retriever;
pub mod session;
