//! Quarry - hybrid lexical and vector search
//!
//! A document store, an in-memory BM25 and cosine index, and a query pipeline
//! that fuses both retrieval paths into one deterministic ranking with an
//! explicit quality prior. Served over a Unix socket or embedded directly
//! through [`engine::SearchEngine`].

pub mod api;
pub mod cli;
pub mod config;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod retrieval;
pub mod runtime;
pub mod server;
pub mod storage;

pub use engine::SearchEngine;
pub use error::{ErrorKind, QuarryError, Result};
