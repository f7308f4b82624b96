//! Polyglot Relay - Concurrent Catalog Translation
//!
//! Dispatches the entries of a translation catalog to a remote translation
//! service through a bounded worker pool, with admission control, retry and
//! backoff, a resumable checkpoint and ordered output reassembly.

pub mod admission;
pub mod aggregate;
pub mod catalog;
pub mod checkpoint;
pub mod cli;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod pool;
pub mod retry;
pub mod unit;

pub use aggregate::{OutputCatalog, RunReport, RunSummary};
pub use checkpoint::{CheckpointStore, JsonlCheckpointStore, MemoryCheckpointStore};
pub use client::{TranslationClient, TranslationRequest};
pub use engine::Engine;
pub use error::{RelayError, Result, TranslateError};
pub use unit::{TranslationResult, TranslationUnit, UnitStatus};
