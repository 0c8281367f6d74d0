//! Core types and shared functionality for harvester.
//!
//! This crate provides:
//! - Persistent key → JSON store with SQLite and in-memory backends
//! - Cache-aside entity service with stale fallback and single-flight fetches
//! - Unified error types
//! - Configuration structures
//! - Cooperative cancellation

pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod model;
pub mod service;

pub use cache::{CacheDb, MemoryStore, PersistentStore};
pub use cancel::CancelToken;
pub use config::{AppConfig, ConfigError, PayloadFormat};
pub use error::Error;
pub use model::{Entity, Record};
pub use service::{CacheEntry, CollectionSource, EntityService, EntitySource, RefreshSummary, Served, ServiceOptions};
