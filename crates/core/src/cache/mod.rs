//! SQLite-backed persistent store for cached entities and collections.
//!
//! This module provides a key → JSON blob store using SQLite
//! with async access via tokio-rusqlite. It supports:
//!
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - Prefix listing and purging
//! - An in-memory twin behind the same `PersistentStore` trait

pub mod connection;
pub mod entries;
pub mod migrations;
pub mod store;

pub use crate::Error;

pub use connection::CacheDb;
pub use store::{MemoryStore, PersistentStore};
