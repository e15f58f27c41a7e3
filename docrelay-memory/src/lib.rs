//! In-memory storage backend for docrelay.
//!
//! [`InMemoryStore`] implements `StoreBackend` over plain BSON documents kept behind an
//! async-aware read-write lock. It evaluates the same filter, update and projection
//! documents the MongoDB backend forwards to the server, which makes it the backend of
//! choice for tests and local development.
//!
//! # Quick Start
//!
//! ```ignore
//! use docrelay_core::{backend::StoreBackendBuilder, store::DocumentStore};
//! use docrelay_memory::InMemoryStore;
//!
//! let backend = InMemoryStore::builder().build().await?;
//! let store = DocumentStore::new(backend).into_dyn();
//! ```

mod evaluator;
mod update;

pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
