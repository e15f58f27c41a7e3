//! Main docrelay crate: a topic-addressed CRUD command facade over document databases.
//!
//! This crate is the entry point of the docrelay workspace. It re-exports the core
//! types, picks a storage backend from configuration and runs the service lifecycle a
//! transport plugs into.
//!
//! # Features
//!
//! - **Fixed command surface** - Thirteen CRUD commands addressed by `(topic, cmd)`
//! - **Lossless wire format** - Object ids, dates and binary survive the JSON transport
//! - **Multiple backends** - In-memory storage, and MongoDB behind the `mongodb` feature
//! - **Configuration** - TOML files with `DOCRELAY_*` environment overrides
//!
//! # Quick Start
//!
//! ```ignore
//! use docrelay::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> StoreResult<()> {
//!     let config = StoreConfig::load(None)?;
//!     docrelay::telemetry::init(&config.logging)?;
//!
//!     let service = StoreService::start(config).await?;
//!
//!     let reply = service
//!         .handle_json(json!({
//!             "topic": "mongo-store",
//!             "cmd": "create",
//!             "collection": "users",
//!             "data": { "name": "Ann" },
//!         }))
//!         .await;
//!     println!("{reply}");
//!
//!     service.close().await
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-process storage for development and testing
//! - `mongodb` - MongoDB backend (requires the `mongodb` feature)

pub mod prelude;
pub mod service;
pub mod telemetry;

pub use docrelay_core::{
    backend, codec, collection, config, document, error, ops, query, request, resolver,
    response, router, store,
};
pub use service::StoreService;

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docrelay_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docrelay_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
