//! Core of the docrelay project: a topic-addressed CRUD command layer over JSON
//! document databases.
//!
//! This crate provides:
//!
//! - **Wire codec** ([`codec`]) - Lossless JSON encoding of object ids, dates, binary and other extended types
//! - **Request model** ([`request`]) - Commands, request envelopes and their options
//! - **Collection resolution** ([`resolver`]) - Collection name validation and handle binding
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing different storage backends
//! - **Store operations** ([`ops`]) - One function per command, each a single backend call
//! - **Results** ([`response`]) - Operation results and the outbound post-processor
//! - **Command router** ([`router`]) - Dispatch of `(topic, cmd)` requests
//! - **Configuration** ([`config`]) - TOML configuration with environment overrides
//! - **Error handling** ([`error`]) - Error taxonomy and result types
//!
//! # Example
//!
//! ```ignore
//! use docrelay_core::{config::StoreConfig, request::{Command, Request}, router::Router};
//! use serde_json::json;
//!
//! let router = Router::from_config(&StoreConfig::default(), store);
//!
//! let reply = router
//!     .dispatch(
//!         Request::new("mongo-store", Command::FindById, "users")
//!             .with_id(json!({ "$oid": "5f1d7c0e8e4b2a0012345678" })),
//!     )
//!     .await?;
//! ```

pub mod backend;
pub mod codec;
pub mod collection;
pub mod config;
pub mod document;
pub mod error;
pub mod ops;
pub mod query;
pub mod request;
pub mod resolver;
pub mod response;
pub mod router;
pub mod store;
