//! MongoDB backend for docrelay.
//!
//! [`MongoDbStore`] implements `StoreBackend` by forwarding filters, updates and
//! projections to the server unchanged, so the full MongoDB query language is available
//! to callers. Driver failures are split into connection errors, when the server could
//! not be reached, and storage errors, when it answered with a failure.
//!
//! Enable it in the facade crate with the `mongodb` feature:
//!
//! ```toml
//! [dependencies]
//! docrelay = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use docrelay_core::{backend::StoreBackendBuilder, config::MongoConfig};
//! use docrelay_mongodb::MongoDbStore;
//!
//! let store = MongoDbStore::builder(MongoConfig::default()).build().await?;
//! ```

mod error;

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
