//! Convenient re-exports of commonly used types from docrelay.
//!
//! ```ignore
//! use docrelay::prelude::*;
//! ```

pub use docrelay_core::{
    backend::{CollectionOptions, DynStoreBackend, StoreBackend, StoreBackendBuilder, UpdateSummary},
    config::{BackendKind, StoreConfig},
    error::{ErrorKind, ErrorPayload, StoreError, StoreResult},
    query::{Query, QueryBuilder, Sort, SortDirection},
    request::{Command, Request},
    resolver::CollectionName,
    response::{OperationResult, Reply},
    router::{Pattern, Router, Topic},
    store::{DocumentStore, DynDocumentStore},
};

pub use crate::service::StoreService;
