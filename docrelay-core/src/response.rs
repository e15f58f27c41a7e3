//! Operation results and the outbound post-processor.

use bson::{Bson, Document, doc};
use serde::Serialize;
use serde_json::Value;

use crate::{backend::UpdateSummary, codec, error::StoreResult};

/// What a store operation produced, in native form.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OperationResult {
    /// Outcome of `createCollection`, `dropCollection` and `exists`.
    Bool(bool),
    /// A single document, or none when nothing matched.
    Document(Option<Document>),
    /// Documents returned by `find` or inserted by `create`.
    Documents(Vec<Document>),
    /// Result of `count`.
    Count(u64),
    /// Acknowledgement of `remove`.
    Removed {
        #[serde(rename = "deletedCount")]
        deleted_count: u64,
    },
    /// Summary of a multi-document `update`.
    Mutation(UpdateSummary),
}

impl OperationResult {
    /// The result as a single BSON value.
    pub fn to_bson(&self) -> Bson {
        match self {
            OperationResult::Bool(b) => Bson::Boolean(*b),
            OperationResult::Document(Some(doc)) => Bson::Document(doc.clone()),
            OperationResult::Document(None) => Bson::Null,
            OperationResult::Documents(docs) => {
                Bson::Array(docs.iter().cloned().map(Bson::Document).collect())
            }
            OperationResult::Count(n) => count(*n),
            OperationResult::Removed { deleted_count } => {
                Bson::Document(doc! { "deletedCount": count(*deleted_count) })
            }
            OperationResult::Mutation(summary) => Bson::Document(doc! {
                "matchedCount": count(summary.matched_count),
                "modifiedCount": count(summary.modified_count),
                "upsertedId": summary.upserted_id.clone().unwrap_or(Bson::Null),
            }),
        }
    }
}

/// Counts travel as the narrowest integer, matching how the codec decodes numbers.
fn count(n: u64) -> Bson {
    match (i32::try_from(n), i64::try_from(n)) {
        (Ok(small), _) => Bson::Int32(small),
        (_, Ok(large)) => Bson::Int64(large),
        _ => Bson::Int64(i64::MAX),
    }
}

/// The reply handed back to the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    /// The operation result, untouched.
    Raw(OperationResult),
    /// The operation result encoded for the wire.
    Wire(Value),
}

impl Reply {
    /// Renders the reply as JSON.
    ///
    /// Raw results go through the native serializers of their values, so extended
    /// types come out in BSON's own JSON shape rather than the wire encoding.
    pub fn into_json(self) -> StoreResult<Value> {
        match self {
            Reply::Raw(result) => Ok(serde_json::to_value(&result)?),
            Reply::Wire(value) => Ok(value),
        }
    }
}

/// Re-encodes results for the wire when configured to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponsePostProcessor {
    serialize_result: bool,
}

impl ResponsePostProcessor {
    pub fn new(serialize_result: bool) -> Self {
        Self { serialize_result }
    }

    pub fn serialize_result(&self) -> bool {
        self.serialize_result
    }

    /// # Errors
    ///
    /// Returns [`StoreError::MalformedPayload`](crate::error::StoreError::MalformedPayload)
    /// if the result holds a value the wire encoding has no tag for.
    pub fn process(&self, result: OperationResult) -> StoreResult<Reply> {
        if self.serialize_result {
            codec::encode(&result.to_bson()).map(Reply::Wire)
        } else {
            Ok(Reply::Raw(result))
        }
    }
}
