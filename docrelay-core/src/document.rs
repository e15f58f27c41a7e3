//! Document identifier handling.
//!
//! Every stored document carries its key in the `_id` field. By-id commands receive
//! that key through the request's `id` field, and `create` assigns a fresh
//! [`ObjectId`] to documents that arrive without one.

use bson::{Bson, Document, doc, oid::ObjectId};
use serde_json::Value;

use crate::{
    codec,
    error::{StoreError, StoreResult},
};

/// Name of the identifier field.
pub const ID_FIELD: &str = "_id";

/// Decodes a wire `id` into a document identifier.
///
/// Accepted shapes:
///
/// - an `{"$oid": ..}` tag, yielding an [`ObjectId`]
/// - a non-empty string, kept as is; [`id_filter`] also matches the [`ObjectId`] a
///   24-character hex string spells
/// - an integer, used as a caller-assigned key
///
/// # Errors
///
/// Returns [`StoreError::MalformedPayload`] for every other shape.
pub fn decode_id(value: &Value) -> StoreResult<Bson> {
    match value {
        Value::String(s) if s.is_empty() => {
            Err(StoreError::malformed("id must not be an empty string"))
        }
        Value::String(s) => Ok(Bson::String(s.clone())),
        Value::Number(_) | Value::Object(_) => match codec::decode(value)? {
            id @ (Bson::ObjectId(_) | Bson::Int32(_) | Bson::Int64(_)) => Ok(id),
            other => Err(StoreError::malformed(format!(
                "id must be an object id, a string or an integer, found {:?}",
                other.element_type()
            ))),
        },
        other => Err(StoreError::malformed(format!(
            "id must be an object id, a string or an integer, found {other}"
        ))),
    }
}

/// The [`ObjectId`] a bare hex string spells, if any.
fn as_object_id(id: &Bson) -> Option<ObjectId> {
    match id {
        Bson::String(s) => ObjectId::parse_str(s).ok(),
        _ => None,
    }
}

/// Builds the filter by-id lookups use.
///
/// A 24-character hex string matches both the [`ObjectId`] it spells and the literal
/// string, so caller-assigned hex keys stay reachable.
pub fn id_filter(id: Bson) -> Document {
    match as_object_id(&id) {
        Some(oid) => doc! { ID_FIELD: { "$in": [oid, id] } },
        None => doc! { ID_FIELD: id },
    }
}

/// Builds the `{_id: id}` equality filter used by upserting by-id commands, so that an
/// inserted document takes `id` as its key. Hex strings are read as [`ObjectId`]s.
pub fn upsert_id_filter(id: Bson) -> Document {
    match as_object_id(&id) {
        Some(oid) => doc! { ID_FIELD: oid },
        None => doc! { ID_FIELD: id },
    }
}

/// Ensures `document` has an `_id`, generating an [`ObjectId`] when absent.
///
/// The identifier is moved to the front, the position storage engines put it in.
pub fn with_id(document: Document) -> Document {
    if document.contains_key(ID_FIELD) {
        return document;
    }

    let mut identified = doc! { ID_FIELD: ObjectId::new() };
    identified.extend(document);
    identified
}

/// Returns the identifier of a stored document.
pub fn id_of(document: &Document) -> Option<&Bson> {
    document.get(ID_FIELD)
}
