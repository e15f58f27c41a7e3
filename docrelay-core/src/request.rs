//! Inbound request model.
//!
//! A [`Request`] is what the transport hands to the router: a `(topic, cmd)` address
//! plus the still wire-encoded `query`, `data`, `id` and `options` fields. Nothing in
//! this module touches storage.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// Every command the store answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    DropCollection,
    CreateCollection,
    Create,
    Update,
    UpdateById,
    Remove,
    RemoveById,
    Replace,
    ReplaceById,
    FindById,
    Find,
    Count,
    Exists,
}

impl Command {
    pub const ALL: [Command; 13] = [
        Command::DropCollection,
        Command::CreateCollection,
        Command::Create,
        Command::Update,
        Command::UpdateById,
        Command::Remove,
        Command::RemoveById,
        Command::Replace,
        Command::ReplaceById,
        Command::FindById,
        Command::Find,
        Command::Count,
        Command::Exists,
    ];

    /// The name this command is addressed by on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::DropCollection => "dropCollection",
            Command::CreateCollection => "createCollection",
            Command::Create => "create",
            Command::Update => "update",
            Command::UpdateById => "updateById",
            Command::Remove => "remove",
            Command::RemoveById => "removeById",
            Command::Replace => "replace",
            Command::ReplaceById => "replaceById",
            Command::FindById => "findById",
            Command::Find => "find",
            Command::Count => "count",
            Command::Exists => "exists",
        }
    }

    fn requires_query(&self) -> bool {
        matches!(self, Command::Update | Command::Replace | Command::Remove)
    }

    fn requires_data(&self) -> bool {
        matches!(
            self,
            Command::Create
                | Command::Update
                | Command::UpdateById
                | Command::Replace
                | Command::ReplaceById
        )
    }

    fn requires_id(&self) -> bool {
        matches!(
            self,
            Command::UpdateById
                | Command::RemoveById
                | Command::ReplaceById
                | Command::FindById
        )
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A topic-addressed store command as received from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub topic: String,
    pub cmd: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

impl Request {
    /// Starts a request for `cmd` on `collection`, addressed to `topic`.
    pub fn new(topic: impl Into<String>, cmd: Command, collection: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            cmd,
            collection: Some(collection.into()),
            query: None,
            data: None,
            id: None,
            options: None,
        }
    }

    pub fn with_query(mut self, query: Value) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_id(mut self, id: Value) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }

    /// Checks that every field the command declares as required is present and has
    /// the expected JSON shape.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] naming the first offending field.
    pub fn validate(&self) -> StoreResult<()> {
        if self.collection.is_none() {
            return Err(missing(self.cmd, "collection"));
        }

        if self.cmd.requires_query() && self.query.is_none() {
            return Err(missing(self.cmd, "query"));
        }
        if let Some(query) = &self.query {
            if !query.is_object() {
                return Err(StoreError::validation(format!(
                    "{}: query must be an object",
                    self.cmd
                )));
            }
        }

        if self.cmd.requires_data() {
            match (&self.data, self.cmd) {
                (None, _) => return Err(missing(self.cmd, "data")),
                (Some(Value::Array(items)), Command::Create) => {
                    if items.is_empty() || !items.iter().all(Value::is_object) {
                        return Err(StoreError::validation(
                            "create: data must be an object or a non-empty array of objects",
                        ));
                    }
                }
                (Some(data), _) if !data.is_object() => {
                    return Err(StoreError::validation(format!(
                        "{}: data must be an object",
                        self.cmd
                    )));
                }
                _ => {}
            }
        }

        if self.cmd.requires_id() && matches!(self.id, None | Some(Value::Null)) {
            return Err(missing(self.cmd, "id"));
        }

        if let Some(options) = &self.options {
            if !options.is_object() {
                return Err(StoreError::validation(format!(
                    "{}: options must be an object",
                    self.cmd
                )));
            }
        }

        Ok(())
    }

    /// Parses the request options into the command's option type, falling back to
    /// the type's default when no options were sent.
    pub fn options_as<T: DeserializeOwned + Default>(&self) -> StoreResult<T> {
        match &self.options {
            None | Some(Value::Null) => Ok(T::default()),
            Some(options) => serde_json::from_value(options.clone()).map_err(|e| {
                StoreError::validation(format!("{}: invalid options: {e}", self.cmd))
            }),
        }
    }
}

fn missing(cmd: Command, field: &str) -> StoreError {
    StoreError::validation(format!("{cmd}: missing required field `{field}`"))
}

/// Options for `createCollection`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCollectionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capped: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<Value>,
}

/// Sort order for one field of `orderBy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortOrder {
    Numeric(i32),
    Named(SortName),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortName {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn is_descending(&self) -> bool {
        matches!(self, SortOrder::Numeric(n) if *n < 0)
            || matches!(self, SortOrder::Named(SortName::Desc))
    }
}

/// Ordered `{field: order}` pairs, kept in the order the caller sent them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderBy(pub serde_json::Map<String, Value>);

impl OrderBy {
    /// Resolves each entry to `(field, descending)`.
    pub fn entries(&self) -> StoreResult<Vec<(String, bool)>> {
        self.0
            .iter()
            .map(|(field, order)| {
                serde_json::from_value::<SortOrder>(order.clone())
                    .map(|order| (field.clone(), order.is_descending()))
                    .map_err(|_| {
                        StoreError::validation(format!("invalid sort order for `{field}`: {order}"))
                    })
            })
            .collect()
    }
}

/// Projection as either `{field: 0|1}` or a list of included field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Fields {
    Names(Vec<String>),
    Spec(serde_json::Map<String, Value>),
}

/// Options for `find`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, alias = "skip", skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, alias = "sort", skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
    #[serde(default, alias = "projection", skip_serializing_if = "Option::is_none")]
    pub fields: Option<Fields>,
}

/// Options for `count`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, alias = "skip", skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

/// Options for `update` and `updateById`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upsert: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi: Option<bool>,
}

/// Options for `replace` and `replaceById`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upsert: Option<bool>,
}
