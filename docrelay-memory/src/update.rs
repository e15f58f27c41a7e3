//! Update operators, replacements and projections for in-memory documents.
//!
//! Supported update operators: `$set`, `$unset`, `$inc`, `$push` (with `$each`) and
//! `$rename`. Paths may be dotted; missing intermediate documents are created.

use bson::{Bson, Document, doc};

use docrelay_core::{
    document::{ID_FIELD, with_id},
    error::{StoreError, StoreResult},
};

use crate::evaluator::lookup;

fn engine_error(message: impl Into<String>) -> StoreError {
    StoreError::Storage(message.into())
}

/// Applies `update` to `document`, returning whether anything changed.
///
/// The document is left untouched when the update fails.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> StoreResult<bool> {
    if update.is_empty() {
        return Err(engine_error("update document must not be empty"));
    }

    let mut updated = document.clone();

    for (operator, operand) in update {
        let Bson::Document(fields) = operand else {
            return Err(if operator.starts_with('$') {
                engine_error(format!("modifiers for {operator} must be an object"))
            } else {
                engine_error("update document requires atomic operators")
            });
        };

        for (path, value) in fields {
            match operator.as_str() {
                "$set" => set_path(&mut updated, path, value.clone())?,
                "$unset" => {
                    remove_path(&mut updated, path);
                }
                "$inc" => {
                    let current = lookup(&updated, path).cloned();
                    set_path(&mut updated, path, increment(path, current, value)?)?;
                }
                "$push" => {
                    let current = lookup(&updated, path).cloned();
                    set_path(&mut updated, path, push(path, current, value)?)?;
                }
                "$rename" => {
                    let Bson::String(target) = value else {
                        return Err(engine_error(format!("$rename target for `{path}` must be a string")));
                    };
                    if let Some(moved) = remove_path(&mut updated, path) {
                        set_path(&mut updated, target, moved)?;
                    }
                }
                other if other.starts_with('$') => {
                    return Err(engine_error(format!("unknown update operator: {other}")));
                }
                _ => return Err(engine_error("update document requires atomic operators")),
            }
        }
    }

    if updated.get(ID_FIELD) != document.get(ID_FIELD) {
        return Err(engine_error(
            "performing an update on the path '_id' would modify the immutable field '_id'",
        ));
    }

    let modified = updated != *document;
    *document = updated;
    Ok(modified)
}

fn increment(path: &str, current: Option<Bson>, by: &Bson) -> StoreResult<Bson> {
    let sum = match (current.unwrap_or(Bson::Int32(0)), by) {
        (Bson::Int32(a), Bson::Int32(b)) => a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or_else(|| Bson::Int64(i64::from(a) + i64::from(*b))),
        (Bson::Int32(a), Bson::Int64(b)) => checked_long(path, i64::from(a), *b)?,
        (Bson::Int64(a), Bson::Int32(b)) => checked_long(path, a, i64::from(*b))?,
        (Bson::Int64(a), Bson::Int64(b)) => checked_long(path, a, *b)?,
        (Bson::Double(a), b) => Bson::Double(a + as_f64(path, b)?),
        (a, Bson::Double(b)) => Bson::Double(as_f64(path, &a)? + b),
        (current, _) => {
            return Err(engine_error(format!(
                "cannot apply $inc to `{path}` holding {:?} with {by}",
                current.element_type()
            )));
        }
    };

    Ok(sum)
}

fn checked_long(path: &str, a: i64, b: i64) -> StoreResult<Bson> {
    a.checked_add(b).map(Bson::Int64).ok_or_else(|| {
        engine_error(format!("$inc on `{path}` overflows a 64-bit integer: {a} + {b}"))
    })
}

fn as_f64(path: &str, value: &Bson) -> StoreResult<f64> {
    match value {
        Bson::Int32(n) => Ok(f64::from(*n)),
        Bson::Int64(n) => Ok(*n as f64),
        Bson::Double(n) => Ok(*n),
        other => Err(engine_error(format!(
            "cannot apply $inc to `{path}` with non-numeric {other}"
        ))),
    }
}

fn push(path: &str, current: Option<Bson>, value: &Bson) -> StoreResult<Bson> {
    let mut items = match current {
        None => vec![],
        Some(Bson::Array(items)) => items,
        Some(other) => {
            return Err(engine_error(format!(
                "cannot apply $push to `{path}` holding {:?}",
                other.element_type()
            )));
        }
    };

    match value {
        Bson::Document(modifiers) if modifiers.contains_key("$each") => {
            match modifiers.get("$each") {
                Some(Bson::Array(each)) => items.extend(each.iter().cloned()),
                _ => return Err(engine_error("$each must be an array")),
            }
        }
        _ => items.push(value.clone()),
    }

    Ok(Bson::Array(items))
}

/// Sets `path`, creating intermediate documents as needed.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) -> StoreResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = document
                .entry(head.to_string())
                .or_insert_with(|| Bson::Document(Document::new()));

            match child {
                Bson::Document(inner) => set_path(inner, rest, value),
                Bson::Array(items) => {
                    let (index, rest) = rest.split_once('.').map_or((rest, None), |(i, r)| (i, Some(r)));
                    let slot = index
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| items.get_mut(i))
                        .ok_or_else(|| engine_error(format!("cannot create field in array at `{path}`")))?;
                    match (rest, slot) {
                        (None, slot) => {
                            *slot = value;
                            Ok(())
                        }
                        (Some(rest), Bson::Document(inner)) => set_path(inner, rest, value),
                        (Some(_), _) => Err(engine_error(format!("cannot create field at `{path}`"))),
                    }
                }
                _ => Err(engine_error(format!(
                    "cannot create field `{rest}` in non-document `{head}`"
                ))),
            }
        }
    }
}

/// Removes `path`, returning the removed value.
pub(crate) fn remove_path(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, rest)) => match document.get_mut(head)? {
            Bson::Document(inner) => remove_path(inner, rest),
            _ => None,
        },
    }
}

/// Builds the document an upsert starts from: the equality conditions of the filter.
pub(crate) fn seed_from_filter(filter: &Document) -> StoreResult<Document> {
    let mut seed = Document::new();

    for (key, value) in filter {
        if key.starts_with('$') {
            continue;
        }
        match value {
            Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => {
                if let Some(eq) = ops.get("$eq") {
                    set_path(&mut seed, key, eq.clone())?;
                }
            }
            Bson::RegularExpression(_) => {}
            _ => set_path(&mut seed, key, value.clone())?,
        }
    }

    Ok(seed)
}

/// Builds the document inserted by an update with upsert.
pub(crate) fn upsert_document(filter: &Document, update: &Document) -> StoreResult<Document> {
    let mut document = seed_from_filter(filter)?;
    let seeded_id = document.get(ID_FIELD).cloned();

    apply_update(&mut document, update)?;
    if document.get(ID_FIELD) != seeded_id.as_ref() {
        return Err(engine_error("upsert must not change the seeded '_id'"));
    }

    Ok(with_id(document))
}

/// Checks a replacement and gives it the identifier of the document it replaces.
pub(crate) fn replacement_for(
    existing_id: Option<&Bson>,
    replacement: &Document,
) -> StoreResult<Document> {
    if replacement.keys().any(|key| key.starts_with('$')) {
        return Err(engine_error("replacement document must not contain update operators"));
    }

    match (existing_id, replacement.get(ID_FIELD)) {
        (Some(existing), Some(given)) if existing != given => Err(engine_error(
            "the '_id' field cannot be changed by a replacement",
        )),
        (Some(existing), None) => {
            let mut document = doc! { ID_FIELD: existing.clone() };
            document.extend(replacement.clone());
            Ok(document)
        }
        _ => Ok(with_id(replacement.clone())),
    }
}

/// Applies an inclusion or exclusion projection. `_id` is kept unless excluded.
pub(crate) fn project(document: &Document, projection: &Document) -> StoreResult<Document> {
    let truthy = |value: &Bson| match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        _ => true,
    };

    let keep_id = projection.get(ID_FIELD).is_none_or(truthy);
    let fields: Vec<(&str, bool)> = projection
        .iter()
        .filter(|(key, _)| key.as_str() != ID_FIELD)
        .map(|(key, value)| (key.as_str(), truthy(value)))
        .collect();

    let including = fields.iter().any(|(_, include)| *include);
    if including && fields.iter().any(|(_, include)| !include) {
        return Err(engine_error("cannot mix inclusion and exclusion in a projection"));
    }

    let mut projected = if including {
        let mut projected = Document::new();
        for (path, _) in &fields {
            if let Some(value) = lookup(document, path) {
                set_path(&mut projected, path, value.clone())?;
            }
        }
        projected
    } else {
        let mut projected = document.clone();
        for (path, _) in &fields {
            remove_path(&mut projected, path);
        }
        projected
    };

    match (keep_id, document.get(ID_FIELD)) {
        (true, Some(id)) if !projected.contains_key(ID_FIELD) => {
            let mut with_id = doc! { ID_FIELD: id.clone() };
            with_id.extend(projected);
            projected = with_id;
        }
        (false, _) => {
            projected.remove(ID_FIELD);
        }
        _ => {}
    }

    Ok(projected)
}
