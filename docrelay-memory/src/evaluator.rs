//! Filter evaluation over in-memory documents.
//!
//! Values compare the way a document database orders them: first by type class,
//! with all numeric types in one class, then by value within the class. Range
//! operators only match values of the same class as their operand. A field holding
//! an array matches when the array itself or any of its elements matches.

use std::cmp::Ordering;

use bson::{Bson, DateTime, Document, Regex, Timestamp, oid::ObjectId};
use regex::RegexBuilder;

use docrelay_core::{
    error::{StoreError, StoreResult},
    query::{Expr, FieldOp, QueryVisitor},
};

#[derive(Debug, Clone, Copy)]
pub(crate) enum Comparable<'a> {
    MinKey,
    Null,
    Number(f64),
    String(&'a str),
    Document(&'a Document),
    Array(&'a [Bson]),
    Binary(&'a [u8]),
    ObjectId(ObjectId),
    Bool(bool),
    DateTime(DateTime),
    Timestamp(Timestamp),
    Regex(&'a Regex),
    MaxKey,
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::MinKey => Comparable::MinKey,
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Int32(value) => Comparable::Number(f64::from(*value)),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::Decimal128(value) => match value.to_string().parse() {
                Ok(number) => Comparable::Number(number),
                Err(_) => Comparable::Other(bson),
            },
            Bson::String(value) | Bson::Symbol(value) => Comparable::String(value),
            Bson::Document(doc) => Comparable::Document(doc),
            Bson::Array(items) => Comparable::Array(items),
            Bson::Binary(binary) => Comparable::Binary(&binary.bytes),
            Bson::ObjectId(oid) => Comparable::ObjectId(*oid),
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::Timestamp(value) => Comparable::Timestamp(*value),
            Bson::RegularExpression(regex) => Comparable::Regex(regex),
            Bson::MaxKey => Comparable::MaxKey,
            other => Comparable::Other(other),
        }
    }
}

impl Comparable<'_> {
    /// Position of the value's type class in the sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::MinKey => 0,
            Comparable::Null => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Document(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::Binary(_) => 6,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
            Comparable::Timestamp(_) => 10,
            Comparable::Regex(_) => 11,
            Comparable::Other(_) => 12,
            Comparable::MaxKey => 13,
        }
    }

    fn same_class(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Comparable<'_> {}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Comparable<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // NaN sorts below every other number.
            (Comparable::Number(a), Comparable::Number(b)) => a
                .partial_cmp(b)
                .unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()).reverse()),
            (Comparable::String(a), Comparable::String(b)) => a.cmp(b),
            (Comparable::Document(a), Comparable::Document(b)) => compare_documents(a, b),
            (Comparable::Array(a), Comparable::Array(b)) => compare_arrays(a, b),
            (Comparable::Binary(a), Comparable::Binary(b)) => {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().cmp(&b.bytes()),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => {
                a.timestamp_millis().cmp(&b.timestamp_millis())
            }
            (Comparable::Timestamp(a), Comparable::Timestamp(b)) => {
                (a.time, a.increment).cmp(&(b.time, b.increment))
            }
            (Comparable::Regex(a), Comparable::Regex(b)) => (a.pattern.as_str(), a.options.as_str())
                .cmp(&(b.pattern.as_str(), b.options.as_str())),
            (Comparable::Other(a), Comparable::Other(b)) if a == b => Ordering::Equal,
            (Comparable::Other(a), Comparable::Other(b)) => format!("{a:?}").cmp(&format!("{b:?}")),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn compare_documents(a: &Document, b: &Document) -> Ordering {
    let mut left = a.iter();
    let mut right = b.iter();

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some((lk, lv)), Some((rk, rv))) => {
                let ordering = Comparable::from(lv)
                    .cmp(&Comparable::from(rv))
                    .then_with(|| lk.cmp(rk));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

fn compare_arrays(a: &[Bson], b: &[Bson]) -> Ordering {
    a.iter()
        .map(Comparable::from)
        .cmp(b.iter().map(Comparable::from))
}

/// Total order over optional values, a missing value sorting like `null`.
pub(crate) fn compare_values(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let left = a.map_or(Comparable::Null, Comparable::from);
    let right = b.map_or(Comparable::Null, Comparable::from);
    left.cmp(&right)
}

/// Resolves a dotted path through embedded documents and array indexes.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(doc) => doc.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// The value itself followed by its elements when it is an array.
fn candidates(value: &Bson) -> impl Iterator<Item = &Bson> {
    let elements = match value {
        Bson::Array(items) => items.as_slice(),
        _ => &[],
    };

    std::iter::once(value).chain(elements)
}

fn compile(regex: &Regex) -> StoreResult<regex::Regex> {
    let options = regex.options.as_str();

    RegexBuilder::new(regex.pattern.as_str())
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| StoreError::Storage(format!("invalid regular expression: {e}")))
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> StoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Whether the field at `field` equals `value`, following array membership.
    fn equals(&self, field: Option<&Bson>, value: &Bson) -> StoreResult<bool> {
        if let Bson::RegularExpression(regex) = value {
            return self.matches_regex(field, regex);
        }

        match field {
            None => Ok(matches!(value, Bson::Null)),
            Some(field) => {
                let expected = Comparable::from(value);
                Ok(candidates(field).any(|candidate| Comparable::from(candidate) == expected))
            }
        }
    }

    fn matches_regex(&self, field: Option<&Bson>, regex: &Regex) -> StoreResult<bool> {
        let Some(field) = field else {
            return Ok(false);
        };
        let compiled = compile(regex)?;

        Ok(candidates(field).any(|candidate| match candidate {
            Bson::String(s) | Bson::Symbol(s) => compiled.is_match(s),
            _ => false,
        }))
    }

    fn compare(&self, field: Option<&Bson>, value: &Bson, accept: fn(Ordering) -> bool) -> bool {
        let Some(field) = field else {
            return false;
        };
        let bound = Comparable::from(value);

        candidates(field).any(|candidate| {
            let candidate = Comparable::from(candidate);
            candidate.same_class(&bound) && accept(candidate.cmp(&bound))
        })
    }

    fn member(&self, field: Option<&Bson>, values: &Bson) -> StoreResult<bool> {
        let Bson::Array(values) = values else {
            return Err(StoreError::Storage("$in/$nin needs an array".into()));
        };

        for value in values {
            if self.equals(field, value)? {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = StoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(lookup(self.document, field).is_some() == should_exist)
    }

    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error> {
        let field_value = lookup(self.document, field);

        match op {
            FieldOp::Eq => self.equals(field_value, value),
            FieldOp::Ne => Ok(!self.equals(field_value, value)?),
            FieldOp::Gt => Ok(self.compare(field_value, value, Ordering::is_gt)),
            FieldOp::Gte => Ok(self.compare(field_value, value, Ordering::is_ge)),
            FieldOp::Lt => Ok(self.compare(field_value, value, Ordering::is_lt)),
            FieldOp::Lte => Ok(self.compare(field_value, value, Ordering::is_le)),
            FieldOp::In => self.member(field_value, value),
            FieldOp::Nin => Ok(!self.member(field_value, value)?),
            FieldOp::Regex => match value {
                Bson::RegularExpression(regex) => self.matches_regex(field_value, regex),
                _ => Err(StoreError::Storage("$regex has to be a regular expression".into())),
            },
        }
    }
}

/// Parses `filter` once and returns a predicate over documents.
pub(crate) fn matcher(filter: &Document) -> StoreResult<impl Fn(&Document) -> StoreResult<bool> + use<>> {
    let expr = Expr::from_filter(filter)?;

    Ok(move |document: &Document| DocumentEvaluator::new(document).evaluate(&expr))
}
