//! Query representation shared by every backend.
//!
//! A [`Query`] carries the caller's filter document untouched, so backends that speak
//! the filter language natively can hand it straight to the engine. Backends that
//! evaluate filters themselves parse it into an [`Expr`] tree with
//! [`Expr::from_filter`] and walk that tree with a [`QueryVisitor`].
//!
//! # Filter language
//!
//! - Field comparisons: `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`
//! - Membership: `$in`, `$nin`
//! - Existence: `$exists`
//! - Pattern: `$regex` with optional `$options`, or a regular expression value
//! - Logical: `$and`, `$or`, `$nor`, and `$not` on a field
//!
//! A plain value is an equality test, and field names may be dotted paths into
//! embedded documents.
//!
//! ```ignore
//! use bson::doc;
//! use docrelay_core::query::{Expr, Query, SortDirection};
//!
//! let query = Query::builder()
//!     .filter(doc! { "age": { "$gte": 18 }, "status": "active" })
//!     .limit(10)
//!     .sort("name", SortDirection::Asc)
//!     .build();
//!
//! let expr = Expr::from_filter(&query.filter)?;
//! ```

use bson::{Bson, Document};

use crate::{
    codec,
    error::{StoreError, StoreResult},
};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

/// Sort key for query results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to (exact match, or array membership for array fields).
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Equal to any value of the given array.
    In,
    /// Equal to none of the values of the given array.
    Nin,
    /// String matches the given regular expression.
    Regex,
}

impl FieldOp {
    fn from_operator(operator: &str) -> Option<Self> {
        Some(match operator {
            "$eq" => FieldOp::Eq,
            "$ne" => FieldOp::Ne,
            "$gt" => FieldOp::Gt,
            "$gte" => FieldOp::Gte,
            "$lt" => FieldOp::Lt,
            "$lte" => FieldOp::Lte,
            "$in" => FieldOp::In,
            "$nin" => FieldOp::Nin,
            _ => return None,
        })
    }
}

/// A filter expression over documents.
///
/// Expressions combine with logical operators (`And`, `Or`, `Not`) into
/// arbitrary predicates. An empty `And` matches every document.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field path to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: impl Into<String>, op: FieldOp, value: impl Into<Bson>) -> Self {
        Expr::Field {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Parses a filter document into an expression tree.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] for operators outside the supported filter
    /// language or operands of the wrong shape, mirroring how a database engine
    /// rejects such a filter.
    pub fn from_filter(filter: &Document) -> StoreResult<Expr> {
        let mut exprs = filter
            .iter()
            .map(|(key, value)| match key.as_str() {
                "$and" => Ok(Expr::And(sub_filters(key, value)?)),
                "$or" => Ok(Expr::Or(sub_filters(key, value)?)),
                "$nor" => Ok(Expr::Or(sub_filters(key, value)?).not()),
                operator if operator.starts_with('$') => {
                    Err(unsupported(format!("unknown top level operator: {operator}")))
                }
                field => field_expr(field, value),
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(if exprs.len() == 1 {
            exprs.remove(0)
        } else {
            Expr::And(exprs)
        })
    }
}

fn unsupported(message: impl Into<String>) -> StoreError {
    StoreError::Storage(message.into())
}

fn sub_filters(operator: &str, value: &Bson) -> StoreResult<Vec<Expr>> {
    let Bson::Array(items) = value else {
        return Err(unsupported(format!("{operator} must be an array")));
    };
    if items.is_empty() {
        return Err(unsupported(format!("{operator} must be a non-empty array")));
    }

    items
        .iter()
        .map(|item| match item {
            Bson::Document(filter) => Expr::from_filter(filter),
            _ => Err(unsupported(format!("{operator} entries must be objects"))),
        })
        .collect()
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().is_some_and(|key| key.starts_with('$'))
}

fn field_expr(field: &str, value: &Bson) -> StoreResult<Expr> {
    match value {
        Bson::Document(ops) if is_operator_document(ops) => operator_expr(field, ops),
        Bson::RegularExpression(_) => Ok(Expr::field(field, FieldOp::Regex, value.clone())),
        _ => Ok(Expr::field(field, FieldOp::Eq, value.clone())),
    }
}

fn operator_expr(field: &str, ops: &Document) -> StoreResult<Expr> {
    let mut exprs = Vec::with_capacity(ops.len());

    for (operator, operand) in ops {
        let expr = match operator.as_str() {
            "$exists" => Expr::Exists(field.to_string(), truthy(operand)),
            "$regex" => {
                let options = match ops.get("$options") {
                    Some(Bson::String(options)) => options.as_str(),
                    Some(_) => return Err(unsupported("$options has to be a string")),
                    None => "",
                };
                Expr::field(field, FieldOp::Regex, regex_operand(operand, options)?)
            }
            "$options" if ops.contains_key("$regex") => continue,
            "$options" => return Err(unsupported("$options needs a $regex")),
            "$not" => match operand {
                Bson::Document(inner) if is_operator_document(inner) => {
                    operator_expr(field, inner)?.not()
                }
                Bson::RegularExpression(_) => {
                    Expr::field(field, FieldOp::Regex, operand.clone()).not()
                }
                _ => return Err(unsupported("$not needs a regex or a document")),
            },
            other => match FieldOp::from_operator(other) {
                Some(FieldOp::In | FieldOp::Nin) if !matches!(operand, Bson::Array(_)) => {
                    return Err(unsupported(format!("{other} needs an array")));
                }
                Some(op) => Expr::field(field, op, operand.clone()),
                None => return Err(unsupported(format!("unknown operator: {other}"))),
            },
        };
        exprs.push(expr);
    }

    Ok(if exprs.len() == 1 {
        exprs.remove(0)
    } else {
        Expr::And(exprs)
    })
}

fn regex_operand(operand: &Bson, options: &str) -> StoreResult<Bson> {
    match operand {
        Bson::String(pattern) => Ok(Bson::RegularExpression(codec::regex(pattern, options)?)),
        Bson::RegularExpression(_) if options.is_empty() => Ok(operand.clone()),
        Bson::RegularExpression(existing) => Ok(Bson::RegularExpression(codec::regex(
            existing.pattern.as_str(),
            options,
        )?)),
        _ => Err(unsupported("$regex has to be a string")),
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

/// A structured query for retrieving documents.
///
/// The filter stays in its document form, see the [module docs](self) for the
/// language it speaks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Filter document; empty matches every document.
    pub filter: Document,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
    /// Number of documents to skip.
    pub offset: Option<u64>,
    /// Sort keys, most significant first.
    pub sort: Vec<Sort>,
    /// Inclusion or exclusion projection.
    pub projection: Option<Document>,
}

impl Query {
    /// Creates a query matching every document.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a query for the given filter with no limits.
    pub fn matching(filter: Document) -> Self {
        Query {
            filter,
            ..Query::default()
        }
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder {
            query: Query::default(),
        }
    }

    /// Sets the filter document for this query.
    pub fn filter(mut self, filter: Document) -> Self {
        self.query.filter = filter;
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: u64) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Sets the number of documents to skip.
    pub fn offset(mut self, offset: u64) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Appends a sort key. Earlier keys take precedence.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort {
            field: field.into(),
            direction,
        });
        self
    }

    /// Sets the projection document.
    pub fn projection(mut self, projection: Document) -> Self {
        self.query.projection = Some(projection);
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

pub trait QueryVisitor {
    type Output;
    type Error: Into<StoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}
