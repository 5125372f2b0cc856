//! Declarative remote query builder.
//!
//! A [`QueryBuilder`] accumulates an ordered sequence of clauses and is
//! consumed opaquely by the remote collection service. Two builders are
//! equal iff their clause sequences are equal element-wise and in the same
//! order; reordering a filter against an order clause changes semantics and
//! therefore equality.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Comparison operator of a filter clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    /// Field equals the value.
    Eq,
    /// Field does not equal the value.
    Ne,
    /// Field is less than the value.
    Lt,
    /// Field is less than or equal to the value.
    Le,
    /// Field is greater than the value.
    Gt,
    /// Field is greater than or equal to the value.
    Ge,
    /// Array field contains the value.
    Contains,
    /// Field is one of the values in an array.
    In,
}

/// One filter clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Field the filter applies to.
    pub field: String,
    /// Comparison operator.
    pub op: FilterOp,
    /// Comparison value.
    pub value: Value,
}

/// One ordering clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOrder {
    /// Field to order by.
    pub field: String,
    /// Whether the order is descending.
    pub descending: bool,
}

/// One pagination cursor clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCursor {
    /// Cursor values, one per preceding order clause.
    pub values: Vec<Value>,
    /// Whether the cursor position itself is included.
    pub inclusive: bool,
}

/// A single query clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOperation {
    /// Filter clause.
    Filter(QueryFilter),
    /// Order clause.
    Order(QueryOrder),
    /// Result count limit.
    Limit(u32),
    /// Pagination cursor.
    Cursor(QueryCursor),
}

/// Accumulates an ordered sequence of query clauses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryBuilder {
    operations: Vec<QueryOperation>,
}

impl QueryBuilder {
    /// Creates an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter clause.
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.operations.push(QueryOperation::Filter(QueryFilter {
            field: field.into(),
            op,
            value: value.into(),
        }));
        self
    }

    /// Appends an ordering clause.
    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.operations.push(QueryOperation::Order(QueryOrder {
            field: field.into(),
            descending,
        }));
        self
    }

    /// Appends a result count limit.
    pub fn limit(mut self, limit: u32) -> Self {
        self.operations.push(QueryOperation::Limit(limit));
        self
    }

    /// Appends an inclusive pagination cursor.
    pub fn start_at(mut self, values: Vec<Value>) -> Self {
        self.operations.push(QueryOperation::Cursor(QueryCursor {
            values,
            inclusive: true,
        }));
        self
    }

    /// Appends an exclusive pagination cursor.
    pub fn start_after(mut self, values: Vec<Value>) -> Self {
        self.operations.push(QueryOperation::Cursor(QueryCursor {
            values,
            inclusive: false,
        }));
        self
    }

    /// The accumulated clauses, in application order.
    pub fn operations(&self) -> &[QueryOperation] {
        &self.operations
    }

    /// Returns true if no clauses have been added.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
