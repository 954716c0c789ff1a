use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    GreaterThan,
    LessThan,
}

/// One condition on one field. All criteria of a filter must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub values: Vec<Value>,
}

impl Criterion {
    pub fn new(field: impl Into<String>, operator: Operator, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            values,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);
        match self.operator {
            Operator::Equals => self.values.first().is_some_and(|v| loose_eq(actual, v)),
            Operator::NotEquals => !self.values.first().is_some_and(|v| loose_eq(actual, v)),
            Operator::In => self.values.iter().any(|v| loose_eq(actual, v)),
            Operator::NotIn => !self.values.iter().any(|v| loose_eq(actual, v)),
            Operator::GreaterThan => self
                .values
                .first()
                .is_some_and(|v| compare(actual, v) == Some(Ordering::Greater)),
            Operator::LessThan => self
                .values
                .first()
                .is_some_and(|v| compare(actual, v) == Some(Ordering::Less)),
        }
    }
}

/// Conjunction of criteria selecting records from a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    #[serde(default)]
    pub criteria: Vec<Criterion>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `field = value`
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().with(Criterion::new(field, Operator::Equals, vec![value.into()]))
    }

    /// `field IN (values)`
    pub fn in_list<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        Self::new().with(Criterion::new(field, Operator::In, values))
    }

    pub fn with(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.criteria.iter().all(|c| c.matches(record))
    }
}

// Numbers compare by value so that `7` matches `7.0` and `"7"` matches `7`
// (ids often arrive as strings from a UI).
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
