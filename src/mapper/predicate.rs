//! Equality predicates over storage columns.

use std::fmt;

use crate::core::{Result, Value};
use crate::identity::Identity;
use crate::schema::EntitySchema;
use crate::storage::Record;

/// `column = value` with the column already quoted by the storage service.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub column: String,
    pub quoted: String,
    pub value: Value,
}

/// Conjunction of equality clauses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, quoted: String, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause {
            column: column.to_string(),
            quoted,
            value: value.into(),
        });
        self
    }

    /// One clause per primary-key property, in declared order. Values are
    /// coerced and converted to their storage form.
    pub fn for_identity<Q>(schema: &EntitySchema, id: &Identity, quote: Q) -> Result<Self>
    where
        Q: Fn(&str) -> String,
    {
        let id = schema.normalize_identity(id)?;

        let mut predicate = Self::new();
        for meta in schema.primary_key_meta() {
            let value = id.get(&meta.name).cloned().unwrap_or(Value::Null);
            predicate = predicate.eq(&meta.name, quote(&meta.name), meta.store_value(value)?);
        }
        Ok(predicate)
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// `"a" = ? AND "b" = ?`
    pub fn to_sql(&self) -> String {
        self.clauses
            .iter()
            .map(|clause| format!("{} = ?", clause.quoted))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Bound parameters, in clause order.
    pub fn params(&self) -> Vec<&Value> {
        self.clauses.iter().map(|clause| &clause.value).collect()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.clauses
            .iter()
            .all(|clause| record.get(&clause.column) == Some(&clause.value))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}
