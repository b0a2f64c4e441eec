use serde::{Deserialize, Serialize};

use super::{DbError, Result, Row, Schema, Value, validate_identifier};

/// A single column predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Eq(String, Value),
    IsNull(String),
    IsNotNull(String),
}

impl Condition {
    pub fn column(&self) -> &str {
        match self {
            Condition::Eq(column, _) => column,
            Condition::IsNull(column) => column,
            Condition::IsNotNull(column) => column,
        }
    }

    fn evaluate(&self, index: usize, row: &Row) -> Result<bool> {
        let value = &row[index];
        match self {
            Condition::Eq(_, expected) => value.sql_eq(expected),
            Condition::IsNull(_) => Ok(value.is_null()),
            Condition::IsNotNull(_) => Ok(!value.is_null()),
        }
    }
}

/// Conjunction of conditions. The empty filter matches every row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(column.into(), value.into()));
        self
    }

    pub fn is_null(mut self, column: impl Into<String>) -> Self {
        self.conditions.push(Condition::IsNull(column.into()));
        self
    }

    pub fn is_not_null(mut self, column: impl Into<String>) -> Self {
        self.conditions.push(Condition::IsNotNull(column.into()));
        self
    }

    pub fn and(mut self, other: &Filter) -> Self {
        self.conditions.extend(other.conditions.iter().cloned());
        self
    }

    pub fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Resolve every column against `schema` so evaluation is index based.
    pub fn bind<'a>(&'a self, table: &str, schema: &Schema) -> Result<BoundFilter<'a>> {
        let mut bound = Vec::with_capacity(self.conditions.len());
        for condition in &self.conditions {
            let column = condition.column();
            validate_identifier("column", column)?;
            let index = schema
                .find_column_index(column)
                .ok_or_else(|| DbError::ColumnNotFound(column.to_string(), table.to_string()))?;
            bound.push((index, condition));
        }
        Ok(BoundFilter { conditions: bound })
    }
}

impl From<Vec<Condition>> for Filter {
    fn from(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }
}

pub struct BoundFilter<'a> {
    conditions: Vec<(usize, &'a Condition)>,
}

impl BoundFilter<'_> {
    pub fn matches(&self, row: &Row) -> Result<bool> {
        for (index, condition) in &self.conditions {
            if !condition.evaluate(*index, row)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Ordered `column = value` list for SET clauses and inserts.
///
/// Setting the same column twice keeps the last value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assignments {
    entries: Vec<(String, Value)>,
}

impl Assignments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve column names to schema positions, validating each value.
    pub fn bind(&self, table: &str, schema: &Schema) -> Result<Vec<(usize, Value)>> {
        let mut bound = Vec::with_capacity(self.entries.len());
        for (column, value) in &self.entries {
            validate_identifier("column", column)?;
            let index = schema
                .find_column_index(column)
                .ok_or_else(|| DbError::ColumnNotFound(column.clone(), table.to_string()))?;
            schema.columns()[index].validate(value)?;
            bound.push((index, value.clone()));
        }
        Ok(bound)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Assignments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut assignments = Assignments::new();
        for (column, value) in iter {
            assignments.insert(column, value);
        }
        assignments
    }
}
