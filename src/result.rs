use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::core::{Row, Schema, Value};

/// One row returned by a SELECT, addressable by column name.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    row: Row,
}

impl Record {
    pub fn new(schema: Arc<Schema>, row: Row) -> Self {
        Self { schema, row }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.schema
            .find_column_index(column)
            .map(|index| &self.row[index])
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_i64)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    pub fn values(&self) -> &Row {
        &self.row
    }

    pub fn into_row(self) -> Row {
        self.row
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.row.len()))?;
        for (column, value) in self.schema.columns().iter().zip(&self.row) {
            map.serialize_entry(&column.name, value)?;
        }
        map.end()
    }
}
