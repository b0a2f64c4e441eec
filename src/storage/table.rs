use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::{Assignments, Column, DbError, Filter, Result, Row, Schema, validate_identifier};
use crate::transaction::{Change, TransactionId};

#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    schema: Arc<Schema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Result<Self> {
        let name = name.into();
        validate_identifier("table", &name)?;
        Ok(Self {
            name,
            schema: Arc::new(Schema::new(columns)?),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn shared_schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }
}

/// Uncommitted image of a row, owned by exactly one transaction.
///
/// Holding a pending image is the row write lock.
#[derive(Debug, Clone)]
struct PendingImage {
    owner: TransactionId,
    row: Row,
}

#[derive(Debug, Clone, Default)]
struct RowSlot {
    /// `None` until the inserting transaction commits.
    committed: Option<Row>,
    pending: Option<PendingImage>,
}

impl RowSlot {
    fn visible_to(&self, txn: TransactionId) -> Option<&Row> {
        match &self.pending {
            Some(pending) if pending.owner == txn => Some(&pending.row),
            _ => self.committed.as_ref(),
        }
    }

    fn locked_by_other(&self, txn: TransactionId) -> Option<TransactionId> {
        self.pending
            .as_ref()
            .map(|pending| pending.owner)
            .filter(|owner| *owner != txn)
    }

    /// Images that still claim their key from `txn`'s point of view.
    fn live_images(&self, txn: TransactionId) -> impl Iterator<Item = &Row> {
        let own_pending = matches!(&self.pending, Some(p) if p.owner == txn);
        let committed = if own_pending { None } else { self.committed.as_ref() };
        committed
            .into_iter()
            .chain(self.pending.as_ref().map(|pending| &pending.row))
    }
}

/// Result of trying to apply a statement to a table.
#[derive(Debug)]
pub enum WriteOutcome {
    /// The statement was applied; one undo entry per touched row.
    Applied(Vec<Change>),
    /// A matched row is write-locked by another transaction. Nothing was applied.
    Blocked(TransactionId),
}

#[derive(Debug)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<usize, RowSlot>,
    next_row_id: usize,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 0,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    /// Rows visible to `txn` that satisfy `filter`, in insertion order.
    pub fn scan(&self, txn: TransactionId, filter: &Filter) -> Result<Vec<Row>> {
        let bound = filter.bind(self.name(), self.schema.schema())?;
        let mut rows = Vec::new();
        for slot in self.rows.values() {
            if let Some(row) = slot.visible_to(txn)
                && bound.matches(row)?
            {
                rows.push(row.clone());
            }
        }
        Ok(rows)
    }

    /// Insert one row. A key clash with a row another transaction holds
    /// locked blocks instead of failing, since that transaction may still
    /// roll back.
    pub fn insert(&mut self, txn: TransactionId, values: &Assignments) -> Result<WriteOutcome> {
        let schema = self.schema.schema();
        let mut row: Row = vec![crate::core::Value::Null; schema.column_count()];
        for (index, value) in values.bind(self.name(), schema)? {
            row[index] = value;
        }
        schema.validate_row(&row)?;
        if let Some(owner) = self.check_unique(txn, &[&row], &[])? {
            return Ok(WriteOutcome::Blocked(owner));
        }

        let row_id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.insert(
            row_id,
            RowSlot {
                committed: None,
                pending: Some(PendingImage { owner: txn, row }),
            },
        );

        Ok(WriteOutcome::Applied(vec![Change::InsertRow {
            table: self.name().to_string(),
            row_id,
        }]))
    }

    /// Conditional UPDATE: every row visible to `txn` matching `filter` gets
    /// `assignments`. Either all matched rows change or none do.
    pub fn update_where(
        &mut self,
        txn: TransactionId,
        filter: &Filter,
        assignments: &Assignments,
    ) -> Result<WriteOutcome> {
        let schema = self.schema.schema();
        let bound_filter = filter.bind(self.name(), schema)?;
        let bound_values = assignments.bind(self.name(), schema)?;

        let mut matched = Vec::new();
        for (row_id, slot) in &self.rows {
            let Some(row) = slot.visible_to(txn) else {
                continue;
            };
            if !bound_filter.matches(row)? {
                continue;
            }
            if let Some(owner) = slot.locked_by_other(txn) {
                return Ok(WriteOutcome::Blocked(owner));
            }
            let mut new_row = row.clone();
            for (index, value) in &bound_values {
                new_row[*index] = value.clone();
            }
            matched.push((*row_id, new_row));
        }

        let new_images: Vec<&Row> = matched.iter().map(|(_, new_row)| new_row).collect();
        let touched: Vec<usize> = matched.iter().map(|(row_id, _)| *row_id).collect();
        if let Some(owner) = self.check_unique(txn, &new_images, &touched)? {
            return Ok(WriteOutcome::Blocked(owner));
        }

        let mut changes = Vec::with_capacity(matched.len());
        for (row_id, new_row) in matched {
            let Some(slot) = self.rows.get_mut(&row_id) else {
                continue;
            };
            let previous = slot
                .pending
                .replace(PendingImage { owner: txn, row: new_row })
                .map(|pending| pending.row);
            changes.push(Change::UpdateRow {
                table: self.schema.name().to_string(),
                row_id,
                previous,
            });
        }

        Ok(WriteOutcome::Applied(changes))
    }

    /// Revert one undo entry recorded by `txn`.
    pub fn undo(&mut self, txn: TransactionId, change: &Change) {
        match change {
            Change::InsertRow { row_id, .. } => {
                let owned = self
                    .rows
                    .get(row_id)
                    .is_some_and(|slot| slot.committed.is_none() && slot.locked_by_other(txn).is_none());
                if owned {
                    self.rows.remove(row_id);
                }
            }
            Change::UpdateRow { row_id, previous, .. } => {
                if let Some(slot) = self.rows.get_mut(row_id)
                    && slot.locked_by_other(txn).is_none()
                {
                    slot.pending = previous
                        .clone()
                        .map(|row| PendingImage { owner: txn, row });
                }
            }
        }
    }

    /// Make `txn`'s pending image of `row_id` the committed one.
    pub fn publish(&mut self, txn: TransactionId, row_id: usize) {
        if let Some(slot) = self.rows.get_mut(&row_id)
            && slot.pending.as_ref().is_some_and(|pending| pending.owner == txn)
            && let Some(pending) = slot.pending.take()
        {
            slot.committed = Some(pending.row);
        }
    }

    /// Number of rows with a committed image.
    pub fn row_count(&self) -> usize {
        self.rows.values().filter(|slot| slot.committed.is_some()).count()
    }

    /// Number of rows currently write-locked by any transaction.
    pub fn locked_row_count(&self) -> usize {
        self.rows.values().filter(|slot| slot.pending.is_some()).count()
    }

    /// Primary-key check for `images`. A clash with a row locked by another
    /// transaction reports that transaction instead of an error.
    fn check_unique(
        &self,
        txn: TransactionId,
        images: &[&Row],
        skip: &[usize],
    ) -> Result<Option<TransactionId>> {
        let Some(key_index) = self.schema.schema().primary_key_index() else {
            return Ok(None);
        };
        let key_column = &self.schema.schema().columns()[key_index].name;

        for (position, image) in images.iter().enumerate() {
            let key = &image[key_index];
            let clashes_with_batch = images[..position]
                .iter()
                .any(|other| other[key_index] == *key);
            let clashing_slot = self
                .rows
                .iter()
                .filter(|(row_id, _)| !skip.contains(*row_id))
                .map(|(_, slot)| slot)
                .find(|slot| slot.live_images(txn).any(|row| row[key_index] == *key));

            if !clashes_with_batch
                && let Some(owner) = clashing_slot.and_then(|slot| slot.locked_by_other(txn))
            {
                return Ok(Some(owner));
            }
            if clashes_with_batch || clashing_slot.is_some() {
                return Err(DbError::ConstraintViolation(format!(
                    "duplicate key {} for column '{}' in table '{}'",
                    key,
                    key_column,
                    self.name()
                )));
            }
        }
        Ok(None)
    }
}
