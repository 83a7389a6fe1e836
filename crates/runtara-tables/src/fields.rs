// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Field set used to validate submitted cell data.
//!
//! Submitted cells name their field by `key`. Cells whose key is not a field of
//! the table are dropped, never rejected, so a stale client column cannot fail a
//! whole import.

use std::collections::HashMap;

use crate::types::{CellInput, FieldRecord};

/// A cell whose field name has been resolved to a field id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCell {
    /// Id of the field the value belongs to.
    pub field_id: String,
    /// Cell value.
    pub value: String,
}

/// Outcome of validating one record's cells against a [`FieldSet`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedCells {
    /// Cells with a known field, at most one per field.
    pub cells: Vec<ResolvedCell>,
    /// Number of submitted entries dropped for naming an unknown field.
    pub dropped: usize,
}

/// The fields defined for one (table, project) pair, indexed by name.
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    by_name: HashMap<String, FieldRecord>,
}

impl FieldSet {
    /// Build a field set from the registry's field list.
    pub fn new(fields: Vec<FieldRecord>) -> Self {
        let by_name = fields
            .into_iter()
            .map(|field| (field.name.clone(), field))
            .collect();
        Self { by_name }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the table has no fields.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Keep only cells naming a known field and resolve their field ids.
    ///
    /// Output preserves submission order. When a field is named more than once,
    /// the last value wins and takes the position of the first occurrence.
    pub fn resolve(&self, cells: &[CellInput]) -> ResolvedCells {
        let mut resolved: Vec<ResolvedCell> = Vec::with_capacity(cells.len());
        let mut position: HashMap<&str, usize> = HashMap::new();
        let mut dropped = 0;

        for cell in cells {
            let Some(field) = self.by_name.get(&cell.key) else {
                dropped += 1;
                continue;
            };
            match position.get(field.id.as_str()) {
                Some(&idx) => resolved[idx].value = cell.value.clone(),
                None => {
                    position.insert(field.id.as_str(), resolved.len());
                    resolved.push(ResolvedCell {
                        field_id: field.id.clone(),
                        value: cell.value.clone(),
                    });
                }
            }
        }

        ResolvedCells {
            cells: resolved,
            dropped,
        }
    }
}
