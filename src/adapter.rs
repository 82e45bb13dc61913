//! Conversion between delimited rows and [`Record`]s.
//!
//! Inbound, a [`RowAdapter`] locates each mapped column in the row headers
//! (persisted name first, then the logical source name), applies the column's
//! transformation and converts the text to the declared type. Outbound,
//! records are rendered against an ordered list of persisted headers.

use std::borrow::Cow;

use log::debug;

use crate::{
    catalog::{DataTransformation, TableMapping},
    data::{ColumnType, Value, parse_typed_value},
    record::Record,
    resolver::ResolvedTable,
    store::StoreRow,
};

#[derive(Debug, Clone)]
struct Slot<'m> {
    field: &'m str,
    index: Option<usize>,
    data_type: ColumnType,
    transformation: Option<&'m DataTransformation>,
}

/// Header-bound adapter for one table mapping.
#[derive(Debug, Clone)]
pub struct RowAdapter<'m> {
    slots: Vec<Slot<'m>>,
}

impl<'m> RowAdapter<'m> {
    pub fn new(mapping: &'m TableMapping, headers: &[String]) -> Self {
        let find = |name: &str| {
            headers
                .iter()
                .position(|header| header.trim().eq_ignore_ascii_case(name))
        };
        let mut slots = Vec::with_capacity(mapping.columns.len() + mapping.additional_columns.len());
        for (field, column) in &mapping.columns {
            let transformation = mapping.transformation(field);
            slots.push(Slot {
                field: field.as_str(),
                index: find(column.db_column.as_str()).or_else(|| find(field.as_str())),
                data_type: transformation
                    .and_then(|t| t.type_conversion)
                    .unwrap_or(column.data_type),
                transformation,
            });
        }
        for (name, column) in &mapping.additional_columns {
            slots.push(Slot {
                field: name.as_str(),
                index: find(name.as_str()),
                data_type: column.data_type,
                transformation: None,
            });
        }

        for (idx, header) in headers.iter().enumerate() {
            if !slots.iter().any(|slot| slot.index == Some(idx)) {
                debug!("Ignoring unmapped column '{header}' for table '{}'", mapping.table_name);
            }
        }
        Self { slots }
    }

    /// Number of mapped fields found in the headers.
    pub fn matched(&self) -> usize {
        self.slots.iter().filter(|slot| slot.index.is_some()).count()
    }

    pub fn adapt(&self, cells: &[String]) -> Record {
        let mut record = Record::with_capacity(self.slots.len());
        for slot in &self.slots {
            let raw = slot
                .index
                .and_then(|idx| cells.get(idx))
                .map(String::as_str)
                .unwrap_or("");
            if let Some(value) = convert_cell(slot, raw) {
                record.set(slot.field, value);
            }
        }
        record
    }
}

fn convert_cell(slot: &Slot<'_>, raw: &str) -> Option<Value> {
    let default = slot.transformation.and_then(|t| t.default_value.as_deref());
    let handled = match slot.transformation.and_then(|t| t.special_handling) {
        Some(handling) => handling.apply(raw),
        None => Cow::Borrowed(raw),
    };
    let text = handled.trim();
    let text = if text.is_empty() { default? } else { text };

    match parse_typed_value(text, slot.data_type) {
        Ok(value) => value,
        Err(err) => {
            let fallback = default.and_then(|d| parse_typed_value(d, slot.data_type).ok().flatten());
            debug!(
                "Field '{}': {err}; {}",
                slot.field,
                if fallback.is_some() { "using default" } else { "left unset" }
            );
            fallback
        }
    }
}

/// Converts one row of `headers`/`cells` under `mapping`.
pub fn from_row(mapping: &TableMapping, headers: &[String], cells: &[String]) -> Record {
    RowAdapter::new(mapping, headers).adapt(cells)
}

/// Text record for tables with no catalog entry; empty cells stay unset.
pub fn from_row_untyped(headers: &[String], cells: &[String]) -> Record {
    headers
        .iter()
        .zip(cells)
        .filter(|(_, cell)| !cell.trim().is_empty())
        .map(|(header, cell)| (header.trim().to_string(), cell.trim().to_string()))
        .collect()
}

/// Renders `record` in the order of `output_shape`, a list of persisted
/// column names. Unset fields render as empty cells.
pub fn to_row(record: &Record, output_shape: &[String], mapping: Option<&TableMapping>) -> Vec<String> {
    output_shape
        .iter()
        .map(|header| {
            let field = mapping
                .and_then(|m| m.column_by_db_name(header).map(|(field, _)| field))
                .unwrap_or(header.as_str());
            record
                .get(field)
                .map(Value::as_display)
                .unwrap_or_default()
        })
        .collect()
}

/// Maps a stored row back to logical fields, restoring declared types where
/// the stored text parses.
pub fn from_store_row(row: &StoreRow, table: &ResolvedTable) -> Record {
    let mut record = Record::with_capacity(table.columns.len());
    for column in &table.columns {
        let Some(value) = row
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&column.persisted_name))
            .map(|(_, value)| value.clone())
        else {
            continue;
        };
        let value = match value.clone().coerce(column.data_type) {
            Ok(typed) => typed,
            Err(err) => {
                debug!("Column '{}': keeping stored value ({err})", column.persisted_name);
                value
            }
        };
        record.set(column.field.as_str(), value);
    }
    record
}
