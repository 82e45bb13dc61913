//! Column-definition resolution from the mapping catalog, with a sample-record
//! fallback for tables the catalog does not know.
//!
//! [`resolve`] is the uncached entry point; [`SchemaResolver`] memoizes results
//! per table identifier for the lifetime of one writer invocation.

use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use indexmap::IndexMap;
use log::debug;
use serde::Serialize;

use crate::{
    catalog::{AdditionalColumn, ColumnMapping, MappingCatalog},
    data::{ColumnType, Value, parse_typed_value},
    error::{LoaderError, Result},
    record::Record,
};

/// Where a resolved column came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ColumnSource {
    FromCatalog(ColumnMapping),
    Additional(AdditionalColumn),
    FromSample(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDefinition {
    /// Logical field name the record carries the value under
    pub field: String,
    pub persisted_name: String,
    pub data_type: ColumnType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub primary_key: bool,
    pub source: ColumnSource,
}

impl ColumnDefinition {
    pub fn from_catalog(field: &str, mapping: &ColumnMapping) -> Self {
        Self {
            field: field.to_string(),
            persisted_name: mapping.db_column.clone(),
            data_type: mapping.data_type,
            required: mapping.required,
            default: mapping.default.clone(),
            primary_key: mapping.primary_key,
            source: ColumnSource::FromCatalog(mapping.clone()),
        }
    }

    pub fn additional(name: &str, column: &AdditionalColumn) -> Self {
        Self {
            field: name.to_string(),
            persisted_name: name.to_string(),
            data_type: column.data_type,
            required: column.required,
            default: column.default.clone(),
            primary_key: column.primary_key,
            source: ColumnSource::Additional(column.clone()),
        }
    }

    pub fn from_sample(field: &str) -> Self {
        Self {
            field: field.to_string(),
            persisted_name: field.to_string(),
            data_type: ColumnType::Text,
            required: false,
            default: None,
            primary_key: false,
            source: ColumnSource::FromSample(field.to_string()),
        }
    }

    /// The declared default converted to the column type.
    pub fn default_value(&self) -> anyhow::Result<Option<Value>> {
        match self.default.as_deref() {
            None => Ok(None),
            Some(raw) => parse_typed_value(raw, self.data_type).with_context(|| {
                format!(
                    "Default '{raw}' for column '{}' is not a valid {}",
                    self.persisted_name, self.data_type
                )
            }),
        }
    }

    /// Required with nothing to fall back on.
    pub fn needs_value(&self) -> bool {
        self.required && self.default.is_none()
    }

    pub fn is_from_sample(&self) -> bool {
        matches!(self.source, ColumnSource::FromSample(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedTable {
    pub id: String,
    /// Persisted table name, not yet passed through the name gate
    pub table_name: String,
    pub columns: Vec<ColumnDefinition>,
}

impl ResolvedTable {
    pub fn column(&self, field: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|column| column.field == field)
    }

    pub fn primary_keys(&self) -> Vec<&ColumnDefinition> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    pub fn is_fallback(&self) -> bool {
        self.columns.iter().all(ColumnDefinition::is_from_sample)
    }
}

/// Resolves the columns of `table_id`.
///
/// Catalog tables yield primary columns in declaration order followed by
/// additional columns. Unknown tables yield one text column per field of
/// `sample`; with no usable sample the call fails with a schema error.
pub fn resolve(
    table_id: &str,
    catalog: &MappingCatalog,
    sample: Option<&Record>,
) -> Result<ResolvedTable> {
    if let Some(mapping) = catalog.resolve_table(table_id) {
        let columns = mapping
            .columns
            .iter()
            .map(|(field, column)| ColumnDefinition::from_catalog(field, column))
            .chain(
                mapping
                    .additional_columns
                    .iter()
                    .map(|(name, column)| ColumnDefinition::additional(name, column)),
            )
            .collect();
        return Ok(ResolvedTable {
            id: table_id.to_string(),
            table_name: mapping.table_name.clone(),
            columns,
        });
    }

    let sample = sample.filter(|record| !record.is_empty()).ok_or_else(|| {
        LoaderError::schema(
            table_id,
            "no catalog entry and no sample record to derive columns from",
        )
    })?;
    debug!(
        "Table '{table_id}' has no catalog entry; deriving {} column(s) from sample record",
        sample.len()
    );
    Ok(ResolvedTable {
        id: table_id.to_string(),
        table_name: table_id.to_string(),
        columns: sample
            .field_names()
            .map(ColumnDefinition::from_sample)
            .collect(),
    })
}

/// Sample spanning every field seen across `records`, in first-seen order.
///
/// Each field keeps its first non-blank value, so a field that is blank or
/// absent in the leading rows still yields a fallback column.
pub fn sample_from_records(records: &[Record]) -> Option<Record> {
    let mut sample = Record::new();
    for record in records {
        for (field, value) in record.iter() {
            if sample.non_blank(field).is_none() {
                sample.set(field, value.clone());
            }
        }
    }
    (!sample.is_empty()).then_some(sample)
}

/// Per-invocation memo of resolved tables.
#[derive(Debug)]
pub struct SchemaResolver {
    catalog: Arc<MappingCatalog>,
    table_names: IndexMap<String, String>,
    cache: HashMap<String, Arc<ResolvedTable>>,
}

impl SchemaResolver {
    pub fn new(catalog: Arc<MappingCatalog>) -> Self {
        Self {
            catalog,
            table_names: IndexMap::new(),
            cache: HashMap::new(),
        }
    }

    /// Explicit persisted-name overrides, keyed by table identifier.
    pub fn with_table_names(mut self, table_names: IndexMap<String, String>) -> Self {
        self.table_names = table_names;
        self
    }

    pub fn resolve(&mut self, table_id: &str, sample: Option<&Record>) -> Result<Arc<ResolvedTable>> {
        if let Some(hit) = self.cache.get(table_id) {
            return Ok(Arc::clone(hit));
        }
        let mut resolved = resolve(table_id, &self.catalog, sample)?;
        if let Some(name) = self.table_names.get(table_id) {
            debug!("Table '{table_id}' persisted as '{name}' by configuration");
            resolved.table_name = name.clone();
        }
        let resolved = Arc::new(resolved);
        self.cache
            .insert(table_id.to_string(), Arc::clone(&resolved));
        Ok(resolved)
    }

    pub fn cached_tables(&self) -> usize {
        self.cache.len()
    }
}
