//! Run options layered over the catalog settings.

use indexmap::IndexMap;

use crate::{
    catalog::{CatalogSettings, DEFAULT_BATCH_SIZE, ErrorPolicy, TransactionMode},
    statement::Dialect,
};

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub transaction_mode: TransactionMode,
    pub error_policy: ErrorPolicy,
    pub dialect: Dialect,
    /// Persisted-name overrides keyed by table identifier. These win over the
    /// catalog's `table_name`.
    pub table_names: IndexMap<String, String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::from_settings(&CatalogSettings::default())
    }
}

impl LoaderConfig {
    pub fn from_settings(settings: &CatalogSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            transaction_mode: settings.transaction_mode,
            error_policy: settings.error_policy,
            dialect: Dialect::default(),
            table_names: IndexMap::new(),
        }
    }

    pub fn with_table_name(mut self, table_id: impl Into<String>, name: impl Into<String>) -> Self {
        self.table_names.insert(table_id.into(), name.into());
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.transaction_mode = mode;
        self
    }

    /// A positive per-call hint wins, then the configured size, then the
    /// built-in default.
    pub fn effective_batch_size(&self, hint: Option<usize>) -> usize {
        match hint {
            Some(size) if size > 0 => size,
            _ if self.batch_size > 0 => self.batch_size,
            _ => DEFAULT_BATCH_SIZE,
        }
    }
}
