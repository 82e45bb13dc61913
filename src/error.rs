//! Error types for the loader library.

use thiserror::Error;

/// Boxed error reported by a [`crate::store::Store`] implementation.
pub type StoreFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by catalog loading, statement building and batch writing.
///
/// Every variant that can abort a run names the table it concerns so callers
/// can surface a message without inspecting the underlying store error.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Catalog missing, unreadable or structurally inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// No column definitions could be resolved for the table
    #[error("Schema error for table '{table}': {message}")]
    Schema { table: String, message: String },

    /// Record rejected while the error policy is `abort`
    #[error("Row {row} rejected for table '{table}': {}", reasons.join("; "))]
    ValidationRejection {
        table: String,
        row: usize,
        reasons: Vec<String>,
    },

    /// Statement construction failed
    #[error("Failed to build statement for table '{table}': {message}")]
    Build { table: String, message: String },

    /// The statement target cannot be determined from the supplied arguments
    #[error("Invalid arguments for table '{table}': {message}")]
    Argument { table: String, message: String },

    /// A transactional unit failed and was rolled back
    #[error("Batch {unit} for table '{table}' was rolled back: {source}")]
    Transaction {
        table: String,
        unit: usize,
        #[source]
        source: StoreFailure,
    },

    /// Table identifier failed the name gate before touching the store
    #[error("Table name '{name}' rejected: {reason}")]
    TableNameRejected { name: String, reason: String },

    /// Store error outside of a transactional unit
    #[error("Store error for table '{table}': {source}")]
    Store {
        table: String,
        #[source]
        source: StoreFailure,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl LoaderError {
    pub fn config(message: impl Into<String>) -> Self {
        LoaderError::Config(message.into())
    }

    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        LoaderError::Schema {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn build(table: impl Into<String>, message: impl Into<String>) -> Self {
        LoaderError::Build {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn argument(table: impl Into<String>, message: impl Into<String>) -> Self {
        LoaderError::Argument {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn store(table: impl Into<String>, source: impl Into<StoreFailure>) -> Self {
        LoaderError::Store {
            table: table.into(),
            source: source.into(),
        }
    }

    /// True when the failure happened before any store interaction.
    pub fn is_pre_store(&self) -> bool {
        matches!(
            self,
            LoaderError::Config(_)
                | LoaderError::Schema { .. }
                | LoaderError::ValidationRejection { .. }
                | LoaderError::Build { .. }
                | LoaderError::Argument { .. }
                | LoaderError::TableNameRejected { .. }
        )
    }
}

/// Result type alias for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;
