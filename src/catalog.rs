//! Mapping catalog model, YAML loading, and atomic reload.
//!
//! The catalog describes, per logical table identifier, which persisted table
//! receives the rows, how spreadsheet columns map onto persisted columns, which
//! extra system columns exist, and which validation and transformation rules
//! apply. It is parsed once into strongly typed structs and never mutated
//! afterwards; [`CatalogHandle`] swaps whole snapshots on reload.
//!
//! ## Loading rules
//!
//! - Duplicate table keys and duplicate persisted column names are rejected.
//! - Unknown fields are ignored everywhere for forward compatibility.
//! - Active tables must parse completely; an inactive table whose node does not
//!   parse is skipped with a warning.

use std::{
    borrow::Cow,
    fmt,
    marker::PhantomData,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, PoisonError, RwLock},
};

use heck::ToSnakeCase;
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{self, DeserializeOwned, MapAccess, Visitor},
};
use sha2::{Digest, Sha256};

use crate::{
    data::ColumnType,
    error::{LoaderError, Result},
    yaml_provider::{self, YamlValue},
};

const BUILTIN_CATALOG: &str = include_str!("../config/catalog.yaml");
pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Drop rejected records and keep going
    #[default]
    Skip,
    /// Fail the run on the first rejected record
    Abort,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// One transaction per `batch_size` statements
    #[default]
    Batched,
    /// One transaction for the whole record set
    Single,
}

/// Logical field names the universal validation rules look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniversalFields {
    pub order_id: String,
    pub recipient_name: String,
    pub address: String,
    pub quantity: String,
    pub phone: String,
    pub postal_code: String,
}

impl Default for UniversalFields {
    fn default() -> Self {
        Self {
            order_id: "order_id".to_string(),
            recipient_name: "recipient_name".to_string(),
            address: "address".to_string(),
            quantity: "quantity".to_string(),
            phone: "phone".to_string(),
            postal_code: "postal_code".to_string(),
        }
    }
}

impl UniversalFields {
    /// Contact fields that are never enforced as required.
    pub fn relaxed(&self) -> [&str; 2] {
        [self.phone.as_str(), self.postal_code.as_str()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub batch_size: usize,
    pub supported_formats: Vec<String>,
    pub error_policy: ErrorPolicy,
    pub transaction_mode: TransactionMode,
    pub universal_fields: UniversalFields,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            supported_formats: vec!["csv".to_string(), "tsv".to_string()],
            error_policy: ErrorPolicy::default(),
            transaction_mode: TransactionMode::default(),
            universal_fields: UniversalFields::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub db_column: String,
    #[serde(default)]
    pub data_type: ColumnType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, deserialize_with = "scalar_string")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalColumn {
    #[serde(default)]
    pub data_type: ColumnType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, deserialize_with = "scalar_string")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub primary_key: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    pub required_fields: Vec<String>,
    pub numeric_fields: Vec<String>,
    pub date_fields: Vec<String>,
    pub decimal_fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialHandling {
    Trim,
    Uppercase,
    Lowercase,
    /// Trimmed, upper-cased, inner whitespace removed (SKUs, carrier codes)
    UppercaseCode,
    DigitsOnly,
    CollapseWhitespace,
}

impl SpecialHandling {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialHandling::Trim => "trim",
            SpecialHandling::Uppercase => "uppercase",
            SpecialHandling::Lowercase => "lowercase",
            SpecialHandling::UppercaseCode => "uppercase-code",
            SpecialHandling::DigitsOnly => "digits-only",
            SpecialHandling::CollapseWhitespace => "collapse-whitespace",
        }
    }

    pub fn apply<'a>(&self, value: &'a str) -> Cow<'a, str> {
        match self {
            SpecialHandling::Trim => Cow::Borrowed(value.trim()),
            SpecialHandling::Uppercase => Cow::Owned(value.trim().to_uppercase()),
            SpecialHandling::Lowercase => Cow::Owned(value.trim().to_lowercase()),
            SpecialHandling::UppercaseCode => Cow::Owned(
                value
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .flat_map(char::to_uppercase)
                    .collect(),
            ),
            SpecialHandling::DigitsOnly => {
                Cow::Owned(value.chars().filter(|c| c.is_ascii_digit()).collect())
            }
            SpecialHandling::CollapseWhitespace => {
                Cow::Owned(value.split_whitespace().collect::<Vec<_>>().join(" "))
            }
        }
    }
}

impl FromStr for SpecialHandling {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_snake_case().as_str() {
            "trim" => Ok(SpecialHandling::Trim),
            "uppercase" | "upper" => Ok(SpecialHandling::Uppercase),
            "lowercase" | "lower" => Ok(SpecialHandling::Lowercase),
            "uppercase_code" => Ok(SpecialHandling::UppercaseCode),
            "digits_only" => Ok(SpecialHandling::DigitsOnly),
            "collapse_whitespace" => Ok(SpecialHandling::CollapseWhitespace),
            _ => Err(format!("Unknown special handling '{value}'")),
        }
    }
}

impl Serialize for SpecialHandling {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SpecialHandling {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        SpecialHandling::from_str(&token).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTransformation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_handling: Option<SpecialHandling>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_conversion: Option<ColumnType>,
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_pattern: Option<String>,
    #[serde(default)]
    pub processing_order: i64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(deserialize_with = "unique_keys")]
    pub columns: IndexMap<String, ColumnMapping>,
    #[serde(default, deserialize_with = "unique_keys")]
    pub additional_columns: IndexMap<String, AdditionalColumn>,
    #[serde(default)]
    pub validation: ValidationRules,
    #[serde(default, deserialize_with = "unique_keys")]
    pub transformations: IndexMap<String, DataTransformation>,
}

impl TableMapping {
    /// Column mapping whose persisted name matches `db_column`, case-insensitively.
    pub fn column_by_db_name(&self, db_column: &str) -> Option<(&str, &ColumnMapping)> {
        self.columns
            .iter()
            .find(|(_, column)| column.db_column.eq_ignore_ascii_case(db_column))
            .map(|(field, column)| (field.as_str(), column))
    }

    pub fn transformation(&self, field: &str) -> Option<&DataTransformation> {
        self.transformations.get(field)
    }

    /// Persisted column names, primary columns first then additional columns.
    pub fn persisted_columns(&self) -> Vec<&str> {
        self.columns
            .values()
            .map(|column| column.db_column.as_str())
            .chain(self.additional_columns.keys().map(String::as_str))
            .collect()
    }

    fn ensure_consistent(&self, id: &str) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(LoaderError::config(format!(
                "Table '{id}' has an empty table_name"
            )));
        }
        if self.columns.is_empty() {
            return Err(LoaderError::config(format!(
                "Table '{id}' declares no columns"
            )));
        }
        let mut seen: Vec<&str> = Vec::new();
        for name in self.persisted_columns() {
            if name.trim().is_empty() {
                return Err(LoaderError::config(format!(
                    "Table '{id}' maps a column to an empty db_column"
                )));
            }
            if seen.iter().any(|existing| existing.eq_ignore_ascii_case(name)) {
                return Err(LoaderError::config(format!(
                    "Table '{id}' maps more than one column to persisted column '{name}'"
                )));
            }
            seen.push(name);
        }
        for field in self.transformations.keys() {
            if !self.columns.contains_key(field) {
                debug!("Table '{id}': transformation for unmapped field '{field}' is ignored");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    settings: CatalogSettings,
    #[serde(deserialize_with = "unique_keys")]
    tables: IndexMap<String, YamlValue>,
}

#[derive(Debug, Clone)]
pub struct MappingCatalog {
    pub version: String,
    pub description: Option<String>,
    pub settings: CatalogSettings,
    tables: IndexMap<String, TableMapping>,
    skipped_tables: Vec<String>,
    fingerprint: String,
}

impl MappingCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let source = yaml_provider::read_to_string(path)?;
        let catalog = Self::from_yaml_str(&source).map_err(|err| match err {
            LoaderError::Config(message) => LoaderError::config(format!("{path:?}: {message}")),
            other => other,
        })?;
        info!(
            "Loaded mapping catalog v{} from {:?} ({} table(s))",
            catalog.version,
            path,
            catalog.tables.len()
        );
        Ok(catalog)
    }

    /// The default orders catalog compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml_str(BUILTIN_CATALOG)
    }

    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let raw: RawCatalog = yaml_provider::from_str(source)
            .map_err(|err| LoaderError::config(format!("Parsing mapping catalog: {err}")))?;
        let mut tables = IndexMap::with_capacity(raw.tables.len());
        let mut skipped_tables = Vec::new();
        for (id, node) in raw.tables {
            let active = node
                .get("active")
                .and_then(YamlValue::as_bool)
                .unwrap_or(true);
            let parsed = yaml_provider::from_value::<TableMapping>(node)
                .map_err(|err| LoaderError::config(format!("Table '{id}': {err}")))
                .and_then(|mapping| mapping.ensure_consistent(&id).map(|_| mapping));
            match parsed {
                Ok(mapping) => {
                    tables.insert(id, mapping);
                }
                Err(err) if !active => {
                    warn!("Skipping inactive table '{id}': {err}");
                    skipped_tables.push(id);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(MappingCatalog {
            version: raw.version.unwrap_or_else(|| "unversioned".to_string()),
            description: raw.description,
            settings: raw.settings,
            tables,
            skipped_tables,
            fingerprint: fingerprint(source),
        })
    }

    /// Absence is not an error; it selects the fallback resolution path.
    pub fn resolve_table(&self, id: &str) -> Option<&TableMapping> {
        self.tables.get(id)
    }

    /// Active tables by `processing_order`; ties keep declaration order.
    pub fn active_tables(&self) -> Vec<(&str, &TableMapping)> {
        let mut active: Vec<_> = self
            .tables
            .iter()
            .filter(|(_, mapping)| mapping.active)
            .map(|(id, mapping)| (id.as_str(), mapping))
            .collect();
        active.sort_by_key(|(_, mapping)| mapping.processing_order);
        active
    }

    pub fn skipped_tables(&self) -> &[String] {
        &self.skipped_tables
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Shared, swappable catalog snapshot.
///
/// Readers take an `Arc` snapshot and keep it for the whole run; a reload
/// publishes a new snapshot without touching the ones already handed out.
#[derive(Debug)]
pub struct CatalogHandle {
    current: RwLock<Arc<MappingCatalog>>,
    source: Option<PathBuf>,
}

impl CatalogHandle {
    pub fn new(catalog: MappingCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
            source: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let catalog = MappingCatalog::load(path)?;
        Ok(Self {
            current: RwLock::new(Arc::new(catalog)),
            source: Some(path.to_path_buf()),
        })
    }

    pub fn snapshot(&self) -> Arc<MappingCatalog> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publishes `catalog` and returns the snapshot it replaced.
    pub fn replace(&self, catalog: MappingCatalog) -> Arc<MappingCatalog> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(catalog))
    }

    /// Re-reads the source file. On failure the current snapshot stays in
    /// place. Returns whether the catalog content changed.
    pub fn reload(&self) -> Result<bool> {
        let path = self
            .source
            .as_deref()
            .ok_or_else(|| LoaderError::config("Catalog handle has no source file to reload"))?;
        let catalog = MappingCatalog::load(path)?;
        let changed = catalog.fingerprint() != self.snapshot().fingerprint();
        if changed {
            info!("Mapping catalog {path:?} changed; publishing new snapshot");
        } else {
            debug!("Mapping catalog {path:?} unchanged");
        }
        self.replace(catalog);
        Ok(changed)
    }
}

fn fingerprint(source: &str) -> String {
    format!("{:x}", Sha256::digest(source.as_bytes()))
}

const fn default_active() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Accepts any YAML scalar (`1`, `true`, `pending`) as a string.
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<YamlValue>::deserialize(deserializer)?;
    match value {
        None | Some(YamlValue::Null) => Ok(None),
        Some(YamlValue::String(s)) => Ok(Some(s)),
        Some(YamlValue::Number(n)) => Ok(Some(n.to_string())),
        Some(YamlValue::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "expected a scalar default value, found {other:?}"
        ))),
    }
}

/// Deserializes a map while rejecting repeated keys instead of keeping the last.
fn unique_keys<'de, D, V>(deserializer: D) -> std::result::Result<IndexMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: DeserializeOwned,
{
    struct UniqueKeys<V>(PhantomData<V>);

    impl<'de, V: DeserializeOwned> Visitor<'de> for UniqueKeys<V> {
        type Value = IndexMap<String, V>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map with unique keys")
        }

        fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut map = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
            while let Some(key) = access.next_key::<String>()? {
                if map.contains_key(&key) {
                    return Err(de::Error::custom(format!("duplicate key '{key}'")));
                }
                let value = access.next_value::<V>()?;
                map.insert(key, value);
            }
            Ok(map)
        }
    }

    deserializer.deserialize_map(UniqueKeys(PhantomData))
}
