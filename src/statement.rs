//! Parameterized SQL generation from resolved column definitions.
//!
//! Values always travel in the parameter map of a [`GeneratedStatement`];
//! SQL text only ever contains quoted identifiers taken from a
//! [`ResolvedTable`] and named placeholders. Generated placeholders are
//! `:v<n>` for column values and `:k<n>` for key predicates, so a statement's
//! parameter keys and the placeholders in its text are always the same set.

use std::{collections::BTreeSet, sync::LazyLock};

use indexmap::IndexMap;
use itertools::Itertools;
use regex::Regex;

use crate::{
    data::Value,
    error::{LoaderError, Result},
    identifier::{quote_ident, validate_table_name, validate_where_clause},
    record::Record,
    resolver::{ColumnDefinition, ResolvedTable},
};

static QUOTED_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'(?:[^']|'')*'|"(?:[^"]|"")*""#).expect("quoted segment pattern")
});
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^:A-Za-z0-9_]):([A-Za-z_][A-Za-z0-9_]*)").expect("placeholder pattern")
});
static GENERATED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^:[vk][0-9]+$").expect("generated name pattern"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dialect {
    /// SQLite has no TRUNCATE; table clears are emitted as `DELETE FROM`
    #[default]
    Sqlite,
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    Truncate,
    Select,
}

/// SQL text plus the values for its named placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedStatement {
    kind: StatementKind,
    table: String,
    sql: String,
    params: IndexMap<String, Value>,
}

impl GeneratedStatement {
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Persisted name of the target table.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Keys include the leading `:`.
    pub fn params(&self) -> &IndexMap<String, Value> {
        &self.params
    }
}

/// Caller-supplied filter for UPDATE and DELETE.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    sql: String,
    params: IndexMap<String, Value>,
}

impl WhereClause {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: IndexMap::new(),
        }
    }

    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        let key = if name.starts_with(':') {
            name.to_string()
        } else {
            format!(":{name}")
        };
        self.params.insert(key, value.into());
        self
    }

    fn check(&self, table: &str) -> Result<()> {
        validate_where_clause(table, &self.sql)?;
        if let Some(name) = self.params.keys().find(|k| GENERATED_NAME.is_match(k)) {
            return Err(LoaderError::argument(
                table,
                format!("WHERE parameter '{name}' collides with generated placeholder names"),
            ));
        }
        let referenced = placeholders(&self.sql);
        let bound: BTreeSet<String> = self.params.keys().cloned().collect();
        if referenced != bound {
            let missing = referenced.difference(&bound).join(", ");
            let unused = bound.difference(&referenced).join(", ");
            return Err(LoaderError::argument(
                table,
                format!("WHERE parameters do not match placeholders (unbound: [{missing}], unused: [{unused}])"),
            ));
        }
        Ok(())
    }
}

/// Named placeholders referenced by `sql`, ignoring quoted text and `::` casts.
pub fn placeholders(sql: &str) -> BTreeSet<String> {
    let stripped = QUOTED_SEGMENT.replace_all(sql, "''");
    PLACEHOLDER
        .captures_iter(&stripped)
        .map(|caps| format!(":{}", &caps[1]))
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatementBuilder {
    dialect: Dialect,
}

impl StatementBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn insert(&self, table: &ResolvedTable, record: &Record) -> Result<GeneratedStatement> {
        let table_sql = quoted_table(table)?;
        let mut columns = Vec::with_capacity(table.columns.len());
        let mut params = IndexMap::with_capacity(table.columns.len());
        for column in &table.columns {
            let value = match supplied_value(table, column, record)? {
                Some(value) => value,
                None => match column.default_value().map_err(|err| build_error(table, err))? {
                    Some(default) => default,
                    None if column.required => {
                        return Err(LoaderError::build(
                            &table.table_name,
                            format!(
                                "required column '{}' (field '{}') has no value and no default",
                                column.persisted_name, column.field
                            ),
                        ));
                    }
                    None => continue,
                },
            };
            let placeholder = format!(":v{}", params.len());
            columns.push(quote_ident(&column.persisted_name));
            params.insert(placeholder, value);
        }
        if params.is_empty() {
            return Err(LoaderError::build(
                &table.table_name,
                "record supplies no value for any resolved column",
            ));
        }
        let sql = format!(
            "INSERT INTO {table_sql} ({}) VALUES ({})",
            columns.join(", "),
            params.keys().join(", ")
        );
        Ok(self.finish(StatementKind::Insert, table, sql, params))
    }

    /// SET covers the resolved columns present in `record`; defaults are not
    /// applied. Without `filter` the WHERE clause is built from the primary-key
    /// columns, which are then left out of SET.
    pub fn update(
        &self,
        table: &ResolvedTable,
        record: &Record,
        filter: Option<&WhereClause>,
    ) -> Result<GeneratedStatement> {
        let table_sql = quoted_table(table)?;
        let mut params = IndexMap::new();
        let (where_sql, key_fields) = self.where_sql(table, record, filter, &mut params)?;

        let mut assignments = Vec::new();
        for column in &table.columns {
            if key_fields.contains(&column.field.as_str()) {
                continue;
            }
            let Some(value) = supplied_value(table, column, record)? else {
                continue;
            };
            let placeholder = format!(":v{}", assignments.len());
            assignments.push(format!("{} = {placeholder}", quote_ident(&column.persisted_name)));
            params.insert(placeholder, value);
        }
        if assignments.is_empty() {
            return Err(LoaderError::argument(
                &table.table_name,
                "record supplies no column to update",
            ));
        }
        let sql = format!(
            "UPDATE {table_sql} SET {} WHERE {where_sql}",
            assignments.join(", ")
        );
        Ok(self.finish(StatementKind::Update, table, sql, params))
    }

    pub fn delete(
        &self,
        table: &ResolvedTable,
        record: &Record,
        filter: Option<&WhereClause>,
    ) -> Result<GeneratedStatement> {
        let table_sql = quoted_table(table)?;
        let mut params = IndexMap::new();
        let (where_sql, _) = self.where_sql(table, record, filter, &mut params)?;
        let sql = format!("DELETE FROM {table_sql} WHERE {where_sql}");
        Ok(self.finish(StatementKind::Delete, table, sql, params))
    }

    pub fn truncate(&self, table_name: &str) -> Result<GeneratedStatement> {
        validate_table_name(table_name)?;
        let sql = match self.dialect {
            Dialect::Sqlite => format!("DELETE FROM {}", quote_ident(table_name)),
            Dialect::Standard => format!("TRUNCATE TABLE {}", quote_ident(table_name)),
        };
        Ok(GeneratedStatement {
            kind: StatementKind::Truncate,
            table: table_name.to_string(),
            sql,
            params: IndexMap::new(),
        })
    }

    /// Reads every resolved column, in resolution order.
    pub fn select(&self, table: &ResolvedTable) -> Result<GeneratedStatement> {
        let table_sql = quoted_table(table)?;
        let columns = table
            .columns
            .iter()
            .map(|column| quote_ident(&column.persisted_name))
            .join(", ");
        let sql = format!("SELECT {columns} FROM {table_sql}");
        Ok(self.finish(StatementKind::Select, table, sql, IndexMap::new()))
    }

    /// Reads every stored column of a table the catalog does not describe.
    pub fn select_all(&self, table_name: &str) -> Result<GeneratedStatement> {
        validate_table_name(table_name)?;
        Ok(GeneratedStatement {
            kind: StatementKind::Select,
            table: table_name.to_string(),
            sql: format!("SELECT * FROM {}", quote_ident(table_name)),
            params: IndexMap::new(),
        })
    }

    fn where_sql<'t>(
        &self,
        table: &'t ResolvedTable,
        record: &Record,
        filter: Option<&WhereClause>,
        params: &mut IndexMap<String, Value>,
    ) -> Result<(String, Vec<&'t str>)> {
        if let Some(filter) = filter {
            filter.check(&table.table_name)?;
            params.extend(filter.params.iter().map(|(k, v)| (k.clone(), v.clone())));
            return Ok((filter.sql.clone(), Vec::new()));
        }
        let keys = table.primary_keys();
        if keys.is_empty() {
            return Err(LoaderError::argument(
                &table.table_name,
                "no WHERE clause given and no primary-key column declared; update target is ambiguous",
            ));
        }
        let mut predicates = Vec::with_capacity(keys.len());
        let mut fields = Vec::with_capacity(keys.len());
        for (idx, key) in keys.into_iter().enumerate() {
            let value = supplied_value(table, key, record)?.ok_or_else(|| {
                LoaderError::argument(
                    &table.table_name,
                    format!("record has no value for key column '{}'", key.persisted_name),
                )
            })?;
            let placeholder = format!(":k{idx}");
            predicates.push(format!("{} = {placeholder}", quote_ident(&key.persisted_name)));
            params.insert(placeholder, value);
            fields.push(key.field.as_str());
        }
        Ok((predicates.join(" AND "), fields))
    }

    fn finish(
        &self,
        kind: StatementKind,
        table: &ResolvedTable,
        sql: String,
        params: IndexMap<String, Value>,
    ) -> GeneratedStatement {
        debug_assert_eq!(
            placeholders(&sql),
            params.keys().cloned().collect::<BTreeSet<_>>(),
            "placeholder/parameter mismatch in {sql}"
        );
        GeneratedStatement {
            kind,
            table: table.table_name.clone(),
            sql,
            params,
        }
    }
}

fn quoted_table(table: &ResolvedTable) -> Result<String> {
    validate_table_name(&table.table_name)?;
    Ok(quote_ident(&table.table_name))
}

/// The record's value for `column`, converted to the declared type. Blank
/// strings count as absent.
fn supplied_value(
    table: &ResolvedTable,
    column: &ColumnDefinition,
    record: &Record,
) -> Result<Option<Value>> {
    let Some(value) = record.non_blank(&column.field) else {
        return Ok(None);
    };
    value
        .clone()
        .coerce(column.data_type)
        .map(Some)
        .map_err(|err| {
            LoaderError::build(
                &table.table_name,
                format!("column '{}': {err:#}", column.persisted_name),
            )
        })
}

fn build_error(table: &ResolvedTable, err: anyhow::Error) -> LoaderError {
    LoaderError::build(&table.table_name, format!("{err:#}"))
}
