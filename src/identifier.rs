//! Table-name gate and identifier quoting for generated SQL.
//!
//! Identifiers cannot travel as statement parameters, so every table name
//! reaching SQL text passes [`validate_table_name`] first and every identifier
//! is double-quoted by [`quote_ident`]. Column names only ever come from
//! resolved column definitions.
//!
//! The keyword rule is deliberately broad: a legitimate name such as
//! `ORDERS_DROP_ARCHIVE` is rejected because it contains `DROP`.

use crate::error::{LoaderError, Result};

const FORBIDDEN_SEQUENCES: &[&str] = &[";", "--", "/*", "*/", "'", "\"", "`", "\\", "/"];
const FORBIDDEN_KEYWORDS: &[&str] = &["DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE"];
const FORBIDDEN_CLAUSE_SEQUENCES: &[&str] = &[";", "--", "/*", "*/"];

pub fn validate_table_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(rejected(name, "name is empty"));
    }
    if name.contains('\0') {
        return Err(rejected(name, "name contains a null byte"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(rejected(name, "name contains whitespace"));
    }
    if let Some(sequence) = FORBIDDEN_SEQUENCES.iter().find(|seq| name.contains(**seq)) {
        return Err(rejected(name, &format!("contains forbidden sequence '{sequence}'")));
    }
    let upper = name.to_ascii_uppercase();
    if let Some(keyword) = FORBIDDEN_KEYWORDS.iter().find(|kw| upper.contains(**kw)) {
        return Err(rejected(name, &format!("contains SQL keyword '{keyword}'")));
    }
    Ok(())
}

pub fn is_valid_table_name(name: &str) -> bool {
    validate_table_name(name).is_ok()
}

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Rejects statement separators and comments in caller-supplied WHERE text.
pub fn validate_where_clause(table: &str, clause: &str) -> Result<()> {
    if clause.trim().is_empty() {
        return Err(LoaderError::argument(table, "WHERE clause is empty"));
    }
    if let Some(sequence) = FORBIDDEN_CLAUSE_SEQUENCES
        .iter()
        .find(|seq| clause.contains(**seq))
    {
        return Err(LoaderError::argument(
            table,
            format!("WHERE clause contains forbidden sequence '{sequence}'"),
        ));
    }
    Ok(())
}

fn rejected(name: &str, reason: &str) -> LoaderError {
    LoaderError::TableNameRejected {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}
