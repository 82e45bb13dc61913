//! Database seam for batch writes.
//!
//! A [`Store`] runs a slice of generated statements as one atomic unit: either
//! every statement commits or none does. [`SqliteStore`] is the bundled
//! implementation; anything else that can honour the same contract plugs in
//! behind the trait.

use std::path::Path;

use indexmap::IndexMap;
use log::{debug, trace};
use rusqlite::{
    Connection, ToSql,
    types::{ToSqlOutput, ValueRef},
};

use crate::{data::Value, error::StoreFailure, statement::GeneratedStatement};

/// One row read back from the store, keyed by persisted column name.
pub type StoreRow = IndexMap<String, Value>;

pub trait Store {
    /// Executes `statements` inside a single transaction and returns the total
    /// number of affected rows. On error nothing from the unit is persisted.
    fn execute_unit(&mut self, statements: &[GeneratedStatement]) -> Result<usize, StoreFailure>;

    /// Runs a read statement outside of any unit.
    fn query(&mut self, statement: &GeneratedStatement) -> Result<Vec<StoreRow>, StoreFailure>;
}

impl<S: Store + ?Sized> Store for &mut S {
    fn execute_unit(&mut self, statements: &[GeneratedStatement]) -> Result<usize, StoreFailure> {
        (**self).execute_unit(statements)
    }

    fn query(&mut self, statement: &GeneratedStatement) -> Result<Vec<StoreRow>, StoreFailure> {
        (**self).query(statement)
    }
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreFailure> {
        let conn = Connection::open(path)?;
        debug!("Opened SQLite store at {path:?}");
        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> Result<Self, StoreFailure> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Wraps a connection the caller has already opened and configured.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Runs raw DDL or setup SQL with no parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreFailure> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

impl Store for SqliteStore {
    fn execute_unit(&mut self, statements: &[GeneratedStatement]) -> Result<usize, StoreFailure> {
        let tx = self.conn.transaction()?;
        let mut affected = 0;
        for statement in statements {
            trace!("{}", statement.sql());
            let mut prepared = tx.prepare_cached(statement.sql())?;
            let params = named_params(statement);
            affected += prepared.execute(params.as_slice())?;
        }
        // dropping an uncommitted transaction rolls it back
        tx.commit()?;
        Ok(affected)
    }

    fn query(&mut self, statement: &GeneratedStatement) -> Result<Vec<StoreRow>, StoreFailure> {
        let mut prepared = self.conn.prepare_cached(statement.sql())?;
        let columns: Vec<String> = prepared
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let params = named_params(statement);
        let mut rows = prepared.query(params.as_slice())?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = IndexMap::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                if let Some(value) = from_value_ref(row.get_ref(idx)?)? {
                    values.insert(name.clone(), value);
                }
            }
            out.push(values);
        }
        Ok(out)
    }
}

fn named_params(statement: &GeneratedStatement) -> Vec<(&str, &dyn ToSql)> {
    statement
        .params()
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect()
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Boolean(b) => ToSqlOutput::from(*b),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Float(f) => ToSqlOutput::from(*f),
            Value::Decimal(d) => ToSqlOutput::from(d.normalize().to_string()),
            Value::Date(d) => ToSqlOutput::from(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => ToSqlOutput::from(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
            Value::String(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

/// NULL maps to an unset field.
fn from_value_ref(value: ValueRef<'_>) -> Result<Option<Value>, StoreFailure> {
    Ok(match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(Value::Integer(i)),
        ValueRef::Real(f) => Some(Value::Float(f)),
        ValueRef::Text(bytes) => Some(Value::String(std::str::from_utf8(bytes)?.to_string())),
        ValueRef::Blob(bytes) => Some(Value::String(String::from_utf8_lossy(bytes).into_owned())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::MappingCatalog,
        record::Record,
        resolver::resolve,
        statement::{StatementBuilder, StatementKind},
    };

    fn store_with_orders() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE logistics_orders (order_no TEXT PRIMARY KEY, receiver_name TEXT, \
                 receiver_phone TEXT, receiver_address TEXT, postal_code TEXT, sku TEXT, \
                 qty INTEGER, unit_price TEXT, order_date TEXT, status TEXT)",
            )
            .unwrap();
        store
    }

    fn insert(order_no: &str) -> GeneratedStatement {
        let table = resolve("orders", &MappingCatalog::builtin().unwrap(), None).unwrap();
        let record = Record::new()
            .with("order_id", order_no)
            .with("recipient_name", "Ada")
            .with("address", "1 Loop Rd");
        StatementBuilder::default().insert(&table, &record).unwrap()
    }

    fn count(store: &SqliteStore) -> i64 {
        store
            .connection()
            .query_row("SELECT COUNT(*) FROM logistics_orders", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn unit_commits_all_statements() {
        let mut store = store_with_orders();
        let affected = store
            .execute_unit(&[insert("SO-1"), insert("SO-2")])
            .unwrap();
        assert_eq!(affected, 2);
        assert_eq!(count(&store), 2);
    }

    #[test]
    fn failing_statement_rolls_back_whole_unit() {
        let mut store = store_with_orders();
        let err = store
            .execute_unit(&[insert("SO-1"), insert("SO-1")])
            .unwrap_err();
        assert!(err.to_string().to_lowercase().contains("unique"));
        assert_eq!(count(&store), 0);
    }

    #[test]
    fn query_reads_typed_columns_and_skips_nulls() {
        let mut store = store_with_orders();
        store.execute_unit(&[insert("SO-7")]).unwrap();
        let table = resolve("orders", &MappingCatalog::builtin().unwrap(), None).unwrap();
        let select = StatementBuilder::default().select(&table).unwrap();
        assert_eq!(select.kind(), StatementKind::Select);
        let rows = store.query(&select).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["order_no"], Value::from("SO-7"));
        assert_eq!(rows[0]["qty"], Value::Integer(1));
        assert!(!rows[0].contains_key("receiver_phone"));
    }
}
