#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use order_loader::{data::Value, record::Record};
use rusqlite::Connection;
use tempfile::{TempDir, tempdir};

pub const ORDERS_DDL: &str = "CREATE TABLE logistics_orders (
    order_no TEXT PRIMARY KEY,
    receiver_name TEXT NOT NULL,
    receiver_phone TEXT,
    receiver_address TEXT NOT NULL,
    postal_code TEXT,
    sku TEXT,
    qty INTEGER NOT NULL,
    unit_price TEXT,
    order_date TEXT,
    status TEXT
)";

/// Orders table without a primary key, so the same rows can be written twice.
pub const ORDERS_LOG_DDL: &str = "CREATE TABLE logistics_orders (
    order_no TEXT, receiver_name TEXT, receiver_phone TEXT, receiver_address TEXT,
    postal_code TEXT, sku TEXT, qty INTEGER, unit_price TEXT, order_date TEXT, status TEXT
)";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Creates a SQLite database file running `ddl` and returns its path.
    pub fn database(&self, name: &str, ddl: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let conn = Connection::open(&path).expect("open database");
        conn.execute_batch(ddl).expect("create schema");
        path
    }
}

pub fn count_rows(database: &Path, table: &str) -> i64 {
    let conn = Connection::open(database).expect("open database");
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))
        .expect("count rows")
}

/// A complete order record keyed by logical field names.
pub fn order(id: &str) -> Record {
    Record::new()
        .with("order_id", id)
        .with("recipient_name", "Ada Lovelace")
        .with("phone", "5550100")
        .with("address", "12 Analytical Way")
        .with("postal_code", "94107")
        .with("quantity", Value::Integer(2))
}

pub fn orders(prefix: &str, n: usize) -> Vec<Record> {
    (1..=n).map(|i| order(&format!("{prefix}-{i}"))).collect()
}
