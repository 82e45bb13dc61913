mod common;

use std::sync::Arc;

use common::{ORDERS_DDL, ORDERS_LOG_DDL, TestWorkspace, count_rows, order, orders};
use order_loader::{
    catalog::{ErrorPolicy, MappingCatalog},
    config::LoaderConfig,
    error::{LoaderError, StoreFailure},
    statement::GeneratedStatement,
    store::{SqliteStore, Store, StoreRow},
    validate::Rejection,
    writer::{BatchWriter, CancelToken, Progress, WriteOptions, WriterState},
};

/// Delegates to an inner store, failing the configured unit and recording how
/// many units were submitted.
struct CountingStore<S> {
    inner: S,
    fail_unit: Option<usize>,
    submitted: usize,
}

impl<S: Store> Store for CountingStore<S> {
    fn execute_unit(&mut self, statements: &[GeneratedStatement]) -> Result<usize, StoreFailure> {
        self.submitted += 1;
        if self.fail_unit == Some(self.submitted) {
            return Err("simulated constraint violation".into());
        }
        self.inner.execute_unit(statements)
    }

    fn query(&mut self, statement: &GeneratedStatement) -> Result<Vec<StoreRow>, StoreFailure> {
        self.inner.query(statement)
    }
}

fn catalog() -> Arc<MappingCatalog> {
    Arc::new(MappingCatalog::builtin().expect("builtin catalog"))
}

#[test]
fn writing_the_same_records_twice_duplicates_rows() {
    let workspace = TestWorkspace::new();
    let db = workspace.database("orders.db", ORDERS_LOG_DDL);
    let records = orders("SO", 10);
    let mut writer = BatchWriter::new(
        SqliteStore::open(&db).unwrap(),
        catalog(),
        LoaderConfig::default(),
    );

    let first = writer.write("orders", &records, WriteOptions::default()).unwrap();
    let second = writer.write("orders", &records, WriteOptions::default()).unwrap();

    assert_eq!(first.committed, 10);
    assert_eq!(second.committed, 10);
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(count_rows(&db, "logistics_orders"), 20);
}

#[test]
fn failing_unit_keeps_earlier_units_and_stops_the_run() {
    let workspace = TestWorkspace::new();
    let db = workspace.database("orders.db", ORDERS_DDL);
    let store = CountingStore {
        inner: SqliteStore::open(&db).unwrap(),
        fail_unit: Some(2),
        submitted: 0,
    };
    let mut writer = BatchWriter::new(store, catalog(), LoaderConfig::default());
    let mut seen = Vec::new();
    let mut progress = |p: Progress| seen.push(p);

    let err = writer
        .write(
            "orders",
            &orders("SO", 9),
            WriteOptions::default().batch_size(3).progress(&mut progress),
        )
        .unwrap_err();

    match &err {
        LoaderError::Transaction { table, unit, .. } => {
            assert_eq!(table, "logistics_orders");
            assert_eq!(*unit, 2);
        }
        other => panic!("expected transaction error, got {other:?}"),
    }
    assert!(err.to_string().contains("simulated constraint violation"));
    assert_eq!(writer.state(), WriterState::Failed);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].committed, 3);

    let store = writer.into_store();
    assert_eq!(store.submitted, 2, "unit 3 must never be submitted");
    assert_eq!(count_rows(&db, "logistics_orders"), 3);
}

#[test]
fn store_constraint_failure_rolls_back_only_that_unit() {
    let workspace = TestWorkspace::new();
    let db = workspace.database("orders.db", ORDERS_DDL);
    let mut records = orders("SO", 4);
    // second unit repeats a key from the first
    records.push(order("SO-1"));
    records.push(order("SO-9"));
    let mut writer = BatchWriter::new(
        SqliteStore::open(&db).unwrap(),
        catalog(),
        LoaderConfig::default(),
    );

    let err = writer
        .write("orders", &records, WriteOptions::default().batch_size(4))
        .unwrap_err();

    assert!(matches!(err, LoaderError::Transaction { unit: 2, .. }));
    assert_eq!(count_rows(&db, "logistics_orders"), 4);
}

#[test]
fn missing_recipient_is_rejected_but_missing_phone_is_written() {
    let workspace = TestWorkspace::new();
    let db = workspace.database("orders.db", ORDERS_DDL);
    let mut no_recipient = order("SO-1");
    no_recipient.remove("recipient_name");
    let mut no_phone = order("SO-2");
    no_phone.remove("phone");
    let mut writer = BatchWriter::new(
        SqliteStore::open(&db).unwrap(),
        catalog(),
        LoaderConfig::default(),
    );
    let mut rejections: Vec<Rejection> = Vec::new();

    let outcome = writer
        .write(
            "orders",
            &[no_recipient, no_phone],
            WriteOptions::default().rejects(&mut rejections),
        )
        .unwrap();

    assert_eq!(outcome.committed, 1);
    assert_eq!(outcome.rejected, 1);
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].row, 1);
    assert!(rejections[0].reasons[0].contains("recipient_name"));
    assert_eq!(count_rows(&db, "logistics_orders"), 1);
}

#[test]
fn record_without_quantity_is_rejected_not_defaulted() {
    let workspace = TestWorkspace::new();
    let db = workspace.database("orders.db", ORDERS_DDL);
    let mut no_quantity = order("SO-1");
    no_quantity.remove("quantity");
    let mut writer = BatchWriter::new(
        SqliteStore::open(&db).unwrap(),
        catalog(),
        LoaderConfig::default(),
    );
    let mut rejections: Vec<Rejection> = Vec::new();

    let outcome = writer
        .write(
            "orders",
            &[no_quantity, order("SO-2")],
            WriteOptions::default().rejects(&mut rejections),
        )
        .unwrap();

    assert_eq!(outcome.committed, 1);
    assert_eq!(outcome.rejected, 1);
    assert_eq!(rejections[0].reasons, vec!["required field 'quantity' is missing"]);
    assert_eq!(count_rows(&db, "logistics_orders"), 1);
}

#[test]
fn abort_policy_fails_before_any_write() {
    let workspace = TestWorkspace::new();
    let db = workspace.database("orders.db", ORDERS_DDL);
    let mut records = orders("SO", 3);
    records[2].remove("address");
    let config = LoaderConfig::default().with_error_policy(ErrorPolicy::Abort);
    let mut writer = BatchWriter::new(SqliteStore::open(&db).unwrap(), catalog(), config);

    let err = writer
        .write("orders", &records, WriteOptions::default().batch_size(1))
        .unwrap_err();

    assert!(matches!(err, LoaderError::ValidationRejection { row: 3, .. }));
    assert!(err.is_pre_store());
    assert_eq!(count_rows(&db, "logistics_orders"), 0);
}

#[test]
fn cancellation_between_units_returns_partial_outcome() {
    let workspace = TestWorkspace::new();
    let db = workspace.database("orders.db", ORDERS_DDL);
    let token = CancelToken::new();
    let trigger = token.clone();
    let mut progress = move |p: Progress| {
        if p.unit == 2 {
            trigger.cancel();
        }
    };
    let mut writer = BatchWriter::new(
        SqliteStore::open(&db).unwrap(),
        catalog(),
        LoaderConfig::default(),
    );

    let outcome = writer
        .write(
            "orders",
            &orders("SO", 10),
            WriteOptions::default()
                .batch_size(2)
                .progress(&mut progress)
                .cancel(token),
        )
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.units_committed, 2);
    assert_eq!(outcome.units_total, 5);
    assert_eq!(outcome.committed, 4);
    assert_eq!(writer.state(), WriterState::Completed);
    assert_eq!(count_rows(&db, "logistics_orders"), 4);
}

#[test]
fn table_name_override_redirects_writes() {
    let workspace = TestWorkspace::new();
    let db = workspace.database(
        "orders.db",
        &ORDERS_DDL.replace("logistics_orders", "orders_staging"),
    );
    let config = LoaderConfig::default().with_table_name("orders", "orders_staging");
    let mut writer = BatchWriter::new(SqliteStore::open(&db).unwrap(), catalog(), config);

    let outcome = writer
        .write("orders", &orders("SO", 2), WriteOptions::default())
        .unwrap();

    assert_eq!(outcome.table, "orders_staging");
    assert_eq!(count_rows(&db, "orders_staging"), 2);
}
