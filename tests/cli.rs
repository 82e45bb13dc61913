mod common;

use std::fs;

use assert_cmd::Command;
use common::{ORDERS_DDL, TestWorkspace, count_rows};
use predicates::str::contains;

const ORDERS_CSV: &str = "\
order_no,recipient_name,receiver_phone,receiver_address,postal_code,sku,qty,unit_price,order_date
SO-1,Ada Lovelace,(555) 010-0100,12 Analytical Way,94107,ab 12,2,$12.50,2024-05-01
SO-2,,5550101,3 Missing Name St,94107,cd-34,1,3.00,2024-05-02
SO-3,Grace Hopper,,7 Compiler Ct,,ef-56,,,2024-05-03
,,,,,,,,
";

fn loader() -> Command {
    Command::cargo_bin("order-loader").expect("binary exists")
}

#[test]
fn import_writes_valid_rows_and_records_rejections() {
    let workspace = TestWorkspace::new();
    let db = workspace.database("orders.db", ORDERS_DDL);
    let input = workspace.write("orders.csv", ORDERS_CSV);
    let rejects = workspace.path().join("rejects.jsonl");

    loader()
        .args(["import", "-t", "orders", "-d"])
        .arg(&db)
        .arg("-i")
        .arg(&input)
        .arg("--rejects")
        .arg(&rejects)
        .args(["--batch-size", "1"])
        .assert()
        .success();

    assert_eq!(count_rows(&db, "logistics_orders"), 2);
    let conn = rusqlite::Connection::open(&db).unwrap();
    let (phone, sku, qty, status): (String, String, i64, String) = conn
        .query_row(
            "SELECT receiver_phone, sku, qty, status FROM logistics_orders WHERE order_no = 'SO-1'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();
    assert_eq!(phone, "5550100100");
    assert_eq!(sku, "AB12");
    assert_eq!(qty, 2);
    assert_eq!(status, "pending");
    let defaulted: i64 = conn
        .query_row(
            "SELECT qty FROM logistics_orders WHERE order_no = 'SO-3'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(defaulted, 1);

    let lines = fs::read_to_string(&rejects).unwrap();
    let rejected: Vec<serde_json::Value> = lines
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0]["row"], 2);
    assert_eq!(rejected[0]["record"]["order_id"], "SO-2");
}

#[test]
fn import_with_abort_on_reject_writes_nothing() {
    let workspace = TestWorkspace::new();
    let db = workspace.database("orders.db", ORDERS_DDL);
    let input = workspace.write("orders.csv", ORDERS_CSV);

    loader()
        .args(["import", "-t", "orders", "--abort-on-reject", "-d"])
        .arg(&db)
        .arg("-i")
        .arg(&input)
        .assert()
        .failure()
        .stderr(contains("Row 2 rejected"));

    assert_eq!(count_rows(&db, "logistics_orders"), 0);
}

#[test]
fn export_round_trips_persisted_headers() {
    let workspace = TestWorkspace::new();
    let db = workspace.database("orders.db", ORDERS_DDL);
    let input = workspace.write("orders.csv", ORDERS_CSV);
    let output = workspace.path().join("out.csv");

    loader()
        .args(["import", "-t", "orders", "-d"])
        .arg(&db)
        .arg("-i")
        .arg(&input)
        .assert()
        .success();
    loader()
        .args(["export", "-t", "orders", "-d"])
        .arg(&db)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();

    let exported = fs::read_to_string(&output).unwrap();
    let mut lines = exported.lines();
    assert_eq!(
        lines.next().unwrap(),
        "order_no,receiver_name,receiver_phone,receiver_address,postal_code,sku,qty,unit_price,order_date,status"
    );
    assert_eq!(
        lines.next().unwrap(),
        "SO-1,Ada Lovelace,5550100100,12 Analytical Way,94107,AB12,2,12.5,2024-05-01,pending"
    );
    assert_eq!(lines.count(), 1);
}

#[test]
fn truncate_first_replaces_previous_load() {
    let workspace = TestWorkspace::new();
    let db = workspace.database("orders.db", ORDERS_DDL);
    let input = workspace.write("orders.csv", ORDERS_CSV);

    for extra in [None, Some("--truncate-first")] {
        let mut cmd = loader();
        cmd.args(["import", "-t", "orders", "-d"])
            .arg(&db)
            .arg("-i")
            .arg(&input);
        if let Some(flag) = extra {
            cmd.arg(flag);
        }
        cmd.assert().success();
    }
    assert_eq!(count_rows(&db, "logistics_orders"), 2);

    loader()
        .args(["truncate", "-t", "orders", "-d"])
        .arg(&db)
        .assert()
        .success();
    assert_eq!(count_rows(&db, "logistics_orders"), 0);
}

#[test]
fn uncatalogued_table_imports_through_sample_columns() {
    let workspace = TestWorkspace::new();
    let db = workspace.database("stock.db", "CREATE TABLE stock_counts (sku TEXT, bin TEXT, counted TEXT)");
    let input = workspace.write("stock.tsv", "sku\tbin\tcounted\nA1\tB-07\t12\nA2\t\t3\n");

    loader()
        .args(["import", "-t", "stock_counts", "-d"])
        .arg(&db)
        .arg("-i")
        .arg(&input)
        .assert()
        .success();
    assert_eq!(count_rows(&db, "stock_counts"), 2);

    loader()
        .args(["export", "-t", "stock_counts", "-d"])
        .arg(&db)
        .assert()
        .success()
        .stdout(contains("sku,bin,counted"))
        .stdout(contains("A1,B-07,12"));
}

#[test]
fn blank_cell_in_first_row_keeps_the_column_for_later_rows() {
    let workspace = TestWorkspace::new();
    let db = workspace.database("stock.db", "CREATE TABLE stock_counts (sku TEXT, bin TEXT)");
    let input = workspace.write("stock.csv", "sku,bin\nA1,\nA2,B-07\n");

    loader()
        .args(["import", "-t", "stock_counts", "-d"])
        .arg(&db)
        .arg("-i")
        .arg(&input)
        .assert()
        .success();

    loader()
        .args(["export", "-t", "stock_counts", "-d"])
        .arg(&db)
        .assert()
        .success()
        .stdout(contains("A2,B-07"));
}

#[test]
fn table_name_with_keyword_is_rejected() {
    let workspace = TestWorkspace::new();
    let db = workspace.database("orders.db", ORDERS_DDL);
    let input = workspace.write("orders.csv", ORDERS_CSV);

    loader()
        .args(["import", "-t", "orders", "--table-name", "orders=ORDERS_DROP_ARCHIVE", "-d"])
        .arg(&db)
        .arg("-i")
        .arg(&input)
        .assert()
        .failure()
        .stderr(contains("ORDERS_DROP_ARCHIVE"));
}

#[test]
fn resolve_prints_fallback_columns_from_sample() {
    let workspace = TestWorkspace::new();
    let sample = workspace.write("stock.csv", "sku,bin\nA1,B-07\n");

    loader()
        .args(["resolve", "-t", "stock_counts", "--sample"])
        .arg(&sample)
        .assert()
        .success()
        .stdout(contains("table_name: stock_counts"))
        .stdout(contains("persisted_name: bin"))
        .stdout(contains("kind: from_sample"));

    loader()
        .args(["resolve", "-t", "stock_counts"])
        .assert()
        .failure()
        .stderr(contains("stock_counts"));
}

#[test]
fn check_catalog_reports_tables_and_fails_on_broken_catalog() {
    let workspace = TestWorkspace::new();
    loader()
        .arg("check-catalog")
        .assert()
        .success()
        .stdout(contains("orders -> logistics_orders"))
        .stdout(contains("shipments -> shipment_tracking"));

    let broken = workspace.write(
        "broken.yaml",
        "tables:\n  parcels:\n    table_name: parcels\n    columns:\n      a: { db_column: x }\n      b: { db_column: X }\n",
    );
    loader()
        .args(["check-catalog", "-c"])
        .arg(&broken)
        .assert()
        .failure()
        .stderr(contains("parcels"));
}
