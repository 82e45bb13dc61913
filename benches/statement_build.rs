use std::sync::Arc;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use order_loader::catalog::MappingCatalog;
use order_loader::config::LoaderConfig;
use order_loader::data::Value;
use order_loader::record::Record;
use order_loader::resolver::resolve;
use order_loader::statement::StatementBuilder;
use order_loader::store::SqliteStore;
use order_loader::writer::{BatchWriter, WriteOptions};

const ORDERS_DDL: &str = "CREATE TABLE logistics_orders (order_no TEXT, receiver_name TEXT, \
    receiver_phone TEXT, receiver_address TEXT, postal_code TEXT, sku TEXT, qty INTEGER, \
    unit_price TEXT, order_date TEXT, status TEXT)";

fn generate_orders(rows: usize) -> Vec<Record> {
    (0..rows)
        .map(|i| {
            let day = (i % 28) + 1;
            Record::new()
                .with("order_id", format!("SO-{i}"))
                .with("recipient_name", "Ada Lovelace")
                .with("phone", "5550100")
                .with("address", format!("{i} Analytical Way"))
                .with("product_code", format!("SKU{:04}", i % 500))
                .with("quantity", Value::Integer((i % 9 + 1) as i64))
                .with("unit_price", "19.99")
                .with("order_date", format!("2024-01-{day:02}"))
        })
        .collect()
}

fn bench_statement_build(c: &mut Criterion) {
    let catalog = Arc::new(MappingCatalog::builtin().expect("builtin catalog"));
    let table = resolve("orders", &catalog, None).expect("resolve orders");
    let records = generate_orders(10_000);
    let builder = StatementBuilder::default();

    let mut group = c.benchmark_group("orders");

    group.bench_function("build_inserts", |b| {
        b.iter(|| {
            for record in &records {
                builder.insert(&table, record).expect("insert");
            }
        });
    });

    for batch_size in [100usize, 1_000] {
        group.bench_function(format!("write_sqlite_batch_{batch_size}"), |b| {
            b.iter_batched(
                || {
                    let store = SqliteStore::in_memory().expect("in-memory store");
                    store.execute_batch(ORDERS_DDL).expect("schema");
                    BatchWriter::new(store, Arc::clone(&catalog), LoaderConfig::default())
                },
                |mut writer| {
                    writer
                        .write("orders", &records, WriteOptions::default().batch_size(batch_size))
                        .expect("write");
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_statement_build);
criterion_main!(benches);
