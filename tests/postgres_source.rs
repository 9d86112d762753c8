// Tests against a live PostgreSQL. Run with `cargo test -- --ignored` and
// POSTGRES_WAREHOUSE_SYNC_TEST_DB_URL pointing at a server that allows CREATE DATABASE.

mod common;

use common::setup_test_db;
use postgres_warehouse_sync::source::{Cursor, ExtractRequest, PostgresSource, SourceExtractor};
use postgres_warehouse_sync::testing::RecordingWarehouse;
use postgres_warehouse_sync::batch::value_to_text;
use postgres_warehouse_sync::{EngineConfig, ReplicationEngine, ReplicationJob, Table};
use serde_json::json;
use serial_test::serial;

fn seed(db: &common::TestDb) {
    db.pool
        .get()
        .unwrap()
        .batch_execute(
            "INSERT INTO orders VALUES
                (1, 'ada', 10.50, '{\"tags\": [\"a\"]}', '2024-01-01 09:00:00'),
                (2, 'bob', NULL, NULL, '2024-01-01 10:00:00'),
                (3, 'cy', 7.25, '{}', '2024-01-02 08:30:00'),
                (4, 'dee', 1.00, NULL, NULL)",
        )
        .unwrap();
}

#[test]
#[ignore]
#[serial]
fn test_describe_table_reads_information_schema() {
    let db = setup_test_db();
    let mut source = PostgresSource::from_pool(&db.pool).unwrap();
    let columns = source.describe_table(&Table::new("public", "orders")).unwrap();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "customer", "amount", "details", "updated_at"]);
    assert_eq!(columns[1].source_type, "character varying");
    assert_eq!(columns[1].max_length, Some(64));
    assert!(!columns[1].nullable);
    assert_eq!(columns[4].source_type, "timestamp without time zone");

    let missing = source.describe_table(&Table::new("public", "nope")).unwrap();
    assert!(missing.is_empty());
}

#[test]
#[ignore]
#[serial]
fn test_primary_key_orders_offset_pages() {
    let db = setup_test_db();
    let mut client = db.pool.get().unwrap();
    client
        .batch_execute(
            "CREATE TABLE lines (order_id INT, line INT, sku TEXT, PRIMARY KEY (order_id, line));
             CREATE TABLE events (payload TEXT)",
        )
        .unwrap();
    assert_eq!(
        Table::new("public", "lines").get_primary_key(&mut *client).unwrap(),
        vec!["order_id", "line"]
    );
    assert!(Table::new("public", "events").get_primary_key(&mut *client).unwrap().is_empty());
    drop(client);

    seed(&db);
    let table = Table::new("public", "orders");
    let mut source = PostgresSource::from_pool(&db.pool).unwrap();
    let mut ids = Vec::new();
    for offset in [0u64, 2] {
        let rows = source
            .extract(&ExtractRequest {
                table: &table,
                batch_size: 2,
                cursor: Cursor::Offset(offset),
            })
            .unwrap();
        ids.extend(rows.iter().map(|r| r["id"].as_i64().unwrap()));
    }
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[test]
#[ignore]
#[serial]
fn test_extract_pages_and_filters() {
    let db = setup_test_db();
    seed(&db);
    let table = Table::new("public", "orders");
    let mut source = PostgresSource::from_pool(&db.pool).unwrap();
    let columns = source.describe_table(&table).unwrap();

    let mut seen = 0;
    for offset in [0u64, 2, 4] {
        seen += source
            .extract(&ExtractRequest {
                table: &table,
                batch_size: 2,
                cursor: Cursor::Offset(offset),
            })
            .unwrap()
            .len();
    }
    assert_eq!(seen, 4);

    let watermark = json!("2024-01-01T09:00:00");
    let rows = source
        .extract(&ExtractRequest {
            table: &table,
            batch_size: 10,
            cursor: Cursor::After {
                column: &columns[4],
                watermark: Some(&watermark),
            },
        })
        .unwrap();
    let ids: Vec<i64> = rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![2, 3]);
    assert_eq!(rows[0]["amount"], serde_json::Value::Null);
    assert_eq!(rows[1]["updated_at"], json!("2024-01-02T08:30:00"));
}

#[test]
#[ignore]
#[serial]
fn test_incremental_run_from_live_source() {
    let db = setup_test_db();
    seed(&db);
    let mut source = PostgresSource::from_pool(&db.pool).unwrap();
    let mut target = RecordingWarehouse::new();
    let config = EngineConfig::direct();
    let job = ReplicationJob::incremental(Table::new("public", "orders"), "updated_at", None)
        .with_batch_size(2);
    let summary = ReplicationEngine::new(&mut source, &mut target, None, &config)
        .unwrap()
        .replicate(&job)
        .unwrap();
    assert!(summary.success);
    assert_eq!(summary.final_watermark, Some(json!("2024-01-02T08:30:00")));
    assert_eq!(target.truncates, 0);
    assert_eq!(target.rows[0]["details"], json!({"tags": ["a"]}));
}

#[test]
#[ignore]
#[serial]
fn test_wide_numerics_extract_exactly() {
    let db = setup_test_db();
    db.pool
        .get()
        .unwrap()
        .batch_execute(
            "CREATE TABLE ledger (id INT PRIMARY KEY, amount NUMERIC(38, 10));
             INSERT INTO ledger VALUES (1, 12345678901234567.1234567891)",
        )
        .unwrap();
    let mut source = PostgresSource::from_pool(&db.pool).unwrap();
    let rows = source
        .extract(&ExtractRequest {
            table: &Table::new("public", "ledger"),
            batch_size: 10,
            cursor: Cursor::Offset(0),
        })
        .unwrap();
    assert_eq!(
        value_to_text(&rows[0]["amount"]).as_deref(),
        Some("12345678901234567.1234567891")
    );
}
