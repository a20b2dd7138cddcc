//! Flow tests from raw register rows to the in-memory sink.

use chrono::NaiveDate;
use resa_adapters::{RawSaleRow, RawVisitorRow};
use resa_sink::{MemoryStore, Uploader, ALL_ROWS_FILTER, SALES_TABLE, VISITORS_TABLE};
use resa_sync::{
    aggregate, sale_rows, transform_sales, transform_visitors, validate_store_revenue,
    visitor_rows, ValidationConfig,
};

fn mk_sale(day: u32, revenue: f64, recorder: &str, line_no: i64) -> RawSaleRow {
    RawSaleRow {
        period: format!("4025-12-{day:02} 12:00:00"),
        warehouse: Some("Склад Большевиков".to_string()),
        parent_group: Some("Большевиков".to_string()),
        product: Some("Обувь жен".to_string()),
        unit: Some("шт".to_string()),
        quantity: Some(1.0),
        revenue: Some(revenue),
        recorder: Some(recorder.to_string()),
        line_no: Some(line_no),
    }
}

fn mk_visitor(date: &str, store: &str, count: f64) -> RawVisitorRow {
    RawVisitorRow {
        visit_date: date.to_string(),
        store: Some(store.to_string()),
        visitor_count: Some(count),
    }
}

#[tokio::test]
async fn sales_flow_dedups_duplicate_lines_and_stays_idempotent() {
    // 95 distinct transaction lines plus 5 repeats of already-seen lines.
    let mut rows = Vec::new();
    for i in 0..95usize {
        rows.push(mk_sale(
            1 + (i % 28) as u32,
            7_766.61,
            &format!("DOC{:03}", i / 5),
            (i % 5) as i64,
        ));
    }
    for i in 0..5usize {
        rows.push(mk_sale(1, 7_766.61, &format!("DOC{i:03}"), 0));
    }

    let (records, counts) = transform_sales(&rows);
    assert_eq!(counts.fetched, 100);
    assert_eq!(counts.transformed, 100);
    assert_eq!(counts.skipped(), 0);

    let set = aggregate(&records);
    validate_store_revenue(&set.by_store, &ValidationConfig::default()).unwrap();

    let store = MemoryStore::new();
    let uploader = Uploader::new(40);
    let keyed = sale_rows(&records).unwrap();
    let report = uploader
        .full_replace(&store, SALES_TABLE, ALL_ROWS_FILTER, keyed)
        .await
        .unwrap();
    assert_eq!(report.uploaded, 95);
    assert_eq!(report.errors, 0);
    assert_eq!(store.row_count(SALES_TABLE).await, 95);

    // Running the same replace again lands on the same state.
    let keyed = sale_rows(&records).unwrap();
    let second = uploader
        .full_replace(&store, SALES_TABLE, ALL_ROWS_FILTER, keyed)
        .await
        .unwrap();
    assert_eq!(second.uploaded, 95);
    assert_eq!(second.errors, 0);
    assert_eq!(store.row_count(SALES_TABLE).await, 95);
}

#[tokio::test]
async fn visitor_flow_upserts_on_date_and_store() {
    let store = MemoryStore::new();
    let uploader = Uploader::new(10);

    let first_batch = [
        mk_visitor("4026-01-05", "Озерки", 120.0),
        mk_visitor("4026-01-05", "Гавань", 80.0),
    ];
    let (records, _) = transform_visitors(&first_batch);
    uploader
        .upsert(
            &store,
            VISITORS_TABLE,
            "visit_date,store",
            visitor_rows(&records).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(store.row_count(VISITORS_TABLE).await, 2);

    // A re-extract revises one day and adds another.
    let second_batch = [
        mk_visitor("4026-01-05", "Озерки", 131.0),
        mk_visitor("4026-01-06", "Озерки", 95.0),
    ];
    let (records, _) = transform_visitors(&second_batch);
    uploader
        .upsert(
            &store,
            VISITORS_TABLE,
            "visit_date,store",
            visitor_rows(&records).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(store.row_count(VISITORS_TABLE).await, 3);
    let revised = store
        .rows(VISITORS_TABLE)
        .await
        .into_iter()
        .find(|row| {
            row["visit_date"] == "2026-01-05" && row["store"] == "Озерки"
        })
        .unwrap();
    assert_eq!(revised["visitor_count"], 131.0);
    assert_eq!(
        records[0].visit_date,
        NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
    );
}
