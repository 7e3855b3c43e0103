//! PostgreSQL integration tests.
//!
//! All tests share one container. Each test works on fresh aggregate ids,
//! so they can run in parallel:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration
//! ```

use std::sync::Arc;

use event_store::{
    AggregateChanges, AggregateId, AppendOptions, EventEnvelope, EventQuery, EventStore,
    EventStoreExt, PostgresEventStore, Version,
};
use futures_util::StreamExt;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_events_table.sql"
            ))
            .execute(&pool)
            .await
            .unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn test_store() -> PostgresEventStore {
    let info = container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();
    PostgresEventStore::new(pool)
}

fn event(aggregate_id: AggregateId, aggregate_type: &str, version: i64, event_type: &str) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type(aggregate_type)
        .event_type(event_type)
        .version(Version::new(version))
        .payload_raw(serde_json::json!({"quantity": version}))
        .metadata("unit_of_work", serde_json::json!("test"))
        .build()
        .unwrap()
}

#[tokio::test]
async fn append_and_read_back() {
    let store = test_store().await;
    let id = AggregateId::new();

    let version = store
        .append(
            vec![
                event(id, "ProductStock", 1, "StockRegistered"),
                event(id, "ProductStock", 2, "StockReserved"),
            ],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();
    assert_eq!(version, Version::new(2));

    let events = store.get_events_for_aggregate(id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event_type, "StockReserved");
    assert_eq!(events[0].metadata_str("unit_of_work"), Some("test"));
    assert!(store.aggregate_exists(id).await.unwrap());
}

#[tokio::test]
async fn stale_version_is_a_conflict() {
    let store = test_store().await;
    let id = AggregateId::new();
    store
        .append(vec![event(id, "Wallet", 1, "WalletCredited")], AppendOptions::expect_new())
        .await
        .unwrap();

    let err = store
        .append(vec![event(id, "Wallet", 1, "WalletDebited")], AppendOptions::expect_new())
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn unique_constraint_catches_unchecked_duplicates() {
    let store = test_store().await;
    let id = AggregateId::new();
    store
        .append(vec![event(id, "Wallet", 1, "WalletCredited")], AppendOptions::new())
        .await
        .unwrap();

    let err = store
        .append(vec![event(id, "Wallet", 1, "WalletCredited")], AppendOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn atomic_batch_commits_all_aggregates() {
    let store = test_store().await;
    let order = AggregateId::new();
    let stock = AggregateId::new();
    let wallet = AggregateId::new();

    store
        .append(vec![event(stock, "ProductStock", 1, "StockRegistered")], AppendOptions::expect_new())
        .await
        .unwrap();

    store
        .append_atomic(vec![
            AggregateChanges::new(Version::first(), vec![event(stock, "ProductStock", 2, "StockReserved")]),
            AggregateChanges::new(Version::initial(), vec![event(wallet, "Wallet", 1, "WalletDebited")]),
            AggregateChanges::new(Version::initial(), vec![event(order, "Order", 1, "OrderPlaced")]),
        ])
        .await
        .unwrap();

    assert_eq!(store.get_aggregate_version(stock).await.unwrap(), Some(Version::new(2)));
    assert_eq!(store.get_aggregate_version(wallet).await.unwrap(), Some(Version::first()));
    assert_eq!(store.get_aggregate_version(order).await.unwrap(), Some(Version::first()));
}

#[tokio::test]
async fn atomic_batch_rolls_back_on_conflict() {
    let store = test_store().await;
    let order = AggregateId::new();
    let stock = AggregateId::new();

    store
        .append(vec![event(stock, "ProductStock", 1, "StockRegistered")], AppendOptions::expect_new())
        .await
        .unwrap();

    let err = store
        .append_atomic(vec![
            AggregateChanges::new(Version::initial(), vec![event(order, "Order", 1, "OrderPlaced")]),
            AggregateChanges::new(Version::initial(), vec![event(stock, "ProductStock", 1, "StockReserved")]),
        ])
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert!(store.get_aggregate_version(order).await.unwrap().is_none());
    assert_eq!(store.get_aggregate_version(stock).await.unwrap(), Some(Version::first()));
}

#[tokio::test]
async fn query_by_aggregate_and_event_type() {
    let store = test_store().await;
    let sale = AggregateId::new();
    store
        .append(
            vec![
                event(sale, "Sale", 1, "SaleCreated"),
                event(sale, "Sale", 2, "SaleActivated"),
                event(sale, "Sale", 3, "SaleDeactivated"),
            ],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let events = store
        .query_events(
            EventQuery::for_aggregate(sale)
                .event_types(vec!["SaleActivated".into(), "SaleDeactivated".into()]),
        )
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "SaleActivated");

    let paged = store
        .query_events(EventQuery::for_aggregate(sale).limit(1).offset(2))
        .await
        .unwrap();
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].version, Version::new(3));

    let by_type = store.get_events_by_type("SaleCreated").await.unwrap();
    assert!(by_type.iter().any(|e| e.aggregate_id == sale));
}

#[tokio::test]
async fn stream_includes_appended_events_in_order() {
    let store = test_store().await;
    let id = AggregateId::new();
    store
        .append(
            vec![event(id, "Coupon", 1, "CouponCreated"), event(id, "Coupon", 2, "CouponUsageRecorded")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let mine: Vec<_> = store
        .stream_all_events()
        .await
        .unwrap()
        .filter_map(|e| async move { e.ok().filter(|e| e.aggregate_id == id) })
        .map(|e| e.version)
        .collect()
        .await;
    assert_eq!(mine, vec![Version::new(1), Version::new(2)]);
}
