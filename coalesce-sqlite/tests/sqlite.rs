// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use assert2::check;
use coalesce::{
    CoalesceConfig, CounterStore, DomainCounters, DomainId, PasteId, ShortUrlId, StoreError,
};
use coalesce_sqlite::SqliteCounterStore;
use rstest::rstest;
use sqlx::SqlitePool;

const DOMAIN: &str = "files.example.com";

async fn pool_with_rows() -> SqlitePool {
    let pool = coalesce_sqlite::open_in_memory().await.unwrap();
    for (id, domain) in [("p_1", DOMAIN), ("p_2", DOMAIN), ("p_1", "other.example.com")] {
        sqlx::query("INSERT INTO pastes (id, domain) VALUES (?, ?)")
            .bind(id)
            .bind(domain)
            .execute(&pool)
            .await
            .unwrap();
    }
    sqlx::query("INSERT INTO urls (id, domain, visits) VALUES ('go', ?, 10)")
        .bind(DOMAIN)
        .execute(&pool)
        .await
        .unwrap();
    pool
}

#[tokio::test]
async fn increments_only_the_scoped_row() {
    let pool = pool_with_rows().await;
    let views = SqliteCounterStore::views(pool.clone(), DomainId::new(DOMAIN));
    let other = SqliteCounterStore::views(pool, DomainId::new("other.example.com"));

    views.increment_counter(&PasteId::new("p_1"), 4).await.unwrap();
    views.increment_counter(&PasteId::new("p_1"), 1).await.unwrap();

    check!(views.read_counter(&PasteId::new("p_1")).await.unwrap() == Some(5));
    check!(views.read_counter(&PasteId::new("p_2")).await.unwrap() == Some(0));
    check!(other.read_counter(&PasteId::new("p_1")).await.unwrap() == Some(0));
}

#[tokio::test]
async fn visits_add_to_the_existing_value() {
    let pool = pool_with_rows().await;
    let visits = SqliteCounterStore::visits(pool, DomainId::new(DOMAIN));

    visits.increment_counter(&ShortUrlId::new("go"), 7).await.unwrap();
    check!(visits.read_counter(&ShortUrlId::new("go")).await.unwrap() == Some(17));
}

#[rstest]
#[case::deleted("p_404", DOMAIN)]
#[case::other_domain("p_2", "other.example.com")]
#[tokio::test]
async fn missing_row_is_not_found(#[case] id: &str, #[case] domain: &str) {
    let pool = pool_with_rows().await;
    let views = SqliteCounterStore::views(pool, DomainId::new(domain));

    let result = views.increment_counter(&PasteId::new(id), 1).await;
    check!(let Err(StoreError::NotFound) = result);
    check!(views.read_counter(&PasteId::new(id)).await.unwrap() == None);
}

#[tokio::test]
async fn closed_pool_is_unavailable() {
    let pool = pool_with_rows().await;
    let views = SqliteCounterStore::views(pool.clone(), DomainId::new(DOMAIN));
    pool.close().await;

    let result = views.increment_counter(&PasteId::new("p_1"), 1).await;
    check!(let Err(StoreError::Unavailable(_)) = result);
}

#[tokio::test]
async fn ensure_schema_is_idempotent() {
    let pool = pool_with_rows().await;
    coalesce_sqlite::ensure_schema(&pool).await.unwrap();

    let views = SqliteCounterStore::views(pool, DomainId::new(DOMAIN));
    views.increment_counter(&PasteId::new("p_2"), 2).await.unwrap();
    check!(views.read_counter(&PasteId::new("p_2")).await.unwrap() == Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn domain_counters_flush_into_sqlite() {
    let pool = pool_with_rows().await;
    let domain = DomainId::new(DOMAIN);
    let views = SqliteCounterStore::views(pool.clone(), domain.clone());
    let visits = SqliteCounterStore::visits(pool, domain.clone());
    let config = CoalesceConfig {
        views_flush_interval_ms: 20,
        visits_flush_interval_ms: 20,
        ..Default::default()
    };
    let counters = DomainCounters::start(domain, views.clone(), visits.clone(), &config).unwrap();

    for _ in 0..50 {
        counters.record_view(PasteId::new("p_1"));
        counters.record_visit(ShortUrlId::new("go"));
    }
    // deleted between the event and the flush
    counters.record_view(PasteId::new("p_gone"));

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let viewed = views.read_counter(&PasteId::new("p_1")).await.unwrap();
            let visited = visits.read_counter(&ShortUrlId::new("go")).await.unwrap();
            let dropped = counters.view_stats().is_some_and(|s| s.keys_not_found == 1);
            if viewed == Some(50) && visited == Some(60) && dropped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("counters should reach the database");

    counters.shutdown().await;
    let stats = counters.view_stats().unwrap();
    // a tick may split the events over two flushes
    check!(stats.keys_applied >= 1);
    check!(stats.keys_not_found == 1);
    check!(stats.keys_failed == 0);
}
