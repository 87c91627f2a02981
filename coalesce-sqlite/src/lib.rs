// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

use std::{fmt, marker::PhantomData};

use coalesce_core::{CounterStore, DomainId, PasteId, ShortUrlId, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// The table and column a store writes to.
struct Target {
    name: &'static str,
    increment: &'static str,
    read: &'static str,
}

static VIEWS: Target = Target {
    name: "pastes.views",
    increment: "UPDATE pastes SET views = views + ? WHERE id = ? AND domain = ?",
    read: "SELECT views FROM pastes WHERE id = ? AND domain = ?",
};

static VISITS: Target = Target {
    name: "urls.visits",
    increment: "UPDATE urls SET visits = visits + ? WHERE id = ? AND domain = ?",
    read: "SELECT visits FROM urls WHERE id = ? AND domain = ?",
};

const SCHEMA: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS pastes (
        id TEXT NOT NULL,
        domain TEXT NOT NULL,
        views INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (domain, id)
    )",
    "CREATE TABLE IF NOT EXISTS urls (
        id TEXT NOT NULL,
        domain TEXT NOT NULL,
        visits INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (domain, id)
    )",
];

/// A [`CounterStore`] that increments one counter column of a SQLite table, scoped to one
/// domain.
///
/// Cloning is cheap; clones share the connection pool.
pub struct SqliteCounterStore<K> {
    pool: SqlitePool,
    domain: DomainId,
    target: &'static Target,
    _key: PhantomData<fn(&K)>,
}

impl SqliteCounterStore<PasteId> {
    /// Store for paste view counts (`pastes.views`) of `domain`.
    pub fn views(pool: SqlitePool, domain: DomainId) -> Self {
        Self::new(pool, domain, &VIEWS)
    }
}

impl SqliteCounterStore<ShortUrlId> {
    /// Store for short URL visit counts (`urls.visits`) of `domain`.
    pub fn visits(pool: SqlitePool, domain: DomainId) -> Self {
        Self::new(pool, domain, &VISITS)
    }
}

impl<K: AsRef<str>> SqliteCounterStore<K> {
    fn new(pool: SqlitePool, domain: DomainId, target: &'static Target) -> Self {
        Self {
            pool,
            domain,
            target,
            _key: PhantomData,
        }
    }

    /// The domain this store is scoped to.
    pub fn domain(&self) -> &DomainId {
        &self.domain
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current value of the counter for `key`, or `None` if its row doesn't exist in this domain.
    pub async fn read_counter(&self, key: &K) -> Result<Option<u64>, StoreError> {
        let value: Option<(i64,)> = sqlx::query_as(self.target.read)
            .bind(key.as_ref())
            .bind(self.domain.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(value.map(|(value,)| u64::try_from(value).unwrap_or(0)))
    }
}

impl<K: AsRef<str> + Sync> CounterStore<K> for SqliteCounterStore<K> {
    async fn increment_counter(&self, key: &K, amount: u64) -> Result<(), StoreError> {
        // SQLite integers are signed 64-bit
        let amount = i64::try_from(amount).unwrap_or(i64::MAX);
        let result = sqlx::query(self.target.increment)
            .bind(amount)
            .bind(key.as_ref())
            .bind(self.domain.as_str())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

impl<K> Clone for SqliteCounterStore<K> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            domain: self.domain.clone(),
            target: self.target,
            _key: PhantomData,
        }
    }
}

impl<K> fmt::Debug for SqliteCounterStore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteCounterStore")
            .field("domain", &self.domain)
            .field("target", &self.target.name)
            .finish_non_exhaustive()
    }
}

/// Classify a [`sqlx::Error`] for the scheduler's statistics and logs.
pub fn store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(err.to_string())
        }
        err => StoreError::backend(err),
    }
}

/// Create the `pastes` and `urls` tables if they don't exist.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!("counter tables ready");
    Ok(())
}

/// Open a private in-memory database with the counter tables created.
///
/// The pool holds a single connection that is never recycled, since every connection to
/// `:memory:` is a separate database.
pub async fn open_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new().filename(":memory:");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    ensure_schema(&pool).await?;
    Ok(pool)
}
