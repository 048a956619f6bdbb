//! Embedded-OLAP backend driver (spec §4.5): a `sqlx` SQLite pool plus the
//! sample business dataset the catalog's `embedded-olap` connection queries
//! over. Treated as a single-writer resource (spec §5) via an internal
//! write mutex; reads share the pool.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, SqlitePool, TypeInfo};
use tokio::sync::Mutex;

use crate::backend::dialect::compile;
use crate::semantic::query::LogicalQuery;
use crate::utils::{AppError, AppResult};

pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub dialect_text: String,
    pub elapsed: std::time::Duration,
}

pub struct EmbeddedOlapDriver {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl EmbeddedOlapDriver {
    pub async fn connect(path: &str) -> AppResult<Self> {
        // `:memory:` opens a fresh, unshared database per pooled connection;
        // route it through a shared-cache URI and a single connection so the
        // whole pool (and every `seed_sample_data` / `execute` call) sees the
        // same in-memory database.
        let (options, max_connections) = if path == ":memory:" {
            let opts = SqliteConnectOptions::new()
                .filename("file::memory:?cache=shared")
                .create_if_missing(true)
                .shared_cache(true);
            (opts, 1)
        } else {
            (SqliteConnectOptions::new().filename(path).create_if_missing(true), 8)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| AppError::backend_error(format!("cannot open embedded database: {e}"), None))?;
        Ok(Self { pool, write_lock: Mutex::new(()) })
    }

    /// Seeds the sample schema this crate's demo catalog queries over. A
    /// real deployment points `connection.path` at an existing database and
    /// skips seeding.
    pub async fn seed_sample_data(&self) -> AppResult<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS customers (
                customer_id TEXT PRIMARY KEY,
                segment TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::backend_error(e.to_string(), None))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                customer_id TEXT NOT NULL,
                subscription_amount REAL NOT NULL,
                subscription_status TEXT NOT NULL,
                billing_frequency TEXT NOT NULL,
                snapshot_date TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::backend_error(e.to_string(), None))?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::backend_error(e.to_string(), None))?;
        if count > 0 {
            return Ok(());
        }

        let segments = ["Enterprise", "Mid-Market", "SMB"];
        for (i, segment) in segments.iter().enumerate() {
            let customer_id = format!("cust-{i}");
            sqlx::query("INSERT INTO customers (customer_id, segment) VALUES (?, ?)")
                .bind(&customer_id)
                .bind(*segment)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::backend_error(e.to_string(), None))?;

            for month in 0..13 {
                let date = normalize_month(2024, 11, month);
                let amount = 1000.0 + (i as f64) * 500.0;
                sqlx::query(
                    "INSERT INTO subscriptions (customer_id, subscription_amount, subscription_status, billing_frequency, snapshot_date) VALUES (?, ?, 'active', 'monthly', ?)",
                )
                .bind(&customer_id)
                .bind(amount)
                .bind(&date)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::backend_error(e.to_string(), None))?;
            }
        }
        Ok(())
    }

    /// Table -> column names, used by the planner for join inference and
    /// dimension resolution (spec §4.4).
    pub async fn introspect_columns(&self, tables: &[String]) -> AppResult<HashMap<String, Vec<String>>> {
        let mut out = HashMap::new();
        for table in tables {
            crate::utils::identifier::validate_identifier(table)?;
            let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::backend_error(e.to_string(), None))?;
            let columns = rows.iter().map(|r| r.get::<String, _>("name")).collect();
            out.insert(table.clone(), columns);
        }
        Ok(out)
    }

    pub async fn execute(&self, query: &LogicalQuery) -> AppResult<RowSet> {
        let compiled = compile(query);
        let started = Instant::now();
        let rows = sqlx::query_with(&compiled.text, compiled.arguments)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::backend_error(e.to_string(), Some(compiled.text.clone())))?;
        let elapsed = started.elapsed();

        let columns = if let Some(first) = rows.first() {
            first.columns().iter().map(|c| c.name().to_string()).collect()
        } else {
            query
                .dimension_projections
                .iter()
                .map(|p| p.alias.clone())
                .chain(std::iter::once(query.aggregate.alias.clone()))
                .collect()
        };

        let values = rows.iter().map(row_to_values).collect::<Vec<_>>();

        Ok(RowSet { columns, rows: values, dialect_text: compiled.text, elapsed })
    }
}

fn normalize_month(year: i32, start_month: u32, offset: u32) -> String {
    let total = start_month - 1 + offset;
    let year = year + (total / 12) as i32;
    let month = total % 12 + 1;
    format!("{year:04}-{month:02}-01")
}

fn row_to_values(row: &SqliteRow) -> Vec<Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| match col.type_info().name() {
            "REAL" => row.try_get::<f64, _>(i).map(Value::from).unwrap_or(Value::Null),
            "INTEGER" => row.try_get::<i64, _>(i).map(Value::from).unwrap_or(Value::Null),
            _ => row.try_get::<String, _>(i).map(Value::from).unwrap_or(Value::Null),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeds_and_introspects_sample_schema() {
        let driver = EmbeddedOlapDriver::connect(":memory:").await.unwrap();
        driver.seed_sample_data().await.unwrap();
        let columns =
            driver.introspect_columns(&["subscriptions".to_string(), "customers".to_string()]).await.unwrap();
        assert!(columns["subscriptions"].contains(&"subscription_amount".to_string()));
        assert!(columns["customers"].contains(&"segment".to_string()));
    }
}
