//! Driver seam over sqlx's Any pool.
//!
//! The DSN scheme selects the concrete driver (sqlite, postgres, mysql) and
//! every operation is bounded by the scrape deadline.

use crate::error::ScrapeError;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Column, Connection, Executor, Row, TypeInfo};
use std::sync::Once;
use tokio::time::{timeout_at, Instant};

static DRIVERS: Once = Once::new();

/// Registers the compiled-in sqlx drivers. Safe to call more than once.
pub fn install_drivers() {
    DRIVERS.call_once(sqlx::any::install_default_drivers);
}

/// Opens a connection pool for the given DSN. The pool establishes its first
/// connection eagerly, so a down target fails here rather than on first use.
pub async fn open(
    dsn: &str,
    max_connections: u32,
    deadline: Instant,
) -> Result<AnyPool, ScrapeError> {
    install_drivers();
    let options = AnyPoolOptions::new().max_connections(max_connections);
    match timeout_at(deadline, options.connect(dsn)).await {
        Ok(Ok(pool)) => Ok(pool),
        Ok(Err(err)) => Err(ScrapeError::Connection(err.to_string())),
        Err(_) => Err(ScrapeError::Deadline("opening connection".to_string())),
    }
}

/// Probes liveness of an open pool.
pub async fn ping(pool: &AnyPool, deadline: Instant) -> Result<(), ScrapeError> {
    let probe = async {
        let mut conn = pool.acquire().await?;
        conn.ping().await
    };
    match timeout_at(deadline, probe).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(ScrapeError::Connection(err.to_string())),
        Err(_) => Err(ScrapeError::Deadline("pinging target".to_string())),
    }
}

/// Executes a statement and returns the full row set.
pub async fn fetch_rows(
    pool: &AnyPool,
    sql: &str,
    deadline: Instant,
) -> Result<Vec<AnyRow>, ScrapeError> {
    match timeout_at(deadline, sqlx::query(sql).fetch_all(pool)).await {
        Ok(Ok(rows)) => Ok(rows),
        Ok(Err(err)) => Err(ScrapeError::Query(err.to_string())),
        Err(_) => Err(ScrapeError::Deadline("executing query".to_string())),
    }
}

/// Reports the result-set columns of a statement without fetching rows, by
/// preparing it driver-side.
pub async fn describe_columns(
    pool: &AnyPool,
    sql: &str,
    deadline: Instant,
) -> Result<Vec<String>, ScrapeError> {
    match timeout_at(deadline, pool.describe(sql)).await {
        Ok(Ok(statement)) => Ok(statement
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect()),
        Ok(Err(err)) => Err(ScrapeError::Query(err.to_string())),
        Err(_) => Err(ScrapeError::Deadline("describing query".to_string())),
    }
}

/// A loosely typed cell as returned by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// A driver type the exporter cannot interpret; carries the type name.
    Unsupported(String),
}

impl CellValue {
    /// Key-column rendering. NULLs map to the empty string.
    pub fn as_label(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(v) => v.to_string(),
            CellValue::Int(v) => v.to_string(),
            CellValue::Float(v) => v.to_string(),
            CellValue::Text(v) => v.clone(),
            CellValue::Unsupported(_) => String::new(),
        }
    }

    /// Value-column conversion. Integers and numeric text (fixed-point
    /// decimals arrive as text from some drivers) become doubles.
    pub fn as_sample_value(&self) -> Result<f64, String> {
        match self {
            CellValue::Null => Err("NULL value".to_string()),
            CellValue::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            CellValue::Int(v) => Ok(*v as f64),
            CellValue::Float(v) => Ok(*v),
            CellValue::Text(v) => v
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("cannot parse {:?} as a number", v)),
            CellValue::Unsupported(type_name) => {
                Err(format!("unsupported column type {}", type_name))
            }
        }
    }
}

/// Decodes one cell. The Any driver rejects decodes whose value kind does
/// not match, so each representation is tried in turn.
pub fn decode_cell(row: &AnyRow, index: usize) -> CellValue {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map_or(CellValue::Null, CellValue::Int);
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value.map_or(CellValue::Null, CellValue::Float);
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return value.map_or(CellValue::Null, CellValue::Bool);
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value.map_or(CellValue::Null, CellValue::Text);
    }
    CellValue::Unsupported(row.column(index).type_info().name().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_label() {
        assert_eq!(CellValue::Null.as_label(), "");
        assert_eq!(CellValue::Bool(true).as_label(), "true");
        assert_eq!(CellValue::Int(42).as_label(), "42");
        assert_eq!(CellValue::Float(1.5).as_label(), "1.5");
        assert_eq!(CellValue::Text("x".to_string()).as_label(), "x");
    }

    #[test]
    fn test_as_sample_value() {
        assert_eq!(CellValue::Int(42).as_sample_value(), Ok(42.0));
        assert_eq!(CellValue::Float(1.5).as_sample_value(), Ok(1.5));
        assert_eq!(CellValue::Bool(true).as_sample_value(), Ok(1.0));
        assert_eq!(CellValue::Bool(false).as_sample_value(), Ok(0.0));
        assert_eq!(
            CellValue::Text("3.25".to_string()).as_sample_value(),
            Ok(3.25)
        );
        assert!(CellValue::Null.as_sample_value().is_err());
        assert!(CellValue::Text("abc".to_string()).as_sample_value().is_err());
        assert!(CellValue::Unsupported("BLOB".to_string())
            .as_sample_value()
            .is_err());
    }

    #[tokio::test]
    async fn test_open_and_ping_sqlite() {
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        let pool = open("sqlite::memory:", 1, deadline).await.unwrap();
        ping(&pool, deadline).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_unreachable_target() {
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        let result = open("sqlite:///nonexistent-dir/missing.db?mode=ro", 1, deadline).await;
        assert!(matches!(result, Err(ScrapeError::Connection(_))));
    }

    #[tokio::test]
    async fn test_fetch_rows_decodes_cells() {
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        let pool = open("sqlite::memory:", 1, deadline).await.unwrap();
        let rows = fetch_rows(
            &pool,
            "SELECT 1 AS i, 1.5 AS f, 'x' AS t, NULL AS n",
            deadline,
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(decode_cell(&rows[0], 0), CellValue::Int(1));
        assert_eq!(decode_cell(&rows[0], 1), CellValue::Float(1.5));
        assert_eq!(decode_cell(&rows[0], 2), CellValue::Text("x".to_string()));
        assert_eq!(decode_cell(&rows[0], 3), CellValue::Null);
    }

    #[tokio::test]
    async fn test_describe_columns() {
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        let pool = open("sqlite::memory:", 1, deadline).await.unwrap();
        let columns = describe_columns(&pool, "SELECT 1 AS a, 2 AS b WHERE 1 = 0", deadline)
            .await
            .unwrap();
        assert_eq!(columns, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_rows_query_error() {
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        let pool = open("sqlite::memory:", 1, deadline).await.unwrap();
        let result = fetch_rows(&pool, "SELECT * FROM no_such_table", deadline).await;
        assert!(matches!(result, Err(ScrapeError::Query(_))));
    }
}
