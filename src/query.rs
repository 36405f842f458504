use crate::db::{self, CellValue};
use crate::error::ScrapeError;
use crate::metric::{MetricFamily, Sample};
use sqlx::{AnyPool, Column, Row};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One row of a query result, restricted to the declared columns.
#[derive(Debug, Clone)]
pub struct ResultRow {
    columns: Arc<[String]>,
    cells: Vec<CellValue>,
}

impl ResultRow {
    pub fn new(columns: Arc<[String]>, cells: Vec<CellValue>) -> ResultRow {
        ResultRow { columns, cells }
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|index| &self.cells[index])
    }
}

/// A bound query: SQL text plus every metric family it feeds.
///
/// One execution per collector invocation is shared by all dependent
/// families. The declared column set is the union of the dependents'
/// key_labels and values; all of them must be present in the result set.
pub struct Query {
    name: String,
    sql: String,
    columns: Arc<[String]>,
    families: Vec<Arc<MetricFamily>>,
    min_interval: Duration,
    last_run: Mutex<Option<Instant>>,
    column_indexes: Mutex<Option<(Vec<String>, Vec<usize>)>>,
    log_context: String,
}

impl Query {
    pub fn new(
        name: String,
        sql: String,
        columns: Vec<String>,
        families: Vec<Arc<MetricFamily>>,
        min_interval: Duration,
        log_context: &str,
    ) -> Query {
        let log_context = format!("{}, query={:?}", log_context, name);
        Query {
            name,
            sql,
            columns: columns.into(),
            families,
            min_interval,
            last_run: Mutex::new(None),
            column_indexes: Mutex::new(None),
            log_context,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the query once and streams the resulting samples. A skipped run
    /// (min-interval guard) emits one invalid metric per dependent family;
    /// a failed run emits a single invalid metric for the query.
    pub async fn collect(&self, pool: &AnyPool, deadline: Instant, ch: &mpsc::Sender<Sample>) {
        if let Err(remaining) = self.acquire_run_slot() {
            let error = ScrapeError::Query(format!(
                "skipped, min_interval not yet elapsed ({:?} remaining)",
                remaining
            ));
            for family in &self.families {
                let sample = Sample::invalid(family.log_context().to_string(), error.clone());
                if ch.send(sample).await.is_err() {
                    return;
                }
            }
            return;
        }

        match self.run(pool, deadline).await {
            Ok(rows) => {
                let mut samples = Vec::new();
                for row in &rows {
                    for family in &self.families {
                        family.collect_row(row, &mut samples);
                    }
                }
                for sample in samples {
                    if ch.send(sample).await.is_err() {
                        return;
                    }
                }
            }
            Err(error) => {
                let _ = ch
                    .send(Sample::invalid(self.log_context.clone(), error))
                    .await;
            }
        }
    }

    /// Checks the min-interval guard and claims the run slot atomically, so
    /// concurrent gathers cannot both execute within the interval.
    fn acquire_run_slot(&self) -> Result<(), Duration> {
        if self.min_interval.is_zero() {
            return Ok(());
        }
        let mut last_run = lock(&self.last_run);
        let now = Instant::now();
        if let Some(previous) = *last_run {
            let elapsed = now.duration_since(previous);
            if elapsed < self.min_interval {
                return Err(self.min_interval - elapsed);
            }
        }
        *last_run = Some(now);
        Ok(())
    }

    async fn run(&self, pool: &AnyPool, deadline: Instant) -> Result<Vec<ResultRow>, ScrapeError> {
        let rows = db::fetch_rows(pool, &self.sql, deadline).await?;
        // An empty row set still has a schema; recover it from the driver so
        // a missing declared column fails the run either way.
        let names: Vec<String> = match rows.first() {
            Some(row) => row
                .columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect(),
            None => db::describe_columns(pool, &self.sql, deadline).await?,
        };
        let indexes = self.bind_columns(names)?;
        Ok(rows
            .iter()
            .map(|row| {
                ResultRow::new(
                    self.columns.clone(),
                    indexes.iter().map(|&i| db::decode_cell(row, i)).collect(),
                )
            })
            .collect())
    }

    /// Maps declared column names to driver column indices. The mapping is
    /// cached and recomputed only when the result shape changes.
    fn bind_columns(&self, names: Vec<String>) -> Result<Vec<usize>, ScrapeError> {
        let mut cache = lock(&self.column_indexes);
        if let Some((shape, indexes)) = cache.as_ref() {
            if *shape == names {
                return Ok(indexes.clone());
            }
        }

        let mut indexes = Vec::with_capacity(self.columns.len());
        for declared in self.columns.iter() {
            match names.iter().position(|name| name == declared) {
                Some(index) => indexes.push(index),
                None => {
                    return Err(ScrapeError::Query(format!(
                        "column {:?} not found in result set (columns: {})",
                        declared,
                        names.join(", ")
                    )))
                }
            }
        }
        *cache = Some((names, indexes.clone()));
        Ok(indexes)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(min_interval: Duration) -> Query {
        Query::new(
            "q".to_string(),
            "SELECT 1 AS v".to_string(),
            vec!["v".to_string()],
            Vec::new(),
            min_interval,
            "test",
        )
    }

    #[test]
    fn test_result_row_lookup() {
        let row = ResultRow::new(
            vec!["k".to_string(), "v".to_string()].into(),
            vec![CellValue::Text("a".to_string()), CellValue::Int(1)],
        );
        assert_eq!(row.get("v"), Some(&CellValue::Int(1)));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_run_slot_without_min_interval() {
        let query = query(Duration::ZERO);
        assert!(query.acquire_run_slot().is_ok());
        assert!(query.acquire_run_slot().is_ok());
    }

    #[test]
    fn test_run_slot_enforces_min_interval() {
        let query = query(Duration::from_secs(3600));
        assert!(query.acquire_run_slot().is_ok());
        let remaining = query.acquire_run_slot().unwrap_err();
        assert!(remaining <= Duration::from_secs(3600));
        assert!(remaining > Duration::from_secs(3590));
    }
}
