use crate::collector::Collector;
use crate::config::{CollectorConfig, GlobalConfig};
use crate::db;
use crate::error::ScrapeError;
use crate::metric::{MetricDesc, Sample};
use sqlx::AnyPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

const UP_METRIC_NAME: &str = "up";
const UP_METRIC_HELP: &str = "1 if the target is reachable, or 0 if the scrape failed";
const SCRAPE_DURATION_NAME: &str = "scrape_duration_seconds";
const SCRAPE_DURATION_HELP: &str = "How long it took to scrape the target in seconds";

/// A single database endpoint.
///
/// Owns the lazily opened connection pool, the constant label set
/// (`job`, `instance` and any static labels) and the `up` /
/// `scrape_duration_seconds` self-metrics. Collector failures surface as
/// invalid metrics and never abort the scrape.
pub struct Target {
    name: String,
    dsn: String,
    collectors: Vec<Arc<Collector>>,
    up_desc: Arc<MetricDesc>,
    scrape_duration_desc: Arc<MetricDesc>,
    max_connections: u32,
    log_context: String,
    // Unopened until the first successful probe; reused across scrapes.
    conn: Mutex<Option<AnyPool>>,
}

impl Target {
    pub fn new(
        job_name: &str,
        instance: &str,
        dsn: &str,
        extra_labels: &BTreeMap<String, String>,
        collectors: &[&CollectorConfig],
        global: &GlobalConfig,
    ) -> Target {
        let log_context = format!("job={:?}, target={:?}", job_name, instance);

        let mut const_labels: Vec<(String, String)> = vec![
            ("job".to_string(), job_name.to_string()),
            ("instance".to_string(), instance.to_string()),
        ];
        const_labels.extend(
            extra_labels
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );

        let collectors = collectors
            .iter()
            .map(|collector| {
                Arc::new(Collector::from_config(
                    collector,
                    &const_labels,
                    global,
                    &log_context,
                ))
            })
            .collect();

        let up_desc = Arc::new(MetricDesc::automatic(
            UP_METRIC_NAME,
            UP_METRIC_HELP,
            const_labels.clone(),
            &log_context,
        ));
        let scrape_duration_desc = Arc::new(MetricDesc::automatic(
            SCRAPE_DURATION_NAME,
            SCRAPE_DURATION_HELP,
            const_labels,
            &log_context,
        ));

        Target {
            name: instance.to_string(),
            dsn: dsn.to_string(),
            collectors,
            up_desc,
            scrape_duration_desc,
            max_connections: global.max_connections,
            log_context,
            conn: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scrapes the target: probe, collectors, self-metrics.
    pub async fn collect(&self, deadline: Instant, ch: mpsc::Sender<Sample>) {
        let scrape_start = Instant::now();

        let probe = self.ping(deadline).await;
        if let Err(error) = &probe {
            let sample = Sample::invalid(self.log_context.clone(), error.clone());
            if ch.send(sample).await.is_err() {
                return;
            }
        }
        // Export `up` as early as its value is known.
        let up = if probe.is_ok() { 1.0 } else { 0.0 };
        if ch
            .send(Sample::new(self.up_desc.clone(), up, Vec::new()))
            .await
            .is_err()
        {
            return;
        }

        // Don't bother with the collectors if the target is down.
        if let Ok(pool) = probe {
            let mut tasks = Vec::with_capacity(self.collectors.len());
            for collector in &self.collectors {
                let collector = collector.clone();
                let pool = pool.clone();
                let ch = ch.clone();
                tasks.push(tokio::spawn(async move {
                    collector.collect(&pool, deadline, &ch).await;
                }));
            }
            for task in tasks {
                let _ = task.await;
            }
        }

        let elapsed = scrape_start.elapsed().as_secs_f64();
        let _ = ch
            .send(Sample::new(
                self.scrape_duration_desc.clone(),
                elapsed,
                Vec::new(),
            ))
            .await;
    }

    /// Opens the pool on first use, then probes liveness. A failure during
    /// open leaves the handle unopened so the next scrape retries; once a
    /// pool exists it is kept across scrapes whatever the ping says.
    async fn ping(&self, deadline: Instant) -> Result<AnyPool, ScrapeError> {
        let pool = {
            let mut conn = self.conn.lock().await;
            match conn.as_ref() {
                Some(pool) => pool.clone(),
                None => {
                    let pool = db::open(&self.dsn, self.max_connections, deadline).await?;
                    *conn = Some(pool.clone());
                    pool
                }
            }
        };
        db::ping(&pool, deadline).await?;
        Ok(pool)
    }
}
