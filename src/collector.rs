use crate::config::{CollectorConfig, GlobalConfig};
use crate::metric::{MetricFamily, Sample};
use crate::query::Query;
use sqlx::AnyPool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A named bundle of bound queries and metric families, instantiated per
/// target so that every descriptor carries the target's constant labels.
pub struct Collector {
    name: String,
    queries: Vec<Arc<Query>>,
}

impl Collector {
    pub fn from_config(
        collector: &CollectorConfig,
        const_labels: &[(String, String)],
        global: &GlobalConfig,
        log_context: &str,
    ) -> Collector {
        let log_context = format!("{}, collector={:?}", log_context, collector.collector_name);
        let min_interval = collector.min_interval.unwrap_or(global.min_interval);

        let families: Vec<Arc<MetricFamily>> = collector
            .metrics
            .iter()
            .map(|metric| Arc::new(MetricFamily::from_config(metric, const_labels, &log_context)))
            .collect();

        let queries = collector
            .bindings
            .iter()
            .map(|binding| {
                let dependents: Vec<Arc<MetricFamily>> = binding
                    .metrics
                    .iter()
                    .map(|&index| families[index].clone())
                    .collect();
                // Declared result schema: the union of the dependents'
                // key_labels and values, in declaration order.
                let mut columns: Vec<String> = Vec::new();
                for &index in &binding.metrics {
                    let metric = &collector.metrics[index];
                    for column in metric.key_labels.iter().chain(&metric.values) {
                        if !columns.iter().any(|c| c == column) {
                            columns.push(column.clone());
                        }
                    }
                }
                Arc::new(Query::new(
                    binding.query_name.clone(),
                    binding.sql.clone(),
                    columns,
                    dependents,
                    min_interval,
                    &log_context,
                ))
            })
            .collect();

        Collector {
            name: collector.collector_name.clone(),
            queries,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs every bound query once, streaming samples into the channel. A
    /// failing query surfaces one invalid metric and the next query proceeds.
    pub async fn collect(&self, pool: &AnyPool, deadline: Instant, ch: &mpsc::Sender<Sample>) {
        for query in &self.queries {
            query.collect(pool, deadline, ch).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_from_config_builds_bound_queries() {
        let config = Config::from_yaml(
            r#"
collectors:
  - collector_name: c
    queries:
      - query_name: shared
        query: SELECT k, a, b FROM t
    metrics:
      - metric_name: m1
        type: gauge
        help: h
        key_labels: [k]
        values: [a]
        query_ref: shared
      - metric_name: m2
        type: gauge
        help: h
        key_labels: [k]
        values: [b]
        query_ref: shared
      - metric_name: m3
        type: counter
        help: h
        values: [n]
        query: SELECT count(*) AS n FROM t
jobs:
  - job_name: j
    collectors: [c]
    static_configs:
      - targets:
          i: "sqlite::memory:"
"#,
        )
        .unwrap();

        let collector = Collector::from_config(
            &config.collectors[0],
            &[("job".to_string(), "j".to_string())],
            &config.global,
            "test",
        );
        assert_eq!(collector.name(), "c");
        assert_eq!(collector.queries.len(), 2);
        // The shared query is bound once, feeding both metrics.
        assert_eq!(collector.queries[0].name(), "shared");
        assert_eq!(collector.queries[1].name(), "m3");
    }
}
