use crate::config::{CollectorConfig, Config};
use crate::db;
use crate::error::ScrapeError;
use crate::target::Target;
use anyhow::anyhow;
use prometheus::proto;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Capacity of the sample channel shared by all targets of one scrape.
/// Bounds memory under a slow consumer; a full channel blocks producers.
const SAMPLE_CHANNEL_CAPACITY: usize = 1000;

/// The scrape engine.
///
/// Holds the immutable configuration graph and its expanded target list;
/// every gather fans out over all targets under one shared deadline. Safe to
/// call concurrently: no per-scrape state lives outside the call.
pub struct Exporter {
    config: Config,
    targets: Vec<Arc<Target>>,
}

impl Exporter {
    pub fn from_file(path: &Path) -> anyhow::Result<Exporter> {
        Exporter::from_config(Config::load(path)?)
    }

    /// Expands the configuration's jobs and static configs into targets.
    pub fn from_config(config: Config) -> anyhow::Result<Exporter> {
        db::install_drivers();

        let mut targets = Vec::new();
        for job in &config.jobs {
            let collectors: Vec<&CollectorConfig> = job
                .collector_refs
                .iter()
                .map(|name| {
                    config.collector(name).ok_or_else(|| {
                        anyhow!("job {:?}: unknown collector {:?}", job.job_name, name)
                    })
                })
                .collect::<anyhow::Result<_>>()?;
            for static_config in &job.static_configs {
                for (instance, dsn) in &static_config.targets {
                    targets.push(Arc::new(Target::new(
                        &job.job_name,
                        instance,
                        dsn,
                        &static_config.labels,
                        &collectors,
                        &config.global,
                    )));
                }
            }
        }

        Ok(Exporter { config, targets })
    }

    /// The effective configuration, as validated at startup.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Gathers all targets under the configured scrape timeout.
    pub async fn gather(&self) -> (Vec<proto::MetricFamily>, Vec<ScrapeError>) {
        self.gather_with_timeout(self.config.global.scrape_timeout)
            .await
    }

    /// Gathers all targets with an explicit wall-clock budget.
    ///
    /// Never fails on the first error: everything collected is returned
    /// together with the accumulated error list, which may be non-empty even
    /// on a useful scrape. Families are returned unsorted; the serving layer
    /// sorts when merging.
    pub async fn gather_with_timeout(
        &self,
        budget: Duration,
    ) -> (Vec<proto::MetricFamily>, Vec<ScrapeError>) {
        let deadline = Instant::now() + budget;
        let (tx, mut rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);

        for target in &self.targets {
            let target = target.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                target.collect(deadline, tx).await;
            });
        }
        // The channel closes once every target task has dropped its sender;
        // draining to completion below keeps producers from blocking.
        drop(tx);

        let mut families: HashMap<String, proto::MetricFamily> = HashMap::new();
        let mut errors = Vec::new();
        while let Some(sample) = rx.recv().await {
            let (desc, metric) = match sample.write() {
                Ok(pair) => pair,
                Err(error) => {
                    errors.push(error);
                    continue;
                }
            };
            let family = families.entry(desc.name().to_string()).or_insert_with(|| {
                let mut family = proto::MetricFamily::default();
                family.set_name(desc.name().to_string());
                family.set_help(desc.help().to_string());
                family.set_field_type(desc.metric_type().to_proto());
                family
            });
            if family.get_field_type() != desc.metric_type().to_proto() {
                errors.push(ScrapeError::Internal(format!(
                    "metric {:?} emitted with conflicting types",
                    desc.name()
                )));
                continue;
            }
            family.mut_metric().push(metric);
        }

        (families.into_values().collect(), errors)
    }
}
