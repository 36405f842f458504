use crate::config::MetricConfig;
use crate::db::CellValue;
use crate::error::ScrapeError;
use crate::query::ResultRow;
use prometheus::proto;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The kind of values a metric family carries. Counters are emitted as the
/// database reports them; monotonicity is not verified here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    pub fn to_proto(self) -> proto::MetricType {
        match self {
            MetricType::Counter => proto::MetricType::COUNTER,
            MetricType::Gauge => proto::MetricType::GAUGE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Immutable identity of a metric: name, help, type and label schema.
///
/// Variable label order is fixed at construction and shared by every sample;
/// constant labels are sorted by name and disjoint from the variable ones.
#[derive(Debug, Clone)]
pub struct MetricDesc {
    name: String,
    help: String,
    metric_type: MetricType,
    variable_labels: Vec<String>,
    const_labels: Vec<(String, String)>,
    log_context: String,
}

impl MetricDesc {
    pub fn new(
        name: String,
        help: String,
        metric_type: MetricType,
        variable_labels: Vec<String>,
        mut const_labels: Vec<(String, String)>,
        log_context: String,
    ) -> MetricDesc {
        const_labels.sort_by(|a, b| a.0.cmp(&b.0));
        MetricDesc {
            name,
            help,
            metric_type,
            variable_labels,
            const_labels,
            log_context,
        }
    }

    /// Descriptor for a self-metric emitted directly by a target. Carries
    /// only constant labels.
    pub fn automatic(
        name: &str,
        help: &str,
        const_labels: Vec<(String, String)>,
        log_context: &str,
    ) -> MetricDesc {
        MetricDesc::new(
            name.to_string(),
            help.to_string(),
            MetricType::Gauge,
            Vec::new(),
            const_labels,
            log_context.to_string(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    pub fn variable_labels(&self) -> &[String] {
        &self.variable_labels
    }

    pub fn const_labels(&self) -> &[(String, String)] {
        &self.const_labels
    }

    pub fn log_context(&self) -> &str {
        &self.log_context
    }
}

impl PartialEq for MetricDesc {
    // Identity is (name, help, type, label schema); the log context is
    // diagnostic only.
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.help == other.help
            && self.metric_type == other.metric_type
            && self.variable_labels == other.variable_labels
            && self.const_labels == other.const_labels
    }
}

/// One unit on the sample channel: either a materialized sample or an
/// in-band error carrier that surfaces per-sample and per-query failures
/// without aborting the scrape.
#[derive(Debug, Clone)]
pub enum Sample {
    Value {
        desc: Arc<MetricDesc>,
        value: f64,
        /// Variable label values, in the descriptor's label order.
        label_values: Vec<String>,
    },
    Invalid {
        context: String,
        error: ScrapeError,
    },
}

impl Sample {
    pub fn new(desc: Arc<MetricDesc>, value: f64, label_values: Vec<String>) -> Sample {
        Sample::Value {
            desc,
            value,
            label_values,
        }
    }

    pub fn invalid(context: impl Into<String>, error: ScrapeError) -> Sample {
        Sample::Invalid {
            context: context.into(),
            error,
        }
    }

    /// Converts the sample into its wire representation, or surfaces the
    /// carried error.
    pub fn write(self) -> Result<(Arc<MetricDesc>, proto::Metric), ScrapeError> {
        match self {
            Sample::Invalid { context, error } => Err(error.in_context(&context)),
            Sample::Value {
                desc,
                value,
                label_values,
            } => {
                if label_values.len() != desc.variable_labels().len() {
                    return Err(ScrapeError::Internal(format!(
                        "metric {:?}: {} label values for {} variable labels",
                        desc.name(),
                        label_values.len(),
                        desc.variable_labels().len()
                    )));
                }

                let mut metric = proto::Metric::default();
                for (name, label_value) in desc.const_labels() {
                    let mut pair = proto::LabelPair::default();
                    pair.set_name(name.clone());
                    pair.set_value(label_value.clone());
                    metric.mut_label().push(pair);
                }
                for (name, label_value) in desc.variable_labels().iter().zip(&label_values) {
                    let mut pair = proto::LabelPair::default();
                    pair.set_name(name.clone());
                    pair.set_value(label_value.clone());
                    metric.mut_label().push(pair);
                }
                match desc.metric_type() {
                    MetricType::Gauge => {
                        let mut gauge = proto::Gauge::default();
                        gauge.set_value(value);
                        metric.set_gauge(gauge);
                    }
                    MetricType::Counter => {
                        let mut counter = proto::Counter::default();
                        counter.set_value(value);
                        metric.set_counter(counter);
                    }
                }
                Ok((desc, metric))
            }
        }
    }
}

/// Maps result-set rows onto samples of one configured metric.
pub struct MetricFamily {
    desc: Arc<MetricDesc>,
    key_labels: Vec<String>,
    value_columns: Vec<String>,
    value_label: Option<String>,
    log_context: String,
}

impl MetricFamily {
    pub fn from_config(
        metric: &MetricConfig,
        const_labels: &[(String, String)],
        log_context: &str,
    ) -> MetricFamily {
        let log_context = format!("{}, metric={:?}", log_context, metric.metric_name);
        let mut variable_labels = metric.key_labels.clone();
        if let Some(value_label) = &metric.value_label {
            variable_labels.push(value_label.clone());
        }
        let mut all_const = const_labels.to_vec();
        all_const.extend(
            metric
                .static_labels
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        let desc = Arc::new(MetricDesc::new(
            metric.metric_name.clone(),
            metric.help.clone(),
            metric.metric_type,
            variable_labels,
            all_const,
            log_context.clone(),
        ));
        MetricFamily {
            desc,
            key_labels: metric.key_labels.clone(),
            value_columns: metric.values.clone(),
            value_label: metric.value_label.clone(),
            log_context,
        }
    }

    pub fn desc(&self) -> &Arc<MetricDesc> {
        &self.desc
    }

    pub fn log_context(&self) -> &str {
        &self.log_context
    }

    /// Emits one sample per value column for the given row. A NULL key
    /// column becomes an empty label value; a bad value column invalidates
    /// only that one sample.
    pub fn collect_row(&self, row: &ResultRow, out: &mut Vec<Sample>) {
        let key_values: Vec<String> = self
            .key_labels
            .iter()
            .map(|column| row.get(column).map(CellValue::as_label).unwrap_or_default())
            .collect();

        if self.value_label.is_some() {
            for column in &self.value_columns {
                let mut labels = key_values.clone();
                labels.push(column.clone());
                self.collect_value(row, column, labels, out);
            }
        } else if let Some(column) = self.value_columns.first() {
            self.collect_value(row, column, key_values, out);
        }
    }

    fn collect_value(
        &self,
        row: &ResultRow,
        column: &str,
        labels: Vec<String>,
        out: &mut Vec<Sample>,
    ) {
        let Some(cell) = row.get(column) else {
            out.push(Sample::invalid(
                self.log_context.clone(),
                ScrapeError::Value(format!("column {:?} missing from row", column)),
            ));
            return;
        };
        match cell.as_sample_value() {
            Ok(value) => out.push(Sample::new(self.desc.clone(), value, labels)),
            Err(reason) => out.push(Sample::invalid(
                self.log_context.clone(),
                ScrapeError::Value(format!("column {:?}: {}", column, reason)),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ResultRow;
    use std::collections::BTreeMap;

    fn desc(labels: &[&str]) -> Arc<MetricDesc> {
        Arc::new(MetricDesc::new(
            "m".to_string(),
            "help".to_string(),
            MetricType::Gauge,
            labels.iter().map(|l| l.to_string()).collect(),
            vec![
                ("job".to_string(), "j".to_string()),
                ("instance".to_string(), "i".to_string()),
            ],
            "test".to_string(),
        ))
    }

    #[test]
    fn test_desc_equality_ignores_log_context() {
        let a = MetricDesc::automatic("up", "help", vec![], "context a");
        let b = MetricDesc::automatic("up", "help", vec![], "context b");
        assert_eq!(a, b);

        let c = MetricDesc::automatic("up", "other help", vec![], "context a");
        assert_ne!(a, c);
    }

    #[test]
    fn test_const_labels_are_sorted() {
        let desc = MetricDesc::automatic(
            "up",
            "help",
            vec![
                ("job".to_string(), "j".to_string()),
                ("env".to_string(), "prod".to_string()),
            ],
            "test",
        );
        let names: Vec<&str> = desc.const_labels().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["env", "job"]);
    }

    #[test]
    fn test_sample_write_label_order() {
        let sample = Sample::new(desc(&["k"]), 1.5, vec!["a".to_string()]);
        let (desc, metric) = sample.write().unwrap();
        assert_eq!(desc.name(), "m");
        let labels: Vec<(&str, &str)> = metric
            .get_label()
            .iter()
            .map(|pair| (pair.get_name(), pair.get_value()))
            .collect();
        assert_eq!(
            labels,
            vec![("instance", "i"), ("job", "j"), ("k", "a")]
        );
        assert_eq!(metric.get_gauge().get_value(), 1.5);
    }

    #[test]
    fn test_sample_write_counter() {
        let desc = Arc::new(MetricDesc::new(
            "c".to_string(),
            "help".to_string(),
            MetricType::Counter,
            vec![],
            vec![],
            "test".to_string(),
        ));
        let (_, metric) = Sample::new(desc, 42.0, vec![]).write().unwrap();
        assert_eq!(metric.get_counter().get_value(), 42.0);
    }

    #[test]
    fn test_sample_write_label_count_mismatch() {
        let sample = Sample::new(desc(&["k"]), 1.0, vec![]);
        let err = sample.write().unwrap_err();
        assert!(matches!(err, ScrapeError::Internal(_)));
    }

    #[test]
    fn test_invalid_sample_surfaces_error() {
        let sample = Sample::invalid("ctx", ScrapeError::Value("bad".to_string()));
        let err = sample.write().unwrap_err();
        assert_eq!(err.to_string(), "value error: [ctx] bad");
    }

    fn family(value_label: Option<&str>, values: &[&str]) -> MetricFamily {
        let metric = MetricConfig {
            metric_name: "m".to_string(),
            metric_type: MetricType::Gauge,
            help: "help".to_string(),
            key_labels: vec!["k".to_string()],
            static_labels: BTreeMap::new(),
            value_label: value_label.map(|l| l.to_string()),
            values: values.iter().map(|v| v.to_string()).collect(),
            query: Some("SELECT 1".to_string()),
            query_ref: None,
            query_index: 0,
        };
        MetricFamily::from_config(
            &metric,
            &[("job".to_string(), "j".to_string())],
            "test",
        )
    }

    fn row(columns: &[&str], cells: Vec<CellValue>) -> ResultRow {
        ResultRow::new(
            columns.iter().map(|c| c.to_string()).collect::<Vec<_>>().into(),
            cells,
        )
    }

    #[test]
    fn test_collect_row_single_value() {
        let family = family(None, &["v"]);
        let mut out = Vec::new();
        family.collect_row(
            &row(&["k", "v"], vec![CellValue::Text("a".to_string()), CellValue::Float(1.0)]),
            &mut out,
        );
        assert_eq!(out.len(), 1);
        let (_, metric) = out.remove(0).write().unwrap();
        assert_eq!(metric.get_gauge().get_value(), 1.0);
    }

    #[test]
    fn test_collect_row_value_label_fans_out() {
        let family = family(Some("op"), &["read", "write"]);
        let mut out = Vec::new();
        family.collect_row(
            &row(
                &["k", "read", "write"],
                vec![
                    CellValue::Text("a".to_string()),
                    CellValue::Int(10),
                    CellValue::Int(20),
                ],
            ),
            &mut out,
        );
        assert_eq!(out.len(), 2);
        let (_, first) = out.remove(0).write().unwrap();
        let ops: Vec<&str> = first
            .get_label()
            .iter()
            .filter(|pair| pair.get_name() == "op")
            .map(|pair| pair.get_value())
            .collect();
        assert_eq!(ops, vec!["read"]);
        assert_eq!(first.get_gauge().get_value(), 10.0);
    }

    #[test]
    fn test_collect_row_null_key_becomes_empty() {
        let family = family(None, &["v"]);
        let mut out = Vec::new();
        family.collect_row(&row(&["k", "v"], vec![CellValue::Null, CellValue::Int(7)]), &mut out);
        let (_, metric) = out.remove(0).write().unwrap();
        let k: Vec<&str> = metric
            .get_label()
            .iter()
            .filter(|pair| pair.get_name() == "k")
            .map(|pair| pair.get_value())
            .collect();
        assert_eq!(k, vec![""]);
    }

    #[test]
    fn test_collect_row_null_value_is_invalid() {
        let family = family(None, &["v"]);
        let mut out = Vec::new();
        family.collect_row(
            &row(&["k", "v"], vec![CellValue::Text("a".to_string()), CellValue::Null]),
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].clone().write().is_err());
    }
}
