use std::{
    collections::BTreeMap,
    fs::File,
    io::Write,
    path::Path,
    sync::Mutex,
    time::Instant,
};

use chrono::{DateTime, Utc};
use log::{trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{
    field::{Field, Visit},
    span, Event, Subscriber,
};
use tracing_subscriber::{layer::Layer, registry::LookupSpan};

use osutils::osrelease::OsRelease;

use super::background_log::open_append;
use crate::DISKPROV_VERSION;

/// Records the fields of an event or span as JSON values.
#[derive(Default)]
struct MetricVisitor {
    fields: BTreeMap<String, Value>,
}

impl Visit for MetricVisitor {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), json!(format!("{value:?}")));
    }
}

/// One line of the metrics file.
#[derive(Debug, Serialize, Deserialize)]
struct MetricEntry {
    timestamp: DateTime<Utc>,
    metric_name: String,
    value: Value,
    additional_fields: BTreeMap<String, Value>,
}

struct ExecutionTime(Instant);

/// Tracing layer appending every `metric_name` event, and the execution time
/// of every span, as one JSON line to a metrics file.
pub struct MetricsLayer {
    metrics_file: Option<Mutex<File>>,
    additional_fields: BTreeMap<String, Value>,
}

fn os_release() -> String {
    match OsRelease::read() {
        Ok(os_release) => os_release
            .pretty_name
            .or(os_release.version_id)
            .unwrap_or_else(|| "unknown".into()),
        Err(e) => {
            warn!("Failed to read os-release, using 'unknown': {e}");
            "unknown".into()
        }
    }
}

impl MetricsLayer {
    pub fn new(target: impl AsRef<Path>) -> Self {
        let metrics_file = match open_append(target.as_ref()) {
            Ok(f) => Some(Mutex::new(f)),
            Err(err) => {
                eprintln!("Metrics setup error: failed to open metrics file: {err:?}");
                None
            }
        };

        let mut additional_fields = BTreeMap::new();
        additional_fields.insert("diskprov_version".to_string(), json!(DISKPROV_VERSION));
        additional_fields.insert("os_release".to_string(), json!(os_release()));

        Self {
            metrics_file,
            additional_fields,
        }
    }

    fn write_entry(&self, metric_name: String, value: Value) {
        let Some(file) = self.metrics_file.as_ref() else {
            return;
        };

        let entry = MetricEntry {
            timestamp: Utc::now(),
            metric_name,
            value,
            additional_fields: self.additional_fields.clone(),
        };
        let mut line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                trace!("Failed to serialize metric: {e}");
                return;
            }
        };
        line.push('\n');

        if let Ok(mut file) = file.lock() {
            if let Err(e) = file.write_all(line.as_bytes()) {
                trace!("Failed to write metric to file: {e:?}");
            }
        }
    }
}

impl<S> Layer<S> for MetricsLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn enabled(
        &self,
        metadata: &tracing::Metadata<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) -> bool {
        self.metrics_file.is_some() && metadata.level() <= &tracing::Level::INFO
    }

    /// Events without a `metric_name` field are ignored. A lone `value` field
    /// becomes the metric's value; any other fields are kept as an object.
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = MetricVisitor::default();
        event.record(&mut visitor);

        let Some(metric_name) = visitor
            .fields
            .remove("metric_name")
            .and_then(|name| name.as_str().map(str::to_string))
        else {
            trace!("Event has no metric_name field, skipping");
            return;
        };

        let value = match visitor.fields.remove("value") {
            Some(value) if visitor.fields.is_empty() => value,
            value => {
                if let Some(value) = value {
                    visitor.fields.insert("value".to_string(), value);
                }
                Value::Object(Map::from_iter(visitor.fields))
            }
        };

        self.write_entry(metric_name, value);
    }

    fn on_new_span(
        &self,
        attrs: &span::Attributes<'_>,
        id: &span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            let mut visitor = MetricVisitor::default();
            attrs.record(&mut visitor);
            span.extensions_mut().insert(visitor);
        }
    }

    fn on_enter(&self, id: &span::Id, ctx: tracing_subscriber::layer::Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            trace!("Failed to get span with id: {id:?}");
            return;
        };
        span.extensions_mut().insert(ExecutionTime(Instant::now()));
    }

    /// Writes the span's fields along with its execution time in seconds.
    fn on_exit(&self, id: &span::Id, ctx: tracing_subscriber::layer::Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            trace!("Failed to get span with id: {id:?}");
            return;
        };
        let Some(ExecutionTime(start)) = span.extensions_mut().remove::<ExecutionTime>() else {
            trace!("Failed to get start time for span: {:?}", span.name());
            return;
        };
        let execution_time = start.elapsed().as_secs_f64();

        let mut fields = span
            .extensions_mut()
            .remove::<MetricVisitor>()
            .map(|visitor| visitor.fields)
            .unwrap_or_default();
        fields.insert("execution_time".to_string(), json!(execution_time));

        self.write_entry(span.name().to_string(), json!(fields));
    }

    fn on_record(
        &self,
        id: &span::Id,
        values: &span::Record<'_>,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            if let Some(visitor) = span.extensions_mut().get_mut::<MetricVisitor>() {
                values.record(visitor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::tempdir;
    use tracing_subscriber::{layer::SubscriberExt, Registry};

    fn read_entries(path: &Path) -> Vec<MetricEntry> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_metric_events() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("diskprov-metrics.jsonl");
        let subscriber = Registry::default().with(MetricsLayer::new(&path));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(metric_name = "volume_activated");
            tracing::info!(metric_name = "disks_validated", value = 2);
            tracing::info!(metric_name = "array_created", members = 3, chunk = "1024");
            tracing::info!(unrelated = true);
            tracing::debug!(metric_name = "too_verbose");
        });

        let entries = read_entries(&path);
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].metric_name, "volume_activated");
        assert_eq!(entries[0].value, json!({}));

        assert_eq!(entries[1].metric_name, "disks_validated");
        assert_eq!(entries[1].value, json!(2));

        assert_eq!(entries[2].metric_name, "array_created");
        assert_eq!(entries[2].value, json!({"members": 3, "chunk": "1024"}));
        assert_eq!(
            entries[2].additional_fields["diskprov_version"],
            json!(DISKPROV_VERSION)
        );
    }

    #[test]
    fn test_span_execution_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("diskprov-metrics.jsonl");
        let subscriber = Registry::default().with(MetricsLayer::new(&path));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("destructive_format", disks = 2);
            let _guard = span.enter();
        });

        let entries = read_entries(&path);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metric_name, "destructive_format");
        assert_eq!(entries[0].value["disks"], json!(2));
        assert!(entries[0].value["execution_time"].as_f64().unwrap() >= 0.0);
    }

    #[test]
    fn test_appends_to_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("diskprov-metrics.jsonl");
        fs::write(&path, "").unwrap();

        for _ in 0..2 {
            let subscriber = Registry::default().with(MetricsLayer::new(&path));
            tracing::subscriber::with_default(subscriber, || {
                tracing::info!(metric_name = "volume_activated");
            });
        }

        assert_eq!(read_entries(&path).len(), 2);
    }

    #[test]
    fn test_unwritable_target() {
        let dir = tempdir().unwrap();
        let layer = MetricsLayer::new(dir.path());
        assert!(layer.metrics_file.is_none());
    }
}
