//! JSONL tracing layer.
//!
//! One JSON object per event on the configured writer (stderr in the CLI),
//! leaving stdout to command payloads. `run_id` and `stage` are lifted to the
//! top level whether they were recorded on the event or on an enclosing span.

use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::events::Level;

/// Correlation fields lifted out of the `fields` object.
#[derive(Debug, Clone, Default)]
struct Correlation {
    run_id: Option<String>,
    stage: Option<String>,
}

impl Correlation {
    fn take(&mut self, field: &Field, value: String) -> Option<String> {
        match field.name() {
            "run_id" => self.run_id = Some(value),
            "stage" => self.stage = Some(value),
            _ => return Some(value),
        }
        None
    }

    fn fill_from(&mut self, outer: &Correlation) {
        if self.run_id.is_none() {
            self.run_id.clone_from(&outer.run_id);
        }
        if self.stage.is_none() {
            self.stage.clone_from(&outer.stage);
        }
    }
}

/// Collects an event's fields into JSON.
#[derive(Default)]
struct JsonFieldVisitor {
    correlation: Correlation,
    message: Option<String>,
    fields: Map<String, Value>,
}

impl JsonFieldVisitor {
    fn text(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else if let Some(value) = self.correlation.take(field, value) {
            self.fields
                .insert(field.name().to_string(), Value::String(value));
        }
    }
}

impl Visit for JsonFieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.text(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.text(field, format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        // NaN and infinities have no JSON form.
        let value = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.fields.insert(field.name().to_string(), value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), json!(value));
    }
}

/// Span visitor that only keeps correlation fields.
#[derive(Default)]
struct SpanVisitor(Correlation);

impl Visit for SpanVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.take(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.take(field, format!("{value:?}"));
    }
}

pub struct JsonlLayer<W = io::Stderr> {
    writer: Mutex<W>,
}

impl JsonlLayer<io::Stderr> {
    pub fn stderr() -> Self {
        JsonlLayer::new(io::stderr())
    }
}

impl<W: Write> JsonlLayer<W> {
    pub fn new(writer: W) -> Self {
        JsonlLayer {
            writer: Mutex::new(writer),
        }
    }
}

impl<S, W> Layer<S> for JsonlLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = SpanVisitor::default();
        attrs.record(&mut visitor);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(visitor.0);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut visitor = JsonFieldVisitor::default();
        event.record(&mut visitor);

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(outer) = span.extensions().get::<Correlation>() {
                    visitor.correlation.fill_from(outer);
                }
            }
        }

        let level: Level = (*event.metadata().level()).into();
        let mut obj = Map::new();
        obj.insert("ts".into(), json!(Utc::now().to_rfc3339()));
        obj.insert("level".into(), json!(level));
        obj.insert("event".into(), json!(event.metadata().target()));
        if let Some(run_id) = visitor.correlation.run_id {
            obj.insert("run_id".into(), json!(run_id));
        }
        if let Some(stage) = visitor.correlation.stage {
            obj.insert("stage".into(), json!(stage));
        }
        if let Some(message) = visitor.message {
            obj.insert("message".into(), json!(message));
        }
        if !visitor.fields.is_empty() {
            obj.insert("fields".into(), Value::Object(visitor.fields));
        }

        let line = serde_json::to_string(&Value::Object(obj)).unwrap_or_default();
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{line}");
        }
    }
}
