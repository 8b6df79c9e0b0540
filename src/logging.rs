use log::{log, Level};
use std::collections::HashMap;
use std::sync::Once;
use tracing::field::{Field, Visit};
use tracing::span::Attributes;
use tracing::{Event, Id, Subscriber};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::{LookupSpan, Scope};
use tracing_subscriber::{layer::Context, Layer};

static INIT: Once = Once::new();

/// Install a global subscriber forwarding cache reloads and installations to the `log` crate
pub fn init() {
    INIT.call_once(|| tracing_subscriber::registry().with(ToLogLayer).init());
}

#[derive(Default)]
pub struct ToLogLayer;

impl<S> Layer<S> for ToLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut map = HashMap::new();
            let mut visitor = FieldMapVisitor::from_map(&mut map);
            attrs.record(&mut visitor);

            let meta = span.metadata();
            match meta.name() {
                "reload" => {
                    if let Some(cache) = map.get("cache") {
                        log!(target: meta.target(), Level::Debug, "{cache} cache: reloading ...");
                    }
                }
                "install" => {
                    let updates = map.get("updates").map(String::as_str).unwrap_or("0");
                    log!(target: meta.target(), Level::Info, "installing {updates} update file(s)");
                }
                "apply_update" => {
                    if let (Some(file), Some(step)) = (map.get("file"), map.get("step")) {
                        log!(target: meta.target(), Level::Info, "{file}: {step} ...");
                    }
                }
                _ => {}
            }

            // Store the initial fields in span extensions
            span.extensions_mut().insert(map);
        }
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(&id) {
            let meta = span.metadata();
            let ext = span.extensions();
            let Some(map) = ext.get::<HashMap<String, String>>() else {
                return;
            };

            match meta.name() {
                "reload" => match (map.get("cache"), map.get("error")) {
                    (Some(cache), Some(err)) => {
                        log!(target: meta.target(), Level::Error, "{cache} cache: reload failed - {err}")
                    }
                    (Some(cache), None) => {
                        log!(target: meta.target(), Level::Debug, "{cache} cache: reloaded")
                    }
                    _ => {}
                },
                "install" => {
                    if let Some(err) = map.get("error") {
                        log!(target: meta.target(), Level::Error, "installation failed: {err}");
                    }
                }
                "apply_update" => match (map.get("file"), map.get("error")) {
                    (Some(file), Some(err)) => {
                        log!(target: meta.target(), Level::Warn, "{file}: failed - {err}")
                    }
                    (Some(file), None) => {
                        log!(target: meta.target(), Level::Info, "{file}: success")
                    }
                    _ => {}
                },
                "reconcile_links" => {
                    if let (Some(link), Some(err)) = (map.get("link"), map.get("error")) {
                        log!(target: meta.target(), Level::Warn, "{link}: reconciliation failed - {err}");
                    }
                }
                _ => {}
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if let Some(span) = ctx
            .event_scope(event)
            .into_iter()
            .flat_map(Scope::from_root)
            .last()
        {
            let meta = event.metadata();
            let level = map_level(meta.level());

            let mut fields = HashMap::new();
            let mut visitor = FieldMapVisitor::from_map(&mut fields);
            event.record(&mut visitor);
            let Some(message) = fields.get("message") else {
                return;
            };

            // Events below an applied update are reported with the file they belong to
            if let Some(apply) = ctx
                .event_scope(event)
                .into_iter()
                .flat_map(Scope::from_root)
                .find(|s| s.name() == "apply_update")
            {
                let ext = apply.extensions();
                if let Some(file) = ext
                    .get::<HashMap<String, String>>()
                    .and_then(|f| f.get("file"))
                {
                    match fields.get("target") {
                        Some(target) => {
                            log!(target: meta.target(), level, "{file}: {message} ({target})")
                        }
                        None => log!(target: meta.target(), level, "{file}: {message}"),
                    }
                    return;
                }
            }

            if span.name() == "install" && level <= Level::Info {
                log!(target: meta.target(), level, "{message}");
            }
        }
    }

    fn on_record(&self, id: &Id, values: &tracing::span::Record<'_>, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut exts = span.extensions_mut();

            // Get the existing field map (from on_new_span)
            if let Some(fields) = exts.get_mut::<HashMap<String, String>>() {
                let mut visitor = FieldMapVisitor::from_map(fields);
                values.record(&mut visitor);
            }
        }
    }
}

#[derive(Default)]
pub struct FieldMapVisitor<'a> {
    fields: Option<&'a mut HashMap<String, String>>,
}

impl<'a> FieldMapVisitor<'a> {
    pub fn from_map(map: &'a mut HashMap<String, String>) -> Self {
        Self { fields: Some(map) }
    }
}

impl Visit for FieldMapVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if let Some(ref mut map) = self.fields {
            map.insert(field.name().into(), format!("{:?}", value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if let Some(ref mut map) = self.fields {
            map.insert(field.name().into(), value.to_string());
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if let Some(ref mut map) = self.fields {
            map.insert(field.name().into(), value.to_string());
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if let Some(ref mut map) = self.fields {
            map.insert(field.name().into(), value.to_string());
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if let Some(ref mut map) = self.fields {
            map.insert(field.name().into(), value.to_string());
        }
    }
}

fn map_level(level: &tracing::Level) -> Level {
    match *level {
        tracing::Level::TRACE => Level::Trace,
        tracing::Level::DEBUG => Level::Debug,
        tracing::Level::INFO => Level::Info,
        tracing::Level::WARN => Level::Warn,
        tracing::Level::ERROR => Level::Error,
    }
}
