//! Custom tracing layers for conduit processes

use tracing::{Subscriber, span};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use crate::config::JsonlConfig;
use crate::context::{ProcessContextData, ProcessContextGuard};

/// Layer that attaches the process context to every new span.
///
/// Spans created on a thread without a [`ProcessContextGuard`] (tokio
/// workers, typically) inherit the context of their parent span.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessContextLayer;

impl ProcessContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct ProcessContextExtension {
    pub data: ProcessContextData,
}

impl<S> Layer<S> for ProcessContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let data = ProcessContextGuard::current().or_else(|| {
            span.parent().and_then(|parent| {
                parent
                    .extensions()
                    .get::<ProcessContextExtension>()
                    .map(|ext| ext.data.clone())
            })
        });

        if let Some(data) = data {
            span.extensions_mut().insert(ProcessContextExtension { data });
        }
    }
}

/// JSONL formatting layer writing to `writer`
pub fn jsonl_layer<S, W>(writer: W, config: &JsonlConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup> + 'static,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(config.include_current_span)
        .with_span_list(config.include_spans)
        .flatten_event(config.flatten_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread_info)
        .with_thread_names(config.include_thread_info)
        .with_writer(writer)
        .boxed()
}

/// Human-readable layer writing to `writer`
pub fn pretty_layer<S, W>(writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup> + 'static,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .with_target(true)
        .with_writer(writer)
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessRole;
    use std::sync::{Arc, Mutex};
    use tracing::Event;
    use tracing_subscriber::Registry;
    use tracing_subscriber::layer::SubscriberExt;

    /// Records the role found on the span of every event
    #[derive(Clone, Default)]
    struct RoleProbe {
        seen: Arc<Mutex<Vec<Option<ProcessRole>>>>,
    }

    impl<S> Layer<S> for RoleProbe
    where
        S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    {
        fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
            let role = ctx.event_span(event).and_then(|span| {
                span.extensions()
                    .get::<ProcessContextExtension>()
                    .map(|ext| ext.data.role)
            });
            self.seen.lock().unwrap().push(role);
        }
    }

    #[test]
    fn test_span_gets_current_context() {
        let probe = RoleProbe::default();
        let subscriber = Registry::default()
            .with(ProcessContextLayer::new())
            .with(probe.clone());

        tracing::subscriber::with_default(subscriber, || {
            let _guard = ProcessContextGuard::new(ProcessRole::Writer);
            tracing::info_span!("publish").in_scope(|| tracing::info!("appended"));
        });

        assert_eq!(*probe.seen.lock().unwrap(), vec![Some(ProcessRole::Writer)]);
    }

    #[test]
    fn test_child_span_inherits_without_guard() {
        let probe = RoleProbe::default();
        let subscriber = Registry::default()
            .with(ProcessContextLayer::new())
            .with(probe.clone());

        tracing::subscriber::with_default(subscriber, || {
            let parent = {
                let _guard = ProcessContextGuard::new(ProcessRole::Reader);
                tracing::info_span!("tail")
            };
            assert!(ProcessContextGuard::current().is_none());

            let child = tracing::info_span!(parent: &parent, "poll");
            child.in_scope(|| tracing::info!("polled"));

            tracing::info_span!("unrelated").in_scope(|| tracing::info!("no role"));
        });

        assert_eq!(
            *probe.seen.lock().unwrap(),
            vec![Some(ProcessRole::Reader), None]
        );
    }
}
