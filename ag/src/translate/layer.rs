//! `tracing` layer feeding translated log lines into session queues
//!
//! The bridge runs each task inside a span named [`SESSION_SPAN`] carrying a
//! `session_id` field. For every event, this layer walks the event's span
//! scope, finds the innermost session, translates the formatted message and
//! pushes the result into that session's queue. Events outside any session,
//! and events emitted by this crate itself, are ignored.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

use super::LogTranslator;
use crate::bridge::SessionRegistry;

/// Name of the span a session's task runs in
pub const SESSION_SPAN: &str = "task_session";

const SESSION_FIELD: &str = "session_id";
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Span extension marking a session span
struct SessionTag(String);

/// Layer routing executor log lines through a [`LogTranslator`]
pub struct TranslatorLayer {
    translator: Arc<LogTranslator>,
    sessions: SessionRegistry,
}

impl TranslatorLayer {
    pub fn new(translator: Arc<LogTranslator>, sessions: SessionRegistry) -> Self {
        Self { translator, sessions }
    }
}

impl<S> Layer<S> for TranslatorLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if attrs.metadata().name() != SESSION_SPAN {
            return;
        }
        let mut visitor = SessionIdVisitor::default();
        attrs.record(&mut visitor);
        if let (Some(session_id), Some(span)) = (visitor.0, ctx.span(id)) {
            span.extensions_mut().insert(SessionTag(session_id));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if event.metadata().target().starts_with(OWN_TARGET) {
            return;
        }
        let Some(scope) = ctx.event_scope(event) else {
            return;
        };
        let session_id = scope.into_iter().find_map(|span| {
            let extensions = span.extensions();
            extensions.get::<SessionTag>().map(|tag| tag.0.clone())
        });
        let Some(queue) = session_id.and_then(|id| self.sessions.get(&id)) else {
            return;
        };

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        if let Some(translated) = self.translator.translate(&visitor.into_line()) {
            queue.push(translated);
        }
    }
}

#[derive(Default)]
struct SessionIdVisitor(Option<String>);

impl Visit for SessionIdVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == SESSION_FIELD {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == SESSION_FIELD {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

/// Rebuilds the plain text of an event: its message, then `key=value` pairs
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn into_line(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{} {}", self.message, self.fields)
        }
    }

    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }
}
