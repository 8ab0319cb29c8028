//! Collects the tracing events emitted while one item is being diffed, so that when diffing that
//! item fails, the report can show what the engine was doing at the time.
//!
//! Code that runs inside `trace_scope` can call `tracing::trace!()` and friends as usual. Events
//! are captured regardless of `RUST_LOG`, which only controls what gets printed to stderr.

use std::cell::RefCell;
use std::fmt::Write as _;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Installs the global tracing subscriber: stderr output filtered by `RUST_LOG`, plus capture of
/// events inside `trace_scope`. Should only be called from the main binary.
pub fn enable_diagnostics() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::from_default_env()),
        )
        .with(TraceLayer)
        .init();
}

#[derive(Default, Debug, Clone)]
pub struct TraceOutput {
    pub messages: Vec<TraceMessage>,
}

#[derive(Debug, Clone)]
pub struct TraceMessage {
    pub level: Level,
    pub text: String,
}

impl TraceOutput {
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.messages
            .iter()
            .filter(|m| m.level <= Level::WARN)
            .map(|m| m.text.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

thread_local! {
    static TRACE_STACK: RefCell<Vec<TraceOutput>> = const { RefCell::new(Vec::new()) };
}

/// Runs `f`, storing all trace output emitted while it was running in `trace_output`.
pub(crate) fn trace_scope<T>(trace_output: &mut TraceOutput, f: impl FnOnce() -> T) -> T {
    TRACE_STACK.with_borrow_mut(|stack| stack.push(TraceOutput::default()));

    let result = f();

    *trace_output = TRACE_STACK
        .with_borrow_mut(Vec::pop)
        .unwrap_or_default();

    result
}

struct TraceLayer;

impl<S> tracing_subscriber::Layer<S> for TraceLayer
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if TRACE_STACK.with_borrow(Vec::is_empty) {
            return;
        }

        let mut formatter = MessageFormatter::default();
        event.record(&mut formatter);

        TRACE_STACK.with_borrow_mut(|stack| {
            if let Some(out) = stack.last_mut() {
                out.messages.push(TraceMessage {
                    level: *event.metadata().level(),
                    text: formatter.out,
                });
            }
        });
    }
}

#[derive(Default)]
struct MessageFormatter {
    out: String,
}

impl tracing::field::Visit for MessageFormatter {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if !self.out.is_empty() {
            self.out.push(' ');
        }
        if field.name() == "message" {
            let _ = write!(&mut self.out, "{value:?}");
        } else {
            let _ = write!(&mut self.out, "{field}={value:?}");
        }
    }
}
