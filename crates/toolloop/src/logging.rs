//! A [`tracing_subscriber::Layer`] that writes one timestamped line per
//! event to stderr (or any writer).
//!
//! Lines look like `14:02:07 WARN  Retrying model call {attempt=2}`. Extra
//! event fields are appended in braces after the message.
//!
//! ```ignore
//! toolloop::logging::init_logging(tracing::Level::INFO);
//! ```

use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::Local;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Formats events as `HH:MM:SS LEVEL message {fields}` lines.
pub struct StderrLayer {
    min_level: Level,
    writer: SharedWriter,
}

impl StderrLayer {
    /// A layer that writes events at `min_level` or more severe to stderr.
    pub fn new(min_level: Level) -> Self {
        Self::with_writer(min_level, std::io::stderr())
    }

    /// A layer that writes to `writer` instead of stderr.
    pub fn with_writer(min_level: Level, writer: impl Write + Send + 'static) -> Self {
        Self {
            min_level,
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }
}

impl<S: Subscriber + for<'a> LookupSpan<'a>> Layer<S> for StderrLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        // `Level` orders TRACE as the greatest.
        if *event.metadata().level() > self.min_level {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let line = format_line(
            &Local::now().format("%H:%M:%S").to_string(),
            *event.metadata().level(),
            &visitor,
        );

        if let Ok(mut w) = self.writer.lock() {
            let _ = writeln!(w, "{line}");
        }
    }
}

fn format_line(time: &str, level: Level, visitor: &MessageVisitor) -> String {
    let mut message = visitor.message.clone();
    if !visitor.fields.is_empty() {
        let extras: Vec<String> = visitor
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        if message.is_empty() {
            message = extras.join(" ");
        } else {
            message = format!("{message} {{{}}}", extras.join(", "));
        }
    }
    format!("{time} {:<5} {message}", level.as_str())
}

/// Collects the message and remaining fields of one event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let raw = format!("{value:?}");
        if field.name() == "message" {
            self.message = unquote(&raw).to_string();
        } else {
            self.fields.push((field.name().to_string(), raw));
        }
    }
}

fn unquote(raw: &str) -> &str {
    raw.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw)
}

/// Install a global subscriber with a [`StderrLayer`] at `level`.
///
/// Does nothing if a global subscriber is already set.
pub fn init_logging(level: Level) {
    let _ = tracing_subscriber::registry()
        .with(StderrLayer::new(level))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn formats_message_and_fields() {
        let visitor = MessageVisitor {
            message: "Retrying".into(),
            fields: vec![("attempt".into(), "2".into())],
        };
        assert_eq!(
            format_line("10:00:00", Level::WARN, &visitor),
            "10:00:00 WARN  Retrying {attempt=2}"
        );
    }

    #[test]
    fn unquote_strips_only_matching_quotes() {
        assert_eq!(unquote("\"hi\""), "hi");
        assert_eq!(unquote("\"hi"), "\"hi");
        assert_eq!(unquote("hi"), "hi");
    }

    #[test]
    fn filters_below_min_level() {
        let capture = Capture::default();
        let subscriber =
            tracing_subscriber::registry().with(StderrLayer::with_writer(Level::INFO, capture.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("hidden");
            tracing::info!(tool = "read_file", "Dispatching");
            tracing::error!("broken");
        });

        let text = capture.text();
        assert!(!text.contains("hidden"));
        assert!(text.contains("INFO  Dispatching {tool=read_file}"));
        assert!(text.contains("ERROR broken"));
        assert_eq!(text.lines().count(), 2);
    }
}
