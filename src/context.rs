//! Transform context and diagnostic reporting.

use std::fmt;
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Severity of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational, surfaced only when debug logging is enabled
    Notice,
    /// Recoverable; the rule was skipped or its result reverted
    Warning,
    /// The configuration is unusable as a whole
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Notice => f.write_str("notice"),
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// A structured, non-fatal report produced while cleaning a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// The rule (as JSON) the event concerns, if any
    pub context: Option<String>,
}

impl Diagnostic {
    pub fn notice(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Notice,
            message: message.into(),
            context: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            context: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            context: None,
        }
    }

    /// Attach the rule context.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "For {}: {}", context, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Receiver for diagnostic events.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Sink that forwards diagnostics to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    fetch_url: Option<String>,
    feed_id: Option<String>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag every event with the feed being processed.
    pub fn for_feed(fetch_url: &str, feed_id: &str) -> Self {
        Self {
            fetch_url: Some(fetch_url.to_string()),
            feed_id: Some(feed_id.to_string()),
        }
    }
}

impl DiagnosticSink for TracingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        let fetch_url = self.fetch_url.as_deref().unwrap_or_default();
        let feed_id = self.feed_id.as_deref().unwrap_or_default();
        let context = diagnostic.context.as_deref().unwrap_or_default();

        match diagnostic.severity {
            Severity::Notice => info!(fetch_url, feed_id, context, "{}", diagnostic.message),
            Severity::Warning => warn!(fetch_url, feed_id, context, "{}", diagnostic.message),
            Severity::Error => error!(fetch_url, feed_id, context, "{}", diagnostic.message),
        }
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<Diagnostic> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events at exactly the given severity.
    pub fn with_severity(&self, severity: Severity) -> Vec<Diagnostic> {
        self.events()
            .into_iter()
            .filter(|d| d.severity == severity)
            .collect()
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        if let Ok(mut events) = self.events.lock() {
            events.push(diagnostic);
        }
    }
}

/// Context available while one rule transforms a feed.
///
/// Operations record their diagnostics here; the rule engine forwards them to
/// the sink after the operation returns.
#[derive(Debug, Clone)]
pub struct TransformContext<'a> {
    /// URL the feed was fetched from
    pub fetch_url: &'a str,
    /// The rule being applied, serialized as JSON
    pub rule: &'a str,
    /// Diagnostics raised so far
    diagnostics: Vec<Diagnostic>,
}

impl<'a> TransformContext<'a> {
    /// Create a new transform context.
    pub fn new(fetch_url: &'a str, rule: &'a str) -> Self {
        Self {
            fetch_url,
            rule,
            diagnostics: Vec::new(),
        }
    }

    /// Record an informational event.
    pub fn notice(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::notice(message));
    }

    /// Record a warning tagged with the current rule.
    pub fn warning(&mut self, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::warning(message).with_context(self.rule));
    }

    /// Diagnostics raised so far.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Take the recorded diagnostics, leaving the context empty.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}
