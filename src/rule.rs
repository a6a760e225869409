//! Rule engine: runs every matching rule over a feed, in configuration order.

use crate::config::{RuleEntry, RuleSet};
use crate::context::{Diagnostic, DiagnosticSink, Severity, TransformContext};
use crate::matcher;
use crate::transformer::CompiledOperation;
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use tracing::{debug, trace};

const MIGRATION_HINT: &str = "Please convert your configuration: rules keyed by URL are deprecated, \
use an array of rule objects with a \"URL\" or \"URL_re\" key";

/// Applies a rule set to feed bodies.
///
/// The engine holds no state between runs; each call decodes and evaluates the
/// rules it is given and reports through the sink.
pub struct RuleEngine<'s> {
    sink: &'s dyn DiagnosticSink,
    /// Forward notice-level diagnostics
    debug: bool,
}

impl<'s> RuleEngine<'s> {
    /// Create a new rule engine reporting to `sink`.
    pub fn new(sink: &'s dyn DiagnosticSink, debug: bool) -> Self {
        Self { sink, debug }
    }

    /// Decode stored configuration text and run it.
    ///
    /// Configuration that is not JSON, or not a collection of rules, leaves the
    /// feed untouched and is reported as an error.
    pub fn run(&self, feed: &[u8], fetch_url: &str, config: &str) -> Vec<u8> {
        match RuleSet::from_json(config) {
            Ok(rules) => self.run_rules(feed, fetch_url, &rules),
            Err(e) => {
                self.emit(Diagnostic::error(format!(
                    "No or malformed configuration stored: {e}"
                )));
                feed.to_vec()
            }
        }
    }

    /// Run an already-parsed configuration value.
    pub fn run_value(&self, feed: &[u8], fetch_url: &str, config: &JsonValue) -> Vec<u8> {
        match RuleSet::from_value(config) {
            Ok(rules) => self.run_rules(feed, fetch_url, &rules),
            Err(e) => {
                self.emit(Diagnostic::error(format!(
                    "No or malformed configuration stored: {e}"
                )));
                feed.to_vec()
            }
        }
    }

    /// Run every entry of `rules`, each consuming the previous one's output.
    pub fn run_rules(&self, feed: &[u8], fetch_url: &str, rules: &RuleSet) -> Vec<u8> {
        let mut current = Cow::Borrowed(feed);

        for entry in rules.entries() {
            if let Some(text) = self.apply_entry(entry, &current, fetch_url) {
                current = Cow::Owned(text);
            }
        }

        current.into_owned()
    }

    /// Apply one entry. Returns the new feed body, or `None` to keep the current one.
    fn apply_entry(&self, entry: &RuleEntry, feed: &[u8], fetch_url: &str) -> Option<Vec<u8>> {
        let context = entry.context();

        if entry.legacy {
            self.emit(Diagnostic::warning(MIGRATION_HINT).with_context(&context));
        }

        let rule = match &entry.rule {
            Ok(rule) => rule,
            Err(e) => {
                self.emit(Diagnostic::warning(e.to_string()).with_context(&context));
                return None;
            }
        };

        match matcher::matches(rule, fetch_url) {
            Ok(true) => {}
            Ok(false) => {
                trace!(fetch_url, rule = %context, "Rule does not match");
                return None;
            }
            Err(e) => {
                self.emit(Diagnostic::warning(e.to_string()).with_context(&context));
                return None;
            }
        }

        self.emit(Diagnostic::notice(format!(
            "Modifying {fetch_url} with {context}"
        )));

        let operation = match CompiledOperation::compile(&rule.operation) {
            Ok(operation) => operation,
            Err(e) => {
                self.emit(Diagnostic::warning(e.to_string()).with_context(&context));
                return None;
            }
        };

        let Some(transformer) = operation.transformer() else {
            trace!(
                operation = rule.operation.name(),
                "Unrecognized operation type, rule matched without effect"
            );
            return None;
        };

        let mut ctx = TransformContext::new(fetch_url, &context);
        let result = transformer.transform(feed, &mut ctx);
        for diagnostic in ctx.take_diagnostics() {
            self.emit(diagnostic);
        }

        match result {
            Ok(outcome) => {
                debug!(
                    transformer = transformer.name(),
                    substitutions = outcome.substitutions,
                    changed = !outcome.is_unchanged(),
                    "Rule applied"
                );
                outcome.text
            }
            Err(e) => {
                self.emit(Diagnostic::warning(e.to_string()).with_context(&context));
                None
            }
        }
    }

    fn emit(&self, diagnostic: Diagnostic) {
        if diagnostic.severity == Severity::Notice && !self.debug {
            return;
        }
        self.sink.emit(diagnostic);
    }
}
