//! Rule-driven cleaner for fetched RSS/Atom feeds.
//!
//! Each time a feed is fetched, the stored rules are evaluated in order against
//! the fetch URL. Matching rules rewrite the raw feed body:
//!
//! - Regex substitution over the whole body (delimited patterns such as `/ad/i`)
//! - Regex substitution scoped to nodes selected by XPath
//! - Character-encoding normalization to UTF-8 based on the XML declaration
//!
//! Failures never block a feed: a rule that cannot be applied is reported and
//! skipped, and the body is returned as the last successful rule left it.
//!
//! ## Configuration Example
//!
//! ```json
//! [
//!   {
//!     "URL": "news.example.com",
//!     "type": "xpath_regex",
//!     "xpath": "//item/title",
//!     "pattern": "/^Sponsored: /",
//!     "replacement": ""
//!   },
//!   { "URL_re": "/legacy-cms\\.example\\.org/i", "type": "utf-8" }
//! ]
//! ```

pub mod cleaner;
pub mod config;
pub mod context;
pub mod matcher;
pub mod pattern;
pub mod rule;
pub mod transformer;

pub use cleaner::{CleanerError, FeedCleaner};
pub use config::{Operation, Rule, RuleSet, Settings};
pub use context::{CollectingSink, Diagnostic, DiagnosticSink, Severity, TracingSink, TransformContext};
pub use rule::RuleEngine;
