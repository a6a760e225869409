//! Feed cleaner host entry point.

use crate::config::{RuleSet, Settings, UrlMatch};
use crate::context::{DiagnosticSink, TracingSink};
use crate::matcher::UrlMatcherImpl;
use crate::rule::RuleEngine;
use crate::transformer::CompiledOperation;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

/// Cleans fetched feeds with a stored rule configuration.
///
/// The configuration text is decoded on every call, exactly as it would be read
/// back from storage; an unusable configuration never prevents a feed from
/// being delivered.
#[derive(Debug, Clone)]
pub struct FeedCleaner {
    /// Stored configuration (JSON)
    config: String,
    settings: Settings,
    /// Debug flag of the embedding host
    host_debug: bool,
}

impl FeedCleaner {
    /// Create a new feed cleaner from stored configuration text.
    ///
    /// The text is not checked here; see [`FeedCleaner::validate`].
    pub fn new(config: impl Into<String>, settings: Settings) -> Self {
        let config = config.into();
        debug!(
            config_len = config.len(),
            debug = settings.debug,
            "Feed cleaner initialized"
        );
        Self {
            config,
            settings,
            host_debug: false,
        }
    }

    /// Create from a JSON configuration string, rejecting text that is not JSON.
    pub fn from_json(json: &str, settings: Settings) -> Result<Self, CleanerError> {
        let _: JsonValue = serde_json::from_str(json)?;
        Ok(Self::new(json, settings))
    }

    /// Create from a YAML configuration string.
    pub fn from_yaml(yaml: &str, settings: Settings) -> Result<Self, CleanerError> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self::new(serde_json::to_string(&value)?, settings))
    }

    /// Also surface notices when the host runs in debug mode.
    pub fn with_host_debug(mut self, host_debug: bool) -> Self {
        self.host_debug = host_debug;
        self
    }

    /// Stored configuration text.
    pub fn config(&self) -> &str {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether notice-level diagnostics are forwarded.
    pub fn debug_enabled(&self) -> bool {
        self.settings.debug || self.host_debug
    }

    /// Clean one fetched feed, logging through `tracing`.
    ///
    /// Never fails: on any problem the affected rule is skipped and the feed
    /// body is returned as the last successful rule left it.
    pub fn hook_feed_fetched(&self, feed_body: &[u8], fetch_url: &str, feed_id: &str) -> Vec<u8> {
        let sink = TracingSink::for_feed(fetch_url, feed_id);
        self.clean(feed_body, fetch_url, &sink)
    }

    /// Clean one fetched feed, reporting to `sink`.
    pub fn clean(&self, feed_body: &[u8], fetch_url: &str, sink: &dyn DiagnosticSink) -> Vec<u8> {
        RuleEngine::new(sink, self.debug_enabled()).run(feed_body, fetch_url, &self.config)
    }

    /// Decode every rule and compile its patterns.
    ///
    /// Returns the number of rules. Rules with an unknown `type` are accepted,
    /// since they match without effect at run time.
    pub fn validate(&self) -> Result<usize, CleanerError> {
        let rules = RuleSet::from_json(&self.config)
            .map_err(|e| CleanerError::InvalidRules(vec![e.to_string()]))?;

        let mut problems = Vec::new();
        for entry in rules.entries() {
            let rule = match &entry.rule {
                Ok(rule) => rule,
                Err(e) => {
                    problems.push(format!("For {}: {}", entry.context(), e));
                    continue;
                }
            };

            match &rule.matcher {
                None => problems.push(format!(
                    "For {}: Neither URL nor URL_re key is present",
                    entry.context()
                )),
                Some(url_match @ UrlMatch::Regex(_)) => {
                    if let Err(e) = UrlMatcherImpl::compile(url_match) {
                        problems.push(format!("For {}: {}", entry.context(), e));
                    }
                }
                Some(UrlMatch::Substring(_)) => {}
            }

            if let Err(e) = CompiledOperation::compile(&rule.operation) {
                problems.push(format!("For {}: {}", entry.context(), e));
            }
        }

        if !problems.is_empty() {
            return Err(CleanerError::InvalidRules(problems));
        }

        info!(rules = rules.len(), "Configuration is valid");
        Ok(rules.len())
    }
}

/// Feed cleaner construction errors.
#[derive(Debug, thiserror::Error)]
pub enum CleanerError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid rules: {}", .0.join("; "))]
    InvalidRules(Vec<String>),
}
