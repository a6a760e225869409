//! Configuration types for the feed cleaner.
//!
//! Rules are stored as JSON: either an array of rule objects or, in the legacy
//! shape, an object keyed by URL substring. [`RuleSet::from_json`] normalizes
//! both shapes and decodes every entry into a [`Rule`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Host-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Extended logging: surface notice-level diagnostics
    pub debug: bool,
}

/// A rule object exactly as it appears in the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRule {
    /// URL substring matcher
    #[serde(rename = "URL", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// URL regex matcher (delimited pattern)
    #[serde(rename = "URL_re", default, skip_serializing_if = "Option::is_none")]
    pub url_re: Option<String>,
    /// Operation: regex, xpath_regex or utf-8 (case-insensitive)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Delimited regex pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Replacement with back-references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    /// XPath 1.0 expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
}

/// How a rule selects feeds by fetch URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlMatch {
    /// Literal, case-sensitive substring of the URL
    Substring(String),
    /// Delimited regex matched anywhere in the URL
    Regex(String),
}

/// The transformation a matched rule performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Regex substitution over the whole feed body
    Regex { pattern: String, replacement: String },
    /// Regex substitution over text nodes selected by XPath
    XPathRegex {
        xpath: String,
        pattern: String,
        replacement: String,
    },
    /// Transcode to UTF-8 based on the XML declaration
    EncodingNormalize,
    /// Any other `type` value: the rule matches and does nothing
    Unrecognized(String),
}

impl Operation {
    /// Short name used in logs.
    pub fn name(&self) -> &str {
        match self {
            Self::Regex { .. } => "regex",
            Self::XPathRegex { .. } => "xpath_regex",
            Self::EncodingNormalize => "utf-8",
            Self::Unrecognized(kind) => kind.as_str(),
        }
    }
}

/// A decoded rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// `None` when the rule has neither `URL` nor `URL_re`
    pub matcher: Option<UrlMatch>,
    pub operation: Operation,
}

impl Rule {
    /// Decode a configuration rule, checking the fields its operation needs.
    pub fn decode(raw: &RawRule) -> Result<Self, ConfigError> {
        let matcher = match (&raw.url, &raw.url_re) {
            (Some(url), _) => Some(UrlMatch::Substring(url.clone())),
            (None, Some(re)) => Some(UrlMatch::Regex(re.clone())),
            (None, None) => None,
        };

        let kind = raw.kind.as_deref().unwrap_or_default();
        let operation = match kind.to_lowercase().as_str() {
            "regex" => Operation::Regex {
                pattern: required(&raw.pattern, "pattern", kind)?,
                replacement: required(&raw.replacement, "replacement", kind)?,
            },
            "xpath_regex" => Operation::XPathRegex {
                xpath: required(&raw.xpath, "xpath", kind)?,
                pattern: required(&raw.pattern, "pattern", kind)?,
                replacement: required(&raw.replacement, "replacement", kind)?,
            },
            "utf-8" => Operation::EncodingNormalize,
            _ => Operation::Unrecognized(kind.to_string()),
        };

        Ok(Self { matcher, operation })
    }
}

fn required(value: &Option<String>, field: &'static str, kind: &str) -> Result<String, ConfigError> {
    value.clone().ok_or_else(|| ConfigError::MissingField {
        field,
        kind: kind.to_string(),
    })
}

/// Key of an entry in the stored configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleKey {
    /// Position in an array, or a numeric object key
    Index(usize),
    /// Non-numeric object key (legacy URL matcher)
    Name(String),
}

/// One entry of a [`RuleSet`].
#[derive(Debug, Clone)]
pub struct RuleEntry {
    pub key: RuleKey,
    /// The entry as stored, used as diagnostic context
    pub source: JsonValue,
    /// The entry was rewritten from the legacy object shape
    pub legacy: bool,
    /// Decoded rule, or why it could not be decoded
    pub rule: Result<Rule, ConfigError>,
}

impl RuleEntry {
    /// Compact JSON of the stored entry.
    pub fn context(&self) -> String {
        self.source.to_string()
    }
}

/// Ordered, read-only rule collection for one run.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    entries: Vec<RuleEntry>,
}

impl RuleSet {
    /// Decode stored configuration text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let value: JsonValue = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    /// Decode an already-parsed configuration value.
    pub fn from_value(value: &JsonValue) -> Result<Self, ConfigError> {
        let entries = normalize_shape(value)?
            .into_iter()
            .map(|(key, source)| decode_entry(key, source))
            .collect();
        Ok(Self { entries })
    }

    /// Entries in evaluation order.
    pub fn entries(&self) -> &[RuleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Flatten either configuration shape into keyed entries, preserving order.
pub fn normalize_shape(value: &JsonValue) -> Result<Vec<(RuleKey, JsonValue)>, ConfigError> {
    match value {
        JsonValue::Array(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(i, item)| (RuleKey::Index(i), item.clone()))
            .collect()),
        JsonValue::Object(map) => Ok(map
            .iter()
            .map(|(key, item)| (parse_key(key), item.clone()))
            .collect()),
        other => Err(ConfigError::NotACollection(json_type_name(other))),
    }
}

fn parse_key(key: &str) -> RuleKey {
    match key.trim().parse::<usize>() {
        Ok(index) => RuleKey::Index(index),
        Err(_) => RuleKey::Name(key.to_string()),
    }
}

fn decode_entry(key: RuleKey, mut source: JsonValue) -> RuleEntry {
    let mut legacy = false;

    if let (RuleKey::Name(name), JsonValue::Object(map)) = (&key, &mut source) {
        if !map.contains_key("URL") && !map.contains_key("URL_re") {
            map.insert("URL".to_string(), JsonValue::String(name.clone()));
            legacy = true;
        }
    }

    let rule = match &source {
        JsonValue::Object(map) => decode_object(map),
        other => Err(ConfigError::NotAnObject(json_type_name(other))),
    };

    RuleEntry {
        key,
        source,
        legacy,
        rule,
    }
}

fn decode_object(map: &Map<String, JsonValue>) -> Result<Rule, ConfigError> {
    let raw: RawRule = serde_json::from_value(JsonValue::Object(map.clone()))
        .map_err(|e| ConfigError::InvalidRule(e.to_string()))?;
    Rule::decode(&raw)
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Errors that can occur while decoding the configuration.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid JSON: {0}")]
    Json(String),

    #[error("Configuration must be an array or object of rules, found {0}")]
    NotACollection(&'static str),

    #[error("Rule must be an object, found {0}")]
    NotAnObject(&'static str),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Rule of type \"{kind}\" is missing the \"{field}\" key")]
    MissingField { field: &'static str, kind: String },
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(!settings.debug);

        let settings: Settings = serde_json::from_str(r#"{"debug": true}"#).unwrap();
        assert!(settings.debug);
    }

    #[test]
    fn test_raw_rule_parsing() {
        let json = r#"{
            "URL": "example.com",
            "type": "xpath_regex",
            "xpath": "//item/title",
            "pattern": "/ad/i",
            "replacement": "AD",
            "comment": "unknown keys are ignored"
        }"#;
        let raw: RawRule = serde_json::from_str(json).unwrap();
        assert_eq!(raw.url.as_deref(), Some("example.com"));
        assert_eq!(raw.kind.as_deref(), Some("xpath_regex"));
        assert_eq!(raw.xpath.as_deref(), Some("//item/title"));
        assert_eq!(raw.url_re, None);
    }

    #[test]
    fn test_decode_operations() {
        let raw = RawRule {
            url_re: Some("/example/".to_string()),
            kind: Some("REGEX".to_string()),
            pattern: Some("/a/".to_string()),
            replacement: Some("b".to_string()),
            ..Default::default()
        };
        let rule = Rule::decode(&raw).unwrap();
        assert_eq!(rule.matcher, Some(UrlMatch::Regex("/example/".to_string())));
        assert_eq!(
            rule.operation,
            Operation::Regex {
                pattern: "/a/".to_string(),
                replacement: "b".to_string()
            }
        );

        let raw = RawRule {
            url: Some("x".to_string()),
            kind: Some("UTF-8".to_string()),
            ..Default::default()
        };
        assert_eq!(Rule::decode(&raw).unwrap().operation, Operation::EncodingNormalize);
    }

    #[test]
    fn test_substring_takes_precedence() {
        let raw = RawRule {
            url: Some("plain".to_string()),
            url_re: Some("/re/".to_string()),
            kind: Some("utf-8".to_string()),
            ..Default::default()
        };
        let rule = Rule::decode(&raw).unwrap();
        assert_eq!(rule.matcher, Some(UrlMatch::Substring("plain".to_string())));
    }

    #[test]
    fn test_missing_required_field() {
        let raw = RawRule {
            url: Some("x".to_string()),
            kind: Some("xpath_regex".to_string()),
            pattern: Some("/a/".to_string()),
            replacement: Some("b".to_string()),
            ..Default::default()
        };
        let err = Rule::decode(&raw).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingField {
                field: "xpath",
                kind: "xpath_regex".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_and_missing_type() {
        let raw = RawRule {
            url: Some("x".to_string()),
            kind: Some("rot13".to_string()),
            ..Default::default()
        };
        assert_eq!(
            Rule::decode(&raw).unwrap().operation,
            Operation::Unrecognized("rot13".to_string())
        );

        let raw = RawRule {
            url: Some("x".to_string()),
            ..Default::default()
        };
        assert_eq!(
            Rule::decode(&raw).unwrap().operation,
            Operation::Unrecognized(String::new())
        );
    }

    #[test]
    fn test_array_shape() {
        let rules = RuleSet::from_value(&json!([
            {"URL": "a", "type": "utf-8"},
            {"URL_re": "/b/", "type": "utf-8"}
        ]))
        .unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.entries()[0].key, RuleKey::Index(0));
        assert_eq!(rules.entries()[1].key, RuleKey::Index(1));
        assert!(!rules.entries()[0].legacy);
    }

    #[test]
    fn test_legacy_object_shape() {
        let rules = RuleSet::from_json(
            r#"{
                "zeta.example": {"type": "utf-8"},
                "alpha.example": {"type": "regex", "pattern": "/a/", "replacement": "b"},
                "3": {"URL": "numeric", "type": "utf-8"}
            }"#,
        )
        .unwrap();

        let entries = rules.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].key, RuleKey::Name("zeta.example".to_string()));
        assert!(entries[0].legacy);
        assert_eq!(
            entries[0].rule.as_ref().unwrap().matcher,
            Some(UrlMatch::Substring("zeta.example".to_string()))
        );
        assert_eq!(entries[1].key, RuleKey::Name("alpha.example".to_string()));
        assert_eq!(entries[2].key, RuleKey::Index(3));
        assert!(!entries[2].legacy);
    }

    #[test]
    fn test_legacy_key_keeps_explicit_matcher() {
        let rules = RuleSet::from_value(&json!({
            "ignored": {"URL_re": "/x/", "type": "utf-8"}
        }))
        .unwrap();
        let entry = &rules.entries()[0];
        assert!(!entry.legacy);
        assert_eq!(
            entry.rule.as_ref().unwrap().matcher,
            Some(UrlMatch::Regex("/x/".to_string()))
        );
    }

    #[test]
    fn test_malformed_configuration() {
        assert!(matches!(RuleSet::from_json("{not json"), Err(ConfigError::Json(_))));
        assert_eq!(
            RuleSet::from_json("\"rules\"").unwrap_err(),
            ConfigError::NotACollection("string")
        );
    }

    #[test]
    fn test_invalid_entries_are_kept_in_order() {
        let rules = RuleSet::from_value(&json!([
            "not a rule",
            {"URL": 5, "type": "utf-8"},
            {"URL": "ok", "type": "utf-8"}
        ]))
        .unwrap();
        let entries = rules.entries();
        assert_eq!(
            entries[0].rule.as_ref().unwrap_err(),
            &ConfigError::NotAnObject("string")
        );
        assert!(matches!(entries[1].rule, Err(ConfigError::InvalidRule(_))));
        assert!(entries[2].rule.is_ok());
    }
}
