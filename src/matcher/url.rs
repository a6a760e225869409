//! URL matching implementation.

use super::{MatchError, Matcher};
use crate::config::UrlMatch;
use crate::pattern::FeedPattern;

/// Compiled URL matcher.
pub enum UrlMatcherImpl {
    /// Literal substring match
    Substring(String),
    /// Delimited regex match
    Regex(FeedPattern),
}

impl UrlMatcherImpl {
    /// Compile a URL matcher from configuration.
    pub fn compile(config: &UrlMatch) -> Result<Self, MatchError> {
        match config {
            UrlMatch::Substring(needle) => Ok(Self::Substring(needle.clone())),
            UrlMatch::Regex(pattern) => Ok(Self::Regex(FeedPattern::parse(pattern)?)),
        }
    }
}

impl Matcher for UrlMatcherImpl {
    fn matches(&self, fetch_url: &str) -> bool {
        match self {
            Self::Substring(needle) => fetch_url.contains(needle.as_str()),
            Self::Regex(pattern) => pattern.is_match(fetch_url.as_bytes()),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Substring(_) => "url_substring",
            Self::Regex(_) => "url_regex",
        }
    }
}
