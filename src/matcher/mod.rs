//! Fetch-URL matchers.

mod url;

pub use url::UrlMatcherImpl;

use crate::config::Rule;
use crate::pattern::PatternError;

/// Trait for deciding whether a rule applies to a fetched feed.
pub trait Matcher: Send + Sync {
    /// Check if this matcher accepts the given fetch URL.
    fn matches(&self, fetch_url: &str) -> bool;

    /// Get the matcher name for debugging.
    fn name(&self) -> &'static str;
}

/// Decide whether `rule` applies to `fetch_url`.
///
/// A rule without a matcher, or whose `URL_re` does not compile, is an error
/// the caller reports before skipping the rule.
pub fn matches(rule: &Rule, fetch_url: &str) -> Result<bool, MatchError> {
    let config = rule.matcher.as_ref().ok_or(MatchError::NoMatcher)?;
    let matcher = UrlMatcherImpl::compile(config)?;
    Ok(matcher.matches(fetch_url))
}

/// Errors that can occur while matching a rule.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("Neither URL nor URL_re key is present")]
    NoMatcher,

    #[error("Invalid URL_re pattern: {0}")]
    InvalidPattern(#[from] PatternError),
}
