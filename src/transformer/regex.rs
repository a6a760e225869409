//! Whole-document regex substitution.

use super::{TransformError, TransformOutcome, Transformer};
use crate::context::TransformContext;
use crate::pattern::{FeedPattern, PatternError, Replacement};

/// Result of a global substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Substitution {
    /// Nothing matched; the input stands as is
    NoMatch,
    /// At least one match was replaced; `text` may legitimately be empty
    Replaced { text: Vec<u8>, count: usize },
}

impl Substitution {
    /// Number of matches replaced.
    pub fn count(&self) -> usize {
        match self {
            Self::NoMatch => 0,
            Self::Replaced { count, .. } => *count,
        }
    }
}

/// Replace every match of `pattern` in `text`.
pub fn substitute(pattern: &FeedPattern, replacement: &Replacement, text: &[u8]) -> Substitution {
    let template = replacement.template().as_bytes();
    let mut output = Vec::new();
    let mut last = 0;
    let mut count = 0;

    for caps in pattern.regex().captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        output.extend_from_slice(&text[last..whole.start()]);
        caps.expand(template, &mut output);
        last = whole.end();
        count += 1;
    }

    if count == 0 {
        return Substitution::NoMatch;
    }
    output.extend_from_slice(&text[last..]);
    Substitution::Replaced {
        text: output,
        count,
    }
}

/// Compile `pattern` and `replacement` from configuration syntax and
/// substitute in one step.
pub fn apply(text: &[u8], pattern: &str, replacement: &str) -> Result<Substitution, PatternError> {
    let pattern = FeedPattern::parse(pattern)?;
    Ok(substitute(&pattern, &Replacement::parse(replacement), text))
}

/// Regex transformer over the whole feed body.
pub struct RegexTransformer {
    pattern: FeedPattern,
    replacement: Replacement,
}

impl RegexTransformer {
    /// Create a new regex transformer from configuration.
    pub fn new(pattern: &str, replacement: &str) -> Result<Self, TransformError> {
        Ok(Self {
            pattern: FeedPattern::parse(pattern)?,
            replacement: Replacement::parse(replacement),
        })
    }
}

impl Transformer for RegexTransformer {
    fn transform(
        &self,
        feed: &[u8],
        ctx: &mut TransformContext<'_>,
    ) -> Result<TransformOutcome, TransformError> {
        let result = substitute(&self.pattern, &self.replacement, feed);

        ctx.notice(format!(
            "Applied (pattern \"{}\", replacement \"{}\") {} times",
            self.pattern.as_str(),
            self.replacement.as_str(),
            result.count()
        ));

        Ok(match result {
            Substitution::NoMatch => TransformOutcome::unchanged(),
            Substitution::Replaced { text, count } => TransformOutcome::rewritten(text, count),
        })
    }

    fn name(&self) -> &'static str {
        "regex_transformer"
    }
}
