//! Feed body transformers.

mod encoding;
mod prolog;
mod regex;
mod xpath;

pub use encoding::{declared_encoding, normalize, EncodingError, EncodingNormalizer, Normalization};
pub use self::regex::{apply, substitute, RegexTransformer, Substitution};
pub use xpath::{ParseDiagnostic, ParseErrorKind, XPathRegexTransformer};

use crate::config::Operation;
use crate::context::TransformContext;
use crate::pattern::PatternError;

/// Trait for transforming a feed body.
pub trait Transformer: Send + Sync {
    /// Transform the feed, recording diagnostics in `ctx`.
    ///
    /// An `Err` means the operation failed and the caller keeps `feed` as is.
    fn transform(
        &self,
        feed: &[u8],
        ctx: &mut TransformContext<'_>,
    ) -> Result<TransformOutcome, TransformError>;

    /// Get the transformer name for debugging.
    fn name(&self) -> &'static str;
}

/// Result of a successful transformation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOutcome {
    /// New feed body (`None` = unchanged)
    pub text: Option<Vec<u8>>,
    /// Number of substitutions performed
    pub substitutions: usize,
}

impl TransformOutcome {
    /// Outcome that leaves the feed untouched.
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Outcome that replaces the feed body.
    pub fn rewritten(text: Vec<u8>, substitutions: usize) -> Self {
        Self {
            text: Some(text),
            substitutions,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.text.is_none()
    }
}

/// An [`Operation`] with its patterns compiled.
pub enum CompiledOperation {
    Regex(RegexTransformer),
    XPathRegex(XPathRegexTransformer),
    EncodingNormalize(EncodingNormalizer),
    /// Unknown operation type: matched, does nothing, reports nothing
    Unrecognized,
}

impl CompiledOperation {
    /// Compile an operation from configuration.
    pub fn compile(operation: &Operation) -> Result<Self, TransformError> {
        Ok(match operation {
            Operation::Regex {
                pattern,
                replacement,
            } => Self::Regex(RegexTransformer::new(pattern, replacement)?),
            Operation::XPathRegex {
                xpath,
                pattern,
                replacement,
            } => Self::XPathRegex(XPathRegexTransformer::new(xpath, pattern, replacement)?),
            Operation::EncodingNormalize => Self::EncodingNormalize(EncodingNormalizer),
            Operation::Unrecognized(_) => Self::Unrecognized,
        })
    }

    /// The transformer to run, if the operation does anything.
    pub fn transformer(&self) -> Option<&dyn Transformer> {
        match self {
            Self::Regex(t) => Some(t as &dyn Transformer),
            Self::XPathRegex(t) => Some(t as &dyn Transformer),
            Self::EncodingNormalize(t) => Some(t as &dyn Transformer),
            Self::Unrecognized => None,
        }
    }
}

/// Errors that can occur during transformation.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    #[error("Feed couldn't be parsed ({errors} XML error(s))")]
    Parse { errors: usize },

    #[error("Invalid XPath expression: {0}")]
    XPath(String),

    #[error("Couldn't convert the encoding: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Failed to serialize XML: {0}")]
    Serialize(#[from] std::io::Error),
}
