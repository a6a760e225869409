//! UTF-8 normalization driven by the XML declaration.

use super::{TransformError, TransformOutcome, Transformer};
use crate::context::TransformContext;
use encoding_rs::{DecoderResult, Encoding, REPLACEMENT};
use regex::bytes::Regex;
use std::sync::LazyLock;

/// Matches an XML declaration carrying an encoding at the very start of a document.
/// Groups: 1 = everything up to the opening quote of the encoding value,
/// 2 = the encoding name, 3 = the rest of the declaration.
static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
        ^(<\?xml
            [\t\n\r\x20]+ version [\t\n\r\x20]* = [\t\n\r\x20]* ["'] 1\.[0-9]+ ["']
            [\t\n\r\x20]+ encoding [\t\n\r\x20]* = [\t\n\r\x20]* ["'])
        ([A-Za-z][A-Za-z0-9._-]*)
        (["']
            (?: [\t\n\r\x20]+ standalone [\t\n\r\x20]* = [\t\n\r\x20]* ["'] (?:yes|no) ["'] )?
            [\t\n\r\x20]* \?>)
        "#,
    )
    .unwrap()
});

/// Encoding named by the document's XML declaration, if any.
pub fn declared_encoding(text: &[u8]) -> Option<&str> {
    let caps = DECLARATION.captures(text)?;
    std::str::from_utf8(caps.get(2)?.as_bytes()).ok()
}

/// What [`normalize`] did with a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalization {
    /// No XML declaration with an encoding
    NoDeclaration,
    /// Declared encoding is UTF-8 already
    AlreadyUtf8,
    /// Transcoded to UTF-8 with the declaration rewritten
    Converted(Vec<u8>),
}

impl Normalization {
    pub fn did_convert(&self) -> bool {
        matches!(self, Self::Converted(_))
    }
}

/// Transcode `text` to UTF-8 according to its XML declaration.
///
/// Malformed byte sequences are dropped rather than replaced.
pub fn normalize(text: &[u8]) -> Result<Normalization, EncodingError> {
    let Some(label) = declared_encoding(text) else {
        return Ok(Normalization::NoDeclaration);
    };
    if label.eq_ignore_ascii_case("UTF-8") {
        return Ok(Normalization::AlreadyUtf8);
    }

    let encoding = Encoding::for_label(label.as_bytes())
        .filter(|encoding| *encoding != REPLACEMENT)
        .ok_or_else(|| EncodingError::Unsupported(label.to_string()))?;

    let decoded = decode_dropping_malformed(encoding, text);
    let converted = DECLARATION
        .replacen(decoded.as_bytes(), 1, &b"${1}UTF-8${3}"[..])
        .into_owned();

    Ok(Normalization::Converted(converted))
}

fn decode_dropping_malformed(encoding: &'static Encoding, bytes: &[u8]) -> String {
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let capacity = decoder
        .max_utf8_buffer_length_without_replacement(bytes.len())
        .unwrap_or(bytes.len().saturating_mul(3));
    let mut output = String::with_capacity(capacity);
    let mut input = bytes;

    loop {
        let (result, read) = decoder.decode_to_string_without_replacement(input, &mut output, true);
        input = &input[read..];
        match result {
            DecoderResult::InputEmpty => return output,
            DecoderResult::OutputFull => {
                let needed = decoder
                    .max_utf8_buffer_length_without_replacement(input.len())
                    .unwrap_or(input.len().saturating_mul(3));
                output.reserve(needed.max(16));
            }
            DecoderResult::Malformed(_, _) => {}
        }
    }
}

/// Encoding normalization transformer.
pub struct EncodingNormalizer;

impl Transformer for EncodingNormalizer {
    fn transform(
        &self,
        feed: &[u8],
        ctx: &mut TransformContext<'_>,
    ) -> Result<TransformOutcome, TransformError> {
        match normalize(feed)? {
            Normalization::NoDeclaration => {
                ctx.notice("No encoding declared");
                Ok(TransformOutcome::unchanged())
            }
            Normalization::AlreadyUtf8 => {
                ctx.notice("Encoding is UTF-8 already");
                Ok(TransformOutcome::unchanged())
            }
            Normalization::Converted(text) => {
                ctx.notice("Encoding conversion to UTF-8 was successful");
                Ok(TransformOutcome::rewritten(text, 0))
            }
        }
    }

    fn name(&self) -> &'static str {
        "encoding_normalizer"
    }
}

/// Errors that can occur during encoding normalization.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("unsupported encoding \"{0}\"")]
    Unsupported(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const LATIN1: &[u8] =
        b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><rss><item><title>caf\xE9</title></item></rss>";

    #[test]
    fn test_declared_encoding() {
        assert_eq!(declared_encoding(LATIN1), Some("ISO-8859-1"));
        assert_eq!(
            declared_encoding(b"<?xml version='1.1'\n  encoding='koi8-r' standalone='yes' ?><a/>"),
            Some("koi8-r")
        );
        assert_eq!(declared_encoding(b"<?xml version=\"1.0\"?><a/>"), None);
        assert_eq!(declared_encoding(b" <?xml version=\"1.0\" encoding=\"x\"?>"), None);
        assert_eq!(declared_encoding(b"<?XML version=\"1.0\" encoding=\"x\"?>"), None);
    }

    #[test]
    fn test_latin1_to_utf8() {
        let result = normalize(LATIN1).unwrap();
        assert_eq!(
            result,
            Normalization::Converted(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?><rss><item><title>café</title></item></rss>"
                    .as_bytes()
                    .to_vec()
            )
        );
    }

    #[test]
    fn test_standalone_clause_preserved() {
        let input = b"<?xml version='1.0' encoding='windows-1252' standalone='no'?><a>\x93hi\x94</a>";
        let Normalization::Converted(output) = normalize(input).unwrap() else {
            panic!("expected conversion");
        };
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "<?xml version='1.0' encoding='UTF-8' standalone='no'?><a>\u{201C}hi\u{201D}</a>"
        );
    }

    #[test]
    fn test_noop_cases() {
        assert_eq!(normalize(b"<rss/>").unwrap(), Normalization::NoDeclaration);
        assert_eq!(
            normalize(b"<?xml version=\"1.0\" encoding=\"utf-8\"?><rss/>").unwrap(),
            Normalization::AlreadyUtf8
        );
    }

    #[test]
    fn test_idempotent() {
        let Normalization::Converted(once) = normalize(LATIN1).unwrap() else {
            panic!("expected conversion");
        };
        assert_eq!(normalize(&once).unwrap(), Normalization::AlreadyUtf8);
    }

    #[test]
    fn test_unsupported_encoding() {
        let input = b"<?xml version=\"1.0\" encoding=\"x-no-such-charset\"?><rss/>";
        assert!(matches!(normalize(input), Err(EncodingError::Unsupported(label)) if label == "x-no-such-charset"));
    }

    #[test]
    fn test_malformed_sequences_dropped() {
        let input = b"<?xml version=\"1.0\" encoding=\"Shift_JIS\"?><a>x\x82</a>";
        let Normalization::Converted(output) = normalize(input).unwrap() else {
            panic!("expected conversion");
        };
        let output = String::from_utf8(output).unwrap();
        assert!(output.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(output.ends_with("<a>x</a>"));
        assert!(!output.contains('\u{FFFD}'));
    }

    #[test]
    fn test_transformer_notices() {
        let mut ctx = TransformContext::new("http://example.com", "{}");
        let outcome = EncodingNormalizer.transform(LATIN1, &mut ctx).unwrap();
        assert!(!outcome.is_unchanged());
        assert_eq!(
            ctx.diagnostics()[0].message,
            "Encoding conversion to UTF-8 was successful"
        );

        let mut ctx = TransformContext::new("http://example.com", "{}");
        let outcome = EncodingNormalizer.transform(b"<rss/>", &mut ctx).unwrap();
        assert!(outcome.is_unchanged());
    }
}
