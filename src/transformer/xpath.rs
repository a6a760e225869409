//! XPath-scoped regex substitution.
//!
//! The feed is parsed into a DOM, the XPath expression selects nodes, and the
//! regex runs over text owned by those nodes:
//!
//! - a selected text node is rewritten directly;
//! - a selected element has its *direct* text children rewritten. Text inside
//!   nested elements is left alone, so `//item` does not reach
//!   `<item><title>text</title></item>`; select `//item/title` for that;
//! - a selected attribute has its value rewritten.
//!
//! The parser only reads UTF-8. A document declaring another encoding is run
//! through [`normalize`] and parsed once more before giving up. A leading
//! byte-order mark is dropped, and the `<!DOCTYPE>` is set aside during parsing
//! and written back unchanged. The parser stops at the first error, so a
//! broken feed reports exactly one diagnostic.
//!
//! Namespace prefixes declared on the document element can be used in the
//! expression (`//content:encoded`). A prefix the document does not declare
//! is an XPath error.

use super::encoding::{declared_encoding, normalize, Normalization};
use super::prolog::{restore_doctype, strip_bom, Prolog};
use super::regex::{substitute, Substitution};
use super::{TransformError, TransformOutcome, Transformer};
use crate::context::TransformContext;
use crate::pattern::{FeedPattern, Replacement};
use std::borrow::Cow;
use std::fmt;
use sxd_document::dom::{Attribute, ChildOfElement, ChildOfRoot, Document, Text};
use sxd_document::writer::Writer;
use sxd_document::{parser, Package};
use sxd_xpath::nodeset::Node;
use sxd_xpath::{Context, Factory, Value, XPath};
use tracing::trace;

/// Kind of XML parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The document declares an encoding the parser cannot read
    UnsupportedEncoding,
    /// The bytes are not valid UTF-8
    InvalidUtf8,
    /// The document is not well-formed XML
    Malformed,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedEncoding => f.write_str("unsupported-encoding"),
            Self::InvalidUtf8 => f.write_str("invalid-utf8"),
            Self::Malformed => f.write_str("malformed-xml"),
        }
    }
}

/// A parse error with its position in the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    pub kind: ParseErrorKind,
    /// 1-based line
    pub line: usize,
    /// 1-based column, in characters
    pub column: usize,
    pub message: String,
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "XML error {} at line {} (column {}): {}",
            self.kind, self.line, self.column, self.message
        )
    }
}

/// A parsed feed and the declaration the parser cannot keep.
struct ParsedFeed {
    package: Package,
    doctype: Option<Vec<u8>>,
}

/// Parse the feed, collecting the problems found.
fn parse_feed(feed: &[u8]) -> Result<ParsedFeed, Vec<ParseDiagnostic>> {
    if let Some(label) = declared_encoding(feed) {
        if !label.eq_ignore_ascii_case("UTF-8") {
            return Err(vec![ParseDiagnostic {
                kind: ParseErrorKind::UnsupportedEncoding,
                line: 1,
                column: 1,
                message: format!("Unsupported encoding {label}"),
            }]);
        }
    }

    let Prolog { text, doctype } = Prolog::split(feed);

    let text = std::str::from_utf8(&text).map_err(|e| {
        let offset = e.valid_up_to();
        let (line, column) = position(feed, offset);
        vec![ParseDiagnostic {
            kind: ParseErrorKind::InvalidUtf8,
            line,
            column,
            message: format!("Input is not proper UTF-8 (byte offset {offset})"),
        }]
    })?;

    let package = parser::parse(text).map_err(|e| {
        let (line, column) = position(feed, e.location());
        vec![ParseDiagnostic {
            kind: ParseErrorKind::Malformed,
            line,
            column,
            message: e.to_string(),
        }]
    })?;

    Ok(ParsedFeed { package, doctype })
}

/// Line and column of a byte offset.
fn position(text: &[u8], offset: usize) -> (usize, usize) {
    let before = &text[..offset.min(text.len())];
    let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
    let line_start = before
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);
    let column = String::from_utf8_lossy(&before[line_start..]).chars().count() + 1;
    (line, column)
}

fn compile_xpath(xpath: &str) -> Result<XPath, TransformError> {
    Factory::new()
        .build(xpath)
        .map_err(|e| TransformError::XPath(e.to_string()))?
        .ok_or_else(|| TransformError::XPath("XPath was empty".to_string()))
}

/// Namespace prefixes used by an expression, in order of first use.
fn namespace_prefixes(xpath: &str) -> Vec<String> {
    let mut prefixes: Vec<String> = Vec::new();
    let mut chars = xpath.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if c == '"' || c == '\'' {
            for (_, d) in chars.by_ref() {
                if d == c {
                    break;
                }
            }
            continue;
        }
        if !is_name_start(c) {
            continue;
        }

        let mut end = start + c.len_utf8();
        while let Some(&(i, d)) = chars.peek() {
            if !is_name_char(d) {
                break;
            }
            end = i + d.len_utf8();
            chars.next();
        }

        // `p:name` and `p:*`, but not the `::` of an axis
        let qualified = xpath[end..]
            .strip_prefix(':')
            .is_some_and(|rest| rest.starts_with(|d: char| is_name_start(d) || d == '*'));
        let prefix = &xpath[start..end];
        if qualified && !prefixes.iter().any(|p| p == prefix) {
            prefixes.push(prefix.to_string());
        }
    }

    prefixes
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Evaluation context binding every prefix in scope on the document element.
fn namespace_context<'d>(document: &Document<'d>) -> (Context<'d>, Vec<&'d str>) {
    let mut context = Context::new();
    let mut bound = Vec::new();

    let element = document.root().children().into_iter().find_map(|child| match child {
        ChildOfRoot::Element(element) => Some(element),
        _ => None,
    });
    for namespace in element.map(|e| e.namespaces_in_scope()).unwrap_or_default() {
        context.set_namespace(namespace.prefix(), namespace.uri());
        bound.push(namespace.prefix());
    }

    (context, bound)
}

/// XPath-scoped regex transformer.
pub struct XPathRegexTransformer {
    xpath: String,
    /// Namespace prefixes the expression uses
    prefixes: Vec<String>,
    pattern: FeedPattern,
    replacement: Replacement,
}

impl XPathRegexTransformer {
    /// Create a new XPath transformer from configuration.
    ///
    /// The expression is compiled here so that syntax errors surface at
    /// validation; it is compiled again for each document, as compiled
    /// expressions cannot be shared across threads.
    pub fn new(xpath: &str, pattern: &str, replacement: &str) -> Result<Self, TransformError> {
        compile_xpath(xpath)?;
        Ok(Self {
            xpath: xpath.to_string(),
            prefixes: namespace_prefixes(xpath),
            pattern: FeedPattern::parse(pattern)?,
            replacement: Replacement::parse(replacement),
        })
    }

    /// Substitute within one string value. `None` when nothing changed.
    fn rewrite(&self, value: &str, ctx: &mut TransformContext<'_>) -> Option<(String, usize)> {
        match substitute(&self.pattern, &self.replacement, value.as_bytes()) {
            Substitution::NoMatch => None,
            Substitution::Replaced { text, count } => match String::from_utf8(text) {
                Ok(text) => Some((text, count)),
                Err(_) => {
                    ctx.warning("Replacement produced invalid UTF-8 in a text node; node left unchanged");
                    None
                }
            },
        }
    }

    fn rewrite_text(&self, text: Text<'_>, ctx: &mut TransformContext<'_>) -> usize {
        match self.rewrite(text.text(), ctx) {
            Some((value, count)) => {
                text.set_text(&value);
                count
            }
            None => 0,
        }
    }

    fn rewrite_attribute(&self, attribute: Attribute<'_>, ctx: &mut TransformContext<'_>) -> usize {
        let Some(owner) = attribute.parent() else {
            return 0;
        };
        match self.rewrite(attribute.value(), ctx) {
            Some((value, count)) => {
                owner.set_attribute_value(attribute.name(), &value);
                count
            }
            None => 0,
        }
    }
}

impl Transformer for XPathRegexTransformer {
    fn transform(
        &self,
        feed: &[u8],
        ctx: &mut TransformContext<'_>,
    ) -> Result<TransformOutcome, TransformError> {
        let feed = strip_bom(feed);
        let mut text = Cow::Borrowed(feed);
        let mut parsed = parse_feed(&text);

        let unsupported_encoding = matches!(&parsed, Err(errors)
            if errors.iter().any(|e| e.kind == ParseErrorKind::UnsupportedEncoding));
        if unsupported_encoding {
            ctx.notice("Trying to convert encoding of feed data to UTF-8");
            match normalize(feed) {
                Ok(Normalization::Converted(converted)) => {
                    ctx.notice("Encoding conversion to UTF-8 was successful");
                    text = Cow::Owned(converted);
                }
                Ok(_) => {}
                Err(e) => ctx.warning(format!("Couldn't convert the encoding: {e}")),
            }
            parsed = parse_feed(&text);
        }

        let ParsedFeed { package, doctype } = match parsed {
            Ok(parsed) => parsed,
            Err(errors) => {
                for error in &errors {
                    ctx.warning(error.to_string());
                }
                return Err(TransformError::Parse {
                    errors: errors.len(),
                });
            }
        };
        let document = package.as_document();

        let (context, bound) = namespace_context(&document);
        if let Some(prefix) = self
            .prefixes
            .iter()
            .find(|prefix| !bound.iter().any(|b| *b == prefix.as_str()))
        {
            return Err(TransformError::XPath(format!(
                "namespace prefix \"{prefix}\" is not declared by the feed"
            )));
        }

        let xpath = compile_xpath(&self.xpath)?;
        let nodes = match xpath.evaluate(&context, document.root()) {
            Ok(Value::Nodeset(nodes)) => nodes.document_order(),
            Ok(_) => Vec::new(),
            Err(e) => return Err(TransformError::XPath(e.to_string())),
        };
        ctx.notice(format!(
            "Found {} nodes with XPath \"{}\"",
            nodes.len(),
            self.xpath
        ));

        let mut substitutions = 0;
        for node in nodes {
            match node {
                Node::Text(text) => substitutions += self.rewrite_text(text, ctx),
                Node::Attribute(attribute) => {
                    substitutions += self.rewrite_attribute(attribute, ctx)
                }
                Node::Element(element) => {
                    for child in element.children() {
                        if let ChildOfElement::Text(text) = child {
                            substitutions += self.rewrite_text(text, ctx);
                        }
                    }
                }
                _ => trace!(xpath = %self.xpath, "Selected node has no text to rewrite"),
            }
        }

        ctx.notice(format!(
            "Applied (pattern \"{}\", replacement \"{}\") {} times",
            self.pattern.as_str(),
            self.replacement.as_str(),
            substitutions
        ));

        let mut output = Vec::with_capacity(text.len());
        Writer::new()
            .set_single_quotes(false)
            .set_write_encoding(true)
            .format_document(&document, &mut output)?;
        if let Some(doctype) = &doctype {
            restore_doctype(&mut output, doctype);
        }

        Ok(TransformOutcome::rewritten(output, substitutions))
    }

    fn name(&self) -> &'static str {
        "xpath_regex_transformer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Severity;

    fn run(
        xpath: &str,
        pattern: &str,
        replacement: &str,
        feed: &[u8],
    ) -> (Result<TransformOutcome, TransformError>, TransformContext<'static>) {
        let transformer = XPathRegexTransformer::new(xpath, pattern, replacement).unwrap();
        let mut ctx = TransformContext::new("http://example.com/rss", "{}");
        let result = transformer.transform(feed, &mut ctx);
        (result, ctx)
    }

    fn output(result: Result<TransformOutcome, TransformError>) -> (String, usize) {
        let outcome = result.unwrap();
        (String::from_utf8(outcome.text.unwrap()).unwrap(), outcome.substitutions)
    }

    #[test]
    fn test_element_text_rewritten() {
        let (result, _) = run(
            "//item/title",
            "/ad/i",
            "AD",
            b"<item><title>Best ad ever</title></item>",
        );
        let (xml, count) = output(result);
        assert!(xml.contains("<title>Best AD ever</title>"));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_text_node_selected() {
        let (result, _) = run(
            "//title/text()",
            "/Ad/",
            "",
            b"<rss><item><title>Ad: Buy</title></item><item><title>Ad: Sell</title></item></rss>",
        );
        let (xml, count) = output(result);
        assert!(xml.contains("<title>: Buy</title>"));
        assert!(xml.contains("<title>: Sell</title>"));
        assert_eq!(count, 2);
    }

    #[test]
    fn test_only_direct_text_children() {
        let (result, _) = run(
            "//title",
            "/ad/",
            "AD",
            b"<item><title>ad <b>ad</b> ad</title></item>",
        );
        let (xml, count) = output(result);
        assert!(xml.contains("<title>AD <b>ad</b> AD</title>"));
        assert_eq!(count, 2);
    }

    #[test]
    fn test_attribute_value_rewritten() {
        let (result, _) = run(
            "//link/@href",
            "/^http:/",
            "https:",
            b"<item><link href=\"http://example.com/a\">http://x</link></item>",
        );
        let (xml, count) = output(result);
        assert!(xml.contains("href=\"https://example.com/a\""));
        assert!(xml.contains(">http://x</link>"));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_no_nodes_still_reserialized() {
        let (result, ctx) = run("//missing", "/a/", "b", b"<rss><a>a</a></rss>");
        let (xml, count) = output(result);
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<a>a</a>"));
        assert_eq!(count, 0);
        assert_eq!(ctx.diagnostics()[0].message, "Found 0 nodes with XPath \"//missing\"");
    }

    #[test]
    fn test_unparsable_feed() {
        let (result, ctx) = run("//title", "/a/", "b", b"<rss>\n  <item><title>a</item>\n</rss>");
        assert!(matches!(result, Err(TransformError::Parse { errors: 1 })));

        let warnings: Vec<_> = ctx
            .diagnostics()
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.starts_with("XML error malformed-xml at line 2 (column "));
    }

    #[test]
    fn test_encoding_retry() {
        let feed = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><rss><title>caf\xE9</title></rss>";
        let (result, ctx) = run("//title", "/caf/", "CAF", feed);
        let (xml, count) = output(result);
        assert!(xml.contains("<title>CAF\u{e9}</title>"));
        assert!(xml.contains("encoding=\"UTF-8\""));
        assert_eq!(count, 1);
        assert_eq!(
            ctx.diagnostics()[0].message,
            "Trying to convert encoding of feed data to UTF-8"
        );
    }

    #[test]
    fn test_encoding_retry_unsupported() {
        let feed = b"<?xml version=\"1.0\" encoding=\"x-bogus\"?><rss/>";
        let (result, ctx) = run("//rss", "/a/", "b", feed);
        assert!(matches!(result, Err(TransformError::Parse { .. })));
        assert!(ctx
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("unsupported encoding \"x-bogus\"")));
    }

    #[test]
    fn test_invalid_utf8_without_declaration() {
        let (result, ctx) = run("//a", "/a/", "b", b"<a>\xFF</a>");
        assert!(matches!(result, Err(TransformError::Parse { errors: 1 })));
        assert_eq!(
            ctx.diagnostics()[0].message,
            "XML error invalid-utf8 at line 1 (column 4): Input is not proper UTF-8 (byte offset 3)"
        );
    }

    #[test]
    fn test_invalid_xpath_rejected_at_construction() {
        assert!(matches!(
            XPathRegexTransformer::new("//[", "/a/", "b"),
            Err(TransformError::XPath(_))
        ));
        assert!(matches!(
            XPathRegexTransformer::new("", "/a/", "b"),
            Err(TransformError::XPath(_))
        ));
    }

    #[test]
    fn test_namespaced_element_selected() {
        let feed = b"<rss xmlns:content=\"http://purl.org/rss/1.0/modules/content/\"><item><content:encoded>Buy ad now</content:encoded></item></rss>";
        let (result, _) = run("//content:encoded", "/ad/", "AD", feed);
        let (xml, count) = output(result);
        assert!(xml.contains("<content:encoded"));
        assert!(xml.contains(">Buy AD now</content:encoded>"));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_undeclared_prefix_is_an_error() {
        let (result, _) = run("//dc:creator", "/a/", "b", b"<rss><item><title>a</title></item></rss>");
        let Err(TransformError::XPath(message)) = result else {
            panic!("expected an XPath error");
        };
        assert!(message.contains("\"dc\""));
    }

    #[test]
    fn test_byte_order_mark_accepted() {
        let feed = b"\xEF\xBB\xBF<?xml version=\"1.0\" encoding=\"UTF-8\"?><rss><item><title>Best ad</title></item></rss>";
        let (result, _) = run("//item/title", "/ad/", "AD", feed);
        let (xml, count) = output(result);
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<title>Best AD</title>"));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_public_doctype_kept() {
        let feed = b"<?xml version=\"1.0\"?>\n<!DOCTYPE rss PUBLIC \"-//Netscape Communications//DTD RSS 0.91//EN\" \"http://my.netscape.com/publish/formats/rss-0.91.dtd\">\n<rss version=\"0.91\"><channel><title>ad</title></channel></rss>";
        let (result, _) = run("//channel/title", "/ad/", "AD", feed);
        let (xml, count) = output(result);
        assert!(xml.starts_with(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE rss PUBLIC \"-//Netscape Communications//DTD RSS 0.91//EN\""
        ));
        assert!(xml.contains("<title>AD</title>"));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_namespace_prefixes() {
        assert_eq!(namespace_prefixes("//item/title"), Vec::<String>::new());
        assert_eq!(
            namespace_prefixes("//content:encoded | //dc:creator/text() | //dc:*"),
            vec!["content".to_string(), "dc".to_string()]
        );
        assert_eq!(namespace_prefixes("child::title"), Vec::<String>::new());
        assert_eq!(namespace_prefixes("//a[@href='x:y']"), Vec::<String>::new());
        assert_eq!(namespace_prefixes("//a[@xml:lang]"), vec!["xml".to_string()]);
    }

    #[test]
    fn test_position() {
        assert_eq!(position(b"abc", 0), (1, 1));
        assert_eq!(position(b"ab\ncd", 4), (2, 2));
        assert_eq!(position("\u{e9}\u{e9}x".as_bytes(), 4), (1, 3));
        assert_eq!(position(b"a", 99), (1, 2));
    }
}
