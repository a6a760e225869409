//! Delimited regex patterns and back-reference replacements.
//!
//! Rule files write patterns the way Perl and PCRE do: `/body/flags`, with any
//! non-alphanumeric delimiter. This module turns them into [`regex::bytes::Regex`]
//! values and translates `\1` / `$1` / `${1}` replacements into the template
//! syntax the regex crate expands.

use regex::bytes::{Regex, RegexBuilder};

/// A compiled delimited pattern.
#[derive(Debug, Clone)]
pub struct FeedPattern {
    /// Pattern as written in the configuration
    source: String,
    /// Compiled regex
    regex: Regex,
}

impl FeedPattern {
    /// Compile a delimited pattern such as `/foo/i` or `#a/b#`.
    pub fn parse(source: &str) -> Result<Self, PatternError> {
        let trimmed = source.trim_start();
        let open = trimmed.chars().next().ok_or(PatternError::Empty)?;
        if open.is_alphanumeric() || open == '\\' {
            return Err(PatternError::InvalidDelimiter(open));
        }
        let close = closing_delimiter(open);

        let rest = &trimmed[open.len_utf8()..];
        let (body, end) = split_body(rest, open, close)?;
        let modifiers = &rest[end + close.len_utf8()..];

        let mut builder = RegexBuilder::new(&body);
        for flag in modifiers.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                'U' => builder.swap_greed(true),
                'u' => builder.unicode(true),
                // `$` already only matches at the very end without `m`
                'D' => &mut builder,
                c if c.is_whitespace() => &mut builder,
                other => return Err(PatternError::UnknownModifier(other)),
            };
        }

        Ok(Self {
            source: source.to_string(),
            regex: builder.build()?,
        })
    }

    /// The compiled regex.
    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Whether the pattern matches anywhere in `haystack`.
    pub fn is_match(&self, haystack: &[u8]) -> bool {
        self.regex.is_match(haystack)
    }

    /// Pattern as written in the configuration.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn closing_delimiter(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        '{' => '}',
        '<' => '>',
        c => c,
    }
}

/// Scan for the unescaped closing delimiter. Returns the regex body and the
/// byte offset of the closing delimiter within `rest`.
fn split_body(rest: &str, open: char, close: char) -> Result<(String, usize), PatternError> {
    let nests = open != close;
    let mut depth = 1usize;
    let mut body = String::with_capacity(rest.len());
    let mut chars = rest.char_indices();

    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some((_, escaped)) if (escaped == open || escaped == close) && !is_meta(escaped) => {
                    body.push(escaped);
                }
                Some((_, escaped)) => {
                    body.push('\\');
                    body.push(escaped);
                }
                None => body.push('\\'),
            }
            continue;
        }

        if c == close {
            depth -= 1;
            if !nests || depth == 0 {
                return Ok((body, i));
            }
        } else if nests && c == open {
            depth += 1;
        }
        body.push(c);
    }

    Err(PatternError::MissingEndDelimiter(close))
}

fn is_meta(c: char) -> bool {
    matches!(
        c,
        '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '#'
            | '&' | '-' | '~'
    )
}

/// A replacement template with group references translated for the regex crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// Replacement as written in the configuration
    source: String,
    /// `${N}`-style template understood by `Captures::expand`
    template: String,
}

impl Replacement {
    /// Translate `\N`, `$N` and `${N}` (up to two digits) into group
    /// references. `\\` and `\$` stand for a literal backslash and dollar;
    /// any other `$` is taken literally.
    pub fn parse(source: &str) -> Self {
        let mut template = String::with_capacity(source.len() + 8);
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\\' if chars.peek() == Some(&'\\') => {
                    chars.next();
                    template.push('\\');
                }
                '\\' if chars.peek() == Some(&'$') => {
                    chars.next();
                    template.push_str("$$");
                }
                '\\' | '$' if chars.peek().is_some_and(char::is_ascii_digit) => {
                    let group = take_group_digits(&mut chars);
                    template.push_str(&format!("${{{group}}}"));
                }
                '$' if chars.peek() == Some(&'{') => {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let group = take_group_digits(&mut lookahead);
                    if !group.is_empty() && lookahead.next() == Some('}') {
                        template.push_str(&format!("${{{group}}}"));
                        chars = lookahead;
                    } else {
                        template.push_str("$$");
                    }
                }
                '$' => template.push_str("$$"),
                other => template.push(other),
            }
        }

        Self {
            source: source.to_string(),
            template,
        }
    }

    /// Template in the regex crate's expansion syntax.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Replacement as written in the configuration.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn take_group_digits<I>(chars: &mut std::iter::Peekable<I>) -> String
where
    I: Iterator<Item = char>,
{
    let mut digits = String::with_capacity(2);
    while digits.len() < 2 {
        match chars.peek() {
            Some(d) if d.is_ascii_digit() => {
                digits.push(*d);
                chars.next();
            }
            _ => break,
        }
    }
    digits
}

/// Errors that can occur while compiling a delimited pattern.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("Empty regular expression")]
    Empty,

    #[error("Delimiter must not be alphanumeric or backslash (found '{0}')")]
    InvalidDelimiter(char),

    #[error("No ending delimiter '{0}' found")]
    MissingEndDelimiter(char),

    #[error("Unknown modifier '{0}'")]
    UnknownModifier(char),

    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(#[from] regex::Error),
}
