//! Byte-level handling of the document prolog ahead of DOM parsing.

use std::borrow::Cow;
use std::ops::Range;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// `text` without a leading UTF-8 byte-order mark.
pub fn strip_bom(text: &[u8]) -> &[u8] {
    text.strip_prefix(UTF8_BOM).unwrap_or(text)
}

/// A document with its type declaration set aside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prolog<'a> {
    /// The document with the declaration blanked out; offsets are unchanged
    pub text: Cow<'a, [u8]>,
    /// The declaration as written
    pub doctype: Option<Vec<u8>>,
}

impl<'a> Prolog<'a> {
    /// Blank out the `<!DOCTYPE ...>` of `text`, keeping line breaks so that
    /// parser positions still refer to the original document.
    pub fn split(text: &'a [u8]) -> Self {
        let Some(span) = doctype_span(text) else {
            return Self {
                text: Cow::Borrowed(text),
                doctype: None,
            };
        };

        let doctype = text[span.clone()].to_vec();
        let mut blanked = text.to_vec();
        for byte in &mut blanked[span] {
            if *byte != b'\n' && *byte != b'\r' {
                *byte = b' ';
            }
        }

        Self {
            text: Cow::Owned(blanked),
            doctype: Some(doctype),
        }
    }
}

/// Put a type declaration back after the XML declaration of `serialized`.
pub fn restore_doctype(serialized: &mut Vec<u8>, doctype: &[u8]) {
    let at = if serialized.starts_with(b"<?xml") {
        find(serialized, 0, b"?>").map_or(0, |i| i + 2)
    } else {
        0
    };

    let mut insert = Vec::with_capacity(doctype.len() + 2);
    if at > 0 {
        insert.push(b'\n');
    }
    insert.extend_from_slice(doctype);
    insert.push(b'\n');
    serialized.splice(at..at, insert);
}

/// Byte range of the document type declaration, if the prolog has one.
fn doctype_span(text: &[u8]) -> Option<Range<usize>> {
    let mut pos = 0;
    if text.starts_with(b"<?xml") {
        pos = find(text, pos, b"?>")? + 2;
    }

    loop {
        while text.get(pos).is_some_and(u8::is_ascii_whitespace) {
            pos += 1;
        }
        let rest = &text[pos..];
        if rest.starts_with(b"<!--") {
            pos = find(text, pos + 4, b"-->")? + 3;
        } else if rest.starts_with(b"<?") {
            pos = find(text, pos + 2, b"?>")? + 2;
        } else if rest.starts_with(b"<!DOCTYPE") {
            return Some(pos..doctype_end(text, pos)?);
        } else {
            return None;
        }
    }
}

/// Offset just past the `>` closing the declaration at `start`. Quoted
/// literals and the internal subset may contain `>`.
fn doctype_end(text: &[u8], start: usize) -> Option<usize> {
    let mut quote = None;
    let mut in_subset = false;

    for (i, &b) in text.iter().enumerate().skip(start) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'[' => in_subset = true,
                b']' => in_subset = false,
                b'>' if !in_subset => return Some(i + 1),
                _ => {}
            },
        }
    }
    None
}

fn find(text: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    text.get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|i| from + i)
}
