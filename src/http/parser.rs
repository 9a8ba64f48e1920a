//! Best-effort HTTP/1.x request parsing into a [`RequestRecord`].
//!
//! # Responsibilities
//! - Split the head into a request line and `(name, value)` header pairs
//! - Fill the fixed-size record fields, truncating instead of failing
//! - Locate the body after the first blank line
//!
//! # Design Decisions
//! - A line scanner, not a validating parser: malformed headers are skipped
//! - Header lookup only sees the head, never the body
//! - Lines may end in CRLF or bare LF

use thiserror::Error;

use crate::channel::layout::RequestRecord;

/// Headers kept per request; the rest are ignored.
pub const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("request line has no method")]
    MissingMethod,

    #[error("request line has no target")]
    MissingTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header<'a> {
    pub name: &'a [u8],
    pub value: &'a [u8],
}

/// Borrowed view of a scanned request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead<'a> {
    pub request_line: &'a [u8],
    pub headers: Vec<Header<'a>>,
    /// Bytes after the blank line; empty when the head is incomplete.
    pub body: &'a [u8],
    /// The blank line terminating the head was seen.
    pub complete: bool,
}

impl<'a> RequestHead<'a> {
    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&'a [u8]> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name.as_bytes()))
            .map(|h| h.value)
    }

    pub fn content_length(&self) -> i32 {
        self.header("content-length")
            .map(parse_content_length)
            .unwrap_or(0)
    }
}

/// Split `raw` into lines, stopping at the first empty line.
pub fn scan(raw: &[u8]) -> RequestHead<'_> {
    let mut pos = 0;
    let mut request_line: Option<&[u8]> = None;
    let mut headers = Vec::new();

    while pos < raw.len() {
        let Some(nl) = raw[pos..].iter().position(|&b| b == b'\n') else {
            // Unterminated trailing line: still part of an incomplete head.
            let line = &raw[pos..];
            if request_line.is_none() {
                request_line = Some(line);
            } else if let Some(header) = split_header(line) {
                push_header(&mut headers, header);
            }
            break;
        };

        let mut line = &raw[pos..pos + nl];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        pos += nl + 1;

        if line.is_empty() {
            if request_line.is_none() {
                // Tolerate blank lines before the request line.
                continue;
            }
            return RequestHead {
                request_line: request_line.unwrap_or_default(),
                headers,
                body: &raw[pos..],
                complete: true,
            };
        }

        match request_line {
            None => request_line = Some(line),
            Some(_) => {
                if let Some(header) = split_header(line) {
                    push_header(&mut headers, header);
                }
            }
        }
    }

    RequestHead {
        request_line: request_line.unwrap_or_default(),
        headers,
        body: &[],
        complete: false,
    }
}

fn push_header<'a>(headers: &mut Vec<Header<'a>>, header: Header<'a>) {
    if headers.len() < MAX_HEADERS {
        headers.push(header);
    }
}

fn split_header(line: &[u8]) -> Option<Header<'_>> {
    let colon = line.iter().position(|&b| b == b':')?;
    let name = trim(&line[..colon]);
    if name.is_empty() {
        return None;
    }
    Some(Header {
        name,
        value: trim(&line[colon + 1..]),
    })
}

fn trim(bytes: &[u8]) -> &[u8] {
    let is_space = |b: &u8| *b == b' ' || *b == b'\t';
    let start = bytes.iter().position(|b| !is_space(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_space(b)).map_or(start, |i| i + 1);
    &bytes[start..end.max(start)]
}

/// Leading decimal digits of `value`; anything else is 0. Saturates at
/// `i32::MAX`.
pub fn parse_content_length(value: &[u8]) -> i32 {
    let digits = trim(value);
    let mut n: i32 = 0;
    for &b in digits.iter().take_while(|b| b.is_ascii_digit()) {
        n = n.saturating_mul(10).saturating_add(i32::from(b - b'0'));
    }
    n
}

/// Everything after `boundary=` in a Content-Type value, verbatim.
pub fn boundary_of(content_type: &[u8]) -> Option<&[u8]> {
    const KEY: &[u8] = b"boundary=";
    content_type
        .windows(KEY.len())
        .position(|w| w.eq_ignore_ascii_case(KEY))
        .map(|at| &content_type[at + KEY.len()..])
}

/// Fill `record` from the raw request bytes.
///
/// On [`ParseError::MissingMethod`] nothing is written. On
/// [`ParseError::MissingTarget`] only the method is written.
pub fn parse_into(raw: &[u8], record: &mut RequestRecord) -> Result<(), ParseError> {
    let head = scan(raw);
    let line = head.request_line;

    let method_end = line
        .iter()
        .position(|&b| b == b' ')
        .ok_or(ParseError::MissingMethod)?;
    record.set_method(&line[..method_end]);

    let target_start = method_end + 1;
    let target_end = line[target_start..]
        .iter()
        .position(|&b| b == b' ')
        .map(|i| target_start + i)
        .ok_or(ParseError::MissingTarget)?;
    let target = &line[target_start..target_end];

    match target.iter().position(|&b| b == b'?') {
        Some(q) => {
            record.set_path(&target[..q]);
            record.set_query(&target[q + 1..]);
        }
        None => {
            record.set_path(target);
            record.set_query(b"");
        }
    }

    let content_type = head.header("content-type").unwrap_or_default();
    record.set_content_type(content_type);
    record.set_boundary(boundary_of(content_type).unwrap_or_default());
    record.set_authorization(head.header("authorization").unwrap_or_default());
    record.set_body(head.body, head.content_length());
    Ok(())
}
