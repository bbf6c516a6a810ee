// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lightweight source scanner.
//!
//! Splits function source into code, literal and comment segments so the
//! passes can work on code without tripping over `//` inside a string or a
//! brace inside a comment. This is not a JavaScript parser: a `/` opens a
//! regular expression literal when the previous significant token cannot end
//! an operand, otherwise it is division.

use thiserror::Error;

use crate::error::CompileError;

/// Errors raised while scanning source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    /// A quoted literal reached end of line (or input) without its closing quote.
    #[error("unterminated string literal starting at line {line}, column {column}")]
    UnterminatedLiteral {
        /// 1-based line number.
        line: usize,
        /// 1-based column number.
        column: usize,
    },

    /// A regular expression literal reached end of line without its closing slash.
    #[error("unterminated regular expression starting at line {line}, column {column}")]
    UnterminatedRegex {
        /// 1-based line number.
        line: usize,
        /// 1-based column number.
        column: usize,
    },

    /// A `/*` comment was never closed.
    #[error("unterminated block comment starting at line {line}, column {column}")]
    UnterminatedComment {
        /// 1-based line number.
        line: usize,
        /// 1-based column number.
        column: usize,
    },
}

/// Kind of a scanned segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Plain code.
    Code,
    /// A quoted or template literal, quotes included.
    Literal,
    /// A `//` comment, up to but excluding the newline.
    LineComment,
    /// A `/* ... */` comment.
    BlockComment,
    /// A regular expression literal, slashes and flags included.
    Regex,
}

/// A contiguous byte range of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// What the range contains.
    pub kind: SegmentKind,
    /// Start byte offset (inclusive).
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

impl Segment {
    /// Returns true for comment segments.
    pub fn is_comment(&self) -> bool {
        matches!(
            self.kind,
            SegmentKind::LineComment | SegmentKind::BlockComment
        )
    }
}

/// Scan `code` into segments covering the whole input.
pub fn scan(code: &str) -> Result<Vec<Segment>, ScanError> {
    let bytes = code.as_bytes();
    let mut segments = Vec::new();
    let mut code_start = 0;
    let mut previous = Previous::Start;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'' | b'`') => {
                push_code(&mut segments, code_start, i);
                let start = i;
                i += 1;
                let mut closed = false;
                while i < bytes.len() {
                    match bytes[i] {
                        b'\\' => i += 2,
                        b if b == quote => {
                            i += 1;
                            closed = true;
                            break;
                        }
                        b'\n' if quote != b'`' => break,
                        _ => i += 1,
                    }
                }
                if !closed {
                    let (line, column) = line_col(code, start);
                    return Err(ScanError::UnterminatedLiteral { line, column });
                }
                segments.push(Segment {
                    kind: SegmentKind::Literal,
                    start,
                    end: i,
                });
                code_start = i;
                previous = Previous::Operand;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                push_code(&mut segments, code_start, i);
                let start = i;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                segments.push(Segment {
                    kind: SegmentKind::LineComment,
                    start,
                    end: i,
                });
                code_start = i;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                push_code(&mut segments, code_start, i);
                let start = i;
                match code[i + 2..].find("*/") {
                    Some(offset) => i += 2 + offset + 2,
                    None => {
                        let (line, column) = line_col(code, start);
                        return Err(ScanError::UnterminatedComment { line, column });
                    }
                }
                segments.push(Segment {
                    kind: SegmentKind::BlockComment,
                    start,
                    end: i,
                });
                code_start = i;
            }
            b'/' if previous.allows_regex(code) => {
                push_code(&mut segments, code_start, i);
                let start = i;
                i = regex_end(code, start)?;
                segments.push(Segment {
                    kind: SegmentKind::Regex,
                    start,
                    end: i,
                });
                code_start = i;
                previous = Previous::Operand;
            }
            byte => {
                if !byte.is_ascii_whitespace() {
                    previous = Previous::Code(i);
                }
                i += 1;
            }
        }
    }

    push_code(&mut segments, code_start, bytes.len());
    Ok(segments)
}

/// Keywords after which a `/` starts a regular expression.
const REGEX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case",
    "do", "else", "yield", "await",
];

/// The last significant token seen before the current position.
#[derive(Debug, Clone, Copy)]
enum Previous {
    Start,
    /// A literal or regex, after which `/` divides.
    Operand,
    /// Offset of the last non-whitespace code byte.
    Code(usize),
}

impl Previous {
    fn allows_regex(self, code: &str) -> bool {
        match self {
            Previous::Start => true,
            Previous::Operand => false,
            Previous::Code(offset) => {
                let bytes = code.as_bytes();
                match bytes[offset] {
                    b')' | b']' => false,
                    b if is_identifier_byte(b) => {
                        let start = bytes[..offset]
                            .iter()
                            .rposition(|b| !is_identifier_byte(*b))
                            .map_or(0, |p| p + 1);
                        REGEX_KEYWORDS.contains(&&code[start..=offset])
                    }
                    _ => true,
                }
            }
        }
    }
}

fn is_identifier_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$' || byte >= 0x80
}

/// End offset (exclusive, flags included) of the regex literal at `start`.
fn regex_end(code: &str, start: usize) -> Result<usize, ScanError> {
    let bytes = code.as_bytes();
    let mut i = start + 1;
    let mut in_class = false;
    loop {
        match bytes.get(i) {
            None | Some(b'\n') => {
                let (line, column) = line_col(code, start);
                return Err(ScanError::UnterminatedRegex { line, column });
            }
            Some(b'\\') => i += 2,
            Some(b'[') => {
                in_class = true;
                i += 1;
            }
            Some(b']') => {
                in_class = false;
                i += 1;
            }
            Some(b'/') if !in_class => {
                i += 1;
                break;
            }
            Some(_) => i += 1,
        }
    }
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    Ok(i)
}

fn push_code(segments: &mut Vec<Segment>, start: usize, end: usize) {
    if end > start {
        segments.push(Segment {
            kind: SegmentKind::Code,
            start,
            end,
        });
    }
}

/// Iterate `(offset, byte)` pairs that belong to code segments only.
pub fn code_bytes<'a>(
    code: &'a str,
    segments: &'a [Segment],
) -> impl Iterator<Item = (usize, u8)> + 'a {
    let bytes = code.as_bytes();
    segments
        .iter()
        .filter(|s| s.kind == SegmentKind::Code)
        .flat_map(move |s| (s.start..s.end).map(move |i| (i, bytes[i])))
}

/// Returns true if `offset` falls inside a code segment.
pub fn is_code_offset(segments: &[Segment], offset: usize) -> bool {
    segments
        .iter()
        .any(|s| s.kind == SegmentKind::Code && s.start <= offset && offset < s.end)
}

/// Verify that `()`, `[]` and `{}` are balanced outside literals and comments.
pub fn check_delimiters(code: &str, segments: &[Segment]) -> Result<(), CompileError> {
    let mut stack: Vec<(u8, usize)> = Vec::new();

    for (offset, byte) in code_bytes(code, segments) {
        match byte {
            b'(' | b'[' | b'{' => stack.push((byte, offset)),
            b')' | b']' | b'}' => {
                let expected = match byte {
                    b')' => b'(',
                    b']' => b'[',
                    _ => b'{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    _ => {
                        let (line, column) = line_col(code, offset);
                        return Err(CompileError::UnbalancedDelimiter {
                            found: byte as char,
                            line,
                            column,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    if let Some((open, offset)) = stack.pop() {
        let (line, column) = line_col(code, offset);
        return Err(CompileError::UnclosedDelimiter {
            open: open as char,
            line,
            column,
        });
    }

    Ok(())
}

/// Find the `}` closing the `{` at `open`, skipping literals and comments.
pub fn matching_brace(code: &str, segments: &[Segment], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, byte) in code_bytes(code, segments).skip_while(|(offset, _)| *offset < open) {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// 1-based line and column of a byte offset.
pub fn line_col(code: &str, offset: usize) -> (usize, usize) {
    let prefix = &code[..offset.min(code.len())];
    let line = prefix.matches('\n').count() + 1;
    let column = match prefix.rfind('\n') {
        Some(newline) => prefix[newline + 1..].chars().count() + 1,
        None => prefix.chars().count() + 1,
    };
    (line, column)
}
