// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for runlet-compiler.

use thiserror::Error;

use crate::lexer::ScanError;

/// Fatal compilation errors.
///
/// Pass-level problems never surface here; they are collected on the
/// [`CompilationResult`](crate::CompilationResult) instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CompileError {
    /// The source was empty or whitespace only.
    #[error("empty code")]
    EmptySource,

    /// The source could not be tokenized.
    #[error("syntax error: {0}")]
    Syntax(#[from] ScanError),

    /// A closing delimiter did not match the innermost open one.
    #[error("unbalanced delimiter '{found}' at line {line}, column {column}")]
    UnbalancedDelimiter {
        /// The offending delimiter character.
        found: char,
        /// 1-based line number.
        line: usize,
        /// 1-based column number.
        column: usize,
    },

    /// An opening delimiter was never closed.
    #[error("unclosed delimiter '{open}' opened at line {line}, column {column}")]
    UnclosedDelimiter {
        /// The opening delimiter character.
        open: char,
        /// 1-based line number.
        line: usize,
        /// 1-based column number.
        column: usize,
    },
}

/// Failure of a single transformation pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PassError(pub String);

impl PassError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<ScanError> for PassError {
    fn from(err: ScanError) -> Self {
        Self(err.to_string())
    }
}
