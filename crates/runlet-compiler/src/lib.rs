// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runlet Compiler - function source instrumentation pipeline
//!
//! Turns user-submitted function source into an instrumented artifact that the
//! sandbox can execute. Compilation is a pure transformation: the same source
//! and options always produce the same artifact, so results are cached by a
//! content hash of `(source, enabled options)`.
//!
//! # Pipeline
//!
//! ```text
//!   source ──► precheck ──► remove-comments ──► strip-console-log
//!                 │                                    │
//!            (fatal on empty                           ▼
//!             or unbalanced)          inject-tracing ──► inject-gas ──► minify ──► artifact
//! ```
//!
//! Each pass is switched on by [`CompileOptions`] and reports its own failure
//! as a warning (or an error, for comment removal) without aborting the passes
//! after it. Only the precheck can fail a compilation outright.
//!
//! | Pass | Failure recorded as |
//! |------|---------------------|
//! | `remove-comments` | error |
//! | `strip-console-log` | warning |
//! | `inject-tracing` | warning |
//! | `inject-gas-tracking` | warning |
//! | `minify` | warning |
//!
//! # Example
//!
//! ```
//! use runlet_compiler::{CompileEnvironment, CompileOptions, Compiler};
//!
//! let compiler = Compiler::new();
//! let options = CompileOptions::for_environment(CompileEnvironment::Prod);
//! let result = compiler
//!     .compile("function main(args) { return args.x * 2; }", Some(&options))
//!     .unwrap();
//! assert!(result.compiled_code.contains("__gasUsed"));
//! ```

#![deny(missing_docs)]

/// Compiler entry point and result cache.
pub mod compile;

/// Compilation errors.
pub mod error;

/// Source scanning (literals, comments, delimiter matching).
pub mod lexer;

/// Compilation options and environment presets.
pub mod options;

/// Individual transformation passes.
pub mod passes;

pub use compile::{CacheStats, CompilationResult, Compiler, hash_code};
pub use error::CompileError;
pub use options::{CompileEnvironment, CompileOptions};
pub use passes::Pass;
