// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Compiler entry point and content-addressed result cache.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::error::CompileError;
use crate::lexer;
use crate::options::CompileOptions;
use crate::passes::Pass;

/// Output of one compilation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompilationResult {
    /// Source as submitted.
    pub original_code: String,
    /// Instrumented artifact.
    pub compiled_code: String,
    /// SHA-256 of `compiled_code`.
    pub code_hash: String,
    /// Cache key of `(source, options)`.
    pub cache_key: String,
    /// Options the artifact was produced with.
    pub options: CompileOptions,
    /// Passes that ran successfully, in order.
    pub applied_passes: Vec<Pass>,
    /// Non-fatal pass failures.
    pub warnings: Vec<String>,
    /// Pass failures recorded as errors. The artifact is still produced.
    pub errors: Vec<String>,
}

impl CompilationResult {
    /// Number of warnings.
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Number of error entries.
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that ran the pipeline.
    pub misses: u64,
    /// Cached results.
    pub entries: usize,
}

/// Hex-encoded SHA-256 of `code`.
pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn cache_key(code: &str, options: &CompileOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hasher.update(options.fingerprint().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Runs the pass pipeline and caches results.
///
/// Safe to share between tasks; the cache lock is never held while passes run.
#[derive(Debug, Default)]
pub struct Compiler {
    cache: RwLock<HashMap<String, Arc<CompilationResult>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Compiler {
    /// Create a compiler with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `code`. Without `options` the development preset applies.
    pub fn compile(
        &self,
        code: &str,
        options: Option<&CompileOptions>,
    ) -> Result<Arc<CompilationResult>, CompileError> {
        if code.trim().is_empty() {
            return Err(CompileError::EmptySource);
        }

        let options = options.cloned().unwrap_or_default();
        let key = cache_key(code, &options);

        let cached = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(result) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(cache_key = %key, "Compilation cache hit");
            return Ok(result);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let segments = lexer::scan(code)?;
        lexer::check_delimiters(code, &segments)?;

        let mut current = code.to_string();
        let mut applied_passes = Vec::new();
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        for pass in Pass::PIPELINE {
            if !pass.is_enabled(&options) {
                continue;
            }
            match pass.apply(&current, &options) {
                Ok(next) => {
                    current = next;
                    applied_passes.push(pass);
                }
                Err(err) => {
                    warn!(pass = pass.name(), error = %err, "Compilation pass failed");
                    let entry = format!("{}: {}", pass.failure_label(), err);
                    if pass.failure_is_error() {
                        errors.push(entry);
                    } else {
                        warnings.push(entry);
                    }
                }
            }
        }

        let result = Arc::new(CompilationResult {
            original_code: code.to_string(),
            code_hash: hash_code(&current),
            compiled_code: current,
            cache_key: key.clone(),
            options,
            applied_passes,
            warnings,
            errors,
        });

        debug!(
            cache_key = %key,
            code_hash = %result.code_hash,
            warnings = result.warning_count(),
            "Compiled function source"
        );

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        Ok(cache.entry(key).or_insert(result).clone())
    }

    /// Current cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self
                .cache
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    /// Drop every cached result. Counters are kept.
    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
