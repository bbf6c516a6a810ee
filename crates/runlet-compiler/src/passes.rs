// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transformation passes.
//!
//! Every pass takes the current artifact and returns a new one, or a
//! [`PassError`] which the pipeline records without stopping.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::error::PassError;
use crate::lexer::{self, Segment, SegmentKind};
use crate::options::{CompileEnvironment, CompileOptions};

/// A named transformation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pass {
    /// Remove comments.
    RemoveComments,
    /// Remove `console.log(...)` statements.
    StripConsoleLog,
    /// Wrap `main` with timing instrumentation.
    InjectTracing,
    /// Prepend gas accounting to `main`.
    InjectGasTracking,
    /// Collapse whitespace.
    Minify,
}

impl Pass {
    /// All passes in pipeline order.
    pub const PIPELINE: [Pass; 5] = [
        Pass::RemoveComments,
        Pass::StripConsoleLog,
        Pass::InjectTracing,
        Pass::InjectGasTracking,
        Pass::Minify,
    ];

    /// Pass name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Pass::RemoveComments => "remove-comments",
            Pass::StripConsoleLog => "strip-console-log",
            Pass::InjectTracing => "inject-tracing",
            Pass::InjectGasTracking => "inject-gas-tracking",
            Pass::Minify => "minify",
        }
    }

    /// Whether `options` switch this pass on.
    pub fn is_enabled(&self, options: &CompileOptions) -> bool {
        match self {
            Pass::RemoveComments => options.remove_comments,
            Pass::StripConsoleLog => options.strip_console_log,
            Pass::InjectTracing => options.inject_tracing,
            Pass::InjectGasTracking => options.inject_gas_tracking,
            Pass::Minify => options.minify,
        }
    }

    /// Failures of this pass are recorded as errors rather than warnings.
    pub fn failure_is_error(&self) -> bool {
        matches!(self, Pass::RemoveComments)
    }

    /// Diagnostic prefix for a failure of this pass.
    pub fn failure_label(&self) -> &'static str {
        match self {
            Pass::RemoveComments => "Failed to remove comments",
            Pass::StripConsoleLog => "Failed to strip console.log",
            Pass::InjectTracing => "Failed to inject tracing",
            Pass::InjectGasTracking => "Failed to inject gas tracking",
            Pass::Minify => "Failed to minify code",
        }
    }

    /// Run the pass.
    pub fn apply(&self, code: &str, options: &CompileOptions) -> Result<String, PassError> {
        match self {
            Pass::RemoveComments => remove_comments(code),
            Pass::StripConsoleLog => strip_console_log(code),
            Pass::InjectTracing => inject_tracing(code, options.environment),
            Pass::InjectGasTracking => inject_gas_tracking(code),
            Pass::Minify => minify(code),
        }
    }
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern is valid"))
}

fn main_fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\bfunction\s+main\s*\(")
}

fn console_log_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"console\.log\s*\([^;]*\)\s*;?")
}

fn newline_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\s*\n\s*")
}

fn space_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"[ \t\r\x0B\x0C]+")
}

fn punctuation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r" ?([{}()\[\];,=:<>?|&!*%^]) ?")
}

fn newline_after_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"([{};,])\n")
}

fn newline_before_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\n([})\]])")
}

const DEV_TRACING_PRELUDE: &str = "
    const __startTime = Date.now();
    const __functionId = (arguments[0] && arguments[0]._functionId) || \"unknown\";
    console.info(\"Function execution started: \" + __functionId);
    try {";

const DEV_TRACING_EPILOGUE: &str = "
    } finally {
      console.info(\"Function execution completed in \" + (Date.now() - __startTime) + \"ms\");
    }
";

const PROD_TRACING_PRELUDE: &str = "
    const __startTime = Date.now();
    try {";

const PROD_TRACING_EPILOGUE: &str = "
    } finally {
      globalThis.__executionTime = Date.now() - __startTime;
    }
";

const GAS_PRELUDE: &str = "
    let __gasUsed = 1000;
    const __trackGas = (amount) => {
      __gasUsed += amount;
    };
";

/// Byte offsets of the `{` opening and the `}` closing `main`'s body.
fn main_body(code: &str, segments: &[Segment]) -> Result<(usize, usize), PassError> {
    let found = main_fn_re()
        .find_iter(code)
        .find(|m| lexer::is_code_offset(segments, m.start()))
        .ok_or_else(|| PassError::new("main function not found"))?;

    let open = lexer::code_bytes(code, segments)
        .find(|(offset, byte)| *offset >= found.end() && *byte == b'{')
        .map(|(offset, _)| offset)
        .ok_or_else(|| PassError::new("could not find main function body"))?;

    let close = lexer::matching_brace(code, segments, open)
        .ok_or_else(|| PassError::new("could not find closing brace of main function"))?;

    Ok((open, close))
}

/// Remove `//` and `/* */` comments, leaving literals untouched.
pub fn remove_comments(code: &str) -> Result<String, PassError> {
    let segments = lexer::scan(code)?;
    let mut out = String::with_capacity(code.len());
    for segment in segments.iter().filter(|s| !s.is_comment()) {
        out.push_str(&code[segment.start..segment.end]);
    }
    Ok(out)
}

/// Remove `console.log(...)` statements that appear in code.
pub fn strip_console_log(code: &str) -> Result<String, PassError> {
    let segments = lexer::scan(code)?;
    let stripped = console_log_re().replace_all(code, |caps: &regex::Captures<'_>| {
        let matched = &caps[0];
        let start = caps.get(0).map(|m| m.start()).unwrap_or_default();
        if lexer::is_code_offset(&segments, start) {
            String::new()
        } else {
            matched.to_string()
        }
    });
    Ok(stripped.into_owned())
}

/// Wrap the body of `main` in a timed `try`/`finally`.
pub fn inject_tracing(code: &str, environment: CompileEnvironment) -> Result<String, PassError> {
    let segments = lexer::scan(code)?;
    let (open, close) = main_body(code, &segments)?;

    let (prelude, epilogue) = match environment {
        CompileEnvironment::Prod => (PROD_TRACING_PRELUDE, PROD_TRACING_EPILOGUE),
        CompileEnvironment::Dev | CompileEnvironment::Test => {
            (DEV_TRACING_PRELUDE, DEV_TRACING_EPILOGUE)
        }
    };

    let mut out = String::with_capacity(code.len() + prelude.len() + epilogue.len());
    out.push_str(&code[..=open]);
    out.push_str(prelude);
    out.push_str(&code[open + 1..close]);
    out.push_str(epilogue);
    out.push_str(&code[close..]);
    Ok(out)
}

/// Prepend the gas accounting prelude to the body of `main`.
pub fn inject_gas_tracking(code: &str) -> Result<String, PassError> {
    let segments = lexer::scan(code)?;
    let (open, _) = main_body(code, &segments)?;

    let mut out = String::with_capacity(code.len() + GAS_PRELUDE.len());
    out.push_str(&code[..=open]);
    out.push_str(GAS_PRELUDE);
    out.push_str(&code[open + 1..]);
    Ok(out)
}

/// Drop comments and collapse whitespace in code segments. Line breaks that
/// may terminate statements are kept.
pub fn minify(code: &str) -> Result<String, PassError> {
    // Comments go first so adjacent code runs merge into one fragment.
    let segments = lexer::scan(code)?;
    let mut uncommented = String::with_capacity(code.len());
    for segment in &segments {
        match segment.kind {
            SegmentKind::BlockComment => uncommented.push(' '),
            SegmentKind::LineComment => {}
            SegmentKind::Code | SegmentKind::Literal | SegmentKind::Regex => {
                uncommented.push_str(&code[segment.start..segment.end])
            }
        }
    }

    let segments = lexer::scan(&uncommented)?;
    let mut out = String::with_capacity(uncommented.len());
    for segment in &segments {
        let text = &uncommented[segment.start..segment.end];
        match segment.kind {
            SegmentKind::Code => out.push_str(&minify_fragment(text)),
            _ => out.push_str(text),
        }
    }
    Ok(out.trim().to_string())
}

fn minify_fragment(text: &str) -> String {
    let text = newline_run_re().replace_all(text, "\n");
    let text = space_run_re().replace_all(&text, " ");
    let text = punctuation_re().replace_all(&text, "$1");
    let text = newline_after_re().replace_all(&text, "$1");
    newline_before_re().replace_all(&text, "$1").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = concat!(
        "// header\n",
        "function main(args) {\n",
        "  /* body */\n",
        "  console.log(\"hi\");\n",
        "  return args.x + 1;\n",
        "}\n"
    );

    #[test]
    fn test_remove_comments_keeps_literals() {
        let code = "let url = \"http://example.com\"; // trailing\n/* block */x";
        let out = remove_comments(code).unwrap();
        assert_eq!(out, "let url = \"http://example.com\"; \nx");
    }

    #[test]
    fn test_strip_console_log() {
        let out = strip_console_log(SAMPLE).unwrap();
        assert!(!out.contains("console.log"));
        assert!(out.contains("return args.x + 1;"));
    }

    #[test]
    fn test_strip_console_log_ignores_literals() {
        let code = "function main() { return \"console.log(1);\"; }";
        let out = strip_console_log(code).unwrap();
        assert_eq!(out, code);
    }

    #[test]
    fn test_inject_tracing_wraps_main_body() {
        let out = inject_tracing(SAMPLE, CompileEnvironment::Dev).unwrap();
        let try_pos = out.find("try {").unwrap();
        let body_pos = out.find("return args.x + 1;").unwrap();
        let finally_pos = out.find("} finally {").unwrap();
        assert!(try_pos < body_pos && body_pos < finally_pos);
        assert!(out.contains("Function execution started"));
        assert!(out.trim_end().ends_with('}'));
    }

    #[test]
    fn test_inject_tracing_prod_is_quiet() {
        let out = inject_tracing(SAMPLE, CompileEnvironment::Prod).unwrap();
        assert!(out.contains("__executionTime"));
        assert!(!out.contains("console.info"));
    }

    #[test]
    fn test_inject_tracing_targets_main_not_trailing_function() {
        let code = "function main() { return helper(); }\nfunction helper() { return 1; }";
        let out = inject_tracing(code, CompileEnvironment::Prod).unwrap();
        let finally_pos = out.find("} finally {").unwrap();
        let helper_pos = out.find("function helper").unwrap();
        assert!(finally_pos < helper_pos);
    }

    #[test]
    fn test_inject_requires_main() {
        let err = inject_gas_tracking("function handler() { return 1; }").unwrap_err();
        assert_eq!(err.to_string(), "main function not found");
    }

    #[test]
    fn test_inject_ignores_main_in_comment() {
        let code = "// function main() {}\nfunction run() {}";
        assert!(inject_gas_tracking(code).is_err());
    }

    #[test]
    fn test_inject_gas_tracking() {
        let out = inject_gas_tracking(SAMPLE).unwrap();
        let open = out.find("function main(args) {").unwrap();
        let gas = out.find("let __gasUsed = 1000;").unwrap();
        assert!(open < gas);
    }

    #[test]
    fn test_minify_collapses_whitespace() {
        let out = minify(SAMPLE).unwrap();
        assert!(!out.contains("//"));
        assert!(!out.contains("/*"));
        assert!(out.contains("function main(args){"));
        assert!(out.contains("console.log(\"hi\");return args.x + 1;}"));
    }

    #[test]
    fn test_minify_preserves_literal_whitespace() {
        let out = minify("function main() {\n  return \"a   b\";\n}").unwrap();
        assert_eq!(out, "function main(){return \"a   b\";}");
    }

    #[test]
    fn test_pipeline_order() {
        assert_eq!(Pass::PIPELINE[0], Pass::RemoveComments);
        assert_eq!(Pass::PIPELINE[4], Pass::Minify);
        assert!(Pass::RemoveComments.failure_is_error());
        assert!(!Pass::Minify.failure_is_error());
    }
}
