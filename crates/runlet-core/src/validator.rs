// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Static validation of function source.
//!
//! The default [`RuleValidator`] ships these rules:
//!
//! | Rule | Level | Checks |
//! |------|-------|--------|
//! | SEC001 | error | `eval(` |
//! | SEC002 | error | `new Function(` |
//! | SEC003 | error | `process` |
//! | SEC004 | error | `require(` |
//! | SEC005 | error | `import ... from` |
//! | SEC006 | error | assignment to `global`, `window` or `globalThis` properties |
//! | SEC007 | error | `.__proto__` |
//! | SEC008 | warning | `while (true)` and `for (;;)` |
//! | SEC009 | error | a `function main(` definition exists |
//! | QUA001 | warning | `console.log(` |
//! | QUA002 | info | `// TODO` |

use regex::Regex;
use runlet_compiler::lexer::line_col;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleLevel {
    /// Makes the code invalid.
    Error,
    /// Reported, does not invalidate.
    Warning,
    /// Informational.
    Info,
}

impl RuleLevel {
    /// Returns the string representation of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// How a rule inspects source.
pub enum RuleCheck {
    /// Every match is a violation at the match position.
    Pattern(Regex),
    /// Returns a message when the whole source violates the rule.
    Predicate(Box<dyn Fn(&str) -> Option<String> + Send + Sync>),
}

impl fmt::Debug for RuleCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// A validation rule.
#[derive(Debug)]
pub struct ValidationRule {
    /// Stable identifier, e.g. `SEC001`.
    pub id: &'static str,
    /// Short name.
    pub name: &'static str,
    /// Message attached to pattern violations.
    pub description: &'static str,
    /// Severity.
    pub level: RuleLevel,
    /// Check to run.
    pub check: RuleCheck,
}

/// One rule violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Violated rule.
    pub rule_id: String,
    /// Severity.
    pub level: RuleLevel,
    /// Description.
    pub message: String,
    /// 1-based line; 0 for whole-source rules.
    pub line: usize,
    /// 1-based start column; 0 for whole-source rules.
    pub column_start: usize,
    /// Column after the match; 0 for whole-source rules.
    pub column_end: usize,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "{}: {} (line {})", self.rule_id, self.message, self.line)
        } else {
            write!(f, "{}: {}", self.rule_id, self.message)
        }
    }
}

/// Verdict of a validation run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    /// No error-level violations.
    pub valid: bool,
    /// Error-level violations.
    pub error_count: usize,
    /// Warning-level violations.
    pub warning_count: usize,
    /// Info-level violations.
    pub info_count: usize,
    /// All violations, in rule order.
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    fn record(&mut self, violation: Violation) {
        match violation.level {
            RuleLevel::Error => {
                self.valid = false;
                self.error_count += 1;
            }
            RuleLevel::Warning => self.warning_count += 1,
            RuleLevel::Info => self.info_count += 1,
        }
        self.violations.push(violation);
    }

    /// Rendered messages of every violation.
    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }

    /// Rendered messages of error-level violations.
    pub fn error_messages(&self) -> Vec<String> {
        self.violations
            .iter()
            .filter(|v| v.level == RuleLevel::Error)
            .map(ToString::to_string)
            .collect()
    }
}

/// Source validator.
pub trait Validator: Send + Sync {
    /// Check `code` and report every violation.
    fn validate(&self, code: &str) -> ValidationReport;
}

/// Validator driven by a list of [`ValidationRule`]s.
#[derive(Debug)]
pub struct RuleValidator {
    rules: Vec<ValidationRule>,
}

impl Default for RuleValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn pattern(re: &str) -> RuleCheck {
    RuleCheck::Pattern(Regex::new(re).expect("built-in rule pattern is valid"))
}

impl RuleValidator {
    /// Validator with the built-in rule set.
    pub fn new() -> Self {
        let mut validator = Self::empty();

        validator.add_rule(ValidationRule {
            id: "SEC001",
            name: "No eval usage",
            description: "Prevents the use of eval() which can execute arbitrary code",
            level: RuleLevel::Error,
            check: pattern(r"\beval\s*\("),
        });
        validator.add_rule(ValidationRule {
            id: "SEC002",
            name: "No Function constructor",
            description: "Prevents the use of new Function() which can execute arbitrary code",
            level: RuleLevel::Error,
            check: pattern(r"\bnew\s+Function\s*\("),
        });
        validator.add_rule(ValidationRule {
            id: "SEC003",
            name: "No process access",
            description: "Prevents access to the Node.js process object",
            level: RuleLevel::Error,
            check: pattern(r"\bprocess\b"),
        });
        validator.add_rule(ValidationRule {
            id: "SEC004",
            name: "No require",
            description: "Prevents the use of require() to load external modules",
            level: RuleLevel::Error,
            check: pattern(r"\brequire\s*\("),
        });
        validator.add_rule(ValidationRule {
            id: "SEC005",
            name: "No import",
            description: "Prevents the use of import statements to load external modules",
            level: RuleLevel::Error,
            check: pattern(r"\bimport\s+.*\bfrom\b"),
        });
        validator.add_rule(ValidationRule {
            id: "SEC006",
            name: "No global modification",
            description: "Prevents modifications to global objects",
            level: RuleLevel::Error,
            check: pattern(r"\b(global|window|globalThis)\s*\.\s*\w+\s*="),
        });
        validator.add_rule(ValidationRule {
            id: "SEC007",
            name: "No __proto__ access",
            description: "Prevents access to __proto__ which can be used for prototype pollution",
            level: RuleLevel::Error,
            check: pattern(r"\.__proto__\b"),
        });
        validator.add_rule(ValidationRule {
            id: "SEC008",
            name: "No infinite loops",
            description: "Warns about potential infinite loops",
            level: RuleLevel::Warning,
            check: pattern(r"(while\s*\(\s*true\s*\)|for\s*\(\s*;\s*;\s*\))"),
        });

        let main_fn =
            Regex::new(r"\bfunction\s+main\s*\(").expect("built-in rule pattern is valid");
        validator.add_rule(ValidationRule {
            id: "SEC009",
            name: "Main function exists",
            description: "Ensures that a main function exists",
            level: RuleLevel::Error,
            check: RuleCheck::Predicate(Box::new(move |code| {
                (!main_fn.is_match(code))
                    .then(|| "Function must have a 'main' function defined".to_string())
            })),
        });

        validator.add_rule(ValidationRule {
            id: "QUA001",
            name: "No console.log",
            description: "Warns about use of console.log which should be removed in production",
            level: RuleLevel::Warning,
            check: pattern(r"\bconsole\.log\s*\("),
        });
        validator.add_rule(ValidationRule {
            id: "QUA002",
            name: "No TODO comments",
            description: "Warns about TODO comments that should be addressed",
            level: RuleLevel::Info,
            check: pattern(r"//\s*TODO\b"),
        });

        validator
    }

    /// Validator without rules.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule.
    pub fn add_rule(&mut self, rule: ValidationRule) {
        self.rules.push(rule);
    }

    /// Installed rules, in evaluation order.
    pub fn rules(&self) -> &[ValidationRule] {
        &self.rules
    }
}

impl Validator for RuleValidator {
    fn validate(&self, code: &str) -> ValidationReport {
        let mut report = ValidationReport {
            valid: true,
            ..ValidationReport::default()
        };

        for rule in &self.rules {
            match &rule.check {
                RuleCheck::Predicate(check) => {
                    if let Some(message) = check(code) {
                        report.record(Violation {
                            rule_id: rule.id.to_string(),
                            level: rule.level,
                            message,
                            line: 0,
                            column_start: 0,
                            column_end: 0,
                        });
                    }
                }
                RuleCheck::Pattern(re) => {
                    for found in re.find_iter(code) {
                        let (line, column_start) = line_col(code, found.start());
                        report.record(Violation {
                            rule_id: rule.id.to_string(),
                            level: rule.level,
                            message: rule.description.to_string(),
                            line,
                            column_start,
                            column_end: column_start + found.as_str().chars().count(),
                        });
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_code_is_valid() {
        let report =
            RuleValidator::new().validate("function main(args) {\n  return args.a + 1;\n}");
        assert!(report.valid);
        assert_eq!(report.error_count, 0);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_eval_is_an_error_with_position() {
        let report = RuleValidator::new().validate("function main() {\n  return eval(\"1\");\n}");
        assert!(!report.valid);
        assert_eq!(report.error_count, 1);

        let violation = &report.violations[0];
        assert_eq!(violation.rule_id, "SEC001");
        assert_eq!(violation.line, 2);
        assert_eq!(violation.column_start, 10);
        assert_eq!(violation.column_end, 15);
        assert_eq!(
            violation.to_string(),
            "SEC001: Prevents the use of eval() which can execute arbitrary code (line 2)"
        );
    }

    #[test]
    fn test_missing_main_is_a_whole_source_error() {
        let report = RuleValidator::new().validate("function handler() { return 1; }");
        assert!(!report.valid);
        let violation = report
            .violations
            .iter()
            .find(|v| v.rule_id == "SEC009")
            .unwrap();
        assert_eq!(violation.line, 0);
        assert_eq!(
            violation.to_string(),
            "SEC009: Function must have a 'main' function defined"
        );
    }

    #[test]
    fn test_warnings_and_info_do_not_invalidate() {
        let code = concat!(
            "function main() {\n",
            "  // TODO tidy\n",
            "  console.log(1);\n",
            "  while (true) { break; }\n",
            "}"
        );
        let report = RuleValidator::new().validate(code);
        assert!(report.valid);
        assert_eq!(report.warning_count, 2);
        assert_eq!(report.info_count, 1);
        assert_eq!(report.messages().len(), 3);
        assert!(report.error_messages().is_empty());
    }

    #[test]
    fn test_each_match_is_reported() {
        let code = "function main() { require('a'); require('b'); return process.env; }";
        let report = RuleValidator::new().validate(code);
        assert_eq!(report.error_count, 3);
        assert_eq!(
            report
                .violations
                .iter()
                .filter(|v| v.rule_id == "SEC004")
                .count(),
            2
        );
    }

    #[test]
    fn test_global_assignment() {
        let report = RuleValidator::new().validate("function main() { globalThis.leak = 1; }");
        assert!(report.violations.iter().any(|v| v.rule_id == "SEC006"));
    }

    #[test]
    fn test_custom_rules() {
        let mut validator = RuleValidator::empty();
        validator.add_rule(ValidationRule {
            id: "CUS001",
            name: "No fetch",
            description: "Network calls are not allowed",
            level: RuleLevel::Error,
            check: pattern(r"\bfetch\s*\("),
        });
        assert_eq!(validator.rules().len(), 1);
        assert!(!validator.validate("fetch('x')").valid);
        assert!(validator.validate("function main() {}").valid);
    }
}
