//! Quality gate evaluation: turn linter output into enumerated findings.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::runner::StageResult;

/// A single static-analysis violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    /// Offending file, relative to the working tree. Empty when the tool
    /// failed without naming a location.
    pub path: String,

    /// 1-indexed line.
    pub line: Option<u32>,

    /// 1-indexed column.
    pub column: Option<u32>,

    /// Violation code (e.g. "E501").
    pub code: Option<String>,

    pub message: String,
}

impl Finding {
    fn generic(message: String) -> Self {
        Self {
            path: String::new(),
            line: None,
            column: None,
            code: None,
            message,
        }
    }

    /// `path:line:col` when known.
    pub fn location(&self) -> Option<String> {
        if self.path.is_empty() {
            return None;
        }
        let mut location = self.path.clone();
        if let Some(line) = self.line {
            location.push_str(&format!(":{line}"));
            if let Some(column) = self.column {
                location.push_str(&format!(":{column}"));
            }
        }
        Some(location)
    }
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(location) = self.location() {
            write!(f, "{location}: ")?;
        }
        if let Some(code) = &self.code {
            write!(f, "{code} ")?;
        }
        f.write_str(&self.message)
    }
}

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Every violation reported (empty if passed).
    pub findings: Vec<Finding>,

    /// Summary message.
    pub message: String,
}

/// Quality gate rules.
pub struct QualityGate;

impl QualityGate {
    /// Evaluate a finished linter run.
    ///
    /// Gate rule:
    /// - The linter must exit 0 and report no findings
    /// - Findings are lines shaped `path:line[:col]: CODE message` on stdout
    ///   or stderr
    /// - A failing exit with nothing parseable still fails, with one
    ///   finding describing the failure
    pub fn evaluate(result: &StageResult) -> GateVerdict {
        let mut findings: Vec<Finding> = result
            .stdout
            .lines()
            .chain(result.stderr.lines())
            .filter_map(parse_finding)
            .collect();

        if !result.passed() && findings.is_empty() {
            let message = result
                .error
                .clone()
                .or_else(|| first_line(&result.stderr))
                .or_else(|| first_line(&result.stdout))
                .unwrap_or_else(|| format!("linter exited with code {}", result.exit_code));
            findings.push(Finding::generic(message));
        }

        let passed = result.passed() && findings.is_empty();
        let message = if passed {
            "No violations".to_string()
        } else {
            format!("Gate failed with {} violation(s)", findings.len())
        };

        GateVerdict {
            passed,
            findings,
            message,
        }
    }
}

fn finding_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?P<path>[^:\s][^:]*):(?P<line>\d+)(?::(?P<col>\d+))?:\s+(?P<code>[A-Z]{1,4}\d{1,4})?\s*(?P<msg>.*)$",
        )
        .expect("finding pattern is a valid regex")
    })
}

/// Parse one `path:line:col: CODE message` line.
pub fn parse_finding(line: &str) -> Option<Finding> {
    let caps = finding_pattern().captures(line.trim_end())?;
    Some(Finding {
        path: caps["path"].to_string(),
        line: caps["line"].parse().ok(),
        column: caps.name("col").and_then(|m| m.as_str().parse().ok()),
        code: caps.name("code").map(|m| m.as_str().to_string()),
        message: caps["msg"].trim().to_string(),
    })
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relpipe_core::StageKind;

    fn lint_result(exit_code: i32, stdout: &str, stderr: &str) -> StageResult {
        StageResult {
            stage: StageKind::QualityGate,
            command: vec!["flake8".to_string()],
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration_ms: 10,
            success: exit_code == 0,
            error: None,
        }
    }

    #[test]
    fn test_clean_run_passes() {
        let verdict = QualityGate::evaluate(&lint_result(0, "", ""));
        assert!(verdict.passed);
        assert!(verdict.findings.is_empty());
        assert_eq!(verdict.message, "No violations");
    }

    #[test]
    fn test_findings_enumerated() {
        let out = "prm/allocator.py:12:80: E501 line too long (88 > 79 characters)\n\
                   tests/test_container.py:3:1: F401 'os' imported but unused\n";
        let verdict = QualityGate::evaluate(&lint_result(1, out, ""));

        assert!(!verdict.passed);
        assert_eq!(verdict.findings.len(), 2);
        assert_eq!(verdict.message, "Gate failed with 2 violation(s)");
        assert_eq!(verdict.findings[0].path, "prm/allocator.py");
        assert_eq!(verdict.findings[0].line, Some(12));
        assert_eq!(verdict.findings[0].column, Some(80));
        assert_eq!(verdict.findings[0].code.as_deref(), Some("E501"));
        assert_eq!(
            verdict.findings[1].to_string(),
            "tests/test_container.py:3:1: F401 'os' imported but unused"
        );
    }

    #[test]
    fn test_failure_without_parseable_output_still_fails() {
        let verdict = QualityGate::evaluate(&lint_result(2, "", "flake8: command crashed\n"));
        assert!(!verdict.passed);
        assert_eq!(verdict.findings.len(), 1);
        assert_eq!(verdict.findings[0].message, "flake8: command crashed");
        assert!(verdict.findings[0].location().is_none());
    }

    #[test]
    fn test_failure_with_no_output_names_exit_code() {
        let verdict = QualityGate::evaluate(&lint_result(3, "", ""));
        assert_eq!(verdict.findings[0].message, "linter exited with code 3");
    }

    #[test]
    fn test_findings_fail_even_with_zero_exit() {
        let verdict = QualityGate::evaluate(&lint_result(0, "a.py:1:1: W291 trailing whitespace\n", ""));
        assert!(!verdict.passed);
    }

    #[test]
    fn test_parse_finding_without_column() {
        let finding = parse_finding("workloads/job.py:7: E999 SyntaxError: invalid syntax").unwrap();
        assert_eq!(finding.line, Some(7));
        assert_eq!(finding.column, None);
        assert_eq!(finding.message, "SyntaxError: invalid syntax");
    }

    #[test]
    fn test_parse_finding_ignores_noise() {
        assert!(parse_finding("").is_none());
        assert!(parse_finding("Loading configuration").is_none());
        assert!(parse_finding("2 files checked").is_none());
    }
}
