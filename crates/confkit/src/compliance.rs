//! Compliance rule engine.
//!
//! Rules are loaded from JSON (an array of rule objects) or TOML
//! (`[[rules]]` tables) and evaluated against configuration text.

use crate::error::{Error, Result};
use rayon::prelude::*;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// How bad a failed rule is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    /// Parse a severity name; anything unrecognized is treated as `error`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "warning" | "warn" => Self::Warning,
            "info" => Self::Info,
            "error" => Self::Error,
            other => {
                log::warn!("Unknown rule severity '{other}', treating as error");
                Self::Error
            }
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// What a rule checks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RuleKind {
    /// Passes iff the pattern occurs at least once
    PatternPresent { pattern: String },
    /// Passes iff the pattern never occurs
    PatternAbsent { pattern: String },
    /// Unrecognized kind; always fails as an error
    Unknown { declared: String, pattern: String },
}

impl RuleKind {
    fn from_tag(tag: &str, pattern: String) -> Self {
        match tag.trim() {
            "pattern-present" | "pattern_present" | "pattern" => Self::PatternPresent { pattern },
            "pattern-absent" | "pattern_absent" | "not_pattern" | "not-pattern" => {
                Self::PatternAbsent { pattern }
            }
            other => Self::Unknown {
                declared: other.to_string(),
                pattern,
            },
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            Self::PatternPresent { pattern }
            | Self::PatternAbsent { pattern }
            | Self::Unknown { pattern, .. } => pattern,
        }
    }
}

/// A single compliance rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceRule {
    pub name: String,
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: RuleKind,
}

impl ComplianceRule {
    pub fn present(name: impl Into<String>, severity: Severity, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            severity,
            kind: RuleKind::PatternPresent {
                pattern: pattern.into(),
            },
        }
    }

    pub fn absent(name: impl Into<String>, severity: Severity, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            severity,
            kind: RuleKind::PatternAbsent {
                pattern: pattern.into(),
            },
        }
    }
}

/// Rule as written in a rule file, before normalization.
#[derive(Debug, Deserialize)]
struct RawRule {
    name: Option<String>,
    severity: Option<String>,
    #[serde(alias = "type")]
    kind: Option<String>,
    #[serde(default)]
    pattern: String,
}

impl From<RawRule> for ComplianceRule {
    fn from(raw: RawRule) -> Self {
        let severity = raw
            .severity
            .as_deref()
            .map_or(Severity::Error, Severity::parse);
        Self {
            name: raw.name.unwrap_or_else(|| "Unnamed rule".to_string()),
            severity,
            kind: RuleKind::from_tag(raw.kind.as_deref().unwrap_or("pattern"), raw.pattern),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RawRule>,
}

/// Parse rules from a JSON array.
pub fn parse_json_rules(text: &str) -> std::result::Result<Vec<ComplianceRule>, String> {
    let raw: Vec<RawRule> = serde_json::from_str(text).map_err(|e| e.to_string())?;
    Ok(raw.into_iter().map(ComplianceRule::from).collect())
}

/// Parse rules from a TOML document with `[[rules]]` tables.
pub fn parse_toml_rules(text: &str) -> std::result::Result<Vec<ComplianceRule>, String> {
    let file: RuleFile = toml::from_str(text).map_err(|e| e.to_string())?;
    Ok(file.rules.into_iter().map(ComplianceRule::from).collect())
}

/// Load a rule file, choosing the format by extension (`.toml`, otherwise JSON).
pub fn load_rules(path: &Path) -> Result<Vec<ComplianceRule>> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::RuleLoad {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let parsed = if is_toml {
        parse_toml_rules(&text)
    } else {
        parse_json_rules(&text)
    };

    let rules = parsed.map_err(|message| Error::RuleLoad {
        path: path.to_path_buf(),
        message,
    })?;
    log::debug!("Loaded {} rules from {}", rules.len(), path.display());
    Ok(rules)
}

/// Pass or fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
}

/// Result of evaluating one rule against one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub rule: String,
    pub severity: Severity,
    pub outcome: Outcome,
    pub pattern: String,
    /// Matched text, missing pattern, or the reason for a closed failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }

    /// A failed `error` rule.
    pub fn is_blocking(&self) -> bool {
        self.outcome == Outcome::Fail && self.severity == Severity::Error
    }
}

/// Evaluate every rule against `config`. One result per rule, in rule order.
pub fn evaluate(config: &str, rules: &[ComplianceRule]) -> Vec<ValidationResult> {
    rules.par_iter().map(|rule| evaluate_rule(config, rule)).collect()
}

fn evaluate_rule(config: &str, rule: &ComplianceRule) -> ValidationResult {
    let result = |severity, outcome, detail: Option<String>| ValidationResult {
        rule: rule.name.clone(),
        severity,
        outcome,
        pattern: rule.kind.pattern().to_string(),
        detail,
    };

    let (pattern, want_match) = match &rule.kind {
        RuleKind::PatternPresent { pattern } => (pattern, true),
        RuleKind::PatternAbsent { pattern } => (pattern, false),
        RuleKind::Unknown { declared, .. } => {
            return result(
                Severity::Error,
                Outcome::Fail,
                Some(format!("unknown rule kind '{declared}'")),
            );
        }
    };

    let regex = match RegexBuilder::new(pattern).multi_line(true).build() {
        Ok(regex) => regex,
        Err(e) => {
            return result(
                Severity::Error,
                Outcome::Fail,
                Some(format!("invalid pattern: {e}")),
            );
        }
    };

    let found = regex.find(config).map(|m| m.as_str().to_string());
    match (found, want_match) {
        (Some(text), true) => result(rule.severity, Outcome::Pass, Some(text)),
        (None, true) => result(
            rule.severity,
            Outcome::Fail,
            Some(format!("missing: {pattern}")),
        ),
        (None, false) => result(rule.severity, Outcome::Pass, None),
        (Some(text), false) => result(rule.severity, Outcome::Fail, Some(text)),
    }
}

/// Summary over a set of validation results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub results: Vec<ValidationResult>,
}

impl ValidationReport {
    pub fn new(results: Vec<ValidationResult>) -> Self {
        Self { results }
    }

    pub fn passed(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.passed())
    }

    /// Failed `error` and `info` rules
    pub fn failed(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results
            .iter()
            .filter(|r| !r.passed() && r.severity != Severity::Warning)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results
            .iter()
            .filter(|r| !r.passed() && r.severity == Severity::Warning)
    }

    pub fn has_blocking_failures(&self) -> bool {
        self.results.iter().any(ValidationResult::is_blocking)
    }
}
