//! Sample record validation.
//!
//! Pure checks, no store access. Rules are applied in order and the first
//! violated rule is reported. Referential checks (do the subject and aspect
//! records exist?) need the store and live in the cleanup engine.

use crate::core::keys::{self, pfx};
use crate::core::SampleRecord;
use serde::Serialize;
use std::fmt;

/// The rule a sample record broke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
    MissingName,
    MalformedName { name: String },
    MissingSubjectId,
    MissingAspectId,
    KeyNameMismatch { key: String, name: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingName => write!(f, "name is missing"),
            Self::MalformedName { name } => {
                write!(f, "name '{}' is not of the form <subject>|<aspect>", name)
            }
            Self::MissingSubjectId => write!(f, "subjectId is missing"),
            Self::MissingAspectId => write!(f, "aspectId is missing"),
            Self::KeyNameMismatch { key, name } => {
                write!(f, "key '{}' does not match name '{}'", key, name)
            }
        }
    }
}

pub type RuleResult = std::result::Result<(), Violation>;

/// A single check applied to a stored sample.
pub trait SampleRule: Send + Sync {
    fn check(&self, key: &str, record: &SampleRecord) -> RuleResult;
}

/// `name` is present and splits into two non-empty parts.
#[derive(Debug, Clone, Default)]
pub struct NameRule;

impl SampleRule for NameRule {
    fn check(&self, _key: &str, record: &SampleRecord) -> RuleResult {
        let name = record.name.as_deref().ok_or(Violation::MissingName)?;
        if keys::split_sample_name(name).is_none() {
            return Err(Violation::MalformedName {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubjectIdRule;

impl SampleRule for SubjectIdRule {
    fn check(&self, _key: &str, record: &SampleRecord) -> RuleResult {
        record
            .subject_id
            .as_ref()
            .map(|_| ())
            .ok_or(Violation::MissingSubjectId)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AspectIdRule;

impl SampleRule for AspectIdRule {
    fn check(&self, _key: &str, record: &SampleRecord) -> RuleResult {
        record
            .aspect_id
            .as_ref()
            .map(|_| ())
            .ok_or(Violation::MissingAspectId)
    }
}

/// The key, without its record prefix, equals the record's name, ignoring case.
#[derive(Debug, Clone, Default)]
pub struct KeyNameRule;

impl SampleRule for KeyNameRule {
    fn check(&self, key: &str, record: &SampleRecord) -> RuleResult {
        let name = record.name.as_deref().ok_or(Violation::MissingName)?;
        if key_matches_name(key, name) {
            Ok(())
        } else {
            Err(Violation::KeyNameMismatch {
                key: key.to_string(),
                name: name.to_string(),
            })
        }
    }
}

pub fn key_matches_name(key: &str, name: &str) -> bool {
    keys::strip_prefix(key, pfx::SAMPLE).to_lowercase() == name.to_lowercase()
}

/// Ordered chain of [`SampleRule`]s.
pub struct SampleValidator {
    rules: Vec<Box<dyn SampleRule>>,
}

impl SampleValidator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: impl SampleRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Field checks only.
    pub fn structural() -> Self {
        Self::new()
            .with_rule(NameRule)
            .with_rule(SubjectIdRule)
            .with_rule(AspectIdRule)
    }

    /// Field checks followed by the key/name correspondence check.
    pub fn strict() -> Self {
        Self::structural().with_rule(KeyNameRule)
    }

    pub fn validate(&self, key: &str, record: &SampleRecord) -> RuleResult {
        for rule in &self.rules {
            rule.check(key, record)?;
        }
        Ok(())
    }

    pub fn is_valid(&self, key: &str, record: &SampleRecord) -> bool {
        self.validate(key, record).is_ok()
    }
}

impl Default for SampleValidator {
    fn default() -> Self {
        Self::strict()
    }
}

/// Field checks on a record without looking at its key.
pub fn validate_sample(record: &SampleRecord) -> RuleResult {
    SampleValidator::structural().validate("", record)
}
