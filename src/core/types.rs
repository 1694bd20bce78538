use super::keys::{self, pfx};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Subject-name prefix restricting which keys an operation touches.
/// The empty scope covers the whole keyspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope(String);

impl Scope {
    pub fn all() -> Self {
        Self(String::new())
    }

    /// Scopes are matched against lower-cased keys, so the prefix is folded
    /// the same way.
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self(prefix.as_ref().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_subject(&self, subject: &str) -> bool {
        subject.starts_with(&self.0)
    }

    pub fn sample_pattern(&self) -> String {
        keys::scoped_pattern(pfx::SAMPLE, &self.0)
    }
}

impl From<Option<String>> for Scope {
    fn from(value: Option<String>) -> Self {
        value.map(Self::new).unwrap_or_default()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            write!(f, "<all>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Which derived index an operation targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexKind {
    /// `samsto:subaspmap:<subject>` holding aspect names.
    #[default]
    SubjectAspect,
    /// `samsto:aspsubmap:<aspect>` holding subject names.
    AspectSubject,
}

impl IndexKind {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::SubjectAspect => pfx::SUBASPMAP,
            Self::AspectSubject => pfx::ASPSUBMAP,
        }
    }

    /// Index key and member recording `sample`.
    pub fn entry_for(self, sample: &SampleRef) -> (String, String) {
        match self {
            Self::SubjectAspect => (
                format!("{}{}", pfx::SUBASPMAP, sample.subject),
                sample.aspect.clone(),
            ),
            Self::AspectSubject => (
                format!("{}{}", pfx::ASPSUBMAP, sample.aspect),
                sample.subject.clone(),
            ),
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SubjectAspect => write!(f, "subject-aspect"),
            Self::AspectSubject => write!(f, "aspect-subject"),
        }
    }
}

/// `(subject, aspect)` pair derived from a sample key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleRef {
    pub key: String,
    pub subject: String,
    pub aspect: String,
}

impl SampleRef {
    /// Returns `None` when the key does not carry a well-formed sample name.
    pub fn from_key(key: &str) -> Option<Self> {
        let name = key.strip_prefix(pfx::SAMPLE)?;
        let (subject, aspect) = keys::split_sample_name(name)?;
        Some(Self {
            key: key.to_string(),
            subject: subject.to_string(),
            aspect: aspect.to_string(),
        })
    }

    pub fn subject_key(&self) -> String {
        keys::subject_key(&self.subject)
    }

    pub fn aspect_key(&self) -> String {
        keys::aspect_key(&self.aspect)
    }
}

/// Fields of a stored sample hash that matter for validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub name: Option<String>,
    #[serde(rename = "subjectId")]
    pub subject_id: Option<String>,
    #[serde(rename = "aspectId")]
    pub aspect_id: Option<String>,
}

impl SampleRecord {
    pub fn new(name: &str, subject_id: &str, aspect_id: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            subject_id: Some(subject_id.to_string()),
            aspect_id: Some(aspect_id.to_string()),
        }
    }

    /// Empty strings count as missing, as they do for the writers of the store.
    pub fn from_hash(fields: &HashMap<String, String>) -> Self {
        let get = |field: &str| fields.get(field).filter(|v| !v.is_empty()).cloned();
        Self {
            name: get("name"),
            subject_id: get("subjectId"),
            aspect_id: get("aspectId"),
        }
    }

    pub fn to_hash(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        if let Some(name) = &self.name {
            fields.insert("name".to_string(), name.clone());
        }
        if let Some(id) = &self.subject_id {
            fields.insert("subjectId".to_string(), id.clone());
        }
        if let Some(id) = &self.aspect_id {
            fields.insert("aspectId".to_string(), id.clone());
        }
        fields
    }
}
