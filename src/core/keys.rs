//! Sample store key layout.
//!
//! Every key lives under the `samsto` application prefix. Record keys end
//! with the lower-cased entity name; sample names have the form
//! `<subject>|<aspect>`. Master sets hold full record keys.

pub const NAME_SEP: char = '|';

pub mod key {
    pub const SAMPLES: &str = "samsto:samples";
    pub const SUBJECTS: &str = "samsto:subjects";
    pub const ASPECTS: &str = "samsto:aspects";
}

pub mod pfx {
    pub const SAMPLE: &str = "samsto:sample:";
    pub const SUBJECT: &str = "samsto:subject:";
    pub const ASPECT: &str = "samsto:aspect:";
    /// Subject-keyed index, members are aspect names.
    pub const SUBASPMAP: &str = "samsto:subaspmap:";
    /// Aspect-keyed index, members are subject names.
    pub const ASPSUBMAP: &str = "samsto:aspsubmap:";
}

/// Removes `prefix` from the start of `value`. Values without the prefix
/// come back untouched.
pub fn strip_prefix<'a>(value: &'a str, prefix: &str) -> &'a str {
    value.strip_prefix(prefix).unwrap_or(value)
}

/// Swaps `to_remove` for `to_add` at the start of every element.
///
/// An empty `to_remove` only prepends, an empty `to_add` only strips.
/// Elements that do not start with `to_remove` come back unchanged.
pub fn replace_prefix<S: AsRef<str>>(items: &[S], to_remove: &str, to_add: &str) -> Vec<String> {
    items
        .iter()
        .map(|item| match item.as_ref().strip_prefix(to_remove) {
            Some(rest) => format!("{}{}", to_add, rest),
            None => item.as_ref().to_string(),
        })
        .collect()
}

pub fn sample_key(name: &str) -> String {
    format!("{}{}", pfx::SAMPLE, name.to_lowercase())
}

pub fn subject_key(name: &str) -> String {
    format!("{}{}", pfx::SUBJECT, name.to_lowercase())
}

pub fn aspect_key(name: &str) -> String {
    format!("{}{}", pfx::ASPECT, name.to_lowercase())
}

/// Name part of a sample key, or the key itself if it is not a sample key.
pub fn sample_name_from_key(key: &str) -> &str {
    strip_prefix(key, pfx::SAMPLE)
}

/// Splits a sample name into `(subject, aspect)`.
///
/// Exactly one separator with non-empty text on both sides, anything else is
/// rejected.
pub fn split_sample_name(name: &str) -> Option<(&str, &str)> {
    let (subject, aspect) = name.split_once(NAME_SEP)?;
    if subject.is_empty() || aspect.is_empty() || aspect.contains(NAME_SEP) {
        return None;
    }
    Some((subject, aspect))
}

/// Backslash-escapes the characters redis treats specially in `MATCH`.
pub fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `MATCH` pattern covering every key under `prefix` whose remainder starts
/// with `scope`.
pub fn scoped_pattern(prefix: &str, scope: &str) -> String {
    format!("{}{}*", prefix, escape_glob(scope))
}
