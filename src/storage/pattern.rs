use crate::core::{Result, StoreError};
use lru::LruCache;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

lazy_static::lazy_static! {
    static ref GLOB_LRU_CACHE: Arc<Mutex<LruCache<String, Arc<Regex>>>> =
        Arc::new(Mutex::new(LruCache::new(NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN))));
}

/// Translate a redis `MATCH` glob into an anchored regex.
fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 6);
    // `*` and `?` match newlines in redis too.
    regex.push_str("(?s)^");

    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '\\' if i + 1 < chars.len() => {
                i += 1;
                regex.push_str(&regex::escape(&chars[i].to_string()));
            }
            '[' => {
                // Character class, copied through with ^ translated from redis' own negation.
                let mut j = i + 1;
                let mut class = String::from("[");
                if j < chars.len() && chars[j] == '^' {
                    class.push('^');
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    if chars[j] == '\\' && j + 1 < chars.len() {
                        j += 1;
                    }
                    if "\\[]^".contains(chars[j]) {
                        class.push('\\');
                    }
                    class.push(chars[j]);
                    j += 1;
                }
                if j < chars.len() {
                    class.push(']');
                    regex.push_str(&class);
                    i = j;
                } else {
                    regex.push_str("\\[");
                }
            }
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    regex.push('$');
    regex
}

/// Fast path for the `prefix*` patterns the scanner produces.
#[inline]
fn fast_path_glob(text: &str, pattern: &str) -> Option<bool> {
    let prefix = pattern.strip_suffix('*')?;
    if prefix.contains(['*', '?', '[', ']', '\\']) {
        return None;
    }
    Some(text.starts_with(prefix))
}

fn compiled(pattern: &str) -> Result<Arc<Regex>> {
    let mut cache = GLOB_LRU_CACHE
        .lock()
        .map_err(|e| StoreError::Protocol(format!("glob cache poisoned: {}", e)))?;

    if let Some(regex) = cache.get(pattern) {
        return Ok(Arc::clone(regex));
    }

    let regex = Regex::new(&glob_to_regex(pattern))
        .map_err(|e| StoreError::Protocol(format!("invalid MATCH pattern '{}': {}", pattern, e)))?;
    let regex = Arc::new(regex);
    cache.put(pattern.to_string(), Arc::clone(&regex));
    Ok(regex)
}

/// Glob match with redis `MATCH` semantics (`*`, `?`, `[...]`, `\` escapes).
pub fn glob_match(text: &str, pattern: &str) -> Result<bool> {
    if let Some(result) = fast_path_glob(text, pattern) {
        return Ok(result);
    }
    Ok(compiled(pattern)?.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_patterns() {
        assert!(glob_match("samsto:sample:a|b", "samsto:sample:*").unwrap());
        assert!(!glob_match("samsto:samples", "samsto:sample:*").unwrap());
        assert!(glob_match("samsto:sample:canada|x", "samsto:sample:canada*").unwrap());
        assert!(!glob_match("samsto:sample:mexico|x", "samsto:sample:canada*").unwrap());
    }

    #[test]
    fn test_escaped_metacharacters() {
        assert!(glob_match("samsto:sample:a*b|x", "samsto:sample:a\\*b*").unwrap());
        assert!(!glob_match("samsto:sample:aXb|x", "samsto:sample:a\\*b*").unwrap());
    }

    #[test]
    fn test_question_mark_and_class() {
        assert!(glob_match("key1", "key?").unwrap());
        assert!(!glob_match("key12", "key?").unwrap());
        assert!(glob_match("keyb", "key[abc]").unwrap());
        assert!(!glob_match("keyd", "key[abc]").unwrap());
        assert!(glob_match("keyd", "key[^abc]").unwrap());
    }

    #[test]
    fn test_wildcards_match_newlines() {
        assert!(glob_match("samsto:sample:a\nb|x", "samsto:*|x").unwrap());
        assert!(glob_match("a\nb", "a?b").unwrap());
        assert!(!glob_match("a\nb", "a?c").unwrap());
    }

    #[test]
    fn test_pipe_and_dot_are_literal() {
        assert!(glob_match("a.b|c", "a.b|c").unwrap());
        assert!(!glob_match("aXb|c", "a.b|c").unwrap());
    }
}
