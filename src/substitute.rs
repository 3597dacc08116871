//! RUN-line substitutions.
//!
//! A substitution is a literal key such as `%s` or `%cc` mapped to its
//! replacement. When several keys match at the same position the longest one
//! wins, so `%%` is never read as `%` followed by `%`.

use std::collections::BTreeMap;
use std::path::Path;

/// Ordered table of literal substitutions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    /// Sorted by descending key length, then key.
    entries: Vec<(String, String)>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Substitutions every shell test gets.
    ///
    /// - `%s`: the test file
    /// - `%S`, `%p`: the directory holding the test file
    /// - `%t`: a temp file path inside the scratch directory
    /// - `%T`: the scratch directory
    /// - `%%`: a literal `%`
    pub fn for_test(test_path: &Path, scratch: &Path) -> Self {
        let source_dir = test_path.parent().unwrap_or(Path::new("."));
        let file_name = test_path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "test".to_string());

        let mut subst = Self::new();
        subst.insert("%s", test_path.display().to_string());
        subst.insert("%S", source_dir.display().to_string());
        subst.insert("%p", source_dir.display().to_string());
        subst.insert("%t", scratch.join(format!("{file_name}.tmp")).display().to_string());
        subst.insert("%T", scratch.display().to_string());
        subst.insert("%%", "%");
        subst
    }

    /// Add or replace a substitution.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if key.is_empty() {
            return;
        }
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => {
                self.entries.push((key, value));
                self.entries
                    .sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
            }
        }
    }

    /// Add or replace every entry of `map`.
    pub fn extend(&mut self, map: &BTreeMap<String, String>) {
        for (k, v) in map {
            self.insert(k.as_str(), v.as_str());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Longest substitution whose key is a prefix of `rest`.
    ///
    /// Returns the matched key's byte length and the replacement.
    pub fn match_at(&self, rest: &str) -> Option<(usize, &str)> {
        self.entries
            .iter()
            .find(|(k, _)| rest.starts_with(k.as_str()))
            .map(|(k, v)| (k.len(), v.as_str()))
    }

    /// Apply every substitution to `text` in one left-to-right pass.
    ///
    /// Replacements are not rescanned.
    pub fn apply(&self, text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut pos = 0;
        while pos < text.len() {
            let rest = &text[pos..];
            if let Some((len, value)) = self.match_at(rest) {
                result.push_str(value);
                pos += len;
            } else if let Some(c) = rest.chars().next() {
                result.push(c);
                pos += c.len_utf8();
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_key_wins() {
        let mut subst = Substitutions::new();
        subst.insert("%c", "short");
        subst.insert("%cc", "long");
        assert_eq!(subst.apply("%cc %c"), "long short");
    }

    #[test]
    fn insert_replaces() {
        let mut subst = Substitutions::new();
        subst.insert("%x", "1");
        subst.insert("%x", "2");
        assert_eq!(subst.apply("%x"), "2");
    }

    #[test]
    fn replacements_are_not_rescanned() {
        let mut subst = Substitutions::new();
        subst.insert("%a", "%b");
        subst.insert("%b", "oops");
        assert_eq!(subst.apply("%a"), "%b");
    }

    #[test]
    fn test_builtins() {
        let subst = Substitutions::for_test(Path::new("/src/dir/t.txt"), Path::new("/tmp/x"));
        assert_eq!(subst.apply("%s"), "/src/dir/t.txt");
        assert_eq!(subst.apply("%S"), "/src/dir");
        assert_eq!(subst.apply("%t"), "/tmp/x/t.txt.tmp");
        assert_eq!(subst.apply("%T"), "/tmp/x");
        assert_eq!(subst.apply("100%%"), "100%");
        assert_eq!(subst.apply("%%s"), "%s");
    }

    #[test]
    fn no_keys_is_identity() {
        let subst = Substitutions::new();
        assert!(subst.is_empty());
        assert_eq!(subst.apply("héllo %s"), "héllo %s");
    }
}
