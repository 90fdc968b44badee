//! Client-side glob matching and grouping of listed keys
//!
//! Keys are matched with shell-glob rules (`*`, `?`, `[seq]`, `[!seq]`) where
//! `*` also crosses `/`. Matches are grouped by the part of the key before its
//! last `/`; this is a string split, not a real directory hierarchy.

use std::collections::BTreeMap;

use regex::Regex;
use tuner_core::{Error, Result};

/// Matches of a glob listing that share a key prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    /// Key prefix before the last `/` (empty for top-level keys)
    pub directory: String,

    /// Always empty: the store has no nested directories to report
    pub subdirectories: Vec<String>,

    /// Final key segments, in listing order
    pub filenames: Vec<String>,
}

/// Compiled shell-glob pattern
#[derive(Debug, Clone)]
pub struct GlobPattern {
    regex: Regex,
}

impl GlobPattern {
    /// Compile a shell-glob pattern
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&translate(pattern)).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self { regex })
    }

    /// True if the whole key matches
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

/// Translate a glob into an anchored regular expression
fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let n = chars.len();
    let mut out = String::from("(?s)^");
    let mut i = 0;

    while i < n {
        let c = chars[i];
        i += 1;

        match c {
            '*' => {
                out.push_str(".*");
                while i < n && chars[i] == '*' {
                    i += 1;
                }
            }
            '?' => out.push('.'),
            '[' => {
                // A `]` right after `[` or `[!` is a literal member of the set
                let mut j = i;
                if j < n && chars[j] == '!' {
                    j += 1;
                }
                if j < n && chars[j] == ']' {
                    j += 1;
                }
                while j < n && chars[j] != ']' {
                    j += 1;
                }

                if j >= n {
                    out.push_str("\\[");
                    continue;
                }

                let body = &chars[i..j];
                let mut class = String::from("[");
                let rest = match body.split_first() {
                    Some((&'!', tail)) => {
                        class.push('^');
                        tail
                    }
                    Some((&'^', tail)) => {
                        class.push_str("\\^");
                        tail
                    }
                    _ => body,
                };
                for &ch in rest {
                    if matches!(ch, '\\' | '[' | ']' | '&' | '~' | '|') {
                        class.push('\\');
                    }
                    class.push(ch);
                }
                class.push(']');
                out.push_str(&class);
                i = j + 1;
            }
            _ => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
            }
        }
    }

    out.push('$');
    out
}

/// Accumulates matching keys into [`FileGroup`]s
#[derive(Debug)]
pub struct FileGrouper {
    pattern: GlobPattern,
    groups: BTreeMap<String, Vec<String>>,
    matched: usize,
}

impl FileGrouper {
    pub fn new(pattern: GlobPattern) -> Self {
        Self {
            pattern,
            groups: BTreeMap::new(),
            matched: 0,
        }
    }

    /// Offer a key; returns true if it matched the pattern
    pub fn push(&mut self, key: &str) -> bool {
        if !self.pattern.matches(key) {
            return false;
        }

        let (directory, filename) = key.rsplit_once('/').unwrap_or(("", key));
        self.groups
            .entry(directory.to_string())
            .or_default()
            .push(filename.to_string());
        self.matched += 1;
        true
    }

    /// Number of keys matched so far
    pub fn matched(&self) -> usize {
        self.matched
    }

    /// Groups sorted by directory
    pub fn finish(self) -> Vec<FileGroup> {
        self.groups
            .into_iter()
            .map(|(directory, filenames)| FileGroup {
                directory,
                subdirectories: Vec::new(),
                filenames,
            })
            .collect()
    }
}

/// Match and group an in-memory key listing
pub fn group_keys<I, S>(keys: I, pattern: &str) -> Result<Vec<FileGroup>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut grouper = FileGrouper::new(GlobPattern::new(pattern)?);
    for key in keys {
        grouper.push(key.as_ref());
    }
    Ok(grouper.finish())
}
