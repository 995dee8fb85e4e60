use std::borrow::Cow;

use regex::Regex;

use crate::app::models::ValidationError;

/// How program paths compare on this platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathRules {
    pub case_insensitive: bool,
    /// Treat `\` as a separator equivalent to `/`.
    pub backslash_separators: bool,
}

impl PathRules {
    pub const WINDOWS: PathRules = PathRules {
        case_insensitive: true,
        backslash_separators: true,
    };

    pub const POSIX: PathRules = PathRules {
        case_insensitive: false,
        backslash_separators: false,
    };

    pub const fn native() -> Self {
        if cfg!(windows) { Self::WINDOWS } else { Self::POSIX }
    }

    fn with_separators<'a>(&self, path: &'a str) -> Cow<'a, str> {
        if self.backslash_separators && path.contains('\\') {
            Cow::Owned(path.replace('\\', "/"))
        } else {
            Cow::Borrowed(path)
        }
    }

    /// Canonical form used for comparisons.
    pub fn normalize(&self, path: &str) -> String {
        let path = self.with_separators(path);
        if self.case_insensitive {
            path.to_lowercase()
        } else {
            path.into_owned()
        }
    }

    pub fn paths_equal(&self, a: &str, b: &str) -> bool {
        self.normalize(a) == self.normalize(b)
    }

    /// Last path component.
    pub fn file_name<'a>(&self, path: &'a str) -> &'a str {
        let cut = if self.backslash_separators {
            path.rfind(['/', '\\'])
        } else {
            path.rfind('/')
        };
        match cut {
            Some(i) => &path[i + 1..],
            None => path,
        }
    }

    /// Key program rules are looked up by: the whole path, or only the file name.
    pub fn rule_key(&self, path: &str, match_whole_path: bool) -> String {
        if match_whole_path {
            self.normalize(path)
        } else {
            self.normalize(self.file_name(path))
        }
    }
}

impl Default for PathRules {
    fn default() -> Self {
        Self::native()
    }
}

/// Splits a `/`-separated path into its root and the remainder.
///
/// Recognized roots are drive roots (`C:/`), UNC shares (`//server/share/`) and `/`.
fn split_root(path: &str) -> Option<(&str, &str)> {
    let bytes = path.as_bytes();
    if bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/' {
        return Some(path.split_at(3));
    }
    if let Some(rest) = path.strip_prefix("//") {
        let mut parts = rest.splitn(3, '/');
        let server = parts.next()?;
        let share = parts.next()?;
        if server.is_empty() || share.is_empty() {
            return None;
        }
        let mut root_len = 2 + server.len() + 1 + share.len();
        if path.len() > root_len {
            root_len += 1;
        }
        return Some(path.split_at(root_len));
    }
    if path.starts_with('/') {
        return Some(path.split_at(1));
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum GlobAnchor {
    /// `*/...`: relative to whatever root the path has.
    AnyRoot,
    /// `**...`: anywhere below the root.
    AnyDepth,
    /// Absolute pattern, only paths on the same root can match.
    Root(String),
    /// No root, no `**`, no `*/`: never matches.
    Unrooted,
}

/// A compiled glob over program paths.
///
/// `*` and `?` stay within one path component, a `**` component spans any number of them.
/// Matching happens relative to the path root.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    anchor: GlobAnchor,
    regex: Regex,
    rules: PathRules,
}

impl GlobPattern {
    pub fn new(pattern: &str, rules: PathRules) -> Result<Self, ValidationError> {
        let invalid = |problem: &str| ValidationError::InvalidGlob {
            pattern: pattern.to_string(),
            problem: problem.to_string(),
        };
        if pattern.trim().is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let normalized = rules.with_separators(pattern);
        let (anchor, body) = if let Some(rest) = normalized.strip_prefix("*/") {
            (GlobAnchor::AnyRoot, rest)
        } else if normalized.starts_with("**") {
            (GlobAnchor::AnyDepth, normalized.as_ref())
        } else if let Some((root, rest)) = split_root(&normalized) {
            (GlobAnchor::Root(root.to_string()), rest)
        } else {
            (GlobAnchor::Unrooted, normalized.as_ref())
        };

        let regex = Regex::new(&Self::translate(body, rules.case_insensitive))
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            source: pattern.to_string(),
            anchor,
            regex,
            rules,
        })
    }

    fn translate(body: &str, case_insensitive: bool) -> String {
        let mut out = String::from(if case_insensitive { "(?i)^" } else { "^" });
        let segments: Vec<&str> = body.split('/').collect();
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            if *segment == "**" {
                // Swallows the separator that follows it
                out.push_str(if i == last { ".*" } else { "(?:[^/]*/)*" });
                continue;
            }
            for ch in segment.chars() {
                match ch {
                    '*' => out.push_str("[^/]*"),
                    '?' => out.push_str("[^/]"),
                    c => out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
                }
            }
            if i != last {
                out.push('/');
            }
        }
        out.push('$');
        out
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern can match at all.
    pub fn is_anchored(&self) -> bool {
        self.anchor != GlobAnchor::Unrooted
    }

    pub fn matches(&self, path: &str) -> bool {
        if path.is_empty() {
            return false;
        }
        let path = self.rules.with_separators(path);
        let Some((root, rest)) = split_root(&path) else {
            return false;
        };
        match &self.anchor {
            GlobAnchor::Unrooted => false,
            GlobAnchor::AnyRoot | GlobAnchor::AnyDepth => self.regex.is_match(rest),
            GlobAnchor::Root(pattern_root) => {
                self.rules.paths_equal(pattern_root, root) && self.regex.is_match(rest)
            }
        }
    }
}
