//! Process-name authorization.
//!
//! A pattern is one of:
//! - an exact process name (`utils.validate_age`),
//! - a namespace prefix ending in `.*` (`utils.*`),
//! - a general glob using `*`, `?` and `[...]` (`*.fmt.*`).

use serde::{Deserialize, Serialize};

const GLOB_CHARS: &[char] = &['*', '?', '[', ']'];

/// Set of allowed process-name patterns. Empty means unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Whitelist {
    patterns: Vec<String>,
}

impl Whitelist {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether `process` may be called under this whitelist.
    pub fn allows(&self, process: &str) -> bool {
        if self.patterns.is_empty() || self.patterns.iter().any(|p| p == process) {
            return true;
        }

        self.patterns.iter().any(|pattern| {
            if let Some(prefix) = pattern.strip_suffix('*') {
                if prefix.ends_with('.') && !prefix.contains(GLOB_CHARS) {
                    return process.starts_with(prefix);
                }
            }
            pattern.contains(GLOB_CHARS) && glob_match(pattern, process)
        })
    }
}

/// Option-aware check used by the builder: no whitelist allows everything.
pub fn allows(whitelist: Option<&Whitelist>, process: &str) -> bool {
    whitelist.map_or(true, |w| w.allows(process))
}

/// Glob matching over characters: `*` any run, `?` any one, `[...]` a class.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position of the last `*` seen and the text index it is currently
    // absorbing up to.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        let step = match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some('?') => Some(p + 1),
            Some('[') => match match_class(&pattern, p, text[t]) {
                Some((true, next)) => Some(next),
                Some((false, _)) => None,
                // Unterminated class: treat `[` literally.
                None => (text[t] == '[').then_some(p + 1),
            },
            Some(&c) => (c == text[t]).then_some(p + 1),
            None => None,
        };

        match step {
            Some(next) => {
                p = next;
                t += 1;
            }
            None => match backtrack {
                Some((star, absorbed)) => {
                    p = star + 1;
                    t = absorbed + 1;
                    backtrack = Some((star, absorbed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Match `c` against the class starting at `pattern[start] == '['`.
/// Returns whether it matched and the index after the closing `]`.
fn match_class(pattern: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negated = matches!(pattern.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    loop {
        let lo = *pattern.get(i)?;
        if lo == ']' && !first {
            return Some((matched != negated, i + 1));
        }
        first = false;

        if pattern.get(i + 1) == Some(&'-') && pattern.get(i + 2).is_some_and(|&hi| hi != ']') {
            let hi = pattern[i + 2];
            matched |= lo <= c && c <= hi;
            i += 3;
        } else {
            matched |= lo == c;
            i += 1;
        }
    }
}
