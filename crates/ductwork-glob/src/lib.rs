//! Glob matching for pipeline argument expansion.
//!
//! Supports `*`, `?`, and `[...]` character classes (with leading `!` or `^`
//! negation and `a-z` ranges), plus backslash escaping of metacharacters.
//! No brace expansion: the pipeline grammar keeps `{}` as ordinary word
//! characters.
//!
//! Matching is a two-pointer scan with single-star backtracking, so
//! pathological patterns stay linear-ish instead of exploding recursively.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GlobError {
    #[error("unterminated character class in pattern '{0}'")]
    UnterminatedClass(String),
}

/// True if `pattern` contains an unescaped glob metacharacter.
pub fn contains_glob(pattern: &str) -> bool {
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '*' | '?' | '[' => return true,
            _ => {}
        }
    }
    false
}

/// Match `name` against `pattern`.
pub fn glob_match(pattern: &str, name: &str) -> Result<bool, GlobError> {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = name.chars().collect();
    let mut p = 0;
    let mut t = 0;
    // Position to resume from when a literal run mismatches after a star:
    // (pattern index after the star, text index the star last absorbed to).
    let mut star: Option<(usize, usize)> = None;

    while t < txt.len() {
        let mut stepped = false;
        if p < pat.len() {
            match pat[p] {
                '*' => {
                    star = Some((p + 1, t));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '[' => {
                    let (matched, next) = match_class(&pat, p, txt[t], pattern)?;
                    if matched {
                        p = next;
                        t += 1;
                        stepped = true;
                    }
                }
                '\\' if p + 1 < pat.len() => {
                    if pat[p + 1] == txt[t] {
                        p += 2;
                        t += 1;
                        stepped = true;
                    }
                }
                c => {
                    if c == txt[t] {
                        p += 1;
                        t += 1;
                        stepped = true;
                    }
                }
            }
        }
        if stepped {
            continue;
        }
        match star {
            Some((resume_p, absorbed)) => {
                p = resume_p;
                t = absorbed + 1;
                star = Some((resume_p, absorbed + 1));
            }
            None => return Ok(false),
        }
    }

    // Only trailing stars may remain unconsumed.
    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    Ok(p == pat.len())
}

/// Match one character against the class opening at `pat[open]`.
/// Returns whether it matched and the index just past the closing `]`.
fn match_class(
    pat: &[char],
    open: usize,
    ch: char,
    pattern: &str,
) -> Result<(bool, usize), GlobError> {
    let mut i = open + 1;
    let negate = i < pat.len() && (pat[i] == '!' || pat[i] == '^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    let mut first = true;
    while i < pat.len() {
        // A `]` in first position is a literal member, not the terminator.
        if pat[i] == ']' && !first {
            return Ok((matched != negate, i + 1));
        }
        first = false;
        if i + 2 < pat.len() && pat[i + 1] == '-' && pat[i + 2] != ']' {
            if pat[i] <= ch && ch <= pat[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if pat[i] == ch {
                matched = true;
            }
            i += 1;
        }
    }
    Err(GlobError::UnterminatedClass(pattern.to_string()))
}
