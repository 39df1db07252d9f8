//! Filesystem glob expansion, one path component at a time.
//!
//! Supported syntax: `*`, `?`, `[abc]`, `[a-z]`, `[!abc]` within a component,
//! and `{a,b}` alternatives anywhere in the pattern. Wildcard components are
//! matched against directory entries; literal components are joined as-is. As
//! with shell globs, dot-files only match a component that itself starts with
//! a dot, which keeps `.name.idx` index files out of `*` patterns.

use regex::Regex;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use wildmatch::WildMatch;

fn is_pattern(component: &str) -> bool {
    component.contains(|c: char| c == '*' || c == '?' || c == '[')
}

/// Matches one path component against directory entry names.
enum Matcher {
    Wild(WildMatch),
    Class(Regex),
}

impl Matcher {
    fn new(component: &str) -> Self {
        if component.contains('[') {
            // An unclosed `[` is taken literally, which wildmatch already does.
            if let Some(re) = class_regex(component) {
                return Matcher::Class(re);
            }
        }
        Matcher::Wild(WildMatch::new(component))
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Matcher::Wild(matcher) => matcher.matches(name),
            Matcher::Class(re) => re.is_match(name),
        }
    }
}

/// Translate a component with bracket classes into an anchored regex.
fn class_regex(component: &str) -> Option<Regex> {
    let mut re = String::from("^");
    let mut chars = component.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                re.push('[');
                if chars.next_if(|&c| c == '!' || c == '^').is_some() {
                    re.push('^');
                }
                // A `]` right after the opening bracket is a member.
                if chars.next_if_eq(&']').is_some() {
                    re.push_str("\\]");
                }
                let mut closed = false;
                for c in chars.by_ref() {
                    match c {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' | '[' | '&' | '~' => {
                            re.push('\\');
                            re.push(c);
                        }
                        c => re.push(c),
                    }
                }
                if !closed {
                    return None;
                }
                re.push(']');
            }
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }

    re.push('$');
    Regex::new(&re).ok()
}

/// Expand `{a,b}` alternatives, shell style. Braces holding no top-level
/// comma are left as they are.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some((open, close, alternatives)) = first_alternation(pattern) else {
        return vec![pattern.to_string()];
    };
    let (head, tail) = (&pattern[..open], &pattern[close + 1..]);
    alternatives
        .iter()
        .flat_map(|alt| expand_braces(&format!("{}{}{}", head, alt, tail)))
        .collect()
}

/// Byte offsets of the first `{...}` group with a top-level comma, and its
/// alternatives.
fn first_alternation(pattern: &str) -> Option<(usize, usize, Vec<&str>)> {
    let mut search_from = 0;

    while let Some(offset) = pattern[search_from..].find('{') {
        let open = search_from + offset;
        let mut depth = 0;
        let mut part_start = open + 1;
        let mut parts = Vec::new();

        for (i, c) in pattern[open..].char_indices() {
            let i = open + i;
            match c {
                '{' => depth += 1,
                ',' if depth == 1 => {
                    parts.push(&pattern[part_start..i]);
                    part_start = i + 1;
                }
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        if parts.is_empty() {
                            break;
                        }
                        parts.push(&pattern[part_start..i]);
                        return Some((open, i, parts));
                    }
                }
                _ => {}
            }
        }

        search_from = open + 1;
    }

    None
}

/// Expand one pattern into the regular files it names, sorted.
pub fn expand(pattern: &str) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = expand_braces(pattern)
        .iter()
        .flat_map(|p| expand_components(p))
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

fn expand_components(pattern: &str) -> Vec<PathBuf> {
    let mut current = vec![PathBuf::new()];

    for component in Path::new(pattern).components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_string_lossy();
                if is_pattern(&part) {
                    let matcher = Matcher::new(&part);
                    let include_hidden = part.starts_with('.');
                    current = current
                        .iter()
                        .flat_map(|dir| matching_entries(dir, &matcher, include_hidden))
                        .collect();
                } else {
                    for path in current.iter_mut() {
                        path.push(&*part);
                    }
                }
            }
            other => {
                for path in current.iter_mut() {
                    path.push(other.as_os_str());
                }
            }
        }

        if current.is_empty() {
            break;
        }
    }

    current.retain(|path| path.is_file());
    current
}

/// Expand every pattern; overlapping patterns yield each file once.
pub fn expand_all(patterns: &[String]) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = patterns.iter().flat_map(|p| expand(p)).collect();
    paths.sort();
    paths.dedup();
    paths
}

fn matching_entries(dir: &Path, matcher: &Matcher, include_hidden: bool) -> Vec<PathBuf> {
    let read_from = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };

    let entries = match fs::read_dir(read_from) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %read_from.display(), error = %e, "Skipping unreadable directory");
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| include_hidden || !name.starts_with('.'))
        .filter(|name| matcher.matches(name))
        .collect();
    names.sort();

    names.into_iter().map(|name| dir.join(name)).collect()
}
