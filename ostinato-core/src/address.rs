//! Target address resolution over the module tree.
//!
//! Two distinct operations: `resolve_one` for exact, single-target lookup
//! (used by `get`/`get_parameter`) and `resolve_pattern` for fan-out with
//! wildcard (`*`) and bracket-range (`voice[1-4]`) expansion over submodule
//! and alias names (used by `set`/`animate`/`stop_animate`).

use regex::Regex;

use crate::module::{ModuleId, ModuleTree};

/// True when a path segment carries pattern syntax.
pub fn is_pattern(segment: &str) -> bool {
    segment.contains('*') || segment.contains('[')
}

/// Translate a glob-style segment pattern (`*`, `?`, `[1-4]`) into an
/// anchored regex. Returns `None` for malformed patterns.
pub fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' {
                        out.push_str("\\\\");
                    } else {
                        out.push(inner);
                    }
                }
                if !closed {
                    return None;
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

/// Exact single-target resolution: the last segment is the parameter name,
/// each leading segment delegates through a submodule or alias. Returns the
/// owning module and parameter name without checking parameter existence —
/// that stays with the caller, which owns the error log.
pub fn resolve_one(tree: &ModuleTree, id: ModuleId, target: &[&str]) -> Option<(ModuleId, String)> {
    match target {
        [] => None,
        [name] => Some((id, (*name).to_string())),
        [head, rest @ ..] => {
            let sub = tree.submodule_id(id, head)?;
            resolve_one(tree, sub, rest)
        }
    }
}

/// Pattern fan-out resolution: leading segments may be literal submodule or
/// alias names, wildcards, or bracket ranges; every match receives the call.
pub fn resolve_pattern(
    tree: &ModuleTree,
    id: ModuleId,
    target: &[&str],
) -> Vec<(ModuleId, String)> {
    match target {
        [] => Vec::new(),
        [name] => vec![(id, (*name).to_string())],
        [head, rest @ ..] => {
            if is_pattern(head) {
                let Some(re) = glob_to_regex(head) else {
                    log::error!(target: "module", "malformed pattern \"{}\"", head);
                    return Vec::new();
                };
                let mut out = Vec::new();
                for sub in tree.matching_submodules(id, &re) {
                    out.extend(resolve_pattern(tree, sub, rest));
                }
                out
            } else if let Some(sub) = tree.submodule_id(id, head) {
                resolve_pattern(tree, sub, rest)
            } else {
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_everything() {
        let re = glob_to_regex("*").unwrap();
        assert!(re.is_match("voice1"));
        assert!(re.is_match(""));
    }

    #[test]
    fn prefix_wildcard() {
        let re = glob_to_regex("voice*").unwrap();
        assert!(re.is_match("voice1"));
        assert!(re.is_match("voice"));
        assert!(!re.is_match("vox1"));
    }

    #[test]
    fn bracket_range_selects_subset() {
        let re = glob_to_regex("voice[1-3]").unwrap();
        assert!(re.is_match("voice1"));
        assert!(re.is_match("voice3"));
        assert!(!re.is_match("voice4"));
    }

    #[test]
    fn negated_class() {
        let re = glob_to_regex("voice[!1]").unwrap();
        assert!(!re.is_match("voice1"));
        assert!(re.is_match("voice2"));
    }

    #[test]
    fn literal_dots_do_not_wildcard() {
        let re = glob_to_regex("a.b").unwrap();
        assert!(re.is_match("a.b"));
        assert!(!re.is_match("axb"));
    }

    #[test]
    fn unclosed_bracket_is_malformed() {
        assert!(glob_to_regex("voice[1").is_none());
    }
}
