//! State-file format: one JSON file per named save under a per-module
//! directory mirroring the module tree.
//!
//! A file holds an ordered array whose entries are either a `[name, value...]`
//! row or a bare string — a free-form comment kept for human annotation and
//! ignored on load. Rows are written one per line so the files stay pleasant
//! to hand-edit.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use ostinato_types::Value;

/// A flat state row: leading string segments address a (sub)module parameter,
/// the remainder are its values.
pub type StateRow = Vec<Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateEntry {
    /// Free-form annotation, ignored when applying state.
    Comment(String),
    Row(StateRow),
}

/// Parse a state file. Errors carry enough context for the caller's log line.
pub fn read_state(path: &Path) -> Result<Vec<StateEntry>, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("failed to open state file \"{}\": {}", path.display(), e))?;
    serde_json::from_str(&contents)
        .map_err(|e| format!("failed to parse state file \"{}\": {}", path.display(), e))
}

/// Write a state file, creating parent directories. One entry per line.
pub fn write_state(path: &Path, entries: &[StateEntry]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create \"{}\": {}", parent.display(), e))?;
    }
    let mut out = String::from("[\n");
    for (i, entry) in entries.iter().enumerate() {
        let line = serde_json::to_string(entry)
            .map_err(|e| format!("failed to encode state entry: {}", e))?;
        out.push_str("  ");
        out.push_str(&line);
        if i + 1 < entries.len() {
            out.push(',');
        }
        out.push('\n');
    }
    out.push_str("]\n");
    fs::write(path, out).map_err(|e| format!("failed to write \"{}\": {}", path.display(), e))
}

/// Names of saved states in a module's state directory (file stems).
pub fn list_states(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let path = e.path();
            if path.extension().and_then(|x| x.to_str()) == Some("json") {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            } else {
                None
            }
        })
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("states").join("intro.json");
        let entries = vec![
            StateEntry::Comment("warm pads".into()),
            StateEntry::Row(vec![Value::Str("gain".into()), Value::Float(0.8)]),
            StateEntry::Row(vec![
                Value::Str("voice1".into()),
                Value::Str("detune".into()),
                Value::Int(7),
            ]),
        ];
        write_state(&path, &entries).unwrap();
        let back = read_state(&path).unwrap();
        assert_eq!(back, entries);
    }

    #[test]
    fn hand_written_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.json");
        fs::write(
            &path,
            "[\n  \"a comment\",\n  [\"gain\", 0.5],\n  [\"label\", \"hi\"]\n]\n",
        )
        .unwrap();
        let entries = read_state(&path).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[0], StateEntry::Comment(_)));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "not json").unwrap();
        assert!(read_state(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_state(Path::new("/nonexistent/nope.json")).is_err());
    }

    #[test]
    fn list_states_returns_stems() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), "[]").unwrap();
        fs::write(dir.path().join("b.json"), "[]").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert_eq!(list_states(dir.path()), vec!["a".to_string(), "b".to_string()]);
    }
}
