//! Mapping: a directed transform edge between parameters, with a lock that
//! bounds propagation to at most one execution per flush cycle.

use std::sync::Arc;

use ostinato_types::Value;

/// A parameter path relative to the mapping's owning module: the last segment
/// is the parameter name, leading segments name submodules.
pub type ParamPath = Vec<String>;

/// Transform applied to the concatenated source values; the result is
/// distributed to the destination parameters.
pub type TransformFn = dyn Fn(&[Value]) -> Vec<Value> + Send + Sync;

pub struct Mapping {
    src: Vec<ParamPath>,
    dest: Vec<ParamPath>,
    transform: Arc<TransformFn>,
    locked: bool,
}

impl Mapping {
    pub fn new(src: Vec<ParamPath>, dest: Vec<ParamPath>, transform: Arc<TransformFn>) -> Mapping {
        Mapping {
            src,
            dest,
            transform,
            locked: false,
        }
    }

    pub fn sources(&self) -> &[ParamPath] {
        &self.src
    }

    pub fn destinations(&self) -> &[ParamPath] {
        &self.dest
    }

    pub fn transform(&self) -> Arc<TransformFn> {
        Arc::clone(&self.transform)
    }

    /// Exact structural match against one of the source paths. No pattern
    /// matching at this layer.
    pub fn matches(&self, path: &[String]) -> bool {
        self.src.iter().any(|s| s[..] == path[..])
    }

    /// Take the per-cycle lock. Fails if already locked this cycle.
    pub fn lock(&mut self) -> bool {
        if self.locked {
            return false;
        }
        self.locked = true;
        true
    }

    /// Release the lock. Called per owning module per flush cycle, not per
    /// mapping invocation.
    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

/// Split a slash-separated mapping endpoint (`"gain"` or `"voice1/gain"`)
/// into path segments.
pub fn parse_path(spec: &str) -> ParamPath {
    spec.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double() -> Arc<TransformFn> {
        Arc::new(|values: &[Value]| {
            vec![Value::Float(
                values[0].as_number().unwrap_or(0.0) as f32 * 2.0,
            )]
        })
    }

    #[test]
    fn lock_is_exclusive_until_unlocked() {
        let mut m = Mapping::new(
            vec![vec!["a".into()]],
            vec![vec!["b".into()]],
            double(),
        );
        assert!(m.lock());
        assert!(!m.lock());
        m.unlock();
        assert!(m.lock());
    }

    #[test]
    fn matches_is_exact() {
        let m = Mapping::new(
            vec![vec!["sub".into(), "a".into()]],
            vec![vec!["b".into()]],
            double(),
        );
        assert!(m.matches(&["sub".to_string(), "a".to_string()]));
        assert!(!m.matches(&["a".to_string()]));
        assert!(!m.matches(&["sub".to_string(), "a".to_string(), "x".to_string()]));
    }

    #[test]
    fn parse_path_splits_segments() {
        assert_eq!(parse_path("gain"), vec!["gain".to_string()]);
        assert_eq!(
            parse_path("voice1/gain"),
            vec!["voice1".to_string(), "gain".to_string()]
        );
    }
}
