//! Resolved dependency values passed to evaluators.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::node::NodeValue;

/// The resolved dependency map handed to an evaluator.
///
/// Each declared dependency key maps to its dependency's current value,
/// type-erased as `Arc<dyn Any + Send + Sync>`. A key declared errorable
/// whose dependency failed is present but absent-valued; read it with
/// [`get_opt`](Deps::get_opt).
///
/// Accessor errors (undeclared key, wrong type, absent value read through
/// [`get`](Deps::get)) are plain `anyhow` errors so they propagate out of an
/// evaluator with `?` and surface as that node's evaluation failure.
pub struct Deps {
    values: HashMap<Arc<str>, Option<NodeValue>>,
}

impl Deps {
    pub(crate) fn new(values: HashMap<Arc<str>, Option<NodeValue>>) -> Self {
        Self { values }
    }

    /// Get a required dependency value, downcast to `T`.
    ///
    /// Fails if the key was not declared, if the value is absent (an
    /// errorable dependency failed; use [`get_opt`](Deps::get_opt) for those
    /// keys), or if `T` is not the type the dependency produced.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>> {
        match self.values.get(key) {
            None => Err(anyhow!("dependency key `{key}` was not declared")),
            Some(None) => Err(anyhow!(
                "dependency `{key}` is unavailable because it failed; read it with get_opt"
            )),
            Some(Some(value)) => value
                .clone()
                .downcast::<T>()
                .map_err(|_| anyhow!("dependency `{key}` holds a different type")),
        }
    }

    /// Get an errorable dependency value, downcast to `T`.
    ///
    /// Returns `Ok(None)` when the dependency failed and its failure was
    /// masked. Fails if the key was not declared or the type does not match.
    pub fn get_opt<T: Send + Sync + 'static>(&self, key: &str) -> Result<Option<Arc<T>>> {
        match self.values.get(key) {
            None => Err(anyhow!("dependency key `{key}` was not declared")),
            Some(None) => Ok(None),
            Some(Some(value)) => value
                .clone()
                .downcast::<T>()
                .map(Some)
                .map_err(|_| anyhow!("dependency `{key}` holds a different type")),
        }
    }

    /// Returns true if `key` was declared as a dependency.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Iterate over the declared dependency keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_ref())
    }

    /// Number of declared dependencies.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the node declared no dependencies.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps_with(key: &str, value: Option<NodeValue>) -> Deps {
        let mut values = HashMap::new();
        values.insert(Arc::<str>::from(key), value);
        Deps::new(values)
    }

    #[test]
    fn get_downcasts_present_values() {
        let deps = deps_with("n", Some(Arc::new(7u32)));
        assert_eq!(*deps.get::<u32>("n").unwrap(), 7);
        assert!(deps.get::<String>("n").is_err());
        assert!(deps.get::<u32>("missing").is_err());
    }

    #[test]
    fn get_opt_masks_absent_values() {
        let deps = deps_with("n", None);
        assert!(deps.get::<u32>("n").is_err());
        assert!(deps.get_opt::<u32>("n").unwrap().is_none());
        assert!(deps.get_opt::<u32>("missing").is_err());
    }
}
