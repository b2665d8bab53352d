//! Wrap histories and the registry that holds them
//!
//! Histories are kept out of band, keyed by `FunctionId`, rather than on the
//! functions themselves. The registry holds weak references so entries for
//! dropped functions can be pruned.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use itertools::Itertools;
use parking_lot::Mutex;
use tracing::trace;

use crate::backend::models::{Function, FunctionId, Value};

/// Registry size that triggers the first prune of dead entries
const INITIAL_PRUNE_AT: usize = 64;

/// Ordered identifiers of the transformations applied to one function
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrapHistory(Vec<String>);

impl WrapHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.0.iter().any(|id| id == identifier)
    }

    /// A copy of this history with `identifier` appended
    pub fn extended(&self, identifier: impl Into<String>) -> Self {
        let mut ids = self.0.clone();
        ids.push(identifier.into());
        Self(ids)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for WrapHistory {
    fn from(ids: Vec<String>) -> Self {
        Self(ids)
    }
}

impl<S: Into<String>> FromIterator<S> for WrapHistory {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for WrapHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().join(", "))
    }
}

#[derive(Debug)]
struct Entry {
    function: Weak<Function>,
    history: WrapHistory,
}

#[derive(Debug)]
struct RegistryInner {
    entries: HashMap<FunctionId, Entry>,
    prune_at: usize,
}

/// Side table from function identity to wrap history
#[derive(Debug)]
pub struct WrapRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for WrapRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WrapRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                entries: HashMap::new(),
                prune_at: INITIAL_PRUNE_AT,
            }),
        }
    }

    /// History of `function`, if it was ever recorded
    pub fn wrap_history(&self, function: &Function) -> Option<WrapHistory> {
        self.inner
            .lock()
            .entries
            .get(&function.id())
            .map(|entry| entry.history.clone())
    }

    /// History of any value; empty for values that are not functions
    pub fn history_of(&self, value: &Value) -> WrapHistory {
        value
            .as_function()
            .and_then(|function| self.wrap_history(function))
            .unwrap_or_default()
    }

    /// Record `history` for `function`, returning the previous one
    pub fn set_wrap_history(
        &self,
        function: &Arc<Function>,
        history: WrapHistory,
    ) -> Option<WrapHistory> {
        let mut inner = self.inner.lock();
        let previous = inner
            .entries
            .insert(
                function.id(),
                Entry {
                    function: Arc::downgrade(function),
                    history,
                },
            )
            .map(|entry| entry.history);

        if inner.entries.len() >= inner.prune_at {
            let removed = prune_dead(&mut inner.entries);
            inner.prune_at = (inner.entries.len() * 2).max(INITIAL_PRUNE_AT);
            trace!(target: "recwrap::entry", removed, live = inner.entries.len(), "pruned wrap registry");
        }
        previous
    }

    /// Whether `target` may be wrapped by the transformation `identifier`
    ///
    /// Only bytecode functions qualify, and only once per transformation.
    pub fn is_eligible(&self, target: &Value, identifier: &str) -> bool {
        match target.as_function() {
            Some(function) => !self
                .wrap_history(function)
                .is_some_and(|history| history.contains(identifier)),
            None => false,
        }
    }

    /// Drop entries whose function is gone, returning how many were removed
    pub fn prune(&self) -> usize {
        prune_dead(&mut self.inner.lock().entries)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn prune_dead(entries: &mut HashMap<FunctionId, Entry>) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.function.strong_count() > 0);
    before - entries.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::bytecode::chunk::ChunkBuilder;
    use crate::backend::bytecode::instruction::Instruction;
    use crate::backend::models::{NativeFn, Scope};

    fn function() -> Arc<Function> {
        let mut builder = ChunkBuilder::new("f");
        builder.emit(Instruction::PushNil);
        builder.emit(Instruction::Return);
        Arc::new(Function::new("f", builder.build_arc(), Scope::new("test")))
    }

    #[test]
    fn test_history_extends_in_order() {
        let history = WrapHistory::new().extended("w1").extended("w2");
        assert_eq!(history.as_slice(), &["w1".to_string(), "w2".to_string()]);
        assert!(history.contains("w1"));
        assert!(!history.contains("w3"));
        assert_eq!(history.to_string(), "[w1, w2]");
    }

    #[test]
    fn test_registry_tracks_eligibility() {
        let registry = WrapRegistry::new();
        let f = function();
        let value = Value::Function(Arc::clone(&f));

        assert!(registry.is_eligible(&value, "w1"));
        assert!(registry.wrap_history(&f).is_none());

        assert!(registry
            .set_wrap_history(&f, WrapHistory::from_iter(["w1"]))
            .is_none());
        assert!(!registry.is_eligible(&value, "w1"));
        assert!(registry.is_eligible(&value, "w2"));
        assert_eq!(registry.history_of(&value).len(), 1);
    }

    #[test]
    fn test_non_functions_are_never_eligible() {
        let registry = WrapRegistry::new();
        let native = NativeFn::new("n", |_vm, _args| Ok(Value::Nil)).into_value();
        assert!(!registry.is_eligible(&native, "w"));
        assert!(!registry.is_eligible(&Value::Nil, "w"));
        assert!(registry.history_of(&native).is_empty());
    }

    #[test]
    fn test_prune_drops_dead_functions() {
        let registry = WrapRegistry::new();
        let kept = function();
        registry.set_wrap_history(&kept, WrapHistory::from_iter(["w"]));
        {
            let dropped = function();
            registry.set_wrap_history(&dropped, WrapHistory::from_iter(["w"]));
        }
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.prune(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.wrap_history(&kept).is_some());
    }
}
