//! Global binding tables
//!
//! A `Scope` owns the free names a function body resolves through
//! `LoadGlobal`/`StoreGlobal`. Scopes are shared by reference between every
//! function defined in them. Binding from several threads at once is safe at
//! the table level; anything beyond single-binding atomicity is the caller's
//! concern.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::value::Value;

pub struct Scope {
    name: String,
    bindings: RwLock<HashMap<String, Value>>,
}

impl Scope {
    /// Create a new empty scope
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            bindings: RwLock::new(HashMap::new()),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind `name` to `value`, returning the previous binding
    pub fn bind(&self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.bindings.write().insert(name.into(), value)
    }

    /// Resolve `name`
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.bindings.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.read().contains_key(name)
    }

    pub fn unbind(&self, name: &str) -> Option<Value> {
        self.bindings.write().remove(name)
    }

    /// Bound names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every binding
    ///
    /// Functions hold their scope and scopes hold functions, so a scope that
    /// is no longer needed should be cleared to release both.
    pub fn clear(&self) {
        self.bindings.write().clear();
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_lookup() {
        let scope = Scope::new("m");
        assert!(scope.lookup("x").is_none());
        assert!(scope.bind("x", Value::Long(1)).is_none());
        assert_eq!(scope.bind("x", Value::Long(2)), Some(Value::Long(1)));
        assert_eq!(scope.lookup("x"), Some(Value::Long(2)));
        assert!(scope.contains("x"));
    }

    #[test]
    fn test_names_sorted_and_clear() {
        let scope = Scope::new("m");
        scope.bind("b", Value::Nil);
        scope.bind("a", Value::Nil);
        assert_eq!(scope.names(), vec!["a".to_string(), "b".to_string()]);
        scope.clear();
        assert!(scope.names().is_empty());
    }
}
