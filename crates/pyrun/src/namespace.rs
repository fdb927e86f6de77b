//! Name-to-value mappings used for locals, globals, class bodies and instance attributes.

use std::{cell::RefCell, rc::Rc};

use ahash::RandomState;
use indexmap::IndexMap;

use crate::{types::DictMap, value::Value};

/// An insertion-ordered mapping from variable names to values.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    vars: IndexMap<Rc<str>, Value, RandomState>,
}

/// A namespace shared by reference between frames.
///
/// Globals are aliased, never copied: every function defined in a module holds the
/// same `Scope` as the module frame, so a store in one is visible to all of them.
pub type Scope = Rc<RefCell<Namespace>>;

/// Creates a new, empty shared scope.
#[must_use]
pub fn new_scope() -> Scope {
    Rc::new(RefCell::new(Namespace::default()))
}

impl Namespace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Binds `name`, replacing any previous value in place (keeping its position).
    pub fn insert(&mut self, name: impl Into<Rc<str>>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Removes `name`, preserving the order of the remaining bindings.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.shift_remove(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(k, v)| (k.as_ref(), v))
    }

    /// Copies the bindings into a dict keyed by name strings, as `locals()` returns.
    #[must_use]
    pub fn to_dict(&self) -> DictMap {
        self.vars
            .iter()
            .map(|(name, value)| (Value::Str(name.clone()), value.clone()))
            .collect()
    }
}
