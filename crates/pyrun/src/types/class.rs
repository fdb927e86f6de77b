//! Classic (old-style) classes, their instances, and methods bound to them.

use std::{cell::RefCell, fmt, rc::Rc};

use crate::{exception_private::ExcType, namespace::Namespace, value::Value};

/// A class created by `BUILD_CLASS`.
///
/// Bases are other classes or built-in exception types; attribute lookup walks them
/// depth-first, left to right, the way Python 2 classic classes resolve.
#[derive(Debug)]
pub struct Class {
    name: Rc<str>,
    bases: Vec<Value>,
    dict: RefCell<Namespace>,
}

impl Class {
    #[must_use]
    pub fn new(name: Rc<str>, bases: Vec<Value>, dict: Namespace) -> Self {
        Self {
            name,
            bases,
            dict: RefCell::new(dict),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn bases(&self) -> &[Value] {
        &self.bases
    }

    /// Looks up `name` in this class and then in its bases, depth-first.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.dict.borrow().get(name) {
            return Some(value.clone());
        }
        self.bases.iter().find_map(|base| match base {
            Value::Class(cls) => cls.lookup(name),
            _ => None,
        })
    }

    pub fn set_attr(&self, name: &str, value: Value) {
        self.dict.borrow_mut().insert(name, value);
    }

    pub fn del_attr(&self, name: &str) -> Option<Value> {
        self.dict.borrow_mut().remove(name)
    }

    /// Returns true if `self` is `other` or inherits from it.
    #[must_use]
    pub fn is_subclass_of(self: &Rc<Self>, other: &Rc<Self>) -> bool {
        Rc::ptr_eq(self, other)
            || self.bases.iter().any(|base| match base {
                Value::Class(cls) => cls.is_subclass_of(other),
                _ => false,
            })
    }

    /// Returns true if this class inherits from the built-in exception type `exc_type`.
    #[must_use]
    pub fn is_subclass_of_exc(&self, exc_type: ExcType) -> bool {
        self.exception_base().is_some_and(|base| base.is_subclass_of(exc_type))
    }

    /// Returns the first built-in exception type found among the bases, if any.
    #[must_use]
    pub fn exception_base(&self) -> Option<ExcType> {
        self.bases.iter().find_map(|base| match base {
            Value::ExcType(exc_type) => Some(*exc_type),
            Value::Class(cls) => cls.exception_base(),
            _ => None,
        })
    }

    pub(crate) fn addr(&self) -> usize {
        std::ptr::from_ref(self) as usize
    }
}

/// An instance of a classic class.
#[derive(Debug)]
pub struct Instance {
    class: Rc<Class>,
    dict: RefCell<Namespace>,
}

impl Instance {
    #[must_use]
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            dict: RefCell::new(Namespace::new()),
        }
    }

    #[must_use]
    pub fn class(&self) -> &Rc<Class> {
        &self.class
    }

    /// Returns the attribute stored on the instance itself, ignoring the class.
    #[must_use]
    pub fn get_own(&self, name: &str) -> Option<Value> {
        self.dict.borrow().get(name).cloned()
    }

    pub fn set_attr(&self, name: &str, value: Value) {
        self.dict.borrow_mut().insert(name, value);
    }

    pub fn del_attr(&self, name: &str) -> Option<Value> {
        self.dict.borrow_mut().remove(name)
    }

    /// The `args` tuple of an exception instance, or an empty slice.
    #[must_use]
    pub fn exception_args(&self) -> Vec<Value> {
        match self.get_own("args") {
            Some(Value::Tuple(items)) => items.to_vec(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn addr(&self) -> usize {
        std::ptr::from_ref(self) as usize
    }
}

/// A function retrieved through a class, bound or unbound.
///
/// `instance` is `Some` for a bound method (`obj.f`) and `None` for an unbound one
/// (`C.f`), which type-checks its first argument when called.
#[derive(Debug)]
pub struct Method {
    pub instance: Option<Value>,
    pub class: Rc<Class>,
    pub func: Value,
}

impl Method {
    /// Name of the underlying function.
    #[must_use]
    pub fn name(&self) -> String {
        match &self.func {
            Value::Function(func) => func.name().to_owned(),
            other => other.type_name().to_owned(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(
                f,
                "<bound method {}.{} of {}>",
                self.class.name(),
                self.name(),
                instance.py_repr()
            ),
            None => write!(f, "<unbound method {}.{}>", self.class.name(), self.name()),
        }
    }
}
