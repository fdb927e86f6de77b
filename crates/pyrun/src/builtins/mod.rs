//! The builtin namespace injected into every frame.
//!
//! [`Builtins`] is the read-only table that bare-name lookups fall through to after
//! locals and globals. It is built once by the host, shared behind an `Rc`, and never
//! mutated by the VM. The default table holds the builtin functions, the exception
//! types, and `True`/`False`/`None`; hosts extend it with [`Builtins::with_native`].

mod convert;
mod iter;
mod numeric;

use std::{fmt, rc::Rc};

use ahash::RandomState;
use indexmap::IndexMap;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

pub(crate) use convert::{
    builtin_bool, builtin_isinstance, builtin_len, builtin_range, builtin_repr, builtin_str, dict_from_pairs,
    range_len, set_from_values,
};
pub(crate) use iter::{enumerate_values, reverse_values, sort_keyed, zip_values};
pub(crate) use numeric::{builtin_abs, builtin_float, builtin_int, builtin_min_max, builtin_sum};

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    exception_public::Exception,
    value::Value,
};

/// Builtin functions implemented by the VM.
///
/// The string form is the Python name, e.g. `BuiltinFunction::Len` is `len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinFunction {
    Abs,
    Bool,
    Dict,
    Enumerate,
    Float,
    Int,
    Isinstance,
    Iter,
    Len,
    List,
    Locals,
    Max,
    Min,
    Next,
    Range,
    Repr,
    Reversed,
    Set,
    Sorted,
    Str,
    Sum,
    Tuple,
    Xrange,
    Zip,
}

/// Signature of host callables registered on the builtins table.
pub type NativeFn = dyn Fn(ArgValues) -> Result<Value, Exception>;

/// A host-implemented callable.
///
/// The callable receives the merged positional and keyword arguments and returns a
/// value or an [`Exception`], which the VM raises into the running program.
#[derive(Clone)]
pub struct NativeFunction {
    name: Rc<str>,
    func: Rc<NativeFn>,
}

impl NativeFunction {
    pub fn new(name: &str, func: impl Fn(ArgValues) -> Result<Value, Exception> + 'static) -> Self {
        Self {
            name: name.into(),
            func: Rc::new(func),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn call(&self, args: ArgValues) -> RunResult<Value> {
        (self.func)(args).map_err(Into::into)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.func).cast::<u8>() as usize
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction").field("name", &self.name).finish_non_exhaustive()
    }
}

/// The builtin namespace.
#[derive(Debug, Clone)]
pub struct Builtins {
    table: IndexMap<Rc<str>, Value, RandomState>,
}

impl Default for Builtins {
    /// The standard table: builtin functions, exception types, and the constants.
    fn default() -> Self {
        let mut builtins = Self::empty();
        for function in BuiltinFunction::iter() {
            let name: &'static str = function.into();
            builtins.table.insert(name.into(), Value::Builtin(function));
        }
        for exc_type in ExcType::iter() {
            let name: &'static str = exc_type.into();
            builtins.table.insert(name.into(), Value::ExcType(exc_type));
        }
        builtins.table.insert("True".into(), Value::Bool(true));
        builtins.table.insert("False".into(), Value::Bool(false));
        builtins.table.insert("None".into(), Value::None);
        builtins
    }
}

impl Builtins {
    /// A table with no entries at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            table: IndexMap::default(),
        }
    }

    /// Registers a host callable under `name`, replacing any existing entry.
    #[must_use]
    pub fn with_native(
        mut self,
        name: &str,
        func: impl Fn(ArgValues) -> Result<Value, Exception> + 'static,
    ) -> Self {
        self.table
            .insert(name.into(), Value::Native(NativeFunction::new(name, func)));
        self
    }

    /// Binds `name` to a plain value, replacing any existing entry.
    #[must_use]
    pub fn with_value(mut self, name: &str, value: Value) -> Self {
        self.table.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.table.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(AsRef::as_ref)
    }
}
