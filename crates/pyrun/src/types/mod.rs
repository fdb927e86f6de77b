//! Heap payload types referenced from [`Value`](crate::value::Value).
//!
//! Mutable payloads sit behind `Rc<RefCell<..>>`; immutable ones behind plain `Rc`.

mod class;
mod generator;
mod iter;
mod method;

use std::{cell::RefCell, fmt, rc::Rc};

use ahash::RandomState;
use indexmap::{IndexMap, IndexSet};

pub use class::{Class, Instance, Method};
pub use generator::{Generator, GeneratorState};
pub use iter::SeqIter;
pub use method::{BoundBuiltin, NativeMethod};

use crate::{
    exception_private::{ExcType, RunResult},
    value::Value,
};

/// Insertion-ordered mapping backing `dict` values.
pub type DictMap = IndexMap<Value, Value, RandomState>;

/// Insertion-ordered set backing `set` values.
pub type SetMap = IndexSet<Value, RandomState>;

/// A shared, mutable single-value box used for variables captured by closures.
///
/// Cloning a `Cell` clones the handle, not the contents: every clone observes the
/// same slot, which is how a nested function sees writes made by its enclosing frame
/// and vice versa.
#[derive(Clone, Default)]
pub struct Cell(Rc<RefCell<Option<Value>>>);

impl Cell {
    /// Creates an empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cell holding `value`.
    #[must_use]
    pub fn with_value(value: Value) -> Self {
        Self(Rc::new(RefCell::new(Some(value))))
    }

    /// Returns the current contents, or `None` if the cell is empty.
    #[must_use]
    pub fn get(&self) -> Option<Value> {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.borrow_mut() = Some(value);
    }

    pub fn clear(&self) {
        *self.0.borrow_mut() = None;
    }

    /// Returns true if both handles point at the same slot.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // contents are omitted: a cell may hold a function that closes over it
        write!(f, "Cell({:#x})", self.addr())
    }
}

/// A `slice(start, stop, step)` object; absent components are `None`.
#[derive(Debug, Clone)]
pub struct Slice {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

impl Slice {
    /// Resolves the slice against a sequence of length `len`.
    ///
    /// Returns `(start, stop, step)` with negative indices wrapped and every bound
    /// clamped, so iterating `start, start+step, ..` while short of `stop` visits the
    /// selected positions.
    pub(crate) fn indices(&self, len: usize) -> RunResult<(i64, i64, i64)> {
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        let step = match &self.step {
            Value::None => 1,
            other => other
                .as_int()
                .ok_or_else(|| ExcType::type_error("slice indices must be integers or None"))?,
        };
        if step == 0 {
            return Err(ExcType::value_error("slice step cannot be zero"));
        }
        let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
        let resolve = |bound: &Value, default: i64| -> RunResult<i64> {
            match bound {
                Value::None => Ok(default),
                other => {
                    let raw = other
                        .as_int()
                        .ok_or_else(|| ExcType::type_error("slice indices must be integers or None"))?;
                    let wrapped = if raw < 0 { raw + len } else { raw };
                    Ok(wrapped.clamp(lower, upper))
                }
            }
        };
        let start = resolve(&self.start, if step < 0 { upper } else { lower })?;
        let stop = resolve(&self.stop, if step < 0 { lower } else { upper })?;
        Ok((start, stop, step))
    }

    /// Returns the positions selected by this slice in a sequence of length `len`.
    pub(crate) fn positions(&self, len: usize) -> RunResult<Vec<usize>> {
        let (start, stop, step) = self.indices(len)?;
        let mut out = Vec::new();
        let mut i = start;
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            out.push(usize::try_from(i).unwrap_or_default());
            i += step;
        }
        Ok(out)
    }
}
