use std::{cell::RefCell, rc::Rc};

use crate::{
    exception_private::{ExcType, RunResult},
    value::Value,
};

/// What a [`SeqIter`] walks over.
#[derive(Debug)]
enum Source {
    /// A live list; appends made during iteration are observed.
    List(Rc<RefCell<Vec<Value>>>),
    /// A snapshot of tuple, dict-key, or set elements.
    Items(Rc<[Value]>),
    Chars(Vec<char>),
    Range { next: i64, stop: i64, step: i64 },
}

/// Iterator over a built-in container, produced by `GET_ITER` and `iter()`.
///
/// Dicts and sets are snapshotted when the iterator is created, so mutating them
/// during iteration does not invalidate it.
#[derive(Debug)]
pub struct SeqIter {
    source: Source,
    index: usize,
}

impl SeqIter {
    /// Creates an iterator over `value`, or raises `TypeError` if it is not iterable.
    pub(crate) fn new(value: &Value) -> RunResult<Self> {
        let source = match value {
            Value::List(list) => Source::List(list.clone()),
            Value::Tuple(items) => Source::Items(items.clone()),
            Value::Str(s) => Source::Chars(s.chars().collect()),
            Value::Dict(dict) => Source::Items(dict.borrow().keys().cloned().collect()),
            Value::Set(set) => Source::Items(set.borrow().iter().cloned().collect()),
            other => return Err(ExcType::type_error_not_iterable(other.type_name())),
        };
        Ok(Self { source, index: 0 })
    }

    /// Creates an iterator over `start, start+step, ..` stopping before `stop`.
    pub(crate) fn range(start: i64, stop: i64, step: i64) -> Self {
        Self {
            source: Source::Range {
                next: start,
                stop,
                step,
            },
            index: 0,
        }
    }

    /// Creates an iterator over an owned sequence of values.
    pub(crate) fn from_values(values: Vec<Value>) -> Self {
        Self {
            source: Source::Items(values.into()),
            index: 0,
        }
    }

    /// Returns the next element, or `None` once exhausted.
    pub(crate) fn next_value(&mut self) -> Option<Value> {
        let value = match &mut self.source {
            Source::List(list) => list.borrow().get(self.index).cloned(),
            Source::Items(items) => items.get(self.index).cloned(),
            Source::Chars(chars) => chars.get(self.index).map(|c| Value::from(c.to_string().as_str())),
            Source::Range { next, stop, step } => {
                let live = if *step > 0 { *next < *stop } else { *next > *stop };
                if !live {
                    return None;
                }
                let current = *next;
                *next = next.saturating_add(*step);
                return Some(Value::Int(current));
            }
        };
        if value.is_some() {
            self.index += 1;
        }
        value
    }
}
