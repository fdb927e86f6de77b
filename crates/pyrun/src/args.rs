use std::rc::Rc;

use smallvec::SmallVec;

use crate::{
    exception_private::{ExcType, RunResult},
    value::Value,
};

/// Arguments of a call after star-arg merging.
///
/// Positional arguments are stored inline for the common case of a handful of
/// arguments. Keyword arguments keep call-site order; names are unique.
#[derive(Debug, Clone, Default)]
pub struct ArgValues {
    positional: SmallVec<[Value; 4]>,
    kwargs: Vec<(Rc<str>, Value)>,
}

impl ArgValues {
    #[must_use]
    pub fn new(positional: impl IntoIterator<Item = Value>, kwargs: Vec<(Rc<str>, Value)>) -> Self {
        Self {
            positional: positional.into_iter().collect(),
            kwargs,
        }
    }

    #[must_use]
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    #[must_use]
    pub fn kwargs(&self) -> &[(Rc<str>, Value)] {
        &self.kwargs
    }

    /// Total number of arguments, positional and keyword.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positional.len() + self.kwargs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `value` as the first positional argument (the `self` of a bound method).
    pub(crate) fn prepend(&mut self, value: Value) {
        self.positional.insert(0, value);
    }

    #[must_use]
    pub fn into_parts(self) -> (SmallVec<[Value; 4]>, Vec<(Rc<str>, Value)>) {
        (self.positional, self.kwargs)
    }

    /// Removes and returns the keyword argument `name`, if given.
    pub(crate) fn take_kwarg(&mut self, name: &str) -> Option<Value> {
        let index = self.kwargs.iter().position(|(k, _)| &**k == name)?;
        Some(self.kwargs.remove(index).1)
    }

    pub(crate) fn check_no_kwargs(&self, name: &str) -> RunResult<()> {
        if self.kwargs.is_empty() {
            Ok(())
        } else {
            Err(ExcType::type_error_no_kwargs(name))
        }
    }

    /// Checks that no arguments were passed.
    pub(crate) fn check_zero_args(self, name: &str) -> RunResult<()> {
        self.check_no_kwargs(name)?;
        if self.positional.is_empty() {
            Ok(())
        } else {
            Err(ExcType::type_error_no_args(name, self.positional.len()))
        }
    }

    /// Checks that exactly one positional argument was passed, returning it.
    pub(crate) fn get_one_arg(self, name: &str) -> RunResult<Value> {
        self.check_no_kwargs(name)?;
        let count = self.positional.len();
        let mut iter = self.positional.into_iter();
        match (iter.next(), iter.next()) {
            (Some(a), None) => Ok(a),
            _ => Err(ExcType::type_error_arg_count(name, 1, count)),
        }
    }

    /// Checks that exactly two positional arguments were passed, returning them.
    pub(crate) fn get_two_args(self, name: &str) -> RunResult<(Value, Value)> {
        self.check_no_kwargs(name)?;
        let count = self.positional.len();
        let mut iter = self.positional.into_iter();
        match (iter.next(), iter.next(), iter.next()) {
            (Some(a), Some(b), None) => Ok((a, b)),
            _ => Err(ExcType::type_error_arg_count(name, 2, count)),
        }
    }

    /// Checks that zero or one positional argument was passed.
    pub(crate) fn get_zero_one_arg(self, name: &str) -> RunResult<Option<Value>> {
        self.check_no_kwargs(name)?;
        let count = self.positional.len();
        let mut iter = self.positional.into_iter();
        match (iter.next(), iter.next()) {
            (first, None) => Ok(first),
            _ => Err(ExcType::type_error_at_most(name, 1, count)),
        }
    }

    /// Checks that one or two positional arguments were passed.
    pub(crate) fn get_one_two_args(self, name: &str) -> RunResult<(Value, Option<Value>)> {
        self.check_no_kwargs(name)?;
        let count = self.positional.len();
        let mut iter = self.positional.into_iter();
        match (iter.next(), iter.next(), iter.next()) {
            (Some(a), b, None) => Ok((a, b)),
            (None, ..) => Err(ExcType::type_error_at_least(name, 1, count)),
            _ => Err(ExcType::type_error_at_most(name, 2, count)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> ArgValues {
        ArgValues::new(values.iter().copied().map(Value::Int), Vec::new())
    }

    #[test]
    fn test_arity_helpers() {
        assert!(ints(&[]).check_zero_args("f").is_ok());
        assert!(ints(&[1]).check_zero_args("f").is_err());
        assert!(matches!(ints(&[7]).get_one_arg("f"), Ok(Value::Int(7))));
        assert!(ints(&[1, 2]).get_one_arg("f").is_err());
        assert!(matches!(ints(&[1, 2]).get_two_args("f"), Ok((Value::Int(1), Value::Int(2)))));
        assert!(matches!(ints(&[]).get_zero_one_arg("f"), Ok(None)));
        assert!(matches!(ints(&[3]).get_one_two_args("f"), Ok((Value::Int(3), None))));
        assert!(ints(&[]).get_one_two_args("f").is_err());
        assert!(ints(&[1, 2, 3]).get_one_two_args("f").is_err());
    }

    #[test]
    fn test_keywords() {
        let mut args = ArgValues::new([Value::Int(1)], vec![(Rc::from("key"), Value::Int(2))]);
        assert_eq!(args.len(), 2);
        assert!(args.check_no_kwargs("sorted").is_err());
        assert!(matches!(args.take_kwarg("key"), Some(Value::Int(2))));
        assert!(args.take_kwarg("key").is_none());
        assert!(args.check_no_kwargs("sorted").is_ok());
        args.prepend(Value::Int(0));
        let positional: Vec<String> = args.positional().iter().map(Value::py_repr).collect();
        assert_eq!(positional, vec!["0", "1"]);
    }
}
