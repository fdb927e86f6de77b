//! `COMPARE_OP`: ordering, equality, membership, identity and exception matching.

use std::cmp::Ordering;

use super::VM;
use crate::{
    bytecode::CompareOp,
    exception_private::{ExcType, RunError, RunResult},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// Pops the right operand, then the left, and pushes the comparison result.
    ///
    /// Operand codes outside the table are internal errors.
    pub(super) fn compare(&mut self, code: usize) -> RunResult<()> {
        let op = u8::try_from(code)
            .ok()
            .and_then(CompareOp::from_repr)
            .ok_or_else(|| RunError::internal(format!("COMPARE_OP operand {code} out of range")))?;
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = match op {
            CompareOp::Lt => matches!(lhs.py_partial_cmp(&rhs)?, Some(Ordering::Less)),
            CompareOp::Le => matches!(lhs.py_partial_cmp(&rhs)?, Some(Ordering::Less | Ordering::Equal)),
            CompareOp::Eq => lhs.py_eq(&rhs),
            CompareOp::Ne => !lhs.py_eq(&rhs),
            CompareOp::Gt => matches!(lhs.py_partial_cmp(&rhs)?, Some(Ordering::Greater)),
            CompareOp::Ge => matches!(
                lhs.py_partial_cmp(&rhs)?,
                Some(Ordering::Greater | Ordering::Equal)
            ),
            CompareOp::In => self.contains(&rhs, &lhs)?,
            CompareOp::NotIn => !self.contains(&rhs, &lhs)?,
            CompareOp::Is => lhs.is_same(&rhs),
            CompareOp::IsNot => !lhs.is_same(&rhs),
            CompareOp::ExceptionMatch => exception_matches(&lhs, &rhs),
        };
        self.push(Value::Bool(result))
    }

    /// The `in` operator: `item in container`.
    pub(super) fn contains(&mut self, container: &Value, item: &Value) -> RunResult<bool> {
        match container {
            Value::Str(haystack) => match item {
                Value::Str(needle) => Ok(haystack.contains(&**needle)),
                other => Err(ExcType::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Value::List(list) => Ok(list.borrow().iter().any(|v| v.py_eq(item))),
            Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
            Value::Dict(dict) => {
                item.check_hashable()?;
                Ok(dict.borrow().contains_key(item))
            }
            Value::Set(set) => {
                item.check_hashable()?;
                Ok(set.borrow().contains(item))
            }
            Value::Generator(_) | Value::Iterator(_) => {
                while let Some(value) = self.iter_next(container)? {
                    if value.py_eq(item) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            other => Err(ExcType::type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }
}

/// Returns true if an exception of class `exc_class` is caught by `except handler:`.
///
/// `handler` may be a tuple of classes; anything that is not a class never matches.
pub(super) fn exception_matches(exc_class: &Value, handler: &Value) -> bool {
    match handler {
        Value::Tuple(options) => options.iter().any(|option| exception_matches(exc_class, option)),
        Value::ExcType(handler_type) => match exc_class {
            Value::ExcType(exc_type) => exc_type.is_subclass_of(*handler_type),
            Value::Class(cls) => cls.is_subclass_of_exc(*handler_type),
            _ => false,
        },
        Value::Class(handler_cls) => matches!(exc_class, Value::Class(cls) if cls.is_subclass_of(handler_cls)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{namespace::Namespace, types::Class};

    #[test]
    fn test_exception_matches_hierarchy() {
        let zero = Value::ExcType(ExcType::ZeroDivisionError);
        assert!(exception_matches(&zero, &Value::ExcType(ExcType::ArithmeticError)));
        assert!(exception_matches(&zero, &Value::ExcType(ExcType::StandardError)));
        assert!(!exception_matches(&zero, &Value::ExcType(ExcType::LookupError)));
        let either = Value::new_tuple(vec![
            Value::ExcType(ExcType::KeyError),
            Value::ExcType(ExcType::ZeroDivisionError),
        ]);
        assert!(exception_matches(&zero, &either));
    }

    #[test]
    fn test_exception_matches_user_class() {
        let base = Rc::new(Class::new(
            "MyError".into(),
            vec![Value::ExcType(ExcType::ValueError)],
            Namespace::new(),
        ));
        let derived = Rc::new(Class::new("Sub".into(), vec![Value::Class(base.clone())], Namespace::new()));
        let derived = Value::Class(derived);
        assert!(exception_matches(&derived, &Value::Class(base)));
        assert!(exception_matches(&derived, &Value::ExcType(ExcType::Exception)));
        assert!(!exception_matches(&Value::ExcType(ExcType::ValueError), &derived));
    }
}
