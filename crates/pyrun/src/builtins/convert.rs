use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunError, RunResult},
    types::{DictMap, SetMap},
    value::Value,
};

use super::BuiltinFunction;

pub(crate) fn builtin_len(args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg("len")?;
    let len = match &value {
        Value::Str(s) => s.chars().count(),
        Value::List(list) => list.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(dict) => dict.borrow().len(),
        Value::Set(set) => set.borrow().len(),
        other => {
            return Err(ExcType::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )));
        }
    };
    Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
}

pub(crate) fn builtin_str(args: ArgValues) -> RunResult<Value> {
    Ok(match args.get_zero_one_arg("str")? {
        Some(value @ Value::Str(_)) => value,
        Some(value) => Value::from(value.py_str()),
        None => Value::from(""),
    })
}

pub(crate) fn builtin_repr(args: ArgValues) -> RunResult<Value> {
    Ok(Value::from(args.get_one_arg("repr")?.py_repr()))
}

pub(crate) fn builtin_bool(args: ArgValues) -> RunResult<Value> {
    Ok(Value::Bool(args.get_zero_one_arg("bool")?.is_some_and(|v| v.py_bool())))
}

/// Parses `range`/`xrange` arguments into `(start, stop, step)`.
pub(crate) fn builtin_range(name: &str, args: ArgValues) -> RunResult<(i64, i64, i64)> {
    args.check_no_kwargs(name)?;
    let (positional, _) = args.into_parts();
    let ints = positional
        .iter()
        .map(|v| {
            v.as_int().ok_or_else(|| {
                ExcType::type_error(format!("{name}() integer argument expected, got {}.", v.type_name()))
            })
        })
        .collect::<RunResult<Vec<i64>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        [] => return Err(ExcType::type_error_at_least(name, 1, 0)),
        _ => return Err(ExcType::type_error_at_most(name, 3, ints.len())),
    };
    if step == 0 {
        return Err(ExcType::value_error(format!("{name}() step argument must not be zero")));
    }
    Ok((start, stop, step))
}

/// Number of items `range(start, stop, step)` produces; `step` is non-zero.
pub(crate) fn range_len(start: i64, stop: i64, step: i64) -> u64 {
    let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
    let len = if step > 0 {
        (stop - start + step - 1) / step
    } else {
        (start - stop - step - 1) / -step
    };
    u64::try_from(len.max(0)).unwrap_or(u64::MAX)
}

/// `isinstance(obj, classinfo)`; `classinfo` may be a tuple of classes.
pub(crate) fn builtin_isinstance(args: ArgValues) -> RunResult<Value> {
    let (obj, classinfo) = args.get_two_args("isinstance")?;
    is_instance(&obj, &classinfo).map(Value::Bool)
}

fn is_instance(obj: &Value, classinfo: &Value) -> RunResult<bool> {
    Ok(match classinfo {
        Value::Tuple(options) => {
            for option in options.iter() {
                if is_instance(obj, option)? {
                    return Ok(true);
                }
            }
            false
        }
        Value::Class(cls) => matches!(obj, Value::Instance(inst) if inst.class().is_subclass_of(cls)),
        Value::ExcType(exc_type) => match obj {
            Value::Exception(exc) => exc.exc_type().is_subclass_of(*exc_type),
            Value::Instance(inst) => inst.class().is_subclass_of_exc(*exc_type),
            _ => false,
        },
        Value::Builtin(builtin) => match builtin {
            BuiltinFunction::Int => matches!(obj, Value::Int(_) | Value::Bool(_)),
            BuiltinFunction::Bool => matches!(obj, Value::Bool(_)),
            BuiltinFunction::Float => matches!(obj, Value::Float(_)),
            BuiltinFunction::Str => matches!(obj, Value::Str(_)),
            BuiltinFunction::List => matches!(obj, Value::List(_)),
            BuiltinFunction::Tuple => matches!(obj, Value::Tuple(_)),
            BuiltinFunction::Dict => matches!(obj, Value::Dict(_)),
            BuiltinFunction::Set => matches!(obj, Value::Set(_)),
            _ => return Err(isinstance_arg_error()),
        },
        _ => return Err(isinstance_arg_error()),
    })
}

fn isinstance_arg_error() -> RunError {
    ExcType::type_error("isinstance() arg 2 must be a class, type, or tuple of classes and types")
}

/// Builds a dict from `(key, value)` pairs, as `dict(iterable)` does.
pub(crate) fn dict_from_pairs(pairs: Vec<Value>) -> RunResult<DictMap> {
    let mut map = DictMap::default();
    for (index, pair) in pairs.into_iter().enumerate() {
        let items: Vec<Value> = match pair {
            Value::Tuple(items) => items.to_vec(),
            Value::List(list) => list.borrow().clone(),
            other => {
                return Err(ExcType::type_error(format!(
                    "cannot convert dictionary update sequence element #{index} to a sequence (got {})",
                    other.type_name()
                )));
            }
        };
        let [key, value] = <[Value; 2]>::try_from(items).map_err(|items| {
            ExcType::value_error(format!(
                "dictionary update sequence element #{index} has length {}; 2 is required",
                items.len()
            ))
        })?;
        key.check_hashable()?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Builds a set, checking that every element is hashable.
pub(crate) fn set_from_values(values: Vec<Value>) -> RunResult<SetMap> {
    let mut set = SetMap::default();
    for value in values {
        value.check_hashable()?;
        set.insert(value);
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: Vec<Value>) -> ArgValues {
        ArgValues::new(values, Vec::new())
    }

    #[test]
    fn test_range_len() {
        assert_eq!(range_len(0, 3, 1), 3);
        assert_eq!(range_len(5, 0, -2), 3);
        assert_eq!(range_len(3, 0, 1), 0);
        assert_eq!(range_len(i64::MIN, i64::MAX, 1), u64::MAX);
    }

    #[test]
    fn test_range_arguments() {
        assert!(matches!(builtin_range("range", args(vec![Value::Int(3)])), Ok((0, 3, 1))));
        assert!(matches!(
            builtin_range("range", args(vec![Value::Int(5), Value::Int(1), Value::Int(-2)])),
            Ok((5, 1, -2))
        ));
        assert!(builtin_range("range", args(vec![Value::Int(1), Value::Int(2), Value::Int(0)])).is_err());
        assert!(builtin_range("range", args(vec![Value::Float(1.0)])).is_err());
    }

    #[test]
    fn test_isinstance_builtin_types() {
        let check = |obj: Value, cls: Value| builtin_isinstance(args(vec![obj, cls]));
        assert!(matches!(check(Value::Bool(true), Value::Builtin(BuiltinFunction::Int)), Ok(Value::Bool(true))));
        assert!(matches!(check(Value::Int(1), Value::Builtin(BuiltinFunction::Str)), Ok(Value::Bool(false))));
        let either = Value::new_tuple(vec![
            Value::Builtin(BuiltinFunction::Str),
            Value::Builtin(BuiltinFunction::Float),
        ]);
        assert!(matches!(check(Value::Float(1.0), either), Ok(Value::Bool(true))));
        assert!(check(Value::Int(1), Value::Int(2)).is_err());
    }

    #[test]
    fn test_dict_from_pairs_validates_length() {
        let good = vec![Value::new_tuple(vec![Value::from("a"), Value::Int(1)])];
        assert_eq!(dict_from_pairs(good).unwrap().len(), 1);
        let bad = vec![Value::new_tuple(vec![Value::from("a")])];
        assert!(dict_from_pairs(bad).is_err());
    }
}
