//! Native methods of the built-in types: `list.append`, `dict.get`, `str.join`, ...

use std::{cell::RefCell, rc::Rc};

use super::VM;
use crate::{
    args::ArgValues,
    builtins::{dict_from_pairs, sort_keyed},
    exception_private::{ExcType, RunError, RunResult},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{BoundBuiltin, DictMap, NativeMethod, SetMap},
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// Calls a native method on its bound receiver.
    pub(super) fn call_native_method(&mut self, bound: &BoundBuiltin, args: ArgValues) -> RunResult<Value> {
        let name: &'static str = bound.method.into();
        match &bound.receiver {
            Value::List(list) => self.call_list_method(list, bound.method, name, args),
            Value::Tuple(items) => sequence_method(items, bound.method, name, "tuple", args),
            Value::Dict(dict) => self.call_dict_method(dict, bound.method, name, args),
            Value::Str(s) => self.call_str_method(s, bound.method, name, args),
            Value::Set(set) => set_method(set, bound.method, name, args),
            Value::Generator(generator) => match bound.method {
                NativeMethod::Next => {
                    args.check_zero_args(name)?;
                    self.advance(generator, Value::None)
                }
                NativeMethod::Send => {
                    let sent = args.get_one_arg(name)?;
                    self.advance(generator, sent)
                }
                _ => Err(not_applicable(bound)),
            },
            Value::Iterator(_) => {
                args.check_zero_args(name)?;
                self.iter_next(&bound.receiver)?
                    .ok_or_else(|| ExcType::stop_iteration(None))
            }
            _ => Err(not_applicable(bound)),
        }
    }

    fn call_list_method(
        &mut self,
        list: &Rc<RefCell<Vec<Value>>>,
        method: NativeMethod,
        name: &str,
        mut args: ArgValues,
    ) -> RunResult<Value> {
        match method {
            NativeMethod::Append => {
                let value = args.get_one_arg(name)?;
                list.borrow_mut().push(value);
            }
            NativeMethod::Extend => {
                let iterable = args.get_one_arg(name)?;
                let items = self.collect_iterable(&iterable)?;
                list.borrow_mut().extend(items);
            }
            NativeMethod::Insert => {
                let (index, value) = args.get_two_args(name)?;
                let mut list = list.borrow_mut();
                let index = clamp_index(&index, list.len())?;
                list.insert(index, value);
            }
            NativeMethod::Reverse => {
                args.check_zero_args(name)?;
                list.borrow_mut().reverse();
            }
            NativeMethod::Remove => {
                let value = args.get_one_arg(name)?;
                // compare on a snapshot: an item may be the list itself
                let items = list.borrow().clone();
                let index = items
                    .iter()
                    .position(|item| item.py_eq(&value))
                    .ok_or_else(|| ExcType::value_error("list.remove(x): x not in list"))?;
                list.borrow_mut().remove(index);
            }
            NativeMethod::Pop => {
                let index = args.get_zero_one_arg(name)?;
                let mut list = list.borrow_mut();
                if list.is_empty() {
                    return Err(ExcType::index_error("pop from empty list"));
                }
                let len = list.len();
                let index = match index {
                    None => len - 1,
                    Some(index) => {
                        wrap_index(&index, len)?.ok_or_else(|| ExcType::index_error("pop index out of range"))?
                    }
                };
                return Ok(list.remove(index));
            }
            NativeMethod::Sort => {
                let key = args.take_kwarg("key").filter(|key| !matches!(key, Value::None));
                let reverse = args.take_kwarg("reverse").is_some_and(|r| r.py_bool());
                args.check_zero_args(name)?;
                let items = list.borrow().clone();
                let mut pairs = Vec::with_capacity(items.len());
                for item in items {
                    let sort_key = match &key {
                        Some(key) => self.call_value(key, ArgValues::new([item.clone()], Vec::new()))?,
                        None => item.clone(),
                    };
                    pairs.push((sort_key, item));
                }
                sort_keyed(&mut pairs, reverse)?;
                *list.borrow_mut() = pairs.into_iter().map(|(_, item)| item).collect();
            }
            NativeMethod::Index | NativeMethod::Count => {
                let items = list.borrow().clone();
                return sequence_method(&items, method, name, "list", args);
            }
            _ => return Err(RunError::internal(format!("list has no native method {name}"))),
        }
        Ok(Value::None)
    }

    fn call_dict_method(
        &mut self,
        dict: &Rc<RefCell<DictMap>>,
        method: NativeMethod,
        name: &str,
        args: ArgValues,
    ) -> RunResult<Value> {
        match method {
            NativeMethod::Get => {
                let (key, default) = args.get_one_two_args(name)?;
                key.check_hashable()?;
                Ok(dict.borrow().get(&key).cloned().or(default).unwrap_or(Value::None))
            }
            NativeMethod::Pop => {
                let (key, default) = args.get_one_two_args(name)?;
                key.check_hashable()?;
                let removed = dict.borrow_mut().shift_remove(&key);
                removed.or(default).ok_or_else(|| ExcType::key_error(&key))
            }
            NativeMethod::Setdefault => {
                let (key, default) = args.get_one_two_args(name)?;
                key.check_hashable()?;
                let mut dict = dict.borrow_mut();
                Ok(dict.entry(key).or_insert(default.unwrap_or(Value::None)).clone())
            }
            NativeMethod::HasKey => {
                let key = args.get_one_arg(name)?;
                key.check_hashable()?;
                Ok(Value::Bool(dict.borrow().contains_key(&key)))
            }
            NativeMethod::Keys => {
                args.check_zero_args(name)?;
                Ok(Value::new_list(dict.borrow().keys().cloned().collect()))
            }
            NativeMethod::Values => {
                args.check_zero_args(name)?;
                Ok(Value::new_list(dict.borrow().values().cloned().collect()))
            }
            NativeMethod::Items => {
                args.check_zero_args(name)?;
                Ok(Value::new_list(
                    dict.borrow()
                        .iter()
                        .map(|(k, v)| Value::new_tuple(vec![k.clone(), v.clone()]))
                        .collect(),
                ))
            }
            NativeMethod::Update => {
                let (positional, kwargs) = args.into_parts();
                if positional.len() > 1 {
                    return Err(ExcType::type_error_at_most(name, 1, positional.len()));
                }
                let mut updates = DictMap::default();
                if let Some(other) = positional.into_iter().next() {
                    match &other {
                        Value::Dict(other) => updates.extend(other.borrow().iter().map(|(k, v)| (k.clone(), v.clone()))),
                        _ => updates = dict_from_pairs(self.collect_iterable(&other)?)?,
                    }
                }
                updates.extend(kwargs.into_iter().map(|(k, v)| (Value::Str(k), v)));
                dict.borrow_mut().extend(updates);
                Ok(Value::None)
            }
            _ => Err(RunError::internal(format!("dict has no native method {name}"))),
        }
    }

    fn call_str_method(&mut self, s: &Rc<str>, method: NativeMethod, name: &str, args: ArgValues) -> RunResult<Value> {
        match method {
            NativeMethod::Join => {
                let iterable = args.get_one_arg(name)?;
                let items = self.collect_iterable(&iterable)?;
                let mut parts = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let part = item.as_str().ok_or_else(|| {
                        ExcType::type_error(format!(
                            "sequence item {index}: expected string, {} found",
                            item.type_name()
                        ))
                    })?;
                    parts.push(part);
                }
                Ok(Value::from(parts.join(s)))
            }
            NativeMethod::Upper => {
                args.check_zero_args(name)?;
                Ok(Value::from(s.to_uppercase()))
            }
            NativeMethod::Lower => {
                args.check_zero_args(name)?;
                Ok(Value::from(s.to_lowercase()))
            }
            NativeMethod::Strip => {
                let chars = args.get_zero_one_arg(name)?;
                let stripped = match &chars {
                    None | Some(Value::None) => s.trim(),
                    Some(Value::Str(chars)) => s.trim_matches(|c| chars.contains(c)),
                    Some(other) => return Err(str_arg_error(name, other)),
                };
                Ok(Value::from(stripped))
            }
            NativeMethod::Split => str_split(s, name, args),
            NativeMethod::Startswith | NativeMethod::Endswith => {
                let affix = args.get_one_arg(name)?;
                let candidates: Vec<Value> = match &affix {
                    Value::Tuple(items) => items.to_vec(),
                    other => vec![other.clone()],
                };
                for candidate in &candidates {
                    let candidate = candidate.as_str().ok_or_else(|| str_arg_error(name, candidate))?;
                    let hit = if method == NativeMethod::Startswith {
                        s.starts_with(candidate)
                    } else {
                        s.ends_with(candidate)
                    };
                    if hit {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            NativeMethod::Replace => {
                args.check_no_kwargs(name)?;
                let (positional, _) = args.into_parts();
                let (old, new, count) = match positional.as_slice() {
                    [old, new] => (old, new, None),
                    [old, new, count] => (old, new, count.as_int()),
                    other => return Err(ExcType::type_error_at_least(name, 2, other.len())),
                };
                let old = old.as_str().ok_or_else(|| str_arg_error(name, old))?;
                let new = new.as_str().ok_or_else(|| str_arg_error(name, new))?;
                Ok(Value::from(match count {
                    Some(count) if count >= 0 => s.replacen(old, new, usize::try_from(count).unwrap_or(usize::MAX)),
                    _ => s.replace(old, new),
                }))
            }
            NativeMethod::Count => {
                let sub = args.get_one_arg(name)?;
                let sub = sub.as_str().ok_or_else(|| str_arg_error(name, &sub))?;
                let count = if sub.is_empty() {
                    s.chars().count() + 1
                } else {
                    s.matches(sub).count()
                };
                Ok(Value::Int(i64::try_from(count).unwrap_or(i64::MAX)))
            }
            NativeMethod::Index => {
                let sub = args.get_one_arg(name)?;
                let sub = sub.as_str().ok_or_else(|| str_arg_error(name, &sub))?;
                let byte_index = s.find(sub).ok_or_else(|| ExcType::value_error("substring not found"))?;
                let index = s[..byte_index].chars().count();
                Ok(Value::Int(i64::try_from(index).unwrap_or(i64::MAX)))
            }
            _ => Err(RunError::internal(format!("str has no native method {name}"))),
        }
    }
}

/// `index` and `count` shared by lists and tuples.
fn sequence_method(items: &[Value], method: NativeMethod, name: &str, kind: &str, args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg(name)?;
    match method {
        NativeMethod::Index => {
            let index = items.iter().position(|item| item.py_eq(&value)).ok_or_else(|| {
                if kind == "list" {
                    ExcType::value_error(format!("{} is not in list", value.py_repr()))
                } else {
                    ExcType::value_error("tuple.index(x): x not in tuple")
                }
            })?;
            Ok(Value::Int(i64::try_from(index).unwrap_or(i64::MAX)))
        }
        NativeMethod::Count => {
            let count = items.iter().filter(|item| item.py_eq(&value)).count();
            Ok(Value::Int(i64::try_from(count).unwrap_or(i64::MAX)))
        }
        _ => Err(RunError::internal(format!("{kind} has no native method {name}"))),
    }
}

fn set_method(set: &Rc<RefCell<SetMap>>, method: NativeMethod, name: &str, args: ArgValues) -> RunResult<Value> {
    match method {
        NativeMethod::Add => {
            let value = args.get_one_arg(name)?;
            value.check_hashable()?;
            set.borrow_mut().insert(value);
        }
        NativeMethod::Discard => {
            let value = args.get_one_arg(name)?;
            value.check_hashable()?;
            set.borrow_mut().shift_remove(&value);
        }
        NativeMethod::Remove => {
            let value = args.get_one_arg(name)?;
            value.check_hashable()?;
            if !set.borrow_mut().shift_remove(&value) {
                return Err(ExcType::key_error(&value));
            }
        }
        NativeMethod::Pop => {
            args.check_zero_args(name)?;
            return set
                .borrow_mut()
                .shift_remove_index(0)
                .ok_or_else(|| ExcType::key_error(&Value::from("pop from an empty set")));
        }
        _ => return Err(RunError::internal(format!("set has no native method {name}"))),
    }
    Ok(Value::None)
}

/// `str.split([sep[, maxsplit]])`.
fn str_split(s: &str, name: &str, args: ArgValues) -> RunResult<Value> {
    args.check_no_kwargs(name)?;
    let (positional, _) = args.into_parts();
    let (sep, maxsplit) = match positional.as_slice() {
        [] => (Value::None, -1),
        [sep] => (sep.clone(), -1),
        [sep, maxsplit] => (
            sep.clone(),
            maxsplit
                .as_int()
                .ok_or_else(|| ExcType::type_error("an integer is required"))?,
        ),
        other => return Err(ExcType::type_error_at_most(name, 2, other.len())),
    };
    let limit = usize::try_from(maxsplit).ok();
    let parts: Vec<Value> = match &sep {
        Value::None => {
            let mut parts = Vec::new();
            let mut rest = s.trim_start();
            while !rest.is_empty() {
                if limit.is_some_and(|limit| parts.len() == limit) {
                    parts.push(Value::from(rest.trim_end()));
                    break;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                parts.push(Value::from(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            parts
        }
        Value::Str(sep) if sep.is_empty() => return Err(ExcType::value_error("empty separator")),
        Value::Str(sep) => match limit {
            Some(limit) => s.splitn(limit + 1, &**sep).map(Value::from).collect(),
            None => s.split(&**sep).map(Value::from).collect(),
        },
        other => return Err(str_arg_error(name, other)),
    };
    Ok(Value::new_list(parts))
}

/// Resolves a possibly negative index, returning `None` when out of range.
fn wrap_index(index: &Value, len: usize) -> RunResult<Option<usize>> {
    let raw = index
        .as_int()
        .ok_or_else(|| ExcType::type_error("an integer is required"))?;
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let wrapped = if raw < 0 { raw + len } else { raw };
    Ok((0..len).contains(&wrapped).then(|| usize::try_from(wrapped).unwrap_or_default()))
}

/// Resolves an insertion point the way `list.insert` does: out-of-range indices clamp.
fn clamp_index(index: &Value, len: usize) -> RunResult<usize> {
    let raw = index
        .as_int()
        .ok_or_else(|| ExcType::type_error("an integer is required"))?;
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let wrapped = if raw < 0 { raw + len_i } else { raw };
    Ok(usize::try_from(wrapped.clamp(0, len_i)).unwrap_or_default())
}

fn str_arg_error(name: &str, arg: &Value) -> RunError {
    ExcType::type_error(format!("{name}() argument must be str, not {}", arg.type_name()))
}

fn not_applicable(bound: &BoundBuiltin) -> RunError {
    RunError::internal(format!(
        "{} has no native method {}",
        bound.receiver.type_name(),
        bound.method
    ))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn split(s: &str, args: Vec<Value>) -> String {
        str_split(s, "split", ArgValues::new(args, Vec::new())).unwrap().py_repr()
    }

    #[test]
    fn test_split_whitespace_and_separator() {
        assert_eq!(split("  a b\tc  ", vec![]), "['a', 'b', 'c']");
        assert_eq!(split("a b c", vec![Value::None, Value::Int(1)]), "['a', 'b c']");
        assert_eq!(split("a,b,,c", vec![Value::from(",")]), "['a', 'b', '', 'c']");
        assert_eq!(split("a,b,c", vec![Value::from(","), Value::Int(1)]), "['a', 'b,c']");
    }

    #[test]
    fn test_index_helpers() {
        assert_eq!(wrap_index(&Value::Int(-1), 3).unwrap(), Some(2));
        assert_eq!(wrap_index(&Value::Int(3), 3).unwrap(), None);
        assert_eq!(clamp_index(&Value::Int(10), 3).unwrap(), 3);
        assert_eq!(clamp_index(&Value::Int(-10), 3).unwrap(), 0);
    }
}
