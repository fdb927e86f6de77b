//! Container builders, subscripts, slices and sequence unpacking.

use std::rc::Rc;

use super::VM;
use crate::{
    builtins::set_from_values,
    exception_private::{ExcType, RunError, RunResult},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::Slice,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    // ========================================================================
    // Builders
    // ========================================================================

    pub(super) fn build_tuple(&mut self, count: usize) -> RunResult<()> {
        let items = self.pop_n(count)?;
        self.push(Value::new_tuple(items))
    }

    pub(super) fn build_list(&mut self, count: usize) -> RunResult<()> {
        let items = self.pop_n(count)?;
        self.push(Value::new_list(items))
    }

    pub(super) fn build_set(&mut self, count: usize) -> RunResult<()> {
        let items = self.pop_n(count)?;
        let set = set_from_values(items)?;
        self.push(Value::new_set(set))
    }

    /// `BUILD_SLICE`: two operands give `slice(start, stop)`, three add a step.
    pub(super) fn build_slice(&mut self, count: usize) -> RunResult<()> {
        let step = match count {
            2 => Value::None,
            3 => self.pop()?,
            n => return Err(RunError::internal(format!("BUILD_SLICE with {n} operands"))),
        };
        let stop = self.pop()?;
        let start = self.pop()?;
        self.push(Value::Slice(Rc::new(Slice { start, stop, step })))
    }

    /// `STORE_MAP`: the key is on top, the value under it, and the dict under both.
    pub(super) fn store_map(&mut self) -> RunResult<()> {
        let key = self.pop()?;
        let value = self.pop()?;
        let dict = self.current()?.top()?.clone();
        dict_insert(&dict, key, value)
    }

    /// `LIST_APPEND`: appends the top of the stack to the list `depth` slots below it.
    pub(super) fn list_append(&mut self, depth: usize) -> RunResult<()> {
        let value = self.pop()?;
        match self.current()?.peek(depth)? {
            Value::List(list) => {
                list.borrow_mut().push(value);
                Ok(())
            }
            other => Err(RunError::internal(format!("LIST_APPEND target is {}", other.type_name()))),
        }
    }

    pub(super) fn set_add(&mut self, depth: usize) -> RunResult<()> {
        let value = self.pop()?;
        value.check_hashable()?;
        match self.current()?.peek(depth)? {
            Value::Set(set) => {
                set.borrow_mut().insert(value);
                Ok(())
            }
            other => Err(RunError::internal(format!("SET_ADD target is {}", other.type_name()))),
        }
    }

    /// `MAP_ADD`: like `STORE_MAP`, with the dict `depth` slots below the pair.
    pub(super) fn map_add(&mut self, depth: usize) -> RunResult<()> {
        let key = self.pop()?;
        let value = self.pop()?;
        let dict = self.current()?.peek(depth)?.clone();
        dict_insert(&dict, key, value)
    }

    /// `UNPACK_SEQUENCE`: replaces an iterable of exactly `count` items with those
    /// items, the first on top.
    pub(super) fn unpack_sequence(&mut self, count: usize) -> RunResult<()> {
        let value = self.pop()?;
        let items = self.collect_iterable(&value)?;
        match items.len() {
            n if n > count => Err(ExcType::value_error("too many values to unpack")),
            n if n < count => Err(ExcType::value_error(format!(
                "need more than {n} value{} to unpack",
                if n == 1 { "" } else { "s" }
            ))),
            _ => {
                self.current()?.stack.extend(items.into_iter().rev());
                Ok(())
            }
        }
    }

    // ========================================================================
    // Subscripts
    // ========================================================================

    pub(super) fn binary_subscr(&mut self) -> RunResult<()> {
        let key = self.pop()?;
        let obj = self.pop()?;
        let item = get_item(&obj, &key)?;
        self.push(item)
    }

    pub(super) fn store_subscr(&mut self) -> RunResult<()> {
        let key = self.pop()?;
        let obj = self.pop()?;
        let value = self.pop()?;
        self.set_item(&obj, &key, value)
    }

    pub(super) fn delete_subscr(&mut self) -> RunResult<()> {
        let key = self.pop()?;
        let obj = self.pop()?;
        del_item(&obj, &key)
    }

    // ========================================================================
    // SLICE+n, STORE_SLICE+n, DELETE_SLICE+n
    // ========================================================================

    /// Pops the optional stop, then the optional start, then the sliced object.
    fn pop_slice_operands(&mut self, has_start: bool, has_stop: bool) -> RunResult<(Value, Value)> {
        let stop = if has_stop { self.pop()? } else { Value::None };
        let start = if has_start { self.pop()? } else { Value::None };
        let obj = self.pop()?;
        let slice = Value::Slice(Rc::new(Slice {
            start,
            stop,
            step: Value::None,
        }));
        Ok((obj, slice))
    }

    pub(super) fn slice_op(&mut self, has_start: bool, has_stop: bool) -> RunResult<()> {
        let (obj, slice) = self.pop_slice_operands(has_start, has_stop)?;
        let item = get_item(&obj, &slice)?;
        self.push(item)
    }

    pub(super) fn store_slice(&mut self, has_start: bool, has_stop: bool) -> RunResult<()> {
        let (obj, slice) = self.pop_slice_operands(has_start, has_stop)?;
        let value = self.pop()?;
        self.set_item(&obj, &slice, value)
    }

    pub(super) fn delete_slice(&mut self, has_start: bool, has_stop: bool) -> RunResult<()> {
        let (obj, slice) = self.pop_slice_operands(has_start, has_stop)?;
        del_item(&obj, &slice)
    }

    /// `obj[key] = value`. Slice assignment accepts any iterable on the right.
    fn set_item(&mut self, obj: &Value, key: &Value, value: Value) -> RunResult<()> {
        match (obj, key) {
            (Value::List(list), Value::Slice(slice)) => {
                let items = self.collect_iterable(&value)?;
                let mut list = list.borrow_mut();
                let (start, stop, step) = slice.indices(list.len())?;
                if step == 1 {
                    let start = to_usize(start);
                    let stop = to_usize(stop).max(start);
                    list.splice(start..stop, items);
                    return Ok(());
                }
                let positions = slice.positions(list.len())?;
                if positions.len() != items.len() {
                    return Err(ExcType::value_error(format!(
                        "attempt to assign sequence of size {} to extended slice of size {}",
                        items.len(),
                        positions.len()
                    )));
                }
                for (position, item) in positions.into_iter().zip(items) {
                    list[position] = item;
                }
                Ok(())
            }
            (Value::List(list), _) => {
                let mut list = list.borrow_mut();
                let index = seq_index(key, list.len(), "list")
                    .map_err(|err| out_of_range_as(err, "list assignment index out of range"))?;
                list[index] = value;
                Ok(())
            }
            (Value::Dict(_), _) => dict_insert(obj, key.clone(), value),
            _ => Err(ExcType::type_error(format!(
                "'{}' object does not support item assignment",
                obj.type_name()
            ))),
        }
    }
}

/// `obj[key]` for the built-in sequence and mapping types.
pub(super) fn get_item(obj: &Value, key: &Value) -> RunResult<Value> {
    match (obj, key) {
        (Value::List(list), Value::Slice(slice)) => {
            let list = list.borrow();
            let items = slice.positions(list.len())?.into_iter().map(|i| list[i].clone()).collect();
            Ok(Value::new_list(items))
        }
        (Value::List(list), _) => {
            let list = list.borrow();
            let index = seq_index(key, list.len(), "list")?;
            Ok(list[index].clone())
        }
        (Value::Tuple(items), Value::Slice(slice)) => Ok(Value::new_tuple(
            slice.positions(items.len())?.into_iter().map(|i| items[i].clone()).collect(),
        )),
        (Value::Tuple(items), _) => Ok(items[seq_index(key, items.len(), "tuple")?].clone()),
        (Value::Str(s), Value::Slice(slice)) => {
            let chars: Vec<char> = s.chars().collect();
            let sliced: String = slice.positions(chars.len())?.into_iter().map(|i| chars[i]).collect();
            Ok(Value::from(sliced))
        }
        (Value::Str(s), _) => {
            let chars: Vec<char> = s.chars().collect();
            let index = seq_index(key, chars.len(), "string")?;
            Ok(Value::from(chars[index].to_string()))
        }
        (Value::Dict(dict), _) => {
            key.check_hashable()?;
            dict.borrow().get(key).cloned().ok_or_else(|| ExcType::key_error(key))
        }
        _ => Err(ExcType::type_error(format!(
            "'{}' object has no attribute '__getitem__'",
            obj.type_name()
        ))),
    }
}

fn del_item(obj: &Value, key: &Value) -> RunResult<()> {
    match (obj, key) {
        (Value::List(list), Value::Slice(slice)) => {
            let mut list = list.borrow_mut();
            let mut positions = slice.positions(list.len())?;
            positions.sort_unstable();
            for position in positions.into_iter().rev() {
                list.remove(position);
            }
            Ok(())
        }
        (Value::List(list), _) => {
            let mut list = list.borrow_mut();
            let index = seq_index(key, list.len(), "list")
                .map_err(|err| out_of_range_as(err, "list assignment index out of range"))?;
            list.remove(index);
            Ok(())
        }
        (Value::Dict(dict), _) => {
            key.check_hashable()?;
            match dict.borrow_mut().shift_remove(key) {
                Some(_) => Ok(()),
                None => Err(ExcType::key_error(key)),
            }
        }
        _ => Err(ExcType::type_error(format!(
            "'{}' object doesn't support item deletion",
            obj.type_name()
        ))),
    }
}

fn dict_insert(dict: &Value, key: Value, value: Value) -> RunResult<()> {
    match dict {
        Value::Dict(map) => {
            key.check_hashable()?;
            map.borrow_mut().insert(key, value);
            Ok(())
        }
        other => Err(RunError::internal(format!(
            "expected a dict on the stack, found {}",
            other.type_name()
        ))),
    }
}

/// Resolves a possibly negative sequence index, raising `IndexError` when out of range.
pub(super) fn seq_index(key: &Value, len: usize, kind: &str) -> RunResult<usize> {
    let raw = key.as_int().ok_or_else(|| {
        ExcType::type_error(format!("{kind} indices must be integers, not {}", key.type_name()))
    })?;
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let index = if raw < 0 { raw + len_i } else { raw };
    if (0..len_i).contains(&index) {
        Ok(to_usize(index))
    } else {
        Err(ExcType::index_error(format!("{kind} index out of range")))
    }
}

/// Replaces the message of an `IndexError`; other errors pass through.
fn out_of_range_as(err: RunError, msg: &str) -> RunError {
    if err.is_exc_type(ExcType::IndexError) {
        ExcType::index_error(msg)
    } else {
        err
    }
}

fn to_usize(i: i64) -> usize {
    usize::try_from(i).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_get_item_negative_and_slices() {
        let list = Value::new_list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(get_item(&list, &Value::Int(-1)).unwrap().py_repr(), "3");
        let reversed = Value::Slice(Rc::new(Slice {
            start: Value::None,
            stop: Value::None,
            step: Value::Int(-1),
        }));
        assert_eq!(get_item(&list, &reversed).unwrap().py_repr(), "[3, 2, 1]");
        assert_eq!(get_item(&Value::from("hello"), &Value::Int(1)).unwrap().py_repr(), "'e'");
    }

    #[test]
    fn test_get_item_errors() {
        let tuple = Value::new_tuple(vec![Value::Int(1)]);
        let err = get_item(&tuple, &Value::Int(5)).unwrap_err();
        assert!(err.is_exc_type(ExcType::IndexError));
        let err = get_item(&Value::Int(1), &Value::Int(0)).unwrap_err();
        assert!(err.is_exc_type(ExcType::TypeError));
    }

    #[test]
    fn test_seq_index_rejects_non_int() {
        let err = seq_index(&Value::from("a"), 3, "list").unwrap_err();
        assert!(err.is_exc_type(ExcType::TypeError));
    }
}
