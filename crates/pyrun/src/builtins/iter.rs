//! Helpers for the iteration builtins: `enumerate`, `zip`, `reversed`, `sorted`.
//!
//! The VM collects iterable arguments (driving generators as needed) before calling
//! these, so they only deal with plain vectors.

use std::cmp::Ordering;

use crate::{
    exception_private::{RunError, RunResult},
    value::Value,
};

/// `enumerate` pairs: `(start, a), (start+1, b), ..`.
pub(crate) fn enumerate_values(items: Vec<Value>, start: i64) -> Vec<Value> {
    items
        .into_iter()
        .zip(start..)
        .map(|(item, index)| Value::new_tuple(vec![Value::Int(index), item]))
        .collect()
}

/// `zip` tuples, truncated to the shortest input.
pub(crate) fn zip_values(columns: Vec<Vec<Value>>) -> Vec<Value> {
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    (0..len)
        .map(|row| Value::new_tuple(columns.iter().map(|column| column[row].clone()).collect()))
        .collect()
}

/// Returns the items of a sequence in reverse order.
pub(crate) fn reverse_values(mut items: Vec<Value>) -> Vec<Value> {
    items.reverse();
    items
}

/// Stable sort of `(key, item)` pairs by key.
///
/// With `reverse`, equal keys keep their original relative order, as in CPython.
/// The first comparison error aborts the sort and is returned.
pub(crate) fn sort_keyed(pairs: &mut [(Value, Value)], reverse: bool) -> RunResult<()> {
    let mut error: Option<RunError> = None;
    if reverse {
        pairs.reverse();
    }
    pairs.sort_by(|(a, _), (b, _)| {
        if error.is_some() {
            return Ordering::Equal;
        }
        match a.py_partial_cmp(b) {
            Ok(ordering) => ordering.unwrap_or(Ordering::Equal),
            Err(err) => {
                error = Some(err);
                Ordering::Equal
            }
        }
    });
    if reverse {
        pairs.reverse();
    }
    error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_truncates() {
        let rows = zip_values(vec![vec![Value::Int(1), Value::Int(2)], vec![Value::Int(3)]]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].py_repr(), "(1, 3)");
    }

    #[test]
    fn test_sort_reverse_is_stable() {
        let mut pairs = vec![
            (Value::Int(1), Value::from("a")),
            (Value::Int(2), Value::from("b")),
            (Value::Int(1), Value::from("c")),
        ];
        sort_keyed(&mut pairs, true).unwrap();
        let order: Vec<String> = pairs.iter().map(|(_, v)| v.py_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_sort_reports_unorderable() {
        let mut pairs = vec![(Value::Int(1), Value::None), (Value::from("x"), Value::None)];
        assert!(sort_keyed(&mut pairs, false).is_err());
    }

    #[test]
    fn test_enumerate_start() {
        let pairs = enumerate_values(vec![Value::from("a"), Value::from("b")], 5);
        assert_eq!(Value::new_list(pairs).py_repr(), "[(5, 'a'), (6, 'b')]");
    }
}
