//! Numeric builtins: `abs`, `int`, `float`, `min`, `max`, `sum`.

use std::cmp::Ordering;

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    operators::{BinaryOp, binary_op},
    value::Value,
};

pub(crate) fn builtin_abs(args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg("abs")?;
    match value {
        Value::Int(n) => n.checked_abs().map(Value::Int).ok_or_else(ExcType::overflow_error),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(ExcType::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

/// `int([x[, base]])`.
pub(crate) fn builtin_int(args: ArgValues) -> RunResult<Value> {
    if args.is_empty() {
        return Ok(Value::Int(0));
    }
    let (value, base) = args.get_one_two_args("int")?;
    match (value, base) {
        (Value::Str(s), base) => {
            let radix = match base {
                None => 10,
                Some(b) => b
                    .as_int()
                    .and_then(|b| u32::try_from(b).ok())
                    .filter(|b| (2..=36).contains(b))
                    .ok_or_else(|| ExcType::value_error("int() base must be >= 2 and <= 36"))?,
            };
            i64::from_str_radix(s.trim(), radix).map(Value::Int).map_err(|_| {
                ExcType::value_error(format!(
                    "invalid literal for int() with base {radix}: {}",
                    Value::Str(s.clone()).py_repr()
                ))
            })
        }
        (_, Some(_)) => Err(ExcType::type_error("int() can't convert non-string with explicit base")),
        (Value::Int(n), None) => Ok(Value::Int(n)),
        (Value::Bool(b), None) => Ok(Value::Int(i64::from(b))),
        (Value::Float(f), None) => float_to_int(f),
        (other, None) => Err(ExcType::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

#[expect(clippy::cast_possible_truncation, reason = "range is checked before the cast")]
fn float_to_int(f: f64) -> RunResult<Value> {
    if f.is_nan() {
        return Err(ExcType::value_error("cannot convert float NaN to integer"));
    }
    let truncated = f.trunc();
    if !(-9.223_372_036_854_775_808e18..9.223_372_036_854_775_808e18).contains(&truncated) {
        return Err(ExcType::overflow_error());
    }
    Ok(Value::Int(truncated as i64))
}

/// `float([x])`.
pub(crate) fn builtin_float(args: ArgValues) -> RunResult<Value> {
    let Some(value) = args.get_zero_one_arg("float")? else {
        return Ok(Value::Float(0.0));
    };
    match &value {
        Value::Str(s) => {
            let trimmed = s.trim();
            let parsed = match trimmed.to_ascii_lowercase().as_str() {
                "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
                "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                "nan" | "+nan" | "-nan" => Some(f64::NAN),
                _ => trimmed.parse::<f64>().ok(),
            };
            parsed.map(Value::Float).ok_or_else(|| {
                ExcType::value_error(format!("could not convert string to float: {trimmed}"))
            })
        }
        other => other.as_float().map(Value::Float).ok_or_else(|| {
            ExcType::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

/// `min()` / `max()` over already-collected candidates.
///
/// The first of several equal extremes wins, as in CPython.
pub(crate) fn builtin_min_max(name: &str, candidates: Vec<Value>, want: Ordering) -> RunResult<Value> {
    let mut iter = candidates.into_iter();
    let Some(mut best) = iter.next() else {
        return Err(ExcType::value_error(format!("{name}() arg is an empty sequence")));
    };
    for candidate in iter {
        if candidate.py_partial_cmp(&best)? == Some(want) {
            best = candidate;
        }
    }
    Ok(best)
}

/// `sum(iterable[, start])` over already-collected items.
pub(crate) fn builtin_sum(items: Vec<Value>, start: Option<Value>) -> RunResult<Value> {
    let mut total = start.unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(ExcType::type_error("sum() can't sum strings [use ''.join(seq) instead]"));
    }
    for item in &items {
        total = binary_op(BinaryOp::Add, &total, item)?;
    }
    Ok(total)
}
