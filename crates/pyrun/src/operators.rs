//! Arithmetic, bitwise, sequence, and set operators on built-in values.
//!
//! Integer arithmetic is checked: results outside `i64` raise `OverflowError` rather
//! than wrapping. Division and modulo follow Python's floor semantics.

use strum::Display;

use crate::{
    exception_private::{ExcType, RunError, RunResult},
    types::SetMap,
    value::{Value, float_repr},
};

/// Binary operators, displayed as the symbol used in `TypeError` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BinaryOp {
    #[strum(serialize = "**")]
    Pow,
    #[strum(serialize = "*")]
    Mul,
    /// Classic `/`: floor division on ints, true division otherwise.
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "//")]
    FloorDiv,
    /// `/` under `from __future__ import division`.
    #[strum(serialize = "/")]
    TrueDiv,
    #[strum(serialize = "<<")]
    LShift,
    #[strum(serialize = ">>")]
    RShift,
    #[strum(serialize = "&")]
    And,
    #[strum(serialize = "^")]
    Xor,
    #[strum(serialize = "|")]
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UnaryOp {
    #[strum(serialize = "+")]
    Positive,
    #[strum(serialize = "-")]
    Negative,
    #[strum(serialize = "not")]
    Not,
    /// Backquote conversion, equivalent to `repr()`.
    #[strum(serialize = "`")]
    Convert,
    #[strum(serialize = "~")]
    Invert,
}

/// Applies `op` to `lhs` and `rhs`, in that order.
pub(crate) fn binary_op(op: BinaryOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
    match (lhs, rhs) {
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            let (a, b) = (lhs.as_int().unwrap_or_default(), rhs.as_int().unwrap_or_default());
            if let (Value::Bool(x), Value::Bool(y)) = (lhs, rhs) {
                match op {
                    BinaryOp::And => return Ok(Value::Bool(x & y)),
                    BinaryOp::Or => return Ok(Value::Bool(x | y)),
                    BinaryOp::Xor => return Ok(Value::Bool(x ^ y)),
                    _ => {}
                }
            }
            int_op(op, a, b)
        }
        (Value::Float(_) | Value::Int(_) | Value::Bool(_), Value::Float(_) | Value::Int(_) | Value::Bool(_)) => {
            let (a, b) = (lhs.as_float().unwrap_or_default(), rhs.as_float().unwrap_or_default());
            float_op(op, a, b).ok_or_else(|| unsupported(op, lhs, rhs))?
        }
        (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => Ok(Value::from(format!("{a}{b}"))),
        (Value::Str(format), args) if op == BinaryOp::Mod => format_percent(format, args).map(Value::from),
        (Value::Str(s), Value::Int(_) | Value::Bool(_)) | (Value::Int(_) | Value::Bool(_), Value::Str(s))
            if op == BinaryOp::Mul =>
        {
            let count = repeat_count(if matches!(lhs, Value::Str(_)) { rhs } else { lhs });
            repeat_str(s, count).map(Value::from)
        }
        (Value::List(a), Value::List(b)) if op == BinaryOp::Add => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::new_list(items))
        }
        (Value::Tuple(a), Value::Tuple(b)) if op == BinaryOp::Add => {
            Ok(Value::new_tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (Value::List(items), n @ (Value::Int(_) | Value::Bool(_)))
        | (n @ (Value::Int(_) | Value::Bool(_)), Value::List(items))
            if op == BinaryOp::Mul =>
        {
            let items = repeat_items(&items.borrow(), repeat_count(n))?;
            Ok(Value::new_list(items))
        }
        (Value::Tuple(items), n @ (Value::Int(_) | Value::Bool(_)))
        | (n @ (Value::Int(_) | Value::Bool(_)), Value::Tuple(items))
            if op == BinaryOp::Mul =>
        {
            repeat_items(items, repeat_count(n)).map(Value::new_tuple)
        }
        (Value::Set(a), Value::Set(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            let result: SetMap = match op {
                BinaryOp::Sub => a.difference(&b).cloned().collect(),
                BinaryOp::And => a.intersection(&b).cloned().collect(),
                BinaryOp::Or => a.union(&b).cloned().collect(),
                BinaryOp::Xor => a.symmetric_difference(&b).cloned().collect(),
                _ => return Err(unsupported(op, lhs, rhs)),
            };
            Ok(Value::new_set(result))
        }
        _ => Err(unsupported(op, lhs, rhs)),
    }
}

fn unsupported(op: BinaryOp, lhs: &Value, rhs: &Value) -> RunError {
    ExcType::binary_type_error(&op.to_string(), lhs.type_name(), rhs.type_name())
}

fn repeat_count(n: &Value) -> usize {
    usize::try_from(n.as_int().unwrap_or_default()).unwrap_or_default()
}

/// Approximate size in bytes of `lhs op rhs` when it repeats a sequence.
///
/// Repetition is the one operator whose result can dwarf its operands, so the VM asks
/// the resource tracker about it before building the result.
pub(crate) fn repeat_result_bytes(op: BinaryOp, lhs: &Value, rhs: &Value) -> Option<usize> {
    if op != BinaryOp::Mul {
        return None;
    }
    let (seq, n) = match (lhs, rhs) {
        (seq, n @ (Value::Int(_) | Value::Bool(_))) | (n @ (Value::Int(_) | Value::Bool(_)), seq) => (seq, n),
        _ => return None,
    };
    let item_bytes = match seq {
        Value::Str(s) => s.len(),
        Value::List(items) => items.borrow().len().saturating_mul(size_of::<Value>()),
        Value::Tuple(items) => items.len().saturating_mul(size_of::<Value>()),
        _ => return None,
    };
    Some(item_bytes.saturating_mul(repeat_count(n)))
}

fn repeat_str(s: &str, count: usize) -> RunResult<String> {
    if s.is_empty() || count == 0 {
        return Ok(String::new());
    }
    let len = s
        .len()
        .checked_mul(count)
        .filter(|len| isize::try_from(*len).is_ok())
        .ok_or_else(|| ExcType::overflow_error_msg("repeated string is too long"))?;
    let mut out = String::new();
    out.try_reserve_exact(len).map_err(|_| ExcType::memory_error())?;
    for _ in 0..count {
        out.push_str(s);
    }
    Ok(out)
}

fn repeat_items(items: &[Value], count: usize) -> RunResult<Vec<Value>> {
    if items.is_empty() || count == 0 {
        return Ok(Vec::new());
    }
    let len = items.len().checked_mul(count).ok_or_else(ExcType::memory_error)?;
    let mut out = Vec::new();
    out.try_reserve_exact(len).map_err(|_| ExcType::memory_error())?;
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    Ok(out)
}

fn int_op(op: BinaryOp, a: i64, b: i64) -> RunResult<Value> {
    let overflow = ExcType::overflow_error;
    let result = match op {
        BinaryOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinaryOp::Div | BinaryOp::FloorDiv => floor_div(a, b)?,
        BinaryOp::Mod => floor_mod(a, b)?,
        #[expect(clippy::cast_precision_loss, reason = "true division produces a float")]
        BinaryOp::TrueDiv => {
            if b == 0 {
                return Err(ExcType::zero_division("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinaryOp::Pow => {
            if b < 0 {
                #[expect(clippy::cast_precision_loss, reason = "negative exponents produce a float")]
                let base = a as f64;
                if a == 0 {
                    return Err(ExcType::zero_division("0.0 cannot be raised to a negative power"));
                }
                #[expect(clippy::cast_possible_truncation, reason = "exponent magnitude is clamped")]
                return Ok(Value::Float(base.powi(b.max(i64::from(i32::MIN)) as i32)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
        BinaryOp::LShift => {
            if b < 0 {
                return Err(ExcType::value_error("negative shift count"));
            }
            if a == 0 {
                0
            } else {
                let shift = u32::try_from(b).ok().filter(|s| *s < 64).ok_or_else(overflow)?;
                let shifted = a << shift;
                if shifted >> shift != a {
                    return Err(overflow());
                }
                shifted
            }
        }
        BinaryOp::RShift => {
            if b < 0 {
                return Err(ExcType::value_error("negative shift count"));
            }
            if b >= 64 {
                if a < 0 { -1 } else { 0 }
            } else {
                a >> b
            }
        }
        BinaryOp::And => a & b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Or => a | b,
    };
    Ok(Value::Int(result))
}

fn floor_div(a: i64, b: i64) -> RunResult<i64> {
    if b == 0 {
        return Err(ExcType::zero_division("integer division or modulo by zero"));
    }
    let q = a.checked_div(b).ok_or_else(ExcType::overflow_error)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn floor_mod(a: i64, b: i64) -> RunResult<i64> {
    if b == 0 {
        return Err(ExcType::zero_division("integer division or modulo by zero"));
    }
    // i64::MIN % -1 overflows in Rust but is 0 in Python
    let r = a.checked_rem(b).unwrap_or(0);
    if r != 0 && ((r < 0) != (b < 0)) { Ok(r + b) } else { Ok(r) }
}

/// Float arithmetic; returns `None` for operators floats do not support.
fn float_op(op: BinaryOp, a: f64, b: f64) -> Option<RunResult<Value>> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::TrueDiv => {
            if b == 0.0 {
                return Some(Err(ExcType::zero_division("float division by zero")));
            }
            a / b
        }
        BinaryOp::FloorDiv => {
            if b == 0.0 {
                return Some(Err(ExcType::zero_division("float divmod()")));
            }
            (a / b).floor()
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Some(Err(ExcType::zero_division("float modulo")));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
        }
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Some(Err(ExcType::zero_division("0.0 cannot be raised to a negative power")));
            }
            a.powf(b)
        }
        _ => return None,
    };
    Some(Ok(Value::Float(result)))
}

/// Applies a unary operator.
pub(crate) fn unary_op(op: UnaryOp, value: &Value) -> RunResult<Value> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.py_bool())),
        (UnaryOp::Convert, v) => Ok(Value::from(v.py_repr())),
        (UnaryOp::Positive, Value::Int(_) | Value::Bool(_)) => Ok(Value::Int(value.as_int().unwrap_or_default())),
        (UnaryOp::Positive, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Negative, Value::Int(_) | Value::Bool(_)) => value
            .as_int()
            .unwrap_or_default()
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(ExcType::overflow_error),
        (UnaryOp::Negative, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Invert, Value::Int(_) | Value::Bool(_)) => Ok(Value::Int(!value.as_int().unwrap_or_default())),
        (op, v) => Err(ExcType::unary_type_error(&op.to_string(), v.type_name())),
    }
}

// ==============================
// printf-style string formatting
// ==============================

/// Implements `format % args`.
///
/// A tuple supplies positional arguments; a dict supplies `%(name)s` lookups; any
/// other value is a single argument.
fn format_percent(format: &str, args: &Value) -> RunResult<String> {
    let positional: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mut next_arg = 0;
    let mut out = String::with_capacity(format.len());
    let mut chars = format.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = FormatSpec::default();
        let mut mapped: Option<Value> = None;

        if chars.peek().is_some_and(|(_, c)| *c == '(') {
            chars.next();
            let mut key = String::new();
            loop {
                match chars.next() {
                    Some((_, ')')) => break,
                    Some((_, c)) => key.push(c),
                    None => return Err(ExcType::value_error("incomplete format key")),
                }
            }
            let Value::Dict(dict) = args else {
                return Err(ExcType::type_error("format requires a mapping"));
            };
            let key = Value::from(key);
            let value = dict.borrow().get(&key).cloned();
            mapped = Some(value.ok_or_else(|| ExcType::key_error(&key))?);
        }

        while let Some((_, flag)) = chars.peek().copied() {
            match flag {
                '-' => spec.left = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '0' => spec.zero = true,
                '#' => {}
                _ => break,
            }
            chars.next();
        }
        spec.width = read_number(&mut chars);
        if chars.peek().is_some_and(|(_, c)| *c == '.') {
            chars.next();
            spec.precision = Some(read_number(&mut chars).unwrap_or(0));
        }

        let Some((index, conversion)) = chars.next() else {
            return Err(ExcType::value_error("incomplete format"));
        };
        if conversion == '%' {
            out.push('%');
            continue;
        }
        let arg = match mapped.take() {
            Some(value) => value,
            None => {
                let value = positional
                    .get(next_arg)
                    .cloned()
                    .ok_or_else(|| ExcType::type_error("not enough arguments for format string"))?;
                next_arg += 1;
                value
            }
        };
        let body = spec.convert(conversion, index, &arg)?;
        spec.pad_into(&mut out, &body, matches!(conversion, 'd' | 'i' | 'f' | 'F' | 'x' | 'X' | 'o'));
    }

    if next_arg < positional.len() && !matches!(args, Value::Dict(_)) {
        return Err(ExcType::type_error("not all arguments converted during string formatting"));
    }
    Ok(out)
}

fn read_number(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> Option<usize> {
    let mut number: Option<usize> = None;
    while let Some((_, c)) = chars.peek().copied() {
        let Some(digit) = c.to_digit(10) else { break };
        number = Some(number.unwrap_or(0).saturating_mul(10).saturating_add(digit as usize));
        chars.next();
    }
    number
}

#[derive(Debug, Default)]
struct FormatSpec {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

impl FormatSpec {
    fn convert(&self, conversion: char, index: usize, arg: &Value) -> RunResult<String> {
        let number_required = || {
            ExcType::type_error(format!(
                "%{conversion} format: a number is required, not {}",
                arg.type_name()
            ))
        };
        let body = match conversion {
            's' => arg.py_str(),
            'r' => arg.py_repr(),
            'd' | 'i' => {
                #[expect(clippy::cast_possible_truncation, reason = "%d truncates floats")]
                let n = match arg {
                    Value::Float(f) => *f as i64,
                    other => other.as_int().ok_or_else(number_required)?,
                };
                self.signed(n < 0, n.unsigned_abs().to_string())
            }
            'x' => {
                let n = arg.as_int().ok_or_else(number_required)?;
                self.signed(n < 0, format!("{:x}", n.unsigned_abs()))
            }
            'X' => {
                let n = arg.as_int().ok_or_else(number_required)?;
                self.signed(n < 0, format!("{:X}", n.unsigned_abs()))
            }
            'o' => {
                let n = arg.as_int().ok_or_else(number_required)?;
                self.signed(n < 0, format!("{:o}", n.unsigned_abs()))
            }
            'f' | 'F' => {
                let f = arg.as_float().ok_or_else(number_required)?;
                let precision = self.precision.unwrap_or(6);
                self.signed(f.is_sign_negative() && f != 0.0, format!("{:.precision$}", f.abs()))
            }
            'g' => {
                let f = arg.as_float().ok_or_else(number_required)?;
                self.signed(f.is_sign_negative() && f != 0.0, float_repr(f.abs()))
            }
            other => {
                return Err(ExcType::value_error(format!(
                    "unsupported format character '{other}' ({:#x}) at index {index}",
                    other as u32
                )));
            }
        };
        Ok(match (conversion, self.precision) {
            ('s' | 'r', Some(precision)) => body.chars().take(precision).collect(),
            _ => body,
        })
    }

    fn signed(&self, negative: bool, digits: String) -> String {
        let sign = if negative {
            "-"
        } else if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        };
        format!("{sign}{digits}")
    }

    fn pad_into(&self, out: &mut String, body: &str, numeric: bool) {
        let width = self.width.unwrap_or(0);
        let len = body.chars().count();
        if len >= width {
            out.push_str(body);
            return;
        }
        let fill = width - len;
        if self.left {
            out.push_str(body);
            out.extend(std::iter::repeat_n(' ', fill));
        } else if self.zero && numeric {
            let (sign, digits) = match body.chars().next() {
                Some(c @ ('-' | '+' | ' ')) => (Some(c), &body[1..]),
                _ => (None, body),
            };
            if let Some(sign) = sign {
                out.push(sign);
            }
            out.extend(std::iter::repeat_n('0', fill));
            out.push_str(digits);
        } else {
            out.extend(std::iter::repeat_n(' ', fill));
            out.push_str(body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: &str, args: Value) -> String {
        format_percent(format, &args).expect("format should succeed")
    }

    #[test]
    fn test_floor_semantics() {
        assert_eq!(floor_div(-7, 2).ok(), Some(-4));
        assert_eq!(floor_mod(-7, 2).ok(), Some(1));
        assert_eq!(floor_mod(7, -2).ok(), Some(-1));
        assert!(floor_div(1, 0).is_err());
    }

    #[test]
    fn test_overflow_is_checked() {
        assert!(int_op(BinaryOp::Add, i64::MAX, 1).is_err());
        assert!(int_op(BinaryOp::LShift, 1, 63).is_err());
        assert!(int_op(BinaryOp::LShift, 1, -1).is_err());
    }

    #[test]
    fn test_huge_repetition_raises() {
        let err = binary_op(BinaryOp::Mul, &Value::from("ab"), &Value::Int(1 << 62)).unwrap_err();
        assert!(err.is_exc_type(ExcType::OverflowError));
        let list = Value::new_list(vec![Value::Int(0)]);
        let err = binary_op(BinaryOp::Mul, &list, &Value::Int(1 << 62)).unwrap_err();
        assert!(err.is_exc_type(ExcType::MemoryError));
        let tuple = Value::new_tuple(vec![Value::Int(0)]);
        let err = binary_op(BinaryOp::Mul, &Value::Int(1 << 62), &tuple).unwrap_err();
        assert!(err.is_exc_type(ExcType::MemoryError));
    }

    #[test]
    fn test_repeat_result_bytes() {
        assert_eq!(repeat_result_bytes(BinaryOp::Mul, &Value::from("ab"), &Value::Int(3)), Some(6));
        assert_eq!(repeat_result_bytes(BinaryOp::Mul, &Value::Int(-2), &Value::from("ab")), Some(0));
        assert_eq!(repeat_result_bytes(BinaryOp::Add, &Value::from("ab"), &Value::Int(3)), None);
        assert_eq!(repeat_result_bytes(BinaryOp::Mul, &Value::Int(2), &Value::Int(3)), None);
    }

    #[test]
    fn test_percent_format() {
        assert_eq!(fmt("%s-%d", Value::new_tuple(vec![Value::from("a"), Value::Int(3)])), "a-3");
        assert_eq!(fmt("%5.2f|", Value::Float(3.14159)), " 3.14|");
        assert_eq!(fmt("%-4d|%03d", Value::new_tuple(vec![Value::Int(7), Value::Int(-5)])), "7   |-05");
        assert_eq!(fmt("%r %%", Value::from("x")), "'x' %");
    }

    #[test]
    fn test_percent_format_errors() {
        assert!(format_percent("%s %s", &Value::Int(1)).is_err());
        assert!(format_percent("%s", &Value::new_tuple(vec![Value::Int(1), Value::Int(2)])).is_err());
    }
}
