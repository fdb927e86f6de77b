//! The runtime value model.
//!
//! Immutable scalars are stored inline; everything with identity lives behind an `Rc`
//! so that cloning a [`Value`] aliases the same object, matching Python reference
//! semantics. Mutable containers add a `RefCell`.

use std::{
    cell::RefCell,
    cmp::Ordering,
    fmt::{self, Write},
    hash::{Hash, Hasher},
    rc::Rc,
};

use crate::{
    builtins::{BuiltinFunction, NativeFunction},
    bytecode::Code,
    exception_private::{ExcType, RunResult, SimpleException, Traceback},
    frame::Why,
    function::Function,
    types::{BoundBuiltin, Cell, Class, DictMap, Generator, Instance, Method, SeqIter, SetMap, Slice},
};

/// A Python value.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<DictMap>>),
    Set(Rc<RefCell<SetMap>>),
    Slice(Rc<Slice>),

    /// A user function created by `MAKE_FUNCTION` or `MAKE_CLOSURE`.
    Function(Rc<Function>),
    /// A function looked up through a class or instance.
    Method(Rc<Method>),
    Builtin(BuiltinFunction),
    BuiltinMethod(Rc<BoundBuiltin>),
    /// A host callable registered on the builtins table.
    Native(NativeFunction),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Generator(Rc<RefCell<Generator>>),
    Iterator(Rc<RefCell<SeqIter>>),

    /// A closure cell, as pushed by `LOAD_CLOSURE`.
    Cell(Cell),
    Code(Rc<Code>),
    /// A built-in exception class such as `ValueError`.
    ExcType(ExcType),
    /// An instance of a built-in exception class.
    Exception(Rc<SimpleException>),
    Traceback(Rc<Traceback>),
    /// Unwinding marker pushed for `finally` handlers; never visible to user code
    /// except as the operand `END_FINALLY` consumes.
    Unwind(Why),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s.into())
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl Value {
    #[must_use]
    pub fn new_list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn new_tuple(items: Vec<Self>) -> Self {
        Self::Tuple(items.into())
    }

    #[must_use]
    pub fn new_dict(map: DictMap) -> Self {
        Self::Dict(Rc::new(RefCell::new(map)))
    }

    #[must_use]
    pub fn new_set(set: SetMap) -> Self {
        Self::Set(Rc::new(RefCell::new(set)))
    }

    /// Returns the Python 2 type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::Slice(_) => "slice",
            Self::Function(_) => "function",
            Self::Method(_) => "instancemethod",
            Self::Builtin(_) | Self::BuiltinMethod(_) | Self::Native(_) => "builtin_function_or_method",
            Self::Class(_) => "classobj",
            Self::Instance(_) => "instance",
            Self::Generator(_) => "generator",
            Self::Iterator(_) => "iterator",
            Self::Cell(_) => "cell",
            Self::Code(_) => "code",
            Self::ExcType(_) => "type",
            Self::Exception(exc) => exc.exc_type().into(),
            Self::Traceback(_) => "traceback",
            Self::Unwind(_) => "why",
        }
    }

    /// Python truthiness.
    #[must_use]
    pub fn py_bool(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(list) => !list.borrow().is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::Dict(dict) => !dict.borrow().is_empty(),
            Self::Set(set) => !set.borrow().is_empty(),
            _ => true,
        }
    }

    /// Returns the integer value of an `int` or `bool`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Returns the value of any numeric type as a float.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "int to float promotion follows Python")]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true if calling this value is meaningful.
    #[must_use]
    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Self::Function(_)
                | Self::Method(_)
                | Self::Builtin(_)
                | Self::BuiltinMethod(_)
                | Self::Native(_)
                | Self::Class(_)
                | Self::ExcType(_)
        )
    }

    /// Returns true if this value is an exception class, built-in or user-defined.
    #[must_use]
    pub fn is_exception_class(&self) -> bool {
        match self {
            Self::ExcType(_) => true,
            Self::Class(cls) => cls.exception_base().is_some(),
            _ => false,
        }
    }

    /// Returns true if this value is an exception instance.
    #[must_use]
    pub fn is_exception_instance(&self) -> bool {
        match self {
            Self::Exception(_) => true,
            Self::Instance(inst) => inst.class().exception_base().is_some(),
            _ => false,
        }
    }

    /// Returns the class of an exception instance.
    #[must_use]
    pub fn exception_class(&self) -> Option<Self> {
        match self {
            Self::Exception(exc) => Some(Self::ExcType(exc.exc_type())),
            Self::Instance(inst) if inst.class().exception_base().is_some() => Some(Self::Class(inst.class().clone())),
            _ => None,
        }
    }

    /// Address used in default reprs and for identity hashing.
    #[must_use]
    pub fn address(&self) -> usize {
        match self {
            Self::Str(s) => Rc::as_ptr(s).cast::<u8>() as usize,
            Self::List(list) => Rc::as_ptr(list) as usize,
            Self::Tuple(items) => Rc::as_ptr(items).cast::<u8>() as usize,
            Self::Dict(dict) => Rc::as_ptr(dict) as usize,
            Self::Set(set) => Rc::as_ptr(set) as usize,
            Self::Slice(slice) => Rc::as_ptr(slice) as usize,
            Self::Function(func) => Rc::as_ptr(func) as usize,
            Self::Method(method) => Rc::as_ptr(method) as usize,
            Self::BuiltinMethod(method) => Rc::as_ptr(method) as usize,
            Self::Native(native) => native.addr(),
            Self::Class(cls) => cls.addr(),
            Self::Instance(inst) => inst.addr(),
            Self::Generator(generator) => Rc::as_ptr(generator) as usize,
            Self::Iterator(iter) => Rc::as_ptr(iter) as usize,
            Self::Cell(cell) => cell.addr(),
            Self::Code(code) => Rc::as_ptr(code) as usize,
            Self::Exception(exc) => Rc::as_ptr(exc) as usize,
            Self::Traceback(tb) => Rc::as_ptr(tb) as usize,
            Self::None
            | Self::Bool(_)
            | Self::Int(_)
            | Self::Float(_)
            | Self::Builtin(_)
            | Self::ExcType(_)
            | Self::Unwind(_) => 0,
        }
    }

    /// Identity comparison, the `is` operator.
    ///
    /// Scalars compare by value since they have no separate identity here; strings
    /// compare by content, mirroring interning of the short strings programs compare.
    #[must_use]
    pub fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::ExcType(a), Self::ExcType(b)) => a == b,
            (Self::Cell(a), Self::Cell(b)) => a.ptr_eq(b),
            (Self::Unwind(_), _) | (_, Self::Unwind(_)) => false,
            (a, b) => {
                std::mem::discriminant(a) == std::mem::discriminant(b) && a.address() != 0 && a.address() == b.address()
            }
        }
    }

    /// Equality, the `==` operator. Containers compare structurally.
    #[must_use]
    pub fn py_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(_) | Self::Bool(_), Self::Int(_) | Self::Bool(_)) => self.as_int() == other.as_int(),
            (Self::Float(_), Self::Int(_) | Self::Bool(_) | Self::Float(_))
            | (Self::Int(_) | Self::Bool(_), Self::Float(_)) => self.as_float() == other.as_float(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow()),
            (Self::Tuple(a), Self::Tuple(b)) => seq_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|other| v.py_eq(other)))
            }
            (Self::Set(a), Self::Set(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|item| b.contains(item))
            }
            (Self::Slice(a), Self::Slice(b)) => {
                a.start.py_eq(&b.start) && a.stop.py_eq(&b.stop) && a.step.py_eq(&b.step)
            }
            (Self::Exception(a), Self::Exception(b)) => Rc::ptr_eq(a, b),
            _ => self.is_same(other),
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`, and sorting.
    ///
    /// Returns `Ok(None)` for unordered floats (NaN). Values of unrelated types are
    /// not ordered and raise `TypeError`.
    pub(crate) fn py_partial_cmp(&self, other: &Self) -> RunResult<Option<Ordering>> {
        match (self, other) {
            (Self::Int(_) | Self::Bool(_), Self::Int(_) | Self::Bool(_)) => Ok(self.as_int().partial_cmp(&other.as_int())),
            (Self::Float(_) | Self::Int(_) | Self::Bool(_), Self::Float(_) | Self::Int(_) | Self::Bool(_)) => {
                Ok(self.as_float().zip(other.as_float()).and_then(|(a, b)| a.partial_cmp(&b)))
            }
            (Self::Str(a), Self::Str(b)) => Ok(Some(a.cmp(b))),
            (Self::List(a), Self::List(b)) => seq_cmp(&a.borrow(), &b.borrow()),
            (Self::Tuple(a), Self::Tuple(b)) => seq_cmp(a, b),
            (Self::Set(a), Self::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                let a_in_b = a.iter().all(|item| b.contains(item));
                let b_in_a = b.iter().all(|item| a.contains(item));
                Ok(match (a_in_b, b_in_a) {
                    (true, true) => Some(Ordering::Equal),
                    (true, false) => Some(Ordering::Less),
                    (false, true) => Some(Ordering::Greater),
                    (false, false) => None,
                })
            }
            _ => Err(ExcType::type_error(format!(
                "unorderable types: {}() and {}()",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Raises `TypeError` unless this value can be used as a dict key or set element.
    pub(crate) fn check_hashable(&self) -> RunResult<()> {
        match self {
            Self::List(_) | Self::Dict(_) | Self::Set(_) | Self::Slice(_) => {
                Err(ExcType::type_error_unhashable(self.type_name()))
            }
            Self::Tuple(items) => items.iter().try_for_each(Self::check_hashable),
            _ => Ok(()),
        }
    }

    /// Returns the `repr()` of this value.
    #[must_use]
    pub fn py_repr(&self) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.repr_fmt(&mut out);
        out
    }

    /// Writes the `repr()` of this value.
    pub fn repr_fmt(&self, f: &mut impl Write) -> fmt::Result {
        self.repr_inner(f, &mut Vec::new())
    }

    /// `in_progress` holds the containers currently being printed, so a list that
    /// contains itself prints as `[...]` instead of recursing forever.
    fn repr_inner(&self, f: &mut impl Write, in_progress: &mut Vec<usize>) -> fmt::Result {
        let addr = self.address();
        let is_container = matches!(self, Self::List(_) | Self::Dict(_) | Self::Set(_));
        if is_container && in_progress.contains(&addr) {
            return f.write_str(match self {
                Self::Dict(_) => "{...}",
                Self::Set(_) => "set(...)",
                _ => "[...]",
            });
        }
        if is_container {
            in_progress.push(addr);
        }
        let result = self.repr_body(f, in_progress);
        if is_container {
            in_progress.pop();
        }
        result
    }

    fn repr_body(&self, f: &mut impl Write, in_progress: &mut Vec<usize>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(&float_repr(*v)),
            Self::Str(s) => str_repr_fmt(s, f),
            Self::List(list) => {
                f.write_char('[')?;
                write_items(f, &list.borrow(), in_progress)?;
                f.write_char(']')
            }
            Self::Tuple(items) => {
                f.write_char('(')?;
                write_items(f, items, in_progress)?;
                if items.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            Self::Dict(dict) => {
                f.write_char('{')?;
                for (i, (k, v)) in dict.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    k.repr_inner(f, in_progress)?;
                    f.write_str(": ")?;
                    v.repr_inner(f, in_progress)?;
                }
                f.write_char('}')
            }
            Self::Set(set) => {
                let items: Vec<Self> = set.borrow().iter().cloned().collect();
                f.write_str("set([")?;
                write_items(f, &items, in_progress)?;
                f.write_str("])")
            }
            Self::Slice(slice) => {
                f.write_str("slice(")?;
                slice.start.repr_inner(f, in_progress)?;
                f.write_str(", ")?;
                slice.stop.repr_inner(f, in_progress)?;
                f.write_str(", ")?;
                slice.step.repr_inner(f, in_progress)?;
                f.write_char(')')
            }
            Self::Function(func) => write!(f, "<function {} at {:#x}>", func.name(), self.address()),
            Self::Method(method) => write!(f, "{method}"),
            Self::Builtin(builtin) => write!(f, "<built-in function {builtin}>"),
            Self::BuiltinMethod(method) => write!(f, "{method}"),
            Self::Native(native) => write!(f, "<built-in function {}>", native.name()),
            Self::Class(cls) => write!(f, "<class __main__.{} at {:#x}>", cls.name(), cls.addr()),
            Self::Instance(inst) => {
                let cls = inst.class();
                if cls.exception_base().is_some() {
                    f.write_str(cls.name())?;
                    let args = inst.exception_args();
                    if args.is_empty() {
                        return f.write_str("()");
                    }
                    Self::new_tuple(args).repr_inner(f, in_progress)
                } else {
                    write!(f, "<__main__.{} instance at {:#x}>", cls.name(), inst.addr())
                }
            }
            Self::Generator(generator) => {
                write!(f, "<generator object {} at {:#x}>", generator.borrow().name(), self.address())
            }
            Self::Iterator(_) => write!(f, "<iterator object at {:#x}>", self.address()),
            Self::Cell(cell) => write!(f, "<cell at {:#x}>", cell.addr()),
            Self::Code(code) => write!(f, "<code object {} at {:#x}>", code.name(), self.address()),
            Self::ExcType(exc_type) => write!(f, "<type 'exceptions.{exc_type}'>"),
            Self::Exception(exc) => exc.py_repr_fmt(f),
            Self::Traceback(_) => write!(f, "<traceback object at {:#x}>", self.address()),
            Self::Unwind(why) => write!(f, "<unwind {why:?}>"),
        }
    }

    /// Returns the `str()` of this value.
    #[must_use]
    pub fn py_str(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            Self::Exception(exc) => exc.py_str(),
            Self::Instance(inst) if inst.class().exception_base().is_some() => {
                match inst.exception_args().as_slice() {
                    [] => String::new(),
                    [arg] => arg.py_str(),
                    args => Self::new_tuple(args.to_vec()).py_repr(),
                }
            }
            Self::ExcType(exc_type) => format!("<type 'exceptions.{exc_type}'>"),
            Self::Class(cls) => format!("__main__.{}", cls.name()),
            other => other.py_repr(),
        }
    }
}

fn write_items(f: &mut impl Write, items: &[Value], in_progress: &mut Vec<usize>) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.repr_inner(f, in_progress)?;
    }
    Ok(())
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
}

/// Lexicographic comparison: the first unequal pair decides, then length.
fn seq_cmp(a: &[Value], b: &[Value]) -> RunResult<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y) {
            return x.py_partial_cmp(y);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

/// Formats a float the way Python's `repr()` does: the shortest string that
/// round-trips, with an exponent outside `1e-4 <= |v| < 1e16`.
#[must_use]
pub fn float_repr(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_owned();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let abs = v.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        // `{:e}` gives the shortest round-trip digits, e.g. `1e16` or `1.5e-5`
        let formatted = format!("{v:e}");
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((formatted.as_str(), "0"));
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    let formatted = format!("{v}");
    if formatted.contains('.') {
        formatted
    } else {
        format!("{formatted}.0")
    }
}

/// Writes a string literal using Python's quoting rules.
fn str_repr_fmt(s: &str, f: &mut impl Write) -> fmt::Result {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    f.write_char(quote)?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => write!(f, "\\{c}")?,
            c if (c as u32) < 0x20 || c as u32 == 0x7f => write!(f, "\\x{:02x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.py_eq(other)
    }
}

/// Equality is only total for hashable values; dict and set keys pass
/// [`Value::check_hashable`] before insertion.
impl Eq for Value {}

impl Hash for Value {
    #[expect(clippy::cast_possible_truncation, reason = "integral floats hash like the equal int")]
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::None => state.write_u8(0),
            Self::Bool(_) | Self::Int(_) => state.write_i64(self.as_int().unwrap_or_default()),
            Self::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() && v.abs() < 9.2e18 {
                    state.write_i64(*v as i64);
                } else {
                    state.write_u64(v.to_bits());
                }
            }
            Self::Str(s) => s.hash(state),
            Self::Tuple(items) => {
                state.write_usize(items.len());
                for item in items.iter() {
                    item.hash(state);
                }
            }
            Self::Builtin(builtin) => builtin.hash(state),
            Self::ExcType(exc_type) => exc_type.hash(state),
            other => state.write_usize(other.address()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_repr() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn test_str_repr_quoting() {
        assert_eq!(Value::from("abc").py_repr(), "'abc'");
        assert_eq!(Value::from("it's").py_repr(), "\"it's\"");
        assert_eq!(Value::from("a\nb").py_repr(), "'a\\nb'");
    }

    #[test]
    fn test_container_reprs() {
        let tuple = Value::new_tuple(vec![Value::Int(1)]);
        assert_eq!(tuple.py_repr(), "(1,)");
        let list = Value::new_list(vec![Value::Int(1), Value::from("x"), Value::None]);
        assert_eq!(list.py_repr(), "[1, 'x', None]");
        if let Value::List(inner) = &list {
            inner.borrow_mut().push(list.clone());
        }
        assert_eq!(list.py_repr(), "[1, 'x', None, [...]]");
    }

    #[test]
    fn test_numeric_equality_and_hash() {
        use std::hash::BuildHasher;
        let state = ahash::RandomState::new();
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert_eq!(state.hash_one(Value::Int(1)), state.hash_one(Value::Float(1.0)));
        assert_eq!(state.hash_one(Value::Int(1)), state.hash_one(Value::Bool(true)));
    }

    #[test]
    fn test_unhashable() {
        assert!(Value::new_list(vec![]).check_hashable().is_err());
        assert!(Value::new_tuple(vec![Value::new_list(vec![])]).check_hashable().is_err());
        assert!(Value::new_tuple(vec![Value::Int(1)]).check_hashable().is_ok());
    }
}
