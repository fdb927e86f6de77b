use std::{
    borrow::Cow,
    fmt::{self, Write},
    rc::Rc,
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    exception_public::{Exception, StackFrame},
    value::Value,
};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Python exception types supported by the interpreter.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>` implementations.
/// The string representation matches the variant name exactly (e.g., `ValueError` -> "ValueError").
/// The hierarchy follows Python 2.7, including `StandardError`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter, Serialize, Deserialize,
)]
pub enum ExcType {
    /// Root of the hierarchy; matches everything in `except` clauses.
    BaseException,
    SystemExit,
    KeyboardInterrupt,
    GeneratorExit,

    /// Base class for all non-exit exceptions.
    Exception,
    /// Raised when an iterator or generator is exhausted.
    StopIteration,
    /// Python 2 base class for the built-in error types below.
    StandardError,

    // --- ArithmeticError hierarchy ---
    ArithmeticError,
    OverflowError,
    ZeroDivisionError,

    AssertionError,
    AttributeError,

    // --- LookupError hierarchy ---
    LookupError,
    IndexError,
    KeyError,

    MemoryError,

    // --- NameError hierarchy ---
    NameError,
    /// Subclass of NameError - for accessing local variable before assignment.
    UnboundLocalError,

    // --- RuntimeError hierarchy ---
    RuntimeError,
    NotImplementedError,
    /// Raised when the call stack exceeds the configured depth.
    RecursionError,

    TypeError,
    ValueError,
    /// Raised when an execution budget (operations or wall time) runs out.
    TimeoutError,
}

impl ExcType {
    /// Returns the direct base class, or `None` for `BaseException`.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        let parent = match self {
            Self::BaseException => return None,
            Self::SystemExit | Self::KeyboardInterrupt | Self::GeneratorExit | Self::Exception => Self::BaseException,
            Self::StopIteration | Self::StandardError | Self::TimeoutError => Self::Exception,
            Self::ArithmeticError
            | Self::AssertionError
            | Self::AttributeError
            | Self::LookupError
            | Self::MemoryError
            | Self::NameError
            | Self::RuntimeError
            | Self::TypeError
            | Self::ValueError => Self::StandardError,
            Self::OverflowError | Self::ZeroDivisionError => Self::ArithmeticError,
            Self::IndexError | Self::KeyError => Self::LookupError,
            Self::UnboundLocalError => Self::NameError,
            Self::NotImplementedError | Self::RecursionError => Self::RuntimeError,
        };
        Some(parent)
    }

    /// Checks if this exception type is a subclass of another exception type.
    ///
    /// Returns true if `self` would be caught by `except handler_type:`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        let mut current = Some(self);
        while let Some(exc_type) = current {
            if exc_type == handler_type {
                return true;
            }
            current = exc_type.parent();
        }
        false
    }

    /// Creates a TypeError with the given message.
    #[must_use]
    pub(crate) fn type_error(msg: impl fmt::Display) -> RunError {
        SimpleException::new_msg(Self::TypeError, msg).into()
    }

    /// Creates a ValueError with the given message.
    #[must_use]
    pub(crate) fn value_error(msg: impl fmt::Display) -> RunError {
        SimpleException::new_msg(Self::ValueError, msg).into()
    }

    /// Creates an IndexError with the given message.
    #[must_use]
    pub(crate) fn index_error(msg: impl fmt::Display) -> RunError {
        SimpleException::new_msg(Self::IndexError, msg).into()
    }

    /// Creates a KeyError carrying the missing key.
    ///
    /// `str()` of a KeyError is the repr of the key, matching CPython.
    #[must_use]
    pub(crate) fn key_error(key: &Value) -> RunError {
        SimpleException::new(Self::KeyError, vec![key.clone()]).into()
    }

    /// Creates a NameError for a bare-name lookup that failed in every scope.
    ///
    /// Matches CPython's format: `NameError: name 'x' is not defined`
    #[must_use]
    pub(crate) fn name_error(name: &str) -> RunError {
        SimpleException::new_msg(Self::NameError, format!("name '{name}' is not defined")).into()
    }

    /// Creates a NameError for a `LOAD_GLOBAL` miss.
    ///
    /// Matches CPython 2's format: `NameError: global name 'x' is not defined`
    #[must_use]
    pub(crate) fn global_name_error(name: &str) -> RunError {
        SimpleException::new_msg(Self::NameError, format!("global name '{name}' is not defined")).into()
    }

    /// Creates an UnboundLocalError for reading a local variable before assignment.
    #[must_use]
    pub(crate) fn unbound_local_error(name: &str) -> RunError {
        SimpleException::new_msg(
            Self::UnboundLocalError,
            format!("local variable '{name}' referenced before assignment"),
        )
        .into()
    }

    /// Creates a NameError for reading an empty closure cell captured from an enclosing scope.
    #[must_use]
    pub(crate) fn name_error_free_variable(name: &str) -> RunError {
        SimpleException::new_msg(
            Self::NameError,
            format!("free variable '{name}' referenced before assignment in enclosing scope"),
        )
        .into()
    }

    /// Creates an AttributeError.
    ///
    /// `owner` is the already-formatted subject, e.g. `'int' object` or `C instance`.
    #[must_use]
    pub(crate) fn attribute_error(owner: impl fmt::Display, attr: &str) -> RunError {
        SimpleException::new_msg(Self::AttributeError, format!("{owner} has no attribute '{attr}'")).into()
    }

    /// Creates a TypeError for a binary operator applied to unsupported operand types.
    ///
    /// Matches CPython's format: `unsupported operand type(s) for +: 'int' and 'str'`
    #[must_use]
    pub(crate) fn binary_type_error(op: &str, lhs_type: &str, rhs_type: &str) -> RunError {
        Self::type_error(format!(
            "unsupported operand type(s) for {op}: '{lhs_type}' and '{rhs_type}'"
        ))
    }

    /// Creates a TypeError for a unary operator applied to an unsupported operand type.
    #[must_use]
    pub(crate) fn unary_type_error(op: &str, value_type: &str) -> RunError {
        Self::type_error(format!("bad operand type for unary {op}: '{value_type}'"))
    }

    /// Creates a TypeError for using an unhashable value as a dict key or set element.
    #[must_use]
    pub(crate) fn type_error_unhashable(type_name: &str) -> RunError {
        Self::type_error(format!("unhashable type: '{type_name}'"))
    }

    #[must_use]
    pub(crate) fn type_error_not_callable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not callable"))
    }

    #[must_use]
    pub(crate) fn type_error_not_iterable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not iterable"))
    }

    /// Creates a TypeError for builtins called with the wrong number of arguments.
    ///
    /// Matches CPython's formats:
    /// - For 1 expected arg: `{name}() takes exactly one argument ({actual} given)`
    /// - For N expected args: `{name} expected {expected} arguments, got {actual}`
    #[must_use]
    pub(crate) fn type_error_arg_count(name: &str, expected: usize, actual: usize) -> RunError {
        if expected == 1 {
            Self::type_error(format!("{name}() takes exactly one argument ({actual} given)"))
        } else {
            Self::type_error(format!("{name} expected {expected} arguments, got {actual}"))
        }
    }

    /// Creates a TypeError for when a method that takes no arguments receives some.
    #[must_use]
    pub(crate) fn type_error_no_args(name: &str, actual: usize) -> RunError {
        Self::type_error(format!("{name}() takes no arguments ({actual} given)"))
    }

    #[must_use]
    pub(crate) fn type_error_at_least(name: &str, min: usize, actual: usize) -> RunError {
        Self::type_error(format!("{name} expected at least {min} argument{}, got {actual}", plural(min)))
    }

    #[must_use]
    pub(crate) fn type_error_at_most(name: &str, max: usize, actual: usize) -> RunError {
        Self::type_error(format!("{name} expected at most {max} argument{}, got {actual}", plural(max)))
    }

    #[must_use]
    pub(crate) fn type_error_no_kwargs(name: &str) -> RunError {
        Self::type_error(format!("{name}() takes no keyword arguments"))
    }

    /// Creates a TypeError for too many positional arguments to a Python function.
    ///
    /// Matches CPython's format: `f() takes 2 positional arguments but 3 were given`
    #[must_use]
    pub(crate) fn type_error_too_many_positional(name: &str, expected: usize, given: usize) -> RunError {
        let were = if given == 1 { "was" } else { "were" };
        Self::type_error(format!(
            "{name}() takes {expected} positional argument{} but {given} {were} given",
            plural(expected)
        ))
    }

    /// Creates a TypeError listing required parameters that were not bound.
    ///
    /// Matches CPython's format: `f() missing 2 required positional arguments: 'a' and 'b'`
    #[must_use]
    pub(crate) fn type_error_missing_positional(name: &str, missing: &[&str]) -> RunError {
        let quoted: Vec<String> = missing.iter().map(|m| format!("'{m}'")).collect();
        let names = match quoted.as_slice() {
            [] => String::new(),
            [one] => one.clone(),
            [first, second] => format!("{first} and {second}"),
            [rest @ .., last] => format!("{}, and {last}", rest.join(", ")),
        };
        Self::type_error(format!(
            "{name}() missing {} required positional argument{}: {names}",
            missing.len(),
            plural(missing.len())
        ))
    }

    /// Creates a TypeError for a parameter bound both positionally and by keyword.
    #[must_use]
    pub(crate) fn type_error_multiple_values(name: &str, param: &str) -> RunError {
        Self::type_error(format!("{name}() got multiple values for keyword argument '{param}'"))
    }

    /// Creates a TypeError for a keyword that supplied twice while merging `**kwargs`.
    #[must_use]
    pub(crate) fn type_error_duplicate_keyword(name: &str, key: &str) -> RunError {
        Self::type_error(format!("{name}() got multiple values for keyword argument '{key}'"))
    }

    #[must_use]
    pub(crate) fn type_error_unexpected_keyword(name: &str, key: &str) -> RunError {
        Self::type_error(format!("{name}() got an unexpected keyword argument '{key}'"))
    }

    #[must_use]
    pub(crate) fn type_error_keywords_not_strings(name: &str) -> RunError {
        Self::type_error(format!("{name}() keywords must be strings"))
    }

    #[must_use]
    pub(crate) fn zero_division(msg: &str) -> RunError {
        SimpleException::new_msg(Self::ZeroDivisionError, msg).into()
    }

    #[must_use]
    pub(crate) fn overflow_error() -> RunError {
        SimpleException::new_msg(Self::OverflowError, "integer overflow").into()
    }

    #[must_use]
    pub(crate) fn overflow_error_msg(msg: impl fmt::Display) -> RunError {
        SimpleException::new_msg(Self::OverflowError, msg).into()
    }

    /// Creates a bare MemoryError, raised when a result cannot be allocated.
    #[must_use]
    pub(crate) fn memory_error() -> RunError {
        SimpleException::new(Self::MemoryError, Vec::new()).into()
    }

    /// Creates a StopIteration, carrying a generator's return value when there is one.
    #[must_use]
    pub(crate) fn stop_iteration(value: Option<Value>) -> RunError {
        SimpleException::new(Self::StopIteration, value.into_iter().collect()).into()
    }

    /// Creates the TypeError raised when `send()` passes a value to an unstarted generator.
    #[must_use]
    pub(crate) fn generator_send_not_started() -> RunError {
        Self::type_error("can't send non-None value to a just-started generator")
    }

    #[must_use]
    pub(crate) fn generator_already_executing() -> RunError {
        Self::value_error("generator already executing")
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

/// Lightweight representation of a built-in exception instance.
///
/// Holds the exception type and the constructor arguments, which drive both
/// `str()` and `repr()` the way `BaseException.args` does in CPython.
#[derive(Debug, Clone)]
pub struct SimpleException {
    exc_type: ExcType,
    args: Vec<Value>,
}

impl fmt::Display for SimpleException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.py_repr_fmt(f)
    }
}

impl SimpleException {
    /// Creates a new exception with the given type and constructor arguments.
    #[must_use]
    pub fn new(exc_type: ExcType, args: Vec<Value>) -> Self {
        Self { exc_type, args }
    }

    /// Creates a new exception with a single string argument.
    #[must_use]
    pub fn new_msg(exc_type: ExcType, msg: impl fmt::Display) -> Self {
        Self {
            exc_type,
            args: vec![Value::from(msg.to_string().as_str())],
        }
    }

    /// Creates a new exception with no arguments.
    #[must_use]
    pub fn new_none(exc_type: ExcType) -> Self {
        Self {
            exc_type,
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Returns the exception formatted as `str()` would.
    ///
    /// No arguments give an empty string, one argument gives its `str()`, and several
    /// arguments give the repr of the argument tuple. KeyError uses the repr of its key.
    #[must_use]
    pub fn py_str(&self) -> String {
        match (self.exc_type, self.args.as_slice()) {
            (_, []) => String::new(),
            (ExcType::KeyError, [key]) => key.py_repr(),
            (_, [arg]) => arg.py_str(),
            (_, args) => Value::Tuple(args.into()).py_repr(),
        }
    }

    /// Writes the exception as Python 2.7 would repr it, e.g. `ValueError('bad',)`.
    pub fn py_repr_fmt(&self, f: &mut impl Write) -> fmt::Result {
        let type_str: &'static str = self.exc_type.into();
        f.write_str(type_str)?;
        if self.args.is_empty() {
            return f.write_str("()");
        }
        Value::Tuple(self.args.as_slice().into()).repr_fmt(f)
    }
}

/// The traceback recorded while an exception unwinds, outermost frame first.
#[derive(Debug, Clone, Default)]
pub struct Traceback {
    frames: Vec<StackFrame>,
}

impl Traceback {
    #[must_use]
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Returns a copy of this traceback with `frame` added as the new outermost entry.
    ///
    /// An entry identical to the current outermost one is not repeated, so an exception
    /// re-raised inside the same instruction keeps a single line for that frame.
    pub(crate) fn with_outer(&self, frame: StackFrame) -> Self {
        let mut frames = Vec::with_capacity(self.frames.len() + 1);
        if self.frames.first() != Some(&frame) {
            frames.push(frame);
        }
        frames.extend(self.frames.iter().cloned());
        Self { frames }
    }
}

/// A raised exception: the `(type, value, traceback)` triple in flight.
///
/// `traceback` is `None` for a fresh raise that has not yet passed a dispatch boundary.
#[derive(Debug, Clone)]
pub(crate) struct ExceptionRaise {
    pub exc_type: Value,
    pub value: Value,
    pub traceback: Option<Rc<Traceback>>,
}

impl From<SimpleException> for ExceptionRaise {
    fn from(exc: SimpleException) -> Self {
        Self {
            exc_type: Value::ExcType(exc.exc_type),
            value: Value::Exception(Rc::new(exc)),
            traceback: None,
        }
    }
}

/// Runtime error types that can occur during execution.
#[derive(Debug, Clone)]
pub(crate) enum RunError {
    /// Internal interpreter error - indicates malformed bytecode or a VM bug, never user code.
    ///
    /// Bypasses `try`/`except` entirely.
    Internal(Cow<'static, str>),
    /// Catchable Python exception (e.g., ValueError, TypeError).
    Exc(Box<ExceptionRaise>),
    /// Python exception from an exhausted execution budget that `try`/`except` cannot suppress.
    UncatchableExc(Box<ExceptionRaise>),
}

impl From<ExceptionRaise> for RunError {
    fn from(exc: ExceptionRaise) -> Self {
        Self::Exc(Box::new(exc))
    }
}

impl From<SimpleException> for RunError {
    fn from(exc: SimpleException) -> Self {
        Self::Exc(Box::new(exc.into()))
    }
}

/// Host callables report failures with the public [`Exception`]; the message becomes the sole argument.
impl From<Exception> for RunError {
    fn from(exc: Exception) -> Self {
        let exc_type = exc.exc_type();
        match exc.into_message() {
            Some(msg) => SimpleException::new_msg(exc_type, msg).into(),
            None => SimpleException::new_none(exc_type).into(),
        }
    }
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this error is a catchable exception of `exc_type` or a subclass.
    pub fn is_exc_type(&self, exc_type: ExcType) -> bool {
        match self {
            Self::Exc(raise) => match &raise.value {
                Value::Exception(exc) => exc.exc_type().is_subclass_of(exc_type),
                _ => false,
            },
            _ => false,
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(msg) => write!(f, "Internal error: {msg}"),
            Self::Exc(raise) | Self::UncatchableExc(raise) => write!(f, "{}", raise.value.py_repr()),
        }
    }
}
