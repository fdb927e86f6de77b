//! Host-facing error types.
//!
//! Everything that escapes [`VM::run_code`](crate::VM::run_code) is an [`ExecError`]:
//! either a Python exception nobody caught, or an internal consistency failure that
//! indicates malformed bytecode or a VM bug.

use std::fmt;

use crate::exception_private::ExcType;

/// One line of a traceback: the code object and the byte offset that was executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub filename: String,
    /// Name of the code object (`<module>` for top-level code).
    pub name: String,
    /// Byte offset of the instruction that raised or propagated the exception.
    pub offset: usize,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  File \"{}\", offset {}, in {}", self.filename, self.offset, self.name)
    }
}

/// A Python exception, as seen by the host.
///
/// Host callables registered with [`Builtins::with_native`](crate::Builtins::with_native)
/// return this type to raise into the running program; uncaught exceptions come back
/// as this type inside [`ExecError::Raised`].
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    exc_type: ExcType,
    /// Class name; differs from `exc_type` for user classes deriving from a built-in exception.
    type_name: String,
    message: Option<String>,
    traceback: Vec<StackFrame>,
}

impl Exception {
    /// Creates a new exception with the given type and optional message.
    #[must_use]
    pub fn new(exc_type: ExcType, message: Option<String>) -> Self {
        Self {
            exc_type,
            type_name: exc_type.to_string(),
            message,
            traceback: Vec::new(),
        }
    }

    pub(crate) fn with_details(
        exc_type: ExcType,
        type_name: String,
        message: Option<String>,
        traceback: Vec<StackFrame>,
    ) -> Self {
        Self {
            exc_type,
            type_name,
            message,
            traceback,
        }
    }

    /// The nearest built-in exception type.
    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    /// The exception's class name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn into_message(self) -> Option<String> {
        self.message
    }

    /// Traceback entries, outermost frame first.
    #[must_use]
    pub fn traceback(&self) -> &[StackFrame] {
        &self.traceback
    }

    /// Returns the last line of the traceback display, e.g. `NameError: name 'x' is not defined`.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.message {
            Some(msg) if !msg.is_empty() => format!("{}: {msg}", self.type_name),
            _ => self.type_name.clone(),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.traceback.is_empty() {
            writeln!(f, "Traceback (most recent call last):")?;
            for frame in &self.traceback {
                writeln!(f, "{frame}")?;
            }
        }
        f.write_str(&self.summary())
    }
}

impl std::error::Error for Exception {}

/// Error returned from a top-level execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecError {
    /// An exception propagated out of the outermost frame.
    Raised(Exception),
    /// The VM detected malformed bytecode or broke one of its own invariants.
    Internal(String),
}

impl ExecError {
    /// Returns the uncaught exception, if this is not an internal error.
    #[must_use]
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Self::Raised(exc) => Some(exc),
            Self::Internal(_) => None,
        }
    }

    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raised(exc) => write!(f, "{exc}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ExecError {}

impl From<Exception> for ExecError {
    fn from(exc: Exception) -> Self {
        Self::Raised(exc)
    }
}
