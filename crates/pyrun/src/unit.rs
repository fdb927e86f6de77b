//! The compiled unit: the immutable bundle an external compiler hands to the VM.
//!
//! A [`CompiledUnit`] mirrors a CPython 2.7 code object: raw instruction bytes plus the
//! constant, name, local-variable, cell-variable and free-variable tables the instruction
//! operands index into. Units are plain data and serialize with serde, so hosts can ship
//! them as JSON (via `serde_json`) or compact binary (via `postcard`).

use std::{fmt, ops::BitOr};

use serde::{Deserialize, Serialize};

/// Bitset of code-object flags, using CPython's bit values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeFlags(u32);

impl CodeFlags {
    /// Locals are addressed with `*_FAST` opcodes.
    pub const OPTIMIZED: Self = Self(0x1);
    /// A fresh locals mapping is created for every call.
    pub const NEWLOCALS: Self = Self(0x2);
    /// The code accepts a `*args` parameter.
    pub const VARARGS: Self = Self(0x4);
    /// The code accepts a `**kwargs` parameter.
    pub const VARKEYWORDS: Self = Self(0x8);
    /// The code is nested inside another function.
    pub const NESTED: Self = Self(0x10);
    /// Calling the code produces a generator instead of running the body.
    pub const GENERATOR: Self = Self(0x20);

    /// Creates an empty flag set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates a flag set from raw bits, keeping unknown bits untouched.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every flag in `other` is also set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A compile-time constant stored in a unit's constant table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Constant>),
    /// A nested code object, e.g. the body of a `def` or class statement.
    Code(Box<CompiledUnit>),
}

impl From<i64> for Constant {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Constant {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Constant {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Constant {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Constant {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<CompiledUnit> for Constant {
    fn from(unit: CompiledUnit) -> Self {
        Self::Code(Box::new(unit))
    }
}

/// An immutable compiled code object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledUnit {
    /// Name of the function, class body, or `<module>`.
    pub name: String,
    /// Source file name, used in tracebacks.
    #[serde(default = "default_filename")]
    pub filename: String,
    /// Raw instruction stream.
    pub code: Vec<u8>,
    #[serde(default)]
    pub consts: Vec<Constant>,
    /// Global and attribute names referenced by `*_NAME`, `*_GLOBAL` and `*_ATTR`.
    #[serde(default)]
    pub names: Vec<String>,
    /// Local variable names; the first `argcount` entries are the positional parameters.
    #[serde(default)]
    pub varnames: Vec<String>,
    /// Locals captured by nested functions.
    #[serde(default)]
    pub cellvars: Vec<String>,
    /// Variables captured from enclosing functions.
    #[serde(default)]
    pub freevars: Vec<String>,
    #[serde(default)]
    pub argcount: u32,
    #[serde(default)]
    pub flags: CodeFlags,
}

fn default_filename() -> String {
    "<unit>".to_owned()
}

impl CompiledUnit {
    /// Parses a unit from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, UnitError> {
        serde_json::from_str(json).map_err(UnitError::Json)
    }

    /// Serializes the unit to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, UnitError> {
        serde_json::to_string_pretty(self).map_err(UnitError::Json)
    }

    /// Parses a unit from its postcard binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, UnitError> {
        postcard::from_bytes(bytes).map_err(UnitError::Postcard)
    }

    /// Serializes the unit to postcard bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, UnitError> {
        postcard::to_allocvec(self).map_err(UnitError::Postcard)
    }
}

/// Failure to load or store a [`CompiledUnit`].
#[derive(Debug)]
pub enum UnitError {
    Json(serde_json::Error),
    Postcard(postcard::Error),
}

impl fmt::Display for UnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(err) => write!(f, "invalid JSON unit: {err}"),
            Self::Postcard(err) => write!(f, "invalid binary unit: {err}"),
        }
    }
}

impl std::error::Error for UnitError {}
