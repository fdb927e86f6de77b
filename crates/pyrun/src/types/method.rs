use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::value::Value;

/// Methods implemented natively on built-in container, string, and generator types.
///
/// The string form is the Python attribute name; `LOAD_ATTR` parses the attribute with
/// `FromStr` and keeps the result only if [`NativeMethod::applies_to`] the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum NativeMethod {
    // list
    Append,
    Extend,
    Insert,
    Index,
    Count,
    Reverse,
    Remove,
    Sort,
    // list and dict
    Pop,
    // dict
    Get,
    Keys,
    Values,
    Items,
    Update,
    HasKey,
    Setdefault,
    // str
    Join,
    Upper,
    Lower,
    Split,
    Strip,
    Startswith,
    Endswith,
    Replace,
    // set
    Add,
    Discard,
    // generator
    Next,
    Send,
}

impl NativeMethod {
    /// Returns true if values of `receiver`'s type have this method.
    #[must_use]
    pub fn applies_to(self, receiver: &Value) -> bool {
        match receiver {
            Value::List(_) => matches!(
                self,
                Self::Append
                    | Self::Extend
                    | Self::Insert
                    | Self::Index
                    | Self::Count
                    | Self::Reverse
                    | Self::Remove
                    | Self::Sort
                    | Self::Pop
            ),
            Value::Tuple(_) => matches!(self, Self::Index | Self::Count),
            Value::Dict(_) => matches!(
                self,
                Self::Pop
                    | Self::Get
                    | Self::Keys
                    | Self::Values
                    | Self::Items
                    | Self::Update
                    | Self::HasKey
                    | Self::Setdefault
            ),
            Value::Str(_) => matches!(
                self,
                Self::Join
                    | Self::Upper
                    | Self::Lower
                    | Self::Split
                    | Self::Strip
                    | Self::Startswith
                    | Self::Endswith
                    | Self::Replace
                    | Self::Count
                    | Self::Index
            ),
            Value::Set(_) => matches!(self, Self::Add | Self::Discard | Self::Remove | Self::Pop),
            Value::Generator(_) => matches!(self, Self::Next | Self::Send),
            Value::Iterator(_) => self == Self::Next,
            _ => false,
        }
    }
}

/// A native method bound to its receiver, e.g. `[].append`.
#[derive(Debug, Clone)]
pub struct BoundBuiltin {
    pub receiver: Value,
    pub method: NativeMethod,
}

impl fmt::Display for BoundBuiltin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<built-in method {} of {} object at {:#x}>",
            self.method,
            self.receiver.type_name(),
            self.receiver.address()
        )
    }
}
