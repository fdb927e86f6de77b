//! Mnemonic definitions for the CPython 2.7 instruction set.
//!
//! Discriminants are the wire opcode numbers, so `Mnemonic::from_repr(byte)` is the
//! decoder's lookup and `mnemonic as u8` is the builder's encoding. Opcodes at or above
//! [`HAVE_ARGUMENT`] carry a 16-bit little-endian operand.

use strum::{Display, EnumString, FromRepr, IntoStaticStr};

/// Opcodes with a value at or above this threshold take a 2-byte operand.
pub const HAVE_ARGUMENT: u8 = 90;

/// A named primitive operation of the VM.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, FromRepr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Mnemonic {
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    RotFour = 5,
    Nop = 9,

    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryConvert = 13,
    UnaryInvert = 15,

    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryDivide = 21,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,

    #[strum(serialize = "SLICE+0")]
    Slice0 = 30,
    #[strum(serialize = "SLICE+1")]
    Slice1 = 31,
    #[strum(serialize = "SLICE+2")]
    Slice2 = 32,
    #[strum(serialize = "SLICE+3")]
    Slice3 = 33,
    #[strum(serialize = "STORE_SLICE+0")]
    StoreSlice0 = 40,
    #[strum(serialize = "STORE_SLICE+1")]
    StoreSlice1 = 41,
    #[strum(serialize = "STORE_SLICE+2")]
    StoreSlice2 = 42,
    #[strum(serialize = "STORE_SLICE+3")]
    StoreSlice3 = 43,
    #[strum(serialize = "DELETE_SLICE+0")]
    DeleteSlice0 = 50,
    #[strum(serialize = "DELETE_SLICE+1")]
    DeleteSlice1 = 51,
    #[strum(serialize = "DELETE_SLICE+2")]
    DeleteSlice2 = 52,
    #[strum(serialize = "DELETE_SLICE+3")]
    DeleteSlice3 = 53,

    StoreMap = 54,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceDivide = 58,
    InplaceModulo = 59,
    StoreSubscr = 60,
    DeleteSubscr = 61,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    GetIter = 68,

    PrintExpr = 70,
    PrintItem = 71,
    PrintNewline = 72,

    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,
    BreakLoop = 80,
    LoadLocals = 82,
    ReturnValue = 83,
    YieldValue = 86,
    PopBlock = 87,
    EndFinally = 88,
    BuildClass = 89,

    // opcodes from here on take an argument
    StoreName = 90,
    DeleteName = 91,
    UnpackSequence = 92,
    ForIter = 93,
    ListAppend = 94,
    StoreAttr = 95,
    DeleteAttr = 96,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    DupTopx = 99,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    BuildSet = 104,
    BuildMap = 105,
    LoadAttr = 106,
    CompareOp = 107,

    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,

    ContinueLoop = 119,
    SetupLoop = 120,
    SetupExcept = 121,
    SetupFinally = 122,

    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,

    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    BuildSlice = 133,
    MakeClosure = 134,
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,

    CallFunctionVar = 140,
    CallFunctionKw = 141,
    CallFunctionVarKw = 142,
    ExtendedArg = 145,
    SetAdd = 146,
    MapAdd = 147,
}

/// How an instruction's raw 16-bit operand is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandClass {
    /// No operand bytes follow the opcode.
    None,
    /// Index into the constant table.
    Const,
    /// Index into the names table.
    Name,
    /// Index into the local-variable table.
    Local,
    /// Index into cell variables followed by free variables.
    Free,
    /// Byte offset relative to the next instruction.
    JumpRelative,
    /// Absolute byte offset.
    JumpAbsolute,
    /// Plain integer: a count, comparison code, or packed call encoding.
    Raw,
}

impl Mnemonic {
    /// Returns true if the opcode is followed by a 2-byte operand.
    #[must_use]
    pub fn has_argument(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    /// Returns how the operand of this opcode resolves.
    #[must_use]
    pub fn operand_class(self) -> OperandClass {
        match self {
            _ if !self.has_argument() => OperandClass::None,
            Self::LoadConst => OperandClass::Const,
            Self::StoreName
            | Self::DeleteName
            | Self::StoreAttr
            | Self::DeleteAttr
            | Self::StoreGlobal
            | Self::DeleteGlobal
            | Self::LoadName
            | Self::LoadAttr
            | Self::LoadGlobal => OperandClass::Name,
            Self::LoadFast | Self::StoreFast | Self::DeleteFast => OperandClass::Local,
            Self::LoadClosure | Self::LoadDeref | Self::StoreDeref => OperandClass::Free,
            Self::ForIter | Self::JumpForward | Self::SetupLoop | Self::SetupExcept | Self::SetupFinally => {
                OperandClass::JumpRelative
            }
            Self::JumpIfFalseOrPop
            | Self::JumpIfTrueOrPop
            | Self::JumpAbsolute
            | Self::PopJumpIfFalse
            | Self::PopJumpIfTrue
            | Self::ContinueLoop => OperandClass::JumpAbsolute,
            _ => OperandClass::Raw,
        }
    }

    /// Returns true for opcodes whose operand is a jump target.
    #[must_use]
    pub fn is_jump(self) -> bool {
        matches!(
            self.operand_class(),
            OperandClass::JumpRelative | OperandClass::JumpAbsolute
        )
    }
}

/// The `COMPARE_OP` operand table, indexed by the raw operand.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
pub enum CompareOp {
    #[strum(serialize = "<")]
    Lt = 0,
    #[strum(serialize = "<=")]
    Le = 1,
    #[strum(serialize = "==")]
    Eq = 2,
    #[strum(serialize = "!=")]
    Ne = 3,
    #[strum(serialize = ">")]
    Gt = 4,
    #[strum(serialize = ">=")]
    Ge = 5,
    #[strum(serialize = "in")]
    In = 6,
    #[strum(serialize = "not in")]
    NotIn = 7,
    #[strum(serialize = "is")]
    Is = 8,
    #[strum(serialize = "is not")]
    IsNot = 9,
    #[strum(serialize = "exception match")]
    ExceptionMatch = 10,
}
