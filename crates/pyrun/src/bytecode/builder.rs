//! Assembler for [`CompiledUnit`]s.
//!
//! `UnitBuilder` encodes mnemonics and operands into the wire format, interns
//! constants and names into the unit's tables, and patches jumps to labels once the
//! label's position is known. It exists so hosts and tests can produce units without
//! an external compiler.

use super::op::{CompareOp, Mnemonic, OperandClass};
use crate::unit::{CodeFlags, CompiledUnit, Constant};

/// A jump target whose byte offset may not be known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// A jump emitted before its target label was bound.
#[derive(Debug)]
struct PendingJump {
    /// Offset of the two operand bytes.
    operand_at: usize,
    /// Offset of the following instruction, the base for relative jumps.
    next_offset: usize,
    relative: bool,
    label: Label,
}

/// Builder for a [`CompiledUnit`].
///
/// # Usage
///
/// ```
/// use pyrun::{Mnemonic, UnitBuilder};
///
/// let mut b = UnitBuilder::new("<module>");
/// b.load_const(4).load_const(7).emit(Mnemonic::BinaryAdd).emit(Mnemonic::PrintExpr);
/// b.load_const(()).emit(Mnemonic::ReturnValue);
/// let unit = b.build();
/// assert_eq!(unit.code.len(), 12);
/// ```
#[derive(Debug)]
pub struct UnitBuilder {
    name: String,
    filename: String,
    code: Vec<u8>,
    consts: Vec<Constant>,
    names: Vec<String>,
    varnames: Vec<String>,
    cellvars: Vec<String>,
    freevars: Vec<String>,
    argcount: u32,
    flags: CodeFlags,
    labels: Vec<Option<usize>>,
    pending: Vec<PendingJump>,
}

/// Marker accepted by [`UnitBuilder::load_const`] for `None`.
impl From<()> for Constant {
    fn from((): ()) -> Self {
        Self::None
    }
}

impl UnitBuilder {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            filename: "<unit>".to_owned(),
            code: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            argcount: 0,
            flags: CodeFlags::empty(),
            labels: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn filename(&mut self, filename: &str) -> &mut Self {
        filename.clone_into(&mut self.filename);
        self
    }

    /// Declares the positional parameters; they become the first local variables.
    pub fn args(&mut self, names: &[&str]) -> &mut Self {
        for name in names {
            intern(&mut self.varnames, name);
        }
        self.argcount = u32::try_from(names.len()).expect("too many parameters");
        self.flags = self.flags | CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS;
        self
    }

    /// Declares a `*args` parameter, which must follow the positional ones.
    pub fn varargs(&mut self, name: &str) -> &mut Self {
        intern(&mut self.varnames, name);
        self.flags = self.flags | CodeFlags::VARARGS;
        self
    }

    /// Declares a `**kwargs` parameter, which must follow `*args` if there is one.
    pub fn varkeywords(&mut self, name: &str) -> &mut Self {
        intern(&mut self.varnames, name);
        self.flags = self.flags | CodeFlags::VARKEYWORDS;
        self
    }

    pub fn local(&mut self, name: &str) -> &mut Self {
        intern(&mut self.varnames, name);
        self
    }

    pub fn cellvar(&mut self, name: &str) -> &mut Self {
        intern(&mut self.cellvars, name);
        self
    }

    pub fn freevar(&mut self, name: &str) -> &mut Self {
        intern(&mut self.freevars, name);
        self.flags = self.flags | CodeFlags::NESTED;
        self
    }

    pub fn flags(&mut self, flags: CodeFlags) -> &mut Self {
        self.flags = self.flags | flags;
        self
    }

    /// Marks the unit as a generator body.
    pub fn generator(&mut self) -> &mut Self {
        self.flags(CodeFlags::GENERATOR)
    }

    /// Byte offset the next instruction will be emitted at.
    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Emits an instruction without an operand.
    pub fn emit(&mut self, mnemonic: Mnemonic) -> &mut Self {
        debug_assert!(!mnemonic.has_argument(), "{mnemonic} takes an operand");
        self.code.push(mnemonic as u8);
        self
    }

    /// Emits an instruction with a raw operand, prefixing `EXTENDED_ARG` when the
    /// operand does not fit in 16 bits.
    pub fn emit_arg(&mut self, mnemonic: Mnemonic, arg: u32) -> &mut Self {
        debug_assert!(mnemonic.has_argument(), "{mnemonic} takes no operand");
        let [lo, hi, ext_lo, ext_hi] = arg.to_le_bytes();
        if arg > u32::from(u16::MAX) {
            self.code.extend_from_slice(&[Mnemonic::ExtendedArg as u8, ext_lo, ext_hi]);
        }
        self.code.extend_from_slice(&[mnemonic as u8, lo, hi]);
        self
    }

    /// Emits `LOAD_CONST`, adding `value` to the constant table.
    pub fn load_const(&mut self, value: impl Into<Constant>) -> &mut Self {
        let value = value.into();
        let index = match self.consts.iter().position(|c| same_constant(c, &value)) {
            Some(index) => index,
            None => {
                self.consts.push(value);
                self.consts.len() - 1
            }
        };
        self.emit_arg(Mnemonic::LoadConst, table_index(index))
    }

    /// Emits an instruction whose operand indexes the names table.
    pub fn name_op(&mut self, mnemonic: Mnemonic, name: &str) -> &mut Self {
        debug_assert_eq!(mnemonic.operand_class(), OperandClass::Name);
        let index = intern(&mut self.names, name);
        self.emit_arg(mnemonic, table_index(index))
    }

    /// Emits `LOAD_FAST`, `STORE_FAST`, or `DELETE_FAST`, declaring the local if new.
    pub fn local_op(&mut self, mnemonic: Mnemonic, name: &str) -> &mut Self {
        debug_assert_eq!(mnemonic.operand_class(), OperandClass::Local);
        let index = intern(&mut self.varnames, name);
        self.emit_arg(mnemonic, table_index(index))
    }

    /// Emits `LOAD_CLOSURE`, `LOAD_DEREF`, or `STORE_DEREF`.
    ///
    /// The name must already be declared with [`cellvar`](Self::cellvar) or
    /// [`freevar`](Self::freevar).
    pub fn deref_op(&mut self, mnemonic: Mnemonic, name: &str) -> &mut Self {
        debug_assert_eq!(mnemonic.operand_class(), OperandClass::Free);
        let index = self
            .cellvars
            .iter()
            .position(|n| n == name)
            .or_else(|| {
                self.freevars
                    .iter()
                    .position(|n| n == name)
                    .map(|i| i + self.cellvars.len())
            })
            .expect("deref of an undeclared cell or free variable");
        self.emit_arg(mnemonic, table_index(index))
    }

    pub fn compare(&mut self, op: CompareOp) -> &mut Self {
        self.emit_arg(Mnemonic::CompareOp, u32::from(op as u8))
    }

    /// Emits a `CALL_FUNCTION` family instruction with the packed argument counts.
    pub fn call(&mut self, mnemonic: Mnemonic, positional: u8, keyword: u8) -> &mut Self {
        self.emit_arg(mnemonic, (u32::from(keyword) << 8) | u32::from(positional))
    }

    /// Creates a label to be bound later with [`bind`](Self::bind).
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current offset.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.code.len());
        self
    }

    /// Emits a jump to `label`, encoded relative or absolute as the mnemonic requires.
    pub fn jump(&mut self, mnemonic: Mnemonic, label: Label) -> &mut Self {
        let relative = match mnemonic.operand_class() {
            OperandClass::JumpRelative => true,
            OperandClass::JumpAbsolute => false,
            _ => panic!("{mnemonic} is not a jump"),
        };
        self.code.extend_from_slice(&[mnemonic as u8, 0, 0]);
        self.pending.push(PendingJump {
            operand_at: self.code.len() - 2,
            next_offset: self.code.len(),
            relative,
            label,
        });
        self
    }

    /// Finishes the unit, patching every jump.
    ///
    /// # Panics
    /// Panics if a jump refers to a label that was never bound, or if a jump
    /// distance does not fit in 16 bits.
    #[must_use]
    pub fn build(&mut self) -> CompiledUnit {
        for jump in self.pending.drain(..) {
            let target = self.labels[jump.label.0].expect("jump to unbound label");
            let arg = if jump.relative {
                target.checked_sub(jump.next_offset).expect("relative jump must go forward")
            } else {
                target
            };
            let arg = u16::try_from(arg).expect("jump distance exceeds 16 bits");
            self.code[jump.operand_at..jump.operand_at + 2].copy_from_slice(&arg.to_le_bytes());
        }
        CompiledUnit {
            name: self.name.clone(),
            filename: self.filename.clone(),
            code: self.code.clone(),
            consts: self.consts.clone(),
            names: self.names.clone(),
            varnames: self.varnames.clone(),
            cellvars: self.cellvars.clone(),
            freevars: self.freevars.clone(),
            argcount: self.argcount,
            flags: self.flags,
        }
    }
}

fn intern(table: &mut Vec<String>, name: &str) -> usize {
    if let Some(index) = table.iter().position(|n| n == name) {
        return index;
    }
    table.push(name.to_owned());
    table.len() - 1
}

fn table_index(index: usize) -> u32 {
    u32::try_from(index).expect("table index exceeds u32")
}

/// Constant-table deduplication; `1`, `1.0` and `True` stay distinct entries.
fn same_constant(a: &Constant, b: &Constant) -> bool {
    match (a, b) {
        (Constant::Float(x), Constant::Float(y)) => x.to_bits() == y.to_bits(),
        (Constant::Code(_), _) | (_, Constant::Code(_)) => false,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_basic() {
        let unit = UnitBuilder::new("m").emit(Mnemonic::PopTop).emit(Mnemonic::ReturnValue).build();
        assert_eq!(unit.code, vec![1, 83]);
    }

    #[test]
    fn test_emit_interns_tables() {
        let mut b = UnitBuilder::new("m");
        b.load_const(5).load_const(5).name_op(Mnemonic::StoreName, "x");
        b.name_op(Mnemonic::LoadName, "x");
        let unit = b.build();
        assert_eq!(unit.consts, vec![Constant::Int(5)]);
        assert_eq!(unit.names, vec!["x".to_owned()]);
        assert_eq!(unit.code, vec![100, 0, 0, 100, 0, 0, 90, 0, 0, 101, 0, 0]);
    }

    #[test]
    fn test_emit_extended_arg() {
        let unit = UnitBuilder::new("m").emit_arg(Mnemonic::BuildList, 0x1_0003).build();
        assert_eq!(unit.code, vec![145, 1, 0, 103, 3, 0]);
    }

    #[test]
    fn test_emit_jumps_patched() {
        let mut b = UnitBuilder::new("m");
        let end = b.new_label();
        let top = b.new_label();
        b.bind(top);
        b.jump(Mnemonic::JumpForward, end); // 0..3, next 3
        b.emit(Mnemonic::Nop); // 3
        b.jump(Mnemonic::JumpAbsolute, top); // 4..7
        b.bind(end); // 7
        b.emit(Mnemonic::ReturnValue);
        let unit = b.build();
        assert_eq!(unit.code, vec![110, 4, 0, 9, 113, 0, 0, 83]);
    }

    #[test]
    fn test_emit_call_encoding() {
        let unit = UnitBuilder::new("m").call(Mnemonic::CallFunction, 2, 1).build();
        assert_eq!(unit.code, vec![131, 2, 1]);
    }
}
