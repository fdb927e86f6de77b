//! Decoded code objects.
//!
//! [`Code::decode`] turns a [`CompiledUnit`] into a vector of [`Instruction`]s with
//! every operand already resolved against the unit's tables, plus an index from byte
//! offset to instruction. Jump targets stay in byte-offset space, so a generator frame
//! resumed after a suspension and a freshly started frame agree on every target.

use std::rc::Rc;

use ahash::AHashMap;

use super::op::{Mnemonic, OperandClass};
use crate::{
    exception_private::{RunError, RunResult},
    unit::{CodeFlags, CompiledUnit, Constant},
    value::Value,
};

/// A resolved instruction operand.
#[derive(Debug, Clone)]
pub enum Operand {
    None,
    Const(Value),
    Name(Rc<str>),
    Int(u32),
    /// Absolute byte offset of the jump target.
    Jump(usize),
}

impl Operand {
    pub(crate) fn name(&self) -> RunResult<&Rc<str>> {
        match self {
            Self::Name(name) => Ok(name),
            other => Err(operand_mismatch("a name", other)),
        }
    }

    pub(crate) fn constant(&self) -> RunResult<&Value> {
        match self {
            Self::Const(value) => Ok(value),
            other => Err(operand_mismatch("a constant", other)),
        }
    }

    pub(crate) fn int(&self) -> RunResult<usize> {
        match self {
            Self::Int(n) => Ok(usize::try_from(*n).unwrap_or(usize::MAX)),
            other => Err(operand_mismatch("an integer", other)),
        }
    }

    pub(crate) fn jump(&self) -> RunResult<usize> {
        match self {
            Self::Jump(target) => Ok(*target),
            other => Err(operand_mismatch("a jump target", other)),
        }
    }
}

fn operand_mismatch(expected: &str, found: &Operand) -> RunError {
    RunError::internal(format!("expected {expected} operand, found {found:?}"))
}

/// One decoded instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub mnemonic: Mnemonic,
    pub operand: Operand,
    /// Byte offset of the opcode (of the leading `EXTENDED_ARG`, if any).
    pub offset: usize,
    /// Byte offset of the following instruction.
    pub next_offset: usize,
}

/// An executable code object.
#[derive(Debug)]
pub struct Code {
    name: Rc<str>,
    filename: Rc<str>,
    instructions: Vec<Instruction>,
    /// Maps the byte offset of every instruction start to its index.
    offsets: AHashMap<usize, usize>,
    varnames: Vec<Rc<str>>,
    cellvars: Vec<Rc<str>>,
    freevars: Vec<Rc<str>>,
    argcount: usize,
    flags: CodeFlags,
}

impl Code {
    /// Decodes a compiled unit, recursively decoding nested code constants.
    ///
    /// Fails with an internal error on unknown opcode bytes, truncated operands,
    /// and table indices out of range.
    pub(crate) fn decode(unit: &CompiledUnit) -> RunResult<Self> {
        let consts = unit.consts.iter().map(constant_value).collect::<RunResult<Vec<_>>>()?;
        let names: Vec<Rc<str>> = unit.names.iter().map(|n| Rc::from(n.as_str())).collect();
        let varnames: Vec<Rc<str>> = unit.varnames.iter().map(|n| Rc::from(n.as_str())).collect();
        let cellvars: Vec<Rc<str>> = unit.cellvars.iter().map(|n| Rc::from(n.as_str())).collect();
        let freevars: Vec<Rc<str>> = unit.freevars.iter().map(|n| Rc::from(n.as_str())).collect();

        let bytes = &unit.code;
        let mut instructions = Vec::new();
        let mut offsets = AHashMap::new();
        let mut pos = 0;
        // high bits from a preceding EXTENDED_ARG, and where that prefix started
        let mut extended: Option<(u32, usize)> = None;

        while pos < bytes.len() {
            let byte = bytes[pos];
            let mnemonic = Mnemonic::from_repr(byte)
                .ok_or_else(|| RunError::internal(format!("unknown opcode {byte} at offset {pos}")))?;
            let opcode_offset = pos;
            pos += 1;

            let raw = if mnemonic.has_argument() {
                let (Some(&lo), Some(&hi)) = (bytes.get(pos), bytes.get(pos + 1)) else {
                    return Err(RunError::internal(format!(
                        "truncated operand for {mnemonic} at offset {opcode_offset}"
                    )));
                };
                pos += 2;
                u32::from(u16::from_le_bytes([lo, hi]))
            } else {
                0
            };

            if mnemonic == Mnemonic::ExtendedArg {
                let start = extended.map_or(opcode_offset, |(_, start)| start);
                extended = Some((raw << 16, start));
                continue;
            }

            let (arg, offset) = match extended.take() {
                Some((high, start)) => (high | raw, start),
                None => (raw, opcode_offset),
            };
            let index = usize::try_from(arg).unwrap_or(usize::MAX);
            let lookup = |table: &[Rc<str>], kind: &str| {
                table.get(index).cloned().map(Operand::Name).ok_or_else(|| {
                    RunError::internal(format!("{kind} index {index} out of range for {mnemonic} at offset {offset}"))
                })
            };

            let operand = match mnemonic.operand_class() {
                OperandClass::None => Operand::None,
                OperandClass::Const => Operand::Const(consts.get(index).cloned().ok_or_else(|| {
                    RunError::internal(format!("constant index {index} out of range at offset {offset}"))
                })?),
                OperandClass::Name => lookup(&names, "name")?,
                OperandClass::Local => lookup(&varnames, "local")?,
                OperandClass::Free => {
                    let name = if index < cellvars.len() {
                        cellvars.get(index)
                    } else {
                        freevars.get(index - cellvars.len())
                    };
                    Operand::Name(name.cloned().ok_or_else(|| {
                        RunError::internal(format!("cell index {index} out of range at offset {offset}"))
                    })?)
                }
                OperandClass::JumpRelative => Operand::Jump(pos + index),
                OperandClass::JumpAbsolute => Operand::Jump(index),
                OperandClass::Raw => Operand::Int(arg),
            };

            offsets.insert(offset, instructions.len());
            instructions.push(Instruction {
                mnemonic,
                operand,
                offset,
                next_offset: pos,
            });
        }

        if extended.is_some() {
            return Err(RunError::internal("EXTENDED_ARG at end of code"));
        }

        Ok(Self {
            name: unit.name.as_str().into(),
            filename: unit.filename.as_str().into(),
            instructions,
            offsets,
            varnames,
            cellvars,
            freevars,
            argcount: usize::try_from(unit.argcount).unwrap_or(usize::MAX),
            flags: unit.flags,
        })
    }

    /// Returns the instruction starting at byte `offset`.
    ///
    /// Offsets that are not an instruction boundary (a corrupt jump target) and
    /// offsets past the end are internal errors.
    pub(crate) fn fetch(&self, offset: usize) -> RunResult<&Instruction> {
        self.offsets
            .get(&offset)
            .and_then(|&index| self.instructions.get(index))
            .ok_or_else(|| {
                RunError::internal(format!(
                    "no instruction at offset {offset} in {} (jump into an operand or past the end)",
                    self.name
                ))
            })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    #[must_use]
    pub fn varnames(&self) -> &[Rc<str>] {
        &self.varnames
    }

    #[must_use]
    pub fn cellvars(&self) -> &[Rc<str>] {
        &self.cellvars
    }

    #[must_use]
    pub fn freevars(&self) -> &[Rc<str>] {
        &self.freevars
    }

    /// Number of named positional parameters.
    #[must_use]
    pub fn argcount(&self) -> usize {
        self.argcount
    }

    #[must_use]
    pub fn flags(&self) -> CodeFlags {
        self.flags
    }

    #[must_use]
    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }
}

fn constant_value(constant: &Constant) -> RunResult<Value> {
    Ok(match constant {
        Constant::None => Value::None,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Int(i) => Value::Int(*i),
        Constant::Float(f) => Value::Float(*f),
        Constant::Str(s) => Value::from(s.as_str()),
        Constant::Tuple(items) => Value::new_tuple(items.iter().map(constant_value).collect::<RunResult<_>>()?),
        Constant::Code(unit) => Value::Code(Rc::new(Code::decode(unit)?)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(code: Vec<u8>) -> CompiledUnit {
        CompiledUnit {
            name: "<module>".to_owned(),
            filename: "<test>".to_owned(),
            code,
            consts: vec![Constant::Int(7), Constant::None],
            names: vec!["x".to_owned()],
            varnames: vec!["a".to_owned()],
            cellvars: vec!["c".to_owned()],
            freevars: vec!["f".to_owned()],
            argcount: 0,
            flags: CodeFlags::empty(),
        }
    }

    #[test]
    fn test_decode_operands() {
        // LOAD_CONST 0; STORE_NAME 0; LOAD_FAST 0; LOAD_DEREF 1; JUMP_FORWARD 1; NOP; RETURN_VALUE
        let code = Code::decode(&unit(vec![
            100, 0, 0, 90, 0, 0, 124, 0, 0, 136, 1, 0, 110, 1, 0, 9, 83,
        ]))
        .unwrap();
        let instrs = code.instructions();
        assert_eq!(instrs.len(), 7);
        assert!(matches!(instrs[0].operand, Operand::Const(Value::Int(7))));
        assert!(matches!(&instrs[1].operand, Operand::Name(n) if &**n == "x"));
        assert!(matches!(&instrs[2].operand, Operand::Name(n) if &**n == "a"));
        assert!(matches!(&instrs[3].operand, Operand::Name(n) if &**n == "f"));
        assert!(matches!(instrs[4].operand, Operand::Jump(16)));
        assert_eq!(code.fetch(16).unwrap().mnemonic, Mnemonic::ReturnValue);
    }

    #[test]
    fn test_decode_extended_arg() {
        // EXTENDED_ARG 1; JUMP_ABSOLUTE 2 -> target 0x10002
        let code = Code::decode(&unit(vec![145, 1, 0, 113, 2, 0])).unwrap();
        let instr = code.fetch(0).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::JumpAbsolute);
        assert!(matches!(instr.operand, Operand::Jump(0x1_0002)));
        assert_eq!(instr.next_offset, 6);
    }

    #[test]
    fn test_decode_errors() {
        assert!(Code::decode(&unit(vec![0])).is_err());
        assert!(Code::decode(&unit(vec![100, 0])).is_err());
        assert!(Code::decode(&unit(vec![100, 9, 0])).is_err());
        assert!(Code::decode(&unit(vec![145, 0, 0])).is_err());
    }

    #[test]
    fn test_fetch_rejects_mid_instruction_offsets() {
        let code = Code::decode(&unit(vec![100, 0, 0, 83])).unwrap();
        assert!(code.fetch(1).is_err());
        assert!(code.fetch(4).is_err());
        assert!(code.fetch(3).is_ok());
    }
}
