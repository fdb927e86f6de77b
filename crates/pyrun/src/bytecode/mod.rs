//! Bytecode module for pyrun.
//!
//! This module contains the instruction set, the decoded code representation, an
//! assembler for building units, and the virtual machine that executes them.
//!
//! # Module Structure
//!
//! - `op` - Mnemonic and compare-operator definitions with wire numbers
//! - `code` - Code object: eagerly decoded instructions plus an offset index
//! - `builder` - UnitBuilder for assembling units with labels and jump patching
//! - `vm` - Virtual machine for bytecode execution

pub use builder::{Label, UnitBuilder};
pub use code::{Code, Instruction, Operand};
pub use op::{CompareOp, HAVE_ARGUMENT, Mnemonic, OperandClass};
pub use vm::VM;

mod builder;
mod code;
mod op;
mod vm;
