//! Bytecode virtual machine.
//!
//! Frames live in a [`FrameArena`] and the call stack is a list of arena handles, so a
//! generator's frame can be taken out of the arena when it suspends and put back when
//! it resumes. Each Python call recurses into [`VM::run_frame`]; the control outcome of
//! every instruction is an `Option<Why>` and errors travel as [`RunResult`] until the
//! dispatch boundary turns catchable ones into the stored exception triple.

mod attr;
mod binary;
mod call;
mod collections;
mod compare;
mod exceptions;
mod generator;
mod methods;

use std::{borrow::Cow, mem, rc::Rc};

use self::exceptions::exec_error;
use crate::{
    args::ArgValues,
    builtins::Builtins,
    bytecode::{Code, Instruction, Mnemonic},
    exception_private::{ExcType, ExceptionRaise, RunError, RunResult},
    exception_public::ExecError,
    frame::{Block, BlockKind, Frame, FrameArena, FrameId, Why},
    io::PrintWriter,
    namespace::{Scope, new_scope},
    operators::{BinaryOp, UnaryOp},
    resource::ResourceTracker,
    tracer::{NoopTracer, VmTracer},
    types::{Cell, DictMap},
    unit::CompiledUnit,
    value::Value,
};

/// The bytecode interpreter.
///
/// A VM is reusable: every top-level run starts from an empty call stack and a clear
/// exception slot, while the builtins, tracker, print writer and tracer carry over.
pub struct VM<'a, T: ResourceTracker, P: PrintWriter, Tr: VmTracer = NoopTracer> {
    frames: FrameArena,
    /// Arena handles of the active frames; the last one is executing.
    call_stack: Vec<FrameId>,
    /// The `(type, value, traceback)` of the exception most recently raised or re-raised.
    last_exception: Option<ExceptionRaise>,
    /// Set by `RETURN_VALUE` and `YIELD_VALUE`.
    return_value: Value,
    builtins: Rc<Builtins>,
    tracker: T,
    print_writer: &'a mut P,
    tracer: Tr,
    /// Python 2 `print` soft-space flag: the next item is preceded by a space.
    softspace: bool,
}

impl<'a, T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'a, T, P, Tr> {
    pub fn new(builtins: Builtins, tracker: T, print_writer: &'a mut P, tracer: Tr) -> Self {
        Self {
            frames: FrameArena::default(),
            call_stack: Vec::new(),
            last_exception: None,
            return_value: Value::None,
            builtins: Rc::new(builtins),
            tracker,
            print_writer,
            tracer,
            softspace: false,
        }
    }

    /// Runs `unit` as the `__main__` module in a fresh global scope.
    ///
    /// Returns the value of the module's final `RETURN_VALUE`, normally `None`.
    pub fn run_code(&mut self, unit: &CompiledUnit) -> Result<Value, ExecError> {
        let globals = new_scope();
        {
            let mut globals = globals.borrow_mut();
            globals.insert("__name__", Value::from("__main__"));
            globals.insert("__doc__", Value::None);
        }
        self.run_module(unit, &globals)
    }

    /// Runs `unit` as module code with `globals` as both its global and local scope.
    ///
    /// The scope is shared, not copied, so the host can inspect what the module bound.
    pub fn run_module(&mut self, unit: &CompiledUnit, globals: &Scope) -> Result<Value, ExecError> {
        self.reset();
        let result = self.run_top_level(unit, globals);
        result.map_err(exec_error)
    }

    /// Calls a Python value from the host, e.g. a function a previous run bound.
    pub fn call(&mut self, callable: &Value, args: ArgValues) -> Result<Value, ExecError> {
        if !self.call_stack.is_empty() {
            return Err(ExecError::Internal("VM is already executing".to_owned()));
        }
        let result = self.call_value(callable, args);
        result.map_err(exec_error)
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    #[must_use]
    pub fn into_tracer(self) -> Tr {
        self.tracer
    }

    #[must_use]
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    fn reset(&mut self) {
        self.frames = FrameArena::default();
        self.call_stack.clear();
        self.last_exception = None;
        self.return_value = Value::None;
        self.softspace = false;
    }

    fn run_top_level(&mut self, unit: &CompiledUnit, globals: &Scope) -> RunResult<Value> {
        let code = Rc::new(Code::decode(unit)?);
        let frame = Frame::new(code, globals.clone(), globals.clone(), self.builtins.clone());
        let (value, frame) = self.run_frame(frame)?;
        if !self.call_stack.is_empty() || self.frames.len() != 0 {
            return Err(RunError::internal(format!(
                "call stack not empty after top-level run ({} frames left)",
                self.call_stack.len().max(self.frames.len())
            )));
        }
        if !frame.stack.is_empty() {
            return Err(RunError::internal(format!(
                "operand stack not empty after top-level run ({} values left)",
                frame.stack.len()
            )));
        }
        Ok(value)
    }

    // ========================================================================
    // Frame execution
    // ========================================================================

    /// Pushes `frame` onto the call stack and runs it until it returns, yields, or
    /// raises.
    ///
    /// The frame comes back alongside the result so a suspended generator can keep it.
    pub(super) fn run_frame(&mut self, mut frame: Frame) -> RunResult<(Value, Frame)> {
        frame.parent = self.call_stack.last().copied();
        let id = self.frames.insert(frame);
        self.call_stack.push(id);
        let result = self.execute();
        self.call_stack.pop();
        let frame = self
            .frames
            .remove(id)
            .ok_or_else(|| RunError::internal("frame removed from arena while running"))?;
        result.map(|value| (value, frame))
    }

    fn execute(&mut self) -> RunResult<Value> {
        loop {
            let code = self.current()?.code.clone();
            let instr = code.fetch(self.current()?.pc)?;
            let frame_depth = self.call_stack.len();
            let frame = self.current()?;
            frame.last_offset = instr.offset;
            frame.pc = instr.next_offset;
            let stack_depth = frame.stack.len();
            self.tracer
                .on_instruction(instr.offset, instr.mnemonic, stack_depth, frame_depth);

            let step = self
                .tracker
                .check_time()
                .map_err(RunError::from)
                .and_then(|()| self.dispatch(instr));
            let mut why = match step {
                Ok(why) => why,
                Err(err) => Some(self.handle_error(err)?),
            };
            if why == Some(Why::Reraise) {
                why = Some(Why::Exception);
            }
            if why != Some(Why::Yield) {
                while let Some(pending) = why {
                    if self.current()?.blocks.is_empty() {
                        break;
                    }
                    why = self.manage_block_stack(pending)?;
                }
            }

            match why {
                None => {}
                Some(Why::Exception) => {
                    let raise = self
                        .last_exception
                        .clone()
                        .ok_or_else(|| RunError::internal("exception signalled without an exception"))?;
                    return Err(RunError::Exc(Box::new(raise)));
                }
                Some(Why::Return) => {
                    // a `finally` may have yielded after the RETURN_VALUE, so only now is the frame done
                    self.current()?.running = false;
                    return Ok(mem::replace(&mut self.return_value, Value::None));
                }
                Some(Why::Yield) => return Ok(mem::replace(&mut self.return_value, Value::None)),
                Some(other) => {
                    return Err(RunError::internal(format!("{other:?} outside of any loop")));
                }
            }
        }
    }

    /// Executes one instruction.
    fn dispatch(&mut self, instr: &Instruction) -> RunResult<Option<Why>> {
        let operand = &instr.operand;
        match instr.mnemonic {
            // ================================================================
            // Stack manipulation
            // ================================================================
            Mnemonic::PopTop => {
                self.pop()?;
            }
            Mnemonic::RotTwo => self.rotate(2)?,
            Mnemonic::RotThree => self.rotate(3)?,
            Mnemonic::RotFour => self.rotate(4)?,
            Mnemonic::DupTop => {
                let value = self.current()?.top()?.clone();
                self.push(value)?;
            }
            Mnemonic::DupTopx => {
                let count = operand.int()?;
                let frame = self.current()?;
                let start = frame
                    .stack
                    .len()
                    .checked_sub(count)
                    .ok_or_else(|| RunError::internal("operand stack underflow"))?;
                frame.stack.extend_from_within(start..);
            }
            Mnemonic::Nop => {}
            Mnemonic::LoadConst => self.push(operand.constant()?.clone())?,

            // ================================================================
            // Operators
            // ================================================================
            Mnemonic::UnaryPositive => self.unary(UnaryOp::Positive)?,
            Mnemonic::UnaryNegative => self.unary(UnaryOp::Negative)?,
            Mnemonic::UnaryNot => self.unary(UnaryOp::Not)?,
            Mnemonic::UnaryConvert => self.unary(UnaryOp::Convert)?,
            Mnemonic::UnaryInvert => self.unary(UnaryOp::Invert)?,
            Mnemonic::BinaryPower => self.binary(BinaryOp::Pow)?,
            Mnemonic::BinaryMultiply => self.binary(BinaryOp::Mul)?,
            Mnemonic::BinaryDivide => self.binary(BinaryOp::Div)?,
            Mnemonic::BinaryModulo => self.binary(BinaryOp::Mod)?,
            Mnemonic::BinaryAdd => self.binary(BinaryOp::Add)?,
            Mnemonic::BinarySubtract => self.binary(BinaryOp::Sub)?,
            Mnemonic::BinaryFloorDivide => self.binary(BinaryOp::FloorDiv)?,
            Mnemonic::BinaryTrueDivide => self.binary(BinaryOp::TrueDiv)?,
            Mnemonic::BinaryLshift => self.binary(BinaryOp::LShift)?,
            Mnemonic::BinaryRshift => self.binary(BinaryOp::RShift)?,
            Mnemonic::BinaryAnd => self.binary(BinaryOp::And)?,
            Mnemonic::BinaryXor => self.binary(BinaryOp::Xor)?,
            Mnemonic::BinaryOr => self.binary(BinaryOp::Or)?,
            Mnemonic::InplacePower => self.inplace(BinaryOp::Pow)?,
            Mnemonic::InplaceMultiply => self.inplace(BinaryOp::Mul)?,
            Mnemonic::InplaceDivide => self.inplace(BinaryOp::Div)?,
            Mnemonic::InplaceModulo => self.inplace(BinaryOp::Mod)?,
            Mnemonic::InplaceAdd => self.inplace(BinaryOp::Add)?,
            Mnemonic::InplaceSubtract => self.inplace(BinaryOp::Sub)?,
            Mnemonic::InplaceFloorDivide => self.inplace(BinaryOp::FloorDiv)?,
            Mnemonic::InplaceTrueDivide => self.inplace(BinaryOp::TrueDiv)?,
            Mnemonic::InplaceLshift => self.inplace(BinaryOp::LShift)?,
            Mnemonic::InplaceRshift => self.inplace(BinaryOp::RShift)?,
            Mnemonic::InplaceAnd => self.inplace(BinaryOp::And)?,
            Mnemonic::InplaceXor => self.inplace(BinaryOp::Xor)?,
            Mnemonic::InplaceOr => self.inplace(BinaryOp::Or)?,
            Mnemonic::CompareOp => self.compare(operand.int()?)?,

            // ================================================================
            // Containers and subscripts
            // ================================================================
            Mnemonic::BinarySubscr => self.binary_subscr()?,
            Mnemonic::StoreSubscr => self.store_subscr()?,
            Mnemonic::DeleteSubscr => self.delete_subscr()?,
            Mnemonic::Slice0 => self.slice_op(false, false)?,
            Mnemonic::Slice1 => self.slice_op(true, false)?,
            Mnemonic::Slice2 => self.slice_op(false, true)?,
            Mnemonic::Slice3 => self.slice_op(true, true)?,
            Mnemonic::StoreSlice0 => self.store_slice(false, false)?,
            Mnemonic::StoreSlice1 => self.store_slice(true, false)?,
            Mnemonic::StoreSlice2 => self.store_slice(false, true)?,
            Mnemonic::StoreSlice3 => self.store_slice(true, true)?,
            Mnemonic::DeleteSlice0 => self.delete_slice(false, false)?,
            Mnemonic::DeleteSlice1 => self.delete_slice(true, false)?,
            Mnemonic::DeleteSlice2 => self.delete_slice(false, true)?,
            Mnemonic::DeleteSlice3 => self.delete_slice(true, true)?,
            Mnemonic::BuildSlice => self.build_slice(operand.int()?)?,
            Mnemonic::BuildTuple => self.build_tuple(operand.int()?)?,
            Mnemonic::BuildList => self.build_list(operand.int()?)?,
            Mnemonic::BuildSet => self.build_set(operand.int()?)?,
            Mnemonic::BuildMap => self.push(Value::new_dict(DictMap::default()))?,
            Mnemonic::StoreMap => self.store_map()?,
            Mnemonic::ListAppend => self.list_append(operand.int()?)?,
            Mnemonic::SetAdd => self.set_add(operand.int()?)?,
            Mnemonic::MapAdd => self.map_add(operand.int()?)?,
            Mnemonic::UnpackSequence => self.unpack_sequence(operand.int()?)?,

            // ================================================================
            // Iteration
            // ================================================================
            Mnemonic::GetIter => self.get_iter()?,
            Mnemonic::ForIter => self.for_iter(operand.jump()?)?,

            // ================================================================
            // Names
            // ================================================================
            Mnemonic::LoadName => self.load_name(operand.name()?)?,
            Mnemonic::StoreName => {
                let value = self.pop()?;
                self.current()?.locals.borrow_mut().insert(operand.name()?.clone(), value);
            }
            Mnemonic::DeleteName => {
                let name = operand.name()?;
                if self.current()?.locals.borrow_mut().remove(name).is_none() {
                    return Err(ExcType::name_error(name));
                }
            }
            Mnemonic::LoadGlobal => self.load_global(operand.name()?)?,
            Mnemonic::StoreGlobal => {
                let value = self.pop()?;
                self.current()?.globals.borrow_mut().insert(operand.name()?.clone(), value);
            }
            Mnemonic::DeleteGlobal => {
                let name = operand.name()?;
                if self.current()?.globals.borrow_mut().remove(name).is_none() {
                    return Err(ExcType::global_name_error(name));
                }
            }
            Mnemonic::LoadFast => {
                let name = operand.name()?;
                let value = self.current()?.locals.borrow().get(name).cloned();
                let value = value.ok_or_else(|| ExcType::unbound_local_error(name))?;
                self.push(value)?;
            }
            Mnemonic::StoreFast => {
                let value = self.pop()?;
                self.current()?.locals.borrow_mut().insert(operand.name()?.clone(), value);
            }
            Mnemonic::DeleteFast => {
                let name = operand.name()?;
                if self.current()?.locals.borrow_mut().remove(name).is_none() {
                    return Err(ExcType::unbound_local_error(name));
                }
            }
            Mnemonic::LoadClosure => {
                let cell = self.cell(operand.name()?)?;
                self.push(Value::Cell(cell))?;
            }
            Mnemonic::LoadDeref => self.load_deref(operand.name()?)?,
            Mnemonic::StoreDeref => {
                let name = operand.name()?;
                let value = self.pop()?;
                self.cell(name)?.set(value);
                self.tracer.on_cell_store(name);
            }
            Mnemonic::LoadLocals => {
                let locals = self.current()?.locals.borrow().to_dict();
                self.push(Value::new_dict(locals))?;
            }
            Mnemonic::LoadAttr => self.load_attr(operand.name()?)?,
            Mnemonic::StoreAttr => self.store_attr(operand.name()?)?,
            Mnemonic::DeleteAttr => self.delete_attr(operand.name()?)?,

            // ================================================================
            // Control flow
            // ================================================================
            Mnemonic::JumpForward | Mnemonic::JumpAbsolute => self.jump(operand.jump()?)?,
            Mnemonic::PopJumpIfFalse => {
                if !self.pop()?.py_bool() {
                    self.jump(operand.jump()?)?;
                }
            }
            Mnemonic::PopJumpIfTrue => {
                if self.pop()?.py_bool() {
                    self.jump(operand.jump()?)?;
                }
            }
            Mnemonic::JumpIfFalseOrPop => {
                if self.current()?.top()?.py_bool() {
                    self.pop()?;
                } else {
                    self.jump(operand.jump()?)?;
                }
            }
            Mnemonic::JumpIfTrueOrPop => {
                if self.current()?.top()?.py_bool() {
                    self.jump(operand.jump()?)?;
                } else {
                    self.pop()?;
                }
            }
            Mnemonic::SetupLoop => self.push_block(BlockKind::Loop, operand.jump()?)?,
            Mnemonic::SetupExcept => self.push_block(BlockKind::Except, operand.jump()?)?,
            Mnemonic::SetupFinally => self.push_block(BlockKind::Finally, operand.jump()?)?,
            Mnemonic::PopBlock => {
                self.current()?
                    .blocks
                    .pop()
                    .ok_or_else(|| RunError::internal("POP_BLOCK with an empty block stack"))?;
            }
            Mnemonic::BreakLoop => return Ok(Some(Why::Break)),
            Mnemonic::ContinueLoop => return Ok(Some(Why::Continue(operand.jump()?))),
            Mnemonic::EndFinally => return self.end_finally(),
            Mnemonic::RaiseVarargs => return self.raise_varargs(operand.int()?),
            Mnemonic::ReturnValue => {
                self.return_value = self.pop()?;
                return Ok(Some(Why::Return));
            }
            Mnemonic::YieldValue => {
                self.return_value = self.pop()?;
                self.tracer.on_yield(self.call_stack.len());
                return Ok(Some(Why::Yield));
            }

            // ================================================================
            // Functions, calls and classes
            // ================================================================
            Mnemonic::MakeFunction => self.make_function(operand.int()?, false)?,
            Mnemonic::MakeClosure => self.make_function(operand.int()?, true)?,
            Mnemonic::CallFunction
            | Mnemonic::CallFunctionVar
            | Mnemonic::CallFunctionKw
            | Mnemonic::CallFunctionVarKw => self.call_function(instr.mnemonic, operand.int()?)?,
            Mnemonic::BuildClass => self.build_class()?,

            // ================================================================
            // Print statement
            // ================================================================
            Mnemonic::PrintItem => self.print_item()?,
            Mnemonic::PrintNewline => {
                self.print_writer.stdout_push('\n')?;
                self.softspace = false;
            }
            Mnemonic::PrintExpr => {
                let value = self.pop()?;
                if !matches!(value, Value::None) {
                    self.print_writer.stdout_write(Cow::Owned(value.py_repr()))?;
                    self.print_writer.stdout_push('\n')?;
                }
                self.softspace = false;
            }

            Mnemonic::ExtendedArg => {
                return Err(RunError::internal("EXTENDED_ARG reached dispatch"));
            }
        }
        Ok(None)
    }

    // ========================================================================
    // Frame and stack helpers
    // ========================================================================

    fn current(&mut self) -> RunResult<&mut Frame> {
        let id = *self.call_stack.last().ok_or_else(no_frame)?;
        self.frames.get_mut(id).ok_or_else(no_frame)
    }

    fn current_ref(&self) -> RunResult<&Frame> {
        let id = *self.call_stack.last().ok_or_else(no_frame)?;
        self.frames.get(id).ok_or_else(no_frame)
    }

    fn push(&mut self, value: Value) -> RunResult<()> {
        self.current()?.push(value);
        Ok(())
    }

    fn pop(&mut self) -> RunResult<Value> {
        self.current()?.pop()
    }

    fn pop_n(&mut self, n: usize) -> RunResult<Vec<Value>> {
        self.current()?.pop_n(n)
    }

    /// Moves the top of the stack `n - 1` slots down: `[a, b, c]` becomes `[c, a, b]`.
    fn rotate(&mut self, n: usize) -> RunResult<()> {
        let stack = &mut self.current()?.stack;
        let start = stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| RunError::internal("operand stack underflow"))?;
        stack[start..].rotate_right(1);
        Ok(())
    }

    fn jump(&mut self, target: usize) -> RunResult<()> {
        self.current()?.pc = target;
        Ok(())
    }

    fn push_block(&mut self, kind: BlockKind, handler: usize) -> RunResult<()> {
        let frame = self.current()?;
        let level = frame.stack.len();
        frame.blocks.push(Block { kind, handler, level });
        Ok(())
    }

    // ========================================================================
    // Name resolution
    // ========================================================================

    /// `LOAD_NAME`: locals, then globals, then builtins.
    fn load_name(&mut self, name: &str) -> RunResult<()> {
        let frame = self.current_ref()?;
        let found = frame
            .locals
            .borrow()
            .get(name)
            .cloned()
            .or_else(|| frame.globals.borrow().get(name).cloned())
            .or_else(|| frame.builtins.get(name).cloned());
        let value = found.ok_or_else(|| ExcType::name_error(name))?;
        self.push(value)
    }

    /// `LOAD_GLOBAL`: globals, then builtins.
    fn load_global(&mut self, name: &str) -> RunResult<()> {
        let frame = self.current_ref()?;
        let found = frame
            .globals
            .borrow()
            .get(name)
            .cloned()
            .or_else(|| frame.builtins.get(name).cloned());
        let value = found.ok_or_else(|| ExcType::global_name_error(name))?;
        self.push(value)
    }

    fn cell(&self, name: &str) -> RunResult<Cell> {
        self.current_ref()?
            .cells
            .get(name)
            .cloned()
            .ok_or_else(|| RunError::internal(format!("no cell named '{name}' in frame")))
    }

    fn load_deref(&mut self, name: &str) -> RunResult<()> {
        let value = self.cell(name)?.get();
        self.tracer.on_cell_load(name);
        let Some(value) = value else {
            let is_own_cell = self.current_ref()?.code.cellvars().iter().any(|c| &**c == name);
            return Err(if is_own_cell {
                ExcType::unbound_local_error(name)
            } else {
                ExcType::name_error_free_variable(name)
            });
        };
        self.push(value)
    }

    // ========================================================================
    // Print statement
    // ========================================================================

    fn print_item(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        if self.softspace {
            self.print_writer.stdout_push(' ')?;
        }
        let text = value.py_str();
        // a string ending in a newline or tab suppresses the separator before the next item
        self.softspace = match (&value, text.chars().last()) {
            (Value::Str(_), Some(last)) => last == ' ' || !last.is_whitespace(),
            _ => true,
        };
        self.print_writer.stdout_write(Cow::Owned(text))?;
        Ok(())
    }
}

fn no_frame() -> RunError {
    RunError::internal("no frame is executing")
}
