//! Activation records, the block stack, and the frame arena.

use std::rc::Rc;

use ahash::AHashMap;

use crate::{
    builtins::Builtins,
    bytecode::Code,
    exception_private::{RunError, RunResult},
    exception_public::StackFrame,
    namespace::Scope,
    types::Cell,
    value::Value,
};

/// Why the block stack is unwinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Why {
    /// `RETURN_VALUE`; the value is held in the VM's return register.
    Return,
    /// `YIELD_VALUE`; the frame is suspended, not unwound.
    Yield,
    /// An exception is propagating.
    Exception,
    /// An exception re-raised with its existing traceback. Becomes `Exception`
    /// before any handler sees it.
    Reraise,
    /// `BREAK_LOOP`.
    Break,
    /// `CONTINUE_LOOP` from inside a `try`; carries the loop's jump target.
    Continue(usize),
}

/// The kind of a block pushed by one of the `SETUP_*` instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Loop,
    Except,
    Finally,
}

/// A region of bytecode with its own control-flow handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
    pub kind: BlockKind,
    /// Byte offset to jump to when the block handles an unwind.
    pub handler: usize,
    /// Operand stack depth when the block was entered.
    pub level: usize,
}

/// One activation of a code object.
#[derive(Debug)]
pub(crate) struct Frame {
    pub code: Rc<Code>,
    pub stack: Vec<Value>,
    pub locals: Scope,
    pub globals: Scope,
    pub builtins: Rc<Builtins>,
    /// Cell and free variables by name.
    pub cells: AHashMap<Rc<str>, Cell>,
    pub blocks: Vec<Block>,
    /// Byte offset of the next instruction to execute.
    pub pc: usize,
    /// Byte offset of the instruction currently executing.
    pub last_offset: usize,
    pub parent: Option<FrameId>,
    /// Cleared once the frame leaves with a return; a generator frame that stops
    /// with this still set has yielded rather than finished.
    pub running: bool,
}

impl Frame {
    pub fn new(code: Rc<Code>, globals: Scope, locals: Scope, builtins: Rc<Builtins>) -> Self {
        Self {
            code,
            stack: Vec::new(),
            locals,
            globals,
            builtins,
            cells: AHashMap::new(),
            blocks: Vec::new(),
            pc: 0,
            last_offset: 0,
            parent: None,
            running: true,
        }
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> RunResult<Value> {
        self.stack.pop().ok_or_else(stack_underflow)
    }

    /// Pops `n` values, returned in the order they were pushed.
    pub fn pop_n(&mut self, n: usize) -> RunResult<Vec<Value>> {
        let len = self.stack.len();
        if n > len {
            return Err(stack_underflow());
        }
        Ok(self.stack.split_off(len - n))
    }

    /// Returns the value `depth` slots from the top, with 1 being the top itself.
    pub fn peek(&self, depth: usize) -> RunResult<&Value> {
        self.stack
            .len()
            .checked_sub(depth)
            .filter(|_| depth > 0)
            .and_then(|index| self.stack.get(index))
            .ok_or_else(stack_underflow)
    }

    pub fn top(&self) -> RunResult<&Value> {
        self.peek(1)
    }

    /// Pops everything above `level`.
    pub fn unwind_to(&mut self, level: usize) {
        self.stack.truncate(level);
    }

    /// Traceback entry for the instruction currently executing.
    pub fn stack_frame(&self) -> StackFrame {
        StackFrame {
            filename: self.code.filename().to_owned(),
            name: self.code.name().to_owned(),
            offset: self.last_offset,
        }
    }
}

fn stack_underflow() -> RunError {
    RunError::internal("operand stack underflow")
}

/// Index of a frame in the [`FrameArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct FrameId(usize);

/// Owner of all live frames.
///
/// Parent links are arena indices, so frames never hold references to each other.
/// Slots are reused once a frame is removed.
#[derive(Debug, Default)]
pub(crate) struct FrameArena {
    slots: Vec<Option<Frame>>,
    free: Vec<usize>,
}

impl FrameArena {
    pub fn insert(&mut self, frame: Frame) -> FrameId {
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(frame);
            FrameId(index)
        } else {
            self.slots.push(Some(frame));
            FrameId(self.slots.len() - 1)
        }
    }

    pub fn remove(&mut self, id: FrameId) -> Option<Frame> {
        let frame = self.slots.get_mut(id.0)?.take();
        if frame.is_some() {
            self.free.push(id.0);
        }
        frame
    }

    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.slots.get(id.0)?.as_ref()
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        self.slots.get_mut(id.0)?.as_mut()
    }

    /// Number of live frames.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bytecode::UnitBuilder, namespace::new_scope};

    fn frame() -> Frame {
        let code = Code::decode(&UnitBuilder::new("<module>").build()).unwrap();
        let globals = new_scope();
        Frame::new(Rc::new(code), globals.clone(), globals, Rc::new(Builtins::default()))
    }

    #[test]
    fn test_operand_stack() {
        let mut f = frame();
        for i in 1..=4 {
            f.push(Value::Int(i));
        }
        assert!(matches!(f.top(), Ok(Value::Int(4))));
        assert!(matches!(f.peek(3), Ok(Value::Int(2))));
        assert!(f.peek(0).is_err());
        assert!(f.peek(5).is_err());

        let popped: Vec<String> = f.pop_n(2).unwrap().iter().map(Value::py_repr).collect();
        assert_eq!(popped, vec!["3", "4"]);
        assert!(f.pop_n(3).is_err());
        f.unwind_to(1);
        assert!(matches!(f.pop(), Ok(Value::Int(1))));
        assert!(matches!(f.pop(), Err(RunError::Internal(_))));
    }

    #[test]
    fn test_arena_reuses_slots() {
        let mut arena = FrameArena::default();
        let a = arena.insert(frame());
        let b = arena.insert(frame());
        assert_eq!(arena.len(), 2);
        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none());
        assert!(arena.get(a).is_none());
        let c = arena.insert(frame());
        assert_eq!(c, a);
        assert!(arena.get(b).is_some());
        assert_eq!(arena.len(), 2);
    }
}
