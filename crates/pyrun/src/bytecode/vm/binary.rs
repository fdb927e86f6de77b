//! Arithmetic opcode handlers.

use super::VM;
use crate::{
    exception_private::RunResult,
    io::PrintWriter,
    operators::{BinaryOp, UnaryOp, binary_op, repeat_result_bytes, unary_op},
    resource::{LARGE_RESULT_THRESHOLD, ResourceTracker},
    tracer::VmTracer,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// `BINARY_*`: pops the right operand, then the left, and pushes `left op right`.
    pub(super) fn binary(&mut self, op: BinaryOp) -> RunResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        self.check_result_size(op, &lhs, &rhs)?;
        let result = binary_op(op, &lhs, &rhs)?;
        self.push(result)
    }

    /// Lets the tracker reject a sequence repetition before it is built.
    fn check_result_size(&self, op: BinaryOp, lhs: &Value, rhs: &Value) -> RunResult<()> {
        if let Some(estimated) = repeat_result_bytes(op, lhs, rhs)
            && estimated > LARGE_RESULT_THRESHOLD
        {
            self.tracker.check_large_result(estimated)?;
        }
        Ok(())
    }

    /// `INPLACE_*`: like [`binary`](Self::binary), except that `list += iterable`
    /// extends the list itself so every alias sees the new items.
    pub(super) fn inplace(&mut self, op: BinaryOp) -> RunResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        if op == BinaryOp::Add
            && let Value::List(list) = &lhs
        {
            let items = self.collect_iterable(&rhs)?;
            list.borrow_mut().extend(items);
            return self.push(lhs);
        }
        self.check_result_size(op, &lhs, &rhs)?;
        let result = binary_op(op, &lhs, &rhs)?;
        self.push(result)
    }

    pub(super) fn unary(&mut self, op: UnaryOp) -> RunResult<()> {
        let value = self.pop()?;
        let result = unary_op(op, &value)?;
        self.push(result)
    }
}
