//! Generator resumption and the iteration protocol.

use std::{cell::RefCell, iter, rc::Rc};

use super::VM;
use crate::{
    exception_private::{ExcType, RunError, RunResult},
    frame::Frame,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{Generator, GeneratorState, SeqIter},
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// Drives `generator` to its next yield, sending `sent` as the value of the
    /// suspended `yield` expression.
    ///
    /// Returns the yielded value. A generator that returns raises `StopIteration`
    /// carrying the return value (if not `None`); one that raises finishes and
    /// propagates the exception.
    pub(super) fn advance(&mut self, generator: &Rc<RefCell<Generator>>, sent: Value) -> RunResult<Value> {
        let state = generator.borrow().state;
        match state {
            GeneratorState::New if !matches!(sent, Value::None) => {
                return Err(ExcType::generator_send_not_started());
            }
            GeneratorState::Running => return Err(ExcType::generator_already_executing()),
            GeneratorState::Finished => return Err(ExcType::stop_iteration(None)),
            GeneratorState::New | GeneratorState::Suspended => {}
        }
        self.tracker.check_recursion_depth(self.call_stack.len())?;

        let mut frame = {
            let mut generator = generator.borrow_mut();
            let frame = generator
                .frame
                .take()
                .ok_or_else(|| RunError::internal("suspended generator has no frame"))?;
            generator.state = GeneratorState::Running;
            frame
        };
        if state == GeneratorState::Suspended {
            frame.push(sent);
        }

        let result = self.resume_frame(frame);
        let mut generator = generator.borrow_mut();
        match result {
            Ok((value, frame)) if frame.running => {
                generator.state = GeneratorState::Suspended;
                generator.frame = Some(frame);
                Ok(value)
            }
            Ok((value, _)) => {
                generator.state = GeneratorState::Finished;
                Err(ExcType::stop_iteration((!matches!(value, Value::None)).then_some(value)))
            }
            Err(err) => {
                generator.state = GeneratorState::Finished;
                Err(err)
            }
        }
    }

    /// Re-enters an existing frame at its saved cursor with its saved operand stack,
    /// linking it under whichever frame is current now.
    fn resume_frame(&mut self, frame: Frame) -> RunResult<(Value, Frame)> {
        self.run_frame(frame)
    }

    /// Returns the next item of an iterator or generator, or `None` when exhausted.
    pub(super) fn iter_next(&mut self, iterator: &Value) -> RunResult<Option<Value>> {
        match iterator {
            Value::Iterator(iter) => Ok(iter.borrow_mut().next_value()),
            Value::Generator(generator) => match self.advance(generator, Value::None) {
                Ok(value) => Ok(Some(value)),
                Err(err) if err.is_exc_type(ExcType::StopIteration) => Ok(None),
                Err(err) => Err(err),
            },
            other => Err(ExcType::type_error(format!(
                "{} object is not an iterator",
                other.type_name()
            ))),
        }
    }

    /// Collects every item of an iterable, driving generators to exhaustion.
    pub(super) fn collect_iterable(&mut self, iterable: &Value) -> RunResult<Vec<Value>> {
        match iterable {
            Value::List(list) => Ok(list.borrow().clone()),
            Value::Tuple(items) => Ok(items.to_vec()),
            Value::Generator(_) | Value::Iterator(_) => {
                let mut items = Vec::new();
                while let Some(item) = self.iter_next(iterable)? {
                    items.push(item);
                }
                Ok(items)
            }
            other => {
                let mut iter = SeqIter::new(other)?;
                Ok(iter::from_fn(|| iter.next_value()).collect())
            }
        }
    }

    /// `GET_ITER`: replaces the top of the stack with an iterator over it.
    pub(super) fn get_iter(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        let iter = make_iter(value)?;
        self.push(iter)
    }

    /// `FOR_ITER`: pushes the next item of the iterator on top of the stack, or pops
    /// the exhausted iterator and jumps to `target`.
    pub(super) fn for_iter(&mut self, target: usize) -> RunResult<()> {
        let iterator = self.current()?.top()?.clone();
        match self.iter_next(&iterator)? {
            Some(item) => self.push(item),
            None => {
                self.pop()?;
                self.jump(target)
            }
        }
    }
}

/// Returns `value` itself if it is already an iterator, else a new iterator over it.
pub(super) fn make_iter(value: Value) -> RunResult<Value> {
    match value {
        Value::Generator(_) | Value::Iterator(_) => Ok(value),
        other => Ok(Value::Iterator(Rc::new(RefCell::new(SeqIter::new(&other)?)))),
    }
}
