//! Exception raising, the block-stack unwinder, and conversion to host errors.

use std::{mem, rc::Rc};

use super::{VM, compare::exception_matches};
use crate::{
    args::ArgValues,
    exception_private::{ExcType, ExceptionRaise, RunError, RunResult},
    exception_public::{Exception, ExecError},
    frame::{BlockKind, Why},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// Turns an error from one instruction into an unwind reason.
    ///
    /// The current frame is added to the traceback. Catchable exceptions are stored as
    /// the current exception and unwind through the block stack; internal errors and
    /// exhausted budgets propagate straight out.
    pub(super) fn handle_error(&mut self, err: RunError) -> RunResult<Why> {
        match err {
            RunError::Internal(_) => Err(err),
            RunError::UncatchableExc(mut raise) => {
                self.add_traceback_entry(&mut raise)?;
                Err(RunError::UncatchableExc(raise))
            }
            RunError::Exc(mut raise) => {
                self.add_traceback_entry(&mut raise)?;
                self.tracer
                    .on_exception(&class_name(&raise.exc_type), self.call_stack.len());
                self.last_exception = Some(*raise);
                Ok(Why::Exception)
            }
        }
    }

    fn add_traceback_entry(&self, raise: &mut ExceptionRaise) -> RunResult<()> {
        let entry = self.current_ref()?.stack_frame();
        let outer = raise.traceback.take().unwrap_or_default().with_outer(entry);
        raise.traceback = Some(Rc::new(outer));
        Ok(())
    }

    /// Lets the innermost block react to `why`.
    ///
    /// Returns `None` once a handler has taken over (the cursor now points at it), or
    /// the reason to keep unwinding with.
    pub(super) fn manage_block_stack(&mut self, why: Why) -> RunResult<Option<Why>> {
        let frame = self.current()?;
        let block = *frame
            .blocks
            .last()
            .ok_or_else(|| RunError::internal("unwinding with an empty block stack"))?;

        if block.kind == BlockKind::Loop
            && let Why::Continue(target) = why
        {
            frame.pc = target;
            return Ok(None);
        }

        frame.blocks.pop();
        frame.unwind_to(block.level);

        match (block.kind, why) {
            (BlockKind::Loop, Why::Break) => {
                frame.pc = block.handler;
                Ok(None)
            }
            (BlockKind::Finally | BlockKind::Except, Why::Exception) => {
                let raise = self
                    .last_exception
                    .clone()
                    .ok_or_else(|| RunError::internal("exception unwinding without an exception"))?;
                let frame = self.current()?;
                frame.push(raise.traceback.map_or(Value::None, Value::Traceback));
                frame.push(raise.value);
                frame.push(raise.exc_type);
                frame.pc = block.handler;
                Ok(None)
            }
            (BlockKind::Finally, _) => {
                if why == Why::Return {
                    let value = mem::replace(&mut self.return_value, Value::None);
                    self.push(value)?;
                }
                let frame = self.current()?;
                frame.push(Value::Unwind(why));
                frame.pc = block.handler;
                Ok(None)
            }
            _ => Ok(Some(why)),
        }
    }

    /// `END_FINALLY`: resumes whatever unwind the `finally` or unmatched `except`
    /// interrupted, as recorded on the stack by [`manage_block_stack`](Self::manage_block_stack).
    pub(super) fn end_finally(&mut self) -> RunResult<Option<Why>> {
        match self.pop()? {
            Value::None => Ok(None),
            Value::Unwind(why) => {
                if why == Why::Return {
                    self.return_value = self.pop()?;
                }
                Ok(Some(why))
            }
            exc_type if exc_type.is_exception_class() => {
                let value = self.pop()?;
                let traceback = match self.pop()? {
                    Value::Traceback(tb) => Some(tb),
                    _ => None,
                };
                self.last_exception = Some(ExceptionRaise {
                    exc_type,
                    value,
                    traceback,
                });
                Ok(Some(Why::Reraise))
            }
            other => Err(RunError::internal(format!(
                "END_FINALLY found unexpected {} on the stack",
                other.type_name()
            ))),
        }
    }

    /// `RAISE_VARARGS`: `raise`, `raise E`, `raise E, V`, or `raise E, V, TB`.
    pub(super) fn raise_varargs(&mut self, argc: usize) -> RunResult<Option<Why>> {
        let (exc, value, traceback) = match argc {
            0 => {
                return match self.last_exception {
                    Some(_) => Ok(Some(Why::Reraise)),
                    None => Err(ExcType::type_error(
                        "exceptions must be old-style classes or derived from BaseException, not NoneType",
                    )),
                };
            }
            1 => (self.pop()?, Value::None, Value::None),
            2 => {
                let value = self.pop()?;
                (self.pop()?, value, Value::None)
            }
            3 => {
                let traceback = self.pop()?;
                let value = self.pop()?;
                (self.pop()?, value, traceback)
            }
            n => return Err(RunError::internal(format!("RAISE_VARARGS with {n} arguments"))),
        };

        let (exc_type, value) = self.normalize_exception(exc, value)?;
        match traceback {
            Value::None => Err(RunError::Exc(Box::new(ExceptionRaise {
                exc_type,
                value,
                traceback: None,
            }))),
            Value::Traceback(tb) => {
                self.last_exception = Some(ExceptionRaise {
                    exc_type,
                    value,
                    traceback: Some(tb),
                });
                Ok(Some(Why::Reraise))
            }
            _ => Err(ExcType::type_error("raise: arg 3 must be a traceback or None")),
        }
    }

    /// Resolves the operands of `raise` into an exception class and an instance of it.
    fn normalize_exception(&mut self, exc: Value, value: Value) -> RunResult<(Value, Value)> {
        if exc.is_exception_class() {
            if let Some(value_class) = value.exception_class()
                && exception_matches(&value_class, &exc)
            {
                return Ok((value_class, value));
            }
            let args = match value {
                Value::None => Vec::new(),
                Value::Tuple(items) => items.to_vec(),
                other => vec![other],
            };
            let instance = self.call_value(&exc, ArgValues::new(args, Vec::new()))?;
            let exc_type = instance.exception_class().unwrap_or(exc);
            return Ok((exc_type, instance));
        }
        if let Some(exc_type) = exc.exception_class() {
            if !matches!(value, Value::None) {
                return Err(ExcType::type_error("instance exception may not have a separate value"));
            }
            return Ok((exc_type, exc));
        }
        Err(ExcType::type_error(format!(
            "exceptions must be old-style classes or derived from BaseException, not {}",
            exc.type_name()
        )))
    }
}

/// Converts an error that escaped the outermost frame into the host-facing form.
pub(super) fn exec_error(err: RunError) -> ExecError {
    match err {
        RunError::Internal(msg) => ExecError::Internal(msg.into_owned()),
        RunError::Exc(raise) | RunError::UncatchableExc(raise) => ExecError::Raised(public_exception(&raise)),
    }
}

fn public_exception(raise: &ExceptionRaise) -> Exception {
    let exc_type = match &raise.exc_type {
        Value::ExcType(exc_type) => *exc_type,
        Value::Class(cls) => cls.exception_base().unwrap_or(ExcType::Exception),
        _ => ExcType::Exception,
    };
    let message = raise.value.py_str();
    Exception::with_details(
        exc_type,
        class_name(&raise.exc_type),
        (!message.is_empty()).then_some(message),
        raise
            .traceback
            .as_ref()
            .map(|tb| tb.frames().to_vec())
            .unwrap_or_default(),
    )
}

fn class_name(exc_type: &Value) -> String {
    match exc_type {
        Value::ExcType(exc_type) => exc_type.to_string(),
        Value::Class(cls) => cls.name().to_owned(),
        other => other.type_name().to_owned(),
    }
}
