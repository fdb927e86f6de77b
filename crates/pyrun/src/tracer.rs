//! Execution tracing hooks for the VM.
//!
//! The VM is parameterized as `VM<'a, T: ResourceTracker, P: PrintWriter, Tr: VmTracer>`,
//! so the tracer is chosen at construction time and monomorphized in. With
//! [`NoopTracer`] every hook inlines to nothing.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op default |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`ProfilingTracer`] | Per-mnemonic counts, call totals and depth |
//! | [`RecordingTracer`] | Full event list for post-mortem inspection |
//!
//! ```ignore
//! let mut print = StdPrint;
//! let mut vm = VM::new(Builtins::default(), NoLimitTracker, &mut print, ProfilingTracer::new());
//! vm.run_code(&unit)?;
//! println!("{}", vm.tracer().report());
//! ```

use std::fmt;

use ahash::AHashMap;

use crate::bytecode::Mnemonic;

/// Trace event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// An instruction was dispatched.
    Instruction {
        /// Byte offset of the instruction in its code object.
        offset: usize,
        mnemonic: Mnemonic,
        /// Operand stack depth of the current frame before dispatch.
        stack_depth: usize,
    },
    /// A function frame was pushed.
    Call { name: String, depth: usize },
    /// A function frame returned normally.
    Return { depth: usize },
    /// A generator frame suspended at `YIELD_VALUE`.
    Yield { depth: usize },
    /// An exception started unwinding a frame.
    Exception { exc_type: String, depth: usize },
    /// A cell or free variable was read.
    CellLoad { name: String },
    /// A cell or free variable was written.
    CellStore { name: String },
    /// `MAKE_FUNCTION` or `MAKE_CLOSURE` created a function.
    MakeFunction { cell_count: usize, defaults_count: usize },
}

/// Hooks called by the VM at key execution events.
///
/// Every method has an empty default, so implementations override only what they need.
pub trait VmTracer: fmt::Debug {
    /// Called before each instruction is dispatched.
    ///
    /// This is the hottest hook; keep implementations light.
    ///
    /// # Arguments
    /// * `offset` - Byte offset of the instruction
    /// * `mnemonic` - The instruction about to execute
    /// * `stack_depth` - Operand stack depth of the current frame
    /// * `frame_depth` - Number of frames on the call stack
    #[inline(always)]
    fn on_instruction(&mut self, _offset: usize, _mnemonic: Mnemonic, _stack_depth: usize, _frame_depth: usize) {}

    /// Called after a function frame is pushed, with the call stack depth after the push.
    #[inline(always)]
    fn on_call(&mut self, _name: &str, _depth: usize) {}

    /// Called when a function frame returns a value.
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// Called when a generator frame yields.
    #[inline(always)]
    fn on_yield(&mut self, _depth: usize) {}

    /// Called when an exception begins unwinding the current frame.
    #[inline(always)]
    fn on_exception(&mut self, _exc_type: &str, _depth: usize) {}

    #[inline(always)]
    fn on_cell_load(&mut self, _name: &str) {}

    #[inline(always)]
    fn on_cell_store(&mut self, _name: &str) {}

    /// Called when a function object is created.
    ///
    /// # Arguments
    /// * `cell_count` - Number of captured cells (0 for `MAKE_FUNCTION`)
    /// * `defaults_count` - Number of default argument values
    #[inline(always)]
    fn on_make_function(&mut self, _cell_count: usize, _defaults_count: usize) {}
}

// ============================================================================
// NoopTracer
// ============================================================================

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

// ============================================================================
// StderrTracer
// ============================================================================

/// Tracer that prints a readable execution log to stderr.
///
/// ```text
/// [    0] LOAD_CONST           stack=0  frames=1
/// [    3] MAKE_FUNCTION        stack=1  frames=1
///   +++ MAKE FUNCTION defaults=0
///   >>> CALL f                    depth=2
///   <<< RETURN                    depth=1
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Stop logging after this many instructions. `None` is unlimited.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that goes quiet after `limit` instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl VmTracer for StderrTracer {
    #[inline]
    fn on_instruction(&mut self, offset: usize, mnemonic: Mnemonic, stack_depth: usize, frame_depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("[{offset:>5}] {:<20} stack={stack_depth}  frames={frame_depth}", mnemonic.to_string());
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        if !self.stopped {
            eprintln!("  >>> CALL {name:<20} depth={depth}");
        }
    }

    fn on_return(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  <<< RETURN                    depth={depth}");
        }
    }

    fn on_yield(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  <<< YIELD                     depth={depth}");
        }
    }

    fn on_exception(&mut self, exc_type: &str, depth: usize) {
        if !self.stopped {
            eprintln!("  !!! RAISE {exc_type:<19} depth={depth}");
        }
    }

    fn on_cell_load(&mut self, name: &str) {
        if !self.stopped {
            eprintln!("  ... CELL LOAD  {name}");
        }
    }

    fn on_cell_store(&mut self, name: &str) {
        if !self.stopped {
            eprintln!("  ... CELL STORE {name}");
        }
    }

    fn on_make_function(&mut self, cell_count: usize, defaults_count: usize) {
        if self.stopped {
            return;
        }
        if cell_count > 0 {
            eprintln!("  +++ MAKE CLOSURE  cells={cell_count} defaults={defaults_count}");
        } else {
            eprintln!("  +++ MAKE FUNCTION defaults={defaults_count}");
        }
    }
}

// ============================================================================
// ProfilingTracer
// ============================================================================

/// Tracer that counts what the VM did.
///
/// Retrieve results via [`ProfilingTracer::report`] after execution.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    mnemonic_counts: AHashMap<Mnemonic, u64>,
    total_instructions: u64,
    max_depth: usize,
    total_calls: u64,
    total_yields: u64,
    total_exceptions: u64,
}

/// Summary produced by [`ProfilingTracer::report`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilingReport {
    /// Per-mnemonic execution counts, most frequent first; ties are ordered by name.
    pub mnemonic_counts: Vec<(Mnemonic, u64)>,
    pub total_instructions: u64,
    /// Deepest call stack observed, counting the module frame.
    pub max_depth: usize,
    pub total_calls: u64,
    pub total_yields: u64,
    pub total_exceptions: u64,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        let mut mnemonic_counts: Vec<_> = self.mnemonic_counts.iter().map(|(&k, &v)| (k, v)).collect();
        mnemonic_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.to_string().cmp(&b.0.to_string())));
        ProfilingReport {
            mnemonic_counts,
            total_instructions: self.total_instructions,
            max_depth: self.max_depth,
            total_calls: self.total_calls,
            total_yields: self.total_yields,
            total_exceptions: self.total_exceptions,
        }
    }
}

impl VmTracer for ProfilingTracer {
    #[inline]
    fn on_instruction(&mut self, _offset: usize, mnemonic: Mnemonic, _stack_depth: usize, frame_depth: usize) {
        *self.mnemonic_counts.entry(mnemonic).or_insert(0) += 1;
        self.total_instructions += 1;
        self.max_depth = self.max_depth.max(frame_depth);
    }

    fn on_call(&mut self, _name: &str, depth: usize) {
        self.total_calls += 1;
        self.max_depth = self.max_depth.max(depth);
    }

    fn on_yield(&mut self, _depth: usize) {
        self.total_yields += 1;
    }

    fn on_exception(&mut self, _exc_type: &str, _depth: usize) {
        self.total_exceptions += 1;
    }
}

impl fmt::Display for ProfilingReport {
    #[expect(clippy::cast_precision_loss, reason = "percentages only need to be approximate")]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== VM Profiling Report ===")?;
        writeln!(f, "Total instructions: {}", self.total_instructions)?;
        writeln!(f, "Total calls:        {}", self.total_calls)?;
        writeln!(f, "Total yields:       {}", self.total_yields)?;
        writeln!(f, "Exceptions raised:  {}", self.total_exceptions)?;
        writeln!(f, "Max call depth:     {}", self.max_depth)?;
        writeln!(f)?;
        writeln!(f, "--- Mnemonic Frequency ---")?;
        for (mnemonic, count) in &self.mnemonic_counts {
            let pct = (*count as f64 / self.total_instructions.max(1) as f64) * 100.0;
            writeln!(f, "  {:<20} {count:>10}  ({pct:>5.1}%)", mnemonic.to_string())?;
        }
        Ok(())
    }
}

// ============================================================================
// RecordingTracer
// ============================================================================

/// Tracer that records every event in order.
///
/// Allocates per event, so keep it to short runs or set a limit.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_none_or(|limit| self.events.len() < limit) {
            self.events.push(event);
        }
    }
}

impl VmTracer for RecordingTracer {
    #[inline]
    fn on_instruction(&mut self, offset: usize, mnemonic: Mnemonic, stack_depth: usize, _frame_depth: usize) {
        self.record(TraceEvent::Instruction {
            offset,
            mnemonic,
            stack_depth,
        });
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        self.record(TraceEvent::Call {
            name: name.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.record(TraceEvent::Return { depth });
    }

    fn on_yield(&mut self, depth: usize) {
        self.record(TraceEvent::Yield { depth });
    }

    fn on_exception(&mut self, exc_type: &str, depth: usize) {
        self.record(TraceEvent::Exception {
            exc_type: exc_type.to_owned(),
            depth,
        });
    }

    fn on_cell_load(&mut self, name: &str) {
        self.record(TraceEvent::CellLoad { name: name.to_owned() });
    }

    fn on_cell_store(&mut self, name: &str) {
        self.record(TraceEvent::CellStore { name: name.to_owned() });
    }

    fn on_make_function(&mut self, cell_count: usize, defaults_count: usize) {
        self.record(TraceEvent::MakeFunction {
            cell_count,
            defaults_count,
        });
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_recording_limit() {
        let mut tracer = RecordingTracer::with_limit(2);
        tracer.on_call("f", 2);
        tracer.on_cell_load("x");
        tracer.on_return(1);
        assert_eq!(
            tracer.events(),
            &[
                TraceEvent::Call {
                    name: "f".to_owned(),
                    depth: 2
                },
                TraceEvent::CellLoad { name: "x".to_owned() },
            ]
        );
    }

    #[test]
    fn test_profiling_report_orders_by_count() {
        let mut tracer = ProfilingTracer::new();
        tracer.on_instruction(0, Mnemonic::LoadConst, 0, 1);
        tracer.on_instruction(3, Mnemonic::PopTop, 1, 1);
        tracer.on_instruction(4, Mnemonic::LoadConst, 0, 1);
        tracer.on_call("f", 3);
        let report = tracer.report();
        assert_eq!(report.total_instructions, 3);
        assert_eq!(report.mnemonic_counts[0], (Mnemonic::LoadConst, 2));
        assert_eq!(report.max_depth, 3);
        assert_eq!(report.total_calls, 1);
    }
}
