/// Resource limits and the tracer hooks.
use pretty_assertions::assert_eq;
use pyrun::{
    Builtins, CollectStringPrint, CompareOp, CompiledUnit, ExcType, Exception, LimitedTracker, Mnemonic, NoLimitTracker,
    NoPrint, ProfilingTracer, RecordingTracer, ResourceLimits, ResourceTracker, TraceEvent, UnitBuilder, VM, VmTracer,
};

fn finish(b: &mut UnitBuilder) -> CompiledUnit {
    b.load_const(()).emit(Mnemonic::ReturnValue);
    b.build()
}

/// `def f(): return f()` followed by a call to `f`, optionally inside
/// `try: ... except RuntimeError: print 'deep'`.
fn runaway_recursion(catch: bool) -> CompiledUnit {
    let mut f = UnitBuilder::new("f");
    f.args(&[]).name_op(Mnemonic::LoadGlobal, "f").call(Mnemonic::CallFunction, 0, 0);
    f.emit(Mnemonic::ReturnValue);

    let mut b = UnitBuilder::new("<module>");
    b.load_const(f.build()).emit_arg(Mnemonic::MakeFunction, 0).name_op(Mnemonic::StoreName, "f");
    if catch {
        let (handler, reraise, end) = (b.new_label(), b.new_label(), b.new_label());
        b.jump(Mnemonic::SetupExcept, handler);
        b.name_op(Mnemonic::LoadName, "f").call(Mnemonic::CallFunction, 0, 0).emit(Mnemonic::PopTop);
        b.emit(Mnemonic::PopBlock).jump(Mnemonic::JumpForward, end);
        b.bind(handler).emit(Mnemonic::DupTop).name_op(Mnemonic::LoadName, "RuntimeError");
        b.compare(CompareOp::ExceptionMatch).jump(Mnemonic::PopJumpIfFalse, reraise);
        b.emit(Mnemonic::PopTop).emit(Mnemonic::PopTop).emit(Mnemonic::PopTop);
        b.load_const("deep").emit(Mnemonic::PrintItem).emit(Mnemonic::PrintNewline);
        b.jump(Mnemonic::JumpForward, end);
        b.bind(reraise).emit(Mnemonic::EndFinally);
        b.bind(end);
    } else {
        b.name_op(Mnemonic::LoadName, "f").call(Mnemonic::CallFunction, 0, 0).emit(Mnemonic::PopTop);
    }
    finish(&mut b)
}

fn limited(depth: usize) -> LimitedTracker {
    LimitedTracker::new(ResourceLimits::new().max_recursion_depth(Some(depth)))
}

/// Unbounded recursion stops with RecursionError once the depth limit is reached.
#[test]
fn recursion_limit_raises_recursion_error() {
    let mut print = NoPrint;
    let mut vm = VM::new(Builtins::default(), limited(20), &mut print, RecordingTracer::new());
    let err = vm.run_code(&runaway_recursion(false)).unwrap_err();
    let exc = err.exception().expect("RecursionError expected");
    assert_eq!(exc.exc_type(), ExcType::RecursionError);
    assert_eq!(exc.message(), Some("maximum recursion depth exceeded"));
    // one entry for the module and one per active `f` frame
    assert_eq!(exc.traceback().len(), 20);
    let calls = vm
        .tracer()
        .events()
        .iter()
        .filter(|event| matches!(event, TraceEvent::Call { .. }))
        .count();
    assert_eq!(calls, 19);
}

/// RecursionError is an ordinary exception and can be caught.
#[test]
fn recursion_error_is_catchable() {
    let mut print = CollectStringPrint::new();
    let result = {
        let mut vm = VM::new(Builtins::default(), limited(20), &mut print, pyrun::NoopTracer);
        vm.run_code(&runaway_recursion(true))
    };
    assert!(result.is_ok());
    assert_eq!(print.output(), "deep\n");
}

/// An infinite loop stops with TimeoutError, and `except` cannot swallow it.
///
/// ```python
/// try:
///     while True: pass
/// except BaseException:
///     print 'caught'
/// ```
#[test]
fn operation_limit_is_uncatchable() {
    let mut b = UnitBuilder::new("<module>");
    let (handler, end, top) = (b.new_label(), b.new_label(), b.new_label());
    b.jump(Mnemonic::SetupExcept, handler);
    b.bind(top).jump(Mnemonic::JumpAbsolute, top);
    b.bind(handler);
    b.emit(Mnemonic::PopTop).emit(Mnemonic::PopTop).emit(Mnemonic::PopTop);
    b.load_const("caught").emit(Mnemonic::PrintItem).emit(Mnemonic::PrintNewline);
    b.bind(end);
    let unit = finish(&mut b);

    let tracker = LimitedTracker::new(ResourceLimits::new().max_operations(100));
    let mut print = CollectStringPrint::new();
    let (result, operations) = {
        let mut vm = VM::new(Builtins::default(), tracker, &mut print, pyrun::NoopTracer);
        let result = vm.run_code(&unit);
        (result, vm.tracker().operation_count())
    };
    assert_eq!(print.output(), "");
    let err = result.unwrap_err();
    assert_eq!(err.exception().map(Exception::exc_type), Some(ExcType::TimeoutError));
    assert_eq!(operations, Some(101));
}

/// The recording tracer sees instructions, calls, returns and function creation in order.
#[test]
fn recording_tracer_events() {
    let mut f = UnitBuilder::new("f");
    f.args(&[]).load_const(1).emit(Mnemonic::ReturnValue);
    let mut b = UnitBuilder::new("<module>");
    b.load_const(f.build()).emit_arg(Mnemonic::MakeFunction, 0).name_op(Mnemonic::StoreName, "f");
    b.name_op(Mnemonic::LoadName, "f").call(Mnemonic::CallFunction, 0, 0).emit(Mnemonic::PopTop);
    let unit = finish(&mut b);

    let mut print = NoPrint;
    let mut vm = VM::new(Builtins::default(), limited(10), &mut print, RecordingTracer::new());
    vm.run_code(&unit).unwrap();
    let events = vm.into_tracer().into_events();

    let mnemonics: Vec<Mnemonic> = events
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Instruction { mnemonic, .. } => Some(*mnemonic),
            _ => None,
        })
        .collect();
    assert_eq!(
        mnemonics,
        vec![
            Mnemonic::LoadConst,
            Mnemonic::MakeFunction,
            Mnemonic::StoreName,
            Mnemonic::LoadName,
            Mnemonic::CallFunction,
            Mnemonic::LoadConst,
            Mnemonic::ReturnValue,
            Mnemonic::PopTop,
            Mnemonic::LoadConst,
            Mnemonic::ReturnValue,
        ]
    );
    let others: Vec<&TraceEvent> = events
        .iter()
        .filter(|event| !matches!(event, TraceEvent::Instruction { .. }))
        .collect();
    assert_eq!(
        others,
        vec![
            &TraceEvent::MakeFunction {
                cell_count: 0,
                defaults_count: 0
            },
            &TraceEvent::Call {
                name: "f".to_owned(),
                depth: 2
            },
            &TraceEvent::Return { depth: 1 },
        ]
    );
    assert_eq!(
        events[0],
        TraceEvent::Instruction {
            offset: 0,
            mnemonic: Mnemonic::LoadConst,
            stack_depth: 0
        }
    );
}

/// A custom tracer only overrides the hooks it cares about.
#[test]
fn custom_tracer_counts_exceptions() {
    #[derive(Debug, Default)]
    struct ExceptionCounter(Vec<String>);

    impl VmTracer for ExceptionCounter {
        fn on_exception(&mut self, exc_type: &str, _depth: usize) {
            self.0.push(exc_type.to_owned());
        }
    }

    let mut print = NoPrint;
    let mut vm = VM::new(Builtins::default(), limited(5), &mut print, ExceptionCounter::default());
    vm.run_code(&runaway_recursion(false)).unwrap_err();
    let seen = vm.into_tracer().0;
    assert_eq!(seen.len(), 5);
    assert!(seen.iter().all(|name| name == "RecursionError"));
}

/// The profiling tracer counts every dispatched instruction.
#[test]
fn profiling_tracer_counts_instructions() {
    let mut b = UnitBuilder::new("<module>");
    b.load_const(1).load_const(2).emit(Mnemonic::BinaryAdd).emit(Mnemonic::PopTop);
    let unit = finish(&mut b);

    let mut print = NoPrint;
    let mut vm = VM::new(Builtins::default(), limited(10), &mut print, ProfilingTracer::new());
    vm.run_code(&unit).unwrap();
    let report = vm.tracer().report();
    assert_eq!(report.total_instructions, 6);
}

/// Runs a module body and returns the type of the exception it raised, if any.
fn raised(unit: &CompiledUnit, tracker: impl ResourceTracker) -> Option<ExcType> {
    let mut print = NoPrint;
    let mut vm = VM::new(Builtins::default(), tracker, &mut print, pyrun::NoopTracer);
    vm.run_code(unit).err().and_then(|err| err.exception().map(Exception::exc_type))
}

/// `<sequence> * (1 << 62)` as a discarded expression.
fn huge_repeat(b: &mut UnitBuilder, op: Mnemonic) -> CompiledUnit {
    b.load_const(1_i64 << 62).emit(op).emit(Mnemonic::PopTop);
    finish(b)
}

/// A string too long to address raises OverflowError instead of aborting.
#[test]
fn huge_string_repetition_raises_overflow_error() {
    let mut b = UnitBuilder::new("<module>");
    b.load_const("ab");
    let unit = huge_repeat(&mut b, Mnemonic::BinaryMultiply);

    let mut print = NoPrint;
    let mut vm = VM::new(Builtins::default(), NoLimitTracker, &mut print, pyrun::NoopTracer);
    let err = vm.run_code(&unit).unwrap_err();
    let exc = err.exception().expect("OverflowError expected");
    assert_eq!(exc.exc_type(), ExcType::OverflowError);
    assert_eq!(exc.message(), Some("repeated string is too long"));
}

/// Lists and tuples that cannot be allocated raise MemoryError, in place or not.
#[test]
fn huge_sequence_repetition_raises_memory_error() {
    let mut b = UnitBuilder::new("<module>");
    b.load_const(0).emit_arg(Mnemonic::BuildList, 1);
    assert_eq!(
        raised(&huge_repeat(&mut b, Mnemonic::BinaryMultiply), NoLimitTracker),
        Some(ExcType::MemoryError)
    );

    let mut b = UnitBuilder::new("<module>");
    b.load_const(0).emit_arg(Mnemonic::BuildTuple, 1);
    assert_eq!(
        raised(&huge_repeat(&mut b, Mnemonic::InplaceMultiply), NoLimitTracker),
        Some(ExcType::MemoryError)
    );
}

/// `range(1 << 62)` is refused before any element is produced.
#[test]
fn huge_range_raises_memory_error() {
    let mut b = UnitBuilder::new("<module>");
    b.name_op(Mnemonic::LoadName, "range").load_const(1_i64 << 62);
    b.call(Mnemonic::CallFunction, 1, 0).emit(Mnemonic::PopTop);
    assert_eq!(raised(&finish(&mut b), NoLimitTracker), Some(ExcType::MemoryError));
}

/// A memory limit rejects large results with a MemoryError that `except` cannot swallow.
///
/// ```python
/// print 'ab' * 3
/// try:
///     x = 'ab' * 1000000
/// except BaseException:
///     print 'caught'
/// ```
#[test]
fn memory_limit_rejects_large_results() {
    let mut b = UnitBuilder::new("<module>");
    b.load_const("ab").load_const(3).emit(Mnemonic::BinaryMultiply);
    b.emit(Mnemonic::PrintItem).emit(Mnemonic::PrintNewline);
    let (handler, end) = (b.new_label(), b.new_label());
    b.jump(Mnemonic::SetupExcept, handler);
    b.load_const("ab").load_const(1_000_000).emit(Mnemonic::BinaryMultiply);
    b.name_op(Mnemonic::StoreName, "x");
    b.emit(Mnemonic::PopBlock).jump(Mnemonic::JumpForward, end);
    b.bind(handler);
    b.emit(Mnemonic::PopTop).emit(Mnemonic::PopTop).emit(Mnemonic::PopTop);
    b.load_const("caught").emit(Mnemonic::PrintItem).emit(Mnemonic::PrintNewline);
    b.bind(end);
    let unit = finish(&mut b);

    let tracker = LimitedTracker::new(ResourceLimits::new().max_memory(1_000_000));
    let mut print = CollectStringPrint::new();
    let result = {
        let mut vm = VM::new(Builtins::default(), tracker, &mut print, pyrun::NoopTracer);
        vm.run_code(&unit)
    };
    assert_eq!(print.output(), "ababab\n");
    let err = result.unwrap_err();
    assert_eq!(err.exception().map(Exception::exc_type), Some(ExcType::MemoryError));
}

/// The same limit applies to the list built by `range`.
#[test]
fn memory_limit_applies_to_range() {
    let mut b = UnitBuilder::new("<module>");
    b.name_op(Mnemonic::LoadName, "range").load_const(1_000_000);
    b.call(Mnemonic::CallFunction, 1, 0).emit(Mnemonic::PopTop);
    let unit = finish(&mut b);
    let tracker = LimitedTracker::new(ResourceLimits::new().max_memory(1_000_000));
    assert_eq!(raised(&unit, tracker), Some(ExcType::MemoryError));
    assert_eq!(raised(&unit, NoLimitTracker), None);
}
