/// Generators, classic classes, containers and host callables.
use pretty_assertions::assert_eq;
use pyrun::{
    ArgValues, Builtins, CollectStringPrint, CompareOp, CompiledUnit, ExcType, ExecError, Exception, GeneratorState,
    Mnemonic, NoLimitTracker, NoopTracer, Scope, UnitBuilder, VM, Value, new_scope,
};

fn run_with(builtins: Builtins, unit: &CompiledUnit) -> (Result<Value, ExecError>, String, Scope) {
    let globals = new_scope();
    let mut print = CollectStringPrint::new();
    let result = {
        let mut vm = VM::new(builtins, NoLimitTracker, &mut print, NoopTracer);
        vm.run_module(unit, &globals)
    };
    (result, print.into_output(), globals)
}

fn run(unit: &CompiledUnit) -> (Result<Value, ExecError>, String) {
    let (result, output, _) = run_with(Builtins::default(), unit);
    (result, output)
}

fn finish(b: &mut UnitBuilder) -> CompiledUnit {
    b.load_const(()).emit(Mnemonic::ReturnValue);
    b.build()
}

fn define(b: &mut UnitBuilder, name: &str, unit: CompiledUnit) {
    b.load_const(unit).emit_arg(Mnemonic::MakeFunction, 0).name_op(Mnemonic::StoreName, name);
}

fn print_top(b: &mut UnitBuilder) {
    b.emit(Mnemonic::PrintItem).emit(Mnemonic::PrintNewline);
}

/// ```python
/// def gen(n):
///     i = 0
///     while i < n:
///         yield i
///         i += 1
/// ```
fn counting_generator() -> CompiledUnit {
    let mut g = UnitBuilder::new("gen");
    g.args(&["n"]).generator();
    let (end, top, exit) = (g.new_label(), g.new_label(), g.new_label());
    g.load_const(0).local_op(Mnemonic::StoreFast, "i");
    g.jump(Mnemonic::SetupLoop, end);
    g.bind(top);
    g.local_op(Mnemonic::LoadFast, "i").local_op(Mnemonic::LoadFast, "n").compare(CompareOp::Lt);
    g.jump(Mnemonic::PopJumpIfFalse, exit);
    g.local_op(Mnemonic::LoadFast, "i").emit(Mnemonic::YieldValue).emit(Mnemonic::PopTop);
    g.local_op(Mnemonic::LoadFast, "i").load_const(1).emit(Mnemonic::InplaceAdd);
    g.local_op(Mnemonic::StoreFast, "i");
    g.jump(Mnemonic::JumpAbsolute, top);
    g.bind(exit).emit(Mnemonic::PopBlock);
    g.bind(end).load_const(()).emit(Mnemonic::ReturnValue);
    g.build()
}

/// `for v in gen(3): print v`
#[test]
fn for_loop_over_generator() {
    let mut b = UnitBuilder::new("<module>");
    define(&mut b, "gen", counting_generator());
    let (end, top, cleanup) = (b.new_label(), b.new_label(), b.new_label());
    b.jump(Mnemonic::SetupLoop, end);
    b.name_op(Mnemonic::LoadName, "gen").load_const(3).call(Mnemonic::CallFunction, 1, 0);
    b.emit(Mnemonic::GetIter);
    b.bind(top).jump(Mnemonic::ForIter, cleanup);
    b.name_op(Mnemonic::StoreName, "v").name_op(Mnemonic::LoadName, "v");
    print_top(&mut b);
    b.jump(Mnemonic::JumpAbsolute, top);
    b.bind(cleanup).emit(Mnemonic::PopBlock);
    b.bind(end);
    let (result, output) = run(&finish(&mut b));
    assert!(result.is_ok());
    assert_eq!(output, "0\n1\n2\n");
}

/// Builtins that take iterables drain a generator.
#[test]
fn builtins_consume_generators() {
    let mut b = UnitBuilder::new("<module>");
    define(&mut b, "gen", counting_generator());
    b.name_op(Mnemonic::LoadName, "list");
    b.name_op(Mnemonic::LoadName, "gen").load_const(4).call(Mnemonic::CallFunction, 1, 0);
    b.call(Mnemonic::CallFunction, 1, 0).emit(Mnemonic::PrintExpr);
    b.name_op(Mnemonic::LoadName, "sum");
    b.name_op(Mnemonic::LoadName, "gen").load_const(5).call(Mnemonic::CallFunction, 1, 0);
    b.call(Mnemonic::CallFunction, 1, 0).emit(Mnemonic::PrintExpr);
    let (result, output) = run(&finish(&mut b));
    assert!(result.is_ok());
    assert_eq!(output, "[0, 1, 2, 3]\n10\n");
}

/// ```python
/// def acc():
///     total = 0
///     while True:
///         x = yield total
///         total += x
/// g = acc()
/// print g.next()
/// print g.send(5)
/// print g.send(2)
/// ```
#[test]
fn generator_send_resumes_with_value() {
    let mut acc = UnitBuilder::new("acc");
    acc.args(&[]).generator();
    let top = acc.new_label();
    acc.load_const(0).local_op(Mnemonic::StoreFast, "total");
    acc.bind(top);
    acc.local_op(Mnemonic::LoadFast, "total").emit(Mnemonic::YieldValue);
    acc.local_op(Mnemonic::StoreFast, "x");
    acc.local_op(Mnemonic::LoadFast, "total").local_op(Mnemonic::LoadFast, "x");
    acc.emit(Mnemonic::InplaceAdd).local_op(Mnemonic::StoreFast, "total");
    acc.jump(Mnemonic::JumpAbsolute, top);

    let mut b = UnitBuilder::new("<module>");
    define(&mut b, "acc", acc.build());
    b.name_op(Mnemonic::LoadName, "acc").call(Mnemonic::CallFunction, 0, 0);
    b.name_op(Mnemonic::StoreName, "g");
    b.name_op(Mnemonic::LoadName, "g").name_op(Mnemonic::LoadAttr, "next");
    b.call(Mnemonic::CallFunction, 0, 0);
    print_top(&mut b);
    for sent in [5_i64, 2] {
        b.name_op(Mnemonic::LoadName, "g").name_op(Mnemonic::LoadAttr, "send");
        b.load_const(sent).call(Mnemonic::CallFunction, 1, 0);
        print_top(&mut b);
    }
    let (result, output) = run(&finish(&mut b));
    assert!(result.is_ok());
    assert_eq!(output, "0\n5\n7\n");
}

/// Advancing an exhausted generator raises StopIteration.
#[test]
fn exhausted_generator_raises_stop_iteration() {
    let mut b = UnitBuilder::new("<module>");
    define(&mut b, "gen", counting_generator());
    b.name_op(Mnemonic::LoadName, "gen").load_const(1).call(Mnemonic::CallFunction, 1, 0);
    b.name_op(Mnemonic::StoreName, "g");
    for _ in 0..2 {
        b.name_op(Mnemonic::LoadName, "g").name_op(Mnemonic::LoadAttr, "next");
        b.call(Mnemonic::CallFunction, 0, 0);
        print_top(&mut b);
    }
    let (result, output) = run(&finish(&mut b));
    assert_eq!(output, "0\n");
    let err = result.unwrap_err();
    assert_eq!(err.exception().map(Exception::exc_type), Some(ExcType::StopIteration));
}

/// A body with exactly two yields is resumed to a yield twice; the third resume finishes it.
///
/// ```python
/// def two():
///     yield 1
///     yield 2
/// g = two()
/// ```
#[test]
fn two_yields_then_finished() {
    let mut two = UnitBuilder::new("two");
    two.args(&[]).generator();
    two.load_const(1).emit(Mnemonic::YieldValue).emit(Mnemonic::PopTop);
    two.load_const(2).emit(Mnemonic::YieldValue).emit(Mnemonic::PopTop);
    two.load_const(()).emit(Mnemonic::ReturnValue);
    let mut b = UnitBuilder::new("<module>");
    define(&mut b, "two", two.build());
    b.name_op(Mnemonic::LoadName, "two").call(Mnemonic::CallFunction, 0, 0);
    b.name_op(Mnemonic::StoreName, "g");
    let unit = finish(&mut b);

    let globals = new_scope();
    let mut print = CollectStringPrint::new();
    let mut vm = VM::new(Builtins::default(), NoLimitTracker, &mut print, NoopTracer);
    vm.run_module(&unit, &globals).unwrap();
    let g = globals.borrow().get("g").cloned().unwrap();
    let Value::Generator(generator) = &g else {
        panic!("expected a generator, got {g:?}");
    };
    let state = || generator.borrow().state();
    assert_eq!(state(), GeneratorState::New);

    let next = Builtins::default().get("next").cloned().unwrap();
    let args = || ArgValues::new([g.clone()], Vec::new());
    assert!(matches!(vm.call(&next, args()), Ok(Value::Int(1))));
    assert_eq!(state(), GeneratorState::Suspended);
    assert!(matches!(vm.call(&next, args()), Ok(Value::Int(2))));
    assert_eq!(state(), GeneratorState::Suspended);

    let err = vm.call(&next, args()).unwrap_err();
    assert_eq!(err.exception().map(Exception::exc_type), Some(ExcType::StopIteration));
    assert_eq!(state(), GeneratorState::Finished);
    let err = vm.call(&next, args()).unwrap_err();
    assert_eq!(err.exception().map(Exception::exc_type), Some(ExcType::StopIteration));
}

/// A `finally` that yields after a `return` still produces its value.
///
/// ```python
/// def gen():
///     try:
///         return
///     finally:
///         yield 'cleanup'
/// print list(gen())
/// ```
#[test]
fn yield_in_finally_after_return() {
    let mut g = UnitBuilder::new("gen");
    g.args(&[]).generator();
    let handler = g.new_label();
    g.jump(Mnemonic::SetupFinally, handler);
    g.load_const(()).emit(Mnemonic::ReturnValue);
    g.emit(Mnemonic::PopBlock).load_const(());
    g.bind(handler).load_const("cleanup").emit(Mnemonic::YieldValue).emit(Mnemonic::PopTop);
    g.emit(Mnemonic::EndFinally);
    g.load_const(()).emit(Mnemonic::ReturnValue);

    let mut b = UnitBuilder::new("<module>");
    define(&mut b, "gen", g.build());
    b.name_op(Mnemonic::LoadName, "list");
    b.name_op(Mnemonic::LoadName, "gen").call(Mnemonic::CallFunction, 0, 0);
    b.call(Mnemonic::CallFunction, 1, 0);
    print_top(&mut b);
    let (result, output) = run(&finish(&mut b));
    assert!(result.is_ok(), "{result:?}");
    assert_eq!(output, "['cleanup']\n");
}

/// Sending a value into a generator that has not started is a TypeError.
#[test]
fn send_to_new_generator_is_type_error() {
    let mut b = UnitBuilder::new("<module>");
    define(&mut b, "gen", counting_generator());
    b.name_op(Mnemonic::LoadName, "gen").load_const(1).call(Mnemonic::CallFunction, 1, 0);
    b.name_op(Mnemonic::LoadAttr, "send").load_const(1).call(Mnemonic::CallFunction, 1, 0);
    b.emit(Mnemonic::PopTop);
    let (result, _) = run(&finish(&mut b));
    let err = result.unwrap_err();
    assert_eq!(err.exception().map(Exception::exc_type), Some(ExcType::TypeError));
}

/// ```python
/// class Counter:
///     def __init__(self, start):
///         self.value = start
///     def bump(self):
///         self.value += 1
///         return self.value
/// ```
fn counter_class(b: &mut UnitBuilder) {
    let mut init = UnitBuilder::new("__init__");
    init.args(&["self", "start"]);
    init.local_op(Mnemonic::LoadFast, "start").local_op(Mnemonic::LoadFast, "self");
    init.name_op(Mnemonic::StoreAttr, "value");
    init.load_const(()).emit(Mnemonic::ReturnValue);

    let mut bump = UnitBuilder::new("bump");
    bump.args(&["self"]);
    bump.local_op(Mnemonic::LoadFast, "self").emit(Mnemonic::DupTop);
    bump.name_op(Mnemonic::LoadAttr, "value").load_const(1).emit(Mnemonic::InplaceAdd);
    bump.emit(Mnemonic::RotTwo).name_op(Mnemonic::StoreAttr, "value");
    bump.local_op(Mnemonic::LoadFast, "self").name_op(Mnemonic::LoadAttr, "value");
    bump.emit(Mnemonic::ReturnValue);

    let mut body = UnitBuilder::new("Counter");
    define(&mut body, "__init__", init.build());
    define(&mut body, "bump", bump.build());
    body.emit(Mnemonic::LoadLocals).emit(Mnemonic::ReturnValue);

    b.load_const("Counter").emit_arg(Mnemonic::BuildTuple, 0);
    b.load_const(body.build()).emit_arg(Mnemonic::MakeFunction, 0);
    b.call(Mnemonic::CallFunction, 0, 0).emit(Mnemonic::BuildClass);
    b.name_op(Mnemonic::StoreName, "Counter");
}

/// `c = Counter(10); print c.bump(), c.bump()`
#[test]
fn class_instances_and_bound_methods() {
    let mut b = UnitBuilder::new("<module>");
    counter_class(&mut b);
    b.name_op(Mnemonic::LoadName, "Counter").load_const(10).call(Mnemonic::CallFunction, 1, 0);
    b.name_op(Mnemonic::StoreName, "c");
    for _ in 0..2 {
        b.name_op(Mnemonic::LoadName, "c").name_op(Mnemonic::LoadAttr, "bump");
        b.call(Mnemonic::CallFunction, 0, 0).emit(Mnemonic::PrintItem);
    }
    b.emit(Mnemonic::PrintNewline);
    let (result, output) = run(&finish(&mut b));
    assert!(result.is_ok());
    assert_eq!(output, "11 12\n");
}

/// Calling an unbound method without an instance is a TypeError.
#[test]
fn unbound_method_requires_instance() {
    let mut b = UnitBuilder::new("<module>");
    counter_class(&mut b);
    b.name_op(Mnemonic::LoadName, "Counter").name_op(Mnemonic::LoadAttr, "bump");
    b.call(Mnemonic::CallFunction, 0, 0).emit(Mnemonic::PopTop);
    let (result, _) = run(&finish(&mut b));
    let err = result.unwrap_err();
    assert_eq!(
        err.exception().and_then(Exception::message),
        Some("unbound method bump() must be called with Counter instance as first argument (got nothing instead)")
    );
}

/// A class deriving from a built-in exception is raised and reported under its own name.
#[test]
fn user_exception_class() {
    let mut body = UnitBuilder::new("MyError");
    body.emit(Mnemonic::LoadLocals).emit(Mnemonic::ReturnValue);

    let mut b = UnitBuilder::new("<module>");
    b.load_const("MyError").name_op(Mnemonic::LoadName, "ValueError");
    b.emit_arg(Mnemonic::BuildTuple, 1);
    b.load_const(body.build()).emit_arg(Mnemonic::MakeFunction, 0);
    b.call(Mnemonic::CallFunction, 0, 0).emit(Mnemonic::BuildClass);
    b.name_op(Mnemonic::StoreName, "MyError");
    b.name_op(Mnemonic::LoadName, "MyError").load_const("bad").call(Mnemonic::CallFunction, 1, 0);
    b.emit_arg(Mnemonic::RaiseVarargs, 1);
    let (result, _) = run(&finish(&mut b));
    let err = result.unwrap_err();
    let exc = err.exception().expect("exception expected");
    assert_eq!(exc.type_name(), "MyError");
    assert_eq!(exc.exc_type(), ExcType::ValueError);
    assert_eq!(exc.summary(), "MyError: bad");
}

/// Dicts keep insertion order and lists support slicing and item assignment.
#[test]
fn container_operations() {
    let mut b = UnitBuilder::new("<module>");
    b.emit_arg(Mnemonic::BuildMap, 2);
    b.load_const(1).load_const("b").emit(Mnemonic::StoreMap);
    b.load_const(2).load_const("a").emit(Mnemonic::StoreMap);
    b.name_op(Mnemonic::StoreName, "d");
    b.load_const(3).name_op(Mnemonic::LoadName, "d").load_const("c").emit(Mnemonic::StoreSubscr);
    b.name_op(Mnemonic::LoadName, "d").emit(Mnemonic::PrintExpr);

    for i in 1..=4_i64 {
        b.load_const(i);
    }
    b.emit_arg(Mnemonic::BuildList, 4).name_op(Mnemonic::StoreName, "xs");
    b.name_op(Mnemonic::LoadName, "xs").load_const(1).load_const(3).emit(Mnemonic::Slice3);
    b.emit(Mnemonic::PrintExpr);
    b.load_const(9).name_op(Mnemonic::LoadName, "xs").load_const(-1).emit(Mnemonic::StoreSubscr);
    b.name_op(Mnemonic::LoadName, "xs").emit(Mnemonic::PrintExpr);
    b.name_op(Mnemonic::LoadName, "xs").load_const(0).emit(Mnemonic::DeleteSubscr);
    b.name_op(Mnemonic::LoadName, "xs").emit(Mnemonic::PrintExpr);
    let (result, output) = run(&finish(&mut b));
    assert!(result.is_ok());
    assert_eq!(
        output,
        "{'b': 1, 'a': 2, 'c': 3}\n[2, 3]\n[1, 2, 3, 9]\n[2, 3, 9]\n"
    );
}

/// Missing keys and out-of-range indexes raise the matching lookup errors.
#[test]
fn lookup_errors() {
    let mut b = UnitBuilder::new("<module>");
    b.emit_arg(Mnemonic::BuildList, 0).load_const(0).emit(Mnemonic::BinarySubscr);
    let (result, _) = run(&finish(&mut b));
    let err = result.unwrap_err();
    assert_eq!(err.exception().map(Exception::summary).as_deref(), Some("IndexError: list index out of range"));

    let mut b = UnitBuilder::new("<module>");
    b.emit_arg(Mnemonic::BuildMap, 0).load_const("k").emit(Mnemonic::BinarySubscr);
    let (result, _) = run(&finish(&mut b));
    let err = result.unwrap_err();
    assert_eq!(err.exception().map(Exception::exc_type), Some(ExcType::KeyError));
}

/// Native methods on built-in values: `xs.append(4); ', '.join(['a', 'b']).upper()`.
#[test]
fn native_methods() {
    let mut b = UnitBuilder::new("<module>");
    b.emit_arg(Mnemonic::BuildList, 0).name_op(Mnemonic::StoreName, "xs");
    b.name_op(Mnemonic::LoadName, "xs").name_op(Mnemonic::LoadAttr, "append");
    b.load_const(4).call(Mnemonic::CallFunction, 1, 0).emit(Mnemonic::PopTop);
    b.name_op(Mnemonic::LoadName, "xs").emit(Mnemonic::PrintExpr);
    b.load_const(", ").name_op(Mnemonic::LoadAttr, "join");
    b.load_const("a").load_const("b").emit_arg(Mnemonic::BuildList, 2);
    b.call(Mnemonic::CallFunction, 1, 0);
    b.name_op(Mnemonic::LoadAttr, "upper").call(Mnemonic::CallFunction, 0, 0);
    b.emit(Mnemonic::PrintExpr);
    let (result, output) = run(&finish(&mut b));
    assert!(result.is_ok());
    assert_eq!(output, "[4]\n'A, B'\n");
}

/// Host callables registered on the builtins table are called with resolved arguments,
/// and a host error becomes a Python exception the program can catch.
#[test]
fn host_native_functions() {
    let builtins = Builtins::default().with_native("double", |args: ArgValues| match args.positional() {
        [Value::Int(n)] => Ok(Value::Int(n * 2)),
        _ => Err(Exception::new(ExcType::ValueError, Some("double() wants one int".to_owned()))),
    });

    let mut b = UnitBuilder::new("<module>");
    b.name_op(Mnemonic::LoadName, "double").load_const(21).call(Mnemonic::CallFunction, 1, 0);
    b.name_op(Mnemonic::StoreName, "r");
    let (handler, reraise, end) = (b.new_label(), b.new_label(), b.new_label());
    b.jump(Mnemonic::SetupExcept, handler);
    b.name_op(Mnemonic::LoadName, "double").load_const("x").call(Mnemonic::CallFunction, 1, 0);
    b.emit(Mnemonic::PopTop).emit(Mnemonic::PopBlock).jump(Mnemonic::JumpForward, end);
    b.bind(handler);
    b.emit(Mnemonic::DupTop).name_op(Mnemonic::LoadName, "ValueError");
    b.compare(CompareOp::ExceptionMatch).jump(Mnemonic::PopJumpIfFalse, reraise);
    b.emit(Mnemonic::PopTop).emit(Mnemonic::PopTop).emit(Mnemonic::PopTop);
    b.load_const("rejected").emit(Mnemonic::PrintItem).emit(Mnemonic::PrintNewline);
    b.jump(Mnemonic::JumpForward, end);
    b.bind(reraise).emit(Mnemonic::EndFinally);
    b.bind(end);
    let (result, output, globals) = run_with(builtins, &finish(&mut b));
    assert!(result.is_ok());
    assert_eq!(output, "rejected\n");
    assert!(matches!(globals.borrow().get("r"), Some(Value::Int(42))));
}

/// The host can call a function a previous run defined.
#[test]
fn host_calls_python_function() {
    let mut square = UnitBuilder::new("square");
    square.args(&["x"]);
    square.local_op(Mnemonic::LoadFast, "x").local_op(Mnemonic::LoadFast, "x");
    square.emit(Mnemonic::BinaryMultiply).emit(Mnemonic::ReturnValue);
    let mut b = UnitBuilder::new("<module>");
    define(&mut b, "square", square.build());
    let unit = finish(&mut b);

    let globals = new_scope();
    let mut print = CollectStringPrint::new();
    let mut vm = VM::new(Builtins::default(), NoLimitTracker, &mut print, NoopTracer);
    vm.run_module(&unit, &globals).unwrap();
    let square = globals.borrow().get("square").cloned().unwrap();
    let result = vm.call(&square, ArgValues::new([Value::Int(7)], Vec::new())).unwrap();
    assert!(matches!(result, Value::Int(49)));
    let err = vm.call(&square, ArgValues::default()).unwrap_err();
    assert_eq!(err.exception().map(Exception::exc_type), Some(ExcType::TypeError));
}

/// `list.remove` on a list that contains itself.
///
/// ```python
/// l = []
/// l.append(l)
/// l.append(5)
/// l.remove(5)
/// print len(l)
/// l.remove([5])
/// ```
#[test]
fn remove_from_self_containing_list() {
    let mut b = UnitBuilder::new("<module>");
    b.emit_arg(Mnemonic::BuildList, 0).name_op(Mnemonic::StoreName, "l");
    b.name_op(Mnemonic::LoadName, "l").name_op(Mnemonic::LoadAttr, "append");
    b.name_op(Mnemonic::LoadName, "l").call(Mnemonic::CallFunction, 1, 0).emit(Mnemonic::PopTop);
    b.name_op(Mnemonic::LoadName, "l").name_op(Mnemonic::LoadAttr, "append");
    b.load_const(5).call(Mnemonic::CallFunction, 1, 0).emit(Mnemonic::PopTop);
    b.name_op(Mnemonic::LoadName, "l").name_op(Mnemonic::LoadAttr, "remove");
    b.load_const(5).call(Mnemonic::CallFunction, 1, 0).emit(Mnemonic::PopTop);
    b.name_op(Mnemonic::LoadName, "len").name_op(Mnemonic::LoadName, "l");
    b.call(Mnemonic::CallFunction, 1, 0);
    print_top(&mut b);
    b.name_op(Mnemonic::LoadName, "l").name_op(Mnemonic::LoadAttr, "remove");
    b.load_const(5).emit_arg(Mnemonic::BuildList, 1);
    b.call(Mnemonic::CallFunction, 1, 0).emit(Mnemonic::PopTop);
    let (result, output) = run(&finish(&mut b));
    assert_eq!(output, "1\n");
    let err = result.unwrap_err();
    let exc = err.exception().expect("ValueError expected");
    assert_eq!(exc.exc_type(), ExcType::ValueError);
    assert_eq!(exc.message(), Some("list.remove(x): x not in list"));
}
