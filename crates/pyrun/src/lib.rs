#![doc = include_str!("../../../README.md")]

mod args;
mod builtins;
mod bytecode;
mod exception_private;
mod exception_public;
mod frame;
mod function;
mod io;
mod namespace;
mod operators;
mod resource;
pub mod tracer;
mod types;
mod unit;
mod value;

pub use crate::{
    args::ArgValues,
    builtins::{BuiltinFunction, Builtins, NativeFn, NativeFunction},
    bytecode::{CompareOp, HAVE_ARGUMENT, Label, Mnemonic, UnitBuilder, VM},
    exception_private::ExcType,
    exception_public::{ExecError, Exception, StackFrame},
    frame::Why,
    function::Function,
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    namespace::{Namespace, Scope, new_scope},
    resource::{
        DEFAULT_MAX_RECURSION_DEPTH, LARGE_RESULT_THRESHOLD, LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits,
        ResourceTracker,
    },
    tracer::{NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer},
    types::{BoundBuiltin, Cell, Class, Generator, GeneratorState, Instance, Method, NativeMethod},
    unit::{CodeFlags, CompiledUnit, Constant, UnitError},
    value::Value,
};
