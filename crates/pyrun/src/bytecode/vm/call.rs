//! Function creation, the `CALL_FUNCTION` family, class creation, and dispatch of
//! every callable kind.

use std::{cell::RefCell, cmp::Ordering, rc::Rc};

use super::{VM, generator::make_iter};
use crate::{
    args::ArgValues,
    builtins::{
        BuiltinFunction, builtin_abs, builtin_bool, builtin_float, builtin_int, builtin_isinstance, builtin_len,
        builtin_min_max, builtin_range, builtin_repr, builtin_str, builtin_sum, dict_from_pairs, enumerate_values,
        range_len, reverse_values, set_from_values, sort_keyed, zip_values,
    },
    bytecode::Mnemonic,
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    frame::Frame,
    function::Function,
    io::PrintWriter,
    namespace::Namespace,
    resource::{LARGE_RESULT_THRESHOLD, ResourceTracker},
    tracer::VmTracer,
    types::{Class, DictMap, Generator, Instance, Method, SeqIter},
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    // ========================================================================
    // MAKE_FUNCTION, MAKE_CLOSURE, BUILD_CLASS
    // ========================================================================

    /// Pops the code object (and for closures the tuple of captured cells above the
    /// defaults), then `default_count` defaults, and pushes the new function.
    pub(super) fn make_function(&mut self, default_count: usize, closure: bool) -> RunResult<()> {
        let code = match self.pop()? {
            Value::Code(code) => code,
            other => {
                return Err(RunError::internal(format!(
                    "MAKE_FUNCTION expected a code object, found {}",
                    other.type_name()
                )));
            }
        };
        let cells = if closure {
            match self.pop()? {
                Value::Tuple(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::Cell(cell) => Ok(cell.clone()),
                        other => Err(RunError::internal(format!(
                            "MAKE_CLOSURE expected cells, found {}",
                            other.type_name()
                        ))),
                    })
                    .collect::<RunResult<Vec<_>>>()?,
                other => {
                    return Err(RunError::internal(format!(
                        "MAKE_CLOSURE expected a tuple of cells, found {}",
                        other.type_name()
                    )));
                }
            }
        } else {
            Vec::new()
        };
        let defaults = self.pop_n(default_count)?;
        let globals = self.current_ref()?.globals.clone();
        self.tracer.on_make_function(cells.len(), defaults.len());
        self.push(Value::Function(Rc::new(Function::new(code, defaults, cells, globals))))
    }

    /// `BUILD_CLASS`: pops the namespace dict, the bases tuple and the name.
    pub(super) fn build_class(&mut self) -> RunResult<()> {
        let methods = self.pop()?;
        let bases = self.pop()?;
        let name = self.pop()?;
        let (Value::Dict(methods), Value::Tuple(bases), Value::Str(name)) = (&methods, &bases, &name) else {
            return Err(RunError::internal(format!(
                "BUILD_CLASS expected (str, tuple, dict), found ({}, {}, {})",
                name.type_name(),
                bases.type_name(),
                methods.type_name()
            )));
        };
        if let Some(base) = bases
            .iter()
            .find(|base| !matches!(base, Value::Class(_) | Value::ExcType(_)))
        {
            return Err(ExcType::type_error(format!(
                "Error when calling the metaclass bases: base must be a class, not {}",
                base.type_name()
            )));
        }
        let mut dict = Namespace::new();
        for (key, value) in methods.borrow().iter() {
            let Value::Str(key) = key else {
                return Err(RunError::internal("class namespace keys must be strings"));
            };
            dict.insert(key.clone(), value.clone());
        }
        let class = Class::new(name.clone(), bases.to_vec(), dict);
        self.push(Value::Class(Rc::new(class)))
    }

    // ========================================================================
    // CALL_FUNCTION family
    // ========================================================================

    /// Pops the arguments described by `argc` and the callable beneath them, calls it,
    /// and pushes the result.
    ///
    /// The low byte of `argc` counts positional arguments and the high byte counts
    /// keyword pairs. The `_VAR` forms add a `*args` iterable and the `_KW` forms a
    /// `**kwargs` dict, both above the keyword pairs.
    pub(super) fn call_function(&mut self, mnemonic: Mnemonic, argc: usize) -> RunResult<()> {
        let keyword_count = (argc >> 8) & 0xff;
        let positional_count = argc & 0xff;
        let star_kwargs = if matches!(mnemonic, Mnemonic::CallFunctionKw | Mnemonic::CallFunctionVarKw) {
            Some(self.pop()?)
        } else {
            None
        };
        let star_args = if matches!(mnemonic, Mnemonic::CallFunctionVar | Mnemonic::CallFunctionVarKw) {
            Some(self.pop()?)
        } else {
            None
        };
        let pairs = self.pop_n(keyword_count * 2)?;
        let mut positional = self.pop_n(positional_count)?;
        let callable = self.pop()?;
        let name = callable_name(&callable);

        let mut kwargs: Vec<(Rc<str>, Value)> = Vec::with_capacity(keyword_count);
        let mut pairs = pairs.into_iter();
        while let (Some(key), Some(value)) = (pairs.next(), pairs.next()) {
            let Value::Str(key) = key else {
                return Err(ExcType::type_error_keywords_not_strings(&name));
            };
            push_keyword(&mut kwargs, &name, key, value)?;
        }

        if let Some(star_args) = star_args {
            if !is_iterable(&star_args) {
                return Err(ExcType::type_error(format!(
                    "{name}() argument after * must be a sequence, not {}",
                    star_args.type_name()
                )));
            }
            positional.extend(self.collect_iterable(&star_args)?);
        }
        if let Some(star_kwargs) = star_kwargs {
            let Value::Dict(dict) = &star_kwargs else {
                return Err(ExcType::type_error(format!(
                    "{name}() argument after ** must be a mapping, not {}",
                    star_kwargs.type_name()
                )));
            };
            for (key, value) in dict.borrow().iter() {
                let Value::Str(key) = key else {
                    return Err(ExcType::type_error_keywords_not_strings(&name));
                };
                push_keyword(&mut kwargs, &name, key.clone(), value.clone())?;
            }
        }

        let result = self.call_value(&callable, ArgValues::new(positional, kwargs))?;
        self.push(result)
    }

    /// Calls any callable value.
    pub(super) fn call_value(&mut self, callable: &Value, args: ArgValues) -> RunResult<Value> {
        match callable {
            Value::Function(func) => self.call_python_function(func, args),
            Value::Method(method) => self.call_method(method, args),
            Value::Class(cls) => self.instantiate(cls, args),
            Value::ExcType(exc_type) => {
                if !args.kwargs().is_empty() {
                    return Err(ExcType::type_error(format!("{exc_type} does not take keyword arguments")));
                }
                let (positional, _) = args.into_parts();
                Ok(Value::Exception(Rc::new(SimpleException::new(
                    *exc_type,
                    positional.into_vec(),
                ))))
            }
            Value::Builtin(builtin) => self.call_builtin(*builtin, args),
            Value::BuiltinMethod(bound) => self.call_native_method(bound, args),
            Value::Native(native) => native.call(args),
            other => Err(ExcType::type_error_not_callable(other.type_name())),
        }
    }

    /// Binds arguments into a fresh frame and runs it, or wraps it in a generator
    /// when the code is a generator body.
    fn call_python_function(&mut self, func: &Rc<Function>, args: ArgValues) -> RunResult<Value> {
        let locals = func.bind_arguments(args)?;
        let cells = func.frame_cells(&locals)?;
        let mut frame = Frame::new(
            func.code().clone(),
            func.globals().clone(),
            Rc::new(RefCell::new(locals)),
            self.builtins.clone(),
        );
        frame.cells = cells;

        if func.code().is_generator() {
            let name = func.name().to_owned();
            return Ok(Value::Generator(Rc::new(RefCell::new(Generator::new(name, frame)))));
        }

        let depth = self.call_stack.len();
        self.tracker.check_recursion_depth(depth)?;
        self.tracer.on_call(func.name(), depth + 1);
        let result = self.run_frame(frame);
        self.tracer.on_return(depth);
        result.map(|(value, _)| value)
    }

    /// A bound method prepends its instance; an unbound one checks that the first
    /// argument is an instance of the method's class.
    fn call_method(&mut self, method: &Method, mut args: ArgValues) -> RunResult<Value> {
        match &method.instance {
            Some(instance) => args.prepend(instance.clone()),
            None => {
                let first = args.positional().first();
                let is_instance =
                    matches!(first, Some(Value::Instance(inst)) if inst.class().is_subclass_of(&method.class));
                if !is_instance {
                    let got = match first {
                        Some(Value::Instance(inst)) => format!("{} instance", inst.class().name()),
                        Some(other) => format!("{} instance", other.type_name()),
                        None => "nothing".to_owned(),
                    };
                    return Err(ExcType::type_error(format!(
                        "unbound method {}() must be called with {} instance as first argument (got {got} instead)",
                        method.name(),
                        method.class.name()
                    )));
                }
            }
        }
        self.call_value(&method.func, args)
    }

    /// Creates an instance and runs `__init__` on it if the class chain defines one.
    fn instantiate(&mut self, cls: &Rc<Class>, args: ArgValues) -> RunResult<Value> {
        let instance = Rc::new(Instance::new(cls.clone()));
        let value = Value::Instance(instance.clone());
        let is_exception = cls.exception_base().is_some();
        if is_exception {
            instance.set_attr("args", Value::new_tuple(args.positional().to_vec()));
        }
        match cls.lookup("__init__") {
            Some(func @ Value::Function(_)) => {
                let init = Method {
                    instance: Some(value.clone()),
                    class: cls.clone(),
                    func,
                };
                let result = self.call_method(&init, args)?;
                if !matches!(result, Value::None) {
                    return Err(ExcType::type_error(format!(
                        "__init__() should return None, not '{}'",
                        result.type_name()
                    )));
                }
            }
            Some(other) => {
                self.call_value(&other, args)?;
            }
            None if !is_exception && !args.is_empty() => {
                return Err(ExcType::type_error("this constructor takes no arguments"));
            }
            None => {}
        }
        Ok(value)
    }

    // ========================================================================
    // Builtin functions
    // ========================================================================

    /// Builtins that need the VM (to drive iterables or reach the current frame) are
    /// handled here; the rest delegate to the pure helpers in `builtins`.
    fn call_builtin(&mut self, builtin: BuiltinFunction, mut args: ArgValues) -> RunResult<Value> {
        let name: &'static str = builtin.into();
        match builtin {
            BuiltinFunction::Abs => builtin_abs(args),
            BuiltinFunction::Bool => builtin_bool(args),
            BuiltinFunction::Float => builtin_float(args),
            BuiltinFunction::Int => builtin_int(args),
            BuiltinFunction::Isinstance => builtin_isinstance(args),
            BuiltinFunction::Len => builtin_len(args),
            BuiltinFunction::Repr => builtin_repr(args),
            BuiltinFunction::Str => builtin_str(args),
            BuiltinFunction::Range => {
                let (start, stop, step) = builtin_range(name, args)?;
                let len = usize::try_from(range_len(start, stop, step))
                    .map_err(|_| ExcType::overflow_error_msg("range() result has too many items"))?;
                let estimated = len.saturating_mul(size_of::<Value>());
                if estimated > LARGE_RESULT_THRESHOLD {
                    self.tracker.check_large_result(estimated)?;
                }
                let mut items = Vec::new();
                items.try_reserve_exact(len).map_err(|_| ExcType::memory_error())?;
                let mut iter = SeqIter::range(start, stop, step);
                items.extend(std::iter::from_fn(|| iter.next_value()));
                Ok(Value::new_list(items))
            }
            BuiltinFunction::Xrange => {
                let (start, stop, step) = builtin_range(name, args)?;
                Ok(Value::Iterator(Rc::new(RefCell::new(SeqIter::range(start, stop, step)))))
            }
            BuiltinFunction::List => Ok(Value::new_list(match args.get_zero_one_arg(name)? {
                Some(iterable) => self.collect_iterable(&iterable)?,
                None => Vec::new(),
            })),
            BuiltinFunction::Tuple => match args.get_zero_one_arg(name)? {
                Some(tuple @ Value::Tuple(_)) => Ok(tuple),
                Some(iterable) => Ok(Value::new_tuple(self.collect_iterable(&iterable)?)),
                None => Ok(Value::new_tuple(Vec::new())),
            },
            BuiltinFunction::Set => Ok(Value::new_set(match args.get_zero_one_arg(name)? {
                Some(iterable) => set_from_values(self.collect_iterable(&iterable)?)?,
                None => set_from_values(Vec::new())?,
            })),
            BuiltinFunction::Dict => {
                let (positional, kwargs) = args.into_parts();
                let mut map = match positional.as_slice() {
                    [] => DictMap::default(),
                    [Value::Dict(dict)] => dict.borrow().clone(),
                    [iterable] => dict_from_pairs(self.collect_iterable(iterable)?)?,
                    more => return Err(ExcType::type_error_at_most(name, 1, more.len())),
                };
                map.extend(kwargs.into_iter().map(|(key, value)| (Value::Str(key), value)));
                Ok(Value::new_dict(map))
            }
            BuiltinFunction::Iter => make_iter(args.get_one_arg(name)?),
            BuiltinFunction::Next => {
                let (iterator, default) = args.get_one_two_args(name)?;
                match self.iter_next(&iterator)? {
                    Some(value) => Ok(value),
                    None => default.ok_or_else(|| ExcType::stop_iteration(None)),
                }
            }
            BuiltinFunction::Locals => {
                args.check_zero_args(name)?;
                let locals = self.current_ref()?.locals.borrow().to_dict();
                Ok(Value::new_dict(locals))
            }
            BuiltinFunction::Enumerate => {
                let start = args.take_kwarg("start");
                let (iterable, positional_start) = args.get_one_two_args(name)?;
                let start = match start.or(positional_start) {
                    Some(start) => start
                        .as_int()
                        .ok_or_else(|| ExcType::type_error("an integer is required"))?,
                    None => 0,
                };
                let items = self.collect_iterable(&iterable)?;
                Ok(iterator_over(enumerate_values(items, start)))
            }
            BuiltinFunction::Reversed => {
                let items = self.collect_iterable(&args.get_one_arg(name)?)?;
                Ok(iterator_over(reverse_values(items)))
            }
            BuiltinFunction::Zip => {
                args.check_no_kwargs(name)?;
                let (positional, _) = args.into_parts();
                let mut columns = Vec::with_capacity(positional.len());
                for iterable in &positional {
                    columns.push(self.collect_iterable(iterable)?);
                }
                Ok(Value::new_list(zip_values(columns)))
            }
            BuiltinFunction::Sum => {
                let (iterable, start) = args.get_one_two_args(name)?;
                builtin_sum(self.collect_iterable(&iterable)?, start)
            }
            BuiltinFunction::Sorted => {
                let key = args.take_kwarg("key").filter(|key| !matches!(key, Value::None));
                let reverse = args.take_kwarg("reverse").is_some_and(|r| r.py_bool());
                let items = self.collect_iterable(&args.get_one_arg(name)?)?;
                let mut pairs = self.keyed(items, key.as_ref())?;
                sort_keyed(&mut pairs, reverse)?;
                Ok(Value::new_list(pairs.into_iter().map(|(_, item)| item).collect()))
            }
            BuiltinFunction::Min => self.min_max(name, args, Ordering::Less),
            BuiltinFunction::Max => self.min_max(name, args, Ordering::Greater),
        }
    }

    /// `min`/`max` over either one iterable or several positional arguments, with an
    /// optional `key` function.
    fn min_max(&mut self, name: &str, mut args: ArgValues, want: Ordering) -> RunResult<Value> {
        let key = args.take_kwarg("key").filter(|key| !matches!(key, Value::None));
        args.check_no_kwargs(name)?;
        let (positional, _) = args.into_parts();
        let candidates = match positional.len() {
            0 => return Err(ExcType::type_error_at_least(name, 1, 0)),
            1 => self.collect_iterable(&positional[0])?,
            _ => positional.into_vec(),
        };
        let Some(key) = key else {
            return builtin_min_max(name, candidates, want);
        };
        let mut best: Option<(Value, Value)> = None;
        for (candidate_key, item) in self.keyed(candidates, Some(&key))? {
            let replace = match &best {
                None => true,
                Some((best_key, _)) => candidate_key.py_partial_cmp(best_key)? == Some(want),
            };
            if replace {
                best = Some((candidate_key, item));
            }
        }
        best.map(|(_, item)| item)
            .ok_or_else(|| ExcType::value_error(format!("{name}() arg is an empty sequence")))
    }

    /// Pairs every item with its sort key: the item itself, or `key(item)`.
    fn keyed(&mut self, items: Vec<Value>, key: Option<&Value>) -> RunResult<Vec<(Value, Value)>> {
        items
            .into_iter()
            .map(|item| {
                let sort_key = match key {
                    Some(key) => self.call_value(key, ArgValues::new([item.clone()], Vec::new()))?,
                    None => item.clone(),
                };
                Ok((sort_key, item))
            })
            .collect()
    }
}

fn push_keyword(kwargs: &mut Vec<(Rc<str>, Value)>, name: &str, key: Rc<str>, value: Value) -> RunResult<()> {
    if kwargs.iter().any(|(existing, _)| *existing == key) {
        return Err(ExcType::type_error_duplicate_keyword(name, &key));
    }
    kwargs.push((key, value));
    Ok(())
}

fn is_iterable(value: &Value) -> bool {
    matches!(
        value,
        Value::List(_)
            | Value::Tuple(_)
            | Value::Str(_)
            | Value::Dict(_)
            | Value::Set(_)
            | Value::Generator(_)
            | Value::Iterator(_)
    )
}

fn iterator_over(items: Vec<Value>) -> Value {
    Value::Iterator(Rc::new(RefCell::new(SeqIter::from_values(items))))
}

/// The name a callable reports in argument errors.
fn callable_name(callable: &Value) -> String {
    match callable {
        Value::Function(func) => func.name().to_owned(),
        Value::Method(method) => method.name(),
        Value::Builtin(builtin) => builtin.to_string(),
        Value::BuiltinMethod(bound) => bound.method.to_string(),
        Value::Native(native) => native.name().to_owned(),
        Value::Class(cls) => cls.name().to_owned(),
        Value::ExcType(exc_type) => exc_type.to_string(),
        other => other.type_name().to_owned(),
    }
}
