//! User-defined functions and the argument-binding algorithm.

use std::rc::Rc;

use ahash::AHashMap;

use crate::{
    args::ArgValues,
    bytecode::Code,
    exception_private::{ExcType, RunError, RunResult},
    namespace::{Namespace, Scope},
    types::{Cell, DictMap},
    unit::CodeFlags,
    value::Value,
};

/// A function value created by `MAKE_FUNCTION` or `MAKE_CLOSURE`.
#[derive(Debug)]
pub struct Function {
    name: Rc<str>,
    code: Rc<Code>,
    /// Default values for the trailing positional parameters.
    defaults: Vec<Value>,
    /// Captured cells, parallel to `code.freevars()`.
    closure: Vec<Cell>,
    /// The defining module's globals, shared rather than copied.
    globals: Scope,
}

impl Function {
    pub(crate) fn new(code: Rc<Code>, defaults: Vec<Value>, closure: Vec<Cell>, globals: Scope) -> Self {
        Self {
            name: code.name().into(),
            code,
            defaults,
            closure,
            globals,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn code(&self) -> &Rc<Code> {
        &self.code
    }

    #[must_use]
    pub fn defaults(&self) -> &[Value] {
        &self.defaults
    }

    #[must_use]
    pub fn closure(&self) -> &[Cell] {
        &self.closure
    }

    pub(crate) fn globals(&self) -> &Scope {
        &self.globals
    }

    /// Binds call arguments to the function's parameters.
    ///
    /// Positionals fill parameters in order; keywords fill the rest by name; defaults
    /// fill whatever trailing parameters are still unbound. Leftover positionals go to
    /// `*args` and leftover keywords to `**kwargs` when declared, and are an error
    /// otherwise. The result has parameters in declaration order, then `*args`, then
    /// `**kwargs`; it does not depend on the order keywords were passed in.
    pub(crate) fn bind_arguments(&self, args: ArgValues) -> RunResult<Namespace> {
        let code = &self.code;
        let flags = code.flags();
        let argcount = code.argcount();
        let varnames = code.varnames();
        let has_varargs = flags.contains(CodeFlags::VARARGS);
        let has_varkw = flags.contains(CodeFlags::VARKEYWORDS);
        let needed = argcount + usize::from(has_varargs) + usize::from(has_varkw);
        if varnames.len() < needed {
            return Err(RunError::internal(format!(
                "{} declares {needed} parameters but has {} local names",
                self.name,
                varnames.len()
            )));
        }
        let params = &varnames[..argcount];

        let (positional, kwargs) = args.into_parts();
        let given = positional.len();
        let mut slots: Vec<Option<Value>> = vec![None; argcount];
        let mut extra_positional = Vec::new();
        for (i, value) in positional.into_iter().enumerate() {
            if i < argcount {
                slots[i] = Some(value);
            } else {
                extra_positional.push(value);
            }
        }
        if !extra_positional.is_empty() && !has_varargs {
            return Err(ExcType::type_error_too_many_positional(&self.name, argcount, given));
        }

        let mut extra_kwargs = DictMap::default();
        for (key, value) in kwargs {
            match params.iter().position(|p| *p == key) {
                Some(index) if slots[index].is_some() => {
                    return Err(ExcType::type_error_multiple_values(&self.name, &key));
                }
                Some(index) => slots[index] = Some(value),
                None if has_varkw => {
                    extra_kwargs.insert(Value::Str(key), value);
                }
                None => return Err(ExcType::type_error_unexpected_keyword(&self.name, &key)),
            }
        }

        let first_default = argcount.saturating_sub(self.defaults.len());
        let mut missing = Vec::new();
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                match index.checked_sub(first_default).and_then(|d| self.defaults.get(d)) {
                    Some(default) => *slot = Some(default.clone()),
                    None => missing.push(&*params[index]),
                }
            }
        }
        if !missing.is_empty() {
            return Err(ExcType::type_error_missing_positional(&self.name, &missing));
        }

        let mut locals = Namespace::new();
        for (name, value) in params.iter().zip(slots) {
            locals.insert(name.clone(), value.unwrap_or(Value::None));
        }
        let mut next = argcount;
        if has_varargs {
            locals.insert(varnames[next].clone(), Value::new_tuple(extra_positional));
            next += 1;
        }
        if has_varkw {
            locals.insert(varnames[next].clone(), Value::new_dict(extra_kwargs));
        }
        Ok(locals)
    }

    /// Builds the cell map for a new frame.
    ///
    /// Cell variables get fresh cells, seeded from `locals` when the variable is also a
    /// parameter. Free variables share the function's captured cells by position.
    pub(crate) fn frame_cells(&self, locals: &Namespace) -> RunResult<AHashMap<Rc<str>, Cell>> {
        let freevars = self.code.freevars();
        if freevars.len() != self.closure.len() {
            return Err(RunError::internal(format!(
                "{} has {} free variables but {} closure cells",
                self.name,
                freevars.len(),
                self.closure.len()
            )));
        }
        let mut cells = AHashMap::with_capacity(self.code.cellvars().len() + freevars.len());
        for name in self.code.cellvars() {
            let cell = match locals.get(name) {
                Some(value) => Cell::with_value(value.clone()),
                None => Cell::new(),
            };
            cells.insert(name.clone(), cell);
        }
        for (name, cell) in freevars.iter().zip(&self.closure) {
            cells.insert(name.clone(), cell.clone());
        }
        Ok(cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{Mnemonic, UnitBuilder},
        namespace::new_scope,
    };

    fn function(mut b: UnitBuilder, defaults: Vec<Value>) -> Function {
        b.load_const(()).emit(Mnemonic::ReturnValue);
        let code = Code::decode(&b.build()).unwrap();
        Function::new(Rc::new(code), defaults, Vec::new(), new_scope())
    }

    /// `def f(<params>)` with the given defaults.
    fn plain(params: &[&str], defaults: Vec<Value>) -> Function {
        let mut b = UnitBuilder::new("f");
        b.args(params);
        function(b, defaults)
    }

    /// Binds the call and renders the resulting locals as `name=repr` pairs.
    fn bind(f: &Function, positional: &[i64], kwargs: &[(&str, i64)]) -> RunResult<String> {
        let kwargs = kwargs.iter().map(|(k, v)| (Rc::from(*k), Value::Int(*v))).collect();
        let args = ArgValues::new(positional.iter().copied().map(Value::Int), kwargs);
        let locals = f.bind_arguments(args)?;
        let pairs: Vec<String> = locals.iter().map(|(k, v)| format!("{k}={}", v.py_repr())).collect();
        Ok(pairs.join(" "))
    }

    fn type_error(result: RunResult<String>) -> String {
        let err = result.unwrap_err();
        assert!(err.is_exc_type(ExcType::TypeError), "{err}");
        err.to_string()
    }

    #[test]
    fn test_binding_ignores_how_arguments_are_passed() {
        let f = plain(&["x", "y"], Vec::new());
        assert_eq!(bind(&f, &[1, 2], &[]).unwrap(), "x=1 y=2");
        assert_eq!(bind(&f, &[], &[("x", 1), ("y", 2)]).unwrap(), "x=1 y=2");
        assert_eq!(bind(&f, &[1], &[("y", 2)]).unwrap(), "x=1 y=2");
        assert_eq!(bind(&f, &[], &[("y", 2), ("x", 1)]).unwrap(), "x=1 y=2");
    }

    #[test]
    fn test_defaults_fill_trailing_parameters() {
        let f = plain(&["a", "b", "c"], vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(bind(&f, &[0], &[]).unwrap(), "a=0 b=1 c=2");
        assert_eq!(bind(&f, &[0], &[("c", 9)]).unwrap(), "a=0 b=1 c=9");
    }

    #[test]
    fn test_extra_arguments_collect_into_star_parameters() {
        let mut b = UnitBuilder::new("f");
        b.args(&["a"]).varargs("rest").varkeywords("kw");
        let f = function(b, Vec::new());
        assert_eq!(bind(&f, &[1, 2, 3], &[("z", 4)]).unwrap(), "a=1 rest=(2, 3) kw={'z': 4}");
        assert_eq!(bind(&f, &[1], &[]).unwrap(), "a=1 rest=() kw={}");
    }

    #[test]
    fn test_binding_errors() {
        let f = plain(&["x", "y"], Vec::new());
        let missing = type_error(bind(&f, &[1], &[]));
        assert!(missing.contains("f() missing 1 required positional argument: 'y'"), "{missing}");
        let too_many = type_error(bind(&f, &[1, 2, 3], &[]));
        assert!(too_many.contains("f() takes 2 positional arguments but 3 were given"), "{too_many}");
        let unexpected = type_error(bind(&f, &[1, 2], &[("z", 3)]));
        assert!(unexpected.contains("f() got an unexpected keyword argument 'z'"), "{unexpected}");
        let duplicate = type_error(bind(&f, &[1], &[("x", 2)]));
        assert!(duplicate.contains("f() got multiple values for keyword argument 'x'"), "{duplicate}");
    }
}
