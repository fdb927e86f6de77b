//! `LOAD_ATTR`, `STORE_ATTR` and `DELETE_ATTR`.
//!
//! Instances resolve their own dict first and then the class chain; functions found on
//! a class come back wrapped as bound or unbound methods. Built-in values expose the
//! native methods listed in [`NativeMethod`].

use std::{rc::Rc, str::FromStr};

use super::VM;
use crate::{
    exception_private::{ExcType, RunError, RunResult},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{BoundBuiltin, Class, Instance, Method, NativeMethod},
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    pub(super) fn load_attr(&mut self, name: &str) -> RunResult<()> {
        let obj = self.pop()?;
        let value = get_attr(&obj, name)?;
        self.push(value)
    }

    /// `STORE_ATTR`: the object is on top with the value under it.
    pub(super) fn store_attr(&mut self, name: &str) -> RunResult<()> {
        let obj = self.pop()?;
        let value = self.pop()?;
        match &obj {
            Value::Instance(inst) => inst.set_attr(name, value),
            Value::Class(cls) => cls.set_attr(name, value),
            other => return Err(no_attribute(other, name)),
        }
        Ok(())
    }

    pub(super) fn delete_attr(&mut self, name: &str) -> RunResult<()> {
        let obj = self.pop()?;
        let removed = match &obj {
            Value::Instance(inst) => inst.del_attr(name),
            Value::Class(cls) => cls.del_attr(name),
            other => return Err(no_attribute(other, name)),
        };
        removed.map(drop).ok_or_else(|| no_attribute(&obj, name))
    }
}

/// Resolves `obj.name`.
pub(super) fn get_attr(obj: &Value, name: &str) -> RunResult<Value> {
    let found = match obj {
        Value::Instance(inst) => instance_attr(obj, inst, name),
        Value::Class(cls) => class_attr(cls, name),
        Value::Exception(exc) => match name {
            "args" => Some(Value::new_tuple(exc.args().to_vec())),
            "message" => Some(exception_message(exc.args())),
            _ => None,
        },
        Value::Function(func) => match name {
            "__name__" | "func_name" => Some(Value::from(func.name())),
            "func_defaults" => Some(match func.defaults() {
                [] => Value::None,
                defaults => Value::new_tuple(defaults.to_vec()),
            }),
            _ => None,
        },
        Value::Method(method) => match name {
            "__name__" => Some(Value::from(method.name())),
            "im_func" => Some(method.func.clone()),
            "im_self" => Some(method.instance.clone().unwrap_or(Value::None)),
            "im_class" => Some(Value::Class(method.class.clone())),
            _ => None,
        },
        Value::Generator(generator) if name == "__name__" => Some(Value::from(generator.borrow().name())),
        Value::ExcType(exc_type) if name == "__name__" => Some(Value::from(exc_type.to_string())),
        _ => None,
    };
    if let Some(value) = found {
        return Ok(value);
    }
    match NativeMethod::from_str(name) {
        Ok(method) if method.applies_to(obj) => Ok(Value::BuiltinMethod(Rc::new(BoundBuiltin {
            receiver: obj.clone(),
            method,
        }))),
        _ => Err(no_attribute(obj, name)),
    }
}

fn instance_attr(obj: &Value, inst: &Instance, name: &str) -> Option<Value> {
    if let Some(value) = inst.get_own(name) {
        return Some(value);
    }
    let class = inst.class();
    match class.lookup(name) {
        Some(func @ Value::Function(_)) => Some(Value::Method(Rc::new(Method {
            instance: Some(obj.clone()),
            class: class.clone(),
            func,
        }))),
        Some(value) => Some(value),
        None => match name {
            "__class__" => Some(Value::Class(class.clone())),
            "message" if class.exception_base().is_some() => Some(exception_message(&inst.exception_args())),
            _ => None,
        },
    }
}

fn class_attr(cls: &Rc<Class>, name: &str) -> Option<Value> {
    match cls.lookup(name) {
        Some(func @ Value::Function(_)) => Some(Value::Method(Rc::new(Method {
            instance: None,
            class: cls.clone(),
            func,
        }))),
        Some(value) => Some(value),
        None => match name {
            "__name__" => Some(Value::from(cls.name())),
            "__bases__" => Some(Value::new_tuple(cls.bases().to_vec())),
            _ => None,
        },
    }
}

/// Python 2's `BaseException.message`: the sole argument, or an empty string.
fn exception_message(args: &[Value]) -> Value {
    match args {
        [arg] => arg.clone(),
        _ => Value::from(""),
    }
}

fn no_attribute(obj: &Value, name: &str) -> RunError {
    match obj {
        Value::Instance(inst) => ExcType::attribute_error(format_args!("{} instance", inst.class().name()), name),
        Value::Class(cls) => ExcType::attribute_error(format_args!("class {}", cls.name()), name),
        other => ExcType::attribute_error(format_args!("'{}' object", other.type_name()), name),
    }
}
