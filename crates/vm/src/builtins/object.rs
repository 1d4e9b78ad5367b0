use super::{PyStr, PyStrRef, PyTypeRef};
use crate::{
    PyObjectRef, PyPayload, PyResult, VirtualMachine, function::FuncArgs, hash, vm::Context,
};
use itertools::Itertools;

/// object()
/// --
///
/// The base class of the class hierarchy.
///
/// When called, it accepts no arguments and returns a new featureless
/// instance that has no instance attributes and cannot be given any.
#[derive(Debug)]
pub struct PyBaseObject;

impl PyPayload for PyBaseObject {
    #[inline]
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.object_type
    }
}

fn is_object_slot(cls: &PyTypeRef, name: &str, vm: &VirtualMachine) -> bool {
    match (cls.get_attr(name), vm.ctx.types.object_type.get_direct_attr(name)) {
        (Some(own), Some(object_slot)) => own.is(&object_slot),
        _ => false,
    }
}

// = object_new
fn object_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("object.__new__", vm)?.try_into_value(vm)?;
    if !args.is_empty() {
        if !is_object_slot(&cls, "__new__", vm) {
            // the type has its own __new__ that passed its arguments on
            return Err(vm.new_type_error(
                "object.__new__() takes exactly one argument (the type to instantiate)",
            ));
        }
        if is_object_slot(&cls, "__init__", vm) {
            return Err(vm.new_type_error(format!("{}() takes no arguments", cls.name())));
        }
    }
    if !cls.is_heap_type() && !cls.is(&vm.ctx.types.object_type) {
        return Err(vm.new_type_error(format!(
            "object.__new__({}) is not safe, use {}.__new__()",
            cls.name(),
            cls.name()
        )));
    }
    Ok(PyBaseObject.into_ref_with_type(vm, cls)?.into())
}

// = object_init
fn object_init(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_first("object.__init__", vm)?;
    if !args.is_empty() {
        let cls = zelf.class();
        if !is_object_slot(cls, "__init__", vm) {
            return Err(vm.new_type_error(
                "object.__init__() takes exactly one argument (the instance to initialize)",
            ));
        }
        if is_object_slot(cls, "__new__", vm) {
            return Err(vm.new_type_error(format!(
                "{}.__init__() takes exactly one argument (the instance to initialize)",
                cls.name()
            )));
        }
    }
    Ok(vm.ctx.none())
}

fn object_eq(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf, other] = args.bind("__eq__", vm)?;
    Ok(if zelf.is(&other) {
        vm.ctx.new_bool(true)
    } else {
        vm.ctx.not_implemented()
    })
}

/// Inverts `__eq__`, unless it gave up.
fn object_ne(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf, other] = args.bind("__ne__", vm)?;
    let eq = vm.call_special_method(&zelf, "__eq__", (other,))?;
    if eq.is(&vm.ctx.not_implemented) {
        return Ok(eq);
    }
    Ok(vm.ctx.new_bool(!eq.is_true(vm)?))
}

fn object_hash(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__hash__", vm)?;
    // pointers are aligned, rotate the bits that never vary out of the way
    let value = hash::fix_sentinel(zelf.get_id().rotate_right(4) as i64);
    Ok(vm.ctx.new_int(value).into())
}

pub(crate) fn object_repr_string(zelf: &PyObjectRef) -> String {
    let class = zelf.class();
    let qualname = class.qualname();
    match class.module_name().as_str() {
        "builtins" => format!("<{qualname} object at {:#x}>", zelf.get_id()),
        module => format!("<{module}.{qualname} object at {:#x}>", zelf.get_id()),
    }
}

fn object_repr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__repr__", vm)?;
    Ok(vm.ctx.new_str(object_repr_string(&zelf)).into())
}

fn object_str(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__str__", vm)?;
    Ok(zelf.repr(vm)?.into())
}

fn object_format(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf, spec] = args.bind("__format__", vm)?;
    let spec: PyStrRef = spec.try_into_value(vm)?;
    if !spec.as_str().is_empty() {
        return Err(vm.new_type_error(format!(
            "unsupported format string passed to {}.__format__",
            zelf.class().name()
        )));
    }
    Ok(zelf.str(vm)?.into())
}

fn attr_name(name: &PyObjectRef, vm: &VirtualMachine) -> PyResult<String> {
    match name.payload::<PyStr>() {
        Some(name) => Ok(name.as_str().to_owned()),
        None => Err(vm.new_type_error(format!(
            "attribute name must be string, not '{}'",
            name.class().name()
        ))),
    }
}

fn object_getattribute(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf, name] = args.bind("__getattribute__", vm)?;
    let name = attr_name(&name, vm)?;
    vm.generic_getattr_opt(&zelf, &name)?.ok_or_else(|| {
        vm.new_attribute_error(format!(
            "'{}' object has no attribute '{name}'",
            zelf.class().name()
        ))
    })
}

fn object_setattr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf, name, value] = args.bind("__setattr__", vm)?;
    let name = attr_name(&name, vm)?;
    vm.generic_setattr(&zelf, &name, Some(value))?;
    Ok(vm.ctx.none())
}

fn object_delattr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf, name] = args.bind("__delattr__", vm)?;
    let name = attr_name(&name, vm)?;
    vm.generic_setattr(&zelf, &name, None)?;
    Ok(vm.ctx.none())
}

/// Names visible on an object: its own dict, then its class and the class's MRO.
fn object_dir(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__dir__", vm)?;
    let mut names = vec![];
    if let Some(dict) = zelf.dict() {
        names.extend(dict.keys());
    }
    let class_names = zelf.class().get_attributes();
    names.extend(class_names.keys().map(|name| vm.ctx.new_str(name.as_str()).into()));
    let names = names
        .into_iter()
        .unique_by(|name| name.payload::<PyStr>().map(|s| s.as_str().to_owned()))
        .collect();
    Ok(vm.ctx.new_list(names).into())
}

fn object_get_class(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__class__", vm)?;
    Ok(zelf.class().clone().into())
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.object_type, {
        "__new__" => ctx.new_staticmethod("__new__", object_new),
        "__init__" => ctx.new_method("__init__", object_init),
        "__eq__" => ctx.new_method("__eq__", object_eq),
        "__ne__" => ctx.new_method("__ne__", object_ne),
        "__hash__" => ctx.new_method("__hash__", object_hash),
        "__repr__" => ctx.new_method("__repr__", object_repr),
        "__str__" => ctx.new_method("__str__", object_str),
        "__format__" => ctx.new_method("__format__", object_format),
        "__getattribute__" => ctx.new_method("__getattribute__", object_getattribute),
        "__setattr__" => ctx.new_method("__setattr__", object_setattr),
        "__delattr__" => ctx.new_method("__delattr__", object_delattr),
        "__dir__" => ctx.new_method("__dir__", object_dir),
        "__class__" => ctx.new_readonly_getset("__class__", object_get_class),
    });
}
