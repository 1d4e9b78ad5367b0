/*! Python `super` class.

See also:

https://github.com/python/cpython/blob/50b48572d9a90c5bb36e2bef6179548ea927a35a/Objects/typeobject.c#L7663

*/

use super::{PyStr, PyType, PyTypeRef};
use crate::{PyObjectRef, PyPayload, PyResult, VirtualMachine, function::FuncArgs, vm::Context};

#[derive(Debug)]
pub struct PySuper {
    typ: PyTypeRef,
    obj: Option<(PyObjectRef, PyTypeRef)>,
}

impl PyPayload for PySuper {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.super_type
    }
}

impl PySuper {
    fn new(typ: PyTypeRef, obj: PyObjectRef, vm: &VirtualMachine) -> PyResult<Self> {
        let obj = if vm.is_none(&obj) {
            None
        } else {
            let obj_type = supercheck(&typ, &obj, vm)?;
            Some((obj, obj_type))
        };
        Ok(Self { typ, obj })
    }
}

/// `super()` without arguments: the `__class__` cell of the calling method and its first
/// argument.
fn implicit_args(vm: &VirtualMachine) -> PyResult<(PyTypeRef, PyObjectRef)> {
    let frame = vm
        .current_frame()
        .ok_or_else(|| vm.new_runtime_error("super(): no current frame"))?;
    if frame.code.argcount == 0 {
        return Err(vm.new_runtime_error("super(): no arguments"));
    }
    let obj = frame.fastlocals.borrow()[0].clone().or_else(|| {
        // the first argument was moved into a cell when the frame started
        let first = &frame.code.varnames[0];
        let i = frame.code.cellvars.iter().position(|name| name == first)?;
        frame.cells_frees[i].get()
    });
    let obj = obj.ok_or_else(|| vm.new_runtime_error("super(): arg[0] deleted"))?;

    let i = frame
        .code
        .freevars
        .iter()
        .position(|var| var == "__class__")
        .ok_or_else(|| vm.new_runtime_error("super(): __class__ cell not found"))?;
    let class = frame.cells_frees[frame.code.cellvars.len() + i]
        .get()
        .ok_or_else(|| vm.new_runtime_error("super(): empty __class__ cell"))?;
    let typ = class.downcast::<PyType>().map_err(|o| {
        vm.new_type_error(format!(
            "super(): __class__ is not a type ({})",
            o.class().name()
        ))
    })?;
    Ok((typ, obj))
}

fn super_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("super.__new__", vm)?.try_into_value(vm)?;
    let [py_type, py_obj] = args.bind_optional::<2>("super", 0, vm)?;
    let (typ, obj) = match py_type {
        Some(typ) => (
            typ.try_into_value::<PyTypeRef>(vm)?,
            py_obj.unwrap_or_else(|| vm.ctx.none()),
        ),
        None => implicit_args(vm)?,
    };
    Ok(PySuper::new(typ, obj, vm)?
        .into_ref_with_type(vm, cls)?
        .into())
}

fn super_getattribute(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySuper>("__getattribute__", vm)?;
    let [name] = args.bind("__getattribute__", vm)?;
    let name = name.try_into_value::<crate::PyRef<PyStr>>(vm)?;
    let name = name.as_str();
    let skip = |zelf: crate::PyRef<PySuper>| -> PyResult {
        vm.generic_getattr_opt(zelf.as_object(), name)?
            .ok_or_else(|| vm.new_attribute_error(format!("'super' object has no attribute '{name}'")))
    };
    let Some((inst, obj_type)) = zelf.obj.clone() else {
        return skip(zelf);
    };
    if name == "__class__" {
        return skip(zelf);
    }
    // skip the classes in obj_type.mro up to and including zelf.typ
    let found = obj_type
        .iter_mro()
        .skip_while(|cls| !cls.is(&zelf.typ))
        .skip(1)
        .find_map(|cls| cls.get_direct_attr(name));
    match found {
        Some(descr) => {
            let inst = if inst.is(&obj_type) { None } else { Some(&inst) };
            vm.call_get_descriptor(&descr, inst, obj_type.as_object())
                .unwrap_or(Ok(descr))
        }
        None => skip(zelf),
    }
}

fn super_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySuper>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    let typname = zelf.typ.name();
    let repr = match &zelf.obj {
        Some((_, ty)) => format!("<super: <class '{typname}'>, <{} object>>", ty.name()),
        None => format!("<super: <class '{typname}'>, NULL>"),
    };
    Ok(vm.ctx.new_str(repr).into())
}

fn super_get(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySuper>("__get__", vm)?;
    let [obj, _cls] = args.bind_optional::<2>("__get__", 1, vm)?;
    let obj = obj.and_then(|obj| vm.option_if_none(obj));
    match obj {
        Some(obj) if zelf.obj.is_none() => {
            let bound = PySuper::new(zelf.typ.clone(), obj, vm)?;
            Ok(bound.into_ref_with_type(vm, zelf.class().clone())?.into())
        }
        _ => Ok(zelf.into()),
    }
}

fn super_thisclass(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__thisclass__", vm)?;
    Ok(zelf.try_downcast::<PySuper>(vm)?.typ.clone().into())
}

fn super_self(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__self__", vm)?;
    let zelf = zelf.try_downcast::<PySuper>(vm)?;
    Ok(zelf
        .obj
        .as_ref()
        .map_or_else(|| vm.ctx.none(), |(obj, _)| obj.clone()))
}

fn supercheck(ty: &PyTypeRef, obj: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyTypeRef> {
    if let Some(cls) = obj.payload::<PyType>()
        && cls.fast_issubclass(ty)
        && let Ok(cls) = obj.clone().downcast::<PyType>()
    {
        return Ok(cls);
    }
    if obj.class().fast_issubclass(ty) {
        return Ok(obj.class().clone());
    }
    Err(vm.new_type_error("super(type, obj): obj must be an instance or subtype of type"))
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.super_type, {
        "__new__" => ctx.new_staticmethod("__new__", super_new),
        "__getattribute__" => ctx.new_method("__getattribute__", super_getattribute),
        "__get__" => ctx.new_method("__get__", super_get),
        "__repr__" => ctx.new_method("__repr__", super_repr),
        "__thisclass__" => ctx.new_readonly_getset("__thisclass__", super_thisclass),
        "__self__" => ctx.new_readonly_getset("__self__", super_self),
    });
}
