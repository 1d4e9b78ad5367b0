/*! Python `property` descriptor class.

*/
use super::PyTypeRef;
use crate::{PyObjectRef, PyPayload, PyResult, VirtualMachine, function::FuncArgs, vm::Context};
use core::cell::RefCell;

#[derive(Debug)]
pub struct PyProperty {
    getter: RefCell<Option<PyObjectRef>>,
    setter: RefCell<Option<PyObjectRef>>,
    deleter: RefCell<Option<PyObjectRef>>,
    doc: RefCell<Option<PyObjectRef>>,
}

impl PyPayload for PyProperty {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.property_type
    }
}

impl PyProperty {
    pub fn new(
        getter: Option<PyObjectRef>,
        setter: Option<PyObjectRef>,
        deleter: Option<PyObjectRef>,
    ) -> Self {
        Self {
            getter: RefCell::new(getter),
            setter: RefCell::new(setter),
            deleter: RefCell::new(deleter),
            doc: RefCell::new(None),
        }
    }

    pub fn get(&self, obj: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
        let getter = self.getter.borrow().clone();
        match getter {
            Some(getter) => vm.invoke(&getter, (obj.clone(),)),
            None => Err(vm.new_attribute_error("unreadable attribute")),
        }
    }

    /// Runs the setter, or the deleter when `value` is `None`.
    pub fn set(
        &self,
        obj: &PyObjectRef,
        value: Option<PyObjectRef>,
        vm: &VirtualMachine,
    ) -> PyResult<()> {
        match value {
            Some(value) => {
                let setter = self.setter.borrow().clone();
                let setter = setter.ok_or_else(|| vm.new_attribute_error("can't set attribute"))?;
                vm.invoke(&setter, (obj.clone(), value))?;
            }
            None => {
                let deleter = self.deleter.borrow().clone();
                let deleter =
                    deleter.ok_or_else(|| vm.new_attribute_error("can't delete attribute"))?;
                vm.invoke(&deleter, (obj.clone(),))?;
            }
        }
        Ok(())
    }

    /// A copy of `zelf` with one accessor replaced, as `@x.setter` and friends produce.
    fn copy_with(
        zelf: &PyProperty,
        cls: PyTypeRef,
        getter: Option<PyObjectRef>,
        setter: Option<PyObjectRef>,
        deleter: Option<PyObjectRef>,
        vm: &VirtualMachine,
    ) -> PyResult {
        let copy = Self::new(
            getter.or_else(|| zelf.getter.borrow().clone()),
            setter.or_else(|| zelf.setter.borrow().clone()),
            deleter.or_else(|| zelf.deleter.borrow().clone()),
        );
        *copy.doc.borrow_mut() = zelf.doc.borrow().clone();
        Ok(copy.into_ref_with_type(vm, cls)?.into())
    }
}

fn property_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("property.__new__", vm)?.try_into_value(vm)?;
    Ok(PyProperty::new(None, None, None)
        .into_ref_with_type(vm, cls)?
        .into())
}

fn property_init(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyProperty>("__init__", vm)?;
    let mut slots: [Option<PyObjectRef>; 4] = Default::default();
    for (slot, name) in slots.iter_mut().zip(["fget", "fset", "fdel", "doc"]) {
        *slot = args.take_keyword(name);
    }
    let given = args.args.len();
    if given > 4 {
        return Err(vm.new_type_error(format!(
            "property() takes at most 4 arguments ({given} given)"
        )));
    }
    for (i, arg) in args.args.drain(..).enumerate() {
        if slots[i].is_some() {
            return Err(vm.new_type_error(format!(
                "argument for property() given by name and position (position {})",
                i + 1
            )));
        }
        slots[i] = Some(arg);
    }
    args.check_kwargs_empty("property", vm)?;
    let [fget, fset, fdel, doc] = slots.map(|slot| slot.and_then(|o| vm.option_if_none(o)));
    let doc = match doc {
        Some(doc) => Some(doc),
        None => match &fget {
            Some(fget) => vm.get_attribute_opt(fget, "__doc__")?,
            None => None,
        },
    };
    *zelf.getter.borrow_mut() = fget;
    *zelf.setter.borrow_mut() = fset;
    *zelf.deleter.borrow_mut() = fdel;
    *zelf.doc.borrow_mut() = doc;
    Ok(vm.ctx.none())
}

fn property_get(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyProperty>("__get__", vm)?;
    let [obj, _cls] = args.bind_optional::<2>("__get__", 1, vm)?;
    match obj.and_then(|obj| vm.option_if_none(obj)) {
        Some(obj) => zelf.get(&obj, vm),
        None => Ok(zelf.into()),
    }
}

fn property_set(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyProperty>("__set__", vm)?;
    let [obj, value] = args.bind("__set__", vm)?;
    zelf.set(&obj, Some(value), vm)?;
    Ok(vm.ctx.none())
}

fn property_delete(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyProperty>("__delete__", vm)?;
    let [obj] = args.bind("__delete__", vm)?;
    zelf.set(&obj, None, vm)?;
    Ok(vm.ctx.none())
}

macro_rules! accessor_copy {
    ($fn_name:ident, $name:literal, $slot:literal) => {
        fn $fn_name(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
            let zelf = args.take_zelf::<PyProperty>($name, vm)?;
            let [func] = args.bind($name, vm)?;
            let cls = zelf.class().clone();
            let func = vm.option_if_none(func);
            match $slot {
                0 => PyProperty::copy_with(&zelf, cls, func, None, None, vm),
                1 => PyProperty::copy_with(&zelf, cls, None, func, None, vm),
                _ => PyProperty::copy_with(&zelf, cls, None, None, func, vm),
            }
        }
    };
}

accessor_copy!(property_getter, "getter", 0);
accessor_copy!(property_setter, "setter", 1);
accessor_copy!(property_deleter, "deleter", 2);

macro_rules! accessor_field {
    ($fn_name:ident, $name:literal, $field:ident) => {
        fn $fn_name(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
            let [zelf] = args.bind($name, vm)?;
            let zelf = zelf.try_downcast::<PyProperty>(vm)?;
            let value = zelf.$field.borrow().clone();
            Ok(value.unwrap_or_else(|| vm.ctx.none()))
        }
    };
}

accessor_field!(property_fget, "fget", getter);
accessor_field!(property_fset, "fset", setter);
accessor_field!(property_fdel, "fdel", deleter);
accessor_field!(property_doc, "__doc__", doc);

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.property_type, {
        "__new__" => ctx.new_staticmethod("__new__", property_new),
        "__init__" => ctx.new_method("__init__", property_init),
        "__get__" => ctx.new_method("__get__", property_get),
        "__set__" => ctx.new_method("__set__", property_set),
        "__delete__" => ctx.new_method("__delete__", property_delete),
        "getter" => ctx.new_method("getter", property_getter),
        "setter" => ctx.new_method("setter", property_setter),
        "deleter" => ctx.new_method("deleter", property_deleter),
        "fget" => ctx.new_readonly_getset("fget", property_fget),
        "fset" => ctx.new_readonly_getset("fset", property_fset),
        "fdel" => ctx.new_readonly_getset("fdel", property_fdel),
        "__doc__" => ctx.new_readonly_getset("__doc__", property_doc),
    });
}
