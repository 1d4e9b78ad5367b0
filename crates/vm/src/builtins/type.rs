//! The `type` type: classes, their attribute tables and method resolution order.

use super::{PyDictRef, PyStr, PyTupleRef, function::PyFunction};
use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, VirtualMachine,
    builtins::{PyCell, PyStaticMethod},
    function::FuncArgs,
    vm::Context,
};
use bitflags::bitflags;
use core::{cell::RefCell, fmt, ptr};
use indexmap::IndexMap;
use itertools::Itertools;

/// A class's own attribute table, in definition order.
pub type PyAttributes = IndexMap<String, PyObjectRef>;

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct PyTypeFlags: u8 {
        /// Created by a class statement or a three argument `type()` call.
        const HEAPTYPE = 1 << 0;
        /// May be used as a base class.
        const BASETYPE = 1 << 1;
        /// Some class in the MRO overrides `__getattribute__`.
        const HAS_GETATTRIBUTE = 1 << 2;
        /// Some class in the MRO overrides `__setattr__` or `__delattr__`.
        const HAS_SETATTR = 1 << 3;
    }
}

pub struct PyType {
    name: String,
    pub base: Option<PyTypeRef>,
    pub bases: Vec<PyTypeRef>,
    /// Method resolution order, without the type itself.
    pub mro: Vec<PyTypeRef>,
    pub attributes: RefCell<PyAttributes>,
    pub flags: PyTypeFlags,
}

pub type PyTypeRef = PyRef<PyType>;

impl fmt::Debug for PyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[PyType {}]", self.name)
    }
}

impl PyPayload for PyType {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.type_type
    }
}

impl PyType {
    /// The root of every hierarchy: a type without bases.
    pub(crate) fn new_root(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            base: None,
            bases: vec![],
            mro: vec![],
            attributes: RefCell::default(),
            flags: PyTypeFlags::BASETYPE,
        }
    }

    /// A builtin type with a single base.
    pub(crate) fn new_builtin(name: &str, base: &PyTypeRef) -> Self {
        let mro = core::iter::once(base.clone())
            .chain(base.mro.iter().cloned())
            .collect();
        Self {
            name: name.to_owned(),
            base: Some(base.clone()),
            bases: vec![base.clone()],
            mro,
            attributes: RefCell::default(),
            flags: base.flags & (PyTypeFlags::HAS_GETATTRIBUTE | PyTypeFlags::HAS_SETATTR),
        }
    }

    pub(crate) fn new_static(
        name: &str,
        base: &PyTypeRef,
        flags: PyTypeFlags,
        metatype: &PyTypeRef,
    ) -> PyTypeRef {
        let mut typ = Self::new_builtin(name, base);
        typ.flags |= flags;
        PyRef::new_ref(typ, metatype.clone(), None)
    }

    /// Creates a class the way a class statement does.
    pub fn new_heap(
        name: &str,
        bases: Vec<PyTypeRef>,
        attributes: PyAttributes,
        metatype: PyTypeRef,
        vm: &VirtualMachine,
    ) -> PyResult<PyTypeRef> {
        let bases = if bases.is_empty() {
            vec![vm.ctx.types.object_type.clone()]
        } else {
            bases
        };
        for base in &bases {
            if !base.flags.contains(PyTypeFlags::BASETYPE) {
                return Err(vm.new_type_error(format!(
                    "type '{}' is not an acceptable base type",
                    base.name()
                )));
            }
        }
        if let Some((_, dup)) = bases
            .iter()
            .tuple_combinations()
            .find(|(a, b)| a.is(b))
        {
            return Err(vm.new_type_error(format!("duplicate base class {}", dup.name())));
        }

        let mro = linearise_mro(bases.iter().map(|base| base.iter_mro().cloned().collect()).collect())
            .map_err(|msg| vm.new_type_error(msg))?;

        let mut flags = PyTypeFlags::HEAPTYPE | PyTypeFlags::BASETYPE;
        for base in &bases {
            flags |= base.flags & (PyTypeFlags::HAS_GETATTRIBUTE | PyTypeFlags::HAS_SETATTR);
        }
        if attributes.contains_key("__getattribute__") {
            flags |= PyTypeFlags::HAS_GETATTRIBUTE;
        }
        if attributes.contains_key("__setattr__") || attributes.contains_key("__delattr__") {
            flags |= PyTypeFlags::HAS_SETATTR;
        }

        let typ = Self {
            name: name.to_owned(),
            base: bases.first().cloned(),
            bases,
            mro,
            attributes: RefCell::new(attributes),
            flags,
        };
        Ok(PyRef::new_ref(typ, metatype, None))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_heap_type(&self) -> bool {
        self.flags.contains(PyTypeFlags::HEAPTYPE)
    }

    /// `__qualname__` of a heap type, the plain name otherwise.
    pub fn qualname(&self) -> String {
        self.attributes
            .borrow()
            .get("__qualname__")
            .and_then(|q| q.payload::<PyStr>().map(|s| s.as_str().to_owned()))
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn module_name(&self) -> String {
        self.attributes
            .borrow()
            .get("__module__")
            .and_then(|m| m.payload::<PyStr>().map(|s| s.as_str().to_owned()))
            .unwrap_or_else(|| "builtins".to_owned())
    }

    /// Subclass test against the MRO, without consulting `__subclasscheck__`.
    pub fn fast_issubclass(&self, other: &Self) -> bool {
        ptr::eq(self, other) || self.mro.iter().any(|c| ptr::eq(&**c, other))
    }

    pub fn set_attr(&self, name: &str, value: PyObjectRef) {
        self.attributes.borrow_mut().insert(name.to_owned(), value);
    }

    pub fn del_attr(&self, name: &str) -> Option<PyObjectRef> {
        self.attributes.borrow_mut().shift_remove(name)
    }

    /// Finds `name` in this type or the first class of its MRO that defines it.
    pub fn get_attr(&self, name: &str) -> Option<PyObjectRef> {
        self.get_direct_attr(name)
            .or_else(|| self.mro.iter().find_map(|cls| cls.get_direct_attr(name)))
    }

    pub fn get_direct_attr(&self, name: &str) -> Option<PyObjectRef> {
        self.attributes.borrow().get(name).cloned()
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.borrow().contains_key(name)
            || self
                .mro
                .iter()
                .any(|cls| cls.attributes.borrow().contains_key(name))
    }

    /// Every attribute visible through the MRO, nearest definition winning.
    pub fn get_attributes(&self) -> PyAttributes {
        let mut attributes = PyAttributes::default();
        for cls in self.mro.iter().rev() {
            for (name, value) in cls.attributes.borrow().iter() {
                attributes.insert(name.clone(), value.clone());
            }
        }
        for (name, value) in self.attributes.borrow().iter() {
            attributes.insert(name.clone(), value.clone());
        }
        attributes
    }
}

impl PyRef<PyType> {
    /// The full MRO, starting with the type itself.
    pub fn iter_mro(&self) -> impl DoubleEndedIterator<Item = &PyTypeRef> {
        core::iter::once(self).chain(self.mro.iter())
    }

    pub fn mro_collect(&self) -> Vec<PyTypeRef> {
        self.iter_mro().cloned().collect()
    }

    /// Calls the class: `__new__` builds the instance and `__init__` initialises it when the
    /// result is an instance of this class.
    pub fn call(&self, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
        if self.is(&vm.ctx.types.type_type) && args.args.len() == 1 && args.kwargs.is_empty() {
            return Ok(args.args[0].class().clone().into());
        }
        vm_trace!("instantiate {}", self.name());

        let new = self
            .get_attr("__new__")
            .ok_or_else(|| vm.new_type_error(format!("cannot create '{}' instances", self.name())))?;
        let new = vm
            .call_get_descriptor(&new, None, self.as_object())
            .unwrap_or(Ok(new))?;
        let mut new_args = args.clone();
        new_args.prepend_arg(self.clone().into());
        let obj = vm.invoke(&new, new_args)?;

        if obj.class().fast_issubclass(self) {
            let init = obj.class().get_attr("__init__");
            if let Some(init) = init {
                let res = vm.call_with_self(&init, obj.clone(), args)?;
                if !vm.is_none(&res) {
                    return Err(vm.new_type_error(format!(
                        "__init__() should return None, not '{}'",
                        res.class().name()
                    )));
                }
            }
        }
        Ok(obj)
    }
}

fn take_next_base(bases: &mut [Vec<PyTypeRef>]) -> Option<PyTypeRef> {
    for base in bases.iter() {
        let head = base[0].clone();
        if !bases.iter().any(|x| x[1..].iter().any(|x| x.is(&head))) {
            for item in bases.iter_mut() {
                if item[0].is(&head) {
                    item.remove(0);
                }
            }
            return Some(head);
        }
    }
    None
}

/// C3 merge of the bases' MROs. Every class appears after all of its subclasses, the bases
/// keep their local order, and `object` ends up last.
fn linearise_mro(mut bases: Vec<Vec<PyTypeRef>>) -> Result<Vec<PyTypeRef>, String> {
    vm_trace!("linearise MRO: {:?}", bases);
    for (i, base_mro) in bases.iter().enumerate() {
        let base = &base_mro[0];
        for later_mro in &bases[i + 1..] {
            if later_mro[1..].iter().any(|cls| cls.is(base)) {
                return Err(
                    "Unable to find mro order which keeps local precedence ordering".to_owned(),
                );
            }
        }
    }

    let mut result = vec![];
    while !bases.is_empty() {
        let head = take_next_base(&mut bases).ok_or_else(|| {
            format!(
                "Cannot create a consistent method resolution order (MRO) for bases {}",
                bases.iter().map(|x| x[0].name().to_owned()).join(", ")
            )
        })?;
        result.push(head);
        bases.retain(|x| !x.is_empty());
    }
    Ok(result)
}

fn zelf_type(args: &FuncArgs, name: &str, vm: &VirtualMachine) -> PyResult<PyTypeRef> {
    args.args
        .first()
        .cloned()
        .ok_or_else(|| vm.new_type_error(format!("descriptor '{name}' of 'type' object needs an argument")))?
        .try_into_value(vm)
}

/// `type(obj)` or `type(name, bases, namespace)`.
fn type_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let metatype: PyTypeRef = args.take_first("type.__new__", vm)?.try_into_value(vm)?;
    match args.args.len() {
        1 if metatype.is(&vm.ctx.types.type_type) => {
            return Ok(args.args[0].class().clone().into());
        }
        3 => {}
        _ => return Err(vm.new_type_error("type() takes 1 or 3 arguments")),
    }
    let [name, bases, namespace] = args.bind("type.__new__", vm)?;
    let name: PyRef<PyStr> = name.try_into_value(vm)?;
    let bases: PyTupleRef = bases.try_into_value(vm)?;
    let namespace: PyDictRef = namespace.try_into_value(vm)?;
    let bases = bases
        .iter()
        .map(|base| {
            base.clone()
                .downcast::<PyType>()
                .map_err(|_| vm.new_type_error("bases must be types"))
        })
        .collect::<PyResult<Vec<_>>>()?;
    new_class(metatype, name.as_str(), bases, &namespace, vm).map(Into::into)
}

/// Builds a heap type from a class body namespace.
pub(crate) fn new_class(
    metatype: PyTypeRef,
    name: &str,
    bases: Vec<PyTypeRef>,
    namespace: &PyDictRef,
    vm: &VirtualMachine,
) -> PyResult<PyTypeRef> {
    let mut attributes = PyAttributes::default();
    let mut classcell = None;
    for (key, value) in namespace.items() {
        let key: PyRef<PyStr> = key
            .downcast()
            .map_err(|_| vm.new_type_error("class namespace keys must be strings"))?;
        match key.as_str() {
            "__classcell__" => {
                let cell = value.downcast::<PyCell>().map_err(|v| {
                    vm.new_type_error(format!(
                        "__classcell__ must be a nonlocal cell, not {}",
                        v.class().name()
                    ))
                })?;
                classcell = Some(cell);
            }
            "__new__" if value.payload_is::<PyFunction>() => {
                let wrapped = PyStaticMethod::new(value).into_ref(&vm.ctx);
                attributes.insert("__new__".to_owned(), wrapped.into());
            }
            key => {
                attributes.insert(key.to_owned(), value);
            }
        }
    }
    if !attributes.contains_key("__module__") {
        if let Some(module) = vm
            .current_globals()
            .and_then(|globals| globals.get_item_str("__name__", vm))
        {
            attributes.insert("__module__".to_owned(), module);
        }
    }
    // overriding equality without a hash makes instances unhashable
    if attributes.contains_key("__eq__") && !attributes.contains_key("__hash__") {
        attributes.insert("__hash__".to_owned(), vm.ctx.none());
    }
    if !attributes.contains_key("__qualname__") {
        attributes.insert("__qualname__".to_owned(), vm.ctx.new_str(name).into());
    }

    let typ = PyType::new_heap(name, bases, attributes, metatype, vm)?;
    if let Some(cell) = classcell {
        cell.set(Some(typ.clone().into()));
    }
    debug!("created class {}", typ.name());
    Ok(typ)
}

fn type_call(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = zelf_type(&args, "__call__", vm)?;
    args.args.remove(0);
    zelf.call(args, vm)
}

fn type_repr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__repr__", vm)?;
    let zelf: PyTypeRef = zelf.try_into_value(vm)?;
    let module = zelf.module_name();
    let repr = if module == "builtins" {
        format!("<class '{}'>", zelf.qualname())
    } else {
        format!("<class '{module}.{}'>", zelf.qualname())
    };
    Ok(vm.ctx.new_str(repr).into())
}

fn type_mro(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("mro", vm)?;
    let zelf: PyTypeRef = zelf.try_into_value(vm)?;
    let mro = zelf.iter_mro().map(|cls| cls.clone().into()).collect();
    Ok(vm.ctx.new_list(mro).into())
}

fn type_get_mro(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__mro__", vm)?;
    let zelf: PyTypeRef = zelf.try_into_value(vm)?;
    let mro = zelf.iter_mro().map(|cls| cls.clone().into()).collect();
    Ok(vm.ctx.new_tuple(mro).into())
}

fn type_get_name(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__name__", vm)?;
    let zelf: PyTypeRef = zelf.try_into_value(vm)?;
    Ok(vm.ctx.new_str(zelf.name()).into())
}

fn type_get_qualname(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__qualname__", vm)?;
    let zelf: PyTypeRef = zelf.try_into_value(vm)?;
    Ok(vm.ctx.new_str(zelf.qualname()).into())
}

fn type_get_module(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__module__", vm)?;
    let zelf: PyTypeRef = zelf.try_into_value(vm)?;
    Ok(vm.ctx.new_str(zelf.module_name()).into())
}

fn type_get_bases(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__bases__", vm)?;
    let zelf: PyTypeRef = zelf.try_into_value(vm)?;
    let bases = zelf.bases.iter().map(|cls| cls.clone().into()).collect();
    Ok(vm.ctx.new_tuple(bases).into())
}

fn type_get_base(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__base__", vm)?;
    let zelf: PyTypeRef = zelf.try_into_value(vm)?;
    Ok(zelf
        .base
        .clone()
        .map_or_else(|| vm.ctx.none(), Into::into))
}

fn type_get_dict(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__dict__", vm)?;
    let zelf: PyTypeRef = zelf.try_into_value(vm)?;
    let dict = vm.ctx.new_dict();
    let attributes = zelf.attributes.borrow().clone();
    for (name, value) in attributes {
        dict.set_item_str(&name, value, vm);
    }
    Ok(dict.into())
}

fn type_subclasscheck(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf, sub] = args.bind("__subclasscheck__", vm)?;
    let zelf: PyTypeRef = zelf.try_into_value(vm)?;
    let sub: PyTypeRef = sub.try_into_value(vm)?;
    Ok(vm.ctx.new_bool(sub.fast_issubclass(&zelf)))
}

fn type_instancecheck(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf, obj] = args.bind("__instancecheck__", vm)?;
    let zelf: PyTypeRef = zelf.try_into_value(vm)?;
    Ok(vm.ctx.new_bool(obj.class().fast_issubclass(&zelf)))
}

/// Attribute lookup on a class object: data descriptors of the metatype, then the class's own
/// MRO (binding with no instance), then the rest of the metatype.
pub(crate) fn type_getattro(
    zelf: &PyTypeRef,
    name: &str,
    vm: &VirtualMachine,
) -> PyResult<Option<PyObjectRef>> {
    let metatype = zelf.as_object().class();
    let meta_attr = metatype.get_attr(name);

    if let Some(attr) = &meta_attr {
        if vm.is_data_descriptor(attr) {
            if let Some(res) = vm.call_get_descriptor(attr, Some(zelf.as_object()), metatype.as_object()) {
                return res.map(Some);
            }
        }
    }

    if let Some(attr) = zelf.get_attr(name) {
        return match vm.call_get_descriptor(&attr, None, zelf.as_object()) {
            Some(res) => res.map(Some),
            None => Ok(Some(attr)),
        };
    }

    if let Some(attr) = meta_attr {
        return match vm.call_get_descriptor(&attr, Some(zelf.as_object()), metatype.as_object()) {
            Some(res) => res.map(Some),
            None => Ok(Some(attr)),
        };
    }
    Ok(None)
}

/// Attribute assignment on a class object; `value` of `None` deletes.
pub(crate) fn type_setattro(
    zelf: &PyTypeRef,
    name: &str,
    value: Option<PyObjectRef>,
    vm: &VirtualMachine,
) -> PyResult<()> {
    let metatype = zelf.as_object().class();
    if let Some(attr) = metatype.get_attr(name) {
        if vm.call_set_descriptor(&attr, zelf.as_object(), value.clone())? {
            return Ok(());
        }
    }
    if !zelf.is_heap_type() {
        return Err(vm.new_type_error(format!(
            "can't set attributes of built-in/extension type '{}'",
            zelf.name()
        )));
    }
    match value {
        Some(value) => zelf.set_attr(name, value),
        None => {
            if zelf.del_attr(name).is_none() {
                return Err(vm.new_attribute_error(format!(
                    "type object '{}' has no attribute '{name}'",
                    zelf.name()
                )));
            }
        }
    }
    Ok(())
}

pub(crate) fn init(ctx: &Context) {
    let type_type = &ctx.types.type_type;
    extend_class!(ctx, type_type, {
        "__new__" => ctx.new_staticmethod("__new__", type_new),
        "__call__" => ctx.new_method("__call__", type_call),
        "__repr__" => ctx.new_method("__repr__", type_repr),
        "mro" => ctx.new_method("mro", type_mro),
        "__subclasscheck__" => ctx.new_method("__subclasscheck__", type_subclasscheck),
        "__instancecheck__" => ctx.new_method("__instancecheck__", type_instancecheck),
        "__mro__" => ctx.new_readonly_getset("__mro__", type_get_mro),
        "__name__" => ctx.new_readonly_getset("__name__", type_get_name),
        "__qualname__" => ctx.new_readonly_getset("__qualname__", type_get_qualname),
        "__module__" => ctx.new_readonly_getset("__module__", type_get_module),
        "__bases__" => ctx.new_readonly_getset("__bases__", type_get_bases),
        "__base__" => ctx.new_readonly_getset("__base__", type_get_base),
        "__dict__" => ctx.new_readonly_getset("__dict__", type_get_dict),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Interpreter;

    fn class(vm: &VirtualMachine, name: &str, bases: &[&PyTypeRef]) -> PyTypeRef {
        PyType::new_heap(
            name,
            bases.iter().map(|&b| b.clone()).collect(),
            PyAttributes::default(),
            vm.ctx.types.type_type.clone(),
            vm,
        )
        .unwrap()
    }

    fn names(typ: &PyTypeRef) -> Vec<String> {
        typ.iter_mro().map(|cls| cls.name().to_owned()).collect()
    }

    #[test]
    fn diamond_mro() {
        Interpreter::new(Default::default()).enter(|vm| {
            let a = class(vm, "A", &[]);
            let b = class(vm, "B", &[&a]);
            let c = class(vm, "C", &[&a]);
            let d = class(vm, "D", &[&b, &c]);
            assert_eq!(names(&d), ["D", "B", "C", "A", "object"]);
            // stable across calls
            assert_eq!(names(&d), names(&d));
        })
    }

    #[test]
    fn inconsistent_bases_are_rejected() {
        Interpreter::new(Default::default()).enter(|vm| {
            let a = class(vm, "A", &[]);
            let b = class(vm, "B", &[&a]);
            let err = PyType::new_heap(
                "C",
                vec![a.clone(), b.clone()],
                PyAttributes::default(),
                vm.ctx.types.type_type.clone(),
                vm,
            )
            .unwrap_err();
            assert!(err.class().is(&vm.ctx.exceptions.type_error));
        })
    }

    #[test]
    fn bool_is_final() {
        Interpreter::new(Default::default()).enter(|vm| {
            let bool_type = vm.ctx.types.bool_type.clone();
            let err = PyType::new_heap(
                "B",
                vec![bool_type],
                PyAttributes::default(),
                vm.ctx.types.type_type.clone(),
                vm,
            )
            .unwrap_err();
            assert!(err.class().is(&vm.ctx.exceptions.type_error));
        })
    }

    #[test]
    fn subclass_check_follows_mro() {
        Interpreter::new(Default::default()).enter(|vm| {
            let a = class(vm, "A", &[]);
            let b = class(vm, "B", &[&a]);
            assert!(b.fast_issubclass(&a));
            assert!(!a.fast_issubclass(&b));
            assert!(a.fast_issubclass(&vm.ctx.types.object_type));
        })
    }
}
