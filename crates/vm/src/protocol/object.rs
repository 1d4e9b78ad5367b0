//! Object Protocol
//! https://docs.python.org/3/c-api/object.html

use crate::{
    PyObjectRef, PyResult, VirtualMachine,
    builtins::{PyInt, PyStr, PyStrRef, PyTuple, PyType, PyTypeRef},
    function::FuncArgs,
    hash::{self, PyHash},
    types::PyComparisonOp,
};
use num_traits::{Signed, ToPrimitive};

impl PyObjectRef {
    pub fn get_attr(&self, attr_name: &str, vm: &VirtualMachine) -> PyResult {
        vm_trace!("object.__getattribute__: {:?} {:?}", self, attr_name);
        vm.get_attribute(self, attr_name)
    }

    pub fn has_attr(&self, attr_name: &str, vm: &VirtualMachine) -> PyResult<bool> {
        vm.get_attribute_opt(self, attr_name).map(|o| o.is_some())
    }

    pub fn set_attr(&self, attr_name: &str, value: PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        vm.set_attribute(self, attr_name, Some(value))
    }

    pub fn del_attr(&self, attr_name: &str, vm: &VirtualMachine) -> PyResult<()> {
        vm.set_attribute(self, attr_name, None)
    }

    #[inline(always)]
    pub fn rich_compare(&self, other: &Self, opid: PyComparisonOp, vm: &VirtualMachine) -> PyResult {
        vm.rich_compare(self, other, opid)
    }

    /// Truth value: `__bool__`, then `__len__`, then true.
    pub fn is_true(&self, vm: &VirtualMachine) -> PyResult<bool> {
        if self.is(&vm.ctx.true_value) {
            return Ok(true);
        }
        if self.is(&vm.ctx.false_value) || vm.is_none(self) {
            return Ok(false);
        }
        if let Some(method) = vm.get_method(self, "__bool__") {
            let result = vm.call_with_self(&method, self.clone(), FuncArgs::default())?;
            if !result.class().is(&vm.ctx.types.bool_type) {
                return Err(vm.new_type_error(format!(
                    "__bool__ should return bool, returned {}",
                    result.class().name()
                )));
            }
            return Ok(result.is(&vm.ctx.true_value));
        }
        match self.length_opt(vm) {
            Some(len) => Ok(len? != 0),
            None => Ok(true),
        }
    }

    pub fn not(&self, vm: &VirtualMachine) -> PyResult<bool> {
        self.is_true(vm).map(|x| !x)
    }

    pub fn repr(&self, vm: &VirtualMachine) -> PyResult<PyStrRef> {
        vm.with_recursion(" while getting the repr of an object", || {
            let repr = vm.call_special_method(self, "__repr__", ())?;
            repr.downcast::<PyStr>().map_err(|obj| {
                vm.new_type_error(format!(
                    "__repr__ returned non-string (type {})",
                    obj.class().name()
                ))
            })
        })
    }

    /// `repr()` with every non-ASCII character escaped, for `ascii()` and `!a`.
    pub fn ascii(&self, vm: &VirtualMachine) -> PyResult<String> {
        let repr = self.repr(vm)?;
        let mut ascii = String::with_capacity(repr.as_str().len());
        for c in repr.as_str().chars() {
            match c as u32 {
                0..=0x7f => ascii.push(c),
                n @ 0x80..=0xff => ascii.push_str(&format!("\\x{n:02x}")),
                n @ 0x100..=0xffff => ascii.push_str(&format!("\\u{n:04x}")),
                n => ascii.push_str(&format!("\\U{n:08x}")),
            }
        }
        Ok(ascii)
    }

    pub fn str(&self, vm: &VirtualMachine) -> PyResult<PyStrRef> {
        if self.class().is(&vm.ctx.types.str_type)
            && let Ok(s) = self.clone().downcast::<PyStr>()
        {
            return Ok(s);
        }
        let s = vm.call_special_method(self, "__str__", ())?;
        s.downcast::<PyStr>().map_err(|obj| {
            vm.new_type_error(format!(
                "__str__ returned non-string (type {})",
                obj.class().name()
            ))
        })
    }

    /// `format(obj, spec)`.
    pub fn format(&self, spec: &PyStrRef, vm: &VirtualMachine) -> PyResult<PyStrRef> {
        if spec.as_str().is_empty() && self.class().is(&vm.ctx.types.str_type) {
            return self.str(vm);
        }
        let result = vm.call_special_method(self, "__format__", (spec.clone(),))?;
        result.downcast::<PyStr>().map_err(|obj| {
            vm.new_type_error(format!(
                "__format__ must return a str, not {}",
                obj.class().name()
            ))
        })
    }

    pub fn hash(&self, vm: &VirtualMachine) -> PyResult<PyHash> {
        if let Some(s) = self.payload_if_exact::<PyStr>(vm) {
            return Ok(hash::hash_str(s.as_str()));
        }
        let unhashable =
            || vm.new_type_error(format!("unhashable type: '{}'", self.class().name()));
        let method = vm.get_method(self, "__hash__").ok_or_else(unhashable)?;
        if vm.is_none(&method) {
            return Err(unhashable());
        }
        let result = vm.call_with_self(&method, self.clone(), FuncArgs::default())?;
        match result.payload::<PyInt>() {
            Some(int) => Ok(match int.as_bigint().to_i64() {
                Some(value) => hash::fix_sentinel(value),
                None => hash::hash_bigint(int.as_bigint()),
            }),
            None => Err(vm.new_type_error("__hash__ method should return an integer")),
        }
    }

    /// `len(obj)`, or `None` when the class has no `__len__`.
    pub fn length_opt(&self, vm: &VirtualMachine) -> Option<PyResult<usize>> {
        let method = vm.get_method(self, "__len__")?;
        Some(
            vm.call_with_self(&method, self.clone(), FuncArgs::default())
                .and_then(|len| {
                    let int = len.payload::<PyInt>().ok_or_else(|| {
                        vm.new_type_error(format!(
                            "'{}' object cannot be interpreted as an integer",
                            len.class().name()
                        ))
                    })?;
                    let value = int.as_bigint();
                    if value.is_negative() {
                        return Err(vm.new_value_error("__len__() should return >= 0"));
                    }
                    value.to_usize().ok_or_else(|| {
                        vm.new_overflow_error("cannot fit 'int' into an index-sized integer")
                    })
                }),
        )
    }

    pub fn length(&self, vm: &VirtualMachine) -> PyResult<usize> {
        self.length_opt(vm).ok_or_else(|| {
            vm.new_type_error(format!(
                "object of type '{}' has no len()",
                self.class().name()
            ))
        })?
    }

    pub fn get_item(&self, needle: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
        if let Some(method) = vm.get_method(self, "__getitem__") {
            return vm.call_with_self(&method, self.clone(), vec![needle.clone()].into());
        }
        if self.payload_is::<PyType>()
            && let Some(method) = vm.get_attribute_opt(self, "__class_getitem__")?
        {
            return vm.invoke(&method, vec![needle.clone()]);
        }
        Err(vm.new_type_error(format!(
            "'{}' object is not subscriptable",
            self.class().name()
        )))
    }

    pub fn set_item(&self, needle: &PyObjectRef, value: PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        match vm.get_method(self, "__setitem__") {
            Some(method) => {
                vm.call_with_self(&method, self.clone(), vec![needle.clone(), value].into())?;
                Ok(())
            }
            None => Err(vm.new_type_error(format!(
                "'{}' object does not support item assignment",
                self.class().name()
            ))),
        }
    }

    pub fn del_item(&self, needle: &PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        match vm.get_method(self, "__delitem__") {
            Some(method) => {
                vm.call_with_self(&method, self.clone(), vec![needle.clone()].into())?;
                Ok(())
            }
            None => Err(vm.new_type_error(format!(
                "'{}' object doesn't support item deletion",
                self.class().name()
            ))),
        }
    }

    /// Determines if `self` is a subclass of `cls`, either directly, indirectly or virtually
    /// via the `__subclasscheck__` magic method.
    pub fn is_subclass(&self, cls: &PyObjectRef, vm: &VirtualMachine) -> PyResult<bool> {
        if let Some(tuple) = cls.payload::<PyTuple>() {
            for typ in tuple.iter() {
                if vm.with_recursion(" in __subclasscheck__", || self.is_subclass(typ, vm))? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        let sub = self.as_type(vm, || {
            format!("issubclass() arg 1 must be a class, not {}", self.class().name())
        })?;
        if cls.class().is(&vm.ctx.types.type_type) {
            let cls = cls.as_type(vm, String::new)?;
            return Ok(sub.fast_issubclass(&cls));
        }
        match vm.get_method(cls, "__subclasscheck__") {
            Some(check) => {
                let res = vm.call_with_self(&check, cls.clone(), vec![self.clone()].into())?;
                res.is_true(vm)
            }
            None => Err(vm.new_type_error(
                "issubclass() arg 2 must be a class or tuple of classes",
            )),
        }
    }

    /// Determines if `self` is an instance of `cls`, either directly, indirectly or virtually
    /// via the `__instancecheck__` magic method.
    pub fn is_instance(&self, cls: &PyObjectRef, vm: &VirtualMachine) -> PyResult<bool> {
        if let Some(typ) = cls.payload::<PyType>()
            && self.class().fast_issubclass(typ)
        {
            return Ok(true);
        }
        if let Some(tuple) = cls.payload::<PyTuple>() {
            for typ in tuple.iter() {
                if vm.with_recursion(" in __instancecheck__", || self.is_instance(typ, vm))? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        if cls.class().is(&vm.ctx.types.type_type) {
            return Ok(false);
        }
        match vm.get_method(cls, "__instancecheck__") {
            Some(check) => {
                let res = vm.call_with_self(&check, cls.clone(), vec![self.clone()].into())?;
                res.is_true(vm)
            }
            None => Err(vm.new_type_error(
                "isinstance() arg 2 must be a type or tuple of types",
            )),
        }
    }

    fn as_type(&self, vm: &VirtualMachine, msg: impl FnOnce() -> String) -> PyResult<PyTypeRef> {
        self.clone()
            .downcast::<PyType>()
            .map_err(|_| vm.new_type_error(msg()))
    }

    /// `abs()` for the numeric types, and `__abs__` for the rest.
    pub fn abs(&self, vm: &VirtualMachine) -> PyResult {
        if let Some(int) = self.payload::<PyInt>()
            && !int.as_bigint().is_negative()
            && self.class().is(&vm.ctx.types.int_type)
        {
            return Ok(self.clone());
        }
        match vm.get_method(self, "__abs__") {
            Some(method) => vm.call_with_self(&method, self.clone(), FuncArgs::default()),
            None => Err(vm.new_unsupported_unary_error(self, "abs()")),
        }
    }
}
