use crate::{
    PyObjectRef, PyPayload, PyRef,
    builtins::{
        NativeFn, PyBuiltinFunction, PyBytes, PyClassMethod, PyComplex, PyDict, PyDictRef,
        PyEllipsis, PyFloat, PyInt, PyIntRef, PyList, PyListRef, PyMethodDescriptor, PyNone,
        PyNotImplemented, PyProperty, PySet, PyStaticMethod, PyStr, PyStrRef, PyTuple, PyTupleRef,
    },
    exceptions::ExceptionZoo,
    types::TypeZoo,
};
use malachite_bigint::BigInt;
use num_traits::ToPrimitive;
use std::rc::Rc;

/// Every object the interpreter needs before any code runs: the builtin types, the
/// exception hierarchy and the shared singletons.
#[derive(Debug)]
pub struct Context {
    pub true_value: PyIntRef,
    pub false_value: PyIntRef,
    pub none: PyRef<PyNone>,
    pub empty_tuple: PyTupleRef,
    pub empty_str: PyStrRef,
    pub ellipsis: PyRef<PyEllipsis>,
    pub not_implemented: PyRef<PyNotImplemented>,

    pub types: TypeZoo,
    pub exceptions: ExceptionZoo,
    int_cache_pool: Vec<PyIntRef>,
}

impl Context {
    pub const INT_CACHE_POOL_RANGE: core::ops::RangeInclusive<i32> = (-5)..=256;
    const INT_CACHE_POOL_MIN: i32 = *Self::INT_CACHE_POOL_RANGE.start();

    /// Builds the context: types first, then the singletons that need them, then the
    /// attributes of every builtin type.
    #[cold]
    pub fn genesis() -> Rc<Self> {
        let types = TypeZoo::init();
        let exceptions = ExceptionZoo::init(&types);

        let create = |payload, cls: &crate::builtins::PyTypeRef| {
            PyRef::new_ref(payload, cls.clone(), None)
        };
        let none = PyRef::new_ref(PyNone, types.none_type.clone(), None);
        let ellipsis = PyRef::new_ref(PyEllipsis, types.ellipsis_type.clone(), None);
        let not_implemented =
            PyRef::new_ref(PyNotImplemented, types.not_implemented_type.clone(), None);

        let int_cache_pool = Self::INT_CACHE_POOL_RANGE
            .map(|v| create(PyInt::from(v), &types.int_type))
            .collect();
        let true_value = create(PyInt::from(1), &types.bool_type);
        let false_value = create(PyInt::from(0), &types.bool_type);
        let empty_tuple = PyRef::new_ref(PyTuple::new(vec![]), types.tuple_type.clone(), None);
        let empty_str = PyRef::new_ref(PyStr::from(""), types.str_type.clone(), None);

        let context = Rc::new(Self {
            true_value,
            false_value,
            none,
            empty_tuple,
            empty_str,
            ellipsis,
            not_implemented,
            types,
            exceptions,
            int_cache_pool,
        });
        TypeZoo::extend(&context);
        ExceptionZoo::extend(&context);
        context
    }

    #[inline(always)]
    pub fn none(&self) -> PyObjectRef {
        self.none.clone().into()
    }

    #[inline(always)]
    pub fn not_implemented(&self) -> PyObjectRef {
        self.not_implemented.clone().into()
    }

    #[inline(always)]
    pub fn ellipsis(&self) -> PyObjectRef {
        self.ellipsis.clone().into()
    }

    #[inline]
    pub fn new_int<T: Into<BigInt>>(&self, i: T) -> PyIntRef {
        let value = i.into();
        if let Some(small) = value.to_i32() {
            if Self::INT_CACHE_POOL_RANGE.contains(&small) {
                return self.int_cache_pool[(small - Self::INT_CACHE_POOL_MIN) as usize].clone();
            }
        }
        PyInt::from(value).into_ref(self)
    }

    #[inline]
    pub fn new_bool(&self, b: bool) -> PyObjectRef {
        let value = if b {
            &self.true_value
        } else {
            &self.false_value
        };
        value.clone().into()
    }

    #[inline]
    pub fn new_float(&self, value: f64) -> PyRef<PyFloat> {
        PyFloat::from(value).into_ref(self)
    }

    pub fn new_complex(&self, real: f64, imag: f64) -> PyRef<PyComplex> {
        PyComplex::new(real, imag).into_ref(self)
    }

    #[inline]
    pub fn new_str(&self, s: impl Into<String>) -> PyStrRef {
        let s = s.into();
        if s.is_empty() {
            return self.empty_str.clone();
        }
        PyStr::from(s).into_ref(self)
    }

    pub fn new_bytes(&self, data: Vec<u8>) -> PyRef<PyBytes> {
        PyBytes::from(data).into_ref(self)
    }

    #[inline]
    pub fn new_tuple(&self, elements: Vec<PyObjectRef>) -> PyTupleRef {
        if elements.is_empty() {
            self.empty_tuple.clone()
        } else {
            PyTuple::new(elements).into_ref(self)
        }
    }

    #[inline]
    pub fn new_list(&self, elements: Vec<PyObjectRef>) -> PyListRef {
        PyList::from(elements).into_ref(self)
    }

    #[inline]
    pub fn new_dict(&self) -> PyDictRef {
        PyDict::default().into_ref(self)
    }

    pub fn new_set(&self) -> PyRef<PySet> {
        PySet::default().into_ref(self)
    }

    /// A builtin function that is not bound to any object.
    pub fn new_function(&self, name: &'static str, f: NativeFn) -> PyRef<PyBuiltinFunction> {
        PyBuiltinFunction::new(name, f).into_ref(self)
    }

    /// A method of a builtin type; binds to its instance like a python function does.
    pub fn new_method(&self, name: &'static str, f: NativeFn) -> PyRef<PyMethodDescriptor> {
        PyMethodDescriptor::new(name, f).into_ref(self)
    }

    pub fn new_staticmethod(&self, name: &'static str, f: NativeFn) -> PyRef<PyStaticMethod> {
        PyStaticMethod::new(self.new_function(name, f).into()).into_ref(self)
    }

    pub fn new_classmethod(&self, name: &'static str, f: NativeFn) -> PyRef<PyClassMethod> {
        PyClassMethod::new(self.new_function(name, f).into()).into_ref(self)
    }

    /// A read-only attribute computed by `getter(vm, [obj])`.
    pub fn new_readonly_getset(&self, name: &'static str, getter: NativeFn) -> PyRef<PyProperty> {
        PyProperty::new(Some(self.new_function(name, getter).into()), None, None).into_ref(self)
    }

    /// An attribute read through `getter(vm, [obj])` and written through
    /// `setter(vm, [obj, value])`.
    pub fn new_getset(
        &self,
        name: &'static str,
        getter: NativeFn,
        setter: NativeFn,
    ) -> PyRef<PyProperty> {
        PyProperty::new(
            Some(self.new_function(name, getter).into()),
            Some(self.new_function(name, setter).into()),
            None,
        )
        .into_ref(self)
    }
}
