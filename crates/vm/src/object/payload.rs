use super::core::PyRef;
use crate::{
    PyObjectRef, PyResult,
    builtins::PyTypeRef,
    vm::{Context, VirtualMachine},
};
use core::{any::Any, fmt};

/// Rust data carried by a python object of a builtin class.
pub trait PyPayload: fmt::Debug + Sized + 'static {
    /// The builtin class objects with this payload are created with by default.
    fn class(ctx: &Context) -> &PyTypeRef;

    #[inline]
    fn into_pyobject(self, vm: &VirtualMachine) -> PyObjectRef {
        self.into_ref(&vm.ctx).into()
    }

    #[inline]
    fn into_ref(self, ctx: &Context) -> PyRef<Self> {
        let cls = Self::class(ctx).clone();
        PyRef::new_ref(self, cls, None)
    }

    /// Creates the object with `cls` as its class, which must be `Self::class` or a subclass
    /// of it. Instances of classes defined in python also get an instance dictionary.
    fn into_ref_with_type(self, vm: &VirtualMachine, cls: PyTypeRef) -> PyResult<PyRef<Self>> {
        let exact_class = Self::class(&vm.ctx);
        if !cls.fast_issubclass(exact_class) {
            return Err(vm.new_type_error(format!(
                "'{}' is not a subtype of '{}'",
                cls.name(),
                exact_class.name()
            )));
        }
        let dict = cls.is_heap_type().then(|| vm.ctx.new_dict());
        Ok(PyRef::new_ref(self, cls, dict))
    }
}

/// Object-safe view of a payload, used for the type-erased storage inside `PyObject`.
pub(crate) trait AnyPayload {
    fn as_any(&self) -> &dyn Any;
    fn as_debug(&self) -> &dyn fmt::Debug;
}

impl<T: PyPayload> AnyPayload for T {
    #[inline(always)]
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_debug(&self) -> &dyn fmt::Debug {
        self
    }
}
