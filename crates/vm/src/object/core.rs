//! Essential types for object models
//!
//! +-------------------------+--------------+---------------+
//! |       Management        |    Typed     |    Untyped    |
//! +-------------------------+--------------+---------------+
//! | Reference-counted owned |   PyRef<T>   |  PyObjectRef  |
//! | Borrowed                |      &T      |   &PyObject   |
//! +-------------------------+--------------+---------------+
//!
//! Every value lives behind an `Rc`, so object graphs may be shared freely and closures,
//! types and instances can point at each other. A type's `mro` excludes the type itself,
//! which keeps the common case free of self-cycles.

use super::payload::{AnyPayload, PyPayload};
use crate::builtins::{PyDictRef, PyType, PyTypeFlags, PyTypeRef};
use crate::{PyResult, VirtualMachine};
use core::{cell::OnceCell, fmt, marker::PhantomData, ops::Deref};
use std::rc::Rc;

/// A python object: its class, an optional instance dictionary and a rust payload.
pub struct PyObject {
    typ: OnceCell<PyTypeRef>,
    dict: Option<PyDictRef>,
    payload: Box<dyn AnyPayload>,
}

/// An owned, reference-counted handle to a [`PyObject`].
#[derive(Clone)]
#[repr(transparent)]
pub struct PyObjectRef {
    rc: Rc<PyObject>,
}

impl Deref for PyObjectRef {
    type Target = PyObject;

    #[inline(always)]
    fn deref(&self) -> &PyObject {
        &self.rc
    }
}

impl AsRef<PyObject> for PyObjectRef {
    #[inline(always)]
    fn as_ref(&self) -> &PyObject {
        self
    }
}

impl PyObjectRef {
    fn new(obj: PyObject) -> Self {
        Self { rc: Rc::new(obj) }
    }

    /// Attempt to downcast this reference to a subclass.
    ///
    /// If the downcast fails, the original ref is returned in as `Err` so
    /// another downcast can be attempted without unnecessary cloning.
    pub fn downcast<T: PyPayload>(self) -> Result<PyRef<T>, Self> {
        if self.payload_is::<T>() {
            Ok(PyRef {
                obj: self,
                _payload: PhantomData,
            })
        } else {
            Err(self)
        }
    }

    pub fn try_downcast<T: PyPayload>(self, vm: &VirtualMachine) -> PyResult<PyRef<T>> {
        self.downcast().map_err(|obj| {
            vm.new_type_error(format!(
                "expected {} object, got '{}'",
                T::class(&vm.ctx).name(),
                obj.class().name()
            ))
        })
    }

    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.rc)
    }
}

impl PyObject {
    #[inline]
    pub fn class(&self) -> &PyTypeRef {
        self.typ
            .get()
            .expect("object class is assigned when the object is created")
    }

    #[inline]
    pub fn dict(&self) -> Option<&PyDictRef> {
        self.dict.as_ref()
    }

    #[inline]
    pub fn payload<T: PyPayload>(&self) -> Option<&T> {
        self.payload.as_any().downcast_ref()
    }

    #[inline]
    pub fn payload_is<T: PyPayload>(&self) -> bool {
        self.payload.as_any().is::<T>()
    }

    /// The payload, but only when the object's class is exactly `T`'s builtin class.
    pub fn payload_if_exact<T: PyPayload>(&self, vm: &VirtualMachine) -> Option<&T> {
        if self.class().is(T::class(&vm.ctx)) {
            self.payload()
        } else {
            None
        }
    }

    /// Identity comparison, Python's `is`.
    #[inline(always)]
    pub fn is<O: AsRef<PyObject> + ?Sized>(&self, other: &O) -> bool {
        core::ptr::eq(self, other.as_ref())
    }

    #[inline]
    pub fn get_id(&self) -> usize {
        self as *const Self as usize
    }
}

impl AsRef<PyObject> for PyObject {
    #[inline(always)]
    fn as_ref(&self) -> &PyObject {
        self
    }
}

impl fmt::Debug for PyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[PyObj {:?}]", self.payload.as_debug())
    }
}

impl fmt::Debug for PyObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}

/// A reference to a Python object whose payload is known to be `T`.
///
/// A `PyRef<T>` can be used anywhere a `PyObjectRef` is expected; the typed view is only a
/// convenience so callers do not repeat the same downcast.
pub struct PyRef<T> {
    obj: PyObjectRef,
    _payload: PhantomData<T>,
}

impl<T> Clone for PyRef<T> {
    #[inline(always)]
    fn clone(&self) -> Self {
        Self {
            obj: self.obj.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T: PyPayload> PyRef<T> {
    pub(crate) fn new_ref(payload: T, typ: PyTypeRef, dict: Option<PyDictRef>) -> Self {
        let typ_cell = OnceCell::new();
        let _ = typ_cell.set(typ);
        let obj = PyObjectRef::new(PyObject {
            typ: typ_cell,
            dict,
            payload: Box::new(payload),
        });
        Self {
            obj,
            _payload: PhantomData,
        }
    }
}

impl<T> PyRef<T> {
    #[inline(always)]
    pub fn as_object(&self) -> &PyObjectRef {
        &self.obj
    }

    #[inline(always)]
    pub fn into_object(self) -> PyObjectRef {
        self.obj
    }

    #[inline]
    pub fn is<O: AsRef<PyObject> + ?Sized>(&self, other: &O) -> bool {
        self.obj.is(other.as_ref())
    }

    #[inline]
    pub fn class(&self) -> &PyTypeRef {
        self.obj.class()
    }

    #[inline]
    pub fn fast_isinstance(&self, cls: &PyType) -> bool {
        self.obj.class().fast_issubclass(cls)
    }

    #[inline]
    pub fn get_id(&self) -> usize {
        self.obj.get_id()
    }
}

impl<T: PyPayload> Deref for PyRef<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.obj
            .payload()
            .expect("PyRef payload type is checked when the reference is made")
    }
}

impl<T> AsRef<PyObject> for PyRef<T> {
    #[inline(always)]
    fn as_ref(&self) -> &PyObject {
        &self.obj
    }
}

impl<T> From<PyRef<T>> for PyObjectRef {
    #[inline]
    fn from(value: PyRef<T>) -> Self {
        value.obj
    }
}

impl<T: PyPayload> fmt::Debug for PyRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}

/// Builds `type` and `object`, the two types that refer to each other.
///
/// `type` is its own class, and the class of `object`; every other type is created afterwards
/// with `type` as its metatype.
pub(crate) fn init_type_hierarchy() -> (PyTypeRef, PyTypeRef) {
    let object_type = PyObjectRef::new(PyObject {
        typ: OnceCell::new(),
        dict: None,
        payload: Box::new(PyType::new_root("object")),
    });
    let object_type: PyTypeRef = PyRef {
        obj: object_type,
        _payload: PhantomData,
    };
    let mut type_payload = PyType::new_builtin("type", &object_type);
    type_payload.flags |= PyTypeFlags::BASETYPE;
    let type_type = PyObjectRef::new(PyObject {
        typ: OnceCell::new(),
        dict: None,
        payload: Box::new(type_payload),
    });
    let type_type: PyTypeRef = PyRef {
        obj: type_type,
        _payload: PhantomData,
    };
    let _ = object_type.obj.typ.set(type_type.clone());
    let _ = type_type.obj.typ.set(type_type.clone());
    (type_type, object_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_is_its_own_class() {
        let (type_type, object_type) = init_type_hierarchy();
        assert!(type_type.as_object().class().is(&type_type));
        assert!(object_type.as_object().class().is(&type_type));
        assert_eq!(type_type.name(), "type");
        assert!(type_type.mro[0].is(&object_type));
    }
}
