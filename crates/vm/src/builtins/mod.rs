//! This package contains the python basic/builtin types
//! 7 common PyRef type aliases are exposed - [`PyBytesRef`], [`PyDictRef`], [`PyIntRef`], [`PyListRef`], [`PyStrRef`], [`PyTypeRef`], [`PyTupleRef`]
//! Do not add more PyRef type aliases. They will be rare enough to use directly `PyRef<T>`.

#[path = "bool.rs"]
pub(crate) mod bool_;
pub(crate) mod builtin_func;
pub use builtin_func::{NativeFn, PyBuiltinFunction};
pub(crate) mod bytes;
pub use bytes::{PyBytes, PyBytesRef};
pub(crate) mod classmethod;
pub use classmethod::PyClassMethod;
pub(crate) mod code;
pub use code::PyCode;
pub(crate) mod complex;
pub use complex::PyComplex;
pub(crate) mod descriptor;
pub use descriptor::PyMethodDescriptor;
pub(crate) mod dict;
pub use dict::{PyDict, PyDictRef};
pub(crate) mod enumerate;
pub use enumerate::{PyEnumerate, PyReversed};
pub(crate) mod float;
pub use float::PyFloat;
pub(crate) mod function;
pub use function::{PyBoundMethod, PyCell, PyCellRef, PyFunction};
pub(crate) mod generator;
pub use generator::PyGenerator;
pub(crate) mod int;
pub use int::{PyInt, PyIntRef};
pub(crate) mod iter;
pub use iter::PySequenceIterator;
pub(crate) mod list;
pub use list::{PyList, PyListRef};
pub(crate) mod module;
pub use module::PyModule;
pub(crate) mod object;
pub use object::PyBaseObject;
pub(crate) mod property;
pub use property::PyProperty;
pub(crate) mod pystr;
pub use pystr::{PyStr, PyStrRef};
pub(crate) mod range;
pub use range::PyRange;
pub(crate) mod sequence;
pub(crate) mod set;
pub use set::{PyFrozenSet, PySet};
pub(crate) mod singletons;
pub use singletons::{PyEllipsis, PyNone, PyNotImplemented};
pub(crate) mod slice;
pub use slice::PySlice;
pub(crate) mod staticmethod;
pub use staticmethod::PyStaticMethod;
#[path = "super.rs"]
pub(crate) mod super_;
pub use super_::PySuper;
pub(crate) mod tuple;
pub use tuple::{PyTuple, PyTupleRef};
#[path = "type.rs"]
pub(crate) mod type_;
pub use type_::{PyAttributes, PyType, PyTypeFlags, PyTypeRef};
pub(crate) mod zip;
pub use zip::PyZip;

pub use crate::exceptions::{PyBaseException, PyBaseExceptionRef};
