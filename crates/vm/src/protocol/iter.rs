use crate::{
    PyObjectRef, PyPayload, PyResult, VirtualMachine,
    builtins::{PyBaseExceptionRef, PySequenceIterator},
    function::FuncArgs,
};
use core::ops::Deref;

/// Iterator Protocol
// https://docs.python.org/3/c-api/iter.html
#[derive(Debug, Clone)]
#[repr(transparent)]
pub struct PyIter(PyObjectRef);

impl PyIter {
    /// Whether `obj` is an iterator, i.e. its class defines `__next__`.
    pub fn check(obj: &PyObjectRef) -> bool {
        obj.class().has_attr("__next__")
    }

    pub fn new(obj: PyObjectRef) -> Self {
        Self(obj)
    }

    pub fn next(&self, vm: &VirtualMachine) -> PyResult<PyIterReturn> {
        let next = vm.get_method(&self.0, "__next__").ok_or_else(|| {
            vm.new_type_error(format!(
                "'{}' object is not an iterator",
                self.0.class().name()
            ))
        })?;
        PyIterReturn::from_pyresult(
            vm.call_with_self(&next, self.0.clone(), FuncArgs::default()),
            vm,
        )
    }

    /// Returns an iterator over this sequence of objects.
    pub fn into_iter(self, vm: &VirtualMachine) -> PyIterIter<'_> {
        PyIterIter { vm, obj: self }
    }

    pub fn into_object(self) -> PyObjectRef {
        self.0
    }
}

impl Deref for PyIter {
    type Target = PyObjectRef;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PyObjectRef {
    /// Takes an object and returns an iterator for it.
    /// This is typically a new iterator but if the argument is an iterator, this
    /// returns itself.
    pub fn get_iter(&self, vm: &VirtualMachine) -> PyResult<PyIter> {
        if let Some(iter_method) = vm.get_method(self, "__iter__") {
            if vm.is_none(&iter_method) {
                return Err(self.not_iterable_error(vm));
            }
            let iter = vm.call_with_self(&iter_method, self.clone(), FuncArgs::default())?;
            if PyIter::check(&iter) {
                Ok(PyIter(iter))
            } else {
                Err(vm.new_type_error(format!(
                    "iter() returned non-iterator of type '{}'",
                    iter.class().name()
                )))
            }
        } else if self.class().has_attr("__getitem__") {
            let iter = PySequenceIterator::new(self.clone()).into_ref(&vm.ctx);
            Ok(PyIter(iter.into()))
        } else {
            Err(self.not_iterable_error(vm))
        }
    }

    fn not_iterable_error(&self, vm: &VirtualMachine) -> PyBaseExceptionRef {
        vm.new_type_error(format!(
            "'{}' object is not iterable",
            self.class().name()
        ))
    }
}

/// The outcome of one `__next__` call, with StopIteration taken apart.
#[derive(Debug)]
pub enum PyIterReturn<T = PyObjectRef> {
    Return(T),
    StopIteration(Option<PyObjectRef>),
}

impl PyIterReturn {
    pub fn from_pyresult(result: PyResult, vm: &VirtualMachine) -> PyResult<Self> {
        match result {
            Ok(obj) => Ok(Self::Return(obj)),
            Err(err) if err.fast_isinstance(&vm.ctx.exceptions.stop_iteration) => {
                Ok(Self::StopIteration(err.get_arg(0)))
            }
            Err(err) => Err(err),
        }
    }

    /// The old sequence protocol: IndexError from `__getitem__` ends the iteration.
    pub fn from_getitem_result(result: PyResult, vm: &VirtualMachine) -> PyResult<Self> {
        match result {
            Ok(obj) => Ok(Self::Return(obj)),
            Err(err) if err.fast_isinstance(&vm.ctx.exceptions.index_error) => {
                Ok(Self::StopIteration(None))
            }
            Err(err) if err.fast_isinstance(&vm.ctx.exceptions.stop_iteration) => {
                Ok(Self::StopIteration(err.get_arg(0)))
            }
            Err(err) => Err(err),
        }
    }

    pub fn into_pyresult(self, vm: &VirtualMachine) -> PyResult {
        match self {
            Self::Return(obj) => Ok(obj),
            Self::StopIteration(v) => Err(vm.new_stop_iteration(v)),
        }
    }
}

// Typical rust `Iter` object for `PyIter`
pub struct PyIterIter<'a> {
    vm: &'a VirtualMachine,
    obj: PyIter,
}

impl Iterator for PyIterIter<'_> {
    type Item = PyResult<PyObjectRef>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.obj.next(self.vm) {
            Ok(PyIterReturn::Return(obj)) => Some(Ok(obj)),
            Ok(PyIterReturn::StopIteration(_)) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
