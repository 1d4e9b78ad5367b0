/*
 * iterator types
 */

use super::{PyInt, PyTypeRef};
use crate::{
    PyObjectRef, PyPayload, PyResult, VirtualMachine, function::FuncArgs,
    protocol::PyIterReturn, vm::Context,
};
use core::cell::RefCell;

/// Marks status of iterator.
#[derive(Debug, Clone)]
pub(crate) enum IterStatus<T> {
    /// Iterator hasn't raised StopIteration.
    Active(T),
    /// Iterator has raised StopIteration.
    Exhausted,
}

/// The state of an iterator that walks its object by position.
#[derive(Debug)]
pub(crate) struct PositionIterInternal<T> {
    pub(crate) status: IterStatus<T>,
    pub(crate) position: usize,
}

impl<T> PositionIterInternal<T> {
    pub(crate) const fn new(obj: T, position: usize) -> Self {
        Self {
            status: IterStatus::Active(obj),
            position,
        }
    }

    /// Produces the item at the current position through `f`, moving forward on success and
    /// marking the iterator exhausted once `f` reports the end.
    pub(crate) fn next<F, R>(&mut self, f: F) -> PyResult<PyIterReturn<R>>
    where
        F: FnOnce(&T, usize) -> PyResult<PyIterReturn<R>>,
    {
        let IterStatus::Active(obj) = &self.status else {
            return Ok(PyIterReturn::StopIteration(None));
        };
        let ret = f(obj, self.position);
        match &ret {
            Ok(PyIterReturn::Return(_)) => self.position += 1,
            Ok(PyIterReturn::StopIteration(_)) => self.status = IterStatus::Exhausted,
            Err(_) => {}
        }
        ret
    }

    pub(crate) fn length_hint<F>(&self, f: F) -> usize
    where
        F: FnOnce(&T) -> usize,
    {
        match &self.status {
            IterStatus::Active(obj) => f(obj).saturating_sub(self.position),
            IterStatus::Exhausted => 0,
        }
    }
}

/// `__iter__` of every iterator type: the iterator itself.
pub(crate) fn iter_self(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__iter__", vm)?;
    Ok(zelf)
}

/// Iterates an object that only defines `__getitem__`, stopping at the first IndexError.
#[derive(Debug)]
pub struct PySequenceIterator {
    internal: RefCell<PositionIterInternal<PyObjectRef>>,
}

impl PyPayload for PySequenceIterator {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.iter_type
    }
}

impl PySequenceIterator {
    pub fn new(obj: PyObjectRef) -> Self {
        Self {
            internal: RefCell::new(PositionIterInternal::new(obj, 0)),
        }
    }

    pub fn next(&self, vm: &VirtualMachine) -> PyResult<PyIterReturn> {
        // `__getitem__` may run python code that touches this iterator again
        let (obj, position) = {
            let internal = self.internal.borrow();
            match &internal.status {
                IterStatus::Active(obj) => (obj.clone(), internal.position),
                IterStatus::Exhausted => return Ok(PyIterReturn::StopIteration(None)),
            }
        };
        let index = vm.ctx.new_int(position).into();
        let ret = PyIterReturn::from_getitem_result(obj.get_item(&index, vm), vm)?;
        let mut internal = self.internal.borrow_mut();
        match ret {
            PyIterReturn::Return(_) => internal.position = position + 1,
            PyIterReturn::StopIteration(_) => internal.status = IterStatus::Exhausted,
        }
        Ok(ret)
    }
}

fn seq_iter_next(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySequenceIterator>("__next__", vm)?;
    args.bind::<0>("__next__", vm)?;
    zelf.next(vm)?.into_pyresult(vm)
}

fn seq_iter_length_hint(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySequenceIterator>("__length_hint__", vm)?;
    args.bind::<0>("__length_hint__", vm)?;
    let obj = match &zelf.internal.borrow().status {
        IterStatus::Active(obj) => obj.clone(),
        IterStatus::Exhausted => return Ok(vm.ctx.new_int(0).into()),
    };
    let Some(len) = obj.length_opt(vm) else {
        return Ok(vm.ctx.not_implemented());
    };
    let len = len?;
    let hint = zelf.internal.borrow().length_hint(|_| len);
    Ok(PyInt::from(hint).into_pyobject(vm))
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.iter_type, {
        "__iter__" => ctx.new_method("__iter__", iter_self),
        "__next__" => ctx.new_method("__next__", seq_iter_next),
        "__length_hint__" => ctx.new_method("__length_hint__", seq_iter_length_hint),
    });
}
