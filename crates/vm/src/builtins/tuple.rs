use super::{
    PyInt, PyTypeRef,
    iter::PositionIterInternal,
    sequence::{self, SequenceIndex},
};
use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, VirtualMachine,
    function::FuncArgs,
    hash,
    protocol::PyIterReturn,
    types::PyComparisonOp,
    vm::Context,
};
use core::{cell::RefCell, ops::Deref};

/// An immutable sequence of objects.
#[derive(Debug)]
pub struct PyTuple {
    elements: Box<[PyObjectRef]>,
}

pub type PyTupleRef = PyRef<PyTuple>;

impl PyPayload for PyTuple {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.tuple_type
    }

    fn into_pyobject(self, vm: &VirtualMachine) -> PyObjectRef {
        vm.ctx.new_tuple(self.elements.into_vec()).into()
    }
}

impl Deref for PyTuple {
    type Target = [PyObjectRef];

    fn deref(&self) -> &[PyObjectRef] {
        &self.elements
    }
}

impl PyTuple {
    pub fn new(elements: Vec<PyObjectRef>) -> Self {
        Self {
            elements: elements.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[PyObjectRef] {
        &self.elements
    }

    pub fn to_vec(&self) -> Vec<PyObjectRef> {
        self.elements.to_vec()
    }
}

fn tuple_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("tuple.__new__", vm)?.try_into_value(vm)?;
    let [iterable] = args.bind_optional::<1>("tuple", 0, vm)?;
    let exact = cls.is(&vm.ctx.types.tuple_type);
    if exact {
        if let Some(iterable) = &iterable {
            if iterable.class().is(&vm.ctx.types.tuple_type) {
                return Ok(iterable.clone());
            }
        }
    }
    let elements = match iterable {
        Some(iterable) => vm.extract_elements(&iterable)?,
        None => vec![],
    };
    if exact {
        Ok(vm.ctx.new_tuple(elements).into())
    } else {
        Ok(PyTuple::new(elements).into_ref_with_type(vm, cls)?.into())
    }
}

fn tuple_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyTuple>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    let repr = if zelf.len() == 1 {
        format!("({},)", zelf[0].repr(vm)?.as_str())
    } else {
        sequence::repr_elements(vm, zelf.as_object(), &zelf, "(", ")", "(...)")?
    };
    Ok(vm.ctx.new_str(repr).into())
}

fn tuple_hash(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyTuple>("__hash__", vm)?;
    args.bind::<0>("__hash__", vm)?;
    let hashes = zelf
        .iter()
        .map(|item| item.hash(vm))
        .collect::<PyResult<Vec<_>>>()?;
    Ok(vm.ctx.new_int(hash::hash_iter(hashes)).into())
}

fn tuple_cmp(vm: &VirtualMachine, mut args: FuncArgs, op: PyComparisonOp) -> PyResult {
    let zelf = args.take_zelf::<PyTuple>(op.method_name(), vm)?;
    let [other] = args.bind(op.method_name(), vm)?;
    let Some(other) = other.payload::<PyTuple>() else {
        return Ok(vm.ctx.not_implemented());
    };
    let result = sequence::cmp_sequences(vm, &zelf, other, op)?;
    Ok(vm.ctx.new_bool(result))
}

fn tuple_len(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyTuple>("__len__", vm)?;
    args.bind::<0>("__len__", vm)?;
    Ok(vm.ctx.new_int(zelf.len()).into())
}

fn tuple_getitem(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyTuple>("__getitem__", vm)?;
    let [needle] = args.bind("__getitem__", vm)?;
    match SequenceIndex::try_from_object(vm, needle, "tuple")? {
        SequenceIndex::Int(i) => sequence::wrap_index(i, zelf.len())
            .map(|i| zelf[i].clone())
            .ok_or_else(|| vm.new_index_error("tuple index out of range")),
        SequenceIndex::Slice(slice) => {
            let picked = sequence::slice_elements(&zelf, &slice, vm)?;
            Ok(vm.ctx.new_tuple(picked).into())
        }
    }
}

fn tuple_contains(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyTuple>("__contains__", vm)?;
    let [needle] = args.bind("__contains__", vm)?;
    for item in zelf.iter() {
        if vm.identical_or_equal(item, &needle)? {
            return Ok(vm.ctx.new_bool(true));
        }
    }
    Ok(vm.ctx.new_bool(false))
}

fn tuple_add(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyTuple>("__add__", vm)?;
    let [other] = args.bind("__add__", vm)?;
    let Some(other) = other.payload::<PyTuple>() else {
        return Ok(vm.ctx.not_implemented());
    };
    if other.is_empty() && zelf.class().is(&vm.ctx.types.tuple_type) {
        return Ok(zelf.into());
    }
    let joined = zelf.iter().chain(other.iter()).cloned().collect();
    Ok(vm.ctx.new_tuple(joined).into())
}

fn tuple_mul(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyTuple>("__mul__", vm)?;
    let [times] = args.bind("__mul__", vm)?;
    if !times.payload_is::<PyInt>() {
        return Ok(vm.ctx.not_implemented());
    }
    let times: isize = times.try_into_value(vm)?;
    let repeated = sequence::repeat(&zelf, times, vm)?;
    Ok(vm.ctx.new_tuple(repeated).into())
}

fn tuple_index(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyTuple>("index", vm)?;
    let [needle, start, stop] = args.bind_optional::<3>("index", 1, vm)?;
    let needle = needle.unwrap_or_else(|| vm.ctx.none());
    let start = start.map(|i| i.try_into_value::<isize>(vm)).transpose()?;
    let stop = stop.map(|i| i.try_into_value::<isize>(vm)).transpose()?;
    match sequence::index_of(vm, &zelf, &needle, start, stop)? {
        Some(i) => Ok(vm.ctx.new_int(i).into()),
        None => Err(vm.new_value_error("tuple.index(x): x not in tuple")),
    }
}

fn tuple_count(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyTuple>("count", vm)?;
    let [needle] = args.bind("count", vm)?;
    Ok(vm.ctx.new_int(sequence::count_of(vm, &zelf, &needle)?).into())
}

fn tuple_getnewargs(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyTuple>("__getnewargs__", vm)?;
    args.bind::<0>("__getnewargs__", vm)?;
    let copy = vm.ctx.new_tuple(zelf.to_vec());
    Ok(vm.ctx.new_tuple(vec![copy.into()]).into())
}

fn tuple_iter(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyTuple>("__iter__", vm)?;
    args.bind::<0>("__iter__", vm)?;
    Ok(PyTupleIterator {
        internal: RefCell::new(PositionIterInternal::new(zelf, 0)),
    }
    .into_ref(&vm.ctx)
    .into())
}

#[derive(Debug)]
pub(crate) struct PyTupleIterator {
    internal: RefCell<PositionIterInternal<PyTupleRef>>,
}

impl PyPayload for PyTupleIterator {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.tuple_iterator_type
    }
}

fn tuple_iterator_next(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyTupleIterator>("__next__", vm)?;
    args.bind::<0>("__next__", vm)?;
    let ret = zelf.internal.borrow_mut().next(|tuple, position| {
        Ok(match tuple.get(position) {
            Some(item) => PyIterReturn::Return(item.clone()),
            None => PyIterReturn::StopIteration(None),
        })
    })?;
    ret.into_pyresult(vm)
}

fn tuple_iterator_length_hint(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyTupleIterator>("__length_hint__", vm)?;
    args.bind::<0>("__length_hint__", vm)?;
    let hint = zelf.internal.borrow().length_hint(|tuple| tuple.len());
    Ok(vm.ctx.new_int(hint).into())
}

macro_rules! tuple_cmp_method {
    ($ctx:expr, $op:ident) => {
        $ctx.new_method(PyComparisonOp::$op.method_name(), |vm, args| {
            tuple_cmp(vm, args, PyComparisonOp::$op)
        })
    };
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.tuple_type, {
        "__new__" => ctx.new_staticmethod("__new__", tuple_new),
        "__repr__" => ctx.new_method("__repr__", tuple_repr),
        "__hash__" => ctx.new_method("__hash__", tuple_hash),
        "__len__" => ctx.new_method("__len__", tuple_len),
        "__getitem__" => ctx.new_method("__getitem__", tuple_getitem),
        "__contains__" => ctx.new_method("__contains__", tuple_contains),
        "__iter__" => ctx.new_method("__iter__", tuple_iter),
        "__add__" => ctx.new_method("__add__", tuple_add),
        "__mul__" => ctx.new_method("__mul__", tuple_mul),
        "__rmul__" => ctx.new_method("__rmul__", tuple_mul),
        "__getnewargs__" => ctx.new_method("__getnewargs__", tuple_getnewargs),
        "__eq__" => tuple_cmp_method!(ctx, Eq),
        "__ne__" => tuple_cmp_method!(ctx, Ne),
        "__lt__" => tuple_cmp_method!(ctx, Lt),
        "__le__" => tuple_cmp_method!(ctx, Le),
        "__gt__" => tuple_cmp_method!(ctx, Gt),
        "__ge__" => tuple_cmp_method!(ctx, Ge),
        "index" => ctx.new_method("index", tuple_index),
        "count" => ctx.new_method("count", tuple_count),
    });
    extend_class!(ctx, &ctx.types.tuple_iterator_type, {
        "__iter__" => ctx.new_method("__iter__", super::iter::iter_self),
        "__next__" => ctx.new_method("__next__", tuple_iterator_next),
        "__length_hint__" => ctx.new_method("__length_hint__", tuple_iterator_length_hint),
    });
}
