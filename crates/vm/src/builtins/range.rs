use super::{
    PyInt, PyIntRef, PySlice, PyTypeRef,
    sequence::SequenceIndex,
};
use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, VirtualMachine,
    function::FuncArgs,
    hash,
    types::PyComparisonOp,
    vm::Context,
};
use core::cell::RefCell;
use malachite_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};

/// `range(start, stop, step)`: an arithmetic progression computed on demand.
#[derive(Debug, Clone)]
pub struct PyRange {
    pub start: PyIntRef,
    pub stop: PyIntRef,
    pub step: PyIntRef,
}

impl PyPayload for PyRange {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.range_type
    }
}

impl PyRange {
    fn offset(&self, value: &BigInt) -> Option<BigInt> {
        let start = self.start.as_bigint();
        let stop = self.stop.as_bigint();
        if self.step.as_bigint().is_positive() {
            (value >= start && value < stop).then(|| value - start)
        } else {
            (value <= start && value > stop).then(|| start - value)
        }
    }

    /// Position of `value` in the progression.
    pub fn index_of(&self, value: &BigInt) -> Option<BigInt> {
        let step = self.step.as_bigint().abs();
        self.offset(value)
            .filter(|offset| offset.is_multiple_of(&step))
            .map(|offset| offset / step)
    }

    pub fn len(&self) -> BigInt {
        let start = self.start.as_bigint();
        let stop = self.stop.as_bigint();
        let step = self.step.as_bigint();
        if step.is_positive() && start < stop {
            (stop - start - BigInt::one()) / step + BigInt::one()
        } else if step.is_negative() && start > stop {
            (start - stop - BigInt::one()) / (-step.clone()) + BigInt::one()
        } else {
            BigInt::zero()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len().is_zero()
    }

    /// The element at `index`, which may be negative.
    pub fn get(&self, index: &BigInt) -> Option<BigInt> {
        let len = self.len();
        let index = if index.is_negative() {
            &len + index
        } else {
            index.clone()
        };
        if index.is_negative() || index >= len {
            return None;
        }
        Some(self.start.as_bigint() + self.step.as_bigint() * index)
    }
}

fn range_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("range.__new__", vm)?.try_into_value(vm)?;
    let [first, second, third] = args.bind_optional::<3>("range", 1, vm)?;
    let as_int = |obj: PyObjectRef| -> PyResult<PyIntRef> {
        let value: BigInt = obj.try_into_value(vm)?;
        Ok(vm.ctx.new_int(value))
    };
    let (start, stop, step) = match (first, second, third) {
        (Some(stop), None, None) => (vm.ctx.new_int(0), as_int(stop)?, vm.ctx.new_int(1)),
        (Some(start), Some(stop), step) => (
            as_int(start)?,
            as_int(stop)?,
            match step {
                Some(step) => as_int(step)?,
                None => vm.ctx.new_int(1),
            },
        ),
        _ => return Err(vm.new_type_error("range expected at least 1 argument, got 0")),
    };
    if step.as_bigint().is_zero() {
        return Err(vm.new_value_error("range() arg 3 must not be zero"));
    }
    Ok(PyRange { start, stop, step }
        .into_ref_with_type(vm, cls)?
        .into())
}

fn range_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyRange>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    let (start, stop, step) = (
        zelf.start.as_bigint(),
        zelf.stop.as_bigint(),
        zelf.step.as_bigint(),
    );
    let repr = if step.is_one() {
        format!("range({start}, {stop})")
    } else {
        format!("range({start}, {stop}, {step})")
    };
    Ok(vm.ctx.new_str(repr).into())
}

fn range_len(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyRange>("__len__", vm)?;
    args.bind::<0>("__len__", vm)?;
    Ok(vm.ctx.new_int(zelf.len()).into())
}

fn range_bool(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyRange>("__bool__", vm)?;
    args.bind::<0>("__bool__", vm)?;
    Ok(vm.ctx.new_bool(!zelf.is_empty()))
}

fn range_contains(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyRange>("__contains__", vm)?;
    let [needle] = args.bind("__contains__", vm)?;
    if let Some(int) = needle.payload_if_exact::<PyInt>(vm) {
        return Ok(vm.ctx.new_bool(zelf.index_of(int.as_bigint()).is_some()));
    }
    // other types may compare equal to ints, so fall back to scanning
    let len = zelf.len().to_usize().unwrap_or(usize::MAX);
    for i in 0..len {
        let Some(item) = zelf.get(&BigInt::from(i)) else {
            break;
        };
        if vm.bool_eq(&needle, &vm.ctx.new_int(item).into())? {
            return Ok(vm.ctx.new_bool(true));
        }
    }
    Ok(vm.ctx.new_bool(false))
}

fn range_getitem(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyRange>("__getitem__", vm)?;
    let [needle] = args.bind("__getitem__", vm)?;
    if let Some(int) = needle.payload::<PyInt>() {
        return zelf
            .get(int.as_bigint())
            .map(|value| vm.ctx.new_int(value).into())
            .ok_or_else(|| vm.new_index_error("range object index out of range"));
    }
    match SequenceIndex::try_from_object(vm, needle, "range")? {
        SequenceIndex::Int(i) => zelf
            .get(&BigInt::from(i))
            .map(|value| vm.ctx.new_int(value).into())
            .ok_or_else(|| vm.new_index_error("range object index out of range")),
        SequenceIndex::Slice(slice) => range_slice(&zelf, &slice, vm),
    }
}

fn range_slice(zelf: &PyRange, slice: &PySlice, vm: &VirtualMachine) -> PyResult {
    let len = zelf
        .len()
        .to_usize()
        .ok_or_else(|| vm.new_overflow_error("range too large to slice"))?;
    let indices = slice.to_indices(len, vm)?;
    let step = zelf.step.as_bigint();
    let at = |i: isize| zelf.start.as_bigint() + step * BigInt::from(i);
    let sub = PyRange {
        start: vm.ctx.new_int(at(indices.start)),
        stop: vm.ctx.new_int(at(indices.stop)),
        step: vm.ctx.new_int(step * BigInt::from(indices.step)),
    };
    Ok(sub.into_ref(&vm.ctx).into())
}

fn range_eq(vm: &VirtualMachine, mut args: FuncArgs, op: PyComparisonOp) -> PyResult {
    let zelf = args.take_zelf::<PyRange>(op.method_name(), vm)?;
    let [other] = args.bind(op.method_name(), vm)?;
    let Some(other) = other.payload::<PyRange>() else {
        return Ok(vm.ctx.not_implemented());
    };
    // equal when they produce the same sequence
    let (len, other_len) = (zelf.len(), other.len());
    let equal = len == other_len
        && (len.is_zero()
            || (zelf.start.as_bigint() == other.start.as_bigint()
                && (len.is_one() || zelf.step.as_bigint() == other.step.as_bigint())));
    Ok(vm.ctx.new_bool(equal == (op == PyComparisonOp::Eq)))
}

fn range_hash(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyRange>("__hash__", vm)?;
    args.bind::<0>("__hash__", vm)?;
    let len = zelf.len();
    let mut hashes = vec![hash::hash_bigint(&len)];
    if !len.is_zero() {
        hashes.push(hash::hash_bigint(zelf.start.as_bigint()));
        if !len.is_one() {
            hashes.push(hash::hash_bigint(zelf.step.as_bigint()));
        }
    }
    Ok(vm.ctx.new_int(hash::hash_iter(hashes)).into())
}

fn range_index(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyRange>("index", vm)?;
    let [needle] = args.bind("index", vm)?;
    if let Some(int) = needle.payload::<PyInt>() {
        if let Some(index) = zelf.index_of(int.as_bigint()) {
            return Ok(vm.ctx.new_int(index).into());
        }
    }
    Err(vm.new_value_error(format!("{} is not in range", needle.repr(vm)?.as_str())))
}

fn range_count(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyRange>("count", vm)?;
    let [needle] = args.bind("count", vm)?;
    let found = needle
        .payload::<PyInt>()
        .is_some_and(|int| zelf.index_of(int.as_bigint()).is_some());
    Ok(vm.ctx.new_int(usize::from(found)).into())
}

fn range_iter(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyRange>("__iter__", vm)?;
    args.bind::<0>("__iter__", vm)?;
    Ok(PyRangeIterator::new(zelf.start.as_bigint().clone(), zelf.step.as_bigint().clone(), zelf.len())
        .into_ref(&vm.ctx)
        .into())
}

fn range_reversed(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyRange>("__reversed__", vm)?;
    args.bind::<0>("__reversed__", vm)?;
    let len = zelf.len();
    let step = zelf.step.as_bigint();
    let last = zelf.start.as_bigint() + step * (&len - BigInt::one());
    Ok(PyRangeIterator::new(last, -step.clone(), len)
        .into_ref(&vm.ctx)
        .into())
}

macro_rules! range_getter {
    ($name:literal, $field:ident) => {
        |vm: &VirtualMachine, args: FuncArgs| -> PyResult {
            let [zelf] = args.bind($name, vm)?;
            let zelf: PyRef<PyRange> = zelf.try_into_value(vm)?;
            Ok(zelf.$field.clone().into())
        }
    };
}

/// Walks `remaining` values from `next`, `step` apart.
#[derive(Debug)]
pub(crate) struct PyRangeIterator {
    state: RefCell<RangeIterState>,
}

#[derive(Debug)]
struct RangeIterState {
    next: BigInt,
    step: BigInt,
    remaining: BigInt,
}

impl PyPayload for PyRangeIterator {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.range_iterator_type
    }
}

impl PyRangeIterator {
    fn new(start: BigInt, step: BigInt, len: BigInt) -> Self {
        Self {
            state: RefCell::new(RangeIterState {
                next: start,
                step,
                remaining: len,
            }),
        }
    }
}

fn range_iterator_next(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyRangeIterator>("__next__", vm)?;
    args.bind::<0>("__next__", vm)?;
    let mut state = zelf.state.borrow_mut();
    if !state.remaining.is_positive() {
        return Err(vm.new_stop_iteration(None));
    }
    let value = state.next.clone();
    state.next = &state.next + &state.step;
    state.remaining = &state.remaining - BigInt::one();
    Ok(vm.ctx.new_int(value).into())
}

fn range_iterator_length_hint(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyRangeIterator>("__length_hint__", vm)?;
    args.bind::<0>("__length_hint__", vm)?;
    let remaining = zelf.state.borrow().remaining.clone();
    Ok(vm.ctx.new_int(remaining).into())
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.range_type, {
        "__new__" => ctx.new_staticmethod("__new__", range_new),
        "__repr__" => ctx.new_method("__repr__", range_repr),
        "__len__" => ctx.new_method("__len__", range_len),
        "__bool__" => ctx.new_method("__bool__", range_bool),
        "__contains__" => ctx.new_method("__contains__", range_contains),
        "__getitem__" => ctx.new_method("__getitem__", range_getitem),
        "__iter__" => ctx.new_method("__iter__", range_iter),
        "__reversed__" => ctx.new_method("__reversed__", range_reversed),
        "__hash__" => ctx.new_method("__hash__", range_hash),
        "__eq__" => ctx.new_method("__eq__", |vm, args| range_eq(vm, args, PyComparisonOp::Eq)),
        "__ne__" => ctx.new_method("__ne__", |vm, args| range_eq(vm, args, PyComparisonOp::Ne)),
        "index" => ctx.new_method("index", range_index),
        "count" => ctx.new_method("count", range_count),
        "start" => ctx.new_readonly_getset("start", range_getter!("start", start)),
        "stop" => ctx.new_readonly_getset("stop", range_getter!("stop", stop)),
        "step" => ctx.new_readonly_getset("step", range_getter!("step", step)),
    });
    extend_class!(ctx, &ctx.types.range_iterator_type, {
        "__iter__" => ctx.new_method("__iter__", super::iter::iter_self),
        "__next__" => ctx.new_method("__next__", range_iterator_next),
        "__length_hint__" => ctx.new_method("__length_hint__", range_iterator_length_hint),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Interpreter;

    fn range(vm: &VirtualMachine, start: i32, stop: i32, step: i32) -> PyRange {
        PyRange {
            start: vm.ctx.new_int(start),
            stop: vm.ctx.new_int(stop),
            step: vm.ctx.new_int(step),
        }
    }

    #[test]
    fn length_and_lookup() {
        Interpreter::new(Default::default()).enter(|vm| {
            let r = range(vm, 0, 10, 3);
            assert_eq!(r.len(), BigInt::from(4));
            assert_eq!(r.get(&BigInt::from(-1)), Some(BigInt::from(9)));
            assert_eq!(r.index_of(&BigInt::from(6)), Some(BigInt::from(2)));
            assert_eq!(r.index_of(&BigInt::from(7)), None);

            let down = range(vm, 5, 0, -2);
            assert_eq!(down.len(), BigInt::from(3));
            assert_eq!(down.index_of(&BigInt::from(1)), Some(BigInt::from(2)));
            assert!(range(vm, 3, 3, 1).is_empty());
        })
    }
}
