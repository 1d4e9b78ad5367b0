use super::{PyInt, PyTypeRef, sequence::SliceIndices};
use crate::{
    PyObjectRef, PyPayload, PyResult, VirtualMachine, function::FuncArgs, vm::Context,
};
use malachite_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

/// `slice(start, stop, step)`; each bound is any object, usually an int or None.
#[derive(Debug)]
pub struct PySlice {
    pub start: Option<PyObjectRef>,
    pub stop: PyObjectRef,
    pub step: Option<PyObjectRef>,
}

impl PyPayload for PySlice {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.slice_type
    }
}

fn slice_bound(obj: &Option<PyObjectRef>, vm: &VirtualMachine) -> PyResult<Option<BigInt>> {
    let Some(obj) = obj else {
        return Ok(None);
    };
    if vm.is_none(obj) {
        return Ok(None);
    }
    if let Some(int) = obj.payload::<PyInt>() {
        return Ok(Some(int.as_bigint().clone()));
    }
    match vm.get_special_method(obj, "__index__")? {
        Some(index) => vm.invoke(&index, ())?.try_into_value(vm).map(Some),
        None => Err(vm.new_type_error(
            "slice indices must be integers or None or have an __index__ method",
        )),
    }
}

fn saturate(value: BigInt) -> isize {
    value.to_isize().unwrap_or(if value.is_negative() {
        isize::MIN
    } else {
        isize::MAX
    })
}

impl PySlice {
    fn stop_ref(&self) -> Option<PyObjectRef> {
        Some(self.stop.clone())
    }

    /// The slice applied to a sequence of length `len`.
    pub(crate) fn to_indices(&self, len: usize, vm: &VirtualMachine) -> PyResult<SliceIndices> {
        let step = match slice_bound(&self.step, vm)? {
            Some(step) if step.is_zero() => {
                return Err(vm.new_value_error("slice step cannot be zero"));
            }
            Some(step) => saturate(step).max(-isize::MAX),
            None => 1,
        };
        let start = slice_bound(&self.start, vm)?.map(saturate);
        let stop = slice_bound(&self.stop_ref(), vm)?.map(saturate);
        Ok(SliceIndices::new(start, stop, step, len))
    }
}

fn none_or(vm: &VirtualMachine, value: &Option<PyObjectRef>) -> PyObjectRef {
    value.clone().unwrap_or_else(|| vm.ctx.none())
}

fn slice_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    args.take_first("slice.__new__", vm)?;
    let [a, b, c] = args.bind_optional::<3>("slice", 1, vm)?;
    let slice = match (a, b, c) {
        (Some(stop), None, None) => PySlice {
            start: None,
            stop,
            step: None,
        },
        (start, Some(stop), step) => PySlice { start, stop, step },
        _ => return Err(vm.new_type_error("slice expected at least 1 argument, got 0")),
    };
    Ok(slice.into_ref(&vm.ctx).into())
}

fn slice_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySlice>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    let start = none_or(vm, &zelf.start).repr(vm)?;
    let stop = zelf.stop.repr(vm)?;
    let step = none_or(vm, &zelf.step).repr(vm)?;
    let repr = format!(
        "slice({}, {}, {})",
        start.as_str(),
        stop.as_str(),
        step.as_str()
    );
    Ok(vm.ctx.new_str(repr).into())
}

fn slice_eq(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySlice>("__eq__", vm)?;
    let [other] = args.bind("__eq__", vm)?;
    let Some(other) = other.payload::<PySlice>() else {
        return Ok(vm.ctx.not_implemented());
    };
    let pairs = [
        (none_or(vm, &zelf.start), none_or(vm, &other.start)),
        (zelf.stop.clone(), other.stop.clone()),
        (none_or(vm, &zelf.step), none_or(vm, &other.step)),
    ];
    for (a, b) in &pairs {
        if !vm.identical_or_equal(a, b)? {
            return Ok(vm.ctx.new_bool(false));
        }
    }
    Ok(vm.ctx.new_bool(true))
}

fn slice_indices(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySlice>("indices", vm)?;
    let [len] = args.bind("indices", vm)?;
    let len: isize = len.try_into_value(vm)?;
    if len < 0 {
        return Err(vm.new_value_error("length should not be negative"));
    }
    let indices = zelf.to_indices(len as usize, vm)?;
    let items = [indices.start, indices.stop, indices.step]
        .into_iter()
        .map(|i| vm.ctx.new_int(i as i64).into())
        .collect();
    Ok(vm.ctx.new_tuple(items).into())
}

fn slice_get_start(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySlice>("start", vm)?;
    Ok(none_or(vm, &zelf.start))
}

fn slice_get_stop(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySlice>("stop", vm)?;
    Ok(zelf.stop.clone())
}

fn slice_get_step(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySlice>("step", vm)?;
    Ok(none_or(vm, &zelf.step))
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.slice_type, {
        "__new__" => ctx.new_staticmethod("__new__", slice_new),
        "__repr__" => ctx.new_method("__repr__", slice_repr),
        "__eq__" => ctx.new_method("__eq__", slice_eq),
        "__hash__" => ctx.none(),
        "indices" => ctx.new_method("indices", slice_indices),
        "start" => ctx.new_readonly_getset("start", slice_get_start),
        "stop" => ctx.new_readonly_getset("stop", slice_get_stop),
        "step" => ctx.new_readonly_getset("step", slice_get_step),
    });
}
