use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, VirtualMachine,
    builtins::{PyFloat, PyInt, PyStr},
};
use malachite_bigint::BigInt;
use num_traits::ToPrimitive;

/// Implemented by any type that can be created from a Python object.
pub trait TryFromObject: Sized {
    /// Attempt to convert a Python object to a value of this type.
    fn try_from_object(vm: &VirtualMachine, obj: PyObjectRef) -> PyResult<Self>;
}

impl PyObjectRef {
    pub fn try_into_value<T>(self, vm: &VirtualMachine) -> PyResult<T>
    where
        T: TryFromObject,
    {
        T::try_from_object(vm, self)
    }
}

impl TryFromObject for PyObjectRef {
    #[inline]
    fn try_from_object(_vm: &VirtualMachine, obj: PyObjectRef) -> PyResult<Self> {
        Ok(obj)
    }
}

impl<T> TryFromObject for PyRef<T>
where
    T: PyPayload,
{
    #[inline]
    fn try_from_object(vm: &VirtualMachine, obj: PyObjectRef) -> PyResult<Self> {
        obj.downcast().map_err(|obj| {
            vm.new_type_error(format!(
                "expected {} object, got '{}'",
                T::class(&vm.ctx).name(),
                obj.class().name()
            ))
        })
    }
}

impl<T: TryFromObject> TryFromObject for Option<T> {
    fn try_from_object(vm: &VirtualMachine, obj: PyObjectRef) -> PyResult<Self> {
        if vm.is_none(&obj) {
            Ok(None)
        } else {
            T::try_from_object(vm, obj).map(Some)
        }
    }
}

fn int_value(vm: &VirtualMachine, obj: &PyObjectRef) -> PyResult<BigInt> {
    match obj.payload::<PyInt>() {
        Some(int) => Ok(int.as_bigint().clone()),
        None => {
            let index = vm.get_special_method(obj, "__index__")?.ok_or_else(|| {
                vm.new_type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    obj.class().name()
                ))
            })?;
            let result = vm.invoke(&index, ())?;
            result
                .payload::<PyInt>()
                .map(|int| int.as_bigint().clone())
                .ok_or_else(|| {
                    vm.new_type_error(format!(
                        "__index__ returned non-int (type {})",
                        result.class().name()
                    ))
                })
        }
    }
}

impl TryFromObject for BigInt {
    fn try_from_object(vm: &VirtualMachine, obj: PyObjectRef) -> PyResult<Self> {
        int_value(vm, &obj)
    }
}

impl TryFromObject for i64 {
    fn try_from_object(vm: &VirtualMachine, obj: PyObjectRef) -> PyResult<Self> {
        int_value(vm, &obj)?
            .to_i64()
            .ok_or_else(|| vm.new_overflow_error("Python int too large to convert to C long"))
    }
}

impl TryFromObject for isize {
    fn try_from_object(vm: &VirtualMachine, obj: PyObjectRef) -> PyResult<Self> {
        int_value(vm, &obj)?.to_isize().ok_or_else(|| {
            vm.new_overflow_error("Python int too large to convert to C ssize_t")
        })
    }
}

impl TryFromObject for usize {
    fn try_from_object(vm: &VirtualMachine, obj: PyObjectRef) -> PyResult<Self> {
        let value = int_value(vm, &obj)?;
        if value < BigInt::from(0) {
            return Err(vm.new_overflow_error("can't convert negative int to unsigned"));
        }
        value
            .to_usize()
            .ok_or_else(|| vm.new_overflow_error("Python int too large to convert to C ssize_t"))
    }
}

impl TryFromObject for u32 {
    fn try_from_object(vm: &VirtualMachine, obj: PyObjectRef) -> PyResult<Self> {
        let value = usize::try_from_object(vm, obj)?;
        u32::try_from(value).map_err(|_| vm.new_overflow_error("Python int too large to convert"))
    }
}

impl TryFromObject for f64 {
    fn try_from_object(vm: &VirtualMachine, obj: PyObjectRef) -> PyResult<Self> {
        if let Some(float) = obj.payload::<PyFloat>() {
            return Ok(float.to_f64());
        }
        if let Some(int) = obj.payload::<PyInt>() {
            return int
                .as_bigint()
                .to_f64()
                .filter(|f| f.is_finite())
                .ok_or_else(|| vm.new_overflow_error("int too large to convert to float"));
        }
        Err(vm.new_type_error(format!(
            "must be real number, not {}",
            obj.class().name()
        )))
    }
}

impl TryFromObject for bool {
    fn try_from_object(vm: &VirtualMachine, obj: PyObjectRef) -> PyResult<Self> {
        obj.is_true(vm)
    }
}

impl TryFromObject for String {
    fn try_from_object(vm: &VirtualMachine, obj: PyObjectRef) -> PyResult<Self> {
        match obj.payload::<PyStr>() {
            Some(s) => Ok(s.as_str().to_owned()),
            None => Err(vm.new_type_error(format!(
                "expected str object, got '{}'",
                obj.class().name()
            ))),
        }
    }
}
