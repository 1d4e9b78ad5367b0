use super::{PyFloat, PyInt, PyStr, PyTypeRef, float, int};
use crate::{
    PyObjectRef, PyPayload, PyResult, VirtualMachine, function::FuncArgs, hash, vm::Context,
};
use num_complex::Complex64;
use num_traits::Zero;

/// A complex number. Enough of `complex` to hold the results of float arithmetic and the
/// constants of code objects.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PyComplex {
    value: Complex64,
}

impl PyComplex {
    pub fn new(real: f64, imag: f64) -> Self {
        Self {
            value: Complex64::new(real, imag),
        }
    }

    pub fn to_complex(&self) -> Complex64 {
        self.value
    }
}

impl PyPayload for PyComplex {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.complex_type
    }
}

fn to_op_complex(obj: &PyObjectRef, vm: &VirtualMachine) -> PyResult<Option<Complex64>> {
    let value = if let Some(complex) = obj.payload::<PyComplex>() {
        Some(complex.value)
    } else if let Some(float) = obj.payload::<PyFloat>() {
        Some(Complex64::new(float.to_f64(), 0.0))
    } else if let Some(int) = obj.payload::<PyInt>() {
        Some(Complex64::new(int::try_to_float(int.as_bigint(), vm)?, 0.0))
    } else {
        None
    };
    Ok(value)
}

fn format_part(v: f64) -> String {
    let repr = float::float_repr(v);
    repr.strip_suffix(".0").map(str::to_owned).unwrap_or(repr)
}

pub(crate) fn complex_repr(value: Complex64) -> String {
    let (re, im) = (value.re, value.im);
    if re == 0.0 && re.is_sign_positive() {
        format!("{}j", format_part(im))
    } else {
        let sign = if im.is_sign_negative() && !im.is_nan() { "" } else { "+" };
        format!("({}{sign}{}j)", format_part(re), format_part(im))
    }
}

fn complex_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("complex.__new__", vm)?.try_into_value(vm)?;
    let [real, imag] = args.bind_optional::<2>("complex", 0, vm)?;
    let component = |obj: Option<PyObjectRef>| -> PyResult<Complex64> {
        let Some(obj) = obj else {
            return Ok(Complex64::zero());
        };
        if obj.payload_is::<PyStr>() {
            return Err(vm.new_type_error("complex() can't take a string argument"));
        }
        to_op_complex(&obj, vm)?.ok_or_else(|| {
            vm.new_type_error(format!(
                "complex() first argument must be a string or a number, not '{}'",
                obj.class().name()
            ))
        })
    };
    let real = component(real)?;
    let imag = component(imag)?;
    let value = real + imag * Complex64::i();
    Ok(PyComplex { value }.into_ref_with_type(vm, cls)?.into())
}

type ComplexOp = fn(Complex64, Complex64, &VirtualMachine) -> PyResult<Complex64>;

fn complex_binop(
    vm: &VirtualMachine,
    mut args: FuncArgs,
    name: &str,
    reflected: bool,
    op: ComplexOp,
) -> PyResult {
    let zelf = args.take_zelf::<PyComplex>(name, vm)?;
    let [other] = args.bind(name, vm)?;
    let Some(other) = to_op_complex(&other, vm)? else {
        return Ok(vm.ctx.not_implemented());
    };
    let (a, b) = if reflected {
        (other, zelf.value)
    } else {
        (zelf.value, other)
    };
    let result = op(a, b, vm)?;
    Ok(vm.ctx.new_complex(result.re, result.im).into())
}

fn inner_div(a: Complex64, b: Complex64, vm: &VirtualMachine) -> PyResult<Complex64> {
    if b.is_zero() {
        return Err(vm.new_zero_division_error("complex division by zero"));
    }
    Ok(a / b)
}

fn inner_pow(a: Complex64, b: Complex64, vm: &VirtualMachine) -> PyResult<Complex64> {
    if a.is_zero() {
        return if b.im != 0.0 || b.re < 0.0 {
            Err(vm.new_zero_division_error("0.0 to a negative or complex power"))
        } else if b.is_zero() {
            Ok(Complex64::new(1.0, 0.0))
        } else {
            Ok(Complex64::zero())
        };
    }
    // exact results for small integral exponents
    if b.im == 0.0 && b.re.fract() == 0.0 && b.re.abs() <= 100.0 {
        return Ok(a.powi(b.re as i32));
    }
    Ok(a.powc(b))
}

fn complex_eq_ne(vm: &VirtualMachine, mut args: FuncArgs, name: &str, eq: bool) -> PyResult {
    let zelf = args.take_zelf::<PyComplex>(name, vm)?;
    let [other] = args.bind(name, vm)?;
    match to_op_complex(&other, vm)? {
        Some(other) => Ok(vm.ctx.new_bool((zelf.value == other) == eq)),
        None => Ok(vm.ctx.not_implemented()),
    }
}

fn complex_repr_method(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyComplex>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    Ok(vm.ctx.new_str(complex_repr(zelf.value)).into())
}

fn complex_hash(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyComplex>("__hash__", vm)?;
    args.bind::<0>("__hash__", vm)?;
    let re = hash::hash_float(zelf.value.re);
    let im = hash::hash_float(zelf.value.im);
    let combined = re.wrapping_add(im.wrapping_mul(1_000_003));
    Ok(vm.ctx.new_int(hash::fix_sentinel(combined)).into())
}

fn complex_bool(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyComplex>("__bool__", vm)?;
    args.bind::<0>("__bool__", vm)?;
    Ok(vm.ctx.new_bool(!zelf.value.is_zero()))
}

fn complex_unary(
    vm: &VirtualMachine,
    mut args: FuncArgs,
    name: &str,
    op: fn(Complex64) -> Complex64,
) -> PyResult {
    let zelf = args.take_zelf::<PyComplex>(name, vm)?;
    args.bind::<0>(name, vm)?;
    let v = op(zelf.value);
    Ok(vm.ctx.new_complex(v.re, v.im).into())
}

fn complex_abs(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyComplex>("__abs__", vm)?;
    args.bind::<0>("__abs__", vm)?;
    let norm = zelf.value.norm();
    if norm.is_infinite() && zelf.value.re.is_finite() && zelf.value.im.is_finite() {
        return Err(vm.new_overflow_error("absolute value too large"));
    }
    Ok(vm.ctx.new_float(norm).into())
}

fn complex_conjugate(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    complex_unary(vm, args, "conjugate", |v| v.conj())
}

fn complex_get_real(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyComplex>("real", vm)?;
    Ok(vm.ctx.new_float(zelf.value.re).into())
}

fn complex_get_imag(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyComplex>("imag", vm)?;
    Ok(vm.ctx.new_float(zelf.value.im).into())
}

macro_rules! complex_binop_method {
    ($ctx:expr, $name:literal, $reflected:expr, $op:expr) => {
        $ctx.new_method($name, |vm, args| complex_binop(vm, args, $name, $reflected, $op))
    };
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.complex_type, {
        "__new__" => ctx.new_staticmethod("__new__", complex_new),
        "__repr__" => ctx.new_method("__repr__", complex_repr_method),
        "__hash__" => ctx.new_method("__hash__", complex_hash),
        "__bool__" => ctx.new_method("__bool__", complex_bool),
        "__abs__" => ctx.new_method("__abs__", complex_abs),
        "__neg__" => ctx.new_method("__neg__", |vm, args| complex_unary(vm, args, "__neg__", |v| -v)),
        "__pos__" => ctx.new_method("__pos__", |vm, args| complex_unary(vm, args, "__pos__", |v| v)),
        "conjugate" => ctx.new_method("conjugate", complex_conjugate),
        "__eq__" => ctx.new_method("__eq__", |vm, args| complex_eq_ne(vm, args, "__eq__", true)),
        "__ne__" => ctx.new_method("__ne__", |vm, args| complex_eq_ne(vm, args, "__ne__", false)),
        "real" => ctx.new_readonly_getset("real", complex_get_real),
        "imag" => ctx.new_readonly_getset("imag", complex_get_imag),

        "__add__" => complex_binop_method!(ctx, "__add__", false, |a, b, _| Ok(a + b)),
        "__radd__" => complex_binop_method!(ctx, "__radd__", true, |a, b, _| Ok(a + b)),
        "__sub__" => complex_binop_method!(ctx, "__sub__", false, |a, b, _| Ok(a - b)),
        "__rsub__" => complex_binop_method!(ctx, "__rsub__", true, |a, b, _| Ok(a - b)),
        "__mul__" => complex_binop_method!(ctx, "__mul__", false, |a, b, _| Ok(a * b)),
        "__rmul__" => complex_binop_method!(ctx, "__rmul__", true, |a, b, _| Ok(a * b)),
        "__truediv__" => complex_binop_method!(ctx, "__truediv__", false, inner_div),
        "__rtruediv__" => complex_binop_method!(ctx, "__rtruediv__", true, inner_div),
        "__pow__" => complex_binop_method!(ctx, "__pow__", false, inner_pow),
        "__rpow__" => complex_binop_method!(ctx, "__rpow__", true, inner_pow),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_drops_zero_real_part() {
        assert_eq!(complex_repr(Complex64::new(0.0, 2.0)), "2j");
        assert_eq!(complex_repr(Complex64::new(1.0, 2.0)), "(1+2j)");
        assert_eq!(complex_repr(Complex64::new(1.5, -0.5)), "(1.5-0.5j)");
        assert_eq!(complex_repr(Complex64::new(-0.0, 1.0)), "(-0+1j)");
    }
}
