use super::{PyInt, PyStr, PyTypeRef, int};
use crate::{
    PyObjectRef, PyPayload, PyResult, VirtualMachine,
    builtins::PyBytes,
    function::FuncArgs,
    hash,
    types::PyComparisonOp,
    vm::Context,
};
use core::cmp::Ordering;
use malachite_bigint::BigInt;
use num_complex::Complex64;
use num_traits::{FromPrimitive, Zero};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PyFloat {
    value: f64,
}

impl PyFloat {
    pub fn to_f64(&self) -> f64 {
        self.value
    }
}

impl PyPayload for PyFloat {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.float_type
    }
}

impl From<f64> for PyFloat {
    fn from(value: f64) -> Self {
        Self { value }
    }
}

/// The value of a float operand, with ints coerced; `None` for anything else.
fn to_op_float(obj: &PyObjectRef, vm: &VirtualMachine) -> PyResult<Option<f64>> {
    let v = if let Some(float) = obj.payload::<PyFloat>() {
        Some(float.value)
    } else if let Some(int) = obj.payload::<PyInt>() {
        Some(int::try_to_float(int.as_bigint(), vm)?)
    } else {
        None
    };
    Ok(v)
}

fn inner_div(v1: f64, v2: f64, vm: &VirtualMachine) -> PyResult<f64> {
    if v2 == 0.0 {
        return Err(vm.new_zero_division_error("float division by zero"));
    }
    Ok(v1 / v2)
}

fn inner_mod(v1: f64, v2: f64, vm: &VirtualMachine) -> PyResult<f64> {
    if v2 == 0.0 {
        return Err(vm.new_zero_division_error("float modulo"));
    }
    Ok(divmod(v1, v2).1)
}

fn inner_floordiv(v1: f64, v2: f64, vm: &VirtualMachine) -> PyResult<f64> {
    if v2 == 0.0 {
        return Err(vm.new_zero_division_error("float divmod()"));
    }
    Ok(divmod(v1, v2).0)
}

/// Floor division and modulo with the sign of the remainder following the divisor.
fn divmod(v1: f64, v2: f64) -> (f64, f64) {
    let mut modulo = v1 % v2;
    let mut div = (v1 - modulo) / v2;
    if modulo != 0.0 {
        if (v2 < 0.0) != (modulo < 0.0) {
            modulo += v2;
            div -= 1.0;
        }
    } else {
        modulo = 0.0f64.copysign(v2);
    }
    let floordiv = if div != 0.0 {
        let mut floordiv = div.floor();
        if div - floordiv > 0.5 {
            floordiv += 1.0;
        }
        floordiv
    } else {
        0.0f64.copysign(v1 / v2)
    };
    (floordiv, modulo)
}

/// `**` on floats. A negative base raised to a fractional power yields a complex number.
pub(crate) fn float_pow(v1: f64, v2: f64, vm: &VirtualMachine) -> PyResult {
    if v1 == 0.0 && v2 < 0.0 {
        return Err(vm.new_zero_division_error("0.0 cannot be raised to a negative power"));
    }
    if v1.is_sign_negative() && v1 != 0.0 && v2 != v2.floor() && v2.is_finite() {
        let v = Complex64::new(v1, 0.0).powc(Complex64::new(v2, 0.0));
        return Ok(vm.ctx.new_complex(v.re, v.im).into());
    }
    Ok(vm.ctx.new_float(v1.powf(v2)).into())
}

/// The shortest repr that round-trips, in the same notation CPython picks: positional for
/// exponents in `-4..16`, scientific otherwise.
pub(crate) fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value.is_sign_negative() { "-inf" } else { "inf" }.to_owned();
    }
    let sci = format!("{value:e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if (-4..16).contains(&exp) {
        let s = value.to_string();
        if s.contains('.') { s } else { s + ".0" }
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    }
}

/// `float(str)`: surrounding whitespace, a sign, digits with single underscores, and the
/// words `inf`, `infinity` and `nan` in any case.
pub(crate) fn parse_float(literal: &str) -> Option<f64> {
    let s = literal.trim();
    let (sign, body) = match s.as_bytes().first()? {
        b'-' => (-1.0, &s[1..]),
        b'+' => (1.0, &s[1..]),
        _ => (1.0, s),
    };
    match body.to_ascii_lowercase().as_str() {
        "inf" | "infinity" => return Some(sign * f64::INFINITY),
        "nan" => return Some(f64::NAN.copysign(sign)),
        _ => {}
    }
    let valid_underscores = body.split('_').all(|part| {
        !part.is_empty()
            && part.starts_with(|c: char| c.is_ascii_digit())
            && part.ends_with(|c: char| c.is_ascii_digit())
    });
    if body.contains('_') && !valid_underscores {
        return None;
    }
    let cleaned = body.replace('_', "");
    if cleaned.is_empty()
        || !cleaned
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return None;
    }
    cleaned.parse::<f64>().ok().map(|v| sign * v)
}

fn float_from_object(x: &PyObjectRef, vm: &VirtualMachine) -> PyResult<f64> {
    if let Some(v) = to_op_float(x, vm)? {
        return Ok(v);
    }
    let literal = if let Some(s) = x.payload::<PyStr>() {
        Some(s.as_str().to_owned())
    } else {
        x.payload::<PyBytes>()
            .map(|b| String::from_utf8_lossy(b.as_bytes()).into_owned())
    };
    if let Some(literal) = literal {
        return parse_float(&literal).ok_or_else(|| {
            vm.new_value_error(format!(
                "could not convert string to float: {}",
                super::pystr::repr_str(&literal)
            ))
        });
    }
    for method in ["__float__", "__index__"] {
        if let Some(func) = vm.get_method(x, method) {
            let result = vm.call_with_self(&func, x.clone(), FuncArgs::default())?;
            return match to_op_float(&result, vm)? {
                Some(v) if method == "__index__" || result.payload_is::<PyFloat>() => Ok(v),
                _ => Err(vm.new_type_error(format!(
                    "{}.{method} returned non-float (type {})",
                    x.class().name(),
                    result.class().name()
                ))),
            };
        }
    }
    Err(vm.new_type_error(format!(
        "float() argument must be a string or a number, not '{}'",
        x.class().name()
    )))
}

fn float_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("float.__new__", vm)?.try_into_value(vm)?;
    let [x] = args.bind_optional::<1>("float", 0, vm)?;
    let value = match x {
        Some(x) => float_from_object(&x, vm)?,
        None => 0.0,
    };
    if cls.is(&vm.ctx.types.float_type) {
        Ok(vm.ctx.new_float(value).into())
    } else {
        Ok(PyFloat::from(value).into_ref_with_type(vm, cls)?.into())
    }
}

type FloatOp = fn(f64, f64, &VirtualMachine) -> PyResult;

fn float_binop(
    vm: &VirtualMachine,
    mut args: FuncArgs,
    name: &str,
    reflected: bool,
    op: FloatOp,
) -> PyResult {
    let zelf = args.take_zelf::<PyFloat>(name, vm)?;
    let [other] = args.bind(name, vm)?;
    let Some(other) = to_op_float(&other, vm)? else {
        return Ok(vm.ctx.not_implemented());
    };
    if reflected {
        op(other, zelf.value, vm)
    } else {
        op(zelf.value, other, vm)
    }
}

fn new_float(vm: &VirtualMachine, result: PyResult<f64>) -> PyResult {
    result.map(|v| vm.ctx.new_float(v).into())
}

/// Compares a float with an exact int without losing the int's precision.
fn compare_with_int(f: f64, i: &BigInt) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    if f.is_infinite() {
        return Some(if f > 0.0 { Ordering::Greater } else { Ordering::Less });
    }
    let whole = BigInt::from_f64(f.trunc())?;
    Some(
        whole
            .cmp(i)
            .then_with(|| f.fract().partial_cmp(&0.0).unwrap_or(Ordering::Equal)),
    )
}

fn float_cmp(vm: &VirtualMachine, mut args: FuncArgs, op: PyComparisonOp) -> PyResult {
    let zelf = args.take_zelf::<PyFloat>(op.method_name(), vm)?;
    let [other] = args.bind(op.method_name(), vm)?;
    let ord = if let Some(other) = other.payload::<PyFloat>() {
        zelf.value.partial_cmp(&other.value)
    } else if let Some(other) = other.payload::<PyInt>() {
        compare_with_int(zelf.value, other.as_bigint())
    } else {
        return Ok(vm.ctx.not_implemented());
    };
    // nan compares unequal to everything
    let result = match ord {
        Some(ord) => op.eval_ord(ord),
        None => op == PyComparisonOp::Ne,
    };
    Ok(vm.ctx.new_bool(result))
}

fn float_repr_method(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyFloat>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    Ok(vm.ctx.new_str(float_repr(zelf.value)).into())
}

fn float_hash(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyFloat>("__hash__", vm)?;
    args.bind::<0>("__hash__", vm)?;
    Ok(vm.ctx.new_int(hash::hash_float(zelf.value)).into())
}

fn float_bool(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyFloat>("__bool__", vm)?;
    args.bind::<0>("__bool__", vm)?;
    Ok(vm.ctx.new_bool(!zelf.value.is_zero()))
}

fn float_int(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyFloat>("__int__", vm)?;
    args.bind::<0>("__int__", vm)?;
    Ok(vm.ctx.new_int(int::float_to_int(zelf.value, vm)?).into())
}

fn float_float(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyFloat>("__float__", vm)?;
    args.bind::<0>("__float__", vm)?;
    if zelf.class().is(&vm.ctx.types.float_type) {
        return Ok(zelf.into());
    }
    Ok(vm.ctx.new_float(zelf.value).into())
}

fn float_unary(vm: &VirtualMachine, mut args: FuncArgs, name: &str, op: fn(f64) -> f64) -> PyResult {
    let zelf = args.take_zelf::<PyFloat>(name, vm)?;
    args.bind::<0>(name, vm)?;
    Ok(vm.ctx.new_float(op(zelf.value)).into())
}

fn float_is_integer(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyFloat>("is_integer", vm)?;
    args.bind::<0>("is_integer", vm)?;
    let v = zelf.value;
    Ok(vm.ctx.new_bool(v.is_finite() && v.fract() == 0.0))
}

fn float_round(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyFloat>("__round__", vm)?;
    let [ndigits] = args.bind_optional::<1>("__round__", 0, vm)?;
    let ndigits = ndigits.and_then(|n| vm.option_if_none(n));
    match ndigits {
        None => {
            // round half to even
            let v = zelf.value;
            let rounded = v.round();
            let rounded = if (v - v.trunc()).abs() == 0.5 {
                2.0 * (v / 2.0).round()
            } else {
                rounded
            };
            Ok(vm.ctx.new_int(int::float_to_int(rounded, vm)?).into())
        }
        Some(n) => {
            let n: i64 = n.try_into_value(vm)?;
            let factor = 10f64.powi(n.clamp(-308, 308) as i32);
            let scaled = zelf.value * factor;
            let rounded = if (scaled - scaled.trunc()).abs() == 0.5 {
                2.0 * (scaled / 2.0).round()
            } else {
                scaled.round()
            };
            Ok(vm.ctx.new_float(rounded / factor).into())
        }
    }
}

fn float_get_real(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    float_float(vm, args)
}

fn float_get_imag(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    args.bind::<1>("imag", vm)?;
    Ok(vm.ctx.new_float(0.0).into())
}

macro_rules! float_binop_method {
    ($ctx:expr, $name:literal, $reflected:expr, $op:expr) => {
        $ctx.new_method($name, |vm, args| float_binop(vm, args, $name, $reflected, $op))
    };
}

macro_rules! float_cmp_method {
    ($ctx:expr, $op:ident) => {
        $ctx.new_method(PyComparisonOp::$op.method_name(), |vm, args| {
            float_cmp(vm, args, PyComparisonOp::$op)
        })
    };
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.float_type, {
        "__new__" => ctx.new_staticmethod("__new__", float_new),
        "__repr__" => ctx.new_method("__repr__", float_repr_method),
        "__hash__" => ctx.new_method("__hash__", float_hash),
        "__bool__" => ctx.new_method("__bool__", float_bool),
        "__int__" => ctx.new_method("__int__", float_int),
        "__float__" => ctx.new_method("__float__", float_float),
        "__round__" => ctx.new_method("__round__", float_round),
        "is_integer" => ctx.new_method("is_integer", float_is_integer),
        "real" => ctx.new_readonly_getset("real", float_get_real),
        "imag" => ctx.new_readonly_getset("imag", float_get_imag),

        "__neg__" => ctx.new_method("__neg__", |vm, args| float_unary(vm, args, "__neg__", |v| -v)),
        "__pos__" => ctx.new_method("__pos__", |vm, args| float_unary(vm, args, "__pos__", |v| v)),
        "__abs__" => ctx.new_method("__abs__", |vm, args| float_unary(vm, args, "__abs__", f64::abs)),

        "__eq__" => float_cmp_method!(ctx, Eq),
        "__ne__" => float_cmp_method!(ctx, Ne),
        "__lt__" => float_cmp_method!(ctx, Lt),
        "__le__" => float_cmp_method!(ctx, Le),
        "__gt__" => float_cmp_method!(ctx, Gt),
        "__ge__" => float_cmp_method!(ctx, Ge),

        "__add__" => float_binop_method!(ctx, "__add__", false, |a, b, vm| Ok(vm.ctx.new_float(a + b).into())),
        "__radd__" => float_binop_method!(ctx, "__radd__", true, |a, b, vm| Ok(vm.ctx.new_float(a + b).into())),
        "__sub__" => float_binop_method!(ctx, "__sub__", false, |a, b, vm| Ok(vm.ctx.new_float(a - b).into())),
        "__rsub__" => float_binop_method!(ctx, "__rsub__", true, |a, b, vm| Ok(vm.ctx.new_float(a - b).into())),
        "__mul__" => float_binop_method!(ctx, "__mul__", false, |a, b, vm| Ok(vm.ctx.new_float(a * b).into())),
        "__rmul__" => float_binop_method!(ctx, "__rmul__", true, |a, b, vm| Ok(vm.ctx.new_float(a * b).into())),
        "__truediv__" => float_binop_method!(ctx, "__truediv__", false, |a, b, vm| new_float(vm, inner_div(a, b, vm))),
        "__rtruediv__" => float_binop_method!(ctx, "__rtruediv__", true, |a, b, vm| new_float(vm, inner_div(a, b, vm))),
        "__floordiv__" => float_binop_method!(ctx, "__floordiv__", false, |a, b, vm| new_float(vm, inner_floordiv(a, b, vm))),
        "__rfloordiv__" => float_binop_method!(ctx, "__rfloordiv__", true, |a, b, vm| new_float(vm, inner_floordiv(a, b, vm))),
        "__mod__" => float_binop_method!(ctx, "__mod__", false, |a, b, vm| new_float(vm, inner_mod(a, b, vm))),
        "__rmod__" => float_binop_method!(ctx, "__rmod__", true, |a, b, vm| new_float(vm, inner_mod(a, b, vm))),
        "__pow__" => float_binop_method!(ctx, "__pow__", false, float_pow),
        "__rpow__" => float_binop_method!(ctx, "__rpow__", true, float_pow),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_matches_python() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(-0.0), "-0.0");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(123456789.0), "123456789.0");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn floor_division_follows_the_divisor() {
        assert_eq!(divmod(7.0, 2.0), (3.0, 1.0));
        assert_eq!(divmod(-7.0, 2.0), (-4.0, 1.0));
        assert_eq!(divmod(7.0, -2.0), (-4.0, -1.0));
    }

    #[test]
    fn parses_float_literals() {
        assert_eq!(parse_float(" 1.5 "), Some(1.5));
        assert_eq!(parse_float("-1_000.5"), Some(-1000.5));
        assert_eq!(parse_float("1e3"), Some(1000.0));
        assert_eq!(parse_float("-Infinity"), Some(f64::NEG_INFINITY));
        assert!(parse_float("nan").unwrap().is_nan());
        assert_eq!(parse_float("1__0"), None);
        assert_eq!(parse_float("abc"), None);
        assert_eq!(parse_float(""), None);
    }
}
