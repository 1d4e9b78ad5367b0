use super::{PyFloat, PyStr, PyTypeRef, float};
use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, VirtualMachine,
    builtins::PyBytes,
    function::FuncArgs,
    hash,
    types::PyComparisonOp,
    vm::Context,
};
use core::fmt;
use malachite_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, Num, One, Pow, Signed, ToPrimitive, Zero};

/// Arbitrary precision integer; also the payload of `bool`.
#[derive(Debug)]
pub struct PyInt {
    value: BigInt,
}

impl fmt::Display for PyInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        BigInt::fmt(&self.value, f)
    }
}

pub type PyIntRef = PyRef<PyInt>;

impl PyPayload for PyInt {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.int_type
    }

    fn into_pyobject(self, vm: &VirtualMachine) -> PyObjectRef {
        vm.ctx.new_int(self.value).into()
    }
}

impl<T> From<T> for PyInt
where
    T: Into<BigInt>,
{
    fn from(v: T) -> Self {
        Self { value: v.into() }
    }
}

impl PyInt {
    #[inline]
    pub fn as_bigint(&self) -> &BigInt {
        &self.value
    }
}

fn inner_add(a: &BigInt, b: &BigInt, vm: &VirtualMachine) -> PyResult {
    Ok(vm.ctx.new_int(a + b).into())
}

fn inner_sub(a: &BigInt, b: &BigInt, vm: &VirtualMachine) -> PyResult {
    Ok(vm.ctx.new_int(a - b).into())
}

fn inner_mul(a: &BigInt, b: &BigInt, vm: &VirtualMachine) -> PyResult {
    Ok(vm.ctx.new_int(a * b).into())
}

fn inner_and(a: &BigInt, b: &BigInt, vm: &VirtualMachine) -> PyResult {
    Ok(vm.ctx.new_int(a & b).into())
}

fn inner_or(a: &BigInt, b: &BigInt, vm: &VirtualMachine) -> PyResult {
    Ok(vm.ctx.new_int(a | b).into())
}

fn inner_xor(a: &BigInt, b: &BigInt, vm: &VirtualMachine) -> PyResult {
    Ok(vm.ctx.new_int(a ^ b).into())
}

fn inner_pow(int1: &BigInt, int2: &BigInt, vm: &VirtualMachine) -> PyResult {
    if int2.is_negative() {
        let v1 = try_to_float(int1, vm)?;
        let v2 = try_to_float(int2, vm)?;
        float::float_pow(v1, v2, vm)
    } else {
        let value = if let Some(v2) = int2.to_u64() {
            return Ok(vm.ctx.new_int(Pow::pow(int1, v2)).into());
        } else if int1.is_one() {
            1
        } else if int1.is_zero() {
            0
        } else if int1 == &BigInt::from(-1) {
            if int2.is_odd() { -1 } else { 1 }
        } else {
            return Err(vm.new_overflow_error("exponent too large"));
        };
        Ok(vm.ctx.new_int(value).into())
    }
}

fn inner_mod(int1: &BigInt, int2: &BigInt, vm: &VirtualMachine) -> PyResult {
    if int2.is_zero() {
        Err(vm.new_zero_division_error("integer division or modulo by zero"))
    } else {
        Ok(vm.ctx.new_int(int1.mod_floor(int2)).into())
    }
}

fn inner_floordiv(int1: &BigInt, int2: &BigInt, vm: &VirtualMachine) -> PyResult {
    if int2.is_zero() {
        Err(vm.new_zero_division_error("integer division or modulo by zero"))
    } else {
        Ok(vm.ctx.new_int(int1.div_floor(int2)).into())
    }
}

fn inner_truediv(int1: &BigInt, int2: &BigInt, vm: &VirtualMachine) -> PyResult {
    if int2.is_zero() {
        return Err(vm.new_zero_division_error("division by zero"));
    }
    let (Some(a), Some(b)) = (int1.to_f64(), int2.to_f64()) else {
        return Err(vm.new_overflow_error("int too large to convert to float"));
    };
    let quotient = a / b;
    if quotient.is_finite() {
        Ok(vm.ctx.new_float(quotient).into())
    } else {
        Err(vm.new_overflow_error("integer division result too large for a float"))
    }
}

fn inner_lshift(base: &BigInt, bits: &BigInt, vm: &VirtualMachine) -> PyResult {
    let shift = shift_count(bits, vm)?;
    if base.is_zero() {
        return Ok(vm.ctx.new_int(0).into());
    }
    if shift > 1 << 24 {
        return Err(vm.new_overflow_error("too many digits in integer"));
    }
    Ok(vm.ctx.new_int(base << shift).into())
}

fn inner_rshift(base: &BigInt, bits: &BigInt, vm: &VirtualMachine) -> PyResult {
    let shift = shift_count(bits, vm)?;
    if shift as u64 >= base.bits() {
        let value = if base.is_negative() { -1 } else { 0 };
        return Ok(vm.ctx.new_int(value).into());
    }
    Ok(vm.ctx.new_int(base >> shift).into())
}

fn shift_count(bits: &BigInt, vm: &VirtualMachine) -> PyResult<usize> {
    if bits.is_negative() {
        return Err(vm.new_value_error("negative shift count"));
    }
    bits.to_usize()
        .ok_or_else(|| vm.new_overflow_error("Python int too large to convert to C ssize_t"))
}

pub(crate) fn try_to_float(int: &BigInt, vm: &VirtualMachine) -> PyResult<f64> {
    int.to_f64()
        .filter(|f| f.is_finite())
        .ok_or_else(|| vm.new_overflow_error("int too large to convert to float"))
}

type IntOp = fn(&BigInt, &BigInt, &VirtualMachine) -> PyResult;

/// Runs `op` when the other operand is an int too, and gives up otherwise so the reflected
/// method of the other operand gets its turn.
fn int_binop(vm: &VirtualMachine, mut args: FuncArgs, name: &str, reflected: bool, op: IntOp) -> PyResult {
    let zelf = args.take_zelf::<PyInt>(name, vm)?;
    let [other] = args.bind(name, vm)?;
    let Some(other) = other.payload::<PyInt>() else {
        return Ok(vm.ctx.not_implemented());
    };
    if reflected {
        op(other.as_bigint(), zelf.as_bigint(), vm)
    } else {
        op(zelf.as_bigint(), other.as_bigint(), vm)
    }
}

fn int_cmp(vm: &VirtualMachine, mut args: FuncArgs, op: PyComparisonOp) -> PyResult {
    let zelf = args.take_zelf::<PyInt>(op.method_name(), vm)?;
    let [other] = args.bind(op.method_name(), vm)?;
    Ok(match other.payload::<PyInt>() {
        Some(other) => vm
            .ctx
            .new_bool(op.eval_ord(zelf.as_bigint().cmp(other.as_bigint()))),
        None => vm.ctx.not_implemented(),
    })
}

fn int_unary(
    vm: &VirtualMachine,
    mut args: FuncArgs,
    name: &str,
    op: fn(&BigInt) -> BigInt,
) -> PyResult {
    let zelf = args.take_zelf::<PyInt>(name, vm)?;
    args.bind::<0>(name, vm)?;
    Ok(vm.ctx.new_int(op(zelf.as_bigint())).into())
}

/// Parses an integer literal the way `int(str, base)` does: surrounding whitespace, a sign,
/// an optional `0x`/`0o`/`0b` prefix matching the base and single underscores between digits.
pub(crate) fn parse_int(literal: &str, base: u32) -> Option<BigInt> {
    let s = literal.trim();
    let (negative, s) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let prefix_base = match s.get(..2).map(str::to_ascii_lowercase).as_deref() {
        Some("0x") => Some(16),
        Some("0o") => Some(8),
        Some("0b") => Some(2),
        _ => None,
    };
    let (base, digits) = match (base, prefix_base) {
        (0, Some(b)) => (b, s[2..].strip_prefix('_').unwrap_or(&s[2..])),
        (b, Some(p)) if b == p => (b, s[2..].strip_prefix('_').unwrap_or(&s[2..])),
        (0, None) => {
            // a decimal literal with a leading zero must be all zeros
            if s.starts_with('0') && s.chars().any(|c| c != '0' && c != '_') {
                return None;
            }
            (10, s)
        }
        (b, _) => (b, s),
    };
    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
    {
        return None;
    }
    let cleaned = digits.replace('_', "");
    if !cleaned.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let value = BigInt::from_str_radix(&cleaned, base).ok()?;
    Some(if negative { -value } else { value })
}

fn str_to_int(literal: &str, base: u32, vm: &VirtualMachine) -> PyResult<BigInt> {
    parse_int(literal, base).ok_or_else(|| {
        vm.new_value_error(format!(
            "invalid literal for int() with base {base}: {}",
            super::pystr::repr_str(literal)
        ))
    })
}

/// `int(x)` for a single argument.
fn to_int(x: &PyObjectRef, vm: &VirtualMachine) -> PyResult<BigInt> {
    if let Some(int) = x.payload::<PyInt>() {
        return Ok(int.as_bigint().clone());
    }
    if let Some(float) = x.payload::<PyFloat>() {
        return float_to_int(float.to_f64(), vm);
    }
    if let Some(s) = x.payload::<PyStr>() {
        return str_to_int(s.as_str(), 10, vm);
    }
    if let Some(bytes) = x.payload::<PyBytes>() {
        let literal = String::from_utf8_lossy(bytes.as_bytes());
        return str_to_int(&literal, 10, vm);
    }
    for method in ["__int__", "__index__"] {
        if let Some(func) = vm.get_method(x, method) {
            let result = vm.call_with_self(&func, x.clone(), FuncArgs::default())?;
            return match result.payload::<PyInt>() {
                Some(int) => Ok(int.as_bigint().clone()),
                None => Err(vm.new_type_error(format!(
                    "{method} returned non-int (type {})",
                    result.class().name()
                ))),
            };
        }
    }
    Err(vm.new_type_error(format!(
        "int() argument must be a string, a bytes-like object or a number, not '{}'",
        x.class().name()
    )))
}

pub(crate) fn float_to_int(value: f64, vm: &VirtualMachine) -> PyResult<BigInt> {
    if value.is_nan() {
        return Err(vm.new_value_error("cannot convert float NaN to integer"));
    }
    if value.is_infinite() {
        return Err(vm.new_overflow_error("cannot convert float infinity to integer"));
    }
    BigInt::from_f64(value.trunc())
        .ok_or_else(|| vm.new_overflow_error("cannot convert float to integer"))
}

fn int_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("int.__new__", vm)?.try_into_value(vm)?;
    let base_kw = args.take_keyword("base");
    let [x, base] = args.bind_optional::<2>("int", 0, vm)?;
    let value = match (x, base.or(base_kw)) {
        (None, None) => BigInt::zero(),
        (None, Some(_)) => return Err(vm.new_type_error("int() missing string argument")),
        (Some(x), None) => to_int(&x, vm)?,
        (Some(x), Some(base)) => {
            let base: u32 = base.try_into_value(vm)?;
            if base != 0 && !(2..=36).contains(&base) {
                return Err(vm.new_value_error("int() base must be >= 2 and <= 36, or 0"));
            }
            let literal = if let Some(s) = x.payload::<PyStr>() {
                s.as_str().to_owned()
            } else if let Some(bytes) = x.payload::<PyBytes>() {
                String::from_utf8_lossy(bytes.as_bytes()).into_owned()
            } else {
                return Err(vm.new_type_error("int() can't convert non-string with explicit base"));
            };
            str_to_int(&literal, base, vm)?
        }
    };
    if cls.is(&vm.ctx.types.int_type) {
        Ok(vm.ctx.new_int(value).into())
    } else {
        Ok(PyInt::from(value).into_ref_with_type(vm, cls)?.into())
    }
}

fn int_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyInt>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    Ok(vm.ctx.new_str(zelf.to_string()).into())
}

fn int_hash(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyInt>("__hash__", vm)?;
    args.bind::<0>("__hash__", vm)?;
    Ok(vm.ctx.new_int(hash::hash_bigint(zelf.as_bigint())).into())
}

fn int_bool(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyInt>("__bool__", vm)?;
    args.bind::<0>("__bool__", vm)?;
    Ok(vm.ctx.new_bool(!zelf.as_bigint().is_zero()))
}

/// `__int__` and `__index__`: the value itself, as an exact int.
fn int_int(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyInt>("__int__", vm)?;
    args.bind::<0>("__int__", vm)?;
    if zelf.class().is(&vm.ctx.types.int_type) {
        return Ok(zelf.into());
    }
    Ok(vm.ctx.new_int(zelf.as_bigint().clone()).into())
}

fn int_float(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyInt>("__float__", vm)?;
    args.bind::<0>("__float__", vm)?;
    Ok(vm.ctx.new_float(try_to_float(zelf.as_bigint(), vm)?).into())
}

fn int_bit_length(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyInt>("bit_length", vm)?;
    args.bind::<0>("bit_length", vm)?;
    Ok(vm.ctx.new_int(zelf.as_bigint().bits()).into())
}

fn int_get_real(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    int_int(vm, args)
}

fn int_get_imag(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    args.bind::<1>("imag", vm)?;
    Ok(vm.ctx.new_int(0).into())
}

macro_rules! int_binop_method {
    ($ctx:expr, $name:literal, $reflected:expr, $op:expr) => {
        $ctx.new_method($name, |vm, args| int_binop(vm, args, $name, $reflected, $op))
    };
}

macro_rules! int_cmp_method {
    ($ctx:expr, $op:ident) => {
        $ctx.new_method(PyComparisonOp::$op.method_name(), |vm, args| {
            int_cmp(vm, args, PyComparisonOp::$op)
        })
    };
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.int_type, {
        "__new__" => ctx.new_staticmethod("__new__", int_new),
        "__repr__" => ctx.new_method("__repr__", int_repr),
        "__hash__" => ctx.new_method("__hash__", int_hash),
        "__bool__" => ctx.new_method("__bool__", int_bool),
        "__int__" => ctx.new_method("__int__", int_int),
        "__index__" => ctx.new_method("__index__", int_int),
        "__float__" => ctx.new_method("__float__", int_float),
        "bit_length" => ctx.new_method("bit_length", int_bit_length),
        "real" => ctx.new_readonly_getset("real", int_get_real),
        "imag" => ctx.new_readonly_getset("imag", int_get_imag),

        "__eq__" => int_cmp_method!(ctx, Eq),
        "__ne__" => int_cmp_method!(ctx, Ne),
        "__lt__" => int_cmp_method!(ctx, Lt),
        "__le__" => int_cmp_method!(ctx, Le),
        "__gt__" => int_cmp_method!(ctx, Gt),
        "__ge__" => int_cmp_method!(ctx, Ge),

        "__neg__" => ctx.new_method("__neg__", |vm, args| int_unary(vm, args, "__neg__", |a| -a.clone())),
        "__pos__" => ctx.new_method("__pos__", |vm, args| int_unary(vm, args, "__pos__", BigInt::clone)),
        "__invert__" => ctx.new_method("__invert__", |vm, args| int_unary(vm, args, "__invert__", |a| -(a + BigInt::one()))),
        "__abs__" => ctx.new_method("__abs__", |vm, args| int_unary(vm, args, "__abs__", |a| a.abs())),

        "__add__" => int_binop_method!(ctx, "__add__", false, inner_add),
        "__radd__" => int_binop_method!(ctx, "__radd__", true, inner_add),
        "__sub__" => int_binop_method!(ctx, "__sub__", false, inner_sub),
        "__rsub__" => int_binop_method!(ctx, "__rsub__", true, inner_sub),
        "__mul__" => int_binop_method!(ctx, "__mul__", false, inner_mul),
        "__rmul__" => int_binop_method!(ctx, "__rmul__", true, inner_mul),
        "__truediv__" => int_binop_method!(ctx, "__truediv__", false, inner_truediv),
        "__rtruediv__" => int_binop_method!(ctx, "__rtruediv__", true, inner_truediv),
        "__floordiv__" => int_binop_method!(ctx, "__floordiv__", false, inner_floordiv),
        "__rfloordiv__" => int_binop_method!(ctx, "__rfloordiv__", true, inner_floordiv),
        "__mod__" => int_binop_method!(ctx, "__mod__", false, inner_mod),
        "__rmod__" => int_binop_method!(ctx, "__rmod__", true, inner_mod),
        "__pow__" => int_binop_method!(ctx, "__pow__", false, inner_pow),
        "__rpow__" => int_binop_method!(ctx, "__rpow__", true, inner_pow),
        "__lshift__" => int_binop_method!(ctx, "__lshift__", false, inner_lshift),
        "__rlshift__" => int_binop_method!(ctx, "__rlshift__", true, inner_lshift),
        "__rshift__" => int_binop_method!(ctx, "__rshift__", false, inner_rshift),
        "__rrshift__" => int_binop_method!(ctx, "__rrshift__", true, inner_rshift),
        "__and__" => int_binop_method!(ctx, "__and__", false, inner_and),
        "__rand__" => int_binop_method!(ctx, "__rand__", true, inner_and),
        "__or__" => int_binop_method!(ctx, "__or__", false, inner_or),
        "__ror__" => int_binop_method!(ctx, "__ror__", true, inner_or),
        "__xor__" => int_binop_method!(ctx, "__xor__", false, inner_xor),
        "__rxor__" => int_binop_method!(ctx, "__rxor__", true, inner_xor),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_parsing() {
        assert_eq!(parse_int(" 42 ", 10), Some(BigInt::from(42)));
        assert_eq!(parse_int("-0x_ff", 0), Some(BigInt::from(-255)));
        assert_eq!(parse_int("0b101", 2), Some(BigInt::from(5)));
        assert_eq!(parse_int("1_000", 10), Some(BigInt::from(1000)));
        assert_eq!(parse_int("z", 36), Some(BigInt::from(35)));
        assert_eq!(parse_int("1__0", 10), None);
        assert_eq!(parse_int("012", 0), None);
        assert_eq!(parse_int("000", 0), Some(BigInt::from(0)));
        assert_eq!(parse_int("", 10), None);
        assert_eq!(parse_int("--1", 10), None);
        assert_eq!(parse_int("12a", 10), None);
    }
}
