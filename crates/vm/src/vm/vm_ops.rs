use super::VirtualMachine;
use crate::{
    PyObjectRef, PyResult,
    function::IntoFuncArgs,
    protocol::PyNumberBinaryOp,
    types::PyComparisonOp,
};

macro_rules! binary_func {
    ($fn:ident, $op_slot:ident) => {
        pub fn $fn(&self, a: &PyObjectRef, b: &PyObjectRef) -> PyResult {
            self.binary_op(a, b, PyNumberBinaryOp::$op_slot)
        }
    };
}

macro_rules! inplace_binary_func {
    ($fn:ident, $op_slot:ident) => {
        pub fn $fn(&self, a: &PyObjectRef, b: &PyObjectRef) -> PyResult {
            self.binary_iop(a, b, PyNumberBinaryOp::$op_slot)
        }
    };
}

macro_rules! unary_func {
    ($fn:ident, $method:literal, $op:literal) => {
        pub fn $fn(&self, a: &PyObjectRef) -> PyResult {
            match self.get_method(a, $method) {
                Some(method) => self.call_with_self(&method, a.clone(), ().into_args(self)),
                None => Err(self.new_unsupported_unary_error(a, $op)),
            }
        }
    };
}

/// Collection of operators
impl VirtualMachine {
    #[inline]
    pub fn bool_eq(&self, a: &PyObjectRef, b: &PyObjectRef) -> PyResult<bool> {
        self.rich_compare_bool(a, b, PyComparisonOp::Eq)
    }

    pub fn identical_or_equal(&self, a: &PyObjectRef, b: &PyObjectRef) -> PyResult<bool> {
        if a.is(b) {
            Ok(true)
        } else {
            self.bool_eq(a, b)
        }
    }

    /// Calling scheme used for binary operations:
    ///
    /// Order operations are tried until either a valid result or error:
    ///   `b.rop(b,a)[*], a.op(a,b), b.rop(b,a)`
    ///
    /// `[*]` - only when `type(a) != type(b)` and `type(b)` is a subclass of `type(a)`
    pub fn binary_op1(&self, a: &PyObjectRef, b: &PyObjectRef, op: PyNumberBinaryOp) -> PyResult {
        let class_a = a.class();
        let class_b = b.class();

        let method_a = class_a.get_attr(op.method_name());
        let mut method_b = if class_a.is(class_b) {
            None
        } else {
            class_b.get_attr(op.reflected_method_name())
        };

        if let Some(method_a) = method_a {
            if let Some(method_bb) = &method_b
                && class_b.fast_issubclass(class_a)
            {
                let ret = self.call_with_self(method_bb, b.clone(), vec![a.clone()].into())?;
                if !ret.is(&self.ctx.not_implemented) {
                    return Ok(ret);
                }
                method_b = None;
            }
            let ret = self.call_with_self(&method_a, a.clone(), vec![b.clone()].into())?;
            if !ret.is(&self.ctx.not_implemented) {
                return Ok(ret);
            }
        }

        if let Some(method_b) = method_b {
            let ret = self.call_with_self(&method_b, b.clone(), vec![a.clone()].into())?;
            if !ret.is(&self.ctx.not_implemented) {
                return Ok(ret);
            }
        }

        Ok(self.ctx.not_implemented())
    }

    pub fn binary_op(&self, a: &PyObjectRef, b: &PyObjectRef, op: PyNumberBinaryOp) -> PyResult {
        let result = self.binary_op1(a, b, op)?;
        if !result.is(&self.ctx.not_implemented) {
            return Ok(result);
        }
        Err(self.new_unsupported_bin_op_error(a, b, op.operator()))
    }

    /// Binary in-place operators
    ///
    /// The in-place operators are defined to fall back to the 'normal',
    /// non in-place operations, if the in-place methods are not in place.
    fn binary_iop(&self, a: &PyObjectRef, b: &PyObjectRef, op: PyNumberBinaryOp) -> PyResult {
        if let Some(method) = self.get_method(a, op.inplace_method_name()) {
            let ret = self.call_with_self(&method, a.clone(), vec![b.clone()].into())?;
            if !ret.is(&self.ctx.not_implemented) {
                return Ok(ret);
            }
        }
        let result = self.binary_op1(a, b, op)?;
        if !result.is(&self.ctx.not_implemented) {
            return Ok(result);
        }
        let token = match op {
            PyNumberBinaryOp::Power => "**=".to_owned(),
            op => format!("{}=", op.operator()),
        };
        Err(self.new_unsupported_bin_op_error(a, b, &token))
    }

    binary_func!(_add, Add);
    binary_func!(_sub, Subtract);
    binary_func!(_mul, Multiply);
    binary_func!(_matmul, MatrixMultiply);
    binary_func!(_truediv, TrueDivide);
    binary_func!(_floordiv, FloorDivide);
    binary_func!(_mod, Remainder);
    binary_func!(_pow, Power);
    binary_func!(_lshift, Lshift);
    binary_func!(_rshift, Rshift);
    binary_func!(_and, And);
    binary_func!(_xor, Xor);
    binary_func!(_or, Or);

    inplace_binary_func!(_iadd, Add);
    inplace_binary_func!(_isub, Subtract);
    inplace_binary_func!(_imul, Multiply);
    inplace_binary_func!(_imatmul, MatrixMultiply);
    inplace_binary_func!(_itruediv, TrueDivide);
    inplace_binary_func!(_ifloordiv, FloorDivide);
    inplace_binary_func!(_imod, Remainder);
    inplace_binary_func!(_ipow, Power);
    inplace_binary_func!(_ilshift, Lshift);
    inplace_binary_func!(_irshift, Rshift);
    inplace_binary_func!(_iand, And);
    inplace_binary_func!(_ixor, Xor);
    inplace_binary_func!(_ior, Or);

    unary_func!(_neg, "__neg__", "unary -");
    unary_func!(_pos, "__pos__", "unary +");
    unary_func!(_invert, "__invert__", "unary ~");

    /// Rich comparison with the reflected fallback: `a < b` asks `b > a` when `a` gives up,
    /// and asks it first when `type(b)` is a proper subclass of `type(a)`.
    pub fn rich_compare(&self, a: &PyObjectRef, b: &PyObjectRef, op: PyComparisonOp) -> PyResult {
        let swapped = op.swapped();
        let call_cmp = |obj: &PyObjectRef, other: &PyObjectRef, op: PyComparisonOp| {
            match self.get_method(obj, op.method_name()) {
                Some(method) => {
                    self.call_with_self(&method, obj.clone(), vec![other.clone()].into())
                }
                None => Ok(self.ctx.not_implemented()),
            }
        };

        let checked_reverse = !a.class().is(b.class()) && b.class().fast_issubclass(a.class());
        if checked_reverse {
            let res = call_cmp(b, a, swapped)?;
            if !res.is(&self.ctx.not_implemented) {
                return Ok(res);
            }
        }
        let res = call_cmp(a, b, op)?;
        if !res.is(&self.ctx.not_implemented) {
            return Ok(res);
        }
        if !checked_reverse {
            let res = call_cmp(b, a, swapped)?;
            if !res.is(&self.ctx.not_implemented) {
                return Ok(res);
            }
        }

        match op {
            PyComparisonOp::Eq => Ok(self.ctx.new_bool(a.is(b))),
            PyComparisonOp::Ne => Ok(self.ctx.new_bool(!a.is(b))),
            _ => Err(self.new_type_error(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op.operator_token(),
                a.class().name(),
                b.class().name()
            ))),
        }
    }

    pub fn rich_compare_bool(
        &self,
        a: &PyObjectRef,
        b: &PyObjectRef,
        op: PyComparisonOp,
    ) -> PyResult<bool> {
        // identity implies equality, as for containers in CPython
        if a.is(b) {
            match op {
                PyComparisonOp::Eq => return Ok(true),
                PyComparisonOp::Ne => return Ok(false),
                _ => {}
            }
        }
        self.rich_compare(a, b, op)?.is_true(self)
    }

    /// `needle in haystack`: `__contains__`, then a linear scan of the iterator.
    pub fn _contains(&self, haystack: &PyObjectRef, needle: &PyObjectRef) -> PyResult<bool> {
        if let Some(contains) = self.get_method(haystack, "__contains__") {
            let res =
                self.call_with_self(&contains, haystack.clone(), vec![needle.clone()].into())?;
            return res.is_true(self);
        }
        if !haystack.class().has_attr("__iter__") && !haystack.class().has_attr("__getitem__") {
            return Err(self.new_type_error(format!(
                "argument of type '{}' is not iterable",
                haystack.class().name()
            )));
        }
        let iter = haystack.get_iter(self)?;
        for item in iter.into_iter(self) {
            if self.identical_or_equal(&item?, needle)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
