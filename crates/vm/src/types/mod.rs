mod zoo;

pub use zoo::TypeZoo;

/// A rich comparison, numbered as `COMPARE_OP` encodes it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum PyComparisonOp {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
}

impl PyComparisonOp {
    /// The operator the right operand is asked for when the left one gives up.
    pub const fn swapped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }

    pub const fn method_name(self) -> &'static str {
        match self {
            Self::Lt => "__lt__",
            Self::Le => "__le__",
            Self::Eq => "__eq__",
            Self::Ne => "__ne__",
            Self::Gt => "__gt__",
            Self::Ge => "__ge__",
        }
    }

    pub const fn operator_token(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// Evaluates the comparison on an `Ordering`, for the builtin types.
    pub fn eval_ord(self, ord: core::cmp::Ordering) -> bool {
        use core::cmp::Ordering::*;
        match self {
            Self::Lt => ord == Less,
            Self::Le => ord != Greater,
            Self::Eq => ord == Equal,
            Self::Ne => ord != Equal,
            Self::Gt => ord == Greater,
            Self::Ge => ord != Less,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflection_mirrors_orderings() {
        assert_eq!(PyComparisonOp::Lt.swapped(), PyComparisonOp::Gt);
        assert_eq!(PyComparisonOp::Ge.swapped(), PyComparisonOp::Le);
        assert_eq!(PyComparisonOp::Ne.swapped(), PyComparisonOp::Ne);
        assert_eq!(PyComparisonOp::try_from(2).unwrap(), PyComparisonOp::Eq);
        assert!(PyComparisonOp::try_from(6).is_err());
    }
}
