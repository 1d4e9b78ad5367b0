/// The binary operators that dispatch through a pair of special methods, as the dispatch loop
/// names them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PyNumberBinaryOp {
    Add,
    Subtract,
    Multiply,
    MatrixMultiply,
    TrueDivide,
    FloorDivide,
    Remainder,
    Power,
    Lshift,
    Rshift,
    And,
    Xor,
    Or,
}

impl PyNumberBinaryOp {
    /// The left-operand special method, `__add__`.
    pub const fn method_name(self) -> &'static str {
        match self {
            Self::Add => "__add__",
            Self::Subtract => "__sub__",
            Self::Multiply => "__mul__",
            Self::MatrixMultiply => "__matmul__",
            Self::TrueDivide => "__truediv__",
            Self::FloorDivide => "__floordiv__",
            Self::Remainder => "__mod__",
            Self::Power => "__pow__",
            Self::Lshift => "__lshift__",
            Self::Rshift => "__rshift__",
            Self::And => "__and__",
            Self::Xor => "__xor__",
            Self::Or => "__or__",
        }
    }

    /// The reflected special method, `__radd__`.
    pub const fn reflected_method_name(self) -> &'static str {
        match self {
            Self::Add => "__radd__",
            Self::Subtract => "__rsub__",
            Self::Multiply => "__rmul__",
            Self::MatrixMultiply => "__rmatmul__",
            Self::TrueDivide => "__rtruediv__",
            Self::FloorDivide => "__rfloordiv__",
            Self::Remainder => "__rmod__",
            Self::Power => "__rpow__",
            Self::Lshift => "__rlshift__",
            Self::Rshift => "__rrshift__",
            Self::And => "__rand__",
            Self::Xor => "__rxor__",
            Self::Or => "__ror__",
        }
    }

    /// The in-place special method, `__iadd__`.
    pub const fn inplace_method_name(self) -> &'static str {
        match self {
            Self::Add => "__iadd__",
            Self::Subtract => "__isub__",
            Self::Multiply => "__imul__",
            Self::MatrixMultiply => "__imatmul__",
            Self::TrueDivide => "__itruediv__",
            Self::FloorDivide => "__ifloordiv__",
            Self::Remainder => "__imod__",
            Self::Power => "__ipow__",
            Self::Lshift => "__ilshift__",
            Self::Rshift => "__irshift__",
            Self::And => "__iand__",
            Self::Xor => "__ixor__",
            Self::Or => "__ior__",
        }
    }

    /// The operator as written in source, for error messages.
    pub const fn operator(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::MatrixMultiply => "@",
            Self::TrueDivide => "/",
            Self::FloorDivide => "//",
            Self::Remainder => "%",
            Self::Power => "** or pow()",
            Self::Lshift => "<<",
            Self::Rshift => ">>",
            Self::And => "&",
            Self::Xor => "^",
            Self::Or => "|",
        }
    }
}
