//! The Python 3.9 opcode table.

use core::fmt;

/// Opcodes at or above this value carry a meaningful argument.
pub const HAVE_ARGUMENT: u8 = 90;

/// A single wordcode opcode, numbered exactly as CPython 3.9 numbers them.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    num_enum::TryFromPrimitive,
    num_enum::IntoPrimitive,
    strum_macros::IntoStaticStr,
)]
#[repr(u8)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    DupTopTwo = 5,
    RotFour = 6,
    Nop = 9,
    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryInvert = 15,
    BinaryMatrixMultiply = 16,
    InplaceMatrixMultiply = 17,
    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,
    Reraise = 48,
    WithExceptStart = 49,
    GetAiter = 50,
    GetAnext = 51,
    BeforeAsyncWith = 52,
    EndAsyncFor = 54,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceModulo = 59,
    StoreSubscr = 60,
    DeleteSubscr = 61,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    GetIter = 68,
    GetYieldFromIter = 69,
    PrintExpr = 70,
    LoadBuildClass = 71,
    YieldFrom = 72,
    GetAwaitable = 73,
    LoadAssertionError = 74,
    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,
    ListToTuple = 82,
    ReturnValue = 83,
    ImportStar = 84,
    SetupAnnotations = 85,
    YieldValue = 86,
    PopBlock = 87,
    PopExcept = 89,
    StoreName = 90,
    DeleteName = 91,
    UnpackSequence = 92,
    ForIter = 93,
    UnpackEx = 94,
    StoreAttr = 95,
    DeleteAttr = 96,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    BuildSet = 104,
    BuildMap = 105,
    LoadAttr = 106,
    CompareOp = 107,
    ImportName = 108,
    ImportFrom = 109,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    IsOp = 117,
    ContainsOp = 118,
    JumpIfNotExcMatch = 121,
    SetupFinally = 122,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    BuildSlice = 133,
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    DeleteDeref = 138,
    CallFunctionKw = 141,
    CallFunctionEx = 142,
    SetupWith = 143,
    ExtendedArg = 144,
    ListAppend = 145,
    SetAdd = 146,
    MapAdd = 147,
    LoadClassderef = 148,
    SetupAsyncWith = 154,
    FormatValue = 155,
    BuildConstKeyMap = 156,
    BuildString = 157,
    LoadMethod = 160,
    CallMethod = 161,
    ListExtend = 162,
    SetUpdate = 163,
    DictMerge = 164,
    DictUpdate = 165,
}

/// How a jump opcode's argument is turned into a target instruction index.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JumpKind {
    /// Target is `arg / 2`.
    Absolute,
    /// Target is `index + 1 + arg / 2`, relative to the following instruction.
    Relative,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        self.into()
    }

    #[inline]
    pub fn has_arg(self) -> bool {
        u8::from(self) >= HAVE_ARGUMENT
    }

    pub fn jump_kind(self) -> Option<JumpKind> {
        match self {
            Self::JumpAbsolute
            | Self::PopJumpIfFalse
            | Self::PopJumpIfTrue
            | Self::JumpIfFalseOrPop
            | Self::JumpIfTrueOrPop
            | Self::JumpIfNotExcMatch => Some(JumpKind::Absolute),
            Self::JumpForward
            | Self::ForIter
            | Self::SetupFinally
            | Self::SetupWith
            | Self::SetupAsyncWith => Some(JumpKind::Relative),
            _ => None,
        }
    }

    /// Net effect on the operand stack, mirroring the interpreter's own semantics.
    ///
    /// `jump` selects the branch-taken effect for opcodes whose effect depends on it. Handler
    /// entry for `SETUP_FINALLY` pushes a traceback placeholder, the exception and its type.
    pub fn stack_effect(self, arg: u32, jump: bool) -> Option<i32> {
        let arg = arg as i32;
        let effect = match self {
            Self::Nop
            | Self::RotTwo
            | Self::RotThree
            | Self::RotFour
            | Self::UnaryPositive
            | Self::UnaryNegative
            | Self::UnaryNot
            | Self::UnaryInvert
            | Self::GetIter
            | Self::GetYieldFromIter
            | Self::LoadAttr
            | Self::JumpForward
            | Self::JumpAbsolute
            | Self::PopBlock
            | Self::DeleteName
            | Self::DeleteGlobal
            | Self::DeleteFast
            | Self::DeleteDeref
            | Self::ListToTuple
            | Self::SetupAnnotations
            | Self::YieldValue
            | Self::ExtendedArg => 0,
            Self::PopTop => -1,
            Self::DupTop => 1,
            Self::DupTopTwo => 2,
            Self::BinaryMatrixMultiply
            | Self::InplaceMatrixMultiply
            | Self::BinaryPower
            | Self::BinaryMultiply
            | Self::BinaryModulo
            | Self::BinaryAdd
            | Self::BinarySubtract
            | Self::BinarySubscr
            | Self::BinaryFloorDivide
            | Self::BinaryTrueDivide
            | Self::InplaceFloorDivide
            | Self::InplaceTrueDivide
            | Self::InplaceAdd
            | Self::InplaceSubtract
            | Self::InplaceMultiply
            | Self::InplaceModulo
            | Self::BinaryLshift
            | Self::BinaryRshift
            | Self::BinaryAnd
            | Self::BinaryXor
            | Self::BinaryOr
            | Self::InplacePower
            | Self::InplaceLshift
            | Self::InplaceRshift
            | Self::InplaceAnd
            | Self::InplaceXor
            | Self::InplaceOr => -1,
            Self::StoreSubscr => -3,
            Self::DeleteSubscr => -2,
            Self::PrintExpr => -1,
            Self::LoadBuildClass | Self::LoadAssertionError => 1,
            Self::ReturnValue | Self::ImportStar | Self::YieldFrom => -1,
            Self::Reraise | Self::PopExcept => -3,
            Self::WithExceptStart => 1,
            Self::ListAppend | Self::SetAdd => -1,
            Self::MapAdd => -2,
            Self::ListExtend | Self::SetUpdate | Self::DictMerge | Self::DictUpdate => -1,
            Self::StoreName | Self::StoreGlobal | Self::StoreFast | Self::StoreDeref => -1,
            Self::StoreAttr => -2,
            Self::DeleteAttr => -1,
            Self::UnpackSequence => arg - 1,
            Self::UnpackEx => (arg & 0xff) + (arg >> 8),
            Self::ForIter => {
                if jump {
                    -1
                } else {
                    1
                }
            }
            Self::LoadConst
            | Self::LoadName
            | Self::LoadGlobal
            | Self::LoadFast
            | Self::LoadClosure
            | Self::LoadDeref
            | Self::LoadClassderef
            | Self::LoadMethod => 1,
            Self::BuildTuple | Self::BuildList | Self::BuildSet | Self::BuildString => 1 - arg,
            Self::BuildMap => 1 - 2 * arg,
            Self::BuildConstKeyMap => -arg,
            Self::CompareOp | Self::IsOp | Self::ContainsOp => -1,
            Self::JumpIfNotExcMatch => -2,
            Self::ImportName => -1,
            Self::ImportFrom => 1,
            Self::JumpIfFalseOrPop | Self::JumpIfTrueOrPop => {
                if jump {
                    0
                } else {
                    -1
                }
            }
            Self::PopJumpIfFalse | Self::PopJumpIfTrue => -1,
            // a handler starts with the previous exception and the new one, three values each
            Self::SetupFinally => {
                if jump {
                    6
                } else {
                    0
                }
            }
            Self::SetupWith => {
                if jump {
                    6
                } else {
                    1
                }
            }
            Self::RaiseVarargs => -arg,
            Self::CallFunction => -arg,
            Self::CallMethod => -arg - 1,
            Self::CallFunctionKw => -arg - 1,
            Self::CallFunctionEx => -1 - (arg & 1),
            Self::MakeFunction => -1 - (arg & 0x0f).count_ones() as i32,
            Self::BuildSlice => {
                if arg == 3 {
                    -2
                } else {
                    -1
                }
            }
            Self::FormatValue => {
                if arg & 0x04 != 0 {
                    -1
                } else {
                    0
                }
            }
            Self::GetAiter
            | Self::GetAnext
            | Self::BeforeAsyncWith
            | Self::EndAsyncFor
            | Self::GetAwaitable
            | Self::SetupAsyncWith => return None,
        };
        Some(effect)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbering_matches_cpython() {
        assert_eq!(Opcode::try_from(100u8), Ok(Opcode::LoadConst));
        assert_eq!(u8::from(Opcode::ReturnValue), 83);
        assert_eq!(u8::from(Opcode::JumpIfNotExcMatch), 121);
        assert!(Opcode::try_from(0u8).is_err());
    }

    #[test]
    fn names_are_screaming_snake_case() {
        assert_eq!(Opcode::LoadConst.name(), "LOAD_CONST");
        assert_eq!(Opcode::JumpIfNotExcMatch.to_string(), "JUMP_IF_NOT_EXC_MATCH");
        assert_eq!(Opcode::LoadClassderef.name(), "LOAD_CLASSDEREF");
    }

    #[test]
    fn argument_threshold() {
        assert!(!Opcode::ReturnValue.has_arg());
        assert!(Opcode::StoreName.has_arg());
    }

    #[test]
    fn make_function_pops_one_per_flag() {
        assert_eq!(Opcode::MakeFunction.stack_effect(0, false), Some(-1));
        assert_eq!(Opcode::MakeFunction.stack_effect(0x09, false), Some(-3));
    }
}
