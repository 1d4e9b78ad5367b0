//! Compiled code model consumed by the kython virtual machine: Python 3.9 wordcode,
//! code objects and the kyc container format produced by the external compiler.

pub mod builder;
pub mod bytecode;
pub mod kyc;
pub mod opcode;

pub use builder::{BuildError, CodeBuilder, Label};
pub use bytecode::{CodeFlags, CodeObject, ConstantData, DecodeError, Instruction};
pub use kyc::{KycError, KycFile, parse_kyc_file};
pub use opcode::{JumpKind, Opcode};
