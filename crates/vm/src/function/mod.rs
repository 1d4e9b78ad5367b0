//! Calling conventions: the arguments of a call and how they bind to parameters.

mod argument;
mod signature;

pub use argument::{ArgumentError, FuncArgs, IntoFuncArgs};
pub use signature::{BoundArgs, Parameter, ParameterKind, Signature};
