//! This crate contains most of the python logic.
//!
//! - Interpreter and thread coordination: [`Interpreter`], [`vm::thread`]
//! - Object model: [`object`], [`builtins::PyType`]
//! - Signature binding: [`function`]
//! - Dispatch loop, block-stack unwinding and closures: [`frame`]
//! - Generator suspension: [`coroutine`]
//! - Exceptions and traceback rendering: [`exceptions`]
//! - The builtins namespace: [`stdlib`]

#[macro_use]
extern crate log;

#[macro_use]
pub mod macros;

pub mod builtins;
pub mod convert;
pub mod coroutine;
mod dict_inner;
pub mod exceptions;
pub mod fatal;
pub mod frame;
pub mod function;
pub mod hash;
pub mod import;
pub mod object;
pub mod protocol;
pub mod scope;
pub mod stdlib;
pub mod types;
pub mod vm;

pub use self::convert::{ToPyObject, TryFromObject};
pub use self::fatal::InvariantViolation;
pub use self::object::{PyObject, PyObjectRef, PyPayload, PyRef, PyResult};
pub use self::vm::{Context, Interpreter, Settings, VirtualMachine};

pub use kython_bytecode as bytecode;
