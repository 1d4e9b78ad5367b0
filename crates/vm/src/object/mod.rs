mod core;
mod payload;

pub(crate) use self::core::init_type_hierarchy;
pub use self::core::{PyObject, PyObjectRef, PyRef};
pub use self::payload::PyPayload;

/// The result of every operation that may raise a python exception.
pub type PyResult<T = PyObjectRef> = Result<T, crate::builtins::PyBaseExceptionRef>;
