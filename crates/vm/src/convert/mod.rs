//! Conversions between rust values and python objects.

mod to_pyobject;
mod try_from;

pub use to_pyobject::ToPyObject;
pub use try_from::TryFromObject;
