mod iter;
mod number;
mod object;

pub use iter::{PyIter, PyIterIter, PyIterReturn};
pub use number::PyNumberBinaryOp;
