//! Indexing, slicing and comparison shared by `str`, `bytes`, `tuple`, `list` and `range`.

use super::{PyInt, PySlice};
use crate::{PyObjectRef, PyRef, PyResult, VirtualMachine, types::PyComparisonOp};
use num_traits::{Signed, ToPrimitive};

/// A subscript of a sequence: a single position or a slice.
pub(crate) enum SequenceIndex {
    Int(isize),
    Slice(PyRef<PySlice>),
}

impl SequenceIndex {
    /// Interprets `obj` as an index into a sequence named `owner` in error messages.
    pub(crate) fn try_from_object(
        vm: &VirtualMachine,
        obj: PyObjectRef,
        owner: &str,
    ) -> PyResult<Self> {
        if let Some(int) = obj.payload::<PyInt>() {
            return Ok(Self::Int(clamp_isize(int.as_bigint())));
        }
        match obj.downcast::<PySlice>() {
            Ok(slice) => Ok(Self::Slice(slice)),
            Err(obj) => {
                if let Some(index) = vm.get_special_method(&obj, "__index__")? {
                    let int: PyRef<PyInt> = vm.invoke(&index, ())?.try_into_value(vm)?;
                    return Ok(Self::Int(clamp_isize(int.as_bigint())));
                }
                Err(vm.new_type_error(format!(
                    "{owner} indices must be integers or slices, not {}",
                    obj.class().name()
                )))
            }
        }
    }
}

fn clamp_isize(value: &malachite_bigint::BigInt) -> isize {
    value.to_isize().unwrap_or(if value.is_negative() {
        isize::MIN
    } else {
        isize::MAX
    })
}

/// Resolves a possibly negative position against `len`; `None` when out of range.
pub(crate) fn wrap_index(index: isize, len: usize) -> Option<usize> {
    let resolved = if index < 0 {
        index.checked_add(len as isize)?
    } else {
        index
    };
    (0..len as isize).contains(&resolved).then_some(resolved as usize)
}

/// The positions a slice selects in a sequence of a given length.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct SliceIndices {
    pub(crate) start: isize,
    pub(crate) stop: isize,
    pub(crate) step: isize,
    /// Number of selected positions.
    pub(crate) len: usize,
}

impl SliceIndices {
    /// Clamps `start` and `stop` to the sequence the way CPython does, with `None` bounds
    /// meaning "from the start" and "to the end" in the direction of `step`.
    pub(crate) fn new(start: Option<isize>, stop: Option<isize>, step: isize, len: usize) -> Self {
        let len_i = len as isize;
        let backwards = step < 0;
        let adjust = |bound: Option<isize>, default: isize| match bound {
            None => default,
            Some(i) if i < 0 => {
                let i = i.saturating_add(len_i);
                if i < 0 {
                    if backwards { -1 } else { 0 }
                } else {
                    i
                }
            }
            Some(i) if i >= len_i => {
                if backwards {
                    len_i - 1
                } else {
                    len_i
                }
            }
            Some(i) => i,
        };
        let start = adjust(start, if backwards { len_i - 1 } else { 0 });
        let stop = adjust(stop, if backwards { -1 } else { len_i });
        let count = if backwards {
            if stop < start {
                (start - stop - 1) / -step + 1
            } else {
                0
            }
        } else if start < stop {
            (stop - start - 1) / step + 1
        } else {
            0
        };
        Self {
            start,
            stop,
            step,
            len: count as usize,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + use<> {
        let Self { start, step, len, .. } = *self;
        (0..len).map(move |i| (start + i as isize * step) as usize)
    }

    /// A contiguous forward slice, which can be spliced in place.
    pub(crate) fn as_range(&self) -> Option<core::ops::Range<usize>> {
        (self.step == 1).then(|| {
            let start = self.start as usize;
            start..start + self.len
        })
    }
}

/// Picks the elements a slice selects.
pub(crate) fn slice_elements<T: Clone>(
    items: &[T],
    slice: &PySlice,
    vm: &VirtualMachine,
) -> PyResult<Vec<T>> {
    let indices = slice.to_indices(items.len(), vm)?;
    Ok(indices.iter().map(|i| items[i].clone()).collect())
}

/// Lexicographic comparison of two sequences: the first pair that is not equal decides,
/// otherwise the lengths do.
pub(crate) fn cmp_sequences(
    vm: &VirtualMachine,
    a: &[PyObjectRef],
    b: &[PyObjectRef],
    op: PyComparisonOp,
) -> PyResult<bool> {
    if matches!(op, PyComparisonOp::Eq | PyComparisonOp::Ne) && a.len() != b.len() {
        return Ok(op == PyComparisonOp::Ne);
    }
    for (x, y) in a.iter().zip(b) {
        if vm.identical_or_equal(x, y)? {
            continue;
        }
        return match op {
            PyComparisonOp::Eq => Ok(false),
            PyComparisonOp::Ne => Ok(true),
            _ => vm.rich_compare_bool(x, y, op),
        };
    }
    Ok(op.eval_ord(a.len().cmp(&b.len())))
}

/// `seq * n`, with negative counts giving an empty sequence.
pub(crate) fn repeat<T: Clone>(items: &[T], times: isize, vm: &VirtualMachine) -> PyResult<Vec<T>> {
    let times = times.max(0) as usize;
    let total = items
        .len()
        .checked_mul(times)
        .filter(|&n| n <= isize::MAX as usize / 8)
        .ok_or_else(|| vm.new_overflow_error("repeated sequence is too long"))?;
    let mut out = Vec::with_capacity(total);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    Ok(out)
}

/// Position of the first element equal to `needle` in `items[start..stop]`.
pub(crate) fn index_of(
    vm: &VirtualMachine,
    items: &[PyObjectRef],
    needle: &PyObjectRef,
    start: Option<isize>,
    stop: Option<isize>,
) -> PyResult<Option<usize>> {
    let indices = SliceIndices::new(start, stop, 1, items.len());
    for i in indices.iter() {
        if vm.identical_or_equal(&items[i], needle)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

pub(crate) fn count_of(
    vm: &VirtualMachine,
    items: &[PyObjectRef],
    needle: &PyObjectRef,
) -> PyResult<usize> {
    let mut count = 0;
    for item in items {
        if vm.identical_or_equal(item, needle)? {
            count += 1;
        }
    }
    Ok(count)
}

/// Joins element reprs between `open` and `close`, guarding against self-reference.
pub(crate) fn repr_elements(
    vm: &VirtualMachine,
    owner: &PyObjectRef,
    items: &[PyObjectRef],
    open: &str,
    close: &str,
    placeholder: &str,
) -> PyResult<String> {
    vm.with_repr_guard(owner, placeholder, || {
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            parts.push(item.repr(vm)?.as_str().to_owned());
        }
        Ok(format!("{open}{}{close}", parts.join(", ")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selected(start: Option<isize>, stop: Option<isize>, step: isize, len: usize) -> Vec<usize> {
        SliceIndices::new(start, stop, step, len).iter().collect()
    }

    #[test]
    fn slices_clamp_like_python() {
        assert_eq!(selected(None, None, 1, 4), [0, 1, 2, 3]);
        assert_eq!(selected(Some(1), Some(-1), 1, 4), [1, 2]);
        assert_eq!(selected(None, None, -1, 4), [3, 2, 1, 0]);
        assert_eq!(selected(Some(-10), Some(10), 2, 5), [0, 2, 4]);
        assert_eq!(selected(Some(3), Some(1), 1, 5), Vec::<usize>::new());
        assert_eq!(selected(Some(10), None, -2, 5), [4, 2, 0]);
    }

    #[test]
    fn negative_positions_wrap_once() {
        assert_eq!(wrap_index(-1, 3), Some(2));
        assert_eq!(wrap_index(3, 3), None);
        assert_eq!(wrap_index(-4, 3), None);
        assert_eq!(wrap_index(0, 0), None);
    }
}
