use super::{
    PyInt, PyTypeRef,
    iter::PositionIterInternal,
    sequence::{self, SequenceIndex},
};
use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, VirtualMachine,
    function::FuncArgs,
    protocol::PyIterReturn,
    types::PyComparisonOp,
    vm::Context,
};
use core::{
    cell::{Ref, RefCell, RefMut},
    fmt,
};

/// Built-in mutable sequence.
///
/// The element vector is never borrowed while python code runs: operations that compare or
/// call back into the interpreter work on a snapshot.
#[derive(Default)]
pub struct PyList {
    elements: RefCell<Vec<PyObjectRef>>,
}

pub type PyListRef = PyRef<PyList>;

impl fmt::Debug for PyList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // avoid reentrancy on self-referencing lists
        f.write_str("list")
    }
}

impl From<Vec<PyObjectRef>> for PyList {
    fn from(elements: Vec<PyObjectRef>) -> Self {
        Self {
            elements: RefCell::new(elements),
        }
    }
}

impl PyPayload for PyList {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.list_type
    }
}

impl PyList {
    pub fn borrow_vec(&self) -> Ref<'_, Vec<PyObjectRef>> {
        self.elements.borrow()
    }

    pub fn borrow_vec_mut(&self) -> RefMut<'_, Vec<PyObjectRef>> {
        self.elements.borrow_mut()
    }

    /// A copy of the current elements.
    pub fn to_vec(&self) -> Vec<PyObjectRef> {
        self.elements.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.elements.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stable merge sort whose comparison may raise.
fn merge_sort<T: Clone>(
    items: &[T],
    lt: &mut impl FnMut(&T, &T) -> PyResult<bool>,
) -> PyResult<Vec<T>> {
    if items.len() <= 1 {
        return Ok(items.to_vec());
    }
    let (left, right) = items.split_at(items.len() / 2);
    let left = merge_sort(left, lt)?;
    let right = merge_sort(right, lt)?;
    let mut merged = Vec::with_capacity(items.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        // take from the right only when strictly smaller, which keeps equal items in order
        if lt(&right[j], &left[i])? {
            merged.push(right[j].clone());
            j += 1;
        } else {
            merged.push(left[i].clone());
            i += 1;
        }
    }
    merged.extend_from_slice(&left[i..]);
    merged.extend_from_slice(&right[j..]);
    Ok(merged)
}

/// Sorts `items` by `key(item)` (or the items themselves) using `<`, the way `list.sort` and
/// `sorted` do. `reverse` keeps equal items in their original order.
pub(crate) fn sort_objects(
    vm: &VirtualMachine,
    items: Vec<PyObjectRef>,
    key: Option<PyObjectRef>,
    reverse: bool,
) -> PyResult<Vec<PyObjectRef>> {
    let mut keyed = items
        .into_iter()
        .map(|item| {
            let k = match &key {
                Some(key) => vm.invoke(key, vec![item.clone()])?,
                None => item.clone(),
            };
            Ok((k, item))
        })
        .collect::<PyResult<Vec<_>>>()?;
    if reverse {
        keyed.reverse();
    }
    let mut sorted = merge_sort(&keyed, &mut |(a, _), (b, _)| {
        vm.rich_compare_bool(a, b, PyComparisonOp::Lt)
    })?;
    if reverse {
        sorted.reverse();
    }
    Ok(sorted.into_iter().map(|(_, item)| item).collect())
}

fn list_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("list.__new__", vm)?.try_into_value(vm)?;
    Ok(PyList::default().into_ref_with_type(vm, cls)?.into())
}

fn list_init(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("__init__", vm)?;
    let [iterable] = args.bind_optional::<1>("list", 0, vm)?;
    let elements = match iterable {
        Some(iterable) => vm.extract_elements(&iterable)?,
        None => vec![],
    };
    *zelf.borrow_vec_mut() = elements;
    Ok(vm.ctx.none())
}

fn list_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    let elements = zelf.to_vec();
    let repr = sequence::repr_elements(vm, zelf.as_object(), &elements, "[", "]", "[...]")?;
    Ok(vm.ctx.new_str(repr).into())
}

fn list_cmp(vm: &VirtualMachine, mut args: FuncArgs, op: PyComparisonOp) -> PyResult {
    let zelf = args.take_zelf::<PyList>(op.method_name(), vm)?;
    let [other] = args.bind(op.method_name(), vm)?;
    let Some(other) = other.payload::<PyList>() else {
        return Ok(vm.ctx.not_implemented());
    };
    let (a, b) = (zelf.to_vec(), other.to_vec());
    Ok(vm.ctx.new_bool(sequence::cmp_sequences(vm, &a, &b, op)?))
}

fn list_len(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("__len__", vm)?;
    args.bind::<0>("__len__", vm)?;
    Ok(vm.ctx.new_int(zelf.len()).into())
}

fn list_getitem(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("__getitem__", vm)?;
    let [needle] = args.bind("__getitem__", vm)?;
    match SequenceIndex::try_from_object(vm, needle, "list")? {
        SequenceIndex::Int(i) => {
            let elements = zelf.borrow_vec();
            sequence::wrap_index(i, elements.len())
                .map(|i| elements[i].clone())
                .ok_or_else(|| vm.new_index_error("list index out of range"))
        }
        SequenceIndex::Slice(slice) => {
            let elements = zelf.to_vec();
            let picked = sequence::slice_elements(&elements, &slice, vm)?;
            Ok(vm.ctx.new_list(picked).into())
        }
    }
}

fn list_setitem(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("__setitem__", vm)?;
    let [needle, value] = args.bind("__setitem__", vm)?;
    match SequenceIndex::try_from_object(vm, needle, "list")? {
        SequenceIndex::Int(i) => {
            let mut elements = zelf.borrow_vec_mut();
            let i = sequence::wrap_index(i, elements.len())
                .ok_or_else(|| vm.new_index_error("list assignment index out of range"))?;
            elements[i] = value;
        }
        SequenceIndex::Slice(slice) => {
            let items = if value.is(zelf.as_object()) {
                zelf.to_vec()
            } else {
                vm.extract_elements(&value)?
            };
            let indices = slice.to_indices(zelf.len(), vm)?;
            let mut elements = zelf.borrow_vec_mut();
            match indices.as_range() {
                Some(range) => {
                    elements.splice(range, items);
                }
                None => {
                    if items.len() != indices.len {
                        return Err(vm.new_value_error(format!(
                            "attempt to assign sequence of size {} to extended slice of size {}",
                            items.len(),
                            indices.len
                        )));
                    }
                    for (i, item) in indices.iter().zip(items) {
                        elements[i] = item;
                    }
                }
            }
        }
    }
    Ok(vm.ctx.none())
}

fn list_delitem(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("__delitem__", vm)?;
    let [needle] = args.bind("__delitem__", vm)?;
    match SequenceIndex::try_from_object(vm, needle, "list")? {
        SequenceIndex::Int(i) => {
            let mut elements = zelf.borrow_vec_mut();
            let i = sequence::wrap_index(i, elements.len())
                .ok_or_else(|| vm.new_index_error("list assignment index out of range"))?;
            elements.remove(i);
        }
        SequenceIndex::Slice(slice) => {
            let indices = slice.to_indices(zelf.len(), vm)?;
            let mut doomed: Vec<usize> = indices.iter().collect();
            doomed.sort_unstable();
            let mut elements = zelf.borrow_vec_mut();
            for i in doomed.into_iter().rev() {
                elements.remove(i);
            }
        }
    }
    Ok(vm.ctx.none())
}

fn list_contains(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("__contains__", vm)?;
    let [needle] = args.bind("__contains__", vm)?;
    for item in zelf.to_vec() {
        if vm.identical_or_equal(&item, &needle)? {
            return Ok(vm.ctx.new_bool(true));
        }
    }
    Ok(vm.ctx.new_bool(false))
}

fn list_add(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("__add__", vm)?;
    let [other] = args.bind("__add__", vm)?;
    let Some(other) = other.payload::<PyList>() else {
        return Err(vm.new_type_error(format!(
            "can only concatenate list (not \"{}\") to list",
            other.class().name()
        )));
    };
    let mut joined = zelf.to_vec();
    joined.extend(other.to_vec());
    Ok(vm.ctx.new_list(joined).into())
}

fn list_iadd(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("__iadd__", vm)?;
    let [other] = args.bind("__iadd__", vm)?;
    let items = vm.extract_elements(&other)?;
    zelf.borrow_vec_mut().extend(items);
    Ok(zelf.into())
}

fn list_mul(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("__mul__", vm)?;
    let [times] = args.bind("__mul__", vm)?;
    if !times.payload_is::<PyInt>() {
        return Ok(vm.ctx.not_implemented());
    }
    let times: isize = times.try_into_value(vm)?;
    let repeated = sequence::repeat(&zelf.to_vec(), times, vm)?;
    Ok(vm.ctx.new_list(repeated).into())
}

fn list_imul(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("__imul__", vm)?;
    let [times] = args.bind("__imul__", vm)?;
    if !times.payload_is::<PyInt>() {
        return Ok(vm.ctx.not_implemented());
    }
    let times: isize = times.try_into_value(vm)?;
    let repeated = sequence::repeat(&zelf.to_vec(), times, vm)?;
    *zelf.borrow_vec_mut() = repeated;
    Ok(zelf.into())
}

fn list_append(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("append", vm)?;
    let [item] = args.bind("append", vm)?;
    zelf.borrow_vec_mut().push(item);
    Ok(vm.ctx.none())
}

fn list_extend(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("extend", vm)?;
    let [iterable] = args.bind("extend", vm)?;
    let items = vm.extract_elements(&iterable)?;
    zelf.borrow_vec_mut().extend(items);
    Ok(vm.ctx.none())
}

fn list_pop(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("pop", vm)?;
    let [index] = args.bind_optional::<1>("pop", 0, vm)?;
    let index = match index {
        Some(index) => index.try_into_value::<isize>(vm)?,
        None => -1,
    };
    let mut elements = zelf.borrow_vec_mut();
    if elements.is_empty() {
        return Err(vm.new_index_error("pop from empty list"));
    }
    let i = sequence::wrap_index(index, elements.len())
        .ok_or_else(|| vm.new_index_error("pop index out of range"))?;
    Ok(elements.remove(i))
}

fn list_insert(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("insert", vm)?;
    let [index, item] = args.bind("insert", vm)?;
    let index: isize = index.try_into_value(vm)?;
    let mut elements = zelf.borrow_vec_mut();
    let len = elements.len() as isize;
    let at = if index < 0 {
        (index + len).max(0)
    } else {
        index.min(len)
    };
    elements.insert(at as usize, item);
    Ok(vm.ctx.none())
}

fn list_index(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("index", vm)?;
    let [needle, start, stop] = args.bind_optional::<3>("index", 1, vm)?;
    let needle = needle.unwrap_or_else(|| vm.ctx.none());
    let start = start.map(|i| i.try_into_value::<isize>(vm)).transpose()?;
    let stop = stop.map(|i| i.try_into_value::<isize>(vm)).transpose()?;
    match sequence::index_of(vm, &zelf.to_vec(), &needle, start, stop)? {
        Some(i) => Ok(vm.ctx.new_int(i).into()),
        None => Err(vm.new_value_error(format!("{} is not in list", needle.repr(vm)?.as_str()))),
    }
}

fn list_count(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("count", vm)?;
    let [needle] = args.bind("count", vm)?;
    Ok(vm
        .ctx
        .new_int(sequence::count_of(vm, &zelf.to_vec(), &needle)?)
        .into())
}

fn list_remove(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("remove", vm)?;
    let [needle] = args.bind("remove", vm)?;
    let elements = zelf.to_vec();
    let Some(i) = sequence::index_of(vm, &elements, &needle, None, None)? else {
        return Err(vm.new_value_error("list.remove(x): x not in list"));
    };
    let mut elements = zelf.borrow_vec_mut();
    if i < elements.len() {
        elements.remove(i);
    }
    Ok(vm.ctx.none())
}

fn list_clear(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("clear", vm)?;
    args.bind::<0>("clear", vm)?;
    zelf.borrow_vec_mut().clear();
    Ok(vm.ctx.none())
}

fn list_copy(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("copy", vm)?;
    args.bind::<0>("copy", vm)?;
    Ok(vm.ctx.new_list(zelf.to_vec()).into())
}

fn list_reverse(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("reverse", vm)?;
    args.bind::<0>("reverse", vm)?;
    zelf.borrow_vec_mut().reverse();
    Ok(vm.ctx.none())
}

fn list_sort(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("sort", vm)?;
    let key = args.take_keyword("key").and_then(|k| vm.option_if_none(k));
    let reverse = match args.take_keyword("reverse") {
        Some(reverse) => reverse.is_true(vm)?,
        None => false,
    };
    args.bind::<0>("sort", vm)?;
    let items = core::mem::take(&mut *zelf.borrow_vec_mut());
    let result = sort_objects(vm, items.clone(), key, reverse);
    let mut elements = zelf.borrow_vec_mut();
    let modified = !elements.is_empty();
    match result {
        Ok(sorted) => *elements = sorted,
        Err(err) => {
            *elements = items;
            return Err(err);
        }
    }
    if modified {
        return Err(vm.new_value_error("list modified during sort"));
    }
    Ok(vm.ctx.none())
}

fn list_iter(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyList>("__iter__", vm)?;
    args.bind::<0>("__iter__", vm)?;
    Ok(PyListIterator {
        internal: RefCell::new(PositionIterInternal::new(zelf, 0)),
    }
    .into_ref(&vm.ctx)
    .into())
}

#[derive(Debug)]
pub(crate) struct PyListIterator {
    internal: RefCell<PositionIterInternal<PyListRef>>,
}

impl PyPayload for PyListIterator {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.list_iterator_type
    }
}

fn list_iterator_next(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyListIterator>("__next__", vm)?;
    args.bind::<0>("__next__", vm)?;
    let ret = zelf.internal.borrow_mut().next(|list, position| {
        Ok(match list.borrow_vec().get(position) {
            Some(item) => PyIterReturn::Return(item.clone()),
            None => PyIterReturn::StopIteration(None),
        })
    })?;
    ret.into_pyresult(vm)
}

fn list_iterator_length_hint(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyListIterator>("__length_hint__", vm)?;
    args.bind::<0>("__length_hint__", vm)?;
    let hint = zelf.internal.borrow().length_hint(|list| list.len());
    Ok(vm.ctx.new_int(hint).into())
}

macro_rules! list_cmp_method {
    ($ctx:expr, $op:ident) => {
        $ctx.new_method(PyComparisonOp::$op.method_name(), |vm, args| {
            list_cmp(vm, args, PyComparisonOp::$op)
        })
    };
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.list_type, {
        "__new__" => ctx.new_staticmethod("__new__", list_new),
        "__init__" => ctx.new_method("__init__", list_init),
        "__repr__" => ctx.new_method("__repr__", list_repr),
        "__hash__" => ctx.none(),
        "__len__" => ctx.new_method("__len__", list_len),
        "__getitem__" => ctx.new_method("__getitem__", list_getitem),
        "__setitem__" => ctx.new_method("__setitem__", list_setitem),
        "__delitem__" => ctx.new_method("__delitem__", list_delitem),
        "__contains__" => ctx.new_method("__contains__", list_contains),
        "__iter__" => ctx.new_method("__iter__", list_iter),
        "__add__" => ctx.new_method("__add__", list_add),
        "__iadd__" => ctx.new_method("__iadd__", list_iadd),
        "__mul__" => ctx.new_method("__mul__", list_mul),
        "__rmul__" => ctx.new_method("__rmul__", list_mul),
        "__imul__" => ctx.new_method("__imul__", list_imul),
        "__eq__" => list_cmp_method!(ctx, Eq),
        "__ne__" => list_cmp_method!(ctx, Ne),
        "__lt__" => list_cmp_method!(ctx, Lt),
        "__le__" => list_cmp_method!(ctx, Le),
        "__gt__" => list_cmp_method!(ctx, Gt),
        "__ge__" => list_cmp_method!(ctx, Ge),
        "append" => ctx.new_method("append", list_append),
        "extend" => ctx.new_method("extend", list_extend),
        "pop" => ctx.new_method("pop", list_pop),
        "insert" => ctx.new_method("insert", list_insert),
        "index" => ctx.new_method("index", list_index),
        "count" => ctx.new_method("count", list_count),
        "remove" => ctx.new_method("remove", list_remove),
        "clear" => ctx.new_method("clear", list_clear),
        "copy" => ctx.new_method("copy", list_copy),
        "reverse" => ctx.new_method("reverse", list_reverse),
        "sort" => ctx.new_method("sort", list_sort),
    });
    extend_class!(ctx, &ctx.types.list_iterator_type, {
        "__iter__" => ctx.new_method("__iter__", super::iter::iter_self),
        "__next__" => ctx.new_method("__next__", list_iterator_next),
        "__length_hint__" => ctx.new_method("__length_hint__", list_iterator_length_hint),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sort_is_stable() {
        let pairs = [(2, 'a'), (1, 'b'), (2, 'c'), (1, 'd'), (0, 'e')];
        let sorted = merge_sort(&pairs, &mut |a, b| Ok(a.0 < b.0)).unwrap();
        let order: String = sorted.iter().map(|p| p.1).collect();
        assert_eq!(order, "ebdac");
    }
}
