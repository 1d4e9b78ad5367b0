/*
 * Builtin set type with a sequence of unique items.
 */

use super::{PyTypeRef, sequence};
use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, VirtualMachine,
    dict_inner::{Dict, DictSize},
    function::FuncArgs,
    hash::{self, PyHash},
    protocol::PyIterReturn,
    types::PyComparisonOp,
    vm::Context,
};
use core::{cell::Cell, fmt};

type SetContentType = Dict<()>;

#[derive(Default)]
pub struct PySet {
    inner: PySetInner,
}

#[derive(Default)]
pub struct PyFrozenSet {
    inner: PySetInner,
}

impl fmt::Debug for PySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "set({} items)", self.inner.len())
    }
}

impl fmt::Debug for PyFrozenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frozenset({} items)", self.inner.len())
    }
}

impl PyPayload for PySet {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.set_type
    }
}

impl PyPayload for PyFrozenSet {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.frozenset_type
    }
}

impl PySet {
    pub fn add(&self, item: PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        self.inner.add(item, vm)
    }

    pub fn update(&self, iterable: &PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        self.inner.update(iterable, vm)
    }

    pub fn elements(&self) -> Vec<PyObjectRef> {
        self.inner.elements()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

impl PyFrozenSet {
    /// Builds a frozenset from already evaluated items, as constant folding produces them.
    pub fn from_elements(elements: Vec<PyObjectRef>, vm: &VirtualMachine) -> PyResult<PyRef<Self>> {
        let inner = PySetInner::from_elements(elements, vm)?;
        Ok(Self { inner }.into_ref(&vm.ctx))
    }

    pub fn elements(&self) -> Vec<PyObjectRef> {
        self.inner.elements()
    }
}

/// The hash table behind both `set` and `frozenset`.
#[derive(Default)]
pub(super) struct PySetInner {
    content: SetContentType,
}

impl PySetInner {
    fn from_iterable(iterable: &PyObjectRef, vm: &VirtualMachine) -> PyResult<Self> {
        let set = Self::default();
        set.update(iterable, vm)?;
        Ok(set)
    }

    fn from_elements(elements: Vec<PyObjectRef>, vm: &VirtualMachine) -> PyResult<Self> {
        let set = Self::default();
        for item in elements {
            set.add(item, vm)?;
        }
        Ok(set)
    }

    fn len(&self) -> usize {
        self.content.len()
    }

    fn copy(&self) -> Self {
        Self {
            content: self.content.clone(),
        }
    }

    fn elements(&self) -> Vec<PyObjectRef> {
        self.content.keys()
    }

    fn contains(&self, needle: &PyObjectRef, vm: &VirtualMachine) -> PyResult<bool> {
        self.content.contains(vm, needle)
    }

    fn add(&self, item: PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        self.content.insert(vm, &item, ())
    }

    fn update(&self, iterable: &PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        // a set's own elements are already hashed; iterating it would also trip the size check
        let items = match extract_set(iterable) {
            Some(other) => other.elements(),
            None => vm.extract_elements(iterable)?,
        };
        for item in items {
            self.add(item, vm)?;
        }
        Ok(())
    }

    fn discard(&self, item: &PyObjectRef, vm: &VirtualMachine) -> PyResult<bool> {
        Ok(self.content.pop(vm, item)?.is_some())
    }

    fn issubset(&self, other: &Self, vm: &VirtualMachine) -> PyResult<bool> {
        if self.len() > other.len() {
            return Ok(false);
        }
        for item in self.elements() {
            if !other.contains(&item, vm)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn compare(&self, other: &Self, op: PyComparisonOp, vm: &VirtualMachine) -> PyResult<bool> {
        Ok(match op {
            PyComparisonOp::Eq => self.len() == other.len() && self.issubset(other, vm)?,
            PyComparisonOp::Ne => !(self.len() == other.len() && self.issubset(other, vm)?),
            PyComparisonOp::Le => self.issubset(other, vm)?,
            PyComparisonOp::Lt => self.len() < other.len() && self.issubset(other, vm)?,
            PyComparisonOp::Ge => other.issubset(self, vm)?,
            PyComparisonOp::Gt => self.len() > other.len() && other.issubset(self, vm)?,
        })
    }

    fn union(&self, other: &Self, vm: &VirtualMachine) -> PyResult<Self> {
        let set = self.copy();
        for item in other.elements() {
            set.add(item, vm)?;
        }
        Ok(set)
    }

    fn intersection(&self, other: &Self, vm: &VirtualMachine) -> PyResult<Self> {
        let set = Self::default();
        for item in self.elements() {
            if other.contains(&item, vm)? {
                set.add(item, vm)?;
            }
        }
        Ok(set)
    }

    fn difference(&self, other: &Self, vm: &VirtualMachine) -> PyResult<Self> {
        let set = Self::default();
        for item in self.elements() {
            if !other.contains(&item, vm)? {
                set.add(item, vm)?;
            }
        }
        Ok(set)
    }

    fn symmetric_difference(&self, other: &Self, vm: &VirtualMachine) -> PyResult<Self> {
        let set = self.difference(other, vm)?;
        for item in other.elements() {
            if !self.contains(&item, vm)? {
                set.add(item, vm)?;
            }
        }
        Ok(set)
    }

    fn hash(&self) -> PyHash {
        hash::hash_unordered(self.content.hashes())
    }

    fn repr(&self, zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<String> {
        let class_name = zelf.class().name().to_owned();
        let elements = self.elements();
        if elements.is_empty() {
            return Ok(format!("{class_name}()"));
        }
        let placeholder = format!("{class_name}(...)");
        let body = sequence::repr_elements(vm, zelf, &elements, "{", "}", &placeholder)?;
        Ok(if zelf.class().is(&vm.ctx.types.set_type) {
            body
        } else {
            format!("{class_name}({body})")
        })
    }
}

fn extract_set(obj: &PyObjectRef) -> Option<&PySetInner> {
    if let Some(set) = obj.payload::<PySet>() {
        Some(&set.inner)
    } else {
        obj.payload::<PyFrozenSet>().map(|set| &set.inner)
    }
}

/// Wraps `inner` in an object of the same builtin kind as `zelf`.
fn new_like(zelf: &PyObjectRef, inner: PySetInner, vm: &VirtualMachine) -> PyObjectRef {
    if zelf.payload_is::<PyFrozenSet>() {
        PyFrozenSet { inner }.into_ref(&vm.ctx).into()
    } else {
        PySet { inner }.into_ref(&vm.ctx).into()
    }
}

fn take_set_zelf(args: &mut FuncArgs, name: &str, vm: &VirtualMachine) -> PyResult<PyObjectRef> {
    let zelf = args.take_first(name, vm)?;
    if extract_set(&zelf).is_none() {
        return Err(vm.new_type_error(format!(
            "descriptor '{name}' requires a 'set' object but received a '{}'",
            zelf.class().name()
        )));
    }
    Ok(zelf)
}

/// Runs `f` on the inner tables of `zelf` and `other`; `other` may be any iterable when
/// `any_iterable` is set, otherwise it must be a set and anything else is `NotImplemented`.
fn with_other<F>(
    vm: &VirtualMachine,
    mut args: FuncArgs,
    name: &str,
    any_iterable: bool,
    f: F,
) -> PyResult
where
    F: FnOnce(&PyObjectRef, &PySetInner, &PySetInner) -> PyResult,
{
    let zelf = take_set_zelf(&mut args, name, vm)?;
    let [other] = args.bind(name, vm)?;
    let zelf_inner = extract_set(&zelf).ok_or_else(|| vm.new_type_error("expected a set"))?;
    match extract_set(&other) {
        Some(other_inner) => f(&zelf, zelf_inner, other_inner),
        None if any_iterable => {
            let other_inner = PySetInner::from_iterable(&other, vm)?;
            f(&zelf, zelf_inner, &other_inner)
        }
        None => Ok(vm.ctx.not_implemented()),
    }
}

macro_rules! set_binop {
    ($fn_name:ident, $method:literal, $op:ident, $any:expr) => {
        fn $fn_name(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
            with_other(vm, args, $method, $any, |zelf, a, b| {
                Ok(new_like(zelf, a.$op(b, vm)?, vm))
            })
        }
    };
}

set_binop!(set_or, "__or__", union, false);
set_binop!(set_and, "__and__", intersection, false);
set_binop!(set_sub, "__sub__", difference, false);
set_binop!(set_xor, "__xor__", symmetric_difference, false);
set_binop!(set_union, "union", union, true);
set_binop!(set_intersection, "intersection", intersection, true);
set_binop!(set_difference, "difference", difference, true);
set_binop!(set_symmetric_difference, "symmetric_difference", symmetric_difference, true);

fn set_rsub(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    with_other(vm, args, "__rsub__", false, |zelf, a, b| {
        Ok(new_like(zelf, b.difference(a, vm)?, vm))
    })
}

fn set_issubset(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    with_other(vm, args, "issubset", true, |_, a, b| {
        Ok(vm.ctx.new_bool(a.issubset(b, vm)?))
    })
}

fn set_issuperset(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    with_other(vm, args, "issuperset", true, |_, a, b| {
        Ok(vm.ctx.new_bool(b.issubset(a, vm)?))
    })
}

fn set_isdisjoint(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    with_other(vm, args, "isdisjoint", true, |_, a, b| {
        Ok(vm.ctx.new_bool(a.intersection(b, vm)?.len() == 0))
    })
}

fn set_cmp(vm: &VirtualMachine, args: FuncArgs, op: PyComparisonOp) -> PyResult {
    with_other(vm, args, op.method_name(), false, |_, a, b| {
        Ok(vm.ctx.new_bool(a.compare(b, op, vm)?))
    })
}

fn set_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("set.__new__", vm)?.try_into_value(vm)?;
    Ok(PySet::default().into_ref_with_type(vm, cls)?.into())
}

fn set_init(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySet>("__init__", vm)?;
    let [iterable] = args.bind_optional::<1>("set", 0, vm)?;
    zelf.inner.content.clear();
    if let Some(iterable) = iterable {
        zelf.inner.update(&iterable, vm)?;
    }
    Ok(vm.ctx.none())
}

fn frozenset_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("frozenset.__new__", vm)?.try_into_value(vm)?;
    let [iterable] = args.bind_optional::<1>("frozenset", 0, vm)?;
    let exact = cls.is(&vm.ctx.types.frozenset_type);
    if let Some(iterable) = &iterable {
        if exact && iterable.class().is(&vm.ctx.types.frozenset_type) {
            return Ok(iterable.clone());
        }
    }
    let inner = match iterable {
        Some(iterable) => PySetInner::from_iterable(&iterable, vm)?,
        None => PySetInner::default(),
    };
    Ok(PyFrozenSet { inner }.into_ref_with_type(vm, cls)?.into())
}

fn set_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = take_set_zelf(&mut args, "__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    let inner = extract_set(&zelf).ok_or_else(|| vm.new_type_error("expected a set"))?;
    Ok(vm.ctx.new_str(inner.repr(&zelf, vm)?).into())
}

fn set_len(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = take_set_zelf(&mut args, "__len__", vm)?;
    args.bind::<0>("__len__", vm)?;
    let len = extract_set(&zelf).map_or(0, PySetInner::len);
    Ok(vm.ctx.new_int(len).into())
}

fn set_contains(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = take_set_zelf(&mut args, "__contains__", vm)?;
    let [needle] = args.bind("__contains__", vm)?;
    let inner = extract_set(&zelf).ok_or_else(|| vm.new_type_error("expected a set"))?;
    // a set looks for itself as a frozenset, since a set is unhashable
    let found = match needle.payload::<PySet>() {
        Some(set) => {
            let frozen: PyObjectRef = PyFrozenSet {
                inner: set.inner.copy(),
            }
            .into_ref(&vm.ctx)
            .into();
            inner.contains(&frozen, vm)?
        }
        None => inner.contains(&needle, vm)?,
    };
    Ok(vm.ctx.new_bool(found))
}

fn set_copy(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = take_set_zelf(&mut args, "copy", vm)?;
    args.bind::<0>("copy", vm)?;
    let inner = extract_set(&zelf).ok_or_else(|| vm.new_type_error("expected a set"))?;
    if zelf.class().is(&vm.ctx.types.frozenset_type) {
        return Ok(zelf.clone());
    }
    Ok(new_like(&zelf, inner.copy(), vm))
}

fn frozenset_hash(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyFrozenSet>("__hash__", vm)?;
    args.bind::<0>("__hash__", vm)?;
    Ok(vm.ctx.new_int(zelf.inner.hash()).into())
}

fn set_add(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySet>("add", vm)?;
    let [item] = args.bind("add", vm)?;
    zelf.add(item, vm)?;
    Ok(vm.ctx.none())
}

fn set_discard(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySet>("discard", vm)?;
    let [item] = args.bind("discard", vm)?;
    zelf.inner.discard(&item, vm)?;
    Ok(vm.ctx.none())
}

fn set_remove(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySet>("remove", vm)?;
    let [item] = args.bind("remove", vm)?;
    if zelf.inner.discard(&item, vm)? {
        Ok(vm.ctx.none())
    } else {
        Err(vm.new_key_error(item))
    }
}

fn set_update(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySet>("update", vm)?;
    args.check_kwargs_empty("update", vm)?;
    for iterable in args.args {
        zelf.update(&iterable, vm)?;
    }
    Ok(vm.ctx.none())
}

fn set_pop(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySet>("pop", vm)?;
    args.bind::<0>("pop", vm)?;
    match zelf.inner.content.pop_back() {
        Some((item, ())) => Ok(item),
        None => Err(vm.new_key_error(vm.ctx.new_str("pop from an empty set").into())),
    }
}

fn set_clear(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySet>("clear", vm)?;
    args.bind::<0>("clear", vm)?;
    zelf.inner.content.clear();
    Ok(vm.ctx.none())
}

/// In-place `|=`, `&=`, `-=`, `^=`: the result replaces the set's content.
fn set_inplace(
    vm: &VirtualMachine,
    mut args: FuncArgs,
    name: &str,
    op: fn(&PySetInner, &PySetInner, &VirtualMachine) -> PyResult<PySetInner>,
) -> PyResult {
    let zelf = args.take_zelf::<PySet>(name, vm)?;
    let [other] = args.bind(name, vm)?;
    let Some(other) = extract_set(&other) else {
        return Ok(vm.ctx.not_implemented());
    };
    let result = op(&zelf.inner, other, vm)?;
    zelf.inner.content.clear();
    for item in result.elements() {
        zelf.inner.add(item, vm)?;
    }
    Ok(zelf.into())
}

fn set_iter(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = take_set_zelf(&mut args, "__iter__", vm)?;
    args.bind::<0>("__iter__", vm)?;
    let size = extract_set(&zelf)
        .map(|inner| inner.content.size())
        .ok_or_else(|| vm.new_type_error("expected a set"))?;
    Ok(PySetIterator {
        set: zelf,
        size,
        position: Cell::new(0),
        exhausted: Cell::new(false),
    }
    .into_ref(&vm.ctx)
    .into())
}

#[derive(Debug)]
pub(crate) struct PySetIterator {
    set: PyObjectRef,
    size: DictSize,
    position: Cell<usize>,
    exhausted: Cell<bool>,
}

impl PyPayload for PySetIterator {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.set_iterator_type
    }
}

fn set_iterator_next(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySetIterator>("__next__", vm)?;
    args.bind::<0>("__next__", vm)?;
    let inner = extract_set(&zelf.set).ok_or_else(|| vm.new_type_error("expected a set"))?;
    if zelf.exhausted.get() {
        return PyIterReturn::StopIteration(None).into_pyresult(vm);
    }
    if inner.content.has_changed_size(&zelf.size) {
        zelf.exhausted.set(true);
        return Err(vm.new_runtime_error("Set changed size during iteration"));
    }
    let mut position = zelf.position.get();
    let next = inner.content.next_entry(&mut position);
    zelf.position.set(position);
    match next {
        Some((item, ())) => Ok(item),
        None => {
            zelf.exhausted.set(true);
            PyIterReturn::StopIteration(None).into_pyresult(vm)
        }
    }
}

fn set_iterator_length_hint(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PySetIterator>("__length_hint__", vm)?;
    args.bind::<0>("__length_hint__", vm)?;
    let len = match extract_set(&zelf.set) {
        Some(inner) if !zelf.exhausted.get() => inner.len().saturating_sub(zelf.position.get()),
        _ => 0,
    };
    Ok(vm.ctx.new_int(len).into())
}

macro_rules! set_cmp_method {
    ($ctx:expr, $op:ident) => {
        $ctx.new_method(PyComparisonOp::$op.method_name(), |vm, args| {
            set_cmp(vm, args, PyComparisonOp::$op)
        })
    };
}

pub(crate) fn init(ctx: &Context) {
    for typ in [&ctx.types.set_type, &ctx.types.frozenset_type] {
        extend_class!(ctx, typ, {
            "__repr__" => ctx.new_method("__repr__", set_repr),
            "__len__" => ctx.new_method("__len__", set_len),
            "__contains__" => ctx.new_method("__contains__", set_contains),
            "__iter__" => ctx.new_method("__iter__", set_iter),
            "__or__" => ctx.new_method("__or__", set_or),
            "__ror__" => ctx.new_method("__ror__", set_or),
            "__and__" => ctx.new_method("__and__", set_and),
            "__rand__" => ctx.new_method("__rand__", set_and),
            "__sub__" => ctx.new_method("__sub__", set_sub),
            "__rsub__" => ctx.new_method("__rsub__", set_rsub),
            "__xor__" => ctx.new_method("__xor__", set_xor),
            "__rxor__" => ctx.new_method("__rxor__", set_xor),
            "__eq__" => set_cmp_method!(ctx, Eq),
            "__ne__" => set_cmp_method!(ctx, Ne),
            "__lt__" => set_cmp_method!(ctx, Lt),
            "__le__" => set_cmp_method!(ctx, Le),
            "__gt__" => set_cmp_method!(ctx, Gt),
            "__ge__" => set_cmp_method!(ctx, Ge),
            "copy" => ctx.new_method("copy", set_copy),
            "union" => ctx.new_method("union", set_union),
            "intersection" => ctx.new_method("intersection", set_intersection),
            "difference" => ctx.new_method("difference", set_difference),
            "symmetric_difference" => ctx.new_method("symmetric_difference", set_symmetric_difference),
            "issubset" => ctx.new_method("issubset", set_issubset),
            "issuperset" => ctx.new_method("issuperset", set_issuperset),
            "isdisjoint" => ctx.new_method("isdisjoint", set_isdisjoint),
        });
    }
    extend_class!(ctx, &ctx.types.set_type, {
        "__new__" => ctx.new_staticmethod("__new__", set_new),
        "__init__" => ctx.new_method("__init__", set_init),
        "__hash__" => ctx.none(),
        "__ior__" => ctx.new_method("__ior__", |vm, args| set_inplace(vm, args, "__ior__", PySetInner::union)),
        "__iand__" => ctx.new_method("__iand__", |vm, args| set_inplace(vm, args, "__iand__", PySetInner::intersection)),
        "__isub__" => ctx.new_method("__isub__", |vm, args| set_inplace(vm, args, "__isub__", PySetInner::difference)),
        "__ixor__" => ctx.new_method("__ixor__", |vm, args| set_inplace(vm, args, "__ixor__", PySetInner::symmetric_difference)),
        "add" => ctx.new_method("add", set_add),
        "discard" => ctx.new_method("discard", set_discard),
        "remove" => ctx.new_method("remove", set_remove),
        "update" => ctx.new_method("update", set_update),
        "pop" => ctx.new_method("pop", set_pop),
        "clear" => ctx.new_method("clear", set_clear),
    });
    extend_class!(ctx, &ctx.types.frozenset_type, {
        "__new__" => ctx.new_staticmethod("__new__", frozenset_new),
        "__hash__" => ctx.new_method("__hash__", frozenset_hash),
    });
    extend_class!(ctx, &ctx.types.set_iterator_type, {
        "__iter__" => ctx.new_method("__iter__", super::iter::iter_self),
        "__next__" => ctx.new_method("__next__", set_iterator_next),
        "__length_hint__" => ctx.new_method("__length_hint__", set_iterator_length_hint),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Interpreter;

    #[test]
    fn subset_ordering() {
        Interpreter::new(Default::default()).enter(|vm| {
            let ints = |xs: &[i32]| {
                PySetInner::from_elements(xs.iter().map(|&x| vm.ctx.new_int(x).into()).collect(), vm)
                    .unwrap()
            };
            let small = ints(&[1, 2]);
            let big = ints(&[1, 2, 3]);
            assert!(small.compare(&big, PyComparisonOp::Lt, vm).unwrap());
            assert!(!big.compare(&small, PyComparisonOp::Le, vm).unwrap());
            assert!(small.compare(&ints(&[2, 1]), PyComparisonOp::Eq, vm).unwrap());
            assert_eq!(small.hash(), ints(&[2, 1]).hash());
        })
    }
}
