use super::{PyTuple, PyTypeRef, sequence};
use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, VirtualMachine,
    dict_inner::{Dict, DictSize},
    function::FuncArgs,
    protocol::PyIterReturn,
    vm::Context,
};
use core::{cell::Cell, fmt};

/// Insertion-ordered hash map from hashable objects to objects.
#[derive(Default)]
pub struct PyDict {
    entries: Dict,
}

pub type PyDictRef = PyRef<PyDict>;

impl fmt::Debug for PyDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dict({} entries)", self.entries.len())
    }
}

impl PyPayload for PyDict {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.dict_type
    }
}

impl PyDict {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<PyObjectRef> {
        self.entries.keys()
    }

    pub fn values(&self) -> Vec<PyObjectRef> {
        self.entries.values()
    }

    pub fn items(&self) -> Vec<(PyObjectRef, PyObjectRef)> {
        self.entries.items()
    }

    pub fn contains_key(&self, key: &PyObjectRef, vm: &VirtualMachine) -> PyResult<bool> {
        self.entries.contains(vm, key)
    }

    /// Looks up `key` in the dict itself, ignoring `__missing__`.
    pub fn get_item_opt(&self, key: &PyObjectRef, vm: &VirtualMachine) -> PyResult<Option<PyObjectRef>> {
        self.entries.get(vm, key)
    }

    pub fn set_item(&self, key: &PyObjectRef, value: PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        self.entries.insert(vm, key, value)
    }

    pub fn del_item(&self, key: &PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        self.entries.delete(vm, key)
    }

    // str keys hash and compare without running python code, so these cannot fail

    pub fn get_item_str(&self, key: &str, vm: &VirtualMachine) -> Option<PyObjectRef> {
        self.entries.get(vm, key).ok().flatten()
    }

    pub fn set_item_str(&self, key: &str, value: PyObjectRef, vm: &VirtualMachine) {
        self.entries
            .insert(vm, key, value)
            .expect("inserting a str key never raises");
    }

    pub fn del_item_str(&self, key: &str, vm: &VirtualMachine) -> Option<PyObjectRef> {
        self.entries.pop(vm, key).ok().flatten()
    }

    pub fn clear(&self) {
        self.entries.clear()
    }

    pub(crate) fn size(&self) -> DictSize {
        self.entries.size()
    }

    /// `dict.update` semantics: another dict, an object with `keys()`, or an iterable of pairs.
    pub(crate) fn merge_object(&self, other: &PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        if let Some(other) = other.payload::<PyDict>() {
            for (key, value) in other.items() {
                self.set_item(&key, value, vm)?;
            }
            return Ok(());
        }
        if let Some(keys) = vm.get_attribute_opt(other, "keys")? {
            for key in vm.extract_elements(&vm.invoke(&keys, ())?)? {
                let value = other.get_item(&key, vm)?;
                self.set_item(&key, value, vm)?;
            }
            return Ok(());
        }
        for (i, pair) in vm.extract_elements(other)?.into_iter().enumerate() {
            let pair = vm.extract_elements(&pair).map_err(|_| {
                vm.new_type_error(format!(
                    "cannot convert dictionary update sequence element #{i} to a sequence"
                ))
            })?;
            let [key, value] = <[PyObjectRef; 2]>::try_from(pair).map_err(|pair| {
                vm.new_value_error(format!(
                    "dictionary update sequence element #{i} has length {}; 2 is required",
                    pair.len()
                ))
            })?;
            self.set_item(&key, value, vm)?;
        }
        Ok(())
    }

    pub(crate) fn merge_kwargs(&self, kwargs: indexmap::IndexMap<String, PyObjectRef>, vm: &VirtualMachine) {
        for (key, value) in kwargs {
            self.set_item_str(&key, value, vm);
        }
    }

    fn copy(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

fn dict_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("dict.__new__", vm)?.try_into_value(vm)?;
    Ok(PyDict::default().into_ref_with_type(vm, cls)?.into())
}

fn dict_init(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("__init__", vm)?;
    let kwargs = core::mem::take(&mut args.kwargs);
    let [other] = args.bind_optional::<1>("dict", 0, vm)?;
    if let Some(other) = other {
        zelf.merge_object(&other, vm)?;
    }
    zelf.merge_kwargs(kwargs, vm);
    Ok(vm.ctx.none())
}

fn dict_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    let repr = vm.with_repr_guard(zelf.as_object(), "{...}", || {
        let mut parts = Vec::with_capacity(zelf.len());
        for (key, value) in zelf.items() {
            parts.push(format!(
                "{}: {}",
                key.repr(vm)?.as_str(),
                value.repr(vm)?.as_str()
            ));
        }
        Ok(format!("{{{}}}", parts.join(", ")))
    })?;
    Ok(vm.ctx.new_str(repr).into())
}

fn dict_len(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("__len__", vm)?;
    args.bind::<0>("__len__", vm)?;
    Ok(vm.ctx.new_int(zelf.len()).into())
}

fn dict_getitem(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("__getitem__", vm)?;
    let [key] = args.bind("__getitem__", vm)?;
    if let Some(value) = zelf.get_item_opt(&key, vm)? {
        return Ok(value);
    }
    if !zelf.class().is(&vm.ctx.types.dict_type) {
        if let Some(missing) = zelf.class().get_attr("__missing__") {
            return vm.call_with_self(&missing, zelf.into(), vec![key].into());
        }
    }
    Err(vm.new_key_error(key))
}

fn dict_setitem(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("__setitem__", vm)?;
    let [key, value] = args.bind("__setitem__", vm)?;
    zelf.set_item(&key, value, vm)?;
    Ok(vm.ctx.none())
}

fn dict_delitem(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("__delitem__", vm)?;
    let [key] = args.bind("__delitem__", vm)?;
    zelf.del_item(&key, vm)?;
    Ok(vm.ctx.none())
}

fn dict_contains(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("__contains__", vm)?;
    let [key] = args.bind("__contains__", vm)?;
    Ok(vm.ctx.new_bool(zelf.contains_key(&key, vm)?))
}

/// Two dicts are equal when they have the same keys mapped to equal values.
fn dict_equal(vm: &VirtualMachine, a: &PyDict, b: &PyDict) -> PyResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (key, value) in a.items() {
        match b.get_item_opt(&key, vm)? {
            Some(other) if vm.identical_or_equal(&value, &other)? => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

fn dict_eq(vm: &VirtualMachine, mut args: FuncArgs, negate: bool) -> PyResult {
    let name = if negate { "__ne__" } else { "__eq__" };
    let zelf = args.take_zelf::<PyDict>(name, vm)?;
    let [other] = args.bind(name, vm)?;
    match other.payload::<PyDict>() {
        Some(other) => Ok(vm.ctx.new_bool(dict_equal(vm, &zelf, other)? != negate)),
        None => Ok(vm.ctx.not_implemented()),
    }
}

fn dict_or(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("__or__", vm)?;
    let [other] = args.bind("__or__", vm)?;
    if !other.payload_is::<PyDict>() {
        return Ok(vm.ctx.not_implemented());
    }
    let merged = zelf.copy().into_ref(&vm.ctx);
    merged.merge_object(&other, vm)?;
    Ok(merged.into())
}

fn dict_ror(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("__ror__", vm)?;
    let [other] = args.bind("__ror__", vm)?;
    let Some(other) = other.payload::<PyDict>() else {
        return Ok(vm.ctx.not_implemented());
    };
    let merged = other.copy().into_ref(&vm.ctx);
    merged.merge_object(zelf.as_object(), vm)?;
    Ok(merged.into())
}

fn dict_ior(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("__ior__", vm)?;
    let [other] = args.bind("__ior__", vm)?;
    zelf.merge_object(&other, vm)?;
    Ok(zelf.into())
}

fn dict_get(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("get", vm)?;
    let [key, default] = args.bind_optional::<2>("get", 1, vm)?;
    let key = key.unwrap_or_else(|| vm.ctx.none());
    Ok(zelf
        .get_item_opt(&key, vm)?
        .or(default)
        .unwrap_or_else(|| vm.ctx.none()))
}

fn dict_setdefault(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("setdefault", vm)?;
    let [key, default] = args.bind_optional::<2>("setdefault", 1, vm)?;
    let key = key.unwrap_or_else(|| vm.ctx.none());
    if let Some(value) = zelf.get_item_opt(&key, vm)? {
        return Ok(value);
    }
    let default = default.unwrap_or_else(|| vm.ctx.none());
    zelf.set_item(&key, default.clone(), vm)?;
    Ok(default)
}

fn dict_pop(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("pop", vm)?;
    let [key, default] = args.bind_optional::<2>("pop", 1, vm)?;
    let key = key.unwrap_or_else(|| vm.ctx.none());
    match zelf.entries.pop(vm, &key)? {
        Some(value) => Ok(value),
        None => default.ok_or_else(|| vm.new_key_error(key)),
    }
}

fn dict_popitem(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("popitem", vm)?;
    args.bind::<0>("popitem", vm)?;
    let (key, value) = zelf.entries.pop_back().ok_or_else(|| {
        vm.new_key_error(vm.ctx.new_str("popitem(): dictionary is empty").into())
    })?;
    Ok(vm.ctx.new_tuple(vec![key, value]).into())
}

fn dict_update(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("update", vm)?;
    let kwargs = core::mem::take(&mut args.kwargs);
    let [other] = args.bind_optional::<1>("update", 0, vm)?;
    if let Some(other) = other {
        zelf.merge_object(&other, vm)?;
    }
    zelf.merge_kwargs(kwargs, vm);
    Ok(vm.ctx.none())
}

fn dict_copy(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("copy", vm)?;
    args.bind::<0>("copy", vm)?;
    Ok(zelf.copy().into_ref(&vm.ctx).into())
}

fn dict_clear(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("clear", vm)?;
    args.bind::<0>("clear", vm)?;
    zelf.clear();
    Ok(vm.ctx.none())
}

fn dict_fromkeys(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("fromkeys", vm)?.try_into_value(vm)?;
    let [iterable, value] = args.bind_optional::<2>("fromkeys", 1, vm)?;
    let iterable = iterable.unwrap_or_else(|| vm.ctx.none());
    let value = value.unwrap_or_else(|| vm.ctx.none());
    let dict = cls.call(FuncArgs::default(), vm)?;
    let target = dict
        .payload::<PyDict>()
        .ok_or_else(|| vm.new_type_error("fromkeys() requires a dict subclass"))?;
    for key in vm.extract_elements(&iterable)? {
        target.set_item(&key, value.clone(), vm)?;
    }
    Ok(dict)
}

/// The object a view or iterator yields for one entry.
fn project(kind: DictViewKind, key: PyObjectRef, value: PyObjectRef, vm: &VirtualMachine) -> PyObjectRef {
    match kind {
        DictViewKind::Keys => key,
        DictViewKind::Values => value,
        DictViewKind::Items => vm.ctx.new_tuple(vec![key, value]).into(),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DictViewKind {
    Keys,
    Values,
    Items,
}

/// Iteration state over a dict that fails once the dict changes size.
#[derive(Debug)]
struct DictIterState {
    dict: PyDictRef,
    size: DictSize,
    position: Cell<usize>,
    exhausted: Cell<bool>,
}

impl DictIterState {
    fn new(dict: PyDictRef) -> Self {
        let size = dict.size();
        Self {
            dict,
            size,
            position: Cell::new(0),
            exhausted: Cell::new(false),
        }
    }

    fn next(&self, kind: DictViewKind, vm: &VirtualMachine) -> PyResult<PyIterReturn> {
        if self.exhausted.get() {
            return Ok(PyIterReturn::StopIteration(None));
        }
        if self.dict.entries.has_changed_size(&self.size) {
            self.exhausted.set(true);
            return Err(vm.new_runtime_error("dictionary changed size during iteration"));
        }
        let mut position = self.position.get();
        let next = self.dict.entries.next_entry(&mut position);
        self.position.set(position);
        Ok(match next {
            Some((key, value)) => PyIterReturn::Return(project(kind, key, value, vm)),
            None => {
                self.exhausted.set(true);
                PyIterReturn::StopIteration(None)
            }
        })
    }

    fn length_hint(&self) -> usize {
        if self.exhausted.get() {
            0
        } else {
            self.dict.len().saturating_sub(self.position.get())
        }
    }
}

macro_rules! dict_view {
    ($view:ident, $iterator:ident, $kind:ident, $view_type:ident, $iter_type:ident, $name:literal) => {
        #[derive(Debug)]
        pub(crate) struct $view {
            dict: PyDictRef,
        }

        impl PyPayload for $view {
            fn class(ctx: &Context) -> &PyTypeRef {
                &ctx.types.$view_type
            }
        }

        #[derive(Debug)]
        pub(crate) struct $iterator {
            state: DictIterState,
        }

        impl PyPayload for $iterator {
            fn class(ctx: &Context) -> &PyTypeRef {
                &ctx.types.$iter_type
            }
        }

        impl $view {
            const KIND: DictViewKind = DictViewKind::$kind;

            fn view_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
                let dict = args.take_zelf::<PyDict>($name, vm)?;
                args.bind::<0>($name, vm)?;
                Ok(Self { dict }.into_ref(&vm.ctx).into())
            }

            fn len(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
                let zelf = args.take_zelf::<Self>("__len__", vm)?;
                args.bind::<0>("__len__", vm)?;
                Ok(vm.ctx.new_int(zelf.dict.len()).into())
            }

            fn iter(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
                let zelf = args.take_zelf::<Self>("__iter__", vm)?;
                args.bind::<0>("__iter__", vm)?;
                Ok($iterator {
                    state: DictIterState::new(zelf.dict.clone()),
                }
                .into_ref(&vm.ctx)
                .into())
            }

            fn repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
                let zelf = args.take_zelf::<Self>("__repr__", vm)?;
                args.bind::<0>("__repr__", vm)?;
                let items: Vec<_> = zelf
                    .dict
                    .items()
                    .into_iter()
                    .map(|(k, v)| project(Self::KIND, k, v, vm))
                    .collect();
                let open = concat!($name, "([");
                let placeholder = concat!($name, "(...)");
                let repr = sequence::repr_elements(vm, zelf.as_object(), &items, open, "])", placeholder)?;
                Ok(vm.ctx.new_str(repr).into())
            }
        }

        impl $iterator {
            fn next(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
                let zelf = args.take_zelf::<Self>("__next__", vm)?;
                args.bind::<0>("__next__", vm)?;
                zelf.state.next($view::KIND, vm)?.into_pyresult(vm)
            }

            fn length_hint(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
                let zelf = args.take_zelf::<Self>("__length_hint__", vm)?;
                args.bind::<0>("__length_hint__", vm)?;
                Ok(vm.ctx.new_int(zelf.state.length_hint()).into())
            }
        }
    };
}

dict_view!(PyDictKeys, PyDictKeyIterator, Keys, dict_keys_type, dict_keyiterator_type, "dict_keys");
dict_view!(PyDictValues, PyDictValueIterator, Values, dict_values_type, dict_valueiterator_type, "dict_values");
dict_view!(PyDictItems, PyDictItemIterator, Items, dict_items_type, dict_itemiterator_type, "dict_items");

fn dict_iter(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDict>("__iter__", vm)?;
    args.bind::<0>("__iter__", vm)?;
    Ok(PyDictKeyIterator {
        state: DictIterState::new(zelf),
    }
    .into_ref(&vm.ctx)
    .into())
}

fn keys_contains(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDictKeys>("__contains__", vm)?;
    let [key] = args.bind("__contains__", vm)?;
    Ok(vm.ctx.new_bool(zelf.dict.contains_key(&key, vm)?))
}

fn values_contains(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDictValues>("__contains__", vm)?;
    let [needle] = args.bind("__contains__", vm)?;
    for value in zelf.dict.values() {
        if vm.identical_or_equal(&value, &needle)? {
            return Ok(vm.ctx.new_bool(true));
        }
    }
    Ok(vm.ctx.new_bool(false))
}

fn items_contains(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyDictItems>("__contains__", vm)?;
    let [pair] = args.bind("__contains__", vm)?;
    let Some(pair) = pair.payload::<PyTuple>() else {
        return Ok(vm.ctx.new_bool(false));
    };
    let [key, value] = pair.as_slice() else {
        return Ok(vm.ctx.new_bool(false));
    };
    let found = match zelf.dict.get_item_opt(key, vm)? {
        Some(stored) => vm.identical_or_equal(&stored, value)?,
        None => false,
    };
    Ok(vm.ctx.new_bool(found))
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.dict_type, {
        "__new__" => ctx.new_staticmethod("__new__", dict_new),
        "__init__" => ctx.new_method("__init__", dict_init),
        "__repr__" => ctx.new_method("__repr__", dict_repr),
        "__hash__" => ctx.none(),
        "__len__" => ctx.new_method("__len__", dict_len),
        "__getitem__" => ctx.new_method("__getitem__", dict_getitem),
        "__setitem__" => ctx.new_method("__setitem__", dict_setitem),
        "__delitem__" => ctx.new_method("__delitem__", dict_delitem),
        "__contains__" => ctx.new_method("__contains__", dict_contains),
        "__iter__" => ctx.new_method("__iter__", dict_iter),
        "__eq__" => ctx.new_method("__eq__", |vm, args| dict_eq(vm, args, false)),
        "__ne__" => ctx.new_method("__ne__", |vm, args| dict_eq(vm, args, true)),
        "__or__" => ctx.new_method("__or__", dict_or),
        "__ror__" => ctx.new_method("__ror__", dict_ror),
        "__ior__" => ctx.new_method("__ior__", dict_ior),
        "get" => ctx.new_method("get", dict_get),
        "setdefault" => ctx.new_method("setdefault", dict_setdefault),
        "pop" => ctx.new_method("pop", dict_pop),
        "popitem" => ctx.new_method("popitem", dict_popitem),
        "update" => ctx.new_method("update", dict_update),
        "copy" => ctx.new_method("copy", dict_copy),
        "clear" => ctx.new_method("clear", dict_clear),
        "fromkeys" => ctx.new_classmethod("fromkeys", dict_fromkeys),
        "keys" => ctx.new_method("keys", PyDictKeys::view_new),
        "values" => ctx.new_method("values", PyDictValues::view_new),
        "items" => ctx.new_method("items", PyDictItems::view_new),
    });
    macro_rules! init_view {
        ($view:ident, $iterator:ident, $view_type:ident, $iter_type:ident, $contains:expr) => {
            extend_class!(ctx, &ctx.types.$view_type, {
                "__len__" => ctx.new_method("__len__", $view::len),
                "__iter__" => ctx.new_method("__iter__", $view::iter),
                "__repr__" => ctx.new_method("__repr__", $view::repr),
                "__contains__" => ctx.new_method("__contains__", $contains),
            });
            extend_class!(ctx, &ctx.types.$iter_type, {
                "__iter__" => ctx.new_method("__iter__", super::iter::iter_self),
                "__next__" => ctx.new_method("__next__", $iterator::next),
                "__length_hint__" => ctx.new_method("__length_hint__", $iterator::length_hint),
            });
        };
    }
    init_view!(PyDictKeys, PyDictKeyIterator, dict_keys_type, dict_keyiterator_type, keys_contains);
    init_view!(PyDictValues, PyDictValueIterator, dict_values_type, dict_valueiterator_type, values_contains);
    init_view!(PyDictItems, PyDictItemIterator, dict_items_type, dict_itemiterator_type, items_contains);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Interpreter;

    #[test]
    fn str_helpers_see_str_keys() {
        Interpreter::new(Default::default()).enter(|vm| {
            let dict = vm.ctx.new_dict();
            dict.set_item_str("a", vm.ctx.new_int(1).into(), vm);
            let key: PyObjectRef = vm.ctx.new_str("a").into();
            assert!(dict.contains_key(&key, vm).unwrap());
            assert!(dict.get_item_str("b", vm).is_none());
            assert!(dict.del_item_str("a", vm).is_some());
            assert!(dict.is_empty());
        })
    }

    #[test]
    fn iteration_notices_resize() {
        Interpreter::new(Default::default()).enter(|vm| {
            let dict = vm.ctx.new_dict();
            dict.set_item_str("a", vm.ctx.none(), vm);
            let state = DictIterState::new(dict.clone());
            dict.set_item_str("b", vm.ctx.none(), vm);
            let err = state.next(DictViewKind::Keys, vm).unwrap_err();
            assert!(err.class().is(&vm.ctx.exceptions.runtime_error));
        })
    }
}
