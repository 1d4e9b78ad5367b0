//! Builtin function definitions.
//!
//! Implements the list of [builtin Python functions](https://docs.python.org/3/library/builtins.html)
//! the interpreter supports, plus the builtin types and the exception hierarchy.

use crate::{
    PyObjectRef, PyRef, PyResult, ToPyObject, VirtualMachine,
    builtins::{
        PyFunction, PyModule, PyStr, PyStrRef, PyType, PyTypeRef, list::sort_objects,
    },
    function::FuncArgs,
    protocol::{PyIter, PyIterReturn},
    types::PyComparisonOp,
};
use std::io::Write;

fn attr_name(obj: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyStrRef> {
    obj.clone().downcast::<PyStr>().map_err(|obj| {
        vm.new_type_error(format!(
            "attribute name must be string, not '{}'",
            obj.class().name()
        ))
    })
}

fn builtin_abs(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [x] = args.bind("abs", vm)?;
    x.abs(vm)
}

fn builtin_all(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [iterable] = args.bind("all", vm)?;
    for item in iterable.get_iter(vm)?.into_iter(vm) {
        if !item?.is_true(vm)? {
            return Ok(vm.ctx.new_bool(false));
        }
    }
    Ok(vm.ctx.new_bool(true))
}

fn builtin_any(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [iterable] = args.bind("any", vm)?;
    for item in iterable.get_iter(vm)?.into_iter(vm) {
        if item?.is_true(vm)? {
            return Ok(vm.ctx.new_bool(true));
        }
    }
    Ok(vm.ctx.new_bool(false))
}

fn builtin_callable(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj] = args.bind("callable", vm)?;
    Ok(vm.ctx.new_bool(vm.is_callable(&obj)))
}

fn builtin_chr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [i] = args.bind("chr", vm)?;
    let i: i64 = i.try_into_value(vm)?;
    let c = u32::try_from(i)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| vm.new_value_error("chr() arg not in range(0x110000)"))?;
    Ok(vm.ctx.new_str(c).into())
}

fn builtin_ord(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [s] = args.bind("ord", vm)?;
    let s = s.downcast::<PyStr>().map_err(|obj| {
        vm.new_type_error(format!(
            "ord() expected string of length 1, but {} found",
            obj.class().name()
        ))
    })?;
    let mut chars = s.as_str().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(vm.ctx.new_int(c as u32).into()),
        _ => Err(vm.new_type_error(format!(
            "ord() expected a character, but string of length {} found",
            s.char_len()
        ))),
    }
}

fn builtin_delattr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj, name] = args.bind("delattr", vm)?;
    let name = attr_name(&name, vm)?;
    obj.del_attr(name.as_str(), vm)?;
    Ok(vm.ctx.none())
}

fn builtin_dir(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj] = args.bind_optional("dir", 0, vm)?;
    let names = match obj {
        Some(obj) => vm.extract_elements(&vm.call_special_method(&obj, "__dir__", ())?)?,
        None => match vm.current_frame() {
            Some(frame) => frame.locals(vm)?.keys(),
            None => vec![],
        },
    };
    let sorted = sort_objects(vm, names, None, false)?;
    Ok(vm.ctx.new_list(sorted).into())
}

fn builtin_getattr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj, name, default] = args.bind_optional("getattr", 2, vm)?;
    let (Some(obj), Some(name)) = (obj, name) else {
        unreachable!("bind_optional fills the required arguments")
    };
    let name = attr_name(&name, vm)?;
    match default {
        None => obj.get_attr(name.as_str(), vm),
        Some(default) => Ok(vm
            .get_attribute_opt(&obj, name.as_str())?
            .unwrap_or(default)),
    }
}

fn builtin_setattr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj, name, value] = args.bind("setattr", vm)?;
    let name = attr_name(&name, vm)?;
    obj.set_attr(name.as_str(), value, vm)?;
    Ok(vm.ctx.none())
}

fn builtin_hasattr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj, name] = args.bind("hasattr", vm)?;
    let name = attr_name(&name, vm)?;
    Ok(vm.ctx.new_bool(obj.has_attr(name.as_str(), vm)?))
}

fn builtin_globals(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    args.bind::<0>("globals", vm)?;
    match vm.current_globals() {
        Some(globals) => Ok(globals.into()),
        None => Err(vm.new_system_error("globals(): no current frame")),
    }
}

fn builtin_locals(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    args.bind::<0>("locals", vm)?;
    match vm.current_frame() {
        Some(frame) => Ok(frame.locals(vm)?.into()),
        None => Err(vm.new_system_error("locals(): no current frame")),
    }
}

fn builtin_hash(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj] = args.bind("hash", vm)?;
    Ok(obj.hash(vm)?.to_pyobject(vm))
}

fn builtin_id(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj] = args.bind("id", vm)?;
    Ok(obj.get_id().to_pyobject(vm))
}

fn builtin_isinstance(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj, typ] = args.bind("isinstance", vm)?;
    Ok(vm.ctx.new_bool(obj.is_instance(&typ, vm)?))
}

fn builtin_issubclass(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [subclass, typ] = args.bind("issubclass", vm)?;
    Ok(vm.ctx.new_bool(subclass.is_subclass(&typ, vm)?))
}

fn builtin_iter(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [iterable] = args.bind("iter", vm)?;
    Ok(iterable.get_iter(vm)?.into_object())
}

fn builtin_next(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [iterator, default] = args.bind_optional("next", 1, vm)?;
    let Some(iterator) = iterator else {
        unreachable!("bind_optional fills the required arguments")
    };
    if !PyIter::check(&iterator) {
        return Err(vm.new_type_error(format!(
            "'{}' object is not an iterator",
            iterator.class().name()
        )));
    }
    match PyIter::new(iterator).next(vm)? {
        PyIterReturn::Return(obj) => Ok(obj),
        PyIterReturn::StopIteration(value) => match default {
            Some(default) => Ok(default),
            None => Err(vm.new_stop_iteration(value)),
        },
    }
}

fn builtin_len(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj] = args.bind("len", vm)?;
    Ok(obj.length(vm)?.to_pyobject(vm))
}

fn min_or_max(
    vm: &VirtualMachine,
    mut args: FuncArgs,
    func_name: &str,
    op: PyComparisonOp,
) -> PyResult {
    let key = args.take_keyword("key").filter(|key| !vm.is_none(key));
    let default = args.take_keyword("default");
    args.check_kwargs_empty(func_name, vm)?;
    let candidates = match args.args.len() {
        0 => {
            return Err(vm.new_type_error(format!(
                "{func_name} expected at least 1 argument, got 0"
            )));
        }
        1 => vm.extract_elements(&args.args[0])?,
        _ if default.is_some() => {
            return Err(vm.new_type_error(format!(
                "Cannot specify a default for {func_name}() with multiple positional arguments"
            )));
        }
        _ => args.args,
    };

    let mut best: Option<(PyObjectRef, PyObjectRef)> = None;
    for item in candidates {
        let item_key = match &key {
            Some(key) => vm.invoke(key, vec![item.clone()])?,
            None => item.clone(),
        };
        best = match best {
            Some((ref best_key, _)) if !vm.rich_compare_bool(&item_key, best_key, op)? => best,
            _ => Some((item_key, item)),
        };
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(vm.new_value_error(format!(
            "{func_name}() arg is an empty sequence"
        ))),
    }
}

fn builtin_max(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    min_or_max(vm, args, "max", PyComparisonOp::Gt)
}

fn builtin_min(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    min_or_max(vm, args, "min", PyComparisonOp::Lt)
}

fn builtin_print(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let mut text_option = |name: &str, default: &str| -> PyResult<String> {
        match args.take_keyword(name) {
            Some(value) if !vm.is_none(&value) => match value.payload::<PyStr>() {
                Some(s) => Ok(s.as_str().to_owned()),
                None => Err(vm.new_type_error(format!(
                    "{name} must be None or a string, not {}",
                    value.class().name()
                ))),
            },
            _ => Ok(default.to_owned()),
        }
    };
    let sep = text_option("sep", " ")?;
    let end = text_option("end", "\n")?;
    let file = args
        .take_keyword("file")
        .filter(|file| !vm.is_none(file));
    let _flush = args.take_keyword("flush");
    args.check_kwargs_empty("print", vm)?;

    let mut line = String::new();
    for (i, object) in args.args.iter().enumerate() {
        if i > 0 {
            line.push_str(&sep);
        }
        line.push_str(object.str(vm)?.as_str());
    }
    line.push_str(&end);

    let file = match file {
        Some(file) => Some(file),
        None => vm
            .sys_module
            .dict()
            .get_item_str("stdout", vm)
            .filter(|stdout| !vm.is_none(stdout)),
    };
    match file {
        Some(file) => {
            vm.call_method(&file, "write", vec![vm.ctx.new_str(line).into()])?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(line.as_bytes())
                .and_then(|()| stdout.flush())
                .map_err(|err| vm.new_runtime_error(format!("print: {err}")))?;
        }
    }
    Ok(vm.ctx.none())
}

fn builtin_repr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj] = args.bind("repr", vm)?;
    Ok(obj.repr(vm)?.into())
}

fn builtin_sorted(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let key = args.take_keyword("key").filter(|key| !vm.is_none(key));
    let reverse = match args.take_keyword("reverse") {
        Some(reverse) => reverse.is_true(vm)?,
        None => false,
    };
    let [iterable] = args.bind("sorted", vm)?;
    let items = vm.extract_elements(&iterable)?;
    let sorted = sort_objects(vm, items, key, reverse)?;
    Ok(vm.ctx.new_list(sorted).into())
}

fn builtin_sum(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let start_kw = args.take_keyword("start");
    let [iterable, start] = args.bind_optional("sum", 1, vm)?;
    let Some(iterable) = iterable else {
        unreachable!("bind_optional fills the required arguments")
    };
    let mut sum = match start.or(start_kw) {
        Some(start) if start.payload_is::<PyStr>() => {
            return Err(vm.new_type_error(
                "sum() can't sum strings [use ''.join(seq) instead]",
            ));
        }
        Some(start) => start,
        None => vm.ctx.new_int(0).into(),
    };
    for item in iterable.get_iter(vm)?.into_iter(vm) {
        sum = vm._add(&sum, &item?)?;
    }
    Ok(sum)
}

/// `__build_class__(func, name, *bases, metaclass=None, **kwds)`: runs the class body `func`
/// on a fresh namespace and hands it to the metaclass.
fn builtin_build_class(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let function = args
        .take_first("__build_class__", vm)?
        .downcast::<PyFunction>()
        .map_err(|_| vm.new_type_error("__build_class__: func must be a function"))?;
    let name = args
        .take_first("__build_class__", vm)?
        .downcast::<PyStr>()
        .map_err(|_| vm.new_type_error("__build_class__: name is not a string"))?;
    let explicit_meta = args.take_keyword("metaclass");
    args.check_kwargs_empty("__build_class__", vm)?;

    let bases = args
        .args
        .into_iter()
        .map(|base| {
            base.downcast::<PyType>().map_err(|base| {
                vm.new_type_error(format!(
                    "bases must be types, not {}",
                    base.class().name()
                ))
            })
        })
        .collect::<PyResult<Vec<PyTypeRef>>>()?;

    let metaclass = match explicit_meta {
        Some(meta) => meta,
        None => most_derived_metaclass(&bases, vm)?.into(),
    };
    trace!("building class {} with {} bases", name.as_str(), bases.len());

    let namespace = vm.ctx.new_dict();
    function.invoke_with_locals(FuncArgs::default(), Some(namespace.clone()), vm)?;

    let bases: Vec<PyObjectRef> = bases.into_iter().map(Into::into).collect();
    vm.invoke(
        &metaclass,
        vec![
            name.into(),
            vm.ctx.new_tuple(bases).into(),
            namespace.into(),
        ],
    )
}

fn most_derived_metaclass(bases: &[PyTypeRef], vm: &VirtualMachine) -> PyResult<PyTypeRef> {
    let mut winner = vm.ctx.types.type_type.clone();
    for base in bases {
        let meta = base.class();
        if meta.fast_issubclass(&winner) {
            winner = meta.clone();
        } else if !winner.fast_issubclass(meta) {
            return Err(vm.new_type_error(
                "metaclass conflict: the metaclass of a derived class must be a (non-strict) \
                 subclass of the metaclasses of all its bases",
            ));
        }
    }
    Ok(winner)
}

pub fn init_module(vm: &VirtualMachine, module: &PyRef<PyModule>) {
    let ctx = &vm.ctx;
    let dict = module.dict();

    let functions: [(&'static str, crate::builtins::NativeFn); 31] = [
        ("__build_class__", builtin_build_class),
        ("abs", builtin_abs),
        ("all", builtin_all),
        ("any", builtin_any),
        ("callable", builtin_callable),
        ("chr", builtin_chr),
        ("delattr", builtin_delattr),
        ("dir", builtin_dir),
        ("getattr", builtin_getattr),
        ("globals", builtin_globals),
        ("hasattr", builtin_hasattr),
        ("hash", builtin_hash),
        ("id", builtin_id),
        ("isinstance", builtin_isinstance),
        ("issubclass", builtin_issubclass),
        ("iter", builtin_iter),
        ("len", builtin_len),
        ("locals", builtin_locals),
        ("max", builtin_max),
        ("min", builtin_min),
        ("next", builtin_next),
        ("ord", builtin_ord),
        ("print", builtin_print),
        ("repr", builtin_repr),
        ("setattr", builtin_setattr),
        ("sorted", builtin_sorted),
        ("sum", builtin_sum),
        ("__import__", builtin_import),
        ("format", builtin_format),
        ("ascii", builtin_ascii),
        ("divmod", builtin_divmod),
    ];
    for (name, f) in functions {
        dict.set_item_str(name, ctx.new_function(name, f).into(), vm);
    }

    let types = &ctx.types;
    for (name, typ) in [
        ("object", &types.object_type),
        ("type", &types.type_type),
        ("int", &types.int_type),
        ("bool", &types.bool_type),
        ("float", &types.float_type),
        ("complex", &types.complex_type),
        ("str", &types.str_type),
        ("bytes", &types.bytes_type),
        ("tuple", &types.tuple_type),
        ("list", &types.list_type),
        ("dict", &types.dict_type),
        ("set", &types.set_type),
        ("frozenset", &types.frozenset_type),
        ("range", &types.range_type),
        ("slice", &types.slice_type),
        ("enumerate", &types.enumerate_type),
        ("zip", &types.zip_type),
        ("reversed", &types.reverse_iter_type),
        ("property", &types.property_type),
        ("classmethod", &types.classmethod_type),
        ("staticmethod", &types.staticmethod_type),
        ("super", &types.super_type),
    ] {
        dict.set_item_str(name, typ.clone().into(), vm);
    }
    for exc in ctx.exceptions.iter() {
        dict.set_item_str(exc.name(), exc.clone().into(), vm);
    }

    dict.set_item_str("None", ctx.none(), vm);
    dict.set_item_str("True", ctx.new_bool(true), vm);
    dict.set_item_str("False", ctx.new_bool(false), vm);
    dict.set_item_str("NotImplemented", ctx.not_implemented(), vm);
    dict.set_item_str("Ellipsis", ctx.ellipsis(), vm);
    dict.set_item_str("__debug__", ctx.new_bool(true), vm);
}

/// `__import__(name, globals=None, locals=None, fromlist=(), level=0)`; only already loaded
/// modules are found.
fn builtin_import(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    for keyword in ["globals", "locals", "fromlist", "level"] {
        args.take_keyword(keyword);
    }
    let [name, ..] = args.bind_optional::<5>("__import__", 1, vm)?;
    let Some(name) = name else {
        unreachable!("bind_optional fills the required arguments")
    };
    let name: String = name.try_into_value(vm)?;
    vm.import(&name)
}

fn builtin_format(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [value, spec] = args.bind_optional("format", 1, vm)?;
    let Some(value) = value else {
        unreachable!("bind_optional fills the required arguments")
    };
    let spec = match spec {
        Some(spec) => spec
            .downcast::<PyStr>()
            .map_err(|_| vm.new_type_error("format() argument 2 must be str"))?,
        None => vm.ctx.empty_str.clone(),
    };
    Ok(value.format(&spec, vm)?.into())
}

fn builtin_ascii(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj] = args.bind("ascii", vm)?;
    Ok(vm.ctx.new_str(obj.ascii(vm)?).into())
}

fn builtin_divmod(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [a, b] = args.bind("divmod", vm)?;
    let quotient = vm._floordiv(&a, &b)?;
    let remainder = vm._mod(&a, &b)?;
    Ok(vm.ctx.new_tuple(vec![quotient, remainder]).into())
}

#[cfg(test)]
mod tests {
    use crate::{Interpreter, PyObjectRef, builtins::PyStr};

    fn call(vm: &crate::VirtualMachine, name: &str, args: Vec<PyObjectRef>) -> crate::PyResult {
        let func = vm.builtins.dict().get_item_str(name, vm).unwrap();
        vm.invoke(&func, args)
    }

    #[test]
    fn exception_types_are_builtins() {
        Interpreter::new(Default::default()).enter(|vm| {
            let dict = vm.builtins.dict();
            for name in ["BaseException", "KeyError", "ModuleNotFoundError", "StopIteration"] {
                assert!(dict.get_item_str(name, vm).is_some(), "{name} missing");
            }
        })
    }

    #[test]
    fn max_and_min_of_arguments() {
        Interpreter::new(Default::default()).enter(|vm| {
            let args: Vec<PyObjectRef> = [3, 9, 4].map(|i| vm.ctx.new_int(i).into()).to_vec();
            let max = call(vm, "max", args.clone()).unwrap();
            let min = call(vm, "min", args).unwrap();
            assert_eq!(max.repr(vm).unwrap().as_str(), "9");
            assert_eq!(min.repr(vm).unwrap().as_str(), "3");
        })
    }

    #[test]
    fn max_of_empty_sequence() {
        Interpreter::new(Default::default()).enter(|vm| {
            let empty: PyObjectRef = vm.ctx.new_list(vec![]).into();
            let err = call(vm, "max", vec![empty]).unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.value_error));
        })
    }

    #[test]
    fn chr_and_ord_invert() {
        Interpreter::new(Default::default()).enter(|vm| {
            let c = call(vm, "chr", vec![vm.ctx.new_int(955).into()]).unwrap();
            assert_eq!(c.payload::<PyStr>().unwrap().as_str(), "λ");
            let i = call(vm, "ord", vec![c]).unwrap();
            assert_eq!(i.repr(vm).unwrap().as_str(), "955");
        })
    }

    #[test]
    fn sum_refuses_a_str_start() {
        Interpreter::new(Default::default()).enter(|vm| {
            let items: PyObjectRef = vm.ctx.new_list(vec![]).into();
            let err = call(vm, "sum", vec![items, vm.ctx.new_str("").into()]).unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.type_error));
        })
    }

    #[test]
    fn print_writes_to_sys_stdout() {
        Interpreter::new(Default::default()).enter(|vm| {
            let written = vm.ctx.new_list(vec![]);
            let sink = vm.new_module("sink", vm.ctx.new_dict());
            let append = vm
                .get_attribute(written.as_object(), "append")
                .unwrap();
            sink.dict().set_item_str("write", append, vm);
            vm.sys_module
                .dict()
                .set_item_str("stdout", sink.into(), vm);
            call(
                vm,
                "print",
                vec![vm.ctx.new_int(1).into(), vm.ctx.new_str("a").into()],
            )
            .unwrap();
            let written = written.to_vec();
            assert_eq!(written.len(), 1);
            assert_eq!(written[0].payload::<PyStr>().unwrap().as_str(), "1 a\n");
        })
    }
}
