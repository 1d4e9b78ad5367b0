//! The `sys` module: interpreter state visible to python code.

use crate::{
    PyObjectRef, PyRef, PyResult, ToPyObject, VirtualMachine,
    builtins::PyModule,
    function::FuncArgs,
};

pub(crate) const VERSION: &str = "3.9.0 (kython)";

fn sys_exit(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [code] = args.bind_optional("exit", 0, vm)?;
    let args = code.into_iter().collect();
    Err(vm.new_exception(vm.ctx.exceptions.system_exit.clone(), args))
}

fn sys_exc_info(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    args.bind::<0>("exc_info", vm)?;
    let info = match vm.topmost_exception() {
        Some(exc) => vec![exc.class().clone().into(), exc.into(), vm.ctx.none()],
        None => vec![vm.ctx.none(), vm.ctx.none(), vm.ctx.none()],
    };
    Ok(vm.ctx.new_tuple(info).into())
}

fn sys_getrecursionlimit(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    args.bind::<0>("getrecursionlimit", vm)?;
    Ok(vm.recursion_limit.get().to_pyobject(vm))
}

fn sys_setrecursionlimit(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [limit] = args.bind("setrecursionlimit", vm)?;
    let limit: i64 = limit.try_into_value(vm)?;
    let limit = usize::try_from(limit)
        .ok()
        .filter(|limit| *limit >= 1)
        .ok_or_else(|| vm.new_value_error("recursion limit must be greater or equal than 1"))?;
    let depth = vm.current_recursion_depth();
    if limit <= depth {
        return Err(vm.new_recursion_error(format!(
            "cannot set the recursion limit to {limit} at the recursion depth {depth}: the limit is too low"
        )));
    }
    debug!("recursion limit set to {limit}");
    vm.recursion_limit.set(limit);
    Ok(vm.ctx.none())
}

fn sys_getrefcount(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj] = args.bind("getrefcount", vm)?;
    Ok(obj.strong_count().to_pyobject(vm))
}

/// `sys._getframe(depth=0)`
fn sys_getframe(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [depth] = args.bind_optional("_getframe", 0, vm)?;
    let depth: usize = match depth {
        Some(depth) => depth.try_into_value(vm)?,
        None => 0,
    };
    let frames = vm.frames.borrow();
    frames
        .iter()
        .rev()
        .nth(depth)
        .map(|frame| frame.clone().into())
        .ok_or_else(|| vm.new_value_error("call stack is not deep enough"))
}

fn sys_intern(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [s] = args.bind("intern", vm)?;
    let s: crate::builtins::PyStrRef = s.try_into_value(vm)?;
    Ok(s.into())
}

pub fn init_module(vm: &VirtualMachine, module: &PyRef<PyModule>) {
    let ctx = &vm.ctx;
    let dict = module.dict();

    let argv = vm
        .settings
        .argv
        .iter()
        .map(|arg| ctx.new_str(arg.as_str()).into())
        .collect();
    let path = vm
        .settings
        .path
        .iter()
        .map(|entry| ctx.new_str(entry.as_str()).into())
        .collect();
    let version_info: Vec<PyObjectRef> = vec![
        3_i32.to_pyobject(vm),
        9_i32.to_pyobject(vm),
        0_i32.to_pyobject(vm),
        "final".to_pyobject(vm),
        0_i32.to_pyobject(vm),
    ];
    let builtin_module_names = super::BUILTIN_MODULE_NAMES
        .into_iter()
        .map(|name| name.to_pyobject(vm))
        .collect();
    let byteorder = if cfg!(target_endian = "little") {
        "little"
    } else {
        "big"
    };

    let attributes: Vec<(&str, PyObjectRef)> = vec![
        ("argv", ctx.new_list(argv).into()),
        ("path", ctx.new_list(path).into()),
        ("modules", vm.modules.clone().into()),
        ("builtin_module_names", ctx.new_tuple(builtin_module_names).into()),
        ("version", VERSION.to_pyobject(vm)),
        ("version_info", ctx.new_tuple(version_info).into()),
        ("hexversion", 0x030900f0_u32.to_pyobject(vm)),
        ("implementation_name", "kython".to_pyobject(vm)),
        ("maxsize", (isize::MAX as i64).to_pyobject(vm)),
        ("byteorder", byteorder.to_pyobject(vm)),
        ("platform", std::env::consts::OS.to_pyobject(vm)),
        ("executable", "".to_pyobject(vm)),
        // print() writes to the process stdout while this is None
        ("stdout", ctx.none()),
        ("exit", ctx.new_function("exit", sys_exit).into()),
        ("exc_info", ctx.new_function("exc_info", sys_exc_info).into()),
        (
            "getrecursionlimit",
            ctx.new_function("getrecursionlimit", sys_getrecursionlimit).into(),
        ),
        (
            "setrecursionlimit",
            ctx.new_function("setrecursionlimit", sys_setrecursionlimit).into(),
        ),
        ("getrefcount", ctx.new_function("getrefcount", sys_getrefcount).into()),
        ("_getframe", ctx.new_function("_getframe", sys_getframe).into()),
        ("intern", ctx.new_function("intern", sys_intern).into()),
    ];
    for (name, value) in attributes {
        dict.set_item_str(name, value, vm);
    }
}

#[cfg(test)]
mod tests {
    use crate::{Interpreter, Settings};

    #[test]
    fn argv_comes_from_settings() {
        let settings = Settings::default().with_argv(vec!["prog.py".to_owned(), "-x".to_owned()]);
        Interpreter::new(settings).enter(|vm| {
            let argv = vm.sys_module.dict().get_item_str("argv", vm).unwrap();
            assert_eq!(argv.repr(vm).unwrap().as_str(), "['prog.py', '-x']");
        })
    }

    #[test]
    fn exit_raises_system_exit() {
        Interpreter::new(Default::default()).enter(|vm| {
            let exit = vm.sys_module.dict().get_item_str("exit", vm).unwrap();
            let err = vm.invoke(&exit, vec![vm.ctx.new_int(4).into()]).unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.system_exit));
            assert_eq!(vm.handle_exit_exception(err), 4);
        })
    }

    #[test]
    fn recursion_limit_is_adjustable() {
        Interpreter::new(Default::default()).enter(|vm| {
            let set = vm.sys_module.dict().get_item_str("setrecursionlimit", vm).unwrap();
            vm.invoke(&set, vec![vm.ctx.new_int(50).into()]).unwrap();
            assert_eq!(vm.recursion_limit.get(), 50);
            let err = vm.invoke(&set, vec![vm.ctx.new_int(0).into()]).unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.value_error));
        })
    }
}
