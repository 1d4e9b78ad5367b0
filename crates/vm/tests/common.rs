use kython_vm::{
    Interpreter, PyObjectRef, PyResult, VirtualMachine,
    builtins::PyBaseExceptionRef,
    bytecode::{CodeBuilder, CodeObject, Opcode},
};

/// Runs `code` as `__main__` in a fresh interpreter and hands the outcome to `check`.
pub fn run_module<R>(code: CodeObject, check: impl FnOnce(&VirtualMachine, PyResult) -> R) -> R {
    Interpreter::new(Default::default()).enter(|vm| {
        let result = vm.run_module(code, "__main__");
        check(vm, result)
    })
}

/// Runs `code` and returns the repr of its result, panicking with the rendered traceback
/// if it raised.
pub fn eval_repr(code: CodeObject) -> String {
    run_module(code, |vm, result| match result {
        Ok(value) => repr(vm, &value),
        Err(exc) => panic!("module raised:\n{}", render(vm, &exc)),
    })
}

pub fn repr(vm: &VirtualMachine, obj: &PyObjectRef) -> String {
    obj.repr(vm).unwrap().as_str().to_owned()
}

pub fn render(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> String {
    let mut out = Vec::new();
    kython_vm::exceptions::write_exception(&mut out, vm, exc).unwrap();
    String::from_utf8(out).unwrap()
}

pub fn message(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> String {
    exc.as_object().str(vm).unwrap().as_str().to_owned()
}

/// `def <name>(...)` at module level: the function is bound to the name of its code.
pub fn define_function(module: &mut CodeBuilder, body: CodeObject) {
    let name = body.name.clone();
    module
        .load_code(body)
        .load_str(&name)
        .emit(Opcode::MakeFunction, 0)
        .store_name(&name);
}

/// `class <name>(<bases>):` at module level. `body` fills the class namespace; the
/// `__class__` cell is always provided so methods may close over it.
pub fn define_class(
    module: &mut CodeBuilder,
    name: &str,
    bases: &[&str],
    body: impl FnOnce(&mut CodeBuilder),
) {
    let mut class_body = CodeBuilder::new(name).with_cellvars(&["__class__"]);
    class_body
        .load_name("__name__")
        .store_name("__module__")
        .load_str(name)
        .store_name("__qualname__");
    body(&mut class_body);
    class_body
        .deref(Opcode::LoadClosure, "__class__")
        .emit(Opcode::DupTop, 0)
        .store_name("__classcell__")
        .return_value();
    let class_body = class_body.finish().unwrap();

    module
        .emit(Opcode::LoadBuildClass, 0)
        .load_code(class_body)
        .load_str(name)
        .emit(Opcode::MakeFunction, 0)
        .load_str(name);
    for base in bases {
        module.load_name(base);
    }
    module
        .emit(Opcode::CallFunction, bases.len() as u32 + 2)
        .store_name(name);
}

/// Adds a method to a class body, closing over `__class__` when the method asks for it.
pub fn define_method(class_body: &mut CodeBuilder, class_name: &str, method: CodeObject) {
    let name = method.name.clone();
    let qualname = format!("{class_name}.{name}");
    if method.freevars.is_empty() {
        class_body
            .load_code(method)
            .load_str(&qualname)
            .emit(Opcode::MakeFunction, 0);
    } else {
        class_body
            .deref(Opcode::LoadClosure, "__class__")
            .emit(Opcode::BuildTuple, 1)
            .load_code(method)
            .load_str(&qualname)
            .emit(Opcode::MakeFunction, 0x08);
    }
    class_body.store_name(&name);
}

/// Emits `<callee>(<args>)` and leaves the result on the stack.
pub fn call_name(module: &mut CodeBuilder, callee: &str, args: &[i64]) {
    module.load_name(callee);
    for arg in args {
        module.load_int(*arg);
    }
    module.emit(Opcode::CallFunction, args.len() as u32);
}
