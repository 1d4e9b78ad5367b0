use crate::common::*;
use kython_vm::{
    Interpreter,
    builtins::PyTuple,
    bytecode::{CodeBuilder, CodeObject, Opcode},
};

/// `raise <name>(<message>)`
fn raise_new(code: &mut CodeBuilder, name: &str, message: &str) {
    code.load_name(name)
        .load_str(message)
        .emit(Opcode::CallFunction, 1)
        .emit(Opcode::RaiseVarargs, 1);
}

fn exit_status(code: CodeObject) -> u8 {
    Interpreter::new(Default::default()).run_main(|vm| vm.run_module(code, "__main__").map(drop))
}

#[test]
fn handler_receives_the_exception_triple() {
    // try:
    //     raise ValueError('bad')
    // except:
    //     result = (tb, value, type)
    let mut module = CodeBuilder::new("<module>");
    let handler = module.new_label();
    module.emit_jump(Opcode::SetupFinally, handler);
    raise_new(&mut module, "ValueError", "bad");
    module
        .bind(handler)
        .emit(Opcode::BuildTuple, 3)
        .store_name("result")
        .emit(Opcode::PopExcept, 0)
        .load_name("result")
        .return_value();

    run_module(module.finish().unwrap(), |vm, result| {
        let result = result.unwrap();
        let triple = result.payload::<PyTuple>().unwrap().as_slice();
        assert!(vm.is_none(&triple[0]));
        assert_eq!(repr(vm, &triple[1]), "ValueError('bad')");
        assert!(triple[2].is(&vm.ctx.exceptions.value_error));
        assert!(vm.topmost_exception().is_none());
    });
}

#[test]
fn traceback_lists_callers_first() {
    // def f():
    //     raise ValueError('bad')
    // f()
    let mut f = CodeBuilder::function("f", &[]).with_first_line(2);
    f.set_line(3);
    f.load_global("ValueError")
        .load_str("bad")
        .emit(Opcode::CallFunction, 1)
        .emit(Opcode::RaiseVarargs, 1);

    let mut module = CodeBuilder::new("<module>");
    define_function(&mut module, f.finish().unwrap());
    module.set_line(5);
    call_name(&mut module, "f", &[]);
    module.return_value();

    run_module(module.finish().unwrap(), |vm, result| {
        let exc = result.unwrap_err();
        let lines: Vec<_> = exc.traceback().iter().map(|entry| entry.lineno).collect();
        assert_eq!(lines, [5, 3]);
        insta::assert_snapshot!(render(vm, &exc).trim_end(), @r#"
        Traceback (most recent call last):
          File "<builder>", line 5, in <module>
          File "<builder>", line 3, in f
        ValueError: bad
        "#);
    });
}

#[test]
fn raise_from_sets_the_cause() {
    // raise ValueError('outer') from KeyError('inner')
    let mut module = CodeBuilder::new("<module>");
    module
        .load_name("ValueError")
        .load_str("outer")
        .emit(Opcode::CallFunction, 1)
        .load_name("KeyError")
        .load_str("inner")
        .emit(Opcode::CallFunction, 1)
        .emit(Opcode::RaiseVarargs, 2);

    run_module(module.finish().unwrap(), |vm, result| {
        let exc = result.unwrap_err();
        let cause = exc.cause().unwrap();
        assert!(cause.fast_isinstance(&vm.ctx.exceptions.key_error));
        insta::assert_snapshot!(render(vm, &exc).trim_end(), @r#"
        KeyError: 'inner'

        The above exception was the direct cause of the following exception:

        Traceback (most recent call last):
          File "<builder>", line 1, in <module>
        ValueError: outer
        "#);
    });
}

#[test]
fn raising_in_a_handler_records_the_context() {
    // try:
    //     raise KeyError('first')
    // except:
    //     raise ValueError('second')
    let mut module = CodeBuilder::new("<module>");
    let handler = module.new_label();
    module.emit_jump(Opcode::SetupFinally, handler);
    raise_new(&mut module, "KeyError", "first");
    module
        .bind(handler)
        .emit(Opcode::PopTop, 0)
        .emit(Opcode::PopTop, 0)
        .emit(Opcode::PopTop, 0);
    raise_new(&mut module, "ValueError", "second");

    run_module(module.finish().unwrap(), |vm, result| {
        let exc = result.unwrap_err();
        assert!(exc.fast_isinstance(&vm.ctx.exceptions.value_error));
        let context = exc.context().unwrap();
        assert!(context.fast_isinstance(&vm.ctx.exceptions.key_error));
        assert!(exc.cause().is_none());
        assert!(render(vm, &exc).contains("During handling of the above exception"));
    });
}

#[test]
fn uncaught_exception_exits_with_one() {
    let mut module = CodeBuilder::new("<module>");
    raise_new(&mut module, "RuntimeError", "boom");
    assert_eq!(exit_status(module.finish().unwrap()), 1);
}

#[test]
fn reraise_of_a_non_exception_is_fatal() {
    let mut module = CodeBuilder::new("<module>");
    module
        .load_none()
        .load_none()
        .load_none()
        .emit(Opcode::Reraise, 0);
    assert_eq!(exit_status(module.finish().unwrap()), 70);
}

#[test]
fn running_off_the_end_of_the_code_is_fatal() {
    let mut module = CodeBuilder::new("<module>");
    module.load_none().emit(Opcode::PopTop, 0);
    assert_eq!(exit_status(module.finish().unwrap()), 70);
}

#[test]
fn bare_raise_without_active_exception() {
    let mut module = CodeBuilder::new("<module>");
    module.emit(Opcode::RaiseVarargs, 0);
    run_module(module.finish().unwrap(), |vm, result| {
        let exc = result.unwrap_err();
        assert!(exc.fast_isinstance(&vm.ctx.exceptions.runtime_error));
        assert_eq!(message(vm, &exc), "No active exception to reraise");
    });
}
