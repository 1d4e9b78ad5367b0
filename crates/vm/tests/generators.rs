use crate::common::*;
use kython_vm::{
    PyObjectRef, VirtualMachine,
    builtins::PyGenerator,
    bytecode::{CodeBuilder, CodeFlags, CodeObject, Opcode},
};

fn generator(name: &str) -> CodeBuilder {
    CodeBuilder::function(name, &[]).with_flags(CodeFlags::GENERATOR)
}

/// Defines every function in `functions` and returns a fresh generator from the last one.
fn make_generator(functions: Vec<CodeObject>) -> CodeObject {
    let last = functions.last().map(|f| f.name.clone()).unwrap();
    let mut module = CodeBuilder::new("<module>");
    for function in functions {
        define_function(&mut module, function);
    }
    call_name(&mut module, &last, &[]);
    module.return_value();
    module.finish().unwrap()
}

fn send(vm: &VirtualMachine, generator: &PyObjectRef, value: PyObjectRef) -> kython_vm::PyResult {
    vm.call_method(generator, "send", vec![value])
}

fn yield_then_return() -> CodeObject {
    // def gen():
    //     yield 1
    //     return 'done'
    let mut g = generator("gen");
    g.load_int(1)
        .emit(Opcode::YieldValue, 0)
        .emit(Opcode::PopTop, 0)
        .load_str("done")
        .return_value();
    g.finish().unwrap()
}

#[test]
fn send_resumes_until_return() {
    let code = make_generator(vec![yield_then_return()]);
    run_module(code, |vm, result| {
        let generator = result.unwrap();
        let frame = generator.payload::<PyGenerator>().unwrap().frame();
        assert!(frame.status().is_created());

        let first = send(vm, &generator, vm.ctx.none()).unwrap();
        assert_eq!(repr(vm, &first), "1");
        assert!(frame.status().is_suspended());
        let delegate = generator.get_attr("gi_yieldfrom", vm).unwrap();
        assert!(vm.is_none(&delegate));

        let stop = send(vm, &generator, vm.ctx.none()).unwrap_err();
        assert!(stop.fast_isinstance(&vm.ctx.exceptions.stop_iteration));
        assert_eq!(repr(vm, &stop.get_arg(0).unwrap()), "'done'");
        assert!(frame.status().is_returned());

        let again = send(vm, &generator, vm.ctx.none()).unwrap_err();
        assert!(again.fast_isinstance(&vm.ctx.exceptions.stop_iteration));
    });
}

#[test]
fn just_started_generator_only_accepts_none() {
    let code = make_generator(vec![yield_then_return()]);
    run_module(code, |vm, result| {
        let generator = result.unwrap();
        let err = send(vm, &generator, vm.ctx.new_int(5).into()).unwrap_err();
        assert!(err.fast_isinstance(&vm.ctx.exceptions.type_error));
        assert_eq!(
            message(vm, &err),
            "can't send non-None value to a just-started generator"
        );
    });
}

#[test]
fn yield_from_delegates_and_returns_the_result() {
    // def inner():
    //     yield 1
    //     yield 2
    //     return 3
    // def outer():
    //     return (yield from inner())
    let mut inner = generator("inner");
    inner
        .load_int(1)
        .emit(Opcode::YieldValue, 0)
        .emit(Opcode::PopTop, 0)
        .load_int(2)
        .emit(Opcode::YieldValue, 0)
        .emit(Opcode::PopTop, 0)
        .load_int(3)
        .return_value();

    let mut outer = generator("outer");
    outer
        .load_global("inner")
        .emit(Opcode::CallFunction, 0)
        .emit(Opcode::GetYieldFromIter, 0)
        .load_none()
        .emit(Opcode::YieldFrom, 0)
        .return_value();

    let code = make_generator(vec![inner.finish().unwrap(), outer.finish().unwrap()]);
    run_module(code, |vm, result| {
        let generator = result.unwrap();
        let frame = generator.payload::<PyGenerator>().unwrap().frame();
        let first = send(vm, &generator, vm.ctx.none()).unwrap();
        assert_eq!(repr(vm, &first), "1");
        assert!(frame.status().is_delegating());

        let delegate = generator.get_attr("gi_yieldfrom", vm).unwrap();
        assert_eq!(delegate.class().name(), "generator");
        let inner_frame = delegate.payload::<PyGenerator>().unwrap().frame();
        assert!(inner_frame.status().is_suspended());

        let second = send(vm, &generator, vm.ctx.none()).unwrap();
        assert_eq!(repr(vm, &second), "2");
        assert!(frame.status().is_delegating());

        let stop = send(vm, &generator, vm.ctx.none()).unwrap_err();
        assert!(stop.fast_isinstance(&vm.ctx.exceptions.stop_iteration));
        assert_eq!(repr(vm, &stop.get_arg(0).unwrap()), "3");
        assert!(frame.status().is_returned());
        assert!(inner_frame.status().is_returned());
        let delegate = generator.get_attr("gi_yieldfrom", vm).unwrap();
        assert!(vm.is_none(&delegate));
    });
}

#[test]
fn throw_lands_in_the_suspended_handler() {
    // def gen():
    //     try:
    //         yield 1
    //     except ValueError:
    //         yield 'caught'
    let mut g = generator("gen");
    let handler = g.new_label();
    let reraise = g.new_label();
    g.emit_jump(Opcode::SetupFinally, handler)
        .load_int(1)
        .emit(Opcode::YieldValue, 0)
        .emit(Opcode::PopTop, 0)
        .emit(Opcode::PopBlock, 0)
        .load_none()
        .return_value();
    g.bind(handler)
        .emit(Opcode::DupTop, 0)
        .load_global("ValueError")
        .emit_jump(Opcode::JumpIfNotExcMatch, reraise)
        .emit(Opcode::PopTop, 0)
        .emit(Opcode::PopTop, 0)
        .emit(Opcode::PopTop, 0)
        .load_str("caught")
        .emit(Opcode::YieldValue, 0)
        .emit(Opcode::PopTop, 0)
        .emit(Opcode::PopExcept, 0)
        .load_none()
        .return_value();
    g.bind(reraise).emit(Opcode::Reraise, 0);

    let code = make_generator(vec![g.finish().unwrap()]);
    run_module(code, |vm, result| {
        let generator = result.unwrap();
        send(vm, &generator, vm.ctx.none()).unwrap();
        let value_error: PyObjectRef = vm.ctx.exceptions.value_error.clone().into();
        let caught = vm
            .call_method(&generator, "throw", vec![value_error])
            .unwrap();
        assert_eq!(repr(vm, &caught), "'caught'");

        // anything else passes straight through the handler
        let key_error: PyObjectRef = vm.ctx.exceptions.key_error.clone().into();
        let err = vm.call_method(&generator, "throw", vec![key_error]).unwrap_err();
        assert!(err.fast_isinstance(&vm.ctx.exceptions.key_error));
    });
}

#[test]
fn list_drains_a_generator() {
    let mut g = generator("gen");
    for i in 0..3 {
        g.load_int(i)
            .emit(Opcode::YieldValue, 0)
            .emit(Opcode::PopTop, 0);
    }
    g.load_none().return_value();

    let mut module = CodeBuilder::new("<module>");
    define_function(&mut module, g.finish().unwrap());
    module.load_name("list");
    call_name(&mut module, "gen", &[]);
    module.emit(Opcode::CallFunction, 1).return_value();

    assert_eq!(eval_repr(module.finish().unwrap()), "[0, 1, 2]");
}

#[test]
fn close_before_start_finishes_the_generator() {
    let code = make_generator(vec![yield_then_return()]);
    run_module(code, |vm, result| {
        let generator = result.unwrap();
        vm.call_method(&generator, "close", ()).unwrap();
        let stop = send(vm, &generator, vm.ctx.none()).unwrap_err();
        assert!(stop.fast_isinstance(&vm.ctx.exceptions.stop_iteration));
    });
}

#[test]
fn stop_iteration_inside_the_body_becomes_runtime_error() {
    // def gen():
    //     raise StopIteration('early')
    //     yield
    let mut g = generator("gen");
    g.load_global("StopIteration")
        .load_str("early")
        .emit(Opcode::CallFunction, 1)
        .emit(Opcode::RaiseVarargs, 1);
    g.load_none()
        .emit(Opcode::YieldValue, 0)
        .emit(Opcode::PopTop, 0)
        .load_none()
        .return_value();

    let code = make_generator(vec![g.finish().unwrap()]);
    run_module(code, |vm, result| {
        let generator = result.unwrap();
        let err = send(vm, &generator, vm.ctx.none()).unwrap_err();
        assert!(err.fast_isinstance(&vm.ctx.exceptions.runtime_error));
        assert_eq!(message(vm, &err), "generator raised StopIteration");

        let cause = err.cause().unwrap();
        assert!(cause.fast_isinstance(&vm.ctx.exceptions.stop_iteration));
        assert_eq!(message(vm, &cause), "early");

        // the generator is finished afterwards
        let again = send(vm, &generator, vm.ctx.none()).unwrap_err();
        assert!(again.fast_isinstance(&vm.ctx.exceptions.stop_iteration));
    });
}
