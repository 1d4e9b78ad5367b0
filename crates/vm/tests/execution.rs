use crate::common::*;
use kython_vm::{
    bytecode::{CodeBuilder, CodeObject, ConstantData, Opcode},
    vm::thread::run_with_interpreter_stack,
};

fn add_function() -> CodeObject {
    let mut f = CodeBuilder::function("f", &["a", "b"]);
    f.load_fast("a")
        .load_fast("b")
        .emit(Opcode::BinaryAdd, 0)
        .return_value();
    f.finish().unwrap()
}

fn call_add_with(args: &[i64]) -> CodeObject {
    let mut module = CodeBuilder::new("<module>");
    define_function(&mut module, add_function());
    call_name(&mut module, "f", args);
    module.return_value();
    module.finish().unwrap()
}

#[test]
fn call_without_arguments() {
    let mut f = CodeBuilder::function("f", &[]);
    f.load_int(1).return_value();

    let mut module = CodeBuilder::new("<module>");
    define_function(&mut module, f.finish().unwrap());
    call_name(&mut module, "f", &[]);
    module.return_value();

    assert_eq!(eval_repr(module.finish().unwrap()), "1");
}

#[test]
fn positional_arguments_bind_in_order() {
    assert_eq!(eval_repr(call_add_with(&[1, 2])), "3");
}

#[test]
fn wrong_argument_count_is_a_type_error() {
    for args in [&[][..], &[1, 2, 3][..]] {
        run_module(call_add_with(args), |vm, result| {
            let exc = result.unwrap_err();
            assert!(exc.fast_isinstance(&vm.ctx.exceptions.type_error));
        });
    }
}

#[test]
fn defaults_and_keywords() {
    // def f(a, b=10): return a + b
    // (f(1), f(1, b=2))
    let mut module = CodeBuilder::new("<module>");
    module.load_const(ConstantData::Tuple {
        elements: vec![ConstantData::Integer { value: 10 }],
    });
    module
        .load_code(add_function())
        .load_str("f")
        .emit(Opcode::MakeFunction, 0x01)
        .store_name("f");
    call_name(&mut module, "f", &[1]);
    module
        .load_name("f")
        .load_int(1)
        .load_int(2)
        .load_const(ConstantData::Tuple {
            elements: vec![ConstantData::Str {
                value: "b".to_owned(),
            }],
        })
        .emit(Opcode::CallFunctionKw, 2)
        .emit(Opcode::BuildTuple, 2)
        .return_value();

    assert_eq!(eval_repr(module.finish().unwrap()), "(11, 3)");
}

#[test]
fn list_comprehension_runs_in_its_own_function() {
    // [int(x) for x in ('1', '2', '3')]
    let mut comp = CodeBuilder::function("<listcomp>", &[".0"]);
    let top = comp.new_label();
    let done = comp.new_label();
    comp.emit(Opcode::BuildList, 0).load_fast(".0");
    comp.bind(top).emit_jump(Opcode::ForIter, done);
    comp.store_fast("x")
        .load_global("int")
        .load_fast("x")
        .emit(Opcode::CallFunction, 1)
        .emit(Opcode::ListAppend, 2)
        .emit_jump(Opcode::JumpAbsolute, top);
    comp.bind(done).return_value();

    let mut module = CodeBuilder::new("<module>");
    module
        .load_code(comp.finish().unwrap())
        .load_str("<listcomp>")
        .emit(Opcode::MakeFunction, 0)
        .load_const(ConstantData::Tuple {
            elements: ["1", "2", "3"]
                .iter()
                .map(|s| ConstantData::Str {
                    value: (*s).to_owned(),
                })
                .collect(),
        })
        .emit(Opcode::GetIter, 0)
        .emit(Opcode::CallFunction, 1)
        .return_value();

    assert_eq!(eval_repr(module.finish().unwrap()), "[1, 2, 3]");
}

#[test]
fn for_loop_accumulates() {
    // total = 0
    // for i in range(4): total += i
    let mut module = CodeBuilder::new("<module>");
    let top = module.new_label();
    let done = module.new_label();
    module.load_int(0).store_name("total");
    call_name(&mut module, "range", &[4]);
    module.emit(Opcode::GetIter, 0);
    module.bind(top).emit_jump(Opcode::ForIter, done);
    module
        .store_name("i")
        .load_name("total")
        .load_name("i")
        .emit(Opcode::InplaceAdd, 0)
        .store_name("total")
        .emit_jump(Opcode::JumpAbsolute, top);
    module.bind(done).load_name("total").return_value();

    assert_eq!(eval_repr(module.finish().unwrap()), "6");
}

#[test]
fn caught_name_error_runs_the_handler() {
    // try:
    //     undefined_name
    // except NameError:
    //     result = True
    let mut module = CodeBuilder::new("<module>");
    let handler = module.new_label();
    let reraise = module.new_label();
    module
        .emit_jump(Opcode::SetupFinally, handler)
        .load_name("undefined_name")
        .emit(Opcode::PopTop, 0)
        .emit(Opcode::PopBlock, 0)
        .load_const(ConstantData::Boolean { value: false })
        .return_value();
    module
        .bind(handler)
        .emit(Opcode::DupTop, 0)
        .load_name("NameError")
        .emit_jump(Opcode::JumpIfNotExcMatch, reraise)
        .emit(Opcode::PopTop, 0)
        .emit(Opcode::PopTop, 0)
        .emit(Opcode::PopTop, 0)
        .emit(Opcode::PopExcept, 0)
        .load_const(ConstantData::Boolean { value: true })
        .return_value();
    module.bind(reraise).emit(Opcode::Reraise, 0);

    assert_eq!(eval_repr(module.finish().unwrap()), "True");
}

#[test]
fn closures_see_later_assignments() {
    // def outer():
    //     x = 1
    //     def inner(): return x
    //     x = 2
    //     return inner()
    let mut inner = CodeBuilder::function("inner", &[]).with_freevars(&["x"]);
    inner.deref(Opcode::LoadDeref, "x").return_value();

    let mut outer = CodeBuilder::function("outer", &[]).with_cellvars(&["x"]);
    outer
        .load_int(1)
        .deref(Opcode::StoreDeref, "x")
        .deref(Opcode::LoadClosure, "x")
        .emit(Opcode::BuildTuple, 1)
        .load_code(inner.finish().unwrap())
        .load_str("outer.<locals>.inner")
        .emit(Opcode::MakeFunction, 0x08)
        .store_fast("inner")
        .load_int(2)
        .deref(Opcode::StoreDeref, "x")
        .load_fast("inner")
        .emit(Opcode::CallFunction, 0)
        .return_value();

    let mut module = CodeBuilder::new("<module>");
    define_function(&mut module, outer.finish().unwrap());
    call_name(&mut module, "outer", &[]);
    module.return_value();

    assert_eq!(eval_repr(module.finish().unwrap()), "2");
}

#[test]
fn nonlocal_write_is_seen_by_the_enclosing_function() {
    // def outer():
    //     count = 0
    //     def bump():
    //         nonlocal count
    //         count = count + 1
    //     bump(); bump()
    //     return count
    let mut bump = CodeBuilder::function("bump", &[]).with_freevars(&["count"]);
    bump.deref(Opcode::LoadDeref, "count")
        .load_int(1)
        .emit(Opcode::BinaryAdd, 0)
        .deref(Opcode::StoreDeref, "count")
        .load_none()
        .return_value();

    let mut outer = CodeBuilder::function("outer", &[]).with_cellvars(&["count"]);
    outer
        .load_int(0)
        .deref(Opcode::StoreDeref, "count")
        .deref(Opcode::LoadClosure, "count")
        .emit(Opcode::BuildTuple, 1)
        .load_code(bump.finish().unwrap())
        .load_str("outer.<locals>.bump")
        .emit(Opcode::MakeFunction, 0x08)
        .store_fast("bump");
    for _ in 0..2 {
        outer
            .load_fast("bump")
            .emit(Opcode::CallFunction, 0)
            .emit(Opcode::PopTop, 0);
    }
    outer.deref(Opcode::LoadDeref, "count").return_value();

    let mut module = CodeBuilder::new("<module>");
    define_function(&mut module, outer.finish().unwrap());
    call_name(&mut module, "outer", &[]);
    module.return_value();

    assert_eq!(eval_repr(module.finish().unwrap()), "2");
}

#[test]
fn unbound_local_is_reported() {
    // def f():
    //     return x
    //     x = 1
    let mut f = CodeBuilder::function("f", &[]);
    f.load_fast("x").return_value();
    f.load_int(1).store_fast("x");

    let mut module = CodeBuilder::new("<module>");
    define_function(&mut module, f.finish().unwrap());
    call_name(&mut module, "f", &[]);
    module.return_value();

    run_module(module.finish().unwrap(), |vm, result| {
        let exc = result.unwrap_err();
        assert!(exc.fast_isinstance(&vm.ctx.exceptions.unbound_local_error));
    });
}

#[test]
fn builtin_modules_import_without_a_search_path() {
    // sys.path is empty unless the embedder sets one
    // import sys
    // sys.version_info[0]
    let mut module = CodeBuilder::new("<module>");
    module
        .load_int(0)
        .load_none()
        .named(Opcode::ImportName, "sys")
        .store_name("sys")
        .load_name("sys")
        .load_attr("version_info")
        .load_int(0)
        .emit(Opcode::BinarySubscr, 0)
        .return_value();
    assert_eq!(eval_repr(module.finish().unwrap()), "3");

    let mut module = CodeBuilder::new("<module>");
    module
        .load_int(0)
        .load_none()
        .named(Opcode::ImportName, "json")
        .return_value();
    run_module(module.finish().unwrap(), |vm, result| {
        let exc = result.unwrap_err();
        assert!(exc.fast_isinstance(&vm.ctx.exceptions.module_not_found_error));
        assert_eq!(message(vm, &exc), "No module named 'json'");
    });
}

#[test]
fn module_globals_are_visible_to_functions() {
    // n = 41
    // def f(): return n + 1
    let mut f = CodeBuilder::function("f", &[]);
    f.load_global("n")
        .load_int(1)
        .emit(Opcode::BinaryAdd, 0)
        .return_value();

    let mut module = CodeBuilder::new("<module>");
    module.load_int(41).store_name("n");
    define_function(&mut module, f.finish().unwrap());
    call_name(&mut module, "f", &[]);
    module.return_value();

    assert_eq!(eval_repr(module.finish().unwrap()), "42");
}

/// def down(n):
///     if not n: return 0
///     return down(n - 1)
/// down(<depth>)
fn recurse_to(depth: i64) -> CodeObject {
    let mut down = CodeBuilder::function("down", &["n"]);
    let recurse = down.new_label();
    down.load_fast("n").emit_jump(Opcode::PopJumpIfTrue, recurse);
    down.load_int(0).return_value();
    down.bind(recurse)
        .load_global("down")
        .load_fast("n")
        .load_int(1)
        .emit(Opcode::BinarySubtract, 0)
        .emit(Opcode::CallFunction, 1)
        .return_value();

    let mut module = CodeBuilder::new("<module>");
    define_function(&mut module, down.finish().unwrap());
    call_name(&mut module, "down", &[depth]);
    module.return_value();
    module.finish().unwrap()
}

#[test]
fn deep_recursion_below_the_default_limit_succeeds() {
    let result = run_with_interpreter_stack(|| eval_repr(recurse_to(990))).unwrap();
    assert_eq!(result, "0");
}

#[test]
fn unbounded_recursion_raises_recursion_error() {
    // def f(): return f()
    // f()
    run_with_interpreter_stack(|| {
        let mut f = CodeBuilder::function("f", &[]);
        f.load_global("f").emit(Opcode::CallFunction, 0).return_value();
        let mut module = CodeBuilder::new("<module>");
        define_function(&mut module, f.finish().unwrap());
        call_name(&mut module, "f", &[]);
        module.return_value();

        run_module(module.finish().unwrap(), |vm, result| {
            let exc = result.unwrap_err();
            assert!(exc.fast_isinstance(&vm.ctx.exceptions.recursion_error));
            assert_eq!(message(vm, &exc), "maximum recursion depth exceeded");
            assert_eq!(vm.current_recursion_depth(), 0);
        });
    })
    .unwrap();
}

#[test]
fn recursion_past_the_default_limit_is_stopped() {
    let exceeded = run_with_interpreter_stack(|| {
        run_module(recurse_to(5_000), |vm, result| {
            result
                .unwrap_err()
                .fast_isinstance(&vm.ctx.exceptions.recursion_error)
        })
    })
    .unwrap();
    assert!(exceeded);
}
