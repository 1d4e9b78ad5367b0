use crate::common::*;
use kython_vm::bytecode::{CodeBuilder, CodeObject, ConstantData, Opcode};

fn method(name: &str, params: &[&str], body: impl FnOnce(&mut CodeBuilder)) -> CodeObject {
    let mut code = CodeBuilder::function(name, params);
    body(&mut code);
    code.finish().unwrap()
}

fn radd_classes(module: &mut CodeBuilder) {
    // class A: pass
    // class B:
    //     def __radd__(self, other): return 'radd'
    define_class(module, "A", &[], |_| {});
    define_class(module, "B", &[], |body| {
        let radd = method("__radd__", &["self", "other"], |m| {
            m.load_str("radd").return_value();
        });
        define_method(body, "B", radd);
    });
}

#[test]
fn binary_op_falls_back_to_the_reflected_method() {
    let mut module = CodeBuilder::new("<module>");
    radd_classes(&mut module);
    call_name(&mut module, "A", &[]);
    call_name(&mut module, "B", &[]);
    module.emit(Opcode::BinaryAdd, 0).return_value();

    assert_eq!(eval_repr(module.finish().unwrap()), "'radd'");
}

#[test]
fn unsupported_operands_name_both_types() {
    let mut module = CodeBuilder::new("<module>");
    radd_classes(&mut module);
    call_name(&mut module, "A", &[]);
    call_name(&mut module, "A", &[]);
    module.emit(Opcode::BinaryAdd, 0).return_value();

    run_module(module.finish().unwrap(), |vm, result| {
        let exc = result.unwrap_err();
        assert!(exc.fast_isinstance(&vm.ctx.exceptions.type_error));
        assert_eq!(
            message(vm, &exc),
            "unsupported operand type(s) for +: 'A' and 'A'"
        );
    });
}

#[test]
fn init_sets_instance_attributes() {
    // class Point:
    //     def __init__(self, x): self.x = x
    // Point(7).x
    let mut module = CodeBuilder::new("<module>");
    define_class(&mut module, "Point", &[], |body| {
        let init = method("__init__", &["self", "x"], |m| {
            m.load_fast("x")
                .load_fast("self")
                .named(Opcode::StoreAttr, "x")
                .load_none()
                .return_value();
        });
        define_method(body, "Point", init);
    });
    call_name(&mut module, "Point", &[7]);
    module.load_attr("x").return_value();

    assert_eq!(eval_repr(module.finish().unwrap()), "7");
}

fn property_class(module: &mut CodeBuilder) {
    // class P:
    //     @property
    //     def x(self): return 42
    // p = P()
    define_class(module, "P", &[], |body| {
        let getter = method("x", &["self"], |m| {
            m.load_int(42).return_value();
        });
        body.load_name("property");
        body.load_code(getter)
            .load_str("P.x")
            .emit(Opcode::MakeFunction, 0)
            .emit(Opcode::CallFunction, 1)
            .store_name("x");
    });
    call_name(module, "P", &[]);
    module.store_name("p");
}

#[test]
fn property_getter_runs_on_access() {
    let mut module = CodeBuilder::new("<module>");
    property_class(&mut module);
    module.load_name("p").load_attr("x").return_value();

    assert_eq!(eval_repr(module.finish().unwrap()), "42");
}

#[test]
fn property_without_setter_rejects_assignment() {
    let mut module = CodeBuilder::new("<module>");
    property_class(&mut module);
    module
        .load_int(1)
        .load_name("p")
        .named(Opcode::StoreAttr, "x")
        .load_none()
        .return_value();

    run_module(module.finish().unwrap(), |vm, result| {
        let exc = result.unwrap_err();
        assert!(exc.fast_isinstance(&vm.ctx.exceptions.attribute_error));
        assert_eq!(message(vm, &exc), "can't set attribute");
    });
}

fn inheritance(module: &mut CodeBuilder) {
    // class Base:
    //     def greet(self): return 'base'
    // class Child(Base):
    //     def greet(self): return super().greet() + '!'
    define_class(module, "Base", &[], |body| {
        let greet = method("greet", &["self"], |m| {
            m.load_str("base").return_value();
        });
        define_method(body, "Base", greet);
    });
    define_class(module, "Child", &["Base"], |body| {
        let mut greet = CodeBuilder::function("greet", &["self"]).with_freevars(&["__class__"]);
        greet
            .load_global("super")
            .emit(Opcode::CallFunction, 0)
            .load_method("greet")
            .emit(Opcode::CallMethod, 0)
            .load_str("!")
            .emit(Opcode::BinaryAdd, 0)
            .return_value();
        define_method(body, "Child", greet.finish().unwrap());
    });
}

#[test]
fn zero_argument_super_uses_the_class_cell() {
    let mut module = CodeBuilder::new("<module>");
    inheritance(&mut module);
    call_name(&mut module, "Child", &[]);
    module
        .load_method("greet")
        .emit(Opcode::CallMethod, 0)
        .return_value();

    assert_eq!(eval_repr(module.finish().unwrap()), "'base!'");
}

#[test]
fn instances_of_subclasses_are_instances_of_the_base() {
    let mut module = CodeBuilder::new("<module>");
    inheritance(&mut module);
    module.load_name("isinstance");
    call_name(&mut module, "Child", &[]);
    module
        .load_name("Base")
        .emit(Opcode::CallFunction, 2)
        .load_name("Child")
        .load_attr("__mro__")
        .emit(Opcode::BuildTuple, 2)
        .return_value();

    assert_eq!(
        eval_repr(module.finish().unwrap()),
        "(True, (<class '__main__.Child'>, <class '__main__.Base'>, <class 'object'>))"
    );
}

#[test]
fn data_descriptor_on_the_type_beats_the_instance_dict() {
    // p.__dict__['x'] = 7
    // (p.x, p.__dict__['x'])
    let mut module = CodeBuilder::new("<module>");
    property_class(&mut module);
    module
        .load_int(7)
        .load_name("p")
        .load_attr("__dict__")
        .load_str("x")
        .emit(Opcode::StoreSubscr, 0);
    module
        .load_name("p")
        .load_attr("x")
        .load_name("p")
        .load_attr("__dict__")
        .load_str("x")
        .emit(Opcode::BinarySubscr, 0)
        .emit(Opcode::BuildTuple, 2)
        .return_value();

    assert_eq!(eval_repr(module.finish().unwrap()), "(42, 7)");
}

#[test]
fn instance_dict_shadows_a_method() {
    // class Q:
    //     def m(self): return 'method'
    // q = Q()
    // q.m = 'shadow'
    // q.m
    let mut module = CodeBuilder::new("<module>");
    define_class(&mut module, "Q", &[], |body| {
        let m = method("m", &["self"], |m| {
            m.load_str("method").return_value();
        });
        define_method(body, "Q", m);
    });
    call_name(&mut module, "Q", &[]);
    module
        .store_name("q")
        .load_str("shadow")
        .load_name("q")
        .named(Opcode::StoreAttr, "m")
        .load_name("q")
        .load_attr("m")
        .return_value();

    assert_eq!(eval_repr(module.finish().unwrap()), "'shadow'");
}

#[test]
fn list_subclass_keeps_its_items_and_attributes() {
    // class Stack(list): pass
    // s = Stack()
    // s.append(1); s.append(2)
    // s.label = 'top'
    // (len(s), s.label, s[-1], repr(s))
    let mut module = CodeBuilder::new("<module>");
    define_class(&mut module, "Stack", &["list"], |_| {});
    call_name(&mut module, "Stack", &[]);
    module.store_name("s");
    for item in [1, 2] {
        module
            .load_name("s")
            .load_method("append")
            .load_int(item)
            .emit(Opcode::CallMethod, 1)
            .emit(Opcode::PopTop, 0);
    }
    module
        .load_str("top")
        .load_name("s")
        .named(Opcode::StoreAttr, "label");
    module
        .load_name("len")
        .load_name("s")
        .emit(Opcode::CallFunction, 1)
        .load_name("s")
        .load_attr("label")
        .load_name("s")
        .load_int(-1)
        .emit(Opcode::BinarySubscr, 0)
        .load_name("repr")
        .load_name("s")
        .emit(Opcode::CallFunction, 1)
        .emit(Opcode::BuildTuple, 4)
        .return_value();

    assert_eq!(
        eval_repr(module.finish().unwrap()),
        "(2, 'top', 2, '[1, 2]')"
    );
}

#[test]
fn dict_subclass_keeps_its_items_and_attributes() {
    // class Config(dict): pass
    // c = Config(a=1)
    // c['b'] = 2
    // c.source = 'env'
    // (c['a'] + c['b'], c.source, len(c), isinstance(c, dict))
    let mut module = CodeBuilder::new("<module>");
    define_class(&mut module, "Config", &["dict"], |_| {});
    module
        .load_name("Config")
        .load_int(1)
        .load_const(ConstantData::Tuple {
            elements: vec![ConstantData::Str {
                value: "a".to_owned(),
            }],
        })
        .emit(Opcode::CallFunctionKw, 1)
        .store_name("c");
    module
        .load_int(2)
        .load_name("c")
        .load_str("b")
        .emit(Opcode::StoreSubscr, 0);
    module
        .load_str("env")
        .load_name("c")
        .named(Opcode::StoreAttr, "source");
    module
        .load_name("c")
        .load_str("a")
        .emit(Opcode::BinarySubscr, 0)
        .load_name("c")
        .load_str("b")
        .emit(Opcode::BinarySubscr, 0)
        .emit(Opcode::BinaryAdd, 0)
        .load_name("c")
        .load_attr("source")
        .load_name("len")
        .load_name("c")
        .emit(Opcode::CallFunction, 1)
        .load_name("isinstance")
        .load_name("c")
        .load_name("dict")
        .emit(Opcode::CallFunction, 2)
        .emit(Opcode::BuildTuple, 4)
        .return_value();

    assert_eq!(
        eval_repr(module.finish().unwrap()),
        "(3, 'env', 2, True)"
    );
}
