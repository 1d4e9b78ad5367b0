use crate::common::*;
use kython_vm::{
    Interpreter, PyResult, Settings, VirtualMachine,
    bytecode::{CodeBuilder, CodeObject, Opcode},
    import::SourceCompiler,
};
use std::{cell::Cell, error::Error, fs, path::Path, rc::Rc};
use tempfile::TempDir;

/// Hands out the same module body for every source file and counts how often it is asked.
struct CannedCompiler {
    body: fn() -> CodeObject,
    calls: Rc<Cell<usize>>,
}

impl SourceCompiler for CannedCompiler {
    fn compile_module(&self, path: &Path) -> Result<CodeObject, Box<dyn Error>> {
        assert_eq!(path.extension().unwrap(), "py");
        self.calls.set(self.calls.get() + 1);
        Ok((self.body)())
    }
}

struct BrokenCompiler;

impl SourceCompiler for BrokenCompiler {
    fn compile_module(&self, _path: &Path) -> Result<CodeObject, Box<dyn Error>> {
        Err("invalid syntax (line 1)".into())
    }
}

/// x = 42
fn answer_module() -> CodeObject {
    let mut module = CodeBuilder::new("<module>");
    module.load_int(42).store_name("x").load_none().return_value();
    module.finish().unwrap()
}

/// raise ValueError('half loaded')
fn raising_module() -> CodeObject {
    let mut module = CodeBuilder::new("<module>");
    module
        .load_int(1)
        .store_name("partial")
        .load_name("ValueError")
        .load_str("half loaded")
        .emit(Opcode::CallFunction, 1)
        .emit(Opcode::RaiseVarargs, 1);
    module.finish().unwrap()
}

/// A directory holding `files`, plus settings whose `sys.path` is that directory.
fn search_dir(files: &[(&str, &str)]) -> (TempDir, Settings) {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        fs::write(dir.path().join(name), contents).unwrap();
    }
    let path = dir.path().to_str().unwrap().to_owned();
    (dir, Settings::default().with_path(vec![path]))
}

/// import <name>
/// return <name>.<attr>
fn import_then_load(name: &str, attr: &str) -> CodeObject {
    let mut module = CodeBuilder::new("<module>");
    module
        .load_int(0)
        .load_none()
        .named(Opcode::ImportName, name)
        .store_name(name)
        .load_name(name)
        .load_attr(attr)
        .return_value();
    module.finish().unwrap()
}

fn run_in(
    interp: Interpreter,
    code: CodeObject,
    check: impl FnOnce(&VirtualMachine, PyResult),
) {
    interp.enter(|vm| {
        let result = vm.run_module(code, "__main__");
        check(vm, result)
    })
}

#[test]
fn source_module_is_compiled_once_and_cached() {
    let (_dir, settings) = search_dir(&[("answer.py", "x = 42\n")]);
    let calls = Rc::new(Cell::new(0));
    let interp = Interpreter::new(settings).with_source_compiler(CannedCompiler {
        body: answer_module,
        calls: calls.clone(),
    });

    interp.enter(|vm| {
        let x = vm.run_module(import_then_load("answer", "x"), "__main__").unwrap();
        assert_eq!(repr(vm, &x), "42");
        let x = vm.run_module(import_then_load("answer", "x"), "__main__").unwrap();
        assert_eq!(repr(vm, &x), "42");

        let cached = vm.modules.get_item_str("answer", vm).unwrap();
        let name = cached.get_attr("__name__", vm).unwrap();
        assert_eq!(repr(vm, &name), "'answer'");
    });
    assert_eq!(calls.get(), 1);
}

#[test]
fn kyc_container_on_the_path_needs_no_compiler() {
    // a module whose body is `return None`, compiled from "<cmod>"
    let mut container = b"KYCA\x09K".to_vec();
    container.extend(b"i\x07\x00\x00\x00");
    container.extend(b"s\x00\x00\x00\x00");
    container.push(b'c');
    for field in [0u32, 0, 0, 0, 1, 0] {
        container.push(b'i');
        container.extend(field.to_le_bytes());
    }
    container.extend(b"b\x04\x00\x00\x00\x64\x00\x53\x00");
    container.extend(b"t\x01\x00\x00\x00N");
    for _ in 0..4 {
        container.extend(b"t\x00\x00\x00\x00");
    }
    container.extend(b"s\x06\x00\x00\x00<cmod>");
    container.extend(b"s\x08\x00\x00\x00<module>");
    container.extend(b"i\x01\x00\x00\x00");
    container.extend(b"b\x00\x00\x00\x00");

    let (dir, settings) = search_dir(&[("cmod.py", "")]);
    fs::write(dir.path().join("cmod.kyc"), &container).unwrap();
    run_in(
        Interpreter::new(settings),
        import_then_load("cmod", "__file__"),
        |vm, result| {
            let file = result.unwrap();
            assert_eq!(repr(vm, &file), "'<cmod>'");
        },
    );
}

#[test]
fn corrupt_container_is_an_import_error() {
    let (_dir, settings) = search_dir(&[("broken.kyc", "PYC\0")]);
    run_in(
        Interpreter::new(settings),
        import_then_load("broken", "x"),
        |vm, result| {
            let exc = result.unwrap_err();
            assert!(exc.fast_isinstance(&vm.ctx.exceptions.import_error));
            assert!(!exc.fast_isinstance(&vm.ctx.exceptions.module_not_found_error));
            assert!(message(vm, &exc).starts_with("bad container "));
        },
    );
}

#[test]
fn source_without_a_compiler_is_an_import_error() {
    let (_dir, settings) = search_dir(&[("answer.py", "x = 42\n")]);
    run_in(
        Interpreter::new(settings),
        import_then_load("answer", "x"),
        |vm, result| {
            let exc = result.unwrap_err();
            assert!(exc.fast_isinstance(&vm.ctx.exceptions.import_error));
            assert!(message(vm, &exc).ends_with("no source compiler installed"));
        },
    );
}

#[test]
fn compile_failure_names_the_file() {
    let (_dir, settings) = search_dir(&[("typo.py", "x = = 1\n")]);
    run_in(
        Interpreter::new(settings).with_source_compiler(BrokenCompiler),
        import_then_load("typo", "x"),
        |vm, result| {
            let exc = result.unwrap_err();
            assert!(exc.fast_isinstance(&vm.ctx.exceptions.import_error));
            let message = message(vm, &exc);
            assert!(message.starts_with("cannot compile "), "{message}");
            assert!(message.contains("typo.py"), "{message}");
            assert!(message.ends_with("invalid syntax (line 1)"), "{message}");
        },
    );
}

#[test]
fn module_that_raises_is_not_cached() {
    let (_dir, settings) = search_dir(&[("half.py", "")]);
    let calls = Rc::new(Cell::new(0));
    let interp = Interpreter::new(settings).with_source_compiler(CannedCompiler {
        body: raising_module,
        calls: calls.clone(),
    });

    interp.enter(|vm| {
        for _ in 0..2 {
            let exc = vm
                .run_module(import_then_load("half", "partial"), "__main__")
                .unwrap_err();
            assert!(exc.fast_isinstance(&vm.ctx.exceptions.value_error));
            assert!(vm.modules.get_item_str("half", vm).is_none());
        }
    });
    assert_eq!(calls.get(), 2);
}

#[test]
fn missing_module_searches_every_entry() {
    let settings = Settings::default().with_path(vec![
        String::new(),
        "/nonexistent/kython-search-dir".to_owned(),
    ]);
    run_in(
        Interpreter::new(settings),
        import_then_load("kython_no_such_module", "x"),
        |vm, result| {
            let exc = result.unwrap_err();
            assert!(exc.fast_isinstance(&vm.ctx.exceptions.module_not_found_error));
            assert_eq!(
                message(vm, &exc),
                "No module named 'kython_no_such_module'"
            );
        },
    );
}

#[test]
fn sys_path_reflects_settings() {
    let settings = Settings::default().with_path(vec!["/srv/app".to_owned(), String::new()]);
    Interpreter::new(settings).enter(|vm| {
        let path = vm.sys_module.dict().get_item_str("path", vm).unwrap();
        assert_eq!(repr(vm, &path), "['/srv/app', '']");
    });
}
