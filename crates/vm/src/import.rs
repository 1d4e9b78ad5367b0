/*
 * Import mechanics
 */

use crate::{
    PyObjectRef, PyRef, PyResult, VirtualMachine,
    builtins::{PyModule, PyStr},
    bytecode::{CodeObject, parse_kyc_file},
    scope::Scope,
};
use core::error::Error;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Turns a `.py` file found on `sys.path` into the code object of its module.
///
/// The vm never parses source itself; an embedder that wants source imports installs one
/// with [`Interpreter::with_source_compiler`](crate::Interpreter::with_source_compiler).
pub trait SourceCompiler {
    fn compile_module(&self, path: &Path) -> Result<CodeObject, Box<dyn Error>>;
}

/// Returns `sys.modules[module_name]`, loading the module from the first `sys.path` entry
/// holding `<name>.kyc` or `<name>.py` when it is not there yet. Dots in the name become
/// directory separators.
pub(crate) fn import(vm: &VirtualMachine, module_name: &str) -> PyResult {
    if let Some(module) = vm.modules.get_item_str(module_name, vm) {
        return Ok(module);
    }
    let relative = module_name.replace('.', "/");
    for entry in search_path(vm)? {
        if let Some(code) = find_module(vm, &entry, &relative)? {
            return import_code_obj(vm, module_name, code);
        }
    }
    Err(vm.new_exception_msg(
        vm.ctx.exceptions.module_not_found_error.clone(),
        format!("No module named '{module_name}'"),
    ))
}

/// The directories named by `sys.path`; entries that are not strings are skipped and `""`
/// stands for the working directory.
fn search_path(vm: &VirtualMachine) -> PyResult<Vec<PathBuf>> {
    let Some(path) = vm.sys_module.dict().get_item_str("path", vm) else {
        return Ok(vec![]);
    };
    let entries = vm.extract_elements(&path)?;
    Ok(entries
        .iter()
        .filter_map(|entry| entry.payload::<PyStr>())
        .map(|entry| PathBuf::from(entry.as_str()))
        .collect())
}

fn find_module(vm: &VirtualMachine, dir: &Path, relative: &str) -> PyResult<Option<CodeObject>> {
    let compiled = dir.join(format!("{relative}.kyc"));
    if compiled.is_file() {
        debug!("loading module container {}", compiled.display());
        let data = fs::read(&compiled).map_err(|err| {
            vm.new_import_error(format!("cannot read {}: {err}", compiled.display()))
        })?;
        let kyc = parse_kyc_file(&data).map_err(|err| {
            vm.new_import_error(format!("bad container {}: {err}", compiled.display()))
        })?;
        return Ok(Some(kyc.code));
    }

    let source = dir.join(format!("{relative}.py"));
    if !source.is_file() {
        return Ok(None);
    }
    let Some(compiler) = &vm.source_compiler else {
        return Err(vm.new_import_error(format!(
            "cannot import {}: no source compiler installed",
            source.display()
        )));
    };
    debug!("compiling module source {}", source.display());
    compiler.compile_module(&source).map(Some).map_err(|err| {
        vm.new_import_error(format!("cannot compile {}: {err}", source.display()))
    })
}

/// Runs `code` as the body of a new module registered under `module_name`. The module is in
/// `sys.modules` while its body runs and is dropped from it again if the body raises.
pub(crate) fn import_code_obj(
    vm: &VirtualMachine,
    module_name: &str,
    code: CodeObject,
) -> PyResult {
    let module = new_module_for(vm, module_name, &code);
    vm.modules.set_item_str(module_name, module.clone().into(), vm);
    info!("importing module {module_name} from {}", code.filename);
    let code = vm.new_code(code)?;
    if let Err(exc) = vm.run_code_obj(code, Scope::new(None, module.dict())) {
        vm.modules.del_item_str(module_name, vm);
        return Err(exc);
    }
    // the body may have replaced its own sys.modules entry
    Ok(vm
        .modules
        .get_item_str(module_name, vm)
        .unwrap_or_else(|| PyObjectRef::from(module)))
}

/// A module whose globals can see the builtins and know the file they came from.
pub(crate) fn new_module_for(
    vm: &VirtualMachine,
    module_name: &str,
    code: &CodeObject,
) -> PyRef<PyModule> {
    let globals = vm.ctx.new_dict();
    globals.set_item_str("__name__", vm.ctx.new_str(module_name).into(), vm);
    globals.set_item_str("__builtins__", vm.builtins.clone().into(), vm);
    if !code.filename.is_empty() {
        globals.set_item_str("__file__", vm.ctx.new_str(&*code.filename).into(), vm);
    }
    vm.new_module(module_name, globals)
}
