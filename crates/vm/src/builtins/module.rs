use super::{PyDictRef, PyTypeRef};
use crate::{PyObjectRef, PyPayload, PyRef, PyResult, VirtualMachine, function::FuncArgs, vm::Context};

/// A module: a name plus the dictionary its code ran in.
#[derive(Debug)]
pub struct PyModule {
    name: String,
}

impl PyPayload for PyModule {
    #[inline]
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.module_type
    }
}

impl PyModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The name the module was created with; `__name__` in its dict may have changed since.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PyRef<PyModule> {
    pub fn dict(&self) -> PyDictRef {
        self.as_object()
            .dict()
            .cloned()
            .expect("module objects carry a dict")
    }
}

fn module_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("module.__new__", vm)?.try_into_value(vm)?;
    let name = args
        .args
        .first()
        .map(|name| vm.expect_str(name, "module.__init__() argument 'name'"))
        .transpose()?
        .unwrap_or_default();
    if !cls.fast_issubclass(&vm.ctx.types.module_type) {
        return Err(vm.new_type_error(format!(
            "'{}' is not a subtype of 'module'",
            cls.name()
        )));
    }
    Ok(PyRef::new_ref(PyModule::new(name), cls, Some(vm.ctx.new_dict())).into())
}

fn module_init(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyModule>("__init__", vm)?;
    let doc = args.take_keyword("doc");
    let [name, positional_doc] = args.bind_optional::<2>("module", 1, vm)?;
    let name = name.unwrap_or_else(|| vm.ctx.none());
    vm.expect_str(&name, "module.__init__() argument 'name'")?;
    let doc = doc
        .or(positional_doc)
        .unwrap_or_else(|| vm.ctx.none());
    let dict = zelf.dict();
    dict.set_item_str("__name__", name, vm);
    dict.set_item_str("__doc__", doc, vm);
    Ok(vm.ctx.none())
}

fn module_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyModule>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    let name = match zelf.dict().get_item_str("__name__", vm) {
        Some(name) => name.str(vm)?.as_str().to_owned(),
        None => zelf.name().to_owned(),
    };
    Ok(vm.ctx.new_str(format!("<module '{name}'>")).into())
}

fn module_dir(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyModule>("__dir__", vm)?;
    args.bind::<0>("__dir__", vm)?;
    let keys: Vec<PyObjectRef> = zelf.dict().keys();
    Ok(vm.ctx.new_list(keys).into())
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.module_type, {
        "__new__" => ctx.new_staticmethod("__new__", module_new),
        "__init__" => ctx.new_method("__init__", module_init),
        "__repr__" => ctx.new_method("__repr__", module_repr),
        "__dir__" => ctx.new_method("__dir__", module_dir),
    });
}
