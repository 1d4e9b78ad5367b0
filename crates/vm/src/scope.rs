use crate::{VirtualMachine, builtins::PyDictRef};
use core::fmt;

/// The name spaces a frame resolves `*_NAME` and `*_GLOBAL` instructions against.
#[derive(Clone)]
pub struct Scope {
    pub locals: PyDictRef,
    pub globals: PyDictRef,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the dicts may contain the scope's own frame, don't recurse into them
        f.write_str("Scope")
    }
}

impl Scope {
    /// Module level code has no locals of its own: they are the globals.
    #[inline]
    pub fn new(locals: Option<PyDictRef>, globals: PyDictRef) -> Self {
        let locals = locals.unwrap_or_else(|| globals.clone());
        Self { locals, globals }
    }

    /// Like [`Scope::new`], making sure the globals can see the builtins module.
    pub fn with_builtins(
        locals: Option<PyDictRef>,
        globals: PyDictRef,
        vm: &VirtualMachine,
    ) -> Self {
        if globals.get_item_str("__builtins__", vm).is_none() {
            globals.set_item_str("__builtins__", vm.builtins.clone().into(), vm);
        }
        Self::new(locals, globals)
    }
}
