//! Modules built into the interpreter. They are the only modules `import` can find.

pub mod builtins;
pub mod sys;

/// Names of the builtin modules, in the order they are initialized.
pub const BUILTIN_MODULE_NAMES: [&str; 2] = ["builtins", "sys"];
