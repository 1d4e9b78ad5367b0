/// Adds attributes to an existing class. Method descriptors remember the class they were
/// added to.
///
/// ```rust,ignore
/// extend_class!(ctx, &ctx.types.list_type, {
///     "append" => ctx.new_method("append", list_append),
/// });
/// ```
#[macro_export]
macro_rules! extend_class {
    ( $ctx:expr, $class:expr, { $($name:expr => $value:expr),* $(,)? }) => {
        $(
            let value: $crate::PyObjectRef = $value.into();
            if let Some(descr) = value.payload::<$crate::builtins::PyMethodDescriptor>() {
                descr.set_objclass($class);
            }
            $class.set_attr($name, value);
        )*
    };
}

/// Creates a builtin module object populated with the given attributes.
#[macro_export]
macro_rules! py_module {
    ( $vm:expr, $module_name:expr, { $($name:expr => $value:expr),* $(,)? }) => {{
        let module = $vm.new_module($module_name, $vm.ctx.new_dict());
        $(
            module.dict().set_item_str($name, $value.into(), $vm);
        )*
        module
    }};
}

/// Logs at trace level, compiled in only with the `vm-tracing-logging` feature.
macro_rules! vm_trace {
    ($($arg:tt)+) => {
        #[cfg(feature = "vm-tracing-logging")]
        trace!($($arg)+);
    }
}
