use crate::{
    builtins::{
        PyTypeRef, bool_, builtin_func, bytes, classmethod, code, complex, descriptor, dict,
        enumerate, float, function, generator, int, iter, list, module, object, property, pystr,
        range, set, singletons, slice, staticmethod, super_, tuple,
        type_::{self, PyType, PyTypeFlags},
        zip,
    },
    vm::Context,
};

/// Holder of references to builtin types.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct TypeZoo {
    pub bool_type: PyTypeRef,
    pub bound_method_type: PyTypeRef,
    pub builtin_function_or_method_type: PyTypeRef,
    pub bytes_type: PyTypeRef,
    pub bytes_iterator_type: PyTypeRef,
    pub cell_type: PyTypeRef,
    pub classmethod_type: PyTypeRef,
    pub code_type: PyTypeRef,
    pub complex_type: PyTypeRef,
    pub dict_type: PyTypeRef,
    pub dict_keys_type: PyTypeRef,
    pub dict_values_type: PyTypeRef,
    pub dict_items_type: PyTypeRef,
    pub dict_keyiterator_type: PyTypeRef,
    pub dict_valueiterator_type: PyTypeRef,
    pub dict_itemiterator_type: PyTypeRef,
    pub ellipsis_type: PyTypeRef,
    pub enumerate_type: PyTypeRef,
    pub float_type: PyTypeRef,
    pub frame_type: PyTypeRef,
    pub frozenset_type: PyTypeRef,
    pub function_type: PyTypeRef,
    pub generator_type: PyTypeRef,
    pub int_type: PyTypeRef,
    pub iter_type: PyTypeRef,
    pub list_type: PyTypeRef,
    pub list_iterator_type: PyTypeRef,
    pub method_descriptor_type: PyTypeRef,
    pub module_type: PyTypeRef,
    pub none_type: PyTypeRef,
    pub not_implemented_type: PyTypeRef,
    pub object_type: PyTypeRef,
    pub property_type: PyTypeRef,
    pub range_type: PyTypeRef,
    pub range_iterator_type: PyTypeRef,
    pub reverse_iter_type: PyTypeRef,
    pub set_type: PyTypeRef,
    pub set_iterator_type: PyTypeRef,
    pub slice_type: PyTypeRef,
    pub staticmethod_type: PyTypeRef,
    pub str_type: PyTypeRef,
    pub str_iterator_type: PyTypeRef,
    pub super_type: PyTypeRef,
    pub tuple_type: PyTypeRef,
    pub tuple_iterator_type: PyTypeRef,
    pub type_type: PyTypeRef,
    pub zip_type: PyTypeRef,
}

impl TypeZoo {
    #[cold]
    pub(crate) fn init() -> Self {
        let (type_type, object_type) = crate::object::init_type_hierarchy();
        let open = PyTypeFlags::BASETYPE;
        let closed = PyTypeFlags::empty();
        let new = |name: &str, base: &PyTypeRef, flags| {
            PyType::new_static(name, base, flags, &type_type)
        };

        let int_type = new("int", &object_type, open);
        Self {
            bool_type: new("bool", &int_type, closed),
            bound_method_type: new("method", &object_type, closed),
            builtin_function_or_method_type: new("builtin_function_or_method", &object_type, closed),
            bytes_type: new("bytes", &object_type, open),
            bytes_iterator_type: new("bytes_iterator", &object_type, closed),
            cell_type: new("cell", &object_type, closed),
            classmethod_type: new("classmethod", &object_type, open),
            code_type: new("code", &object_type, closed),
            complex_type: new("complex", &object_type, open),
            dict_type: new("dict", &object_type, open),
            dict_keys_type: new("dict_keys", &object_type, closed),
            dict_values_type: new("dict_values", &object_type, closed),
            dict_items_type: new("dict_items", &object_type, closed),
            dict_keyiterator_type: new("dict_keyiterator", &object_type, closed),
            dict_valueiterator_type: new("dict_valueiterator", &object_type, closed),
            dict_itemiterator_type: new("dict_itemiterator", &object_type, closed),
            ellipsis_type: new("ellipsis", &object_type, closed),
            enumerate_type: new("enumerate", &object_type, open),
            float_type: new("float", &object_type, open),
            frame_type: new("frame", &object_type, closed),
            frozenset_type: new("frozenset", &object_type, open),
            function_type: new("function", &object_type, closed),
            generator_type: new("generator", &object_type, closed),
            iter_type: new("iterator", &object_type, closed),
            list_type: new("list", &object_type, open),
            list_iterator_type: new("list_iterator", &object_type, closed),
            method_descriptor_type: new("method_descriptor", &object_type, closed),
            module_type: new("module", &object_type, open),
            none_type: new("NoneType", &object_type, closed),
            not_implemented_type: new("NotImplementedType", &object_type, closed),
            property_type: new("property", &object_type, open),
            range_type: new("range", &object_type, closed),
            range_iterator_type: new("range_iterator", &object_type, closed),
            reverse_iter_type: new("reversed", &object_type, open),
            set_type: new("set", &object_type, open),
            set_iterator_type: new("set_iterator", &object_type, closed),
            slice_type: new("slice", &object_type, closed),
            staticmethod_type: new("staticmethod", &object_type, open),
            str_type: new("str", &object_type, open),
            str_iterator_type: new("str_iterator", &object_type, closed),
            super_type: new("super", &object_type, open | PyTypeFlags::HAS_GETATTRIBUTE),
            tuple_type: new("tuple", &object_type, open),
            tuple_iterator_type: new("tuple_iterator", &object_type, closed),
            zip_type: new("zip", &object_type, open),
            int_type,
            type_type,
            object_type,
        }
    }

    /// Fill attributes of builtin types.
    #[cold]
    pub(crate) fn extend(context: &Context) {
        object::init(context);
        type_::init(context);
        int::init(context);
        bool_::init(context);
        float::init(context);
        complex::init(context);
        pystr::init(context);
        bytes::init(context);
        tuple::init(context);
        list::init(context);
        dict::init(context);
        set::init(context);
        range::init(context);
        slice::init(context);
        singletons::init(context);
        function::init(context);
        builtin_func::init(context);
        descriptor::init(context);
        staticmethod::init(context);
        classmethod::init(context);
        property::init(context);
        super_::init(context);
        generator::init(context);
        code::init(context);
        module::init(context);
        iter::init(context);
        enumerate::init(context);
        zip::init(context);
        crate::frame::init(context);
    }
}
