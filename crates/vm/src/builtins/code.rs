/*! Infamous code object. The python class `code`

*/

use super::{PyFrozenSet, PyStrRef, PyTupleRef, PyTypeRef};
use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, VirtualMachine,
    bytecode::{CodeObject, ConstantData},
    function::FuncArgs,
    vm::Context,
};
use core::{fmt, ops::Deref};

/// A code object together with its constant pool turned into python objects.
pub struct PyCode {
    pub code: CodeObject,
    pub constants: Box<[PyObjectRef]>,
}

impl Deref for PyCode {
    type Target = CodeObject;
    fn deref(&self) -> &Self::Target {
        &self.code
    }
}

impl PyCode {
    pub fn new(code: CodeObject, vm: &VirtualMachine) -> PyResult<Self> {
        let constants = code
            .constants
            .iter()
            .map(|constant| constant_to_object(constant, vm))
            .collect::<PyResult<_>>()?;
        Ok(Self { code, constants })
    }
}

/// Materializes one constant pool entry. Nested code objects become `code` objects of
/// their own, so `MAKE_FUNCTION` can share them between the functions it creates.
fn constant_to_object(constant: &ConstantData, vm: &VirtualMachine) -> PyResult {
    let ctx = &vm.ctx;
    let many = |elements: &[ConstantData]| -> PyResult<Vec<PyObjectRef>> {
        elements.iter().map(|c| constant_to_object(c, vm)).collect()
    };
    Ok(match constant {
        ConstantData::None => ctx.none(),
        ConstantData::Boolean { value } => ctx.new_bool(*value),
        ConstantData::Integer { value } => ctx.new_int(*value).into(),
        ConstantData::Float { value } => ctx.new_float(*value).into(),
        ConstantData::Complex { real, imag } => ctx.new_complex(*real, *imag).into(),
        ConstantData::Bytes { value } => ctx.new_bytes(value.clone()).into(),
        ConstantData::Str { value } => ctx.new_str(value.as_str()).into(),
        ConstantData::Tuple { elements } => ctx.new_tuple(many(elements)?).into(),
        ConstantData::List { elements } => ctx.new_list(many(elements)?).into(),
        ConstantData::Set { elements } => {
            let set = ctx.new_set();
            for element in many(elements)? {
                set.add(element, vm)?;
            }
            set.into()
        }
        ConstantData::FrozenSet { elements } => {
            PyFrozenSet::from_elements(many(elements)?, vm)?.into()
        }
        ConstantData::Dict { entries } => {
            let dict = ctx.new_dict();
            for (key, value) in entries {
                let key = constant_to_object(key, vm)?;
                dict.set_item(&key, constant_to_object(value, vm)?, vm)?;
            }
            dict.into()
        }
        ConstantData::Code { code } => vm.new_code((**code).clone())?.into(),
    })
}

impl fmt::Debug for PyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code: {:?}", self.code)
    }
}

impl PyPayload for PyCode {
    #[inline]
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.code_type
    }
}

fn code_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyCode>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    Ok(vm
        .ctx
        .new_str(format!(
            "<code object {} at {:#x}, file {:?}, line {}>",
            zelf.name,
            zelf.get_id(),
            zelf.filename,
            zelf.firstlineno
        ))
        .into())
}

fn names_tuple(names: &[String], vm: &VirtualMachine) -> PyTupleRef {
    vm.ctx.new_tuple(
        names
            .iter()
            .map(|name| vm.ctx.new_str(name.as_str()).into())
            .collect(),
    )
}

fn zelf(args: FuncArgs, name: &str, vm: &VirtualMachine) -> PyResult<PyRef<PyCode>> {
    let [zelf] = args.bind(name, vm)?;
    zelf.try_downcast(vm)
}

macro_rules! code_getters {
    ($ctx:expr, { $($name:literal => |$zelf:ident, $vm:ident| $body:expr),* $(,)? }) => {
        extend_class!($ctx, &$ctx.types.code_type, {
            $(
                $name => $ctx.new_readonly_getset($name, |$vm, args| {
                    let $zelf = zelf(args, $name, $vm)?;
                    Ok($body)
                }),
            )*
        });
    };
}

fn str_obj(s: &str, vm: &VirtualMachine) -> PyObjectRef {
    let s: PyStrRef = vm.ctx.new_str(s);
    s.into()
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.code_type, {
        "__repr__" => ctx.new_method("__repr__", code_repr),
    });
    code_getters!(ctx, {
        "co_name" => |zelf, vm| str_obj(&zelf.name, vm),
        "co_filename" => |zelf, vm| str_obj(&zelf.filename, vm),
        "co_firstlineno" => |zelf, vm| vm.ctx.new_int(zelf.firstlineno).into(),
        "co_argcount" => |zelf, vm| vm.ctx.new_int(zelf.argcount).into(),
        "co_posonlyargcount" => |zelf, vm| vm.ctx.new_int(zelf.posonlyargcount).into(),
        "co_kwonlyargcount" => |zelf, vm| vm.ctx.new_int(zelf.kwonlyargcount).into(),
        "co_nlocals" => |zelf, vm| vm.ctx.new_int(zelf.nlocals).into(),
        "co_stacksize" => |zelf, vm| vm.ctx.new_int(zelf.stacksize).into(),
        "co_flags" => |zelf, vm| vm.ctx.new_int(zelf.flags.bits()).into(),
        "co_code" => |zelf, vm| vm.ctx.new_bytes(zelf.code.code.clone()).into(),
        "co_lnotab" => |zelf, vm| vm.ctx.new_bytes(zelf.lnotab.clone()).into(),
        "co_consts" => |zelf, vm| vm.ctx.new_tuple(zelf.constants.to_vec()).into(),
        "co_names" => |zelf, vm| names_tuple(&zelf.names, vm).into(),
        "co_varnames" => |zelf, vm| names_tuple(&zelf.varnames, vm).into(),
        "co_freevars" => |zelf, vm| names_tuple(&zelf.freevars, vm).into(),
        "co_cellvars" => |zelf, vm| names_tuple(&zelf.cellvars, vm).into(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Interpreter,
        builtins::{PyInt, PyTuple},
        bytecode::CodeBuilder,
    };
    use num_traits::ToPrimitive;

    #[test]
    fn constants_become_objects() {
        Interpreter::new(Default::default()).enter(|vm| {
            let mut builder = CodeBuilder::new("<module>");
            builder.load_const(ConstantData::Tuple {
                elements: vec![
                    ConstantData::Integer { value: 1 },
                    ConstantData::Str {
                        value: "a".to_owned(),
                    },
                ],
            });
            builder.return_value();
            let code = vm.new_code(builder.finish().unwrap()).unwrap();
            let tuple = code.constants[0].payload::<PyTuple>().unwrap();
            assert_eq!(tuple.len(), 2);
            let first = tuple[0].payload::<PyInt>().unwrap();
            assert_eq!(first.as_bigint().to_i64(), Some(1));
            assert!(code.constants[0].class().is(&vm.ctx.types.tuple_type));
        })
    }
}
