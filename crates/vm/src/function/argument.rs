use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, VirtualMachine, builtins::PyBaseExceptionRef,
    convert::ToPyObject,
};
use indexmap::IndexMap;
use itertools::Itertools;

pub trait IntoFuncArgs: Sized {
    fn into_args(self, vm: &VirtualMachine) -> FuncArgs;
    fn into_method_args(self, obj: PyObjectRef, vm: &VirtualMachine) -> FuncArgs {
        let mut args = self.into_args(vm);
        args.prepend_arg(obj);
        args
    }
}

impl IntoFuncArgs for FuncArgs {
    #[inline]
    fn into_args(self, _vm: &VirtualMachine) -> FuncArgs {
        self
    }
}

impl IntoFuncArgs for Vec<PyObjectRef> {
    #[inline]
    fn into_args(self, _vm: &VirtualMachine) -> FuncArgs {
        FuncArgs::from(self)
    }
}

impl IntoFuncArgs for () {
    #[inline]
    fn into_args(self, _vm: &VirtualMachine) -> FuncArgs {
        FuncArgs::default()
    }
}

// A tuple of values that each implement `ToPyObject` represents a sequence of
// arguments that can be passed to a callable.
macro_rules! into_func_args_from_tuple {
    ($(($n:tt, $T:ident)),*) => {
        impl<$($T,)*> IntoFuncArgs for ($($T,)*)
        where
            $($T: ToPyObject,)*
        {
            #[inline]
            fn into_args(self, vm: &VirtualMachine) -> FuncArgs {
                let ($($n,)*) = self;
                FuncArgs::from(vec![$($n.to_pyobject(vm),)*])
            }

            #[inline]
            fn into_method_args(self, obj: PyObjectRef, vm: &VirtualMachine) -> FuncArgs {
                let ($($n,)*) = self;
                FuncArgs::from(vec![obj, $($n.to_pyobject(vm),)*])
            }
        }
    };
}

into_func_args_from_tuple!((v1, T1));
into_func_args_from_tuple!((v1, T1), (v2, T2));
into_func_args_from_tuple!((v1, T1), (v2, T2), (v3, T3));

/// Positional and keyword arguments of a call, as they arrive at a callable.
#[derive(Debug, Default, Clone)]
pub struct FuncArgs {
    pub args: Vec<PyObjectRef>,
    // keeps call order, as PEP 468 requires
    pub kwargs: IndexMap<String, PyObjectRef>,
}

impl From<Vec<PyObjectRef>> for FuncArgs {
    fn from(args: Vec<PyObjectRef>) -> Self {
        Self {
            args,
            kwargs: IndexMap::new(),
        }
    }
}

impl FuncArgs {
    pub fn new(args: Vec<PyObjectRef>, kwargs: IndexMap<String, PyObjectRef>) -> Self {
        Self { args, kwargs }
    }

    /// Splits the operands of a keyword call: the last `kwarg_names.len()` values are the
    /// keyword arguments, in the order the names list them.
    pub fn with_kwargs_names<A, KW>(mut args: A, kwarg_names: KW) -> Self
    where
        A: ExactSizeIterator<Item = PyObjectRef>,
        KW: ExactSizeIterator<Item = String>,
    {
        let total_argc = args.len();
        let kwarg_count = kwarg_names.len();
        let pos_arg_count = total_argc.saturating_sub(kwarg_count);

        let pos_args = args.by_ref().take(pos_arg_count).collect();
        let kwargs = kwarg_names.zip_eq(args).collect::<IndexMap<_, _>>();

        Self {
            args: pos_args,
            kwargs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    pub fn prepend_arg(&mut self, item: PyObjectRef) {
        self.args.reserve_exact(1);
        self.args.insert(0, item)
    }

    pub fn take_positional(&mut self) -> Option<PyObjectRef> {
        if self.args.is_empty() {
            None
        } else {
            Some(self.args.remove(0))
        }
    }

    /// Removes the receiver of a native method or constructor.
    pub fn take_first(&mut self, name: &str, vm: &VirtualMachine) -> PyResult<PyObjectRef> {
        self.take_positional()
            .ok_or_else(|| vm.new_type_error(format!("{name}() needs an argument")))
    }

    /// Removes the receiver of a native method, which must carry a `T` payload.
    pub fn take_zelf<T: PyPayload>(
        &mut self,
        name: &str,
        vm: &VirtualMachine,
    ) -> PyResult<PyRef<T>> {
        let zelf = self.take_first(name, vm)?;
        zelf.downcast::<T>().map_err(|obj| {
            vm.new_type_error(format!(
                "descriptor '{name}' requires a '{}' object but received a '{}'",
                T::class(&vm.ctx).name(),
                obj.class().name()
            ))
        })
    }

    pub fn take_keyword(&mut self, name: &str) -> Option<PyObjectRef> {
        self.kwargs.shift_remove(name)
    }

    pub fn check_kwargs_empty(&self, name: &str, vm: &VirtualMachine) -> PyResult<()> {
        match self.kwargs.keys().next() {
            Some(k) => Err(ArgumentError::InvalidKeywordArgument(k.clone()).into_exception(name, vm)),
            None => Ok(()),
        }
    }

    /// Binds exactly `N` positional arguments and no keywords.
    pub fn bind<const N: usize>(
        self,
        name: &str,
        vm: &VirtualMachine,
    ) -> PyResult<[PyObjectRef; N]> {
        self.check_kwargs_empty(name, vm)?;
        let given = self.args.len();
        <[PyObjectRef; N]>::try_from(self.args).map_err(|_| {
            ArgumentError::WrongCount {
                min: N,
                max: N,
                given,
            }
            .into_exception(name, vm)
        })
    }

    /// Binds between `min` and `N` positional arguments; the missing trailing ones are `None`.
    pub fn bind_optional<const N: usize>(
        self,
        name: &str,
        min: usize,
        vm: &VirtualMachine,
    ) -> PyResult<[Option<PyObjectRef>; N]> {
        self.check_kwargs_empty(name, vm)?;
        let given = self.args.len();
        if given < min || given > N {
            return Err(ArgumentError::WrongCount { min, max: N, given }.into_exception(name, vm));
        }
        let mut args = self.args.into_iter();
        Ok(core::array::from_fn(|_| args.next()))
    }
}

/// An error encountered while binding the arguments of a call to a native function.
#[derive(Debug)]
pub enum ArgumentError {
    /// The call provided a positional argument count outside `min..=max`.
    WrongCount { min: usize, max: usize, given: usize },
    /// The function doesn't accept a keyword argument with the given name.
    InvalidKeywordArgument(String),
}

impl ArgumentError {
    pub fn into_exception(self, name: &str, vm: &VirtualMachine) -> PyBaseExceptionRef {
        let msg = match self {
            Self::WrongCount { min, max, given } if min == max => match min {
                0 => format!("{name}() takes no arguments ({given} given)"),
                1 => format!("{name}() takes exactly one argument ({given} given)"),
                n => format!("{name}() takes exactly {n} arguments ({given} given)"),
            },
            Self::WrongCount { min, given, .. } if given < min => {
                format!("{name}() expected at least {min} arguments, got {given}")
            }
            Self::WrongCount { max, given, .. } => {
                format!("{name}() expected at most {max} arguments, got {given}")
            }
            Self::InvalidKeywordArgument(kw) => {
                format!("{name}() got an unexpected keyword argument '{kw}'")
            }
        };
        vm.new_type_error(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Interpreter;

    #[test]
    fn keyword_names_take_the_trailing_values() {
        Interpreter::new(Default::default()).enter(|vm| {
            let values = (1..=4).map(|i| vm.ctx.new_int(i).into()).collect::<Vec<PyObjectRef>>();
            let args = FuncArgs::with_kwargs_names(
                values.into_iter(),
                ["c".to_owned(), "d".to_owned()].into_iter(),
            );
            assert_eq!(args.args.len(), 2);
            assert_eq!(args.kwargs.keys().collect::<Vec<_>>(), ["c", "d"]);
        })
    }

    #[test]
    fn native_binding_counts_arguments() {
        Interpreter::new(Default::default()).enter(|vm| {
            let one: PyObjectRef = vm.ctx.new_int(1).into();
            let args = FuncArgs::from(vec![one.clone(), one.clone()]);
            let err = args.clone().bind::<1>("len", vm).unwrap_err();
            assert!(err.class().is(&vm.ctx.exceptions.type_error));
            let [a, b] = args.clone().bind::<2>("f", vm).unwrap();
            assert!(a.is(&b));
            let [x, y, z] = args.bind_optional::<3>("g", 1, vm).unwrap();
            assert!(x.is_some() && y.is_some() && z.is_none());
        })
    }
}
