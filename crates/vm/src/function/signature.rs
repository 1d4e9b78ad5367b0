//! Binding call arguments to the parameters of a python function.

use super::FuncArgs;
use crate::{PyObjectRef, PyResult, VirtualMachine, bytecode::CodeObject};
use indexmap::IndexMap;
use itertools::Itertools;
use std::collections::HashMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParameterKind {
    /// A named parameter that can be filled by position (positional-only ones included).
    Positional,
    /// `*args`
    PositionalStar,
    /// A keyword-only parameter.
    Keyword,
    /// `**kwargs`
    KeywordStar,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
}

/// Parameter name to value, in parameter order.
pub type BoundArgs = IndexMap<String, PyObjectRef>;

/// The parameter list of a callable plus the defaults of its optional parameters.
#[derive(Clone, Debug)]
pub struct Signature {
    /// Name used in error messages.
    pub name: String,
    pub parameters: Vec<Parameter>,
    /// How many leading positional parameters are positional-only.
    pub posonly: usize,
    pub defaults: HashMap<String, PyObjectRef>,
}

impl Signature {
    pub fn new(name: impl Into<String>, parameters: Vec<Parameter>) -> Self {
        Self {
            name: name.into(),
            parameters,
            posonly: 0,
            defaults: HashMap::new(),
        }
    }

    /// Reads the parameter list out of a code object. `defaults` fill the trailing positional
    /// parameters, `kwdefaults` the keyword-only ones.
    pub fn from_code(
        name: impl Into<String>,
        code: &CodeObject,
        defaults: &[PyObjectRef],
        kwdefaults: impl IntoIterator<Item = (String, PyObjectRef)>,
    ) -> Self {
        let names = code.arg_names();
        let mut parameters = Vec::new();
        let positional = names.posonlyargs.iter().chain(names.args);
        parameters.extend(positional.map(|name| Parameter {
            name: name.clone(),
            kind: ParameterKind::Positional,
        }));
        if let Some(vararg) = names.vararg {
            parameters.push(Parameter {
                name: vararg.to_owned(),
                kind: ParameterKind::PositionalStar,
            });
        }
        parameters.extend(names.kwonlyargs.iter().map(|name| Parameter {
            name: name.clone(),
            kind: ParameterKind::Keyword,
        }));
        if let Some(varkwarg) = names.varkwarg {
            parameters.push(Parameter {
                name: varkwarg.to_owned(),
                kind: ParameterKind::KeywordStar,
            });
        }

        let positional_names = names.posonlyargs.iter().chain(names.args).collect::<Vec<_>>();
        let first_default = positional_names.len().saturating_sub(defaults.len());
        let mut default_map = HashMap::new();
        for (name, value) in positional_names[first_default..].iter().zip(defaults) {
            default_map.insert((*name).clone(), value.clone());
        }
        default_map.extend(kwdefaults);

        Self {
            name: name.into(),
            parameters,
            posonly: names.posonlyargs.len(),
            defaults: default_map,
        }
    }

    fn of_kind(&self, kind: ParameterKind) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(move |p| p.kind == kind)
    }

    fn star(&self, kind: ParameterKind) -> Option<&Parameter> {
        self.of_kind(kind).next()
    }

    /// Binds positional and keyword arguments to parameters, or raises the TypeError CPython
    /// raises for the same mismatch.
    pub fn bind(&self, args: FuncArgs, vm: &VirtualMachine) -> PyResult<BoundArgs> {
        let FuncArgs { args, kwargs } = args;
        let positional = self.of_kind(ParameterKind::Positional).collect::<Vec<_>>();
        let given = args.len();
        let mut bound = HashMap::<&str, PyObjectRef>::new();

        let mut args = args.into_iter();
        for (param, value) in positional.iter().zip(args.by_ref()) {
            bound.insert(&param.name, value);
        }
        let rest = args.collect::<Vec<_>>();
        let mut star_args = match self.star(ParameterKind::PositionalStar) {
            Some(_) => Some(rest),
            None if rest.is_empty() => None,
            None => return Err(vm.new_type_error(self.too_many_positional(positional.len(), given, &kwargs))),
        };

        let varkw = self.star(ParameterKind::KeywordStar);
        let mut extra_kwargs = IndexMap::new();
        let mut posonly_as_keyword = Vec::new();
        for (key, value) in kwargs {
            let position = self.parameters.iter().position(|p| {
                p.name == key && matches!(p.kind, ParameterKind::Positional | ParameterKind::Keyword)
            });
            match position {
                Some(i) if i < self.posonly => {
                    if varkw.is_some() {
                        extra_kwargs.insert(key, value);
                    } else {
                        posonly_as_keyword.push(key);
                    }
                }
                Some(i) => {
                    let name = self.parameters[i].name.as_str();
                    if bound.contains_key(name) {
                        return Err(vm.new_type_error(format!(
                            "{}() got multiple values for argument '{name}'",
                            self.name
                        )));
                    }
                    bound.insert(name, value);
                }
                None if varkw.is_some() => {
                    extra_kwargs.insert(key, value);
                }
                None => {
                    return Err(vm.new_type_error(format!(
                        "{}() got an unexpected keyword argument '{key}'",
                        self.name
                    )));
                }
            }
        }
        if !posonly_as_keyword.is_empty() {
            return Err(vm.new_type_error(format!(
                "{}() got some positional-only arguments passed as keyword arguments: '{}'",
                self.name,
                posonly_as_keyword.join(", ")
            )));
        }

        for kind in [ParameterKind::Positional, ParameterKind::Keyword] {
            let mut missing = Vec::new();
            for param in self.of_kind(kind) {
                if bound.contains_key(param.name.as_str()) {
                    continue;
                }
                match self.defaults.get(&param.name) {
                    Some(default) => {
                        bound.insert(&param.name, default.clone());
                    }
                    None => missing.push(param.name.as_str()),
                }
            }
            if !missing.is_empty() {
                return Err(vm.new_type_error(self.missing_arguments(kind, &missing)));
            }
        }

        let mut result = BoundArgs::with_capacity(self.parameters.len());
        for param in &self.parameters {
            let value = match param.kind {
                ParameterKind::Positional | ParameterKind::Keyword => bound.remove(param.name.as_str()),
                ParameterKind::PositionalStar => star_args
                    .take()
                    .map(|rest| vm.ctx.new_tuple(rest).into()),
                ParameterKind::KeywordStar => {
                    let dict = vm.ctx.new_dict();
                    for (key, value) in &extra_kwargs {
                        dict.set_item_str(key, value.clone(), vm);
                    }
                    Some(dict.into())
                }
            };
            if let Some(value) = value {
                result.insert(param.name.clone(), value);
            }
        }
        Ok(result)
    }

    fn too_many_positional(
        &self,
        max: usize,
        given: usize,
        kwargs: &IndexMap<String, PyObjectRef>,
    ) -> String {
        let min = self
            .of_kind(ParameterKind::Positional)
            .filter(|p| !self.defaults.contains_key(&p.name))
            .count();
        let takes = if min == max {
            format!("{max} positional argument{}", plural(max))
        } else {
            format!("from {min} to {max} positional arguments")
        };
        let kw_given = self
            .of_kind(ParameterKind::Keyword)
            .filter(|p| kwargs.contains_key(&p.name))
            .count();
        let was = if given == 1 && kw_given == 0 { "was" } else { "were" };
        if kw_given > 0 {
            format!(
                "{}() takes {takes} but {given} positional argument{} (and {kw_given} keyword-only argument{}) were given",
                self.name,
                plural(given),
                plural(kw_given)
            )
        } else {
            format!("{}() takes {takes} but {given} {was} given", self.name)
        }
    }

    fn missing_arguments(&self, kind: ParameterKind, missing: &[&str]) -> String {
        let what = match kind {
            ParameterKind::Keyword => "keyword-only",
            _ => "positional",
        };
        let quoted = missing.iter().map(|name| format!("'{name}'")).collect::<Vec<_>>();
        let names = match quoted.as_slice() {
            [] => String::new(),
            [one] => one.clone(),
            [init @ .., last] => {
                let sep = if init.len() > 1 { ", and " } else { " and " };
                format!("{}{sep}{last}", init.iter().join(", "))
            }
        };
        format!(
            "{}() missing {} required {what} argument{}: {names}",
            self.name,
            missing.len(),
            plural(missing.len())
        )
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Interpreter;

    fn params(spec: &[(&str, ParameterKind)]) -> Vec<Parameter> {
        spec.iter()
            .map(|&(name, kind)| Parameter {
                name: name.to_owned(),
                kind,
            })
            .collect()
    }

    fn int(vm: &VirtualMachine, i: i64) -> PyObjectRef {
        vm.ctx.new_int(i).into()
    }

    fn message(err: crate::builtins::PyBaseExceptionRef, vm: &VirtualMachine) -> String {
        err.as_object().str(vm).unwrap().as_str().to_owned()
    }

    #[test]
    fn exact_positional_binding() {
        Interpreter::new(Default::default()).enter(|vm| {
            use ParameterKind::*;
            let sig = Signature::new("f", params(&[("a", Positional), ("b", Positional)]));
            let bound = sig
                .bind(FuncArgs::from(vec![int(vm, 1), int(vm, 2)]), vm)
                .unwrap();
            assert_eq!(bound.keys().collect::<Vec<_>>(), ["a", "b"]);

            let err = sig
                .bind(FuncArgs::from(vec![int(vm, 1), int(vm, 2), int(vm, 3)]), vm)
                .unwrap_err();
            assert_eq!(
                message(err, vm),
                "f() takes 2 positional arguments but 3 were given"
            );

            let err = sig.bind(FuncArgs::default(), vm).unwrap_err();
            assert_eq!(
                message(err, vm),
                "f() missing 2 required positional arguments: 'a' and 'b'"
            );
        })
    }

    #[test]
    fn star_parameters_collect_the_rest() {
        Interpreter::new(Default::default()).enter(|vm| {
            use ParameterKind::*;
            let sig = Signature::new(
                "g",
                params(&[("a", Positional), ("args", PositionalStar), ("kw", KeywordStar)]),
            );
            let mut kwargs = IndexMap::new();
            kwargs.insert("x".to_owned(), int(vm, 9));
            let bound = sig
                .bind(FuncArgs::new(vec![int(vm, 1), int(vm, 2), int(vm, 3)], kwargs), vm)
                .unwrap();
            assert_eq!(bound["args"].length(vm).unwrap(), 2);
            assert_eq!(bound["kw"].length(vm).unwrap(), 1);
        })
    }

    #[test]
    fn keyword_only_and_defaults() {
        Interpreter::new(Default::default()).enter(|vm| {
            use ParameterKind::*;
            let mut sig = Signature::new("h", params(&[("a", Positional), ("b", Positional), ("k", Keyword)]));
            sig.defaults.insert("b".to_owned(), int(vm, 5));

            let err = sig.bind(FuncArgs::from(vec![int(vm, 1)]), vm).unwrap_err();
            assert_eq!(
                message(err, vm),
                "h() missing 1 required keyword-only argument: 'k'"
            );

            let mut kwargs = IndexMap::new();
            kwargs.insert("k".to_owned(), int(vm, 3));
            let bound = sig
                .bind(FuncArgs::new(vec![int(vm, 1)], kwargs), vm)
                .unwrap();
            assert_eq!(bound.len(), 3);
            assert!(bound["b"].is(&sig.defaults["b"]));

            let err = sig
                .bind(FuncArgs::from(vec![int(vm, 1), int(vm, 2), int(vm, 3)]), vm)
                .unwrap_err();
            assert_eq!(
                message(err, vm),
                "h() takes from 1 to 2 positional arguments but 3 were given"
            );
        })
    }

    #[test]
    fn duplicate_and_unknown_keywords() {
        Interpreter::new(Default::default()).enter(|vm| {
            use ParameterKind::*;
            let sig = Signature::new("f", params(&[("a", Positional)]));
            let mut kwargs = IndexMap::new();
            kwargs.insert("a".to_owned(), int(vm, 2));
            let err = sig
                .bind(FuncArgs::new(vec![int(vm, 1)], kwargs), vm)
                .unwrap_err();
            assert_eq!(message(err, vm), "f() got multiple values for argument 'a'");

            let mut kwargs = IndexMap::new();
            kwargs.insert("zz".to_owned(), int(vm, 2));
            let err = sig
                .bind(FuncArgs::new(vec![int(vm, 1)], kwargs), vm)
                .unwrap_err();
            assert_eq!(message(err, vm), "f() got an unexpected keyword argument 'zz'");
        })
    }

    #[test]
    fn posonly_parameters_reject_keywords() {
        Interpreter::new(Default::default()).enter(|vm| {
            use ParameterKind::*;
            let mut sig = Signature::new("p", params(&[("a", Positional), ("b", Positional)]));
            sig.posonly = 1;
            let mut kwargs = IndexMap::new();
            kwargs.insert("a".to_owned(), int(vm, 1));
            kwargs.insert("b".to_owned(), int(vm, 2));
            let err = sig.bind(FuncArgs::new(vec![], kwargs), vm).unwrap_err();
            assert_eq!(
                message(err, vm),
                "p() got some positional-only arguments passed as keyword arguments: 'a'"
            );
        })
    }
}
