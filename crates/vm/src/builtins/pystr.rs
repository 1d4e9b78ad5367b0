use super::{
    PyInt, PyTuple, PyTypeRef,
    sequence::{self, SequenceIndex},
};
use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, VirtualMachine,
    function::FuncArgs,
    hash,
    types::PyComparisonOp,
    vm::Context,
};
use core::{cell::Cell, fmt};

/// An immutable unicode string. Indexing is by code point.
pub struct PyStr {
    value: String,
    /// Number of code points, computed on first use.
    char_len: Cell<Option<usize>>,
}

pub type PyStrRef = PyRef<PyStr>;

impl fmt::Debug for PyStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl fmt::Display for PyStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl From<&str> for PyStr {
    fn from(s: &str) -> Self {
        s.to_owned().into()
    }
}

impl From<String> for PyStr {
    fn from(value: String) -> Self {
        Self {
            value,
            char_len: Cell::new(None),
        }
    }
}

impl PyPayload for PyStr {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.str_type
    }

    fn into_pyobject(self, vm: &VirtualMachine) -> PyObjectRef {
        vm.ctx.new_str(self.value).into()
    }
}

impl PyStr {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn char_len(&self) -> usize {
        if let Some(len) = self.char_len.get() {
            return len;
        }
        let len = if self.value.is_ascii() {
            self.value.len()
        } else {
            self.value.chars().count()
        };
        self.char_len.set(Some(len));
        len
    }

    fn chars(&self) -> Vec<char> {
        self.value.chars().collect()
    }

    fn char_at(&self, index: usize) -> Option<char> {
        if self.value.is_ascii() {
            self.value.as_bytes().get(index).map(|&b| b as char)
        } else {
            self.value.chars().nth(index)
        }
    }
}

/// `repr()` of a string: single quotes unless the text contains single quotes only,
/// with control characters escaped.
pub(crate) fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn other_str<'a>(other: &'a PyObjectRef) -> Option<&'a str> {
    other.payload::<PyStr>().map(PyStr::as_str)
}

fn arg_str(obj: &PyObjectRef, what: &str, vm: &VirtualMachine) -> PyResult<String> {
    obj.payload::<PyStr>()
        .map(|s| s.as_str().to_owned())
        .ok_or_else(|| {
            vm.new_type_error(format!(
                "{what} must be str, not {}",
                obj.class().name()
            ))
        })
}

fn str_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("str.__new__", vm)?.try_into_value(vm)?;
    let [x] = args.bind_optional::<1>("str", 0, vm)?;
    let string = match x {
        Some(x) => x.str(vm)?,
        None => vm.ctx.empty_str.clone(),
    };
    if cls.is(&vm.ctx.types.str_type) {
        Ok(string.into())
    } else {
        Ok(PyStr::from(string.as_str())
            .into_ref_with_type(vm, cls)?
            .into())
    }
}

fn str_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    Ok(vm.ctx.new_str(repr_str(zelf.as_str())).into())
}

fn str_str(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("__str__", vm)?;
    args.bind::<0>("__str__", vm)?;
    if zelf.class().is(&vm.ctx.types.str_type) {
        Ok(zelf.into())
    } else {
        Ok(vm.ctx.new_str(zelf.as_str()).into())
    }
}

fn str_hash(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("__hash__", vm)?;
    args.bind::<0>("__hash__", vm)?;
    Ok(vm.ctx.new_int(hash::hash_str(zelf.as_str())).into())
}

fn str_cmp(vm: &VirtualMachine, mut args: FuncArgs, op: PyComparisonOp) -> PyResult {
    let zelf = args.take_zelf::<PyStr>(op.method_name(), vm)?;
    let [other] = args.bind(op.method_name(), vm)?;
    Ok(match other_str(&other) {
        Some(other) => vm.ctx.new_bool(op.eval_ord(zelf.as_str().cmp(other))),
        None => vm.ctx.not_implemented(),
    })
}

fn str_add(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("__add__", vm)?;
    let [other] = args.bind("__add__", vm)?;
    match other_str(&other) {
        Some(other) => Ok(vm.ctx.new_str(format!("{}{other}", zelf.as_str())).into()),
        None => Err(vm.new_type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            other.class().name()
        ))),
    }
}

fn str_mul(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("__mul__", vm)?;
    let [times] = args.bind("__mul__", vm)?;
    if !times.payload_is::<PyInt>() {
        return Ok(vm.ctx.not_implemented());
    }
    let times: isize = times.try_into_value(vm)?;
    let bytes = sequence::repeat(zelf.as_str().as_bytes(), times, vm)?;
    let repeated = String::from_utf8(bytes)
        .map_err(|_| vm.new_system_error("repeated str is not valid UTF-8"))?;
    Ok(vm.ctx.new_str(repeated).into())
}

fn str_len(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("__len__", vm)?;
    args.bind::<0>("__len__", vm)?;
    Ok(vm.ctx.new_int(zelf.char_len()).into())
}

fn str_contains(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("__contains__", vm)?;
    let [needle] = args.bind("__contains__", vm)?;
    match other_str(&needle) {
        Some(needle) => Ok(vm.ctx.new_bool(zelf.as_str().contains(needle))),
        None => Err(vm.new_type_error(format!(
            "'in <string>' requires string as left operand, not {}",
            needle.class().name()
        ))),
    }
}

fn str_getitem(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("__getitem__", vm)?;
    let [needle] = args.bind("__getitem__", vm)?;
    match SequenceIndex::try_from_object(vm, needle, "string")? {
        SequenceIndex::Int(i) => {
            let c = sequence::wrap_index(i, zelf.char_len())
                .and_then(|i| zelf.char_at(i))
                .ok_or_else(|| vm.new_index_error("string index out of range"))?;
            Ok(vm.ctx.new_str(c.to_string()).into())
        }
        SequenceIndex::Slice(slice) => {
            let chars = zelf.chars();
            let picked = sequence::slice_elements(&chars, &slice, vm)?;
            Ok(vm.ctx.new_str(picked.into_iter().collect::<String>()).into())
        }
    }
}

fn str_iter(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("__iter__", vm)?;
    args.bind::<0>("__iter__", vm)?;
    Ok(PyStrIterator {
        string: zelf,
        position: Cell::new(0),
    }
    .into_ref(&vm.ctx)
    .into())
}

fn str_format_method(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("__format__", vm)?;
    let [spec] = args.bind("__format__", vm)?;
    let spec = arg_str(&spec, "format spec", vm)?;
    if !spec.is_empty() {
        return Err(vm.new_value_error(format!(
            "unsupported format string passed to {}.__format__",
            zelf.class().name()
        )));
    }
    str_str(vm, FuncArgs::from(vec![zelf.into()]))
}

fn str_join(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("join", vm)?;
    let [iterable] = args.bind("join", vm)?;
    let items = vm.extract_elements(&iterable)?;
    let mut parts = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match other_str(item) {
            Some(s) => parts.push(s),
            None => {
                return Err(vm.new_type_error(format!(
                    "sequence item {i}: expected str instance, {} found",
                    item.class().name()
                )));
            }
        }
    }
    Ok(vm.ctx.new_str(parts.join(zelf.as_str())).into())
}

fn str_split(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("split", vm)?;
    let sep_kw = args.take_keyword("sep");
    let maxsplit_kw = args.take_keyword("maxsplit");
    let [sep, maxsplit] = args.bind_optional::<2>("split", 0, vm)?;
    let sep = sep.or(sep_kw).and_then(|s| vm.option_if_none(s));
    let maxsplit: isize = match maxsplit.or(maxsplit_kw) {
        Some(n) => n.try_into_value(vm)?,
        None => -1,
    };
    let limit = if maxsplit < 0 {
        usize::MAX
    } else {
        maxsplit as usize
    };
    let s = zelf.as_str();
    let parts: Vec<String> = match sep {
        Some(sep) => {
            let sep = arg_str(&sep, "separator", vm)?;
            if sep.is_empty() {
                return Err(vm.new_value_error("empty separator"));
            }
            s.splitn(limit.saturating_add(1), sep.as_str())
                .map(str::to_owned)
                .collect()
        }
        None => split_whitespace(s, limit),
    };
    let items = parts
        .into_iter()
        .map(|p| vm.ctx.new_str(p).into())
        .collect();
    Ok(vm.ctx.new_list(items).into())
}

/// `str.split()` without a separator: runs of whitespace separate, and leading or trailing
/// whitespace produces no empty strings.
fn split_whitespace(s: &str, limit: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if parts.len() == limit {
            parts.push(rest.to_owned());
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        parts.push(rest[..end].to_owned());
        rest = rest[end..].trim_start();
    }
    parts
}

fn strip_chars(vm: &VirtualMachine, mut args: FuncArgs, name: &str, left: bool, right: bool) -> PyResult {
    let zelf = args.take_zelf::<PyStr>(name, vm)?;
    let [chars] = args.bind_optional::<1>(name, 0, vm)?;
    let chars = chars.and_then(|c| vm.option_if_none(c));
    let s = zelf.as_str();
    let stripped = match chars {
        None => match (left, right) {
            (true, true) => s.trim(),
            (true, false) => s.trim_start(),
            _ => s.trim_end(),
        },
        Some(chars) => {
            let chars = arg_str(&chars, &format!("{name} arg"), vm)?;
            let set = |c: char| chars.contains(c);
            match (left, right) {
                (true, true) => s.trim_matches(set),
                (true, false) => s.trim_start_matches(set),
                _ => s.trim_end_matches(set),
            }
        }
    };
    Ok(vm.ctx.new_str(stripped).into())
}

fn str_encode(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("encode", vm)?;
    let encoding_kw = args.take_keyword("encoding");
    let [encoding] = args.bind_optional::<1>("encode", 0, vm)?;
    let encoding = match encoding.or(encoding_kw) {
        Some(encoding) => arg_str(&encoding, "encode() argument 'encoding'", vm)?,
        None => "utf-8".to_owned(),
    };
    let bytes = super::bytes::encode(zelf.as_str(), &encoding, vm)?;
    Ok(vm.ctx.new_bytes(bytes).into())
}

fn str_upper(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("upper", vm)?;
    args.bind::<0>("upper", vm)?;
    Ok(vm.ctx.new_str(zelf.as_str().to_uppercase()).into())
}

fn str_lower(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("lower", vm)?;
    args.bind::<0>("lower", vm)?;
    Ok(vm.ctx.new_str(zelf.as_str().to_lowercase()).into())
}

fn affix_match(
    vm: &VirtualMachine,
    mut args: FuncArgs,
    name: &str,
    test: fn(&str, &str) -> bool,
) -> PyResult {
    let zelf = args.take_zelf::<PyStr>(name, vm)?;
    let [affix] = args.bind(name, vm)?;
    let s = zelf.as_str();
    if let Some(tuple) = affix.payload::<PyTuple>() {
        for item in tuple.iter() {
            let item = arg_str(item, &format!("tuple for {name}"), vm)?;
            if test(s, &item) {
                return Ok(vm.ctx.new_bool(true));
            }
        }
        return Ok(vm.ctx.new_bool(false));
    }
    match other_str(&affix) {
        Some(affix) => Ok(vm.ctx.new_bool(test(s, affix))),
        None => Err(vm.new_type_error(format!(
            "{name} first arg must be str or a tuple of str, not {}",
            affix.class().name()
        ))),
    }
}

fn str_replace(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("replace", vm)?;
    let [old, new, count] = args.bind_optional::<3>("replace", 2, vm)?;
    let (Some(old), Some(new)) = (old, new) else {
        return Err(vm.new_type_error("replace expected at least 2 arguments"));
    };
    let old = arg_str(&old, "replace() argument 1", vm)?;
    let new = arg_str(&new, "replace() argument 2", vm)?;
    let count: isize = match count {
        Some(count) => count.try_into_value(vm)?,
        None => -1,
    };
    let s = zelf.as_str();
    let replaced = if count < 0 {
        s.replace(&old, &new)
    } else {
        s.replacen(&old, &new, count as usize)
    };
    Ok(vm.ctx.new_str(replaced).into())
}

fn str_find(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("find", vm)?;
    let [needle] = args.bind("find", vm)?;
    let needle = arg_str(&needle, "find() argument", vm)?;
    let s = zelf.as_str();
    let position = match s.find(&needle) {
        Some(byte_index) => s[..byte_index].chars().count() as i64,
        None => -1,
    };
    Ok(vm.ctx.new_int(position).into())
}

fn str_count(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("count", vm)?;
    let [needle] = args.bind("count", vm)?;
    let needle = arg_str(&needle, "count() argument", vm)?;
    let s = zelf.as_str();
    let count = if needle.is_empty() {
        zelf.char_len() + 1
    } else {
        s.matches(needle.as_str()).count()
    };
    Ok(vm.ctx.new_int(count).into())
}

fn char_predicate(
    vm: &VirtualMachine,
    mut args: FuncArgs,
    name: &str,
    test: fn(char) -> bool,
) -> PyResult {
    let zelf = args.take_zelf::<PyStr>(name, vm)?;
    args.bind::<0>(name, vm)?;
    let s = zelf.as_str();
    Ok(vm.ctx.new_bool(!s.is_empty() && s.chars().all(test)))
}

/// `str.format` with automatic (`{}`) and numbered (`{0}`) fields, `!r`/`!s`/`!a`
/// conversions and doubled braces. Field names, attribute access and format specs beyond
/// the empty one are not supported.
fn str_format(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStr>("format", vm)?;
    let FuncArgs { args: values, kwargs } = args;
    let mut out = String::new();
    let mut auto_index = 0usize;
    let mut chars = zelf.as_str().chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(vm.new_value_error("Single '}' encountered in format string"));
            }
            '{' => {
                let field: String = chars.by_ref().take_while(|&c| c != '}').collect();
                let (name, conversion) = match field.split_once('!') {
                    Some((name, conv)) => (name, Some(conv)),
                    None => (field.as_str(), None),
                };
                let (name, spec) = name.split_once(':').unwrap_or((name, ""));
                let value = if name.is_empty() {
                    let value = values.get(auto_index).cloned();
                    auto_index += 1;
                    value.ok_or_else(|| {
                        vm.new_index_error(format!(
                            "Replacement index {} out of range for positional args tuple",
                            auto_index - 1
                        ))
                    })?
                } else if let Ok(index) = name.parse::<usize>() {
                    values.get(index).cloned().ok_or_else(|| {
                        vm.new_index_error(format!(
                            "Replacement index {index} out of range for positional args tuple"
                        ))
                    })?
                } else {
                    kwargs
                        .get(name)
                        .cloned()
                        .ok_or_else(|| vm.new_key_error(vm.ctx.new_str(name).into()))?
                };
                let value: PyObjectRef = match conversion {
                    None | Some("") => value,
                    Some("s") => value.str(vm)?.into(),
                    Some("r") => value.repr(vm)?.into(),
                    Some("a") => vm.ctx.new_str(value.ascii(vm)?).into(),
                    Some(other) => {
                        return Err(vm.new_value_error(format!(
                            "Unknown conversion specifier {other}"
                        )));
                    }
                };
                let formatted = value.format(&vm.ctx.new_str(spec), vm)?;
                out.push_str(formatted.as_str());
            }
            c => out.push(c),
        }
    }
    Ok(vm.ctx.new_str(out).into())
}

/// Iterator over the characters of a str.
#[derive(Debug)]
pub(crate) struct PyStrIterator {
    string: PyStrRef,
    position: Cell<usize>,
}

impl PyPayload for PyStrIterator {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.str_iterator_type
    }
}

fn str_iterator_next(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStrIterator>("__next__", vm)?;
    args.bind::<0>("__next__", vm)?;
    let position = zelf.position.get();
    match zelf.string.char_at(position) {
        Some(c) => {
            zelf.position.set(position + 1);
            Ok(vm.ctx.new_str(c.to_string()).into())
        }
        None => Err(vm.new_stop_iteration(None)),
    }
}

macro_rules! str_cmp_method {
    ($ctx:expr, $op:ident) => {
        $ctx.new_method(PyComparisonOp::$op.method_name(), |vm, args| {
            str_cmp(vm, args, PyComparisonOp::$op)
        })
    };
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.str_type, {
        "__new__" => ctx.new_staticmethod("__new__", str_new),
        "__repr__" => ctx.new_method("__repr__", str_repr),
        "__str__" => ctx.new_method("__str__", str_str),
        "__hash__" => ctx.new_method("__hash__", str_hash),
        "__format__" => ctx.new_method("__format__", str_format_method),
        "__add__" => ctx.new_method("__add__", str_add),
        "__mul__" => ctx.new_method("__mul__", str_mul),
        "__rmul__" => ctx.new_method("__rmul__", str_mul),
        "__len__" => ctx.new_method("__len__", str_len),
        "__contains__" => ctx.new_method("__contains__", str_contains),
        "__getitem__" => ctx.new_method("__getitem__", str_getitem),
        "__iter__" => ctx.new_method("__iter__", str_iter),
        "__eq__" => str_cmp_method!(ctx, Eq),
        "__ne__" => str_cmp_method!(ctx, Ne),
        "__lt__" => str_cmp_method!(ctx, Lt),
        "__le__" => str_cmp_method!(ctx, Le),
        "__gt__" => str_cmp_method!(ctx, Gt),
        "__ge__" => str_cmp_method!(ctx, Ge),
        "join" => ctx.new_method("join", str_join),
        "split" => ctx.new_method("split", str_split),
        "strip" => ctx.new_method("strip", |vm, args| strip_chars(vm, args, "strip", true, true)),
        "lstrip" => ctx.new_method("lstrip", |vm, args| strip_chars(vm, args, "lstrip", true, false)),
        "rstrip" => ctx.new_method("rstrip", |vm, args| strip_chars(vm, args, "rstrip", false, true)),
        "encode" => ctx.new_method("encode", str_encode),
        "upper" => ctx.new_method("upper", str_upper),
        "lower" => ctx.new_method("lower", str_lower),
        "startswith" => ctx.new_method("startswith", |vm, args| affix_match(vm, args, "startswith", |s, p| s.starts_with(p))),
        "endswith" => ctx.new_method("endswith", |vm, args| affix_match(vm, args, "endswith", |s, p| s.ends_with(p))),
        "replace" => ctx.new_method("replace", str_replace),
        "find" => ctx.new_method("find", str_find),
        "count" => ctx.new_method("count", str_count),
        "isdigit" => ctx.new_method("isdigit", |vm, args| char_predicate(vm, args, "isdigit", |c| c.is_ascii_digit())),
        "isalpha" => ctx.new_method("isalpha", |vm, args| char_predicate(vm, args, "isalpha", char::is_alphabetic)),
        "isspace" => ctx.new_method("isspace", |vm, args| char_predicate(vm, args, "isspace", char::is_whitespace)),
        "format" => ctx.new_method("format", str_format),
    });
    extend_class!(ctx, &ctx.types.str_iterator_type, {
        "__iter__" => ctx.new_method("__iter__", super::iter::iter_self),
        "__next__" => ctx.new_method("__next__", str_iterator_next),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_picks_quotes() {
        assert_eq!(repr_str("abc"), "'abc'");
        assert_eq!(repr_str("it's"), "\"it's\"");
        assert_eq!(repr_str("a'b\"c"), "'a\\'b\"c'");
        assert_eq!(repr_str("tab\there\n"), "'tab\\there\\n'");
        assert_eq!(repr_str("\x01"), "'\\x01'");
    }

    #[test]
    fn whitespace_split_skips_runs() {
        assert_eq!(split_whitespace("  a b\t\tc  ", usize::MAX), ["a", "b", "c"]);
        assert_eq!(split_whitespace("a b c", 1), ["a", "b c"]);
        assert!(split_whitespace("   ", usize::MAX).is_empty());
    }
}
