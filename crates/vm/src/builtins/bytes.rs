use super::{
    PyInt, PyStr, PyTypeRef,
    iter::PositionIterInternal,
    sequence::{self, SequenceIndex},
};
use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, VirtualMachine,
    function::FuncArgs,
    hash,
    protocol::PyIterReturn,
    types::PyComparisonOp,
    vm::Context,
};
use core::cell::RefCell;

/// An immutable sequence of bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyBytes {
    value: Vec<u8>,
}

pub type PyBytesRef = PyRef<PyBytes>;

impl From<Vec<u8>> for PyBytes {
    fn from(value: Vec<u8>) -> Self {
        Self { value }
    }
}

impl PyPayload for PyBytes {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.bytes_type
    }
}

impl PyBytes {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.value
    }

    pub fn repr(&self) -> String {
        let quote = if self.value.contains(&b'\'') && !self.value.contains(&b'"') {
            '"'
        } else {
            '\''
        };
        let mut out = String::with_capacity(self.value.len() + 3);
        out.push('b');
        out.push(quote);
        for &b in &self.value {
            match b {
                b'\\' => out.push_str("\\\\"),
                b'\n' => out.push_str("\\n"),
                b'\r' => out.push_str("\\r"),
                b'\t' => out.push_str("\\t"),
                b if b as char == quote => {
                    out.push('\\');
                    out.push(quote);
                }
                0x20..=0x7e => out.push(b as char),
                b => out.push_str(&format!("\\x{b:02x}")),
            }
        }
        out.push(quote);
        out
    }
}

fn bytes_from_object(obj: &PyObjectRef, vm: &VirtualMachine) -> PyResult<Vec<u8>> {
    if let Some(bytes) = obj.payload::<PyBytes>() {
        return Ok(bytes.value.clone());
    }
    if obj.payload_is::<PyStr>() {
        return Err(vm.new_type_error("string argument without an encoding"));
    }
    if obj.payload_is::<PyInt>() {
        let size: isize = obj.clone().try_into_value(vm)?;
        if size < 0 {
            return Err(vm.new_value_error("negative count"));
        }
        return Ok(vec![0; size as usize]);
    }
    let items = vm.extract_elements(obj)?;
    items
        .iter()
        .map(|item| {
            let value: isize = item.clone().try_into_value(vm)?;
            u8::try_from(value).map_err(|_| vm.new_value_error("bytes must be in range(0, 256)"))
        })
        .collect()
}

fn bytes_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("bytes.__new__", vm)?.try_into_value(vm)?;
    let encoding_kw = args.take_keyword("encoding");
    let [source, encoding] = args.bind_optional::<2>("bytes", 0, vm)?;
    let value = match (source, encoding.or(encoding_kw)) {
        (None, None) => vec![],
        (Some(source), None) => bytes_from_object(&source, vm)?,
        (Some(source), Some(encoding)) => {
            let s = vm.expect_str(&source, "encoding without a string argument: argument")?;
            encode(&s, &vm.expect_str(&encoding, "encoding")?, vm)?
        }
        (None, Some(_)) => return Err(vm.new_type_error("encoding without a string argument")),
    };
    Ok(PyBytes::from(value).into_ref_with_type(vm, cls)?.into())
}

fn normalize_encoding(encoding: &str) -> String {
    encoding.to_ascii_lowercase().replace(['-', '_'], "")
}

/// `str.encode` and `bytes(str, encoding)` for the encodings of the standard library that
/// need no tables.
pub(crate) fn encode(s: &str, encoding: &str, vm: &VirtualMachine) -> PyResult<Vec<u8>> {
    match normalize_encoding(encoding).as_str() {
        "utf8" => Ok(s.as_bytes().to_vec()),
        "ascii" => s
            .chars()
            .map(|c| u8::try_from(c as u32).ok().filter(u8::is_ascii))
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| vm.new_value_error("'ascii' codec can't encode character")),
        "latin1" | "iso88591" => s
            .chars()
            .map(|c| u8::try_from(c as u32).ok())
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| vm.new_value_error("'latin-1' codec can't encode character")),
        _ => Err(vm.new_exception_msg(
            vm.ctx.exceptions.lookup_error.clone(),
            format!("unknown encoding: {encoding}"),
        )),
    }
}

fn bytes_decode(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBytes>("decode", vm)?;
    let encoding_kw = args.take_keyword("encoding");
    let [encoding] = args.bind_optional::<1>("decode", 0, vm)?;
    let encoding = match encoding.or(encoding_kw) {
        Some(encoding) => vm.expect_str(&encoding, "decode() argument 'encoding'")?,
        None => "utf-8".to_owned(),
    };
    let decoded = match normalize_encoding(&encoding).as_str() {
        "utf8" => String::from_utf8(zelf.value.clone()).map_err(|err| {
            vm.new_value_error(format!(
                "'utf-8' codec can't decode byte 0x{:02x} in position {}: invalid start byte",
                zelf.value[err.utf8_error().valid_up_to()],
                err.utf8_error().valid_up_to()
            ))
        })?,
        "ascii" => {
            if let Some(pos) = zelf.value.iter().position(|b| !b.is_ascii()) {
                return Err(vm.new_value_error(format!(
                    "'ascii' codec can't decode byte 0x{:02x} in position {pos}: ordinal not in range(128)",
                    zelf.value[pos]
                )));
            }
            zelf.value.iter().map(|&b| b as char).collect()
        }
        "latin1" | "iso88591" => zelf.value.iter().map(|&b| b as char).collect(),
        _ => {
            return Err(vm.new_exception_msg(
                vm.ctx.exceptions.lookup_error.clone(),
                format!("unknown encoding: {encoding}"),
            ));
        }
    };
    Ok(vm.ctx.new_str(decoded).into())
}

fn bytes_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBytes>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    Ok(vm.ctx.new_str(zelf.repr()).into())
}

fn bytes_hash(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBytes>("__hash__", vm)?;
    args.bind::<0>("__hash__", vm)?;
    Ok(vm.ctx.new_int(hash::hash_value(zelf.as_bytes())).into())
}

fn bytes_cmp(vm: &VirtualMachine, mut args: FuncArgs, op: PyComparisonOp) -> PyResult {
    let zelf = args.take_zelf::<PyBytes>(op.method_name(), vm)?;
    let [other] = args.bind(op.method_name(), vm)?;
    Ok(match other.payload::<PyBytes>() {
        Some(other) => vm
            .ctx
            .new_bool(op.eval_ord(zelf.value.as_slice().cmp(other.as_bytes()))),
        None => vm.ctx.not_implemented(),
    })
}

fn bytes_len(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBytes>("__len__", vm)?;
    args.bind::<0>("__len__", vm)?;
    Ok(vm.ctx.new_int(zelf.value.len()).into())
}

fn bytes_getitem(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBytes>("__getitem__", vm)?;
    let [needle] = args.bind("__getitem__", vm)?;
    match SequenceIndex::try_from_object(vm, needle, "byte")? {
        SequenceIndex::Int(i) => {
            let i = sequence::wrap_index(i, zelf.value.len())
                .ok_or_else(|| vm.new_index_error("index out of range"))?;
            Ok(vm.ctx.new_int(zelf.value[i]).into())
        }
        SequenceIndex::Slice(slice) => {
            let picked = sequence::slice_elements(&zelf.value, &slice, vm)?;
            Ok(vm.ctx.new_bytes(picked).into())
        }
    }
}

fn bytes_add(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBytes>("__add__", vm)?;
    let [other] = args.bind("__add__", vm)?;
    match other.payload::<PyBytes>() {
        Some(other) => {
            let joined = [zelf.as_bytes(), other.as_bytes()].concat();
            Ok(vm.ctx.new_bytes(joined).into())
        }
        None => Err(vm.new_type_error(format!(
            "can't concat {} to bytes",
            other.class().name()
        ))),
    }
}

fn bytes_mul(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBytes>("__mul__", vm)?;
    let [times] = args.bind("__mul__", vm)?;
    if !times.payload_is::<PyInt>() {
        return Ok(vm.ctx.not_implemented());
    }
    let times: isize = times.try_into_value(vm)?;
    Ok(vm
        .ctx
        .new_bytes(sequence::repeat(zelf.as_bytes(), times, vm)?)
        .into())
}

fn bytes_contains(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBytes>("__contains__", vm)?;
    let [needle] = args.bind("__contains__", vm)?;
    let found = if let Some(sub) = needle.payload::<PyBytes>() {
        sub.value.is_empty()
            || zelf
                .value
                .windows(sub.value.len())
                .any(|w| w == sub.as_bytes())
    } else {
        let byte: isize = needle.try_into_value(vm)?;
        let byte =
            u8::try_from(byte).map_err(|_| vm.new_value_error("byte must be in range(0, 256)"))?;
        zelf.value.contains(&byte)
    };
    Ok(vm.ctx.new_bool(found))
}

fn bytes_iter(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBytes>("__iter__", vm)?;
    args.bind::<0>("__iter__", vm)?;
    Ok(PyBytesIterator {
        internal: RefCell::new(PositionIterInternal::new(zelf, 0)),
    }
    .into_ref(&vm.ctx)
    .into())
}

#[derive(Debug)]
pub(crate) struct PyBytesIterator {
    internal: RefCell<PositionIterInternal<PyBytesRef>>,
}

impl PyPayload for PyBytesIterator {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.bytes_iterator_type
    }
}

fn bytes_iterator_next(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBytesIterator>("__next__", vm)?;
    args.bind::<0>("__next__", vm)?;
    let ret = zelf.internal.borrow_mut().next(|bytes, position| {
        Ok(match bytes.value.get(position) {
            Some(&b) => PyIterReturn::Return(vm.ctx.new_int(b).into()),
            None => PyIterReturn::StopIteration(None),
        })
    })?;
    ret.into_pyresult(vm)
}

fn bytes_iterator_length_hint(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBytesIterator>("__length_hint__", vm)?;
    args.bind::<0>("__length_hint__", vm)?;
    let hint = zelf.internal.borrow().length_hint(|bytes| bytes.value.len());
    Ok(vm.ctx.new_int(hint).into())
}

macro_rules! bytes_cmp_method {
    ($ctx:expr, $op:ident) => {
        $ctx.new_method(PyComparisonOp::$op.method_name(), |vm, args| {
            bytes_cmp(vm, args, PyComparisonOp::$op)
        })
    };
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.bytes_type, {
        "__new__" => ctx.new_staticmethod("__new__", bytes_new),
        "__repr__" => ctx.new_method("__repr__", bytes_repr),
        "__hash__" => ctx.new_method("__hash__", bytes_hash),
        "__len__" => ctx.new_method("__len__", bytes_len),
        "__getitem__" => ctx.new_method("__getitem__", bytes_getitem),
        "__add__" => ctx.new_method("__add__", bytes_add),
        "__mul__" => ctx.new_method("__mul__", bytes_mul),
        "__rmul__" => ctx.new_method("__rmul__", bytes_mul),
        "__contains__" => ctx.new_method("__contains__", bytes_contains),
        "__iter__" => ctx.new_method("__iter__", bytes_iter),
        "__eq__" => bytes_cmp_method!(ctx, Eq),
        "__ne__" => bytes_cmp_method!(ctx, Ne),
        "__lt__" => bytes_cmp_method!(ctx, Lt),
        "__le__" => bytes_cmp_method!(ctx, Le),
        "__gt__" => bytes_cmp_method!(ctx, Gt),
        "__ge__" => bytes_cmp_method!(ctx, Ge),
        "decode" => ctx.new_method("decode", bytes_decode),
    });
    extend_class!(ctx, &ctx.types.bytes_iterator_type, {
        "__iter__" => ctx.new_method("__iter__", super::iter::iter_self),
        "__next__" => ctx.new_method("__next__", bytes_iterator_next),
        "__length_hint__" => ctx.new_method("__length_hint__", bytes_iterator_length_hint),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_escapes_non_printable() {
        assert_eq!(PyBytes::from(b"abc".to_vec()).repr(), "b'abc'");
        assert_eq!(PyBytes::from(vec![0, b'\n', 0xff]).repr(), "b'\\x00\\n\\xff'");
        assert_eq!(PyBytes::from(b"it's".to_vec()).repr(), "b\"it's\"");
    }
}
