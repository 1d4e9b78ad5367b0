/*
 * The mythical generator.
 */

use super::{PyCode, PyStr, PyTypeRef};
use crate::{
    PyPayload, PyRef, PyResult, VirtualMachine,
    coroutine::Coro,
    frame::FrameRef,
    function::FuncArgs,
    vm::Context,
};

#[derive(Debug)]
pub struct PyGenerator {
    inner: Coro,
}

impl PyPayload for PyGenerator {
    #[inline]
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.generator_type
    }
}

impl PyGenerator {
    pub const fn as_coro(&self) -> &Coro {
        &self.inner
    }

    pub fn new(frame: FrameRef, name: super::PyStrRef, qualname: super::PyStrRef) -> Self {
        Self {
            inner: Coro::new(frame, name, qualname),
        }
    }

    pub fn frame(&self) -> FrameRef {
        self.inner.frame()
    }

    pub fn code(&self) -> PyRef<PyCode> {
        self.inner.frame().code.clone()
    }
}

fn gen_send(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyGenerator>("send", vm)?;
    let [value] = args.bind("send", vm)?;
    zelf.inner.send(value, vm)?.into_pyresult(vm)
}

fn gen_next(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyGenerator>("__next__", vm)?;
    args.bind::<0>("__next__", vm)?;
    zelf.inner.send(vm.ctx.none(), vm)?.into_pyresult(vm)
}

fn gen_iter(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyGenerator>("__iter__", vm)?;
    args.bind::<0>("__iter__", vm)?;
    Ok(zelf.into())
}

fn gen_throw(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyGenerator>("throw", vm)?;
    // the traceback argument is accepted and ignored
    let [exc_type, exc_val, _exc_tb] = args.bind_optional::<3>("throw", 1, vm)?;
    let exc_type = exc_type.unwrap_or_else(|| vm.ctx.none());
    let exc_val = exc_val.and_then(|val| vm.option_if_none(val));
    zelf.inner.throw(exc_type, exc_val, vm)?.into_pyresult(vm)
}

fn gen_close(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyGenerator>("close", vm)?;
    args.bind::<0>("close", vm)?;
    zelf.inner.close(vm)?;
    Ok(vm.ctx.none())
}

fn gen_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyGenerator>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    Ok(vm.ctx.new_str(zelf.inner.repr(zelf.get_id())).into())
}

fn gen_get_name(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__name__", vm)?;
    Ok(zelf.try_downcast::<PyGenerator>(vm)?.inner.name().into())
}

fn gen_set_name(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf, value] = args.bind("__name__", vm)?;
    let value = value
        .downcast::<PyStr>()
        .map_err(|_| vm.new_type_error("__name__ must be set to a string object"))?;
    zelf.try_downcast::<PyGenerator>(vm)?.inner.set_name(value);
    Ok(vm.ctx.none())
}

fn gen_get_qualname(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__qualname__", vm)?;
    Ok(zelf.try_downcast::<PyGenerator>(vm)?.inner.qualname().into())
}

fn gen_set_qualname(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf, value] = args.bind("__qualname__", vm)?;
    let value = value
        .downcast::<PyStr>()
        .map_err(|_| vm.new_type_error("__qualname__ must be set to a string object"))?;
    zelf.try_downcast::<PyGenerator>(vm)?.inner.set_qualname(value);
    Ok(vm.ctx.none())
}

fn gen_frame(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("gi_frame", vm)?;
    let zelf = zelf.try_downcast::<PyGenerator>(vm)?;
    if zelf.inner.closed() {
        return Ok(vm.ctx.none());
    }
    Ok(zelf.frame().into())
}

fn gen_running(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("gi_running", vm)?;
    Ok(vm
        .ctx
        .new_bool(zelf.try_downcast::<PyGenerator>(vm)?.inner.running()))
}

fn gen_code(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("gi_code", vm)?;
    Ok(zelf.try_downcast::<PyGenerator>(vm)?.code().into())
}

fn gen_yieldfrom(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("gi_yieldfrom", vm)?;
    let zelf = zelf.try_downcast::<PyGenerator>(vm)?;
    Ok(zelf
        .frame()
        .yield_from_target()
        .unwrap_or_else(|| vm.ctx.none()))
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.generator_type, {
        "send" => ctx.new_method("send", gen_send),
        "__next__" => ctx.new_method("__next__", gen_next),
        "__iter__" => ctx.new_method("__iter__", gen_iter),
        "throw" => ctx.new_method("throw", gen_throw),
        "close" => ctx.new_method("close", gen_close),
        "__repr__" => ctx.new_method("__repr__", gen_repr),
        "__name__" => ctx.new_getset("__name__", gen_get_name, gen_set_name),
        "__qualname__" => ctx.new_getset("__qualname__", gen_get_qualname, gen_set_qualname),
        "gi_frame" => ctx.new_readonly_getset("gi_frame", gen_frame),
        "gi_running" => ctx.new_readonly_getset("gi_running", gen_running),
        "gi_code" => ctx.new_readonly_getset("gi_code", gen_code),
        "gi_yieldfrom" => ctx.new_readonly_getset("gi_yieldfrom", gen_yieldfrom),
    });
}
