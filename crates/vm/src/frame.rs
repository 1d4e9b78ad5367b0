use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, TryFromObject, VirtualMachine,
    builtins::{
        PyBaseException, PyBaseExceptionRef, PyCode, PyDict, PyDictRef, PyFunction, PyGenerator,
        PyList, PySet, PySlice, PyStr, PyStrRef, PyTuple, PyType,
        function::{PyCell, PyCellRef},
    },
    bytecode::{CodeFlags, DecodeError, Instruction, Opcode},
    exceptions::{ExceptionCtor, TracebackEntry},
    fatal::InvariantViolation,
    function::FuncArgs,
    protocol::{PyIter, PyIterReturn},
    scope::Scope,
    types::PyComparisonOp,
    vm::Context,
};
use core::{
    cell::{Cell, RefCell},
    fmt,
    iter::zip,
};
use itertools::Itertools;

pub type FrameRef = PyRef<Frame>;

#[derive(Clone, Debug)]
enum BlockType {
    /// Pushed by `SETUP_FINALLY`; an exception jumps to the handler.
    Finally,
    /// The frame is running an `except` or `finally` body. `prev` is the exception that
    /// was being handled before this one and is restored when the handler exits.
    ExceptHandler { prev: Option<PyBaseExceptionRef> },
}

#[derive(Clone, Debug)]
struct Block {
    typ: BlockType,
    /// Instruction index of the handler.
    handler: usize,
    /// Operand stack height when the block was entered.
    level: usize,
}

/// Where a frame is in its life.
#[derive(Copy, Clone, Debug, PartialEq, Eq, is_macro::Is)]
pub enum FrameStatus {
    Created,
    Running,
    /// A generator frame stopped at a `yield`.
    Suspended,
    /// A generator frame stopped inside `yield from`, passing values through from its delegate.
    Delegating,
    Returned,
    Errored,
}

#[derive(Debug)]
struct FrameState {
    // We need 1 stack per frame
    /// The main data frame of the stack machine. `None` is the NULL slot `LOAD_METHOD`
    /// leaves under a plain attribute.
    stack: Vec<Option<PyObjectRef>>,
    /// Active exception blocks, innermost last
    blocks: Vec<Block>,
    status: FrameStatus,
}

/// Execution state of one code object invocation.
pub struct Frame {
    pub code: PyRef<PyCode>,

    pub(crate) fastlocals: RefCell<Box<[Option<PyObjectRef>]>>,
    /// The frame's own cells, one per cellvar, followed by the closure it was created with.
    pub(crate) cells_frees: Box<[PyCellRef]>,
    pub locals: PyDictRef,
    pub globals: PyDictRef,
    pub builtins: PyDictRef,

    /// index of the next instruction to run
    lasti: Cell<usize>,
    state: RefCell<FrameState>,
}

impl PyPayload for Frame {
    #[inline]
    fn class(ctx: &Context) -> &crate::builtins::PyTypeRef {
        &ctx.types.frame_type
    }
}

// Running a frame can result in one of the below:
#[derive(Debug)]
pub enum ExecutionResult {
    Return(PyObjectRef),
    Yield(PyObjectRef),
}

/// A valid execution result, or an exception
type FrameResult = PyResult<Option<ExecutionResult>>;

impl Frame {
    pub(crate) fn new(
        code: PyRef<PyCode>,
        scope: Scope,
        builtins: PyDictRef,
        closure: &[PyCellRef],
        vm: &VirtualMachine,
    ) -> Self {
        let cells_frees = core::iter::repeat_with(|| PyCell::default().into_ref(&vm.ctx))
            .take(code.cellvars.len())
            .chain(closure.iter().cloned())
            .collect();

        let state = FrameState {
            stack: Vec::with_capacity(code.stacksize as usize),
            blocks: Vec::new(),
            status: FrameStatus::Created,
        };

        Self {
            fastlocals: RefCell::new(vec![None; code.varnames.len()].into_boxed_slice()),
            cells_frees,
            locals: scope.locals,
            globals: scope.globals,
            builtins,
            code,
            lasti: Cell::new(0),
            state: RefCell::new(state),
        }
    }

    pub fn lasti(&self) -> usize {
        self.lasti.get()
    }

    /// Line of the instruction the frame is executing, or last executed.
    pub fn current_line(&self) -> u32 {
        self.code.line_number(self.lasti().saturating_sub(1))
    }

    pub fn status(&self) -> FrameStatus {
        match self.state.try_borrow() {
            Ok(state) => state.status,
            Err(_) => FrameStatus::Running,
        }
    }

    /// The locals dict, refreshed from the fast locals and cells of a function frame.
    pub fn locals(&self, vm: &VirtualMachine) -> PyResult<PyDictRef> {
        let locals = &self.locals;
        let code = &self.code;
        if !code.flags.contains(CodeFlags::OPTIMIZED) {
            return Ok(locals.clone());
        }
        let sync = |name: &str, value: Option<PyObjectRef>| match value {
            Some(value) => locals.set_item_str(name, value, vm),
            None => {
                locals.del_item_str(name, vm);
            }
        };
        {
            let fastlocals = self.fastlocals.borrow();
            for (name, value) in zip(&code.varnames, &**fastlocals) {
                sync(name, value.clone());
            }
        }
        for (name, cell) in zip(code.cellvars.iter().chain(&code.freevars), &*self.cells_frees) {
            sync(name, cell.get());
        }
        Ok(locals.clone())
    }

    #[inline(always)]
    fn with_exec<R>(&self, f: impl FnOnce(ExecutingFrame<'_>) -> R) -> R {
        let mut state = self.state.borrow_mut();
        let exec = ExecutingFrame {
            code: &self.code,
            fastlocals: &self.fastlocals,
            cells_frees: &self.cells_frees,
            locals: &self.locals,
            globals: &self.globals,
            builtins: &self.builtins,
            lasti: &self.lasti,
            state: &mut state,
        };
        f(exec)
    }

    /// Runs the frame until it returns, yields or raises.
    pub fn run(&self, vm: &VirtualMachine) -> PyResult<ExecutionResult> {
        self.with_exec(|mut exec| {
            exec.enter(vm);
            let result = exec.run(vm);
            exec.leave(&result);
            result
        })
    }

    /// Continues a suspended generator frame; `value` becomes the result of its `yield`.
    pub(crate) fn resume(
        &self,
        value: Option<PyObjectRef>,
        vm: &VirtualMachine,
    ) -> PyResult<ExecutionResult> {
        self.with_exec(|mut exec| {
            exec.enter(vm);
            if let Some(value) = value {
                exec.push_value(value)
            }
            let result = exec.run(vm);
            exec.leave(&result);
            result
        })
    }

    /// Raises `exc` at the point where a generator frame is suspended.
    pub(crate) fn gen_throw(
        &self,
        exc: PyBaseExceptionRef,
        vm: &VirtualMachine,
    ) -> PyResult<ExecutionResult> {
        self.with_exec(|mut exec| {
            exec.enter(vm);
            let result = exec.gen_throw(exc, vm);
            exec.leave(&result);
            result
        })
    }

    /// The iterator a delegating frame is waiting on.
    pub fn yield_from_target(&self) -> Option<PyObjectRef> {
        let state = self.state.try_borrow().ok()?;
        if !state.status.is_delegating() {
            return None;
        }
        state.stack.last()?.clone()
    }

    /// A description of the frame for fatal error reports: its position, operand stack and
    /// block stack.
    pub fn dump(&self) -> String {
        let mut out = format!(
            "  File \"{}\", line {}, in {}\n",
            self.code.filename,
            self.current_line(),
            self.code.name
        );
        match self.state.try_borrow() {
            Ok(state) => {
                let stack = state.stack.iter().map(|slot| match slot {
                    Some(obj) => format!("<{} at {:#x}>", obj.class().name(), obj.get_id()),
                    None => "NULL".to_owned(),
                });
                out += &format!("    operand stack: [{}]\n", stack.format(", "));
                let blocks = state.blocks.iter().map(|block| {
                    let kind = match block.typ {
                        BlockType::Finally => "finally",
                        BlockType::ExceptHandler { .. } => "except-handler",
                    };
                    format!("{kind} -> {} (level {})", block.handler, block.level)
                });
                out += &format!("    block stack: [{}]\n", blocks.format(", "));
            }
            Err(_) => out += "    <state unavailable: frame is executing>\n",
        }
        out
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.try_borrow();
        let stack = match &state {
            Ok(state) => state
                .stack
                .iter()
                .map(|elem| match elem {
                    Some(obj) => obj.class().name().to_owned(),
                    None => "NULL".to_owned(),
                })
                .join(", "),
            Err(_) => "<running>".to_owned(),
        };
        write!(
            f,
            "Frame Object {{ \n Code:{:?}\n Lasti:{}\n Stack:[{stack}]\n}}",
            self.code.name,
            self.lasti()
        )
    }
}

/// An executing frame; essentially just a struct to combine the immutable data outside the
/// RefCell with the mutable data inside
struct ExecutingFrame<'a> {
    code: &'a PyRef<PyCode>,
    fastlocals: &'a RefCell<Box<[Option<PyObjectRef>]>>,
    cells_frees: &'a [PyCellRef],
    locals: &'a PyDictRef,
    globals: &'a PyDictRef,
    builtins: &'a PyDictRef,
    lasti: &'a Cell<usize>,
    state: &'a mut FrameState,
}

impl fmt::Debug for ExecutingFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutingFrame")
            .field("code", &self.code.name)
            .field("state", self.state)
            .finish()
    }
}

impl<'a> ExecutingFrame<'a> {
    fn enter(&mut self, vm: &VirtualMachine) {
        match self.state.status {
            FrameStatus::Created | FrameStatus::Suspended | FrameStatus::Delegating => {}
            FrameStatus::Running => vm.fatal(InvariantViolation::FrameReentered {
                code: self.code.name.clone(),
                state: "started running",
            }),
            FrameStatus::Returned => vm.fatal(InvariantViolation::FrameReentered {
                code: self.code.name.clone(),
                state: "returned",
            }),
            FrameStatus::Errored => vm.fatal(InvariantViolation::FrameReentered {
                code: self.code.name.clone(),
                state: "raised an exception",
            }),
        }
        trace!("entering frame {} at {}", self.code.name, self.lasti.get());
        self.state.status = FrameStatus::Running;
    }

    fn leave(&mut self, result: &PyResult<ExecutionResult>) {
        self.state.status = match result {
            Ok(ExecutionResult::Return(_)) => FrameStatus::Returned,
            Ok(ExecutionResult::Yield(_)) if self.yield_from_target().is_some() => {
                FrameStatus::Delegating
            }
            Ok(ExecutionResult::Yield(_)) => FrameStatus::Suspended,
            Err(_) => FrameStatus::Errored,
        };
        trace!("leaving frame {} as {:?}", self.code.name, self.state.status);
    }

    fn fetch(&self, vm: &VirtualMachine) -> (usize, Instruction) {
        match self.code.fetch(self.lasti.get()) {
            Ok(fetched) => fetched,
            Err(DecodeError::OutOfBounds { .. }) => vm.fatal(InvariantViolation::CodeOverrun {
                code: self.code.name.clone(),
            }),
            Err(source) => vm.fatal(InvariantViolation::Decode {
                code: self.code.name.clone(),
                source,
            }),
        }
    }

    fn run(&mut self, vm: &VirtualMachine) -> PyResult<ExecutionResult> {
        // Execute until return or exception:
        loop {
            let (idx, instruction) = self.fetch(vm);
            self.lasti.set(idx + 1);
            vm_trace!(
                "{}:{idx} {} {} (stack depth {})",
                self.code.name,
                instruction.opcode.name(),
                instruction.arg,
                self.state.stack.len()
            );
            match self.execute_instruction(instruction, vm) {
                Ok(None) => {}
                Ok(Some(value)) => break Ok(value),
                // Instruction raised an exception
                Err(exception) => {
                    let is_reraise = match instruction.opcode {
                        Opcode::RaiseVarargs => instruction.arg == 0,
                        Opcode::Reraise => true,
                        _ => false,
                    };
                    if !is_reraise {
                        self.add_traceback_entry(&exception, idx);
                    }
                    if let Err(exception) = self.unwind_blocks(exception, vm) {
                        break Err(exception);
                    }
                }
            }
        }
    }

    #[cold]
    fn add_traceback_entry(&self, exception: &PyBaseExceptionRef, idx: usize) {
        let entry = TracebackEntry {
            filename: self.code.filename.clone(),
            lineno: self.code.line_number(idx),
            name: self.code.name.clone(),
        };
        vm_trace!("Adding to traceback: {:?}", entry);
        exception.push_traceback(entry);
    }

    /// Finds a handler for `exception` on the block stack. When one exists the frame is left
    /// ready to run it; otherwise the exception is handed back for the caller.
    #[cold]
    fn unwind_blocks(
        &mut self,
        exception: PyBaseExceptionRef,
        vm: &VirtualMachine,
    ) -> Result<(), PyBaseExceptionRef> {
        while let Some(block) = self.state.blocks.pop() {
            match block.typ {
                BlockType::ExceptHandler { prev } => {
                    self.state.stack.truncate(block.level);
                    vm.set_exception(prev);
                }
                BlockType::Finally => {
                    self.state.stack.truncate(block.level);
                    let prev = vm.current_exception();
                    // the exception handled so far, then the new one; type on top
                    self.push_exc_triple(prev.clone(), vm);
                    self.state.blocks.push(Block {
                        typ: BlockType::ExceptHandler { prev },
                        handler: block.handler,
                        level: block.level,
                    });
                    vm.set_exception(Some(exception.clone()));
                    self.push_exc_triple(Some(exception), vm);
                    self.jump(block.handler);
                    return Ok(());
                }
            }
        }
        Err(exception)
    }

    fn push_exc_triple(&mut self, exc: Option<PyBaseExceptionRef>, vm: &VirtualMachine) {
        // traceback objects are not modelled
        self.push_value(vm.ctx.none());
        match exc {
            Some(exc) => {
                let typ = exc.class().clone();
                self.push_value(exc.into());
                self.push_value(typ.into());
            }
            None => {
                self.push_value(vm.ctx.none());
                self.push_value(vm.ctx.none());
            }
        }
    }

    /// Handle throw() on a generator.
    fn gen_throw(
        &mut self,
        exc: PyBaseExceptionRef,
        vm: &VirtualMachine,
    ) -> PyResult<ExecutionResult> {
        if let Some(receiver) = self.yield_from_target() {
            let thrown = if exc.fast_isinstance(&vm.ctx.exceptions.generator_exit) {
                // the delegate is closed, then the exit is raised here
                self.close_delegate(&receiver, vm).err().map(Err)
            } else if let Some(generator) = receiver.payload::<PyGenerator>() {
                Some(generator.as_coro().throw(exc.clone().into(), None, vm))
            } else {
                vm.get_attribute_opt(&receiver, "throw")?.map(|throw| {
                    PyIterReturn::from_pyresult(vm.invoke(&throw, vec![exc.clone().into()]), vm)
                })
            };
            match thrown {
                Some(Ok(PyIterReturn::Return(value))) => return Ok(ExecutionResult::Yield(value)),
                Some(Ok(PyIterReturn::StopIteration(value))) => {
                    self.finish_yield_from(value, vm);
                    return self.run(vm);
                }
                Some(Err(err)) => {
                    self.pop_value();
                    self.lasti.set(self.lasti.get() + 1);
                    return self.throw_here(err, vm);
                }
                None => {}
            }
        }
        self.throw_here(exc, vm)
    }

    fn close_delegate(&self, receiver: &PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        if let Some(generator) = receiver.payload::<PyGenerator>() {
            return generator.as_coro().close(vm);
        }
        if let Some(close) = vm.get_attribute_opt(receiver, "close")? {
            vm.invoke(&close, ())?;
        }
        Ok(())
    }

    fn throw_here(&mut self, exc: PyBaseExceptionRef, vm: &VirtualMachine) -> PyResult<ExecutionResult> {
        self.add_traceback_entry(&exc, self.lasti.get().saturating_sub(1));
        vm.contextualize_exception(&exc);
        self.unwind_blocks(exc, vm)?;
        self.run(vm)
    }

    fn yield_from_target(&self) -> Option<PyObjectRef> {
        let instr = self.code.instruction_at(self.lasti.get()).ok()?;
        if instr.opcode != Opcode::YieldFrom {
            return None;
        }
        self.state.stack.last()?.clone()
    }

    /// The delegate of a `yield from` is exhausted: its return value replaces it on the stack
    /// and the delegating frame moves past the `YIELD_FROM`.
    fn finish_yield_from(&mut self, value: Option<PyObjectRef>, vm: &VirtualMachine) {
        self.pop_value();
        self.push_value(value.unwrap_or_else(|| vm.ctx.none()));
        self.lasti.set(self.lasti.get() + 1);
    }

    fn unbound_cell_exception(&self, i: usize, vm: &VirtualMachine) -> PyBaseExceptionRef {
        if let Some(name) = self.code.cellvars.get(i) {
            vm.new_unbound_local_error(format!(
                "local variable '{name}' referenced before assignment"
            ))
        } else {
            let name = self.code.cell_name(i).unwrap_or("?");
            vm.new_exception_msg(
                vm.ctx.exceptions.name_error.clone(),
                format!(
                    "free variable '{name}' referenced before assignment in enclosing scope"
                ),
            )
        }
    }

    fn name(&self, opcode: &'static str, idx: u32, vm: &VirtualMachine) -> &'a str {
        let code: &'a PyCode = self.code;
        match code.names.get(idx as usize) {
            Some(name) => name,
            None => vm.fatal(InvariantViolation::BadIndex {
                opcode,
                table: "names",
                index: idx as usize,
            }),
        }
    }

    fn varname(&self, opcode: &'static str, idx: u32, vm: &VirtualMachine) -> &'a str {
        let code: &'a PyCode = self.code;
        match code.varnames.get(idx as usize) {
            Some(name) => name,
            None => vm.fatal(InvariantViolation::BadIndex {
                opcode,
                table: "varnames",
                index: idx as usize,
            }),
        }
    }

    fn cell(&self, opcode: &'static str, idx: u32, vm: &VirtualMachine) -> &'a PyCellRef {
        match self.cells_frees.get(idx as usize) {
            Some(cell) => cell,
            None => vm.fatal(InvariantViolation::BadIndex {
                opcode,
                table: "cells",
                index: idx as usize,
            }),
        }
    }

    /// Execute a single instruction.
    #[inline(always)]
    fn execute_instruction(&mut self, instruction: Instruction, vm: &VirtualMachine) -> FrameResult {
        let Instruction { opcode, arg } = instruction;
        let op_name = opcode.name();

        match opcode {
            Opcode::Nop => Ok(None),
            Opcode::PopTop => {
                // Pop value from stack and ignore.
                self.pop_value_opt();
                Ok(None)
            }
            Opcode::RotTwo => self.rotate(2, vm),
            Opcode::RotThree => self.rotate(3, vm),
            Opcode::RotFour => self.rotate(4, vm),
            Opcode::DupTop => {
                let value = self.top_value(vm);
                self.push_value(value);
                Ok(None)
            }
            Opcode::DupTopTwo => {
                let top = self.top_value(vm);
                let second = self.nth_value(1, vm);
                self.push_value(second);
                self.push_value(top);
                Ok(None)
            }

            Opcode::UnaryPositive => self.execute_unary(vm, VirtualMachine::_pos),
            Opcode::UnaryNegative => self.execute_unary(vm, VirtualMachine::_neg),
            Opcode::UnaryInvert => self.execute_unary(vm, VirtualMachine::_invert),
            Opcode::UnaryNot => {
                let value = self.pop_value();
                let negated = value.not(vm)?;
                self.push_value(vm.ctx.new_bool(negated));
                Ok(None)
            }

            Opcode::BinaryPower => self.execute_bin_op(vm, VirtualMachine::_pow),
            Opcode::BinaryMultiply => self.execute_bin_op(vm, VirtualMachine::_mul),
            Opcode::BinaryMatrixMultiply => self.execute_bin_op(vm, VirtualMachine::_matmul),
            Opcode::BinaryModulo => self.execute_bin_op(vm, VirtualMachine::_mod),
            Opcode::BinaryAdd => self.execute_bin_op(vm, VirtualMachine::_add),
            Opcode::BinarySubtract => self.execute_bin_op(vm, VirtualMachine::_sub),
            Opcode::BinaryFloorDivide => self.execute_bin_op(vm, VirtualMachine::_floordiv),
            Opcode::BinaryTrueDivide => self.execute_bin_op(vm, VirtualMachine::_truediv),
            Opcode::BinaryLshift => self.execute_bin_op(vm, VirtualMachine::_lshift),
            Opcode::BinaryRshift => self.execute_bin_op(vm, VirtualMachine::_rshift),
            Opcode::BinaryAnd => self.execute_bin_op(vm, VirtualMachine::_and),
            Opcode::BinaryXor => self.execute_bin_op(vm, VirtualMachine::_xor),
            Opcode::BinaryOr => self.execute_bin_op(vm, VirtualMachine::_or),
            Opcode::InplacePower => self.execute_bin_op(vm, VirtualMachine::_ipow),
            Opcode::InplaceMultiply => self.execute_bin_op(vm, VirtualMachine::_imul),
            Opcode::InplaceMatrixMultiply => self.execute_bin_op(vm, VirtualMachine::_imatmul),
            Opcode::InplaceModulo => self.execute_bin_op(vm, VirtualMachine::_imod),
            Opcode::InplaceAdd => self.execute_bin_op(vm, VirtualMachine::_iadd),
            Opcode::InplaceSubtract => self.execute_bin_op(vm, VirtualMachine::_isub),
            Opcode::InplaceFloorDivide => self.execute_bin_op(vm, VirtualMachine::_ifloordiv),
            Opcode::InplaceTrueDivide => self.execute_bin_op(vm, VirtualMachine::_itruediv),
            Opcode::InplaceLshift => self.execute_bin_op(vm, VirtualMachine::_ilshift),
            Opcode::InplaceRshift => self.execute_bin_op(vm, VirtualMachine::_irshift),
            Opcode::InplaceAnd => self.execute_bin_op(vm, VirtualMachine::_iand),
            Opcode::InplaceXor => self.execute_bin_op(vm, VirtualMachine::_ixor),
            Opcode::InplaceOr => self.execute_bin_op(vm, VirtualMachine::_ior),

            Opcode::BinarySubscr => {
                let key = self.pop_value();
                let container = self.pop_value();
                self.push_value(container.get_item(&key, vm)?);
                Ok(None)
            }
            Opcode::StoreSubscr => {
                let key = self.pop_value();
                let container = self.pop_value();
                let value = self.pop_value();
                container.set_item(&key, value, vm)?;
                Ok(None)
            }
            Opcode::DeleteSubscr => {
                let key = self.pop_value();
                let container = self.pop_value();
                container.del_item(&key, vm)?;
                Ok(None)
            }

            Opcode::CompareOp => {
                let op = u8::try_from(arg)
                    .ok()
                    .and_then(|op| PyComparisonOp::try_from(op).ok())
                    .unwrap_or_else(|| {
                        vm.fatal(InvariantViolation::BadIndex {
                            opcode: op_name,
                            table: "comparison operators",
                            index: arg as usize,
                        })
                    });
                let b = self.pop_value();
                let a = self.pop_value();
                self.push_value(a.rich_compare(&b, op, vm)?);
                Ok(None)
            }
            Opcode::IsOp => {
                let b = self.pop_value();
                let a = self.pop_value();
                self.push_value(vm.ctx.new_bool(a.is(&b) != (arg == 1)));
                Ok(None)
            }
            Opcode::ContainsOp => {
                let haystack = self.pop_value();
                let needle = self.pop_value();
                let found = vm._contains(&haystack, &needle)?;
                self.push_value(vm.ctx.new_bool(found != (arg == 1)));
                Ok(None)
            }

            Opcode::LoadConst => {
                let value = match self.code.constants.get(arg as usize) {
                    Some(value) => value.clone(),
                    None => vm.fatal(InvariantViolation::BadIndex {
                        opcode: op_name,
                        table: "constants",
                        index: arg as usize,
                    }),
                };
                self.push_value(value);
                Ok(None)
            }
            Opcode::LoadName => {
                let name = self.name(op_name, arg, vm);
                let value = match self.locals.get_item_str(name, vm) {
                    Some(value) => value,
                    None => self.load_global_or_builtin(name, vm)?,
                };
                self.push_value(value);
                Ok(None)
            }
            Opcode::StoreName => {
                let value = self.pop_value();
                let name = self.name(op_name, arg, vm);
                self.locals.set_item_str(name, value, vm);
                Ok(None)
            }
            Opcode::DeleteName => {
                let name = self.name(op_name, arg, vm);
                match self.locals.del_item_str(name, vm) {
                    Some(_) => Ok(None),
                    None => Err(vm.new_name_error(name)),
                }
            }
            Opcode::LoadFast => {
                let value = self.fastlocals.borrow().get(arg as usize).cloned();
                match value {
                    Some(Some(value)) => {
                        self.push_value(value);
                        Ok(None)
                    }
                    Some(None) => Err(vm.new_unbound_local_error(format!(
                        "local variable '{}' referenced before assignment",
                        self.varname(op_name, arg, vm)
                    ))),
                    None => vm.fatal(InvariantViolation::BadIndex {
                        opcode: op_name,
                        table: "fast locals",
                        index: arg as usize,
                    }),
                }
            }
            Opcode::StoreFast => {
                let value = self.pop_value();
                self.varname(op_name, arg, vm);
                let prev = self.fastlocals.borrow_mut()[arg as usize].replace(value);
                drop(prev);
                Ok(None)
            }
            Opcode::DeleteFast => {
                let name = self.varname(op_name, arg, vm);
                let prev = self.fastlocals.borrow_mut()[arg as usize].take();
                match prev {
                    Some(_) => Ok(None),
                    None => Err(vm.new_unbound_local_error(format!(
                        "local variable '{name}' referenced before assignment"
                    ))),
                }
            }
            Opcode::LoadGlobal => {
                let name = self.name(op_name, arg, vm);
                let value = self.load_global_or_builtin(name, vm)?;
                self.push_value(value);
                Ok(None)
            }
            Opcode::StoreGlobal => {
                let value = self.pop_value();
                let name = self.name(op_name, arg, vm);
                self.globals.set_item_str(name, value, vm);
                Ok(None)
            }
            Opcode::DeleteGlobal => {
                let name = self.name(op_name, arg, vm);
                match self.globals.del_item_str(name, vm) {
                    Some(_) => Ok(None),
                    None => Err(vm.new_name_error(name)),
                }
            }
            Opcode::LoadAttr => {
                let obj = self.pop_value();
                let name = self.name(op_name, arg, vm);
                self.push_value(obj.get_attr(name, vm)?);
                Ok(None)
            }
            Opcode::StoreAttr => {
                let obj = self.pop_value();
                let value = self.pop_value();
                let name = self.name(op_name, arg, vm);
                obj.set_attr(name, value, vm)?;
                Ok(None)
            }
            Opcode::DeleteAttr => {
                let obj = self.pop_value();
                let name = self.name(op_name, arg, vm);
                obj.del_attr(name, vm)?;
                Ok(None)
            }
            Opcode::LoadMethod => {
                let obj = self.pop_value();
                let name = self.name(op_name, arg, vm);
                self.load_method(obj, name, vm)?;
                Ok(None)
            }
            Opcode::CallMethod => {
                let args = self.pop_multiple(arg as usize, vm);
                let callable_or_self = self.pop_value();
                let args = FuncArgs::from(args);
                let result = match self.pop_value_opt() {
                    Some(method) => vm.call_with_self(&method, callable_or_self, args),
                    None => vm.invoke(&callable_or_self, args),
                }?;
                self.push_value(result);
                Ok(None)
            }

            Opcode::LoadClosure => {
                let cell = self.cell(op_name, arg, vm).clone();
                self.push_value(cell.into());
                Ok(None)
            }
            Opcode::LoadDeref => {
                let value = self
                    .cell(op_name, arg, vm)
                    .get()
                    .ok_or_else(|| self.unbound_cell_exception(arg as usize, vm))?;
                self.push_value(value);
                Ok(None)
            }
            Opcode::StoreDeref => {
                let value = self.pop_value();
                self.cell(op_name, arg, vm).set(Some(value));
                Ok(None)
            }
            Opcode::DeleteDeref => {
                let cell = self.cell(op_name, arg, vm);
                if cell.get().is_none() {
                    return Err(self.unbound_cell_exception(arg as usize, vm));
                }
                cell.set(None);
                Ok(None)
            }
            Opcode::LoadClassderef => {
                let i = arg as usize;
                let name = self.code.cell_name(i).unwrap_or_else(|| {
                    vm.fatal(InvariantViolation::BadIndex {
                        opcode: op_name,
                        table: "cells",
                        index: i,
                    })
                });
                let value = match self.locals.get_item_str(name, vm) {
                    Some(value) => value,
                    None => self
                        .cell(op_name, arg, vm)
                        .get()
                        .ok_or_else(|| self.unbound_cell_exception(i, vm))?,
                };
                self.push_value(value);
                Ok(None)
            }
            Opcode::LoadBuildClass => {
                let build_class = self
                    .builtins
                    .get_item_str("__build_class__", vm)
                    .ok_or_else(|| vm.new_name_error("__build_class__"))?;
                self.push_value(build_class);
                Ok(None)
            }
            Opcode::LoadAssertionError => {
                self.push_value(vm.ctx.exceptions.assertion_error.clone().into());
                Ok(None)
            }

            Opcode::BuildTuple => {
                let elements = self.pop_multiple(arg as usize, vm);
                self.push_value(vm.ctx.new_tuple(elements).into());
                Ok(None)
            }
            Opcode::BuildList => {
                let elements = self.pop_multiple(arg as usize, vm);
                self.push_value(vm.ctx.new_list(elements).into());
                Ok(None)
            }
            Opcode::BuildSet => {
                let set = vm.ctx.new_set();
                for item in self.pop_multiple(arg as usize, vm) {
                    set.add(item, vm)?;
                }
                self.push_value(set.into());
                Ok(None)
            }
            Opcode::BuildMap => {
                let map = vm.ctx.new_dict();
                let items = self.pop_multiple(2 * arg as usize, vm);
                for (key, value) in items.into_iter().tuples() {
                    map.set_item(&key, value, vm)?;
                }
                self.push_value(map.into());
                Ok(None)
            }
            Opcode::BuildConstKeyMap => {
                let keys = self.pop_value();
                let keys = keys.payload::<PyTuple>().map(PyTuple::to_vec).unwrap_or_else(|| {
                    vm.fatal(InvariantViolation::BadIndex {
                        opcode: op_name,
                        table: "constant key tuple",
                        index: 0,
                    })
                });
                let values = self.pop_multiple(arg as usize, vm);
                let map = vm.ctx.new_dict();
                for (key, value) in zip(keys, values) {
                    map.set_item(&key, value, vm)?;
                }
                self.push_value(map.into());
                Ok(None)
            }
            Opcode::BuildString => {
                let mut s = String::new();
                for part in self.pop_multiple(arg as usize, vm) {
                    s.push_str(&vm.expect_str(&part, "BUILD_STRING operand")?);
                }
                self.push_value(vm.ctx.new_str(s).into());
                Ok(None)
            }
            Opcode::BuildSlice => {
                let step = if arg == 3 { Some(self.pop_value()) } else { None };
                let stop = self.pop_value();
                let start = self.pop_value();
                let slice = PySlice {
                    start: Some(start),
                    stop,
                    step,
                };
                self.push_value(slice.into_pyobject(vm));
                Ok(None)
            }
            Opcode::ListAppend => {
                let item = self.pop_value();
                let list = self.nth_value(arg as usize - 1, vm);
                self.downcast_operand::<PyList>(&list, op_name, vm)
                    .borrow_vec_mut()
                    .push(item);
                Ok(None)
            }
            Opcode::SetAdd => {
                let item = self.pop_value();
                let set = self.nth_value(arg as usize - 1, vm);
                self.downcast_operand::<PySet>(&set, op_name, vm).add(item, vm)?;
                Ok(None)
            }
            Opcode::MapAdd => {
                let value = self.pop_value();
                let key = self.pop_value();
                let map = self.nth_value(arg as usize - 1, vm);
                self.downcast_operand::<PyDict>(&map, op_name, vm)
                    .set_item(&key, value, vm)?;
                Ok(None)
            }
            Opcode::ListExtend => {
                let iterable = self.pop_value();
                let list = self.nth_value(arg as usize - 1, vm);
                let elements = vm.extract_elements(&iterable).map_err(|err| {
                    if err.fast_isinstance(&vm.ctx.exceptions.type_error)
                        && !iterable.class().has_attr("__iter__")
                    {
                        vm.new_type_error(format!(
                            "Value after * must be an iterable, not {}",
                            iterable.class().name()
                        ))
                    } else {
                        err
                    }
                })?;
                self.downcast_operand::<PyList>(&list, op_name, vm)
                    .borrow_vec_mut()
                    .extend(elements);
                Ok(None)
            }
            Opcode::SetUpdate => {
                let iterable = self.pop_value();
                let set = self.nth_value(arg as usize - 1, vm);
                self.downcast_operand::<PySet>(&set, op_name, vm)
                    .update(&iterable, vm)?;
                Ok(None)
            }
            Opcode::DictUpdate => {
                let other = self.pop_value();
                let map = self.nth_value(arg as usize - 1, vm);
                if !other.class().has_attr("keys") {
                    return Err(vm.new_type_error(format!(
                        "'{}' object is not a mapping",
                        other.class().name()
                    )));
                }
                self.downcast_operand::<PyDict>(&map, op_name, vm)
                    .merge_object(&other, vm)?;
                Ok(None)
            }
            Opcode::DictMerge => {
                let other = self.pop_value();
                let map = self.nth_value(arg as usize - 1, vm);
                let map = self.downcast_operand::<PyDict>(&map, op_name, vm);
                for key in mapping_keys(&other, vm)? {
                    if map.contains_key(&key, vm)? {
                        let key = key.str(vm)?;
                        return Err(vm.new_type_error(format!(
                            "got multiple values for keyword argument '{}'",
                            key.as_str()
                        )));
                    }
                    let value = other.get_item(&key, vm)?;
                    map.set_item(&key, value, vm)?;
                }
                Ok(None)
            }
            Opcode::ListToTuple => {
                let list = self.pop_value();
                let elements = self.downcast_operand::<PyList>(&list, op_name, vm).to_vec();
                self.push_value(vm.ctx.new_tuple(elements).into());
                Ok(None)
            }
            Opcode::UnpackSequence => self.unpack_sequence(arg as usize, vm),
            Opcode::UnpackEx => {
                let before = (arg & 0xff) as usize;
                let after = (arg >> 8) as usize;
                self.execute_unpack_ex(vm, before, after)
            }
            Opcode::FormatValue => {
                let spec = if arg & 0x4 != 0 {
                    let spec = self.pop_value();
                    spec.downcast::<PyStr>()
                        .map_err(|_| vm.new_type_error("format spec must be a str"))?
                } else {
                    vm.ctx.empty_str.clone()
                };
                let value = self.pop_value();
                let value = self.convert_value(arg & 0x3, value, vm)?;
                self.push_value(value.format(&spec, vm)?.into());
                Ok(None)
            }

            Opcode::CallFunction => {
                let args = self.pop_multiple(arg as usize, vm);
                self.execute_call(args.into(), vm)
            }
            Opcode::CallFunctionKw => {
                let names = self.pop_value();
                let names = names
                    .payload::<PyTuple>()
                    .map(PyTuple::to_vec)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|name| vm.expect_str(&name, "keyword"))
                    .collect::<PyResult<Vec<_>>>()?;
                let values = self.pop_multiple(arg as usize, vm);
                if names.len() > values.len() {
                    vm.fatal(InvariantViolation::StackUnderflow { opcode: op_name });
                }
                let args = FuncArgs::with_kwargs_names(values.into_iter(), names.into_iter());
                self.execute_call(args, vm)
            }
            Opcode::CallFunctionEx => {
                let args = self.collect_ex_args(vm, arg & 0x1 != 0)?;
                self.execute_call(args, vm)
            }
            Opcode::MakeFunction => self.execute_make_function(arg, vm),

            Opcode::JumpForward | Opcode::JumpAbsolute => {
                self.jump_to(instruction);
                Ok(None)
            }
            Opcode::PopJumpIfFalse => self.pop_jump_if(instruction, false, vm),
            Opcode::PopJumpIfTrue => self.pop_jump_if(instruction, true, vm),
            Opcode::JumpIfFalseOrPop => self.jump_if_or_pop(instruction, false, vm),
            Opcode::JumpIfTrueOrPop => self.jump_if_or_pop(instruction, true, vm),
            Opcode::GetIter => {
                let iterated_obj = self.pop_value();
                let iter_obj = iterated_obj.get_iter(vm)?;
                self.push_value(iter_obj.into_object());
                Ok(None)
            }
            Opcode::GetYieldFromIter => {
                let iterable = self.pop_value();
                let iter = if iterable.payload_is::<PyGenerator>() {
                    iterable
                } else {
                    iterable.get_iter(vm)?.into_object()
                };
                self.push_value(iter);
                Ok(None)
            }
            Opcode::ForIter => self.execute_for_iter(instruction, vm),
            Opcode::ReturnValue => {
                let value = self.pop_value();
                Ok(Some(ExecutionResult::Return(value)))
            }
            Opcode::YieldValue => {
                let value = self.pop_value();
                Ok(Some(ExecutionResult::Yield(value)))
            }
            Opcode::YieldFrom => self.execute_yield_from(vm),

            Opcode::SetupFinally => {
                let handler = self.jump_target(instruction);
                self.state.blocks.push(Block {
                    typ: BlockType::Finally,
                    handler,
                    level: self.state.stack.len(),
                });
                Ok(None)
            }
            Opcode::PopBlock => {
                if self.state.blocks.pop().is_none() {
                    vm.fatal(InvariantViolation::BlockUnderflow { opcode: op_name });
                }
                Ok(None)
            }
            Opcode::PopExcept => {
                let prev = match self.state.blocks.pop() {
                    Some(Block {
                        typ: BlockType::ExceptHandler { prev },
                        ..
                    }) => prev,
                    _ => vm.fatal(InvariantViolation::BlockUnderflow { opcode: op_name }),
                };
                // the saved triple of the exception handled before this one
                for _ in 0..3 {
                    self.pop_value();
                }
                vm.set_exception(prev);
                Ok(None)
            }
            Opcode::Reraise => {
                let typ = self.pop_value();
                let value = self.pop_value();
                let _traceback = self.pop_value();
                if !typ.payload_is::<PyType>() {
                    vm.fatal(InvariantViolation::ReraiseNonType {
                        found: typ.class().name().to_owned(),
                    });
                }
                match value.downcast::<PyBaseException>() {
                    Ok(exc) => Err(exc),
                    Err(value) => vm.fatal(InvariantViolation::ReraiseNonException {
                        found: value.class().name().to_owned(),
                    }),
                }
            }
            Opcode::JumpIfNotExcMatch => {
                let candidate = self.pop_value();
                let raised = self.pop_value();
                let raised = match raised.downcast::<PyType>() {
                    Ok(typ) if typ.fast_issubclass(&vm.ctx.exceptions.base_exception_type) => typ,
                    Ok(typ) => vm.fatal(InvariantViolation::ExceptionMatchNonType {
                        found: typ.name().to_owned(),
                    }),
                    Err(obj) => vm.fatal(InvariantViolation::ExceptionMatchNonType {
                        found: obj.class().name().to_owned(),
                    }),
                };
                if !exception_matches(&raised, &candidate, vm)? {
                    self.jump_to(instruction);
                }
                Ok(None)
            }
            Opcode::RaiseVarargs => self.execute_raise(arg, vm),

            Opcode::ImportName => {
                let name = self.name(op_name, arg, vm).to_owned();
                let _fromlist = self.pop_value();
                let _level = self.pop_value();
                let module = vm.import(&name)?;
                self.push_value(module);
                Ok(None)
            }
            Opcode::ImportFrom => {
                let module = self.top_value(vm);
                let name = self.name(op_name, arg, vm);
                let value = vm.get_attribute_opt(&module, name)?.ok_or_else(|| {
                    let module_name = module
                        .get_attr("__name__", vm)
                        .ok()
                        .and_then(|name| name.downcast::<PyStr>().ok())
                        .map_or_else(|| "<unknown module name>".to_owned(), |s| s.as_str().to_owned());
                    vm.new_import_error(format!(
                        "cannot import name '{name}' from '{module_name}'"
                    ))
                })?;
                self.push_value(value);
                Ok(None)
            }
            _ => Err(vm.new_system_error(format!("unimplemented opcode {op_name}"))),
        }
    }

    fn load_global_or_builtin(&self, name: &str, vm: &VirtualMachine) -> PyResult {
        self.globals
            .get_item_str(name, vm)
            .or_else(|| self.builtins.get_item_str(name, vm))
            .ok_or_else(|| vm.new_name_error(name))
    }

    /// Leaves `[method, self]` when the attribute is a plain function found on the class,
    /// and `[NULL, attribute]` otherwise.
    fn load_method(&mut self, obj: PyObjectRef, name: &str, vm: &VirtualMachine) -> PyResult<()> {
        let cls = obj.class().clone();
        let shadowed = obj
            .dict()
            .is_some_and(|dict| dict.get_item_str(name, vm).is_some());
        if !shadowed
            && !cls.flags.contains(crate::builtins::PyTypeFlags::HAS_GETATTRIBUTE)
            && let Some(func) = cls.get_attr(name)
            && func.payload_is::<PyFunction>()
        {
            self.push_value(func);
            self.push_value(obj);
            return Ok(());
        }
        let attr = obj.get_attr(name, vm)?;
        self.push_null();
        self.push_value(attr);
        Ok(())
    }

    fn collect_ex_args(&mut self, vm: &VirtualMachine, has_kwargs: bool) -> PyResult<FuncArgs> {
        let kwargs = if has_kwargs {
            let kw_obj = self.pop_value();
            let mut kwargs = indexmap::IndexMap::new();
            for key in mapping_keys(&kw_obj, vm)? {
                let key_str = key
                    .payload::<PyStr>()
                    .ok_or_else(|| vm.new_type_error("keywords must be strings"))?
                    .as_str()
                    .to_owned();
                let value = kw_obj.get_item(&key, vm)?;
                kwargs.insert(key_str, value);
            }
            kwargs
        } else {
            indexmap::IndexMap::new()
        };
        let args = self.pop_value();
        let args = vm.extract_elements(&args)?;
        Ok(FuncArgs::new(args, kwargs))
    }

    #[inline]
    fn execute_call(&mut self, args: FuncArgs, vm: &VirtualMachine) -> FrameResult {
        let func_ref = self.pop_value();
        let value = vm.invoke(&func_ref, args)?;
        self.push_value(value);
        Ok(None)
    }

    fn execute_raise(&mut self, argc: u32, vm: &VirtualMachine) -> FrameResult {
        let cause = match argc {
            2 => {
                let cause = self.pop_value();
                Some(if vm.is_none(&cause) {
                    None
                } else {
                    Some(match ExceptionCtor::try_from_object(vm, cause) {
                        Ok(ctor) => ctor.instantiate(vm)?,
                        Err(_) => {
                            return Err(vm.new_type_error(
                                "exception causes must derive from BaseException",
                            ));
                        }
                    })
                })
            }
            _ => None,
        };
        let exception = match argc {
            0 => vm
                .topmost_exception()
                .ok_or_else(|| vm.new_runtime_error("No active exception to reraise"))?,
            1 | 2 => {
                let exc = self.pop_value();
                let exception = vm.normalize_exception(exc, None)?;
                vm.contextualize_exception(&exception);
                exception
            }
            _ => vm.fatal(InvariantViolation::BadIndex {
                opcode: "RAISE_VARARGS",
                table: "raise forms",
                index: argc as usize,
            }),
        };
        if let Some(cause) = cause {
            exception.set_cause(cause);
        }
        debug!(
            "raising {} in {}",
            exception.class().name(),
            self.code.name
        );
        Err(exception)
    }

    fn execute_yield_from(&mut self, vm: &VirtualMachine) -> FrameResult {
        let value = self.pop_value();
        let receiver = self.top_value(vm);
        let result = if let Some(generator) = receiver.payload::<PyGenerator>() {
            generator.as_coro().send(value, vm)?
        } else if vm.is_none(&value) {
            PyIter::new(receiver.clone()).next(vm)?
        } else {
            PyIterReturn::from_pyresult(vm.call_method(&receiver, "send", vec![value]), vm)?
        };
        match result {
            PyIterReturn::Return(value) => {
                // resume at this instruction to send the next value
                self.lasti.set(self.lasti.get() - 1);
                Ok(Some(ExecutionResult::Yield(value)))
            }
            PyIterReturn::StopIteration(value) => {
                self.pop_value();
                self.push_value(value.unwrap_or_else(|| vm.ctx.none()));
                Ok(None)
            }
        }
    }

    fn unpack_sequence(&mut self, size: usize, vm: &VirtualMachine) -> FrameResult {
        let value = self.pop_value();
        let elements = vm.extract_elements(&value).map_err(|err| {
            if err.fast_isinstance(&vm.ctx.exceptions.type_error) {
                vm.new_type_error(format!(
                    "cannot unpack non-iterable {} object",
                    value.class().name()
                ))
            } else {
                err
            }
        })?;
        match elements.len().cmp(&size) {
            core::cmp::Ordering::Equal => {
                self.state
                    .stack
                    .extend(elements.into_iter().rev().map(Some));
                Ok(None)
            }
            core::cmp::Ordering::Greater => Err(vm.new_value_error(format!(
                "too many values to unpack (expected {size})"
            ))),
            core::cmp::Ordering::Less => Err(vm.new_value_error(format!(
                "not enough values to unpack (expected {size}, got {})",
                elements.len()
            ))),
        }
    }

    fn execute_unpack_ex(&mut self, vm: &VirtualMachine, before: usize, after: usize) -> FrameResult {
        let value = self.pop_value();
        let mut elements = vm.extract_elements(&value)?;
        let min_expected = before + after;
        if elements.len() < min_expected {
            return Err(vm.new_value_error(format!(
                "not enough values to unpack (expected at least {min_expected}, got {})",
                elements.len()
            )));
        }
        let tail = elements.split_off(elements.len() - after);
        let middle = elements.split_off(before);
        // the first element ends up on top of the stack
        self.state.stack.extend(tail.into_iter().rev().map(Some));
        self.push_value(vm.ctx.new_list(middle).into());
        self.state.stack.extend(elements.into_iter().rev().map(Some));
        Ok(None)
    }

    fn jump_target(&self, instruction: Instruction) -> usize {
        // the instruction proper sits right before lasti
        let index = self.lasti.get() - 1;
        instruction.jump_target(index).unwrap_or(index + 1)
    }

    #[inline]
    fn jump_to(&mut self, instruction: Instruction) {
        let target = self.jump_target(instruction);
        self.jump(target);
    }

    #[inline]
    fn jump(&mut self, target: usize) {
        vm_trace!("jump from {:?} to {:?}", self.lasti.get(), target);
        self.lasti.set(target);
    }

    #[inline]
    fn pop_jump_if(&mut self, instruction: Instruction, flag: bool, vm: &VirtualMachine) -> FrameResult {
        let obj = self.pop_value();
        let value = obj.is_true(vm)?;
        if value == flag {
            self.jump_to(instruction);
        }
        Ok(None)
    }

    #[inline]
    fn jump_if_or_pop(&mut self, instruction: Instruction, flag: bool, vm: &VirtualMachine) -> FrameResult {
        let obj = self.top_value(vm);
        let value = obj.is_true(vm)?;
        if value == flag {
            self.jump_to(instruction);
        } else {
            self.pop_value();
        }
        Ok(None)
    }

    /// The top of stack contains the iterator, lets push it forward
    fn execute_for_iter(&mut self, instruction: Instruction, vm: &VirtualMachine) -> FrameResult {
        let top = self.top_value(vm);
        let next_obj = PyIter::new(top).next(vm)?;

        // Check the next object:
        match next_obj {
            PyIterReturn::Return(value) => {
                self.push_value(value);
            }
            PyIterReturn::StopIteration(_) => {
                // Pop iterator from stack:
                self.pop_value();
                self.jump_to(instruction);
            }
        }
        Ok(None)
    }

    fn execute_make_function(&mut self, flags: u32, vm: &VirtualMachine) -> FrameResult {
        let qualname = self.pop_value();
        let qualname: PyStrRef = qualname.try_into_value(vm)?;
        let code = self.pop_value();
        let code = self.downcast_operand::<PyCode>(&code, "MAKE_FUNCTION", vm);

        let closure = if flags & 0x08 != 0 {
            let cells = self.pop_value();
            vm.extract_elements(&cells)?
                .into_iter()
                .map(|cell| cell.try_into_value::<PyCellRef>(vm))
                .collect::<PyResult<Vec<_>>>()?
        } else {
            vec![]
        };
        if flags & 0x04 != 0 {
            // annotations are accepted and dropped
            self.pop_value();
        }
        let kwdefaults = if flags & 0x02 != 0 {
            Some(self.pop_value().try_into_value(vm)?)
        } else {
            None
        };
        let defaults = if flags & 0x01 != 0 {
            Some(self.pop_value().try_into_value(vm)?)
        } else {
            None
        };

        let func = PyFunction::new(
            code,
            self.globals.clone(),
            closure,
            defaults,
            kwdefaults,
            qualname,
            vm,
        );
        let func = PyRef::new_ref(
            func,
            vm.ctx.types.function_type.clone(),
            Some(vm.ctx.new_dict()),
        );
        self.push_value(func.into());
        Ok(None)
    }

    #[inline]
    fn execute_bin_op(
        &mut self,
        vm: &VirtualMachine,
        op: fn(&VirtualMachine, &PyObjectRef, &PyObjectRef) -> PyResult,
    ) -> FrameResult {
        let b_ref = self.pop_value();
        let a_ref = self.pop_value();
        let value = op(vm, &a_ref, &b_ref)?;
        self.push_value(value);
        Ok(None)
    }

    #[inline]
    fn execute_unary(
        &mut self,
        vm: &VirtualMachine,
        op: fn(&VirtualMachine, &PyObjectRef) -> PyResult,
    ) -> FrameResult {
        let a = self.pop_value();
        let value = op(vm, &a)?;
        self.push_value(value);
        Ok(None)
    }

    fn convert_value(&self, conversion: u32, value: PyObjectRef, vm: &VirtualMachine) -> PyResult {
        Ok(match conversion {
            1 => value.str(vm)?.into(),
            2 => value.repr(vm)?.into(),
            3 => vm.ctx.new_str(value.ascii(vm)?).into(),
            _ => value,
        })
    }

    /// `ROT_TWO`, `ROT_THREE` and `ROT_FOUR`: the top of stack moves `count - 1` slots down.
    fn rotate(&mut self, count: usize, vm: &VirtualMachine) -> FrameResult {
        let len = self.state.stack.len();
        if len < count {
            vm.fatal(InvariantViolation::StackUnderflow { opcode: "ROT" });
        }
        self.state.stack[len - count..].rotate_right(1);
        Ok(None)
    }

    fn downcast_operand<T: PyPayload>(
        &self,
        obj: &PyObjectRef,
        opcode: &'static str,
        vm: &VirtualMachine,
    ) -> PyRef<T> {
        match obj.clone().downcast::<T>() {
            Ok(obj) => obj,
            Err(obj) => vm.fatal(InvariantViolation::BadIndex {
                opcode,
                table: "operand types",
                index: obj.get_id(),
            }),
        }
    }

    #[inline]
    fn push_value(&mut self, obj: PyObjectRef) {
        self.state.stack.push(Some(obj));
    }

    #[inline]
    fn push_null(&mut self) {
        self.state.stack.push(None);
    }

    /// Pop a value that may be the NULL of `LOAD_METHOD`.
    #[inline]
    fn pop_value_opt(&mut self) -> Option<PyObjectRef> {
        match self.state.stack.pop() {
            Some(slot) => slot,
            None => self.underflow("POP"),
        }
    }

    #[inline]
    #[track_caller]
    fn pop_value(&mut self) -> PyObjectRef {
        match self.state.stack.pop() {
            Some(Some(obj)) => obj,
            _ => self.underflow("POP"),
        }
    }

    fn pop_multiple(&mut self, count: usize, vm: &VirtualMachine) -> Vec<PyObjectRef> {
        let stack_len = self.state.stack.len();
        if count > stack_len {
            vm.fatal(InvariantViolation::StackUnderflow { opcode: "POP_N" });
        }
        self.state
            .stack
            .drain(stack_len - count..)
            .map(|slot| slot.unwrap_or_else(|| vm.fatal(InvariantViolation::StackUnderflow { opcode: "POP_N" })))
            .collect()
    }

    #[inline]
    fn top_value(&self, vm: &VirtualMachine) -> PyObjectRef {
        self.nth_value(0, vm)
    }

    /// The value `depth` slots below the top of the stack.
    #[inline]
    fn nth_value(&self, depth: usize, vm: &VirtualMachine) -> PyObjectRef {
        let stack = &self.state.stack;
        match stack.len().checked_sub(depth + 1).and_then(|i| stack[i].clone()) {
            Some(obj) => obj,
            None => vm.fatal(InvariantViolation::StackUnderflow { opcode: "PEEK" }),
        }
    }

    #[cold]
    #[inline(never)]
    fn underflow(&self, opcode: &'static str) -> ! {
        error!("operand stack underflow in {}", self.code.name);
        std::panic::resume_unwind(Box::new(crate::fatal::FatalError::new(
            InvariantViolation::StackUnderflow { opcode },
        )))
    }
}

/// The keys of a `**` operand: a dict, or anything with a `keys()` method.
fn mapping_keys(mapping: &PyObjectRef, vm: &VirtualMachine) -> PyResult<Vec<PyObjectRef>> {
    if let Some(dict) = mapping.payload::<PyDict>() {
        return Ok(dict.keys());
    }
    let keys = vm.get_attribute_opt(mapping, "keys")?.ok_or_else(|| {
        vm.new_type_error(format!(
            "argument after ** must be a mapping, not {}",
            mapping.class().name()
        ))
    })?;
    vm.extract_elements(&vm.invoke(&keys, ())?)
}

/// `except` matching: a class or a tuple of classes, each deriving from BaseException.
fn exception_matches(raised: &crate::builtins::PyTypeRef, candidate: &PyObjectRef, vm: &VirtualMachine) -> PyResult<bool> {
    let candidates = match candidate.payload::<PyTuple>() {
        Some(tuple) => tuple.to_vec(),
        None => vec![candidate.clone()],
    };
    let mut matched = false;
    for cls in candidates {
        match cls.downcast::<PyType>() {
            Ok(cls) if cls.fast_issubclass(&vm.ctx.exceptions.base_exception_type) => {
                matched |= raised.fast_issubclass(&cls);
            }
            _ => {
                return Err(vm.new_type_error(
                    "catching classes that do not inherit from BaseException is not allowed",
                ));
            }
        }
    }
    Ok(matched)
}

fn frame_zelf(args: FuncArgs, name: &str, vm: &VirtualMachine) -> PyResult<FrameRef> {
    let [zelf] = args.bind(name, vm)?;
    zelf.try_into_value(vm)
}

fn frame_code(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    Ok(frame_zelf(args, "f_code", vm)?.code.clone().into())
}

fn frame_lineno(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let zelf = frame_zelf(args, "f_lineno", vm)?;
    Ok(vm.ctx.new_int(zelf.current_line()).into())
}

fn frame_lasti(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let zelf = frame_zelf(args, "f_lasti", vm)?;
    Ok(vm.ctx.new_int(zelf.lasti().saturating_sub(1) * 2).into())
}

fn frame_globals(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    Ok(frame_zelf(args, "f_globals", vm)?.globals.clone().into())
}

fn frame_builtins(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    Ok(frame_zelf(args, "f_builtins", vm)?.builtins.clone().into())
}

fn frame_locals(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    Ok(frame_zelf(args, "f_locals", vm)?.locals(vm)?.into())
}

fn frame_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<Frame>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    Ok(vm
        .ctx
        .new_str(format!(
            "<frame at {:#x}, file '{}', line {}, code {}>",
            zelf.get_id(),
            zelf.code.filename,
            zelf.current_line(),
            zelf.code.name
        ))
        .into())
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.frame_type, {
        "__repr__" => ctx.new_method("__repr__", frame_repr),
        "f_code" => ctx.new_readonly_getset("f_code", frame_code),
        "f_lineno" => ctx.new_readonly_getset("f_lineno", frame_lineno),
        "f_lasti" => ctx.new_readonly_getset("f_lasti", frame_lasti),
        "f_globals" => ctx.new_readonly_getset("f_globals", frame_globals),
        "f_builtins" => ctx.new_readonly_getset("f_builtins", frame_builtins),
        "f_locals" => ctx.new_readonly_getset("f_locals", frame_locals),
    });
}
