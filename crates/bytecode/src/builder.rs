//! A small label-resolving assembler producing [`CodeObject`]s without going through the
//! external compiler. The test-suites and benchmarks use it to build programs by hand.

use crate::{
    bytecode::{CodeFlags, CodeObject, ConstantData},
    opcode::{JumpKind, Opcode},
};
use indexmap::IndexSet;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("label {0} was never bound")]
    UnboundLabel(u32),
    #[error("stack underflow at instruction {index} ({opcode})")]
    StackUnderflow { index: usize, opcode: Opcode },
    #[error("no stack effect is known for {0}")]
    UnknownStackEffect(Opcode),
    #[error("instructions reached with different stack depths at {index}")]
    InconsistentDepth { index: usize },
}

/// A jump target inside a [`CodeBuilder`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label(u32);

#[derive(Clone, Debug)]
struct InstructionInfo {
    opcode: Opcode,
    arg: u32,
    target: Option<Label>,
    line: u32,
}

#[derive(Clone, Debug)]
pub struct CodeBuilder {
    name: String,
    filename: String,
    firstlineno: u32,
    flags: CodeFlags,
    argcount: u32,
    posonlyargcount: u32,
    kwonlyargcount: u32,
    consts: Vec<ConstantData>,
    names: IndexSet<String>,
    varnames: IndexSet<String>,
    cellvars: IndexSet<String>,
    freevars: IndexSet<String>,
    instructions: Vec<InstructionInfo>,
    labels: Vec<Option<usize>>,
    current_line: u32,
}

impl CodeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: "<builder>".to_owned(),
            firstlineno: 1,
            flags: CodeFlags::empty(),
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            consts: Vec::new(),
            names: IndexSet::new(),
            varnames: IndexSet::new(),
            cellvars: IndexSet::new(),
            freevars: IndexSet::new(),
            instructions: Vec::new(),
            labels: Vec::new(),
            current_line: 1,
        }
    }

    /// A function body taking `params` positionally. Parameters become the leading varnames.
    pub fn function(name: impl Into<String>, params: &[&str]) -> Self {
        let mut builder =
            Self::new(name).with_flags(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS);
        builder.argcount = params.len() as u32;
        for param in params {
            builder.varnames.insert((*param).to_owned());
        }
        builder
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_first_line(mut self, line: u32) -> Self {
        self.firstlineno = line;
        self.current_line = line;
        self
    }

    pub fn with_flags(mut self, flags: CodeFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Appends keyword-only parameters after the positional ones.
    pub fn with_kwonly(mut self, params: &[&str]) -> Self {
        self.kwonlyargcount += params.len() as u32;
        for param in params {
            self.varnames.insert((*param).to_owned());
        }
        self
    }

    /// Declares a `*args` parameter. Must follow every positional and keyword-only parameter.
    pub fn with_varargs(mut self, name: &str) -> Self {
        self.flags |= CodeFlags::VARARGS;
        self.varnames.insert(name.to_owned());
        self
    }

    /// Declares a `**kwargs` parameter. Must be the last parameter declared.
    pub fn with_varkeywords(mut self, name: &str) -> Self {
        self.flags |= CodeFlags::VARKEYWORDS;
        self.varnames.insert(name.to_owned());
        self
    }

    pub fn with_cellvars(mut self, names: &[&str]) -> Self {
        self.cellvars.extend(names.iter().map(|&n| n.to_owned()));
        self
    }

    pub fn with_freevars(mut self, names: &[&str]) -> Self {
        self.freevars.extend(names.iter().map(|&n| n.to_owned()));
        self.flags |= CodeFlags::NESTED;
        self
    }

    pub fn set_line(&mut self, line: u32) -> &mut Self {
        self.current_line = line;
        self
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Binds `label` to the next emitted instruction.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0 as usize] = Some(self.instructions.len());
        self
    }

    pub fn emit(&mut self, opcode: Opcode, arg: u32) -> &mut Self {
        debug_assert!(
            opcode.jump_kind().is_none(),
            "{opcode} needs a label, use emit_jump"
        );
        self.push(opcode, arg, None)
    }

    pub fn emit_jump(&mut self, opcode: Opcode, target: Label) -> &mut Self {
        debug_assert!(opcode.jump_kind().is_some(), "{opcode} is not a jump");
        self.push(opcode, 0, Some(target))
    }

    fn push(&mut self, opcode: Opcode, arg: u32, target: Option<Label>) -> &mut Self {
        self.instructions.push(InstructionInfo {
            opcode,
            arg,
            target,
            line: self.current_line,
        });
        self
    }

    pub fn const_index(&mut self, constant: ConstantData) -> u32 {
        let idx = match self.consts.iter().position(|c| *c == constant) {
            Some(idx) => idx,
            None => {
                self.consts.push(constant);
                self.consts.len() - 1
            }
        };
        idx as u32
    }

    pub fn name_index(&mut self, name: &str) -> u32 {
        self.names.insert_full(name.to_owned()).0 as u32
    }

    pub fn varname_index(&mut self, name: &str) -> u32 {
        self.varnames.insert_full(name.to_owned()).0 as u32
    }

    /// Index used by the `*_DEREF` family: cell variables first, then free variables.
    pub fn deref_index(&self, name: &str) -> u32 {
        if let Some(idx) = self.cellvars.get_index_of(name) {
            return idx as u32;
        }
        let idx = self
            .freevars
            .get_index_of(name)
            .unwrap_or_else(|| panic!("{name:?} is neither a cell nor a free variable"));
        (self.cellvars.len() + idx) as u32
    }

    pub fn load_const(&mut self, constant: ConstantData) -> &mut Self {
        let idx = self.const_index(constant);
        self.emit(Opcode::LoadConst, idx)
    }

    pub fn load_int(&mut self, value: i64) -> &mut Self {
        self.load_const(ConstantData::Integer { value })
    }

    pub fn load_str(&mut self, value: &str) -> &mut Self {
        self.load_const(ConstantData::Str {
            value: value.to_owned(),
        })
    }

    pub fn load_none(&mut self) -> &mut Self {
        self.load_const(ConstantData::None)
    }

    pub fn load_code(&mut self, code: CodeObject) -> &mut Self {
        self.load_const(ConstantData::Code {
            code: Box::new(code),
        })
    }

    pub fn named(&mut self, opcode: Opcode, name: &str) -> &mut Self {
        let idx = self.name_index(name);
        self.emit(opcode, idx)
    }

    pub fn fast(&mut self, opcode: Opcode, name: &str) -> &mut Self {
        let idx = self.varname_index(name);
        self.emit(opcode, idx)
    }

    pub fn deref(&mut self, opcode: Opcode, name: &str) -> &mut Self {
        let idx = self.deref_index(name);
        self.emit(opcode, idx)
    }

    pub fn load_name(&mut self, name: &str) -> &mut Self {
        self.named(Opcode::LoadName, name)
    }

    pub fn store_name(&mut self, name: &str) -> &mut Self {
        self.named(Opcode::StoreName, name)
    }

    pub fn load_global(&mut self, name: &str) -> &mut Self {
        self.named(Opcode::LoadGlobal, name)
    }

    pub fn load_attr(&mut self, name: &str) -> &mut Self {
        self.named(Opcode::LoadAttr, name)
    }

    pub fn load_method(&mut self, name: &str) -> &mut Self {
        self.named(Opcode::LoadMethod, name)
    }

    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        self.fast(Opcode::LoadFast, name)
    }

    pub fn store_fast(&mut self, name: &str) -> &mut Self {
        self.fast(Opcode::StoreFast, name)
    }

    pub fn return_value(&mut self) -> &mut Self {
        self.emit(Opcode::ReturnValue, 0)
    }

    /// Resolves labels, encodes the wordcode and computes the stack size.
    pub fn finish(self) -> Result<CodeObject, BuildError> {
        let targets = self
            .instructions
            .iter()
            .map(|info| {
                info.target
                    .map(|label| {
                        self.labels[label.0 as usize].ok_or(BuildError::UnboundLabel(label.0))
                    })
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let stacksize = self.max_stackdepth(&targets)?;
        let (code, offsets) = self.encode(&targets);
        let lnotab = self.line_table(&offsets);
        let nlocals = self.varnames.len() as u32;
        let mut flags = self.flags;
        if self.cellvars.is_empty() && self.freevars.is_empty() {
            flags |= CodeFlags::NOFREE;
        }

        Ok(CodeObject {
            argcount: self.argcount,
            posonlyargcount: self.posonlyargcount,
            kwonlyargcount: self.kwonlyargcount,
            nlocals,
            stacksize,
            flags,
            code,
            constants: self.consts,
            names: self.names.into_iter().collect(),
            varnames: self.varnames.into_iter().collect(),
            freevars: self.freevars.into_iter().collect(),
            cellvars: self.cellvars.into_iter().collect(),
            filename: self.filename,
            name: self.name,
            firstlineno: self.firstlineno,
            lnotab,
        })
    }

    /// Lays out the instructions, growing `EXTENDED_ARG` prefixes until the jump
    /// arguments stop changing. Returns the wordcode and each instruction's first unit.
    fn encode(&self, targets: &[Option<usize>]) -> (Vec<u8>, Vec<usize>) {
        let mut sizes = vec![1usize; self.instructions.len()];
        let mut offsets = vec![0usize; self.instructions.len() + 1];
        let mut args = vec![0u32; self.instructions.len()];
        loop {
            for (i, size) in sizes.iter().enumerate() {
                offsets[i + 1] = offsets[i] + size;
            }
            let mut changed = false;
            for (i, info) in self.instructions.iter().enumerate() {
                let arg = match (targets[i], info.opcode.jump_kind()) {
                    (Some(target), Some(JumpKind::Absolute)) => offsets[target] * 2,
                    (Some(target), Some(JumpKind::Relative)) => {
                        offsets[target].saturating_sub(offsets[i + 1]) * 2
                    }
                    _ => info.arg as usize,
                } as u32;
                args[i] = arg;
                let size = instr_size(arg);
                if size > sizes[i] {
                    sizes[i] = size;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut code = Vec::with_capacity(offsets[self.instructions.len()] * 2);
        for (i, info) in self.instructions.iter().enumerate() {
            let arg = args[i];
            // pad with EXTENDED_ARG 0 when a shrunken argument still owns a larger slot
            for shift in (1..sizes[i]).rev() {
                code.push(Opcode::ExtendedArg.into());
                code.push((arg >> (8 * shift)) as u8);
            }
            code.push(info.opcode.into());
            code.push(arg as u8);
        }
        offsets.truncate(self.instructions.len());
        (code, offsets)
    }

    fn line_table(&self, offsets: &[usize]) -> Vec<u8> {
        let mut lnotab = Vec::new();
        let mut last_addr = 0usize;
        let mut last_line = i64::from(self.firstlineno);
        for (info, &offset) in self.instructions.iter().zip(offsets) {
            let line = i64::from(info.line);
            if line == last_line {
                continue;
            }
            let mut addr_delta = (offset - last_addr) * 2;
            let mut line_delta = line - last_line;
            while addr_delta > 255 {
                lnotab.extend([255, 0]);
                addr_delta -= 255;
            }
            while line_delta > 127 {
                lnotab.extend([addr_delta as u8, 127]);
                addr_delta = 0;
                line_delta -= 127;
            }
            while line_delta < -128 {
                lnotab.extend([addr_delta as u8, (-128i8) as u8]);
                addr_delta = 0;
                line_delta += 128;
            }
            lnotab.extend([addr_delta as u8, (line_delta as i8) as u8]);
            last_addr = offset;
            last_line = line;
        }
        lnotab
    }

    fn max_stackdepth(&self, targets: &[Option<usize>]) -> Result<u32, BuildError> {
        let mut maxdepth = 0u32;
        let mut start_depths: Vec<Option<u32>> = vec![None; self.instructions.len()];
        let mut stack = Vec::new();
        if !self.instructions.is_empty() {
            start_depths[0] = Some(0);
            stack.push(0usize);
        }
        while let Some(start) = stack.pop() {
            let mut depth = start_depths[start].unwrap_or_default();
            for (index, info) in self.instructions.iter().enumerate().skip(start) {
                if index != start {
                    match start_depths[index] {
                        // already walked from here
                        Some(seen) if seen == depth => break,
                        Some(_) => return Err(BuildError::InconsistentDepth { index }),
                        None => start_depths[index] = Some(depth),
                    }
                }
                if let Some(target) = targets[index] {
                    let target_depth = apply_effect(info, index, depth, true)?;
                    maxdepth = maxdepth.max(target_depth);
                    stackdepth_push(&mut stack, &mut start_depths, target, target_depth)?;
                }
                depth = apply_effect(info, index, depth, false)?;
                maxdepth = maxdepth.max(depth);
                if is_block_exit(info.opcode) {
                    break;
                }
            }
        }
        Ok(maxdepth)
    }
}

fn apply_effect(
    info: &InstructionInfo,
    index: usize,
    depth: u32,
    jump: bool,
) -> Result<u32, BuildError> {
    let effect = info
        .opcode
        .stack_effect(info.arg, jump)
        .ok_or(BuildError::UnknownStackEffect(info.opcode))?;
    depth
        .checked_add_signed(effect)
        .ok_or(BuildError::StackUnderflow {
            index,
            opcode: info.opcode,
        })
}

fn stackdepth_push(
    stack: &mut Vec<usize>,
    start_depths: &mut [Option<u32>],
    target: usize,
    depth: u32,
) -> Result<(), BuildError> {
    let Some(&slot) = start_depths.get(target) else {
        // a label bound past the last instruction
        return Ok(());
    };
    match slot {
        Some(seen) if seen != depth => Err(BuildError::InconsistentDepth { index: target }),
        Some(_) => Ok(()),
        None => {
            start_depths[target] = Some(depth);
            stack.push(target);
            Ok(())
        }
    }
}

/// Instructions after which control never falls through.
fn is_block_exit(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::JumpAbsolute
            | Opcode::JumpForward
            | Opcode::ReturnValue
            | Opcode::Reraise
            | Opcode::RaiseVarargs
    )
}

/// Number of wordcode units an instruction with `arg` occupies.
#[inline]
const fn instr_size(arg: u32) -> usize {
    (arg > 0xff) as usize + (arg > 0xff_ff) as usize + (arg > 0xff_ff_ff) as usize + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_simple_module() {
        let mut b = CodeBuilder::new("<module>");
        b.load_int(1).store_name("x").load_none().return_value();
        let code = b.finish().unwrap();
        assert_eq!(
            code.code,
            [
                u8::from(Opcode::LoadConst),
                0,
                Opcode::StoreName.into(),
                0,
                Opcode::LoadConst.into(),
                1,
                Opcode::ReturnValue.into(),
                0
            ]
        );
        assert_eq!(code.stacksize, 1);
        assert!(code.flags.contains(CodeFlags::NOFREE));
        let expected = [
            "   1       0 LOAD_CONST            0 (1)",
            "           2 STORE_NAME            0 (x)",
            "           4 LOAD_CONST            1 (None)",
            "           6 RETURN_VALUE",
        ];
        assert_eq!(code.to_string(), expected.join("\n") + "\n");
    }

    #[test]
    fn constants_and_names_are_interned() {
        let mut b = CodeBuilder::function("f", &["a"]);
        assert_eq!(b.const_index(ConstantData::Integer { value: 7 }), 0);
        assert_eq!(b.const_index(ConstantData::Boolean { value: true }), 1);
        assert_eq!(b.const_index(ConstantData::Integer { value: 7 }), 0);
        assert_eq!(b.varname_index("a"), 0);
        assert_eq!(b.varname_index("tmp"), 1);
        assert_eq!(b.name_index("print"), 0);
        let code = b.finish().unwrap();
        assert_eq!(code.nlocals, 2);
        assert_eq!(code.argcount, 1);
    }

    #[test]
    fn resolves_forward_and_backward_jumps() {
        // while True: pass
        let mut b = CodeBuilder::new("<module>");
        let top = b.new_label();
        let exit = b.new_label();
        b.bind(top);
        b.load_const(ConstantData::Boolean { value: true });
        b.emit_jump(Opcode::PopJumpIfFalse, exit);
        b.emit_jump(Opcode::JumpAbsolute, top);
        b.bind(exit);
        b.load_none().return_value();
        let code = b.finish().unwrap();

        let (_, jump) = code.fetch(1).unwrap();
        assert_eq!(jump.jump_target(1), Some(3));
        let (_, back) = code.fetch(2).unwrap();
        assert_eq!(back.jump_target(2), Some(0));
    }

    #[test]
    fn long_jumps_get_extended_args() {
        let mut b = CodeBuilder::new("<module>");
        let end = b.new_label();
        b.emit_jump(Opcode::JumpForward, end);
        for _ in 0..300 {
            b.emit(Opcode::Nop, 0);
        }
        b.bind(end);
        b.load_none().return_value();
        let code = b.finish().unwrap();

        assert_eq!(code.code[0], u8::from(Opcode::ExtendedArg));
        let (index, jump) = code.fetch(0).unwrap();
        assert_eq!(index, 1);
        let target = jump.jump_target(index).unwrap();
        assert_eq!(
            code.instruction_at(target).unwrap().opcode,
            Opcode::LoadConst
        );
    }

    #[test]
    fn stack_depth_follows_both_branches() {
        // for x in (1, 2): x  inside a handler that receives six values
        let mut b = CodeBuilder::new("<module>");
        let handler = b.new_label();
        let loop_top = b.new_label();
        let done = b.new_label();
        b.emit_jump(Opcode::SetupFinally, handler);
        b.load_const(ConstantData::Tuple {
            elements: vec![
                ConstantData::Integer { value: 1 },
                ConstantData::Integer { value: 2 },
            ],
        });
        b.emit(Opcode::GetIter, 0);
        b.bind(loop_top);
        b.emit_jump(Opcode::ForIter, done);
        b.store_name("x");
        b.emit_jump(Opcode::JumpAbsolute, loop_top);
        b.bind(done);
        b.emit(Opcode::PopBlock, 0);
        b.load_none().return_value();
        b.bind(handler);
        b.emit(Opcode::PopTop, 0)
            .emit(Opcode::PopTop, 0)
            .emit(Opcode::PopTop, 0)
            .emit(Opcode::PopExcept, 0);
        b.load_none().return_value();
        let code = b.finish().unwrap();
        assert_eq!(code.stacksize, 6);
    }

    #[test]
    fn reports_underflow_and_unbound_labels() {
        let mut b = CodeBuilder::new("<module>");
        b.emit(Opcode::PopTop, 0);
        assert_eq!(
            b.finish().unwrap_err(),
            BuildError::StackUnderflow {
                index: 0,
                opcode: Opcode::PopTop
            }
        );

        let mut b = CodeBuilder::new("<module>");
        let nowhere = b.new_label();
        b.emit_jump(Opcode::JumpAbsolute, nowhere);
        assert_eq!(b.finish().unwrap_err(), BuildError::UnboundLabel(0));
    }

    #[test]
    fn line_table_round_trips_through_line_number() {
        let mut b = CodeBuilder::new("<module>").with_first_line(10);
        b.load_int(1).store_name("a");
        b.set_line(12);
        b.load_int(2).store_name("b");
        b.set_line(400);
        b.load_none();
        b.set_line(11);
        b.return_value();
        let code = b.finish().unwrap();
        let lines: Vec<_> = (0..code.instruction_count())
            .map(|i| code.line_number(i))
            .collect();
        assert_eq!(lines, [10, 10, 12, 12, 400, 11]);
    }

    #[test]
    fn parameters_declare_signature_layout() {
        let code = CodeBuilder::function("f", &["a", "b"])
            .with_kwonly(&["k"])
            .with_varargs("args")
            .with_varkeywords("kw")
            .finish()
            .unwrap();
        assert_eq!(code.varnames, ["a", "b", "k", "args", "kw"]);
        assert!(code.flags.contains(CodeFlags::VARARGS | CodeFlags::VARKEYWORDS));
        assert_eq!(code.arg_names().vararg, Some("args"));
    }
}
