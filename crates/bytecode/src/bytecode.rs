//! Code objects and the wordcode they carry.

use crate::opcode::{JumpKind, Opcode};
use bitflags::bitflags;
use core::fmt;
use itertools::Itertools;
use std::collections::BTreeSet;

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct CodeFlags: u32 {
        const OPTIMIZED = 0x0001;
        const NEWLOCALS = 0x0002;
        const VARARGS = 0x0004;
        const VARKEYWORDS = 0x0008;
        const NESTED = 0x0010;
        const GENERATOR = 0x0020;
        const NOFREE = 0x0040;
        const COROUTINE = 0x0080;
        const ITERABLE_COROUTINE = 0x0100;
        const ASYNC_GENERATOR = 0x0200;
    }
}

/// Operator symbols addressed by the `COMPARE_OP` argument.
pub const COMPARE_OPS: [&str; 6] = ["<", "<=", "==", "!=", ">", ">="];

/// A constant as it appears in a code object's constant pool.
#[derive(Debug, Clone)]
pub enum ConstantData {
    None,
    Boolean { value: bool },
    Integer { value: i64 },
    Float { value: f64 },
    Complex { real: f64, imag: f64 },
    Bytes { value: Vec<u8> },
    Str { value: String },
    Tuple { elements: Vec<ConstantData> },
    List { elements: Vec<ConstantData> },
    Set { elements: Vec<ConstantData> },
    FrozenSet { elements: Vec<ConstantData> },
    Dict { entries: Vec<(ConstantData, ConstantData)> },
    Code { code: Box<CodeObject> },
}

impl PartialEq for ConstantData {
    fn eq(&self, other: &Self) -> bool {
        use ConstantData::*;

        match (self, other) {
            (None, None) => true,
            (Boolean { value: a }, Boolean { value: b }) => a == b,
            (Integer { value: a }, Integer { value: b }) => a == b,
            // floats are interned by their exact bit pattern, so 0.0 and -0.0 stay distinct
            (Float { value: a }, Float { value: b }) => a.to_bits() == b.to_bits(),
            (Complex { real: ar, imag: ai }, Complex { real: br, imag: bi }) => {
                ar.to_bits() == br.to_bits() && ai.to_bits() == bi.to_bits()
            }
            (Bytes { value: a }, Bytes { value: b }) => a == b,
            (Str { value: a }, Str { value: b }) => a == b,
            (Tuple { elements: a }, Tuple { elements: b })
            | (List { elements: a }, List { elements: b })
            | (Set { elements: a }, Set { elements: b })
            | (FrozenSet { elements: a }, FrozenSet { elements: b }) => a == b,
            (Dict { entries: a }, Dict { entries: b }) => a == b,
            (Code { code: a }, Code { code: b }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ConstantData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn seq(f: &mut fmt::Formatter<'_>, elements: &[ConstantData]) -> fmt::Result {
            write!(f, "{}", elements.iter().format(", "))
        }
        match self {
            Self::None => f.write_str("None"),
            Self::Boolean { value } => f.write_str(if *value { "True" } else { "False" }),
            Self::Integer { value } => write!(f, "{value}"),
            Self::Float { value } => write!(f, "{value:?}"),
            Self::Complex { real, imag } => write!(f, "({real:?}+{imag:?}j)"),
            Self::Bytes { value } => write!(f, "b'{}'", value.escape_ascii()),
            Self::Str { value } => write!(f, "{value:?}"),
            Self::Tuple { elements } => {
                f.write_str("(")?;
                seq(f, elements)?;
                if elements.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::List { elements } => {
                f.write_str("[")?;
                seq(f, elements)?;
                f.write_str("]")
            }
            Self::Set { elements } => {
                f.write_str("{")?;
                seq(f, elements)?;
                f.write_str("}")
            }
            Self::FrozenSet { elements } => {
                f.write_str("frozenset({")?;
                seq(f, elements)?;
                f.write_str("})")
            }
            Self::Dict { entries } => write!(
                f,
                "{{{}}}",
                entries
                    .iter()
                    .format_with(", ", |(k, v), f| f(&format_args!("{k}: {v}")))
            ),
            Self::Code { code } => write!(f, "{code:?}"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("instruction index {index} is past the end of the code")]
    OutOfBounds { index: usize },
    #[error("unknown opcode {byte} at instruction {index}")]
    UnknownOpcode { byte: u8, index: usize },
}

/// One decoded instruction with any `EXTENDED_ARG` prefix already folded into `arg`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub arg: u32,
}

impl Instruction {
    pub const fn new(opcode: Opcode, arg: u32) -> Self {
        Self { opcode, arg }
    }

    /// The instruction index this instruction jumps to, if it is a jump.
    ///
    /// `index` is the position of the instruction itself, not of its prefixes.
    pub fn jump_target(&self, index: usize) -> Option<usize> {
        let delta = (self.arg / 2) as usize;
        self.opcode.jump_kind().map(|kind| match kind {
            JumpKind::Absolute => delta,
            JumpKind::Relative => index + 1 + delta,
        })
    }
}

/// Primary container of a single code object. Each python function has
/// a code object. Also a module has a code object.
#[derive(Clone, PartialEq)]
pub struct CodeObject {
    pub argcount: u32,
    pub posonlyargcount: u32,
    pub kwonlyargcount: u32,
    pub nlocals: u32,
    pub stacksize: u32,
    pub flags: CodeFlags,
    /// Raw wordcode, two bytes per instruction.
    pub code: Vec<u8>,
    pub constants: Vec<ConstantData>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub freevars: Vec<String>,
    pub cellvars: Vec<String>,
    pub filename: String,
    pub name: String,
    pub firstlineno: u32,
    pub lnotab: Vec<u8>,
}

/// Parameter names of a code object, split by kind.
#[derive(Debug, PartialEq, Eq)]
pub struct Arguments<'a> {
    pub posonlyargs: &'a [String],
    pub args: &'a [String],
    pub vararg: Option<&'a str>,
    pub kwonlyargs: &'a [String],
    pub varkwarg: Option<&'a str>,
}

impl CodeObject {
    /// Number of wordcode units, `EXTENDED_ARG` prefixes included.
    #[inline]
    pub fn instruction_count(&self) -> usize {
        self.code.len() / 2
    }

    #[inline]
    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    fn unit(&self, index: usize) -> Result<(u8, u8), DecodeError> {
        match self.code.get(index * 2..index * 2 + 2) {
            Some(&[op, arg]) => Ok((op, arg)),
            _ => Err(DecodeError::OutOfBounds { index }),
        }
    }

    fn decode_opcode(byte: u8, index: usize) -> Result<Opcode, DecodeError> {
        Opcode::try_from(byte).map_err(|_| DecodeError::UnknownOpcode { byte, index })
    }

    /// Decodes the instruction starting at `index`, consuming any `EXTENDED_ARG` prefixes.
    ///
    /// Returns the index of the instruction proper together with the instruction.
    pub fn fetch(&self, start: usize) -> Result<(usize, Instruction), DecodeError> {
        let mut index = start;
        let mut arg: u32 = 0;
        loop {
            let (byte, raw) = self.unit(index)?;
            let opcode = Self::decode_opcode(byte, index)?;
            arg = (arg << 8) | u32::from(raw);
            if opcode != Opcode::ExtendedArg {
                return Ok((index, Instruction::new(opcode, arg)));
            }
            index += 1;
        }
    }

    /// Decodes the instruction at `index`, folding in the `EXTENDED_ARG` prefixes that
    /// precede it.
    pub fn instruction_at(&self, index: usize) -> Result<Instruction, DecodeError> {
        let (byte, raw) = self.unit(index)?;
        let opcode = Self::decode_opcode(byte, index)?;
        let mut arg = u32::from(raw);
        let mut shift = 8;
        let mut prev = index;
        while prev > 0 && shift < 32 {
            prev -= 1;
            let (byte, raw) = self.unit(prev)?;
            if byte != u8::from(Opcode::ExtendedArg) {
                break;
            }
            arg |= u32::from(raw) << shift;
            shift += 8;
        }
        Ok(Instruction::new(opcode, arg))
    }

    /// Iterates over `(index, instruction)` for every instruction, skipping prefix units.
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            code: self,
            next: 0,
        }
    }

    /// Source line for the instruction at `index`, following CPython's `lnotab` convention.
    pub fn line_number(&self, index: usize) -> u32 {
        let offset = index * 2;
        let mut addr = 0usize;
        let mut line = i64::from(self.firstlineno);
        for (&addr_incr, &line_incr) in self.lnotab.iter().tuples() {
            addr += usize::from(addr_incr);
            if addr > offset {
                break;
            }
            line += i64::from(line_incr as i8);
        }
        line.max(0) as u32
    }

    /// Name of a cell or free variable, addressed the way the `*_DEREF` family does.
    pub fn cell_name(&self, i: usize) -> Option<&str> {
        self.cellvars
            .get(i)
            .or_else(|| self.freevars.get(i.checked_sub(self.cellvars.len())?))
            .map(String::as_str)
    }

    pub fn arg_names(&self) -> Arguments<'_> {
        let nargs = self.argcount as usize;
        let nkwargs = self.kwonlyargcount as usize;
        let npos = (self.posonlyargcount as usize).min(nargs);
        let mut varargs_pos = nargs + nkwargs;
        let posonlyargs = &self.varnames[..npos];
        let args = &self.varnames[npos..nargs];
        let kwonlyargs = &self.varnames[nargs..varargs_pos];

        let vararg = if self.flags.contains(CodeFlags::VARARGS) {
            let vararg = &self.varnames[varargs_pos];
            varargs_pos += 1;
            Some(vararg.as_str())
        } else {
            None
        };
        let varkwarg = if self.flags.contains(CodeFlags::VARKEYWORDS) {
            Some(self.varnames[varargs_pos].as_str())
        } else {
            None
        };

        Arguments {
            posonlyargs,
            args,
            vararg,
            kwonlyargs,
            varkwarg,
        }
    }

    fn label_targets(&self) -> BTreeSet<usize> {
        self.instructions()
            .filter_map(|item| item.ok())
            .filter_map(|(index, instr)| instr.jump_target(index))
            .collect()
    }

    /// Renders the argument of `instr` in a human readable form, when it has one.
    pub fn describe_arg(&self, index: usize, instr: Instruction) -> Option<String> {
        let arg = instr.arg as usize;
        if let Some(target) = instr.jump_target(index) {
            return Some(format!("to {}", target * 2));
        }
        match instr.opcode {
            Opcode::LoadConst => self.constants.get(arg).map(|c| c.to_string()),
            Opcode::LoadName
            | Opcode::StoreName
            | Opcode::DeleteName
            | Opcode::LoadGlobal
            | Opcode::StoreGlobal
            | Opcode::DeleteGlobal
            | Opcode::LoadAttr
            | Opcode::StoreAttr
            | Opcode::DeleteAttr
            | Opcode::LoadMethod
            | Opcode::ImportName
            | Opcode::ImportFrom => self.names.get(arg).cloned(),
            Opcode::LoadFast | Opcode::StoreFast | Opcode::DeleteFast => {
                self.varnames.get(arg).cloned()
            }
            Opcode::LoadClosure
            | Opcode::LoadDeref
            | Opcode::StoreDeref
            | Opcode::DeleteDeref
            | Opcode::LoadClassderef => self.cell_name(arg).map(str::to_owned),
            Opcode::CompareOp => COMPARE_OPS.get(arg).map(|&s| s.to_owned()),
            Opcode::IsOp => Some(if arg == 0 { "is" } else { "is not" }.to_owned()),
            Opcode::ContainsOp => Some(if arg == 0 { "in" } else { "not in" }.to_owned()),
            _ => None,
        }
    }

    fn display_inner(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label_targets = self.label_targets();
        let mut last_line = None;
        for item in self.instructions() {
            let (index, instr) = match item {
                Ok(item) => item,
                Err(err) => return writeln!(f, "<{err}>"),
            };
            let line = self.line_number(index);
            if last_line != Some(line) {
                if last_line.is_some() {
                    writeln!(f)?;
                }
                last_line = Some(line);
                write!(f, "{line:>4}")?;
            } else {
                write!(f, "    ")?;
            }
            let arrow = if label_targets.contains(&index) {
                ">>"
            } else {
                "  "
            };
            write!(f, " {arrow} {:>4} ", index * 2)?;
            if instr.opcode.has_arg() {
                write!(f, "{:<21} {}", instr.opcode.name(), instr.arg)?;
                if let Some(described) = self.describe_arg(index, instr) {
                    write!(f, " ({described})")?;
                }
            } else {
                f.write_str(instr.opcode.name())?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

pub struct Instructions<'a> {
    code: &'a CodeObject,
    next: usize,
}

impl Iterator for Instructions<'_> {
    type Item = Result<(usize, Instruction), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.code.instruction_count() {
            return None;
        }
        let fetched = self.code.fetch(self.next);
        self.next = match &fetched {
            Ok((index, _)) => index + 1,
            Err(_) => usize::MAX,
        };
        Some(fetched)
    }
}

impl fmt::Display for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.display_inner(f)?;
        for constant in &self.constants {
            if let ConstantData::Code { code } = constant {
                writeln!(f, "\nDisassembly of {code:?}:")?;
                fmt::Display::fmt(code, f)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<code object {} file {:?}, line {}>",
            self.name, self.filename, self.firstlineno
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(units: &[(Opcode, u8)], lnotab: Vec<u8>) -> CodeObject {
        CodeObject {
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            nlocals: 0,
            stacksize: 4,
            flags: CodeFlags::empty(),
            code: units
                .iter()
                .flat_map(|&(op, arg)| [u8::from(op), arg])
                .collect(),
            constants: vec![ConstantData::None, ConstantData::Integer { value: 1 }],
            names: vec!["x".to_owned()],
            varnames: vec![],
            freevars: vec![],
            cellvars: vec![],
            filename: "<test>".to_owned(),
            name: "<module>".to_owned(),
            firstlineno: 1,
            lnotab,
        }
    }

    #[test]
    fn extended_arg_is_folded() {
        let code = code(
            &[
                (Opcode::ExtendedArg, 1),
                (Opcode::LoadConst, 2),
                (Opcode::ReturnValue, 0),
            ],
            vec![],
        );
        let (index, instr) = code.fetch(0).unwrap();
        assert_eq!(index, 1);
        assert_eq!(instr, Instruction::new(Opcode::LoadConst, 0x102));
        assert_eq!(code.instruction_at(1).unwrap().arg, 0x102);
        let indices: Vec<_> = code
            .instructions()
            .map(|item| item.unwrap().0)
            .collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn unknown_opcode_is_reported() {
        let mut code = code(&[(Opcode::Nop, 0)], vec![]);
        code.code = vec![0, 0];
        assert_eq!(
            code.fetch(0),
            Err(DecodeError::UnknownOpcode { byte: 0, index: 0 })
        );
        assert_eq!(code.fetch(3), Err(DecodeError::OutOfBounds { index: 3 }));
    }

    #[test]
    fn jump_targets() {
        let absolute = Instruction::new(Opcode::JumpAbsolute, 8);
        assert_eq!(absolute.jump_target(10), Some(4));
        let relative = Instruction::new(Opcode::ForIter, 6);
        assert_eq!(relative.jump_target(2), Some(6));
        assert_eq!(Instruction::new(Opcode::PopTop, 0).jump_target(0), None);
    }

    #[test]
    fn lnotab_lines() {
        // offsets 0..4 on line 1, 4..8 on line 3, then back to line 2 from offset 8
        let code = code(
            &[
                (Opcode::Nop, 0),
                (Opcode::Nop, 0),
                (Opcode::Nop, 0),
                (Opcode::Nop, 0),
                (Opcode::Nop, 0),
            ],
            vec![4, 2, 4, 0xff],
        );
        assert_eq!(code.line_number(0), 1);
        assert_eq!(code.line_number(1), 1);
        assert_eq!(code.line_number(2), 3);
        assert_eq!(code.line_number(4), 2);
    }

    #[test]
    fn argument_names_follow_flags() {
        let mut code = code(&[(Opcode::Nop, 0)], vec![]);
        code.argcount = 2;
        code.kwonlyargcount = 1;
        code.flags = CodeFlags::VARARGS | CodeFlags::VARKEYWORDS;
        code.varnames = ["a", "b", "k", "args", "kwargs", "tmp"]
            .map(str::to_owned)
            .to_vec();
        let names = code.arg_names();
        assert_eq!(names.args, ["a", "b"]);
        assert_eq!(names.kwonlyargs, ["k"]);
        assert_eq!(names.vararg, Some("args"));
        assert_eq!(names.varkwarg, Some("kwargs"));
    }

    #[test]
    fn disassembly_resolves_arguments() {
        let code = code(
            &[
                (Opcode::LoadConst, 1),
                (Opcode::StoreName, 0),
                (Opcode::JumpAbsolute, 0),
            ],
            vec![],
        );
        let text = code.to_string();
        assert!(text.contains("LOAD_CONST"), "{text}");
        assert!(text.contains("1 (1)"), "{text}");
        assert!(text.contains("0 (x)"), "{text}");
        assert!(text.contains("0 (to 0)"), "{text}");
        assert!(text.contains(">>"), "{text}");
    }

    #[test]
    fn constant_display() {
        let tuple = ConstantData::Tuple {
            elements: vec![ConstantData::Str {
                value: "a".to_owned(),
            }],
        };
        assert_eq!(tuple.to_string(), "(\"a\",)");
        assert_ne!(
            ConstantData::Float { value: 0.0 },
            ConstantData::Float { value: -0.0 }
        );
    }
}
