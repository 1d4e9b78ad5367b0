//! Interpreter invariant violations.
//!
//! These are bugs in the loaded bytecode or in the engine itself. They are never turned into
//! python exceptions: the thread unwinds, each frame it leaves adds its own dump, and the
//! root entry point prints the whole report.

use crate::bytecode::DecodeError;
use core::fmt;

#[derive(Debug, thiserror::Error)]
pub enum InvariantViolation {
    #[error("bad instruction in {code}: {source}")]
    Decode {
        code: String,
        #[source]
        source: DecodeError,
    },
    #[error("{opcode} popped from an empty operand stack")]
    StackUnderflow { opcode: &'static str },
    #[error("{opcode} found no matching block on the block stack")]
    BlockUnderflow { opcode: &'static str },
    #[error("{opcode} argument {index} is out of range for the {table} table")]
    BadIndex {
        opcode: &'static str,
        table: &'static str,
        index: usize,
    },
    #[error("RERAISE expected an exception type on the stack, found {found}")]
    ReraiseNonType { found: String },
    #[error("RERAISE expected an exception value on the stack, found {found}")]
    ReraiseNonException { found: String },
    #[error("exception match found {found} where a BaseException subclass was raised")]
    ExceptionMatchNonType { found: String },
    #[error("frame of {code} was resumed after it {state}")]
    FrameReentered { code: String, state: &'static str },
    #[error("{code} yielded from a frame that is not a generator")]
    UnexpectedYield { code: String },
    #[error("instruction pointer ran past the end of {code}")]
    CodeOverrun { code: String },
}

/// The unwinding payload that carries a violation out of the dispatch loop.
#[derive(Debug)]
pub struct FatalError {
    pub violation: InvariantViolation,
    /// One dump per frame the violation unwound through, innermost first.
    pub frames: Vec<String>,
}

impl FatalError {
    /// `EX_SOFTWARE` from sysexits.h, "internal software error".
    pub const EXIT_STATUS: u8 = 70;

    pub fn new(violation: InvariantViolation) -> Self {
        Self {
            violation,
            frames: vec![],
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fatal Python error: {}", self.violation)?;
        writeln!(f, "Current thread (most recent call first):")?;
        for frame in &self.frames {
            write!(f, "{frame}")?;
        }
        Ok(())
    }
}
