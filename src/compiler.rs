//! The bridge to the external compiler: a CPython 3.9 process that turns source code into a
//! kyc container.

use kython_bytecode::{CodeObject, KycError, parse_kyc_file};
use std::{
    env, fs, io,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};

/// Helper script run by the compiler process; prints the container as one hex line.
const KYC_SCRIPT: &str = include_str!("kyc.py");

/// Environment variables naming the Python executable, in the order they are consulted.
const PYTHON_ENV_VARS: [&str; 2] = ["KYTHON_PYTHON", "CPYTHON_EXE"];
const DEFAULT_PYTHON: &str = "python3.9";

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("could not start the compiler {python:?}: {source}")]
    Spawn {
        python: String,
        #[source]
        source: io::Error,
    },
    #[error("the compiler exited with {0}")]
    Failed(ExitStatus),
    #[error("the compiler produced no output")]
    NoOutput,
    #[error("the compiler output is not hex: {0}")]
    BadHex(#[from] hex::FromHexError),
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Kyc(#[from] KycError),
}

/// Compiles source code by running the helper script under a CPython 3.9 interpreter.
#[derive(Debug, Clone)]
pub struct SubprocessCompiler {
    python: String,
}

impl SubprocessCompiler {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    /// Uses `python` when given, else the first of `KYTHON_PYTHON` and `CPYTHON_EXE` that is
    /// set, else `python3.9` from `PATH`.
    pub fn from_env(python: Option<String>) -> Self {
        let python = python
            .or_else(|| PYTHON_ENV_VARS.iter().find_map(|var| env::var(var).ok()))
            .unwrap_or_else(|| DEFAULT_PYTHON.to_owned());
        Self::new(python)
    }

    pub fn python(&self) -> &str {
        &self.python
    }

    pub fn compile_file(&self, path: &Path) -> Result<CodeObject, CompileError> {
        let path = path.to_string_lossy();
        self.compile(&["--path", &path])
    }

    pub fn compile_source(&self, source: &str) -> Result<CodeObject, CompileError> {
        self.compile(&["--code", source])
    }

    fn compile(&self, args: &[&str]) -> Result<CodeObject, CompileError> {
        debug!("running {} -I -S -c <kyc.py> {}", self.python, args.join(" "));
        let output = Command::new(&self.python)
            .args(["-I", "-S", "-c", KYC_SCRIPT])
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| CompileError::Spawn {
                python: self.python.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(CompileError::Failed(output.status));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.lines().next().map(str::trim).unwrap_or_default();
        if line.is_empty() {
            return Err(CompileError::NoOutput);
        }
        decode_hex_container(line)
    }
}

impl kython_vm::import::SourceCompiler for SubprocessCompiler {
    fn compile_module(&self, path: &Path) -> Result<CodeObject, Box<dyn core::error::Error>> {
        Ok(self.compile_file(path)?)
    }
}

/// Decodes the compiler's hex line into the module's code object.
pub fn decode_hex_container(line: &str) -> Result<CodeObject, CompileError> {
    let data = hex::decode(line)?;
    Ok(parse_kyc_file(&data)?.code)
}

/// Reads a binary kyc container from disk.
pub fn load_kyc_file(path: &Path) -> Result<CodeObject, CompileError> {
    let data = fs::read(path).map_err(|source| CompileError::Read {
        path: path.to_owned(),
        source,
    })?;
    Ok(parse_kyc_file(&data)?.code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> Vec<u8> {
        let mut data = b"KYCA\x09K".to_vec();
        data.extend(b"i\x07\x00\x00\x00");
        data.extend(b"s\x00\x00\x00\x00");
        data.push(b'c');
        for field in [0u32, 0, 0, 0, 1, 0] {
            data.push(b'i');
            data.extend(field.to_le_bytes());
        }
        // LOAD_CONST 0; RETURN_VALUE
        data.extend(b"b\x04\x00\x00\x00\x64\x00\x53\x00");
        data.extend(b"t\x01\x00\x00\x00N");
        for _ in 0..4 {
            data.extend(b"t\x00\x00\x00\x00");
        }
        data.extend(b"s\x06\x00\x00\x00<test>");
        data.extend(b"s\x08\x00\x00\x00<module>");
        data.extend(b"i\x01\x00\x00\x00");
        data.extend(b"b\x00\x00\x00\x00");
        data
    }

    #[test]
    fn hex_line_decodes_to_the_module() {
        let code = decode_hex_container(&hex::encode(container())).unwrap();
        assert_eq!(code.name, "<module>");
        assert_eq!(code.filename, "<test>");
        assert_eq!(code.instruction_count(), 2);
    }

    #[test]
    fn odd_hex_is_rejected() {
        assert!(matches!(
            decode_hex_container("4b5"),
            Err(CompileError::BadHex(_))
        ));
    }

    #[test]
    fn bad_container_is_reported() {
        let err = decode_hex_container(&hex::encode(b"PYC")).unwrap_err();
        assert!(matches!(err, CompileError::Kyc(KycError::BadMagic)));
    }

    #[test]
    fn explicit_python_wins() {
        let compiler = SubprocessCompiler::from_env(Some("/opt/python3.9".to_owned()));
        assert_eq!(compiler.python(), "/opt/python3.9");
    }

    #[test]
    fn missing_python_is_a_spawn_error() {
        let compiler = SubprocessCompiler::new("/nonexistent/kython-test-python");
        assert!(matches!(
            compiler.compile_source("x = 1"),
            Err(CompileError::Spawn { .. })
        ));
    }
}
