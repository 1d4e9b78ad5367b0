//! This is the `kython` binary. If you're looking to run compiled code from your own application,
//! you're likely looking for the `kython-vm` crate.
//!
//! `kython` does not parse Python itself. Source files and `-c` commands are handed to a
//! CPython 3.9 process which compiles them and prints a kyc container; the container is decoded
//! by `kython-bytecode` and the module code object runs on the kython virtual machine. A
//! `.kyc` file on disk skips the compiler entirely. Modules imported by the program are found
//! the same way, as `.kyc` or `.py` files in the script's directory.
//!
//! ```text
//! $ kython -c 'print(sum(x * x for x in range(10)))'
//! 285
//! $ KYTHON_PYTHON=/opt/python3.9/bin/python3 kython script.py arg1 arg2
//! ```

#[macro_use]
extern crate log;

mod compiler;
mod settings;

pub use compiler::{CompileError, SubprocessCompiler};
pub use kython_vm;
pub use settings::{Options, RunMode, parse_args};

use kython_bytecode::CodeObject;
use kython_vm::{Interpreter, vm::thread::run_with_interpreter_stack};
use std::{env, path::Path, process::ExitCode};

const KYC_EXTENSION: &str = "kyc";

/// The main cli of the `kython` interpreter. The returned exit code is that of the program
/// ran through the cli, or 1 when it could not be compiled and 2 on a usage error.
pub fn run() -> ExitCode {
    env_logger::init();

    let (settings, mode, options) = match parse_args(env::args_os()) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("kython: {err}");
            eprintln!("{}", settings::USAGE);
            return ExitCode::from(2);
        }
    };

    let compiler = SubprocessCompiler::from_env(options.compiler);
    let code = match mode {
        RunMode::Help => {
            println!("{}", settings::USAGE);
            return ExitCode::SUCCESS;
        }
        RunMode::Version => {
            println!("kython {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        RunMode::Command(command) => {
            debug!("compiling command with {}", compiler.python());
            compiler.compile_source(&command)
        }
        RunMode::Script(ref path) => load(path, &compiler),
    };
    let code = match code {
        Ok(code) => code,
        Err(err) => {
            eprintln!("kython: {err}");
            return ExitCode::FAILURE;
        }
    };

    if options.dump_kyc {
        print!("{code}");
        return ExitCode::SUCCESS;
    }

    info!("running {:?} with sys.path {:?}", code.filename, settings.path);
    let status = run_with_interpreter_stack(move || {
        let interp = Interpreter::new(settings).with_source_compiler(compiler);
        interp.run_main(|vm| vm.run_module(code, "__main__").map(drop))
    });
    match status {
        Ok(status) => ExitCode::from(status),
        Err(err) => {
            eprintln!("kython: could not start the interpreter thread: {err}");
            ExitCode::FAILURE
        }
    }
}

fn load(path: &Path, compiler: &SubprocessCompiler) -> Result<CodeObject, CompileError> {
    if path.extension().is_some_and(|ext| ext == KYC_EXTENSION) {
        debug!("loading compiled container {}", path.display());
        compiler::load_kyc_file(path)
    } else {
        compiler.compile_file(path)
    }
}
