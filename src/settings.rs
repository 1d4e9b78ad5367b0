use kython_vm::Settings;
use lexopt::{Arg, Parser, ValueExt};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

pub const USAGE: &str = "\
usage: kython [OPTIONS] (-c CMD | FILE) [ARGS]...

Options:
  -c CMD           run CMD as a program; remaining arguments go to sys.argv
  -d, --debug      also print the frame chain of an unhandled exception
  -q, --quiet      do not print the traceback of an unhandled exception
  --compiler PATH  CPython 3.9 used to compile source files
                   (default: $KYTHON_PYTHON, $CPYTHON_EXE or python3.9)
  --dump-kyc       print the disassembled module instead of running it
  -V, --version    print the version number and exit
  -h, --help       print this help message and exit

A FILE ending in .kyc is loaded as an already compiled container.";

#[derive(Debug, PartialEq, Eq)]
pub enum RunMode {
    Command(String),
    Script(PathBuf),
    Help,
    Version,
}

/// Options that shape how the program is loaded rather than how it runs.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Options {
    pub compiler: Option<String>,
    pub dump_kyc: bool,
}

pub fn parse_args(
    args: impl IntoIterator<Item = impl Into<OsString>>,
) -> Result<(Settings, RunMode, Options), lexopt::Error> {
    let mut parser = Parser::from_iter(args);
    let mut settings = Settings::default();
    let mut options = Options::default();

    let mode = loop {
        let Some(arg) = parser.next()? else {
            return Err("no program given; pass -c CMD or FILE".into());
        };
        match arg {
            Arg::Short('c') => {
                let command = parser.value()?.string()?;
                settings.argv = std::iter::once("-c".to_owned())
                    .chain(rest(&mut parser)?)
                    .collect();
                // imports resolve against the working directory
                settings.path = vec![String::new()];
                break RunMode::Command(command);
            }
            Arg::Value(script) => {
                let script = PathBuf::from(script);
                settings.argv = std::iter::once(script.to_string_lossy().into_owned())
                    .chain(rest(&mut parser)?)
                    .collect();
                settings.path = vec![script_dir(&script)];
                break RunMode::Script(script);
            }
            Arg::Short('d') | Arg::Long("debug") => settings.debug = true,
            Arg::Short('q') | Arg::Long("quiet") => settings.quiet = true,
            Arg::Long("compiler") => options.compiler = Some(parser.value()?.string()?),
            Arg::Long("dump-kyc") => options.dump_kyc = true,
            Arg::Short('V') | Arg::Long("version") => break RunMode::Version,
            Arg::Short('h') | Arg::Long("help") => break RunMode::Help,
            _ => return Err(arg.unexpected()),
        }
    };

    Ok((settings, mode, options))
}

/// The directory `import` searches for modules next to the script; `""` when the script
/// is named without one.
fn script_dir(script: &Path) -> String {
    script
        .parent()
        .map(|dir| dir.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Everything after the program, untouched, for `sys.argv`.
fn rest(parser: &mut Parser) -> Result<Vec<String>, lexopt::Error> {
    parser
        .raw_args()?
        .map(|arg| arg.string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<(Settings, RunMode, Options), lexopt::Error> {
        parse_args(std::iter::once("kython").chain(args.iter().copied()))
    }

    #[test]
    fn command_takes_the_rest_as_argv() {
        let (settings, mode, _) = parse(&["-c", "print(1)", "-q", "x"]).unwrap();
        assert_eq!(mode, RunMode::Command("print(1)".to_owned()));
        assert_eq!(settings.argv, ["-c", "-q", "x"]);
        assert_eq!(settings.path, [""]);
        assert!(!settings.quiet);
    }

    #[test]
    fn script_is_argv_zero() {
        let (settings, mode, options) =
            parse(&["-d", "--dump-kyc", "prog.py", "--debug"]).unwrap();
        assert_eq!(mode, RunMode::Script(PathBuf::from("prog.py")));
        assert_eq!(settings.argv, ["prog.py", "--debug"]);
        assert_eq!(settings.path, [""]);
        assert!(settings.debug);
        assert!(options.dump_kyc);
    }

    #[test]
    fn script_directory_is_searched_by_import() {
        let (settings, _, _) = parse(&["/srv/app/main.py", "arg"]).unwrap();
        assert_eq!(settings.path, ["/srv/app"]);
        let (settings, _, _) = parse(&["tools/run.kyc"]).unwrap();
        assert_eq!(settings.path, ["tools"]);
    }

    #[test]
    fn compiler_takes_a_value() {
        let (_, _, options) = parse(&["--compiler", "/usr/bin/python3.9", "-c", "0"]).unwrap();
        assert_eq!(options.compiler.as_deref(), Some("/usr/bin/python3.9"));
    }

    #[test]
    fn help_and_version() {
        assert_eq!(parse(&["-h"]).unwrap().1, RunMode::Help);
        assert_eq!(parse(&["--version", "prog.py"]).unwrap().1, RunMode::Version);
    }

    #[test]
    fn missing_program_is_an_error() {
        assert!(parse(&["-q"]).is_err());
        assert!(parse(&["-c"]).is_err());
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(parse(&["-x", "prog.py"]).is_err());
    }
}
