use std::process::ExitCode;

fn main() -> ExitCode {
    kython::run()
}
