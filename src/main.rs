use std::process::ExitCode;

fn main() -> ExitCode {
    pinrec_lib::run()
}
