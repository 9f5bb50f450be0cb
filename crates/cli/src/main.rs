use std::process::ExitCode;

fn main() -> ExitCode {
    conductor_cli::run()
}
