use std::process::ExitCode;

fn main() -> ExitCode {
    steward_cli::run()
}
