use std::process::ExitCode;

fn main() -> ExitCode {
    skillpath_cli::run()
}
