use std::process::ExitCode;

fn main() -> ExitCode {
    resourcing_cli::run()
}
