use std::process::ExitCode;

fn main() -> ExitCode {
    cleaner_rs::run_cli()
}
