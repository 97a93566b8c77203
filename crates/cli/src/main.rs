use std::process::ExitCode;

fn main() -> ExitCode {
    bridgesync_cli::run()
}
