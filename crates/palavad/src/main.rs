use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    let daemon = match palavad::bootstrap() {
        Ok(daemon) => daemon,
        Err(error) => {
            let _ = writeln!(io::stderr(), "palavad: {error}");
            return ExitCode::FAILURE;
        }
    };
    match daemon.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(io::stderr(), "palavad: {error}");
            ExitCode::FAILURE
        }
    }
}
