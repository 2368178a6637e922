//! cw binary entry point.

use std::process::ExitCode;

fn main() -> ExitCode {
    match casework::cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            casework::ui::output::error(format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}
