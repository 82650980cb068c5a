//! Sandbox worker: serves one analyzer session over stdin/stdout.
#![allow(unused_crate_dependencies)]

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(error) = mb_js::sandbox_role_requested(std::env::args().skip(1)) {
        eprintln!("mb-sandbox startup error: {error}");
        return ExitCode::FAILURE;
    }

    match mb_js::serve_stdio() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("mb-sandbox: {error}");
            ExitCode::FAILURE
        }
    }
}
