//! Binary entrypoint that launches the DocOwl web demo.

use std::process::ExitCode;

use docowl_web::start_docowl_web;

/// Start the web server in front of a running model worker.
fn main() -> ExitCode {
    start_docowl_web::run()
}
