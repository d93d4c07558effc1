//! Small helpers for running external tools and blocking work from async code.

use std::process::Output;

use crate::prelude::*;

pub mod io;

/// Report any command failures, and include any error output.
///
/// Both output streams are logged at debug level, and standard error is
/// included in the returned error. Some tools exit successfully after printing
/// errors, so each line of standard error may also be checked with
/// `is_error_line`.
pub fn check_for_command_failure(
    command_name: &str,
    output: &Output,
    is_error_line: Option<&dyn Fn(&str) -> bool>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(command_name, output = %stdout, "Standard output from command");
    debug!(command_name, output = %stderr, "Standard error from command");

    if !output.status.success() {
        return match output.status.code() {
            Some(exit_code) => Err(anyhow!(
                "{command_name} failed with exit code {exit_code} and error output:\n{stderr}"
            )),
            None => Err(anyhow!(
                "{command_name} was terminated by a signal, with error output:\n{stderr}"
            )),
        };
    }
    if let Some(is_error_line) = is_error_line
        && stderr.lines().any(is_error_line)
    {
        return Err(anyhow!("{command_name} printed error output:\n{stderr}"));
    }
    Ok(())
}

/// Run CPU-bound or blocking filesystem work on Tokio's blocking pool.
///
/// A panic in `f` is reported as an error instead of tearing down the caller.
pub async fn run_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("blocking task panicked or was cancelled")?
}
