//! External process execution
//!
//! Thin helpers around `std::process::Command` that turn spawn failures and
//! non-zero exits into [`ToolError`]s and log every command line.

use std::ffi::OsStr;
use std::process::{Child, Command, ExitStatus, Output};

use crate::error::ToolError;

/// Printable command line for logs
pub fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Name of the program a command runs
pub fn tool_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().to_string()
}

/// Run a command to completion, capturing its output; non-zero exit is an error
pub fn run(cmd: &mut Command) -> Result<Output, ToolError> {
    tracing::debug!("Running: {}", describe(cmd));
    let output = cmd.output().map_err(|e| ToolError::Spawn {
        tool: tool_name(cmd),
        error: e.to_string(),
    })?;
    check_status(&tool_name(cmd), output.status, &output.stderr)?;
    Ok(output)
}

/// Run a command and return its stdout as text
pub fn run_stdout(cmd: &mut Command) -> Result<String, ToolError> {
    let output = run(cmd)?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Spawn a command, logging it
pub fn spawn(cmd: &mut Command) -> Result<Child, ToolError> {
    tracing::debug!("Spawning: {}", describe(cmd));
    cmd.spawn().map_err(|e| ToolError::Spawn {
        tool: tool_name(cmd),
        error: e.to_string(),
    })
}

/// Turn an exit status into a result
pub fn check_status(tool: &str, status: ExitStatus, stderr: &[u8]) -> Result<(), ToolError> {
    if status.success() {
        Ok(())
    } else {
        Err(ToolError::Failed {
            tool: tool.to_string(),
            status: status.code(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        })
    }
}
