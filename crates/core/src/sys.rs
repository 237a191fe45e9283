//! Tool execution
//!
//! Spawns the wrapped tool with its original arguments and captures
//! everything the cache needs to replay later: stdout, stderr, and the exit
//! code.

use crate::{Error, Result};
use std::process::{Command, Stdio};

/// Captured result of one tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Raw bytes the tool wrote to stdout.
    pub stdout: Vec<u8>,
    /// Raw bytes the tool wrote to stderr.
    pub stderr: Vec<u8>,
    /// The tool's exit code. A signal-terminated process reports -1.
    pub exit_code: i32,
}

/// Run a command line to completion, capturing its output.
///
/// # Errors
///
/// Returns a config error for an empty command line and an I/O error when
/// the process cannot be spawned. A tool that runs and fails is not an
/// error here; its non-zero exit code is part of the result.
pub fn run(args: &[String]) -> Result<RunResult> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| Error::config("empty command line"))?;

    let output = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::io(e, program, "spawn"))?;

    Ok(RunResult {
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.status.code().unwrap_or(-1),
    })
}
