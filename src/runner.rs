//! External command execution over stacks.
//!
//! The core does not own stdio policy: callers supply the sinks, the
//! runner pipes child output into them unmodified. A nonzero exit in one
//! stack never aborts the run; failures are counted and reported once at
//! the end as a single aggregate error.

use crate::error::{Result, TerrastackError};
use crate::stack::Stack;
use crate::tree::Root;
use std::io::Write;
use std::process::Command;

/// Caller-supplied output sinks for a run.
pub struct RunSink<'a> {
    /// Receives every child's stdout, in stack order.
    pub stdout: &'a mut dyn Write,
    /// Receives every child's stderr, in stack order.
    pub stderr: &'a mut dyn Write,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of stacks the command was executed in.
    pub executed: usize,
}

/// Runs `cmd` with each stack directory as the working directory.
///
/// # Errors
///
/// `Run { failures }` when any command exited nonzero or failed to spawn;
/// `Internal` for an empty command line.
pub fn run_in_stacks(
    root: &Root,
    stacks: &[Stack],
    cmd: &[String],
    sink: &mut RunSink<'_>,
) -> Result<RunSummary> {
    let Some((program, args)) = cmd.split_first() else {
        return Err(TerrastackError::internal("empty command"));
    };

    let mut executed = 0;
    let mut failures = 0;

    for stack in stacks {
        let cwd = stack.dir.to_host(root.host_root());
        tracing::info!(stack = %stack.dir, command = %program, "running command");

        let output = Command::new(program).args(args).current_dir(&cwd).output();
        executed += 1;

        match output {
            Ok(output) => {
                sink.stdout
                    .write_all(&output.stdout)
                    .map_err(|e| TerrastackError::io(&cwd, e))?;
                sink.stderr
                    .write_all(&output.stderr)
                    .map_err(|e| TerrastackError::io(&cwd, e))?;
                if !output.status.success() {
                    tracing::warn!(
                        stack = %stack.dir,
                        status = %output.status,
                        "command failed"
                    );
                    failures += 1;
                }
            }
            Err(e) => {
                tracing::warn!(stack = %stack.dir, error = %e, "failed to spawn command");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(TerrastackError::Run { failures });
    }
    Ok(RunSummary { executed })
}
