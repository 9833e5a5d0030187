use std::path::Path;
use std::process::Output;

use bstr::ByteSlice;
use tokio::process::Command;

use crate::common::utils::fs::get_current_dir;

/// Text printed by a job script as its last action.
pub const CLEAN_EXIT_MARKER: &str = "queue job finished cleanly";

pub fn create_command(arguments: &[String], workdir: &Path) -> Command {
    let mut command = Command::new(&arguments[0]);
    command.args(&arguments[1..]);
    command.current_dir(workdir);
    command
}

pub fn check_command_output(output: Output) -> anyhow::Result<Output> {
    let status = output.status;
    if !status.success() {
        return Err(anyhow::anyhow!(
            "Exit code: {}\nStderr: {}\nStdout: {}",
            status.code().unwrap_or(-1),
            output.stderr.to_str_lossy().trim(),
            output.stdout.to_str_lossy().trim()
        ));
    }
    Ok(output)
}

/// Result of a batch system command. The command never fails, errors are returned as text.
#[derive(Debug, Default)]
pub struct CommandOutput {
    pub command: String,
    pub stdout: String,
    pub error: Option<String>,
}

pub async fn run_command(arguments: Vec<String>, workdir: &Path) -> CommandOutput {
    let command_line = arguments.join(" ");
    log::debug!("Running command `{command_line}`");

    let output = match create_command(&arguments, workdir).output().await {
        Ok(output) => output,
        Err(error) => {
            return CommandOutput {
                error: Some(format!("{} start failed: {error}", arguments[0])),
                command: command_line,
                stdout: String::new(),
            };
        }
    };
    let stdout = output.stdout.to_str_lossy().into_owned();
    let error = check_command_output(output)
        .err()
        .map(|e| format!("{} execution failed: {e}", arguments[0]));
    CommandOutput {
        command: command_line,
        stdout,
        error,
    }
}

/// Runs a queue cancel command. A job that cannot be cancelled is only reported, the
/// run goes on with shutting down.
pub async fn cancel_job(arguments: Vec<String>) -> anyhow::Result<()> {
    let output = run_command(arguments, &get_current_dir()).await;
    if let Some(error) = output.error {
        log::warn!("Cannot cancel job with `{}`: {error}", output.command);
    }
    Ok(())
}

pub fn path_str(path: &Path) -> String {
    path.display().to_string()
}
