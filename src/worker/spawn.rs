//! Worker subprocess spawning.
//!
//! Workers are fresh `posix_spawn`ed copies of the molbridge binary started
//! with `--internal-worker`. Each one leads a new process group so a recycle
//! can kill it together with any converter process it has started.

use super::proc::Proc;
use crate::error::{BridgeError, Result};
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Flag that switches the binary into worker mode.
pub const INTERNAL_WORKER_FLAG: &str = "--internal-worker";

/// How to launch one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments passed to the executable.
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    /// Worker command for an explicit molbridge binary.
    pub fn for_binary(program: impl Into<PathBuf>, converter: &Path) -> Self {
        Self {
            program: program.into(),
            args: vec![
                INTERNAL_WORKER_FLAG.into(),
                "--converter".into(),
                converter.as_os_str().to_owned(),
            ],
        }
    }

    /// Worker command that re-executes the running binary.
    pub fn current_exe(converter: &Path) -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| {
            BridgeError::Worker(format!("Failed to get current executable: {}", e))
        })?;
        Ok(Self::for_binary(exe, converter))
    }
}

/// Spawn a worker subprocess.
pub fn spawn_worker(command: &WorkerCommand) -> Result<Proc> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args);

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    // Worker logs go to the parent's stderr; stdout is the IPC channel.
    cmd.stderr(Stdio::inherit());
    cmd.process_group(0);

    let child = cmd.spawn().map_err(|e| {
        BridgeError::Worker(format!(
            "Failed to spawn worker '{}': {}",
            command.program.display(),
            e
        ))
    })?;

    Proc::from_child(child)
}
