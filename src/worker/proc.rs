//! Process handle for worker subprocesses.
//!
//! Wraps a child process with IPC channels for communication.

use super::ipc::{LineReader, LineWriter, PipeFd};
use super::protocol::{WorkRequest, WorkResponse};
use crate::error::{BridgeError, Result};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::os::unix::io::OwnedFd;
use std::time::{Duration, Instant};

/// Handle to a worker subprocess with IPC channels.
///
/// The worker leads its own process group, so anything it spawns (the
/// converter program) can be killed together with it.
pub struct Proc {
    pid: Pid,
    writer: LineWriter,
    reader: LineReader,
    reaped: bool,
    /// Exit status collected when the process was reaped.
    exit_status: Option<WaitStatus>,
}

impl Proc {
    pub fn new(pid: Pid, stdin: PipeFd, stdout: PipeFd) -> Self {
        Self {
            pid,
            writer: LineWriter::new(stdin),
            reader: LineReader::new(stdout),
            reaped: false,
            exit_status: None,
        }
    }

    /// Create from a spawned `std::process::Child`, taking its stdin and stdout.
    ///
    /// Reaping is handled here through `waitpid`, so the `Child` is consumed.
    pub fn from_child(mut child: std::process::Child) -> Result<Self> {
        let pid = Pid::from_raw(child.id() as i32);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Worker("Child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Worker("Child stdout not captured".into()))?;

        Ok(Self::new(
            pid,
            PipeFd::new(OwnedFd::from(stdin)),
            PipeFd::new(OwnedFd::from(stdout)),
        ))
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Send a request to the worker.
    pub fn send(&mut self, request: &WorkRequest) -> Result<()> {
        let line = request.to_line()?;
        self.writer
            .write_line(&line)
            .map_err(|e| BridgeError::Worker(format!("Failed to send to worker: {}", e)))
    }

    /// Receive a response from the worker.
    ///
    /// Returns `None` if the worker closed its stdout (EOF).
    pub fn recv(&mut self) -> Result<Option<WorkResponse>> {
        match self.reader.read_line() {
            Ok(Some(line)) => WorkResponse::from_line(line)
                .map(Some)
                .map_err(|e| BridgeError::Worker(format!("Invalid worker response: {}", e))),
            Ok(None) => Ok(None),
            Err(e) => Err(BridgeError::Worker(format!(
                "Failed to receive from worker: {}",
                e
            ))),
        }
    }

    /// Check if the process is still running (non-blocking).
    pub fn is_running(&mut self) -> bool {
        !self.reaped && matches!(self.try_wait(), Ok(None))
    }

    /// Try to reap the process (non-blocking).
    ///
    /// Returns `None` if the process is still running. Once reaped, the same
    /// status is returned on every later call.
    pub fn try_wait(&mut self) -> Result<Option<WaitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        if self.reaped {
            return Err(BridgeError::Worker("Process already reaped".into()));
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => {
                self.reaped = true;
                self.exit_status = Some(status);
                Ok(Some(status))
            }
            Err(e) => {
                self.reaped = true;
                Err(BridgeError::Worker(format!("waitpid failed: {}", e)))
            }
        }
    }

    /// Poll for exit for up to `timeout`.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<WaitStatus> {
        let start = Instant::now();
        loop {
            match self.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) if start.elapsed() < timeout => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                _ => return None,
            }
        }
    }

    /// SIGKILL the worker's whole process group and reap the worker.
    pub fn kill(&mut self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        kill_group(self.pid);
        match waitpid(self.pid, None) {
            Ok(status) => {
                self.reaped = true;
                self.exit_status = Some(status);
                Ok(())
            }
            Err(e) => {
                self.reaped = true;
                Err(BridgeError::Worker(format!("waitpid failed: {}", e)))
            }
        }
    }

    /// Gracefully stop the worker: send exit, wait up to `timeout`, then kill.
    pub fn stop(&mut self, timeout: Duration) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        let _ = self.send(&WorkRequest::Exit);
        if self.wait_timeout(timeout).is_some() {
            return Ok(());
        }
        self.kill()
    }
}

/// SIGKILL every process in the group led by `pid`.
///
/// Errors are ignored: the group may already be gone.
pub fn kill_group(pid: Pid) {
    if signal::killpg(pid, Signal::SIGKILL).is_err() {
        let _ = signal::kill(pid, Signal::SIGKILL);
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.kill();
        }
    }
}
