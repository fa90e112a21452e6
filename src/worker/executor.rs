//! Worker subprocess main entry point.
//!
//! This module runs when `molbridge --internal-worker` is invoked. It builds
//! the operation registry and serves call requests from the parent until its
//! stdin closes or it is told to exit.

use super::ipc::{LineReader, LineWriter, PipeFd};
use super::protocol::{WorkRequest, WorkResponse};
use crate::operations::{OperationError, OperationRegistry, Params};
use std::io;
use std::os::unix::io::{FromRawFd, OwnedFd};
use std::panic::{self, AssertUnwindSafe};

/// Run one call against the registry, turning every failure into a response.
pub fn execute(registry: &OperationRegistry, method: &str, params: Params) -> WorkResponse {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| registry.invoke(method, params)))
        .unwrap_or_else(|payload| Err(OperationError::from_panic(method, payload.as_ref())));

    match outcome {
        Ok(value) => WorkResponse::Result { value },
        Err(e) => WorkResponse::error(e.to_string()),
    }
}

/// Worker main loop.
///
/// Reads requests from `reader`, runs them, and writes one response per call.
fn worker_loop(
    registry: &OperationRegistry,
    reader: &mut LineReader,
    writer: &mut LineWriter,
) -> io::Result<()> {
    tracing::debug!(operations = ?registry.names().collect::<Vec<_>>(), "Worker ready");
    writer.write_line(&to_line(&WorkResponse::Ready)?)?;

    loop {
        let line = match reader.read_line()? {
            Some(line) => line.to_string(),
            // EOF - parent closed the pipe
            None => return Ok(()),
        };

        let response = match WorkRequest::from_line(&line) {
            Ok(WorkRequest::Exit) => return Ok(()),
            Ok(WorkRequest::Call { method, params }) => {
                tracing::debug!(method = %method, "Executing operation");
                execute(registry, &method, params)
            }
            Err(e) => WorkResponse::error(format!("Invalid request: {}", e)),
        };

        writer.write_line(&to_line(&response)?)?;
    }
}

fn to_line(response: &WorkResponse) -> io::Result<String> {
    response.to_line().map_err(io::Error::other)
}

/// Run the worker subprocess main function.
///
/// Never returns: the process exits with status 0 when the parent hangs up
/// and 1 on an I/O failure.
pub fn run_worker_main(registry: OperationRegistry) -> ! {
    // Pipe errors are handled through io::Error instead.
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    // Safety: descriptors 0 and 1 are the pipes set up by the parent and are
    // owned exclusively by this loop from here on.
    let (stdin_fd, stdout_fd) = unsafe { (OwnedFd::from_raw_fd(0), OwnedFd::from_raw_fd(1)) };
    let mut reader = LineReader::new(PipeFd::new(stdin_fd));
    let mut writer = LineWriter::new(PipeFd::new(stdout_fd));

    match worker_loop(&registry, &mut reader, &mut writer) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "Worker I/O failure");
            std::process::exit(1);
        }
    }
}
