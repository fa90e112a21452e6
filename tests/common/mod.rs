//! Shared fixtures: a fake converter script and dispatcher settings that run
//! the real molbridge binary as the worker.

#![allow(dead_code)]

use molbridge::dispatcher::DispatcherConfig;
use molbridge::worker::{WorkerCommand, WorkerPoolConfig};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Stand-in for `obabel`, keyed on the input format:
///
/// - `-V` and `-L` print a version line and a format listing
/// - `sleep` records its pid next to the script and hangs
/// - `crash` kills the worker that started it with SIGSEGV
/// - `bad` fails like a rejected input
/// - anything else echoes a header and the input
pub const FAKE_OBABEL: &str = r#"#!/bin/sh
case "$1" in
  -V) echo "Open Babel 3.1.0 -- Oct 21 2020 -- 21:58:27" ;;
  -L) printf 'pdb -- Protein Data Bank format\nsmi -- SMILES format\n' ;;
  -isleep) echo $$ > "$(dirname "$0")/sleeper.pid"; exec sleep 5 ;;
  -icrash)
    # The first signal only uninstalls the runtime's handler.
    kill -SEGV $PPID; sleep 0.2; kill -SEGV $PPID; sleep 1 ;;
  -ibad) echo "Cannot read input format bad" >&2; exit 1 ;;
  *) echo "COMPND converted from ${1#-i} to ${2#-o}"; cat ;;
esac
"#;

pub struct FakeConverter {
    dir: TempDir,
    pub path: PathBuf,
}

impl FakeConverter {
    pub fn new() -> Self {
        Self::with_script(FAKE_OBABEL)
    }

    pub fn with_script(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obabel");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, path }
    }

    /// Pid written by the `sleep` input format, once it has started.
    pub fn sleeper_pid(&self) -> Option<i32> {
        std::fs::read_to_string(self.dir.path().join("sleeper.pid"))
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

pub fn molbridge_bin() -> &'static Path {
    Path::new(env!("CARGO_BIN_EXE_molbridge"))
}

pub fn dispatcher_config(converter: &FakeConverter, timeout: Duration) -> DispatcherConfig {
    DispatcherConfig {
        timeout,
        pool: WorkerPoolConfig {
            worker_count: 2,
            command: WorkerCommand::for_binary(molbridge_bin(), &converter.path),
        },
    }
}
