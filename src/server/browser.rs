//! Open the client page in the user's browser.

use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Address of the client page for a local HTTP port.
pub fn url(port: u16) -> String {
    format!("http://localhost:{}/", port)
}

fn opener(url: &str) -> Command {
    if cfg!(target_os = "macos") {
        let mut cmd = Command::new("open");
        cmd.arg(url);
        cmd
    } else if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", "start", "", url]);
        cmd
    } else {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(url);
        cmd
    }
}

/// Launch the platform opener. Failures are logged, never returned.
pub fn open(url: &str) {
    let spawned = opener(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match spawned {
        Ok(mut child) => {
            debug!(url, pid = child.id(), "Launched browser");
            let url = url.to_string();
            std::thread::spawn(move || match child.wait() {
                Ok(status) if !status.success() => {
                    warn!(url = %url, %status, "Browser opener failed");
                }
                Ok(_) => {}
                Err(e) => warn!(url = %url, error = %e, "Failed to wait for browser opener"),
            });
        }
        Err(e) => warn!(url, error = %e, "Failed to open browser"),
    }
}
