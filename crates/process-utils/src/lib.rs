//! Small process-related helpers shared across the workspace.
//!
//! Covers two concerns the orchestrator needs everywhere it spawns external
//! tooling: suppressing console windows on Windows, and stopping children
//! gracefully (terminate, wait, then kill).

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Send a termination signal to a child without killing it outright.
///
/// On Unix this delivers SIGTERM so the child can flush partial output; on
/// Windows there is no equivalent, so the child is killed immediately.
/// Returns `false` when the child has already exited or has no pid.
#[cfg(feature = "tokio")]
pub fn request_termination(child: &mut tokio::process::Child) -> bool {
    #[cfg(unix)]
    {
        let Some(pid) = child.id() else {
            return false;
        };
        return nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        )
        .is_ok();
    }
    #[cfg(not(unix))]
    {
        child.start_kill().is_ok()
    }
}

/// Stop a child gracefully: terminate, wait up to `grace`, then kill.
///
/// Always reaps the child before returning so no zombie is left behind.
#[cfg(feature = "tokio")]
pub async fn stop_gracefully(child: &mut tokio::process::Child, grace: std::time::Duration) {
    if request_termination(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => return,
            Err(_) => {
                // Grace period elapsed, escalate.
            }
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}
