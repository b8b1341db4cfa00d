//! Subprocess management for command probes and command setup actions.

use std::io;

use tokio::process::{Child, Command};

/// RAII guard that kills a child process (and its process group on Unix) on drop.
///
/// Wrap a spawned child immediately after `spawn()` so that an attempt timeout
/// or a cancelled gate does not leave it running. Call `disarm()` once the
/// process has been reaped.
pub struct ChildGuard {
    child: Child,
    armed: bool,
}

impl ChildGuard {
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self { child, armed: true }
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // SAFETY: killpg(2) on the process group created by `set_new_session`.
                unsafe {
                    if libc::killpg(pid as libc::pid_t, libc::SIGKILL) == -1 {
                        let _ = self.child.start_kill();
                    }
                }
            }
            let _ = self.child.try_wait();
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
            let _ = self.child.try_wait();
        }
    }
}

/// Put the child in its own session (Unix only) so `ChildGuard::drop` can
/// kill the whole process group, including grandchildren spawned by `sh -c`.
#[cfg(unix)]
pub fn set_new_session(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: only async-signal-safe calls between fork and exec.
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            // Linux-only: the child dies with the gate (kill -9, OOM).
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub fn set_new_session(_cmd: &mut Command) {}

/// Builds a command from a validated, non-empty argv.
pub(crate) fn command_for(argv: &[String]) -> io::Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
    let mut command = Command::new(program);
    command.args(args);
    set_new_session(&mut command);
    Ok(command)
}

#[cfg(all(test, unix))]
mod tests {
    use std::process::Stdio;

    use super::{ChildGuard, command_for};

    /// Running or sleeping, as opposed to gone or a zombie awaiting reaping.
    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
            return false;
        };
        // The comm field may contain spaces; the state follows the last ')'.
        let state = stat
            .rfind(')')
            .and_then(|idx| stat[idx + 1..].split_whitespace().next());
        !matches!(state, Some("Z" | "X") | None)
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dropped_guard_kills_child() {
        let mut command = command_for(&["sleep".to_string(), "30".to_string()]).unwrap();
        command.stdin(Stdio::null());
        let child = command.spawn().unwrap();
        let pid = child.id().unwrap();
        assert!(is_running(pid));

        drop(ChildGuard::new(child));

        let mut running = true;
        for _ in 0..100 {
            running = is_running(pid);
            if !running {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!running, "child should be gone after guard drop");
    }

    #[tokio::test]
    async fn disarmed_guard_leaves_reaped_child_alone() {
        let child = command_for(&["true".to_string()]).unwrap().spawn().unwrap();
        let mut guard = ChildGuard::new(child);
        let status = guard.child_mut().wait().await.unwrap();
        guard.disarm();
        assert!(status.success());
    }

    #[test]
    fn empty_argv_is_rejected() {
        assert!(command_for(&[]).is_err());
    }
}
