use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;

/// Lifecycle of the transcoder process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// The transcoder itself exited; helpers it started may still run
    Exited,
    Terminating,
    Terminated,
}

/// Owns a child process and makes sure it and its helpers are killed and reaped.
///
/// On unix the child leads its own process group, so the ffmpeg processes yt-dlp starts
/// are signalled together with it. [`terminate`](Self::terminate) is idempotent. If the
/// guard is dropped before that, the group is killed and tokio's orphan reaper collects
/// the child.
pub(crate) struct ChildGuard {
    child: Child,
    pgid: Option<u32>,
    status: Option<ExitStatus>,
    state: ProcessState,
    kill_timeout: Duration,
}

impl ChildGuard {
    /// Spawn `command` as the leader of a new process group
    pub(crate) fn spawn(mut command: std::process::Command, kill_timeout: Duration) -> io::Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = Command::from(command).kill_on_drop(true).spawn()?;
        let pgid = if cfg!(unix) { child.id() } else { None };

        Ok(Self {
            child,
            pgid,
            status: None,
            state: ProcessState::Running,
            kill_timeout,
        })
    }

    pub(crate) fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub(crate) fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ProcessState {
        self.state
    }

    /// Wait for the child to exit, without a deadline.
    ///
    /// Cancel safe, so it can sit in a `select!` next to the output reader. The status is
    /// remembered and returned again by later calls.
    pub(crate) async fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        let status = self.child.wait().await?;
        self.status = Some(status);
        if self.state == ProcessState::Running {
            self.state = ProcessState::Exited;
        }
        Ok(status)
    }

    /// Wait up to the kill timeout for the child to exit on its own.
    ///
    /// Returns `Ok(None)` when it is still running afterwards.
    pub(crate) async fn wait_for_exit(&mut self) -> io::Result<Option<ExitStatus>> {
        let kill_timeout = self.kill_timeout;
        match timeout(kill_timeout, self.wait()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Kill the child and its process group, then wait (bounded) until the child is reaped
    pub(crate) async fn terminate(&mut self) {
        if self.state == ProcessState::Terminated {
            return;
        }
        self.state = ProcessState::Terminating;

        // Helpers can outlive an exited child and keep the output pipe open
        self.kill_group();

        if self.status.is_none() {
            if let Err(e) = self.child.start_kill() {
                // Already exited but not yet reaped; the wait below collects it
                tracing::debug!("Kill signal not delivered: {}", e);
            }

            let kill_timeout = self.kill_timeout;
            match timeout(kill_timeout, self.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!("Transcoder reaped: {}", status);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Failed to reap transcoder: {}", e);
                }
                Err(_) => {
                    tracing::warn!("Transcoder did not exit within {:?} after kill", kill_timeout);
                }
            }
        }
        self.state = ProcessState::Terminated;
    }

    #[cfg(unix)]
    fn kill_group(&self) {
        let Some(pgid) = self.pgid.and_then(|pgid| libc::pid_t::try_from(pgid).ok()) else {
            return;
        };

        // SAFETY: killpg only delivers a signal; an empty group reports ESRCH
        let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                tracing::debug!("Kill signal not delivered to group {}: {}", pgid, err);
            }
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&self) {}
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.state != ProcessState::Terminated {
            self.kill_group();
            let _ = self.child.start_kill();
        }
    }
}
