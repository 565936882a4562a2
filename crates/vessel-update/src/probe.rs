//! ---
//! vsl_section: "08-updater"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Updater state machine and its collaborators."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
//! Parent liveness probing and the bounded wait for it to exit.

use std::io;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{Result, UpdaterError};

/// Answers whether a process is still running.
pub trait ParentProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> io::Result<bool>;
}

/// Probe backed by the operating system's process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

#[cfg(unix)]
impl ParentProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> io::Result<bool> {
        // kill(0, _) addresses the whole process group.
        if pid == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid pid 0"));
        }
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        // SAFETY: signal 0 performs permission and existence checks only.
        let rc = unsafe { libc::kill(pid, 0) };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Ok(false),
            Some(libc::EPERM) => Ok(true),
            _ => Err(err),
        }
    }
}

#[cfg(not(unix))]
impl ParentProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> io::Result<bool> {
        let output = std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/NH", "/FO", "CSV"])
            .output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "tasklist exited with {}",
                output.status
            )));
        }
        let needle = format!("\"{pid}\"");
        Ok(String::from_utf8_lossy(&output.stdout).contains(&needle))
    }
}

/// Exponential backoff between probes, bounded by an overall timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub initial: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
        }
    }
}

impl WaitPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Interval that follows `current`.
    #[must_use]
    pub fn next_interval(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_interval)
    }
}

/// Probe `pid` until it is gone. Returns the number of probes issued.
pub async fn wait_for_exit(probe: &dyn ParentProbe, pid: u32, policy: WaitPolicy) -> Result<u32> {
    let started = Instant::now();
    let mut interval = policy.initial;
    let mut probes = 0_u32;
    loop {
        probes += 1;
        let alive = probe
            .is_alive(pid)
            .map_err(|source| UpdaterError::Probe { pid, source })?;
        if !alive {
            debug!(pid, probes, "parent process exited");
            return Ok(probes);
        }
        let waited = started.elapsed();
        if waited >= policy.timeout {
            return Err(UpdaterError::ParentNeverExited { pid, waited });
        }
        let remaining = policy.timeout - waited;
        sleep(interval.min(remaining)).await;
        interval = policy.next_interval(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Countdown(AtomicU32);

    impl ParentProbe for Countdown {
        fn is_alive(&self, _pid: u32) -> io::Result<bool> {
            Ok(self
                .0
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok())
        }
    }

    struct Immortal;

    impl ParentProbe for Immortal {
        fn is_alive(&self, _pid: u32) -> io::Result<bool> {
            Ok(true)
        }
    }

    fn quick() -> WaitPolicy {
        WaitPolicy {
            initial: Duration::from_millis(1),
            max_interval: Duration::from_millis(4),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = WaitPolicy::default();
        let mut interval = policy.initial;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(interval.as_millis());
            interval = policy.next_interval(interval);
        }
        assert_eq!(seen, vec![50, 100, 200, 400, 800, 1600, 2000, 2000]);
    }

    #[tokio::test]
    async fn returns_after_parent_exits() {
        let probe = Countdown(AtomicU32::new(3));
        let probes = wait_for_exit(&probe, 42, quick()).await.unwrap();
        assert_eq!(probes, 4);
    }

    #[tokio::test]
    async fn gives_up_after_timeout() {
        let policy = quick().with_timeout(Duration::from_millis(20));
        let err = wait_for_exit(&Immortal, 42, policy).await.unwrap_err();
        assert!(matches!(err, UpdaterError::ParentNeverExited { pid: 42, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn system_probe_sees_current_process() {
        assert!(SystemProbe.is_alive(std::process::id()).unwrap());
        assert!(SystemProbe.is_alive(0).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn system_probe_sees_reaped_child_as_gone() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!SystemProbe.is_alive(pid).unwrap());
    }
}
