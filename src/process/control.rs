//! Pid liveness checks and signal delivery.

use anyhow::{Context, Result};
use std::fmt;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Signal used to stop a server process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KillSignal {
    /// Graceful request (SIGTERM). Can hang during anti-cheat teardown.
    Terminate,
    /// Immediate termination (SIGKILL).
    #[default]
    Kill,
}

impl fmt::Display for KillSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminate => f.write_str("SIGTERM"),
            Self::Kill => f.write_str("SIGKILL"),
        }
    }
}

/// Seam over the OS process table, replaced by fakes in tests.
pub trait ProcessControl: Send + Sync {
    /// Whether a process with this pid currently exists.
    fn is_alive(&self, pid: u32) -> bool;

    /// Deliver `signal` to `pid`.
    fn signal(&self, pid: u32, signal: KillSignal) -> Result<()>;
}

/// [`ProcessControl`] backed by the real process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessControl;

impl ProcessControl for OsProcessControl {
    fn is_alive(&self, pid: u32) -> bool {
        is_running(pid)
    }

    fn signal(&self, pid: u32, signal: KillSignal) -> Result<()> {
        send_signal(pid, signal)
    }
}

/// Checks if a process with the given PID is currently running.
///
/// Uses sysinfo to query the system's process table. Returns `false` for
/// non-existent processes, making it safe to use for polling.
pub fn is_running(pid: u32) -> bool {
    let target = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    system.process(target).is_some()
}

/// Sends `signal` to the process with the given PID.
///
/// # Errors
///
/// Returns an error if the process does not exist or refuses the signal.
pub fn send_signal(pid: u32, signal: KillSignal) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid as NixPid;

        let raw = i32::try_from(pid).with_context(|| format!("pid {pid} out of range"))?;
        let nix_signal = match signal {
            KillSignal::Terminate => Signal::SIGTERM,
            KillSignal::Kill => Signal::SIGKILL,
        };
        signal::kill(NixPid::from_raw(raw), nix_signal)
            .with_context(|| format!("Failed to send {signal} to process {pid}"))?;
    }

    #[cfg(not(unix))]
    {
        let target = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        let process = system
            .process(target)
            .with_context(|| format!("Process {pid} not found"))?;
        let delivered = match signal {
            KillSignal::Terminate => process
                .kill_with(sysinfo::Signal::Term)
                .unwrap_or_else(|| process.kill()),
            KillSignal::Kill => process.kill(),
        };
        if !delivered {
            anyhow::bail!("Failed to send {signal} to process {pid}");
        }
    }

    tracing::debug!(pid = pid, signal = %signal, "Delivered signal");
    Ok(())
}
