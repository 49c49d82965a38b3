//! OS-level process statistics
//!
//! Complements the stderr metrics with what the kernel knows about the
//! encoder child: liveness, CPU and memory shares, elapsed runtime,
//! command line, aggregated network counters, and the number of active
//! sockets. Every probe degrades to zero on failure; a channel with a
//! vanished `/proc` entry yields an all-zero record, not an error.

use nix::sys::signal::kill;
use nix::unistd::Pid;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, System};
use tokio::process::Command;
use tracing::debug;

/// Timeout for external socket-inspection tools.
const TOOL_TIMEOUT: Duration = Duration::from_secs(3);

/// OS statistics for one encoder process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessStats {
    pub pid: u32,
    pub alive: bool,
    /// CPU share in percent (may exceed 100 on multicore)
    pub cpu_percent: f32,
    /// Resident memory as a share of total memory, in percent
    pub memory_percent: f32,
    /// Seconds since the process started
    pub elapsed_secs: u64,
    /// Command line as the kernel reports it
    pub command: String,
    /// Received bytes across the process's network namespace (lo excluded)
    pub rx_bytes: u64,
    /// Transmitted bytes across the process's network namespace (lo excluded)
    pub tx_bytes: u64,
    /// Established sockets attributed to the process
    pub connections: u32,
}

/// Check whether a pid refers to a live process we may signal.
pub fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// True when the process's argv[0] names the same program as `program`.
/// Guards signals aimed at pids read back from the store: a pid recycled
/// to an unrelated process must never be signalled.
pub fn cmdline_matches(pid: u32, program: &str) -> bool {
    let Ok(raw) = std::fs::read(format!("/proc/{}/cmdline", pid)) else {
        return false;
    };
    let argv0 = raw.split(|b| *b == 0).next().unwrap_or(&[]);
    let argv0 = String::from_utf8_lossy(argv0);
    let expected = Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program);
    Path::new(argv0.as_ref())
        .file_name()
        .and_then(|n| n.to_str())
        .map(|name| name == expected)
        .unwrap_or(false)
}

/// Collects per-pid statistics via sysinfo and procfs.
pub struct ProcessMonitor {
    system: Mutex<System>,
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Full statistics for one pid. Network and socket probes run
    /// external tools and are bounded by [`TOOL_TIMEOUT`].
    pub async fn stats(&self, pid: u32) -> ProcessStats {
        let mut stats = self.cpu_and_memory(pid);
        let (rx, tx) = net_dev_counters(pid);
        stats.rx_bytes = rx;
        stats.tx_bytes = tx;
        stats.connections = connection_count(pid).await;
        stats
    }

    /// CPU/memory/elapsed/command, without touching external tools.
    pub fn cpu_and_memory(&self, pid: u32) -> ProcessStats {
        let mut system = self.system.lock();
        let sys_pid = sysinfo::Pid::from_u32(pid);
        system.refresh_memory();
        system.refresh_process_specifics(sys_pid, ProcessRefreshKind::everything());

        let Some(process) = system.process(sys_pid) else {
            return ProcessStats {
                pid,
                ..Default::default()
            };
        };

        let total_memory = system.total_memory();
        let memory_percent = if total_memory > 0 {
            (process.memory() as f64 / total_memory as f64 * 100.0) as f32
        } else {
            0.0
        };

        ProcessStats {
            pid,
            alive: true,
            cpu_percent: process.cpu_usage(),
            memory_percent,
            elapsed_secs: process.run_time(),
            command: process.cmd().join(" "),
            rx_bytes: 0,
            tx_bytes: 0,
            connections: 0,
        }
    }
}

/// Sum rx/tx byte counters from `/proc/<pid>/net/dev`, excluding
/// loopback. Zero when the file is gone or unparseable.
fn net_dev_counters(pid: u32) -> (u64, u64) {
    let path = format!("/proc/{}/net/dev", pid);
    let Ok(content) = std::fs::read_to_string(&path) else {
        return (0, 0);
    };

    let mut rx_total = 0u64;
    let mut tx_total = 0u64;
    for line in content.lines().skip(2) {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<&str> = counters.split_whitespace().collect();
        // rx bytes is field 0, tx bytes is field 8
        if let (Some(rx), Some(tx)) = (fields.first(), fields.get(8)) {
            rx_total += rx.parse::<u64>().unwrap_or(0);
            tx_total += tx.parse::<u64>().unwrap_or(0);
        }
    }
    (rx_total, tx_total)
}

/// Count established sockets for a pid, preferring `ss`, then
/// `netstat`, then plain fd enumeration.
async fn connection_count(pid: u32) -> u32 {
    if let Some(count) = count_with_tool("ss", &["-tnp"], pid).await {
        return count;
    }
    if let Some(count) = count_with_tool("netstat", &["-tnp"], pid).await {
        return count;
    }
    count_socket_fds(pid)
}

async fn count_with_tool(tool: &str, args: &[&str], pid: u32) -> Option<u32> {
    let output = tokio::time::timeout(
        TOOL_TIMEOUT,
        Command::new(tool).args(args).output(),
    )
    .await;

    let output = match output {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(_)) | Ok(Err(_)) => return None,
        Err(_) => {
            debug!("{} timed out during socket inspection", tool);
            return None;
        }
    };

    let needle = format!("pid={},", pid);
    let alt_needle = format!("{}/", pid);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let count = stdout
        .lines()
        .filter(|line| line.contains(&needle) || line.contains(&alt_needle))
        .count();
    Some(count as u32)
}

/// Fallback: count `socket:` descriptors under `/proc/<pid>/fd`.
fn count_socket_fds(pid: u32) -> u32 {
    let dir = format!("/proc/{}/fd", pid);
    let Ok(entries) = std::fs::read_dir(Path::new(&dir)) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| std::fs::read_link(entry.path()).ok())
        .filter(|target| {
            target
                .to_str()
                .map(|t| t.starts_with("socket:"))
                .unwrap_or(false)
        })
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_alive_for_self() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn test_cmdline_matches_self() {
        let pid = std::process::id();
        let exe = std::env::current_exe().unwrap();
        let name = exe.file_name().unwrap().to_str().unwrap();
        assert!(cmdline_matches(pid, name));
        assert!(!cmdline_matches(pid, "definitely-not-this-binary"));
        assert!(!cmdline_matches(4_000_000, name));
    }

    #[test]
    fn test_pid_alive_for_bogus_pid() {
        // pid_max on Linux defaults below this
        assert!(!pid_alive(4_000_000));
    }

    #[test]
    fn test_stats_for_dead_pid_are_zeroed() {
        let monitor = ProcessMonitor::new();
        let stats = monitor.cpu_and_memory(4_000_000);
        assert!(!stats.alive);
        assert_eq!(stats.cpu_percent, 0.0);
        assert_eq!(stats.elapsed_secs, 0);
        assert!(stats.command.is_empty());
    }

    #[test]
    fn test_stats_for_self() {
        let monitor = ProcessMonitor::new();
        let stats = monitor.cpu_and_memory(std::process::id());
        assert!(stats.alive);
        assert!(!stats.command.is_empty());
    }

    #[test]
    fn test_net_counters_for_dead_pid() {
        assert_eq!(net_dev_counters(4_000_000), (0, 0));
    }

    #[tokio::test]
    async fn test_connection_count_never_errors() {
        // Whatever tools exist on the host, the chain must settle on a number.
        let _count = connection_count(std::process::id()).await;
    }
}
