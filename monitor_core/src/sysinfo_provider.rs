//! System Info Provider: the trait boundary behind which all
//! platform-specific inventory collection lives, per §1's "the core consumes
//! these as opaque providers" framing. `SysinfoProvider` is the one concrete
//! implementation the crate ships; anything else (Windows service control,
//! systemd unit queries) is the operator's integration to plug in.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use sysinfo::{Disks, Networks, System};

/// A snapshot of the top processes by a given resource, attached to alerts
/// for monitors with `pulls_processes = true`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

/// What resource to rank processes by when taking a snapshot.
#[derive(Debug, Clone, Copy)]
pub enum TopBy {
    Cpu,
    Memory,
}

/// Opaque provider of host inventory, used by the `refresh` task command and
/// by alert-time process snapshots. `sysinfo` backs the default
/// implementation; anything OS-specific beyond what `sysinfo` exposes
/// (service status per platform, Windows COM control) is out of scope per §1.
#[async_trait]
pub trait SystemInfoProvider: Send + Sync {
    /// `item` mirrors the task dispatcher's `refresh` command vocabulary
    /// (`"all"`, `"processes"`, `"disks"`, `"network"`, ...).
    async fn pull(&self, item: &str) -> Value;

    async fn top_processes(&self, by: TopBy, limit: usize) -> Vec<ProcessSnapshot>;

    async fn process_count(&self) -> u64;

    /// CPU/RAM/disk/network usage sources, used by the built-in resource monitor.
    async fn resource_snapshot(&self) -> ResourceSnapshot;
}

#[derive(Debug, Clone)]
pub struct ResourceSnapshot {
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    /// mount point / filesystem label -> percent used
    pub disk_percent: Vec<(String, f32)>,
}

/// Default provider backed by the `sysinfo` crate. Holds its own `System`
/// behind a mutex because `sysinfo::System::refresh_*` takes `&mut self`
/// while the trait above is `&self` (shared across every monitor that needs
/// inventory data).
pub struct SysinfoProvider {
    system: Mutex<System>,
    networks: Mutex<Networks>,
    disks: Mutex<Disks>,
    last_net_totals: Mutex<Option<(u64, u64, std::time::Instant)>>,
}

impl SysinfoProvider {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        Self {
            system: Mutex::new(system),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
            last_net_totals: Mutex::new(None),
        }
    }
}

impl Default for SysinfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// The host's fully qualified domain name (best-effort; falls back to
/// `"localhost"` if the platform reports none), used by the Controller to
/// identify this agent during credential bootstrap.
pub fn fqdn() -> String {
    System::host_name().unwrap_or_else(|| "localhost".to_string())
}

#[async_trait]
impl SystemInfoProvider for SysinfoProvider {
    async fn pull(&self, item: &str) -> Value {
        match item {
            "processes" | "process" => {
                let procs = self.top_processes(TopBy::Cpu, usize::MAX).await;
                serde_json::to_value(procs).unwrap_or(Value::Null)
            }
            "disks" => {
                let mut disks = self.disks.lock().expect("disks mutex poisoned");
                disks.refresh(true);
                let list: Vec<_> = disks
                    .list()
                    .iter()
                    .map(|d| {
                        serde_json::json!({
                            "name": d.name().to_string_lossy(),
                            "mount_point": d.mount_point().to_string_lossy(),
                            "total_space": d.total_space(),
                            "available_space": d.available_space(),
                        })
                    })
                    .collect();
                Value::Array(list)
            }
            "network" => {
                let snap = self.resource_snapshot().await;
                serde_json::json!({
                    "bytes_sent": snap.bytes_sent,
                    "bytes_recv": snap.bytes_recv,
                })
            }
            _ => {
                let snap = self.resource_snapshot().await;
                serde_json::json!({
                    "cpu_percent": snap.cpu_percent,
                    "ram_percent": snap.ram_percent,
                    "bytes_sent": snap.bytes_sent,
                    "bytes_recv": snap.bytes_recv,
                    "disks": snap.disk_percent,
                })
            }
        }
    }

    async fn top_processes(&self, by: TopBy, limit: usize) -> Vec<ProcessSnapshot> {
        let mut system = self.system.lock().expect("system mutex poisoned");
        system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        let mut procs: Vec<ProcessSnapshot> = system
            .processes()
            .values()
            .map(|p| ProcessSnapshot {
                pid: p.pid().as_u32(),
                name: p.name().to_string_lossy().to_string(),
                cpu_percent: p.cpu_usage(),
                memory_bytes: p.memory(),
            })
            .collect();
        match by {
            TopBy::Cpu => procs.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent)),
            TopBy::Memory => procs.sort_by(|a, b| b.memory_bytes.cmp(&a.memory_bytes)),
        }
        procs.truncate(limit);
        procs
    }

    async fn process_count(&self) -> u64 {
        let mut system = self.system.lock().expect("system mutex poisoned");
        system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        system.processes().len() as u64
    }

    async fn resource_snapshot(&self) -> ResourceSnapshot {
        let (cpu_percent, ram_percent) = {
            let mut system = self.system.lock().expect("system mutex poisoned");
            system.refresh_cpu_usage();
            system.refresh_memory();
            let cpu = system.global_cpu_usage();
            let ram = if system.total_memory() > 0 {
                system.used_memory() as f32 / system.total_memory() as f32 * 100.0
            } else {
                0.0
            };
            (cpu, ram)
        };

        let (bytes_sent, bytes_recv) = {
            let mut networks = self.networks.lock().expect("networks mutex poisoned");
            networks.refresh(true);
            let (total_sent, total_recv) = networks
                .iter()
                .fold((0u64, 0u64), |(s, r), (_, data)| {
                    (s + data.total_transmitted(), r + data.total_received())
                });

            let mut last = self.last_net_totals.lock().expect("net totals mutex poisoned");
            let now = std::time::Instant::now();
            let rates = match *last {
                Some((prev_sent, prev_recv, prev_at)) => {
                    let elapsed = now.duration_since(prev_at).as_secs_f64().max(1.0);
                    (
                        ((total_sent.saturating_sub(prev_sent)) as f64 / elapsed) as u64,
                        ((total_recv.saturating_sub(prev_recv)) as f64 / elapsed) as u64,
                    )
                }
                None => (0, 0),
            };
            *last = Some((total_sent, total_recv, now));
            rates
        };

        let disk_percent = {
            let mut disks = self.disks.lock().expect("disks mutex poisoned");
            disks.refresh(true);
            disks
                .list()
                .iter()
                .map(|d| {
                    let total = d.total_space();
                    let used = total.saturating_sub(d.available_space());
                    let percent = if total > 0 {
                        used as f32 / total as f32 * 100.0
                    } else {
                        0.0
                    };
                    (d.mount_point().to_string_lossy().to_string(), percent)
                })
                .collect()
        };

        ResourceSnapshot {
            cpu_percent,
            ram_percent,
            bytes_sent,
            bytes_recv,
            disk_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn process_count_is_nonzero_on_any_real_host() {
        let provider = SysinfoProvider::new();
        let count = provider.process_count().await;
        assert!(count > 0);
    }

    #[tokio::test]
    async fn resource_snapshot_percentages_are_bounded() {
        let provider = SysinfoProvider::new();
        let snap = provider.resource_snapshot().await;
        assert!(snap.ram_percent >= 0.0 && snap.ram_percent <= 100.0);
    }
}
