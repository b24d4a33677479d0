//! Device memory readings and vendor probes.
//!
//! Each probe is a thin wrapper over one vendor tool, invoked with a hard
//! timeout. Probes never error: any failure (tool missing, permission
//! denied, unparseable output, timeout) is a `None`, and the caller decides
//! what to degrade to.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tokio::process::Command;
use tracing::{debug, warn};

/// One reading of device memory, in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMemory {
    /// Total device memory.
    pub total: u64,
    /// Memory in use.
    pub used: u64,
    /// Memory available for allocation.
    pub free: u64,
    /// Bytes held by the loaded model, when the probe can tell.
    pub model_resident: u64,
}

/// A source of device memory readings. May fail silently.
#[async_trait]
pub trait DeviceQuery: Send + Sync {
    /// One reading, or `None` on any failure.
    async fn memory_info(&self) -> Option<DeviceMemory>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Command helper
// ─────────────────────────────────────────────────────────────────────────────

/// Run a vendor command with a timeout, returning stdout on success.
async fn run_with_timeout(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Option<String> {
    let result = tokio::time::timeout(
        timeout,
        Command::new(program).args(args).output(),
    )
    .await;

    match result {
        Ok(Ok(output)) if output.status.success() => {
            String::from_utf8(output.stdout).ok()
        }
        Ok(Ok(output)) => {
            debug!(program, status = ?output.status, "probe command failed");
            None
        }
        Ok(Err(e)) => {
            debug!(program, error = %e, "probe command could not run");
            None
        }
        Err(_) => {
            warn!(program, ?timeout, "probe command timed out");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// NVIDIA
// ─────────────────────────────────────────────────────────────────────────────

/// Probe backed by `nvidia-smi`.
#[derive(Clone, Debug)]
pub struct NvidiaSmiQuery {
    timeout: Duration,
}

impl NvidiaSmiQuery {
    /// Create a probe with the given command timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Parse `nvidia-smi --query-gpu=memory.total,memory.used,memory.free`
/// CSV output (MiB, no units). Multi-GPU output sums per-line readings.
fn parse_nvidia_smi(output: &str) -> Option<DeviceMemory> {
    let mut acc = DeviceMemory::default();
    let mut seen = false;
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 3 {
            return None;
        }
        let mib: Vec<u64> = fields
            .iter()
            .map(|f| f.parse::<u64>())
            .collect::<Result<_, _>>()
            .ok()?;
        acc.total += mib[0] * 1024 * 1024;
        acc.used += mib[1] * 1024 * 1024;
        acc.free += mib[2] * 1024 * 1024;
        seen = true;
    }
    seen.then_some(acc)
}

#[async_trait]
impl DeviceQuery for NvidiaSmiQuery {
    async fn memory_info(&self) -> Option<DeviceMemory> {
        let output = run_with_timeout(
            "nvidia-smi",
            &[
                "--query-gpu=memory.total,memory.used,memory.free",
                "--format=csv,noheader,nounits",
            ],
            self.timeout,
        )
        .await?;
        parse_nvidia_smi(&output)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AMD
// ─────────────────────────────────────────────────────────────────────────────

/// Probe backed by `rocm-smi`.
#[derive(Clone, Debug)]
pub struct RocmSmiQuery {
    timeout: Duration,
}

impl RocmSmiQuery {
    /// Create a probe with the given command timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Parse `rocm-smi --showmeminfo vram --csv` output. Values are bytes.
///
/// Expected shape (one data line per card):
/// `card0,17163091968,1048576000`
fn parse_rocm_smi(output: &str) -> Option<DeviceMemory> {
    let mut acc = DeviceMemory::default();
    let mut seen = false;
    for line in output.lines().filter(|l| l.trim_start().starts_with("card")) {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 3 {
            return None;
        }
        let total: u64 = fields[1].parse().ok()?;
        let used: u64 = fields[2].parse().ok()?;
        acc.total += total;
        acc.used += used;
        acc.free += total.saturating_sub(used);
        seen = true;
    }
    seen.then_some(acc)
}

#[async_trait]
impl DeviceQuery for RocmSmiQuery {
    async fn memory_info(&self) -> Option<DeviceMemory> {
        let output = run_with_timeout(
            "rocm-smi",
            &["--showmeminfo", "vram", "--csv"],
            self.timeout,
        )
        .await?;
        parse_rocm_smi(&output)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// System RAM fallback (and Apple unified memory)
// ─────────────────────────────────────────────────────────────────────────────

/// Probe backed by system RAM via `sysinfo`.
///
/// On Apple silicon the GPU shares unified memory with the system, so this
/// is the accurate reading there, not merely a fallback.
#[derive(Debug, Default)]
pub struct SystemRamQuery;

#[async_trait]
impl DeviceQuery for SystemRamQuery {
    async fn memory_info(&self) -> Option<DeviceMemory> {
        // sysinfo reads /proc (or host APIs) synchronously and quickly; no
        // timeout needed.
        let mut sys = System::new();
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return None;
        }
        let used = sys.used_memory();
        Some(DeviceMemory {
            total,
            used,
            free: sys.available_memory(),
            model_resident: 0,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Detection
// ─────────────────────────────────────────────────────────────────────────────

/// Build the probe chain for this host: vendor tools first, system RAM last.
#[must_use]
pub fn default_queries(timeout: Duration) -> Vec<Box<dyn DeviceQuery>> {
    vec![
        Box::new(NvidiaSmiQuery::new(timeout)),
        Box::new(RocmSmiQuery::new(timeout)),
        Box::new(SystemRamQuery),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
