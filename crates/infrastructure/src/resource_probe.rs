//! Resource Probe (C1, spec.md §4.1): cgroup v2 → cgroup v1 → OS
//! fallback precedence, cached and re-probed on a fixed interval.

use async_trait::async_trait;
use domain::{ResourceProbe, ResourceReading};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::{debug, warn};

const CGROUP_V2_MEMORY_MAX: &str = "/sys/fs/cgroup/memory.max";
const CGROUP_V2_CPU_MAX: &str = "/sys/fs/cgroup/cpu.max";
const CGROUP_V1_MEMORY_LIMIT: &str = "/sys/fs/cgroup/memory/memory.limit_in_bytes";
const CGROUP_V1_CPU_QUOTA: &str = "/sys/fs/cgroup/cpu/cpu.cfs_quota_us";
const CGROUP_V1_CPU_PERIOD: &str = "/sys/fs/cgroup/cpu/cpu.cfs_period_us";

/// Treat a cgroup memory limit above this as "unset" (cgroup v1 often
/// reports a near-`i64::MAX` sentinel rather than `"max"`).
const UNSET_MEMORY_SENTINEL_BYTES: u64 = u64::MAX / 2;

async fn read_cgroup_v2() -> Option<ResourceReading> {
    let mem_raw = tokio::fs::read_to_string(CGROUP_V2_MEMORY_MAX).await.ok()?;
    let mem_raw = mem_raw.trim();
    let memory_mb = if mem_raw == "max" {
        return None; // unlimited: not useful as a sizing signal, fall through
    } else {
        mem_raw.parse::<u64>().ok()? / (1024 * 1024)
    };

    let cpu_raw = tokio::fs::read_to_string(CGROUP_V2_CPU_MAX).await.ok()?;
    let mut parts = cpu_raw.trim().split_whitespace();
    let quota = parts.next()?;
    let period: u64 = parts.next()?.parse().ok()?;
    if quota == "max" {
        return None;
    }
    let quota: u64 = quota.parse().ok()?;
    let cpu_count = (quota / period).max(1) as usize;

    Some(ResourceReading { memory_mb, cpu_count })
}

async fn read_cgroup_v1() -> Option<ResourceReading> {
    let mem_raw = tokio::fs::read_to_string(CGROUP_V1_MEMORY_LIMIT).await.ok()?;
    let limit_bytes: u64 = mem_raw.trim().parse().ok()?;
    if limit_bytes >= UNSET_MEMORY_SENTINEL_BYTES {
        return None;
    }
    let memory_mb = limit_bytes / (1024 * 1024);

    let quota_raw = tokio::fs::read_to_string(CGROUP_V1_CPU_QUOTA).await.ok()?;
    let quota: i64 = quota_raw.trim().parse().ok()?;
    if quota <= 0 {
        return None; // -1 means no quota configured
    }
    let period_raw = tokio::fs::read_to_string(CGROUP_V1_CPU_PERIOD).await.ok()?;
    let period: i64 = period_raw.trim().parse().ok()?;
    let cpu_count = ((quota / period).max(1)) as usize;

    Some(ResourceReading { memory_mb, cpu_count })
}

fn read_os_fallback() -> ResourceReading {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_all();
    let memory_mb = (sys.total_memory() / (1024 * 1024)).max(1);
    let cpu_count = System::physical_core_count().unwrap_or(1).max(1);
    ResourceReading { memory_mb, cpu_count }
}

async fn read_once() -> ResourceReading {
    if let Some(r) = read_cgroup_v2().await {
        debug!(?r, "resource probe: cgroup v2");
        return r;
    }
    if let Some(r) = read_cgroup_v1().await {
        debug!(?r, "resource probe: cgroup v1");
        return r;
    }
    let r = read_os_fallback();
    debug!(?r, "resource probe: OS fallback");
    r
}

struct Cached {
    reading: ResourceReading,
    last_probe: Instant,
}

/// Caches the last good [`ResourceReading`] and only re-probes after
/// `interval` has elapsed; a failed probe silently keeps the stale
/// value (spec.md §4.1: "Failure to read any file is non-fatal").
pub struct CgroupResourceProbe {
    interval: Duration,
    cached: Mutex<Option<Cached>>,
}

impl CgroupResourceProbe {
    pub fn new(interval: Duration) -> Self {
        Self { interval, cached: Mutex::new(None) }
    }

    pub fn with_default_interval() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

#[async_trait]
impl ResourceProbe for CgroupResourceProbe {
    async fn probe(&self) -> ResourceReading {
        let needs_refresh = {
            let guard = self.cached.lock().unwrap();
            match guard.as_ref() {
                Some(c) => c.last_probe.elapsed() >= self.interval,
                None => true,
            }
        };

        if !needs_refresh {
            return self.cached.lock().unwrap().as_ref().unwrap().reading;
        }

        let reading = read_once().await;
        let mut guard = self.cached.lock().unwrap();
        match guard.as_mut() {
            Some(c) => {
                c.reading = reading;
                c.last_probe = Instant::now();
            }
            None => {
                *guard = Some(Cached { reading, last_probe: Instant::now() });
            }
        }
        reading
    }
}

impl Default for CgroupResourceProbe {
    fn default() -> Self {
        let probe = Self::with_default_interval();
        if let Ok(mut guard) = probe.cached.lock() {
            // Seed synchronously with the OS fallback so the very
            // first call before any probe has run still returns a
            // usable (if conservative) reading instead of blocking.
            *guard = Some(Cached { reading: read_os_fallback(), last_probe: Instant::now() - Duration::from_secs(3600) });
            warn!("resource probe seeded with OS fallback; first probe() call will refresh it");
        }
        probe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn os_fallback_never_reports_zero() {
        let r = read_os_fallback();
        assert!(r.memory_mb > 0);
        assert!(r.cpu_count > 0);
    }

    #[tokio::test]
    async fn probe_caches_within_interval() {
        let probe = CgroupResourceProbe::new(Duration::from_secs(3600));
        let a = probe.probe().await;
        let b = probe.probe().await;
        assert_eq!(a, b);
    }
}
