use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::cpuinfo::{CPUINFO_PATH, CpuDetails};
use super::topology::{
    CacheDescriptor, CacheHierarchy, ProcessorInfo, Topology, TopologyProvider,
};
use crate::error::{ProbeError, Result};

pub const SYSFS_CPU_PATH: &str = "/sys/devices/system/cpu";

const MAX_CACHE_INDEX: usize = 16;

/// Linux provider reading /sys/devices/system/cpu and /proc/cpuinfo
#[derive(Debug, Clone)]
pub struct SysfsTopology {
    cpu_root: PathBuf,
    cpuinfo_path: PathBuf,
}

impl SysfsTopology {
    pub fn new() -> Self {
        Self::with_roots(SYSFS_CPU_PATH, CPUINFO_PATH)
    }

    pub fn with_roots(cpu_root: impl Into<PathBuf>, cpuinfo_path: impl Into<PathBuf>) -> Self {
        Self {
            cpu_root: cpu_root.into(),
            cpuinfo_path: cpuinfo_path.into(),
        }
    }

    pub fn cpu_root(&self) -> &Path {
        &self.cpu_root
    }

    pub fn cpuinfo_path(&self) -> &Path {
        &self.cpuinfo_path
    }

    fn read_processors(&self) -> Result<Vec<ProcessorInfo>> {
        if !self.cpu_root.is_dir() {
            return Err(ProbeError::topology_unavailable(format!(
                "{} is not a directory",
                self.cpu_root.display()
            )));
        }

        // (package, core_id) pairs mapped to dense core identifiers
        let mut core_ids: HashMap<(u32, u32), u32> = HashMap::new();
        let mut processors = Vec::new();

        for cpu_id in 0.. {
            let cpu_path = self.cpu_root.join(format!("cpu{cpu_id}"));
            if !cpu_path.exists() {
                break;
            }

            let topology_path = cpu_path.join("topology");
            let package = read_file_u32(&topology_path.join("physical_package_id")).unwrap_or(0);
            // Without topology files every processor is its own core
            let core_id = read_file_u32(&topology_path.join("core_id")).unwrap_or(cpu_id);
            let next_id = core_ids.len() as u32;
            let core = *core_ids.entry((package, core_id)).or_insert(next_id);

            processors.push(ProcessorInfo {
                core,
                caches: read_cache_hierarchy(&cpu_path.join("cache"), cpu_id as usize),
            });
        }

        if processors.is_empty() {
            return Err(ProbeError::topology_unavailable(format!(
                "no cpu entries under {}",
                self.cpu_root.display()
            )));
        }
        Ok(processors)
    }
}

impl Default for SysfsTopology {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyProvider for SysfsTopology {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn initialize(&self) -> Result<Topology> {
        let processors = self.read_processors()?;
        let features = CpuDetails::read(&self.cpuinfo_path).features();
        Ok(Topology {
            processors,
            features,
        })
    }
}

fn read_cache_hierarchy(cache_path: &Path, cpu_id: usize) -> CacheHierarchy {
    let mut caches = CacheHierarchy::default();
    if !cache_path.exists() {
        return caches;
    }

    for index in 0..MAX_CACHE_INDEX {
        let index_path = cache_path.join(format!("index{index}"));
        if !index_path.exists() {
            break;
        }

        let level = read_file_u32(&index_path.join("level")).unwrap_or(0);
        let cache_type = read_file_string(&index_path.join("type")).unwrap_or_default();
        let size = read_file_string(&index_path.join("size"))
            .map(|size| parse_cache_size(&size))
            .unwrap_or(0);
        if size == 0 {
            continue;
        }
        let (processor_start, processor_count) =
            read_file_string(&index_path.join("shared_cpu_list"))
                .and_then(|list| parse_cpu_range(&list))
                .unwrap_or((cpu_id, 1));
        let descriptor = CacheDescriptor {
            size,
            processor_start,
            processor_count,
        };

        match (level, cache_type.as_str()) {
            (1, "Data") => caches.l1d = Some(descriptor),
            (2, "Unified" | "Data") => caches.l2 = Some(descriptor),
            (3, "Unified" | "Data") => caches.l3 = Some(descriptor),
            _ => {}
        }
    }

    caches
}

fn read_file_string(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_file_u32(path: &Path) -> Option<u32> {
    read_file_string(path)?.parse().ok()
}

/// Parse sysfs cache sizes like "32K", "1024K", "30M" into bytes
pub fn parse_cache_size(size_str: &str) -> usize {
    let size_str = size_str.trim();
    let (digits, multiplier) = match size_str.chars().last() {
        Some('K') => (&size_str[..size_str.len() - 1], 1024),
        Some('M') => (&size_str[..size_str.len() - 1], 1024 * 1024),
        Some('G') => (&size_str[..size_str.len() - 1], 1024 * 1024 * 1024),
        _ => (size_str, 1),
    };
    digits
        .trim()
        .parse::<usize>()
        .unwrap_or(0)
        .saturating_mul(multiplier)
}

/// Reduce a cpu list like "0-3" or "0,4" or "0-1,8-9" to the contiguous
/// range `(first, count)` spanning its first and last cpu
pub fn parse_cpu_range(list: &str) -> Option<(usize, usize)> {
    let list = list.trim();
    let first: usize = list
        .split(',')
        .next()?
        .split('-')
        .next()?
        .trim()
        .parse()
        .ok()?;
    let last: usize = list
        .rsplit(',')
        .next()?
        .rsplit('-')
        .next()?
        .trim()
        .parse()
        .ok()?;
    if last < first {
        return None;
    }
    Some((first, last - first + 1))
}
