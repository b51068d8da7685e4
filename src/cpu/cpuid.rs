#[cfg(target_arch = "x86")]
use std::arch::x86 as arch;
#[cfg(target_arch = "x86_64")]
use std::arch::x86_64 as arch;

use super::topology::{
    CacheDescriptor, CacheHierarchy, CpuFeature, FeatureSet, ProcessorInfo, Topology,
    TopologyProvider,
};
use crate::error::{ProbeError, Result};

/// Intel deterministic cache parameters
const INTEL_CACHE_LEAF: u32 = 4;
/// AMD cache topology, same register layout as leaf 4
const AMD_CACHE_LEAF: u32 = 0x8000_001D;
const MAX_CACHE_SUBLEAF: u32 = 16;

/// x86 provider for targets without sysfs.
///
/// Features come from `is_x86_feature_detected!`, caches from the CPUID cache
/// leaves. CPUID does not say which logical processors share a cache, only
/// how many, so processors are assumed to be numbered contiguously by core.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuidTopology;

impl TopologyProvider for CpuidTopology {
    fn name(&self) -> &'static str {
        "cpuid"
    }

    fn initialize(&self) -> Result<Topology> {
        let leaves = read_cache_leaves();
        if leaves.is_empty() {
            return Err(ProbeError::topology_unavailable(
                "cpuid reported no data caches",
            ));
        }
        let processor_count = std::thread::available_parallelism()?.get();
        Ok(build_topology(processor_count, &leaves, detect_features()))
    }
}

/// One data or unified cache level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheLeaf {
    level: u32,
    size: usize,
    /// Logical processors sharing the cache
    sharing: usize,
}

/// Decode one cache sub-leaf. `None` for instruction caches and for the
/// terminating null entry.
fn decode_cache_leaf(eax: u32, ebx: u32, ecx: u32) -> Option<CacheLeaf> {
    // 1 data, 2 instruction, 3 unified
    let cache_type = eax & 0x1F;
    if cache_type != 1 && cache_type != 3 {
        return None;
    }

    let line_size = (ebx & 0xFFF) as usize + 1;
    let partitions = ((ebx >> 12) & 0x3FF) as usize + 1;
    let ways = ((ebx >> 22) & 0x3FF) as usize + 1;
    let sets = ecx as usize + 1;

    Some(CacheLeaf {
        level: (eax >> 5) & 0x7,
        size: line_size * partitions * ways * sets,
        sharing: ((eax >> 14) & 0xFFF) as usize + 1,
    })
}

fn read_cache_leaves() -> Vec<CacheLeaf> {
    let leaves = read_cache_leaf(INTEL_CACHE_LEAF, 0);
    if !leaves.is_empty() {
        return leaves;
    }
    // Older AMD parts answer leaf 4 with zeros
    read_cache_leaf(AMD_CACHE_LEAF, 0x8000_0000)
}

fn read_cache_leaf(leaf: u32, range: u32) -> Vec<CacheLeaf> {
    // SAFETY: CPUID is present on every x86 target std supports
    let (max_leaf, _) = unsafe { arch::__get_cpuid_max(range) };
    if max_leaf < leaf {
        return Vec::new();
    }

    let mut leaves = Vec::new();
    for subleaf in 0..MAX_CACHE_SUBLEAF {
        // SAFETY: leaf is within the supported range checked above
        let result = unsafe { arch::__cpuid_count(leaf, subleaf) };
        if result.eax & 0x1F == 0 {
            break;
        }
        leaves.extend(decode_cache_leaf(result.eax, result.ebx, result.ecx));
    }
    leaves
}

fn detect_features() -> FeatureSet {
    [
        (is_x86_feature_detected!("sse4.2"), CpuFeature::Sse42),
        (is_x86_feature_detected!("avx2"), CpuFeature::Avx2),
        (is_x86_feature_detected!("avx512f"), CpuFeature::Avx512F),
        (is_x86_feature_detected!("avx512dq"), CpuFeature::Avx512Dq),
        (is_x86_feature_detected!("avx512cd"), CpuFeature::Avx512Cd),
        (is_x86_feature_detected!("avx512bw"), CpuFeature::Avx512Bw),
        (is_x86_feature_detected!("avx512vl"), CpuFeature::Avx512Vl),
        (is_x86_feature_detected!("avx512vnni"), CpuFeature::Avx512Vnni),
    ]
    .into_iter()
    .filter_map(|(detected, feature)| detected.then_some(feature))
    .collect()
}

/// Lay out `processor_count` identical processors. Each cache is shared by
/// aligned blocks of `sharing` processors. L1d is taken to be private to a
/// core, so its sharing count is the number of threads per core.
fn build_topology(processor_count: usize, leaves: &[CacheLeaf], features: FeatureSet) -> Topology {
    let processor_count = processor_count.max(1);
    let threads_per_core = leaves
        .iter()
        .find(|leaf| leaf.level == 1)
        .map_or(1, |leaf| leaf.sharing)
        .clamp(1, processor_count);

    let processors = (0..processor_count)
        .map(|cpu| {
            let mut caches = CacheHierarchy::default();
            for leaf in leaves {
                let sharing = leaf.sharing.clamp(1, processor_count);
                let processor_start = cpu / sharing * sharing;
                let descriptor = CacheDescriptor {
                    size: leaf.size,
                    processor_start,
                    processor_count: sharing.min(processor_count - processor_start),
                };
                match leaf.level {
                    1 => caches.l1d = Some(descriptor),
                    2 => caches.l2 = Some(descriptor),
                    3 => caches.l3 = Some(descriptor),
                    _ => {}
                }
            }
            ProcessorInfo {
                core: (cpu / threads_per_core) as u32,
                caches,
            }
        })
        .collect();

    Topology {
        processors,
        features,
    }
}
