use serde::Serialize;

use super::topology::{CacheDescriptor, ProcessorInfo, Topology};
use crate::error::{ProbeError, Result};
use crate::utils::format_bytes;

const DUMMY_LOCAL_BYTES: usize = 32 * 1024;
const DUMMY_LAST_LEVEL_BYTES: usize = 512 * 1024;

/// Data cache sizes used for tiling decisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheSizes {
    /// Minimum over all cores of the size in bytes of the last data cache
    /// level local to that core (not shared with other cores). With private
    /// L1/L2 and a shared L3 this is the L2 size.
    pub local: usize,
    /// Minimum over all cores of the size in bytes of the last-level data
    /// cache. With a shared L3 this is the L3 size.
    pub last_level: usize,
}

impl CacheSizes {
    pub fn new(local: usize, last_level: usize) -> Self {
        Self { local, last_level }
    }

    /// Conservative values for when real detection is unavailable
    pub fn dummy() -> Self {
        Self {
            local: DUMMY_LOCAL_BYTES,
            last_level: DUMMY_LAST_LEVEL_BYTES,
        }
    }

    /// Format as "256.0 KiB / 4.0 MiB"
    pub fn format(&self) -> String {
        format!(
            "{} / {}",
            format_bytes(self.local as u64),
            format_bytes(self.last_level as u64)
        )
    }

    /// Walk every processor's cache hierarchy and keep the minimum local and
    /// last-level size.
    pub(crate) fn from_topology(topology: &Topology) -> Result<Self> {
        if topology.processors.is_empty() {
            return Err(ProbeError::invalid_topology("provider reported no processors"));
        }

        let mut overall: Option<CacheSizes> = None;
        for (index, processor) in topology.processors.iter().enumerate() {
            let sizes = processor_cache_sizes(topology, processor).map_err(|reason| {
                ProbeError::invalid_topology(format!("processor {index}: {reason}"))
            })?;
            let Some(sizes) = sizes else {
                continue;
            };
            overall = Some(match overall {
                Some(current) => CacheSizes {
                    local: current.local.min(sizes.local),
                    last_level: current.last_level.min(sizes.last_level),
                },
                None => sizes,
            });
        }

        overall.ok_or_else(|| ProbeError::invalid_topology("no processor reported a data cache"))
    }
}

/// Sizes seen from one processor, or `None` when it has no cache levels.
///
/// The last local level visited wins, and the last level visited at all is
/// the last-level cache. This is a heuristic and can misclassify
/// non-contiguous sharing; tuning elsewhere assumes it as is.
fn processor_cache_sizes(
    topology: &Topology,
    processor: &ProcessorInfo,
) -> std::result::Result<Option<CacheSizes>, String> {
    let mut local = 0;
    let mut last_level = 0;

    // continue, not break: L1 + L3 without L2 happens
    for cache in processor.caches.levels().into_iter().flatten() {
        if is_local(topology, cache)? {
            local = cache.size;
        }
        last_level = cache.size;
    }

    if last_level == 0 {
        return Ok(None);
    }
    if local == 0 {
        local = last_level;
    }
    Ok(Some(CacheSizes { local, last_level }))
}

/// A cache is local when the first and last processor sharing it sit on the
/// same core.
fn is_local(topology: &Topology, cache: &CacheDescriptor) -> std::result::Result<bool, String> {
    let last = cache
        .processor_start
        .checked_add(cache.processor_count)
        .and_then(|end| end.checked_sub(1));
    let first = topology.processor(cache.processor_start);
    let last = last.and_then(|index| topology.processor(index));
    match (first, last) {
        (Some(first), Some(last)) => Ok(first.core == last.core),
        _ => Err(format!(
            "sharing range {}+{} outside {} processors",
            cache.processor_start,
            cache.processor_count,
            topology.processor_count()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::topology::CacheHierarchy;

    fn cache(size: usize, processor_start: usize, processor_count: usize) -> CacheDescriptor {
        CacheDescriptor {
            size,
            processor_start,
            processor_count,
        }
    }

    /// 4 processors in 2 cores; each core's 2 processors share a 4 MiB L3,
    /// L1 and L2 are private per processor.
    fn two_core_topology() -> Topology {
        let processors = (0..4)
            .map(|cpu| {
                let core_start = cpu / 2 * 2;
                ProcessorInfo {
                    core: (cpu / 2) as u32,
                    caches: CacheHierarchy {
                        l1d: Some(cache(32 * 1024, cpu, 1)),
                        l2: Some(cache(256 * 1024, cpu, 1)),
                        l3: Some(cache(4 * 1024 * 1024, core_start, 2)),
                    },
                }
            })
            .collect();
        Topology {
            processors,
            ..Topology::default()
        }
    }

    #[test]
    fn dummy_values() {
        assert_eq!(CacheSizes::dummy(), CacheSizes::new(32768, 524288));
    }

    #[test]
    fn shared_l3_within_one_core_counts_as_local() {
        // Both processors sharing each L3 belong to the same core, so the L3
        // is local too and wins as the last local level visited.
        let sizes = CacheSizes::from_topology(&two_core_topology()).unwrap();
        assert_eq!(sizes.last_level, 4194304);
        assert_eq!(sizes.local, 4194304);
    }

    #[test]
    fn l3_shared_across_cores_leaves_l2_local() {
        let mut topology = two_core_topology();
        for processor in &mut topology.processors {
            processor.caches.l3 = Some(cache(4 * 1024 * 1024, 0, 4));
        }
        let sizes = CacheSizes::from_topology(&topology).unwrap();
        assert_eq!(sizes, CacheSizes::new(262144, 4194304));
    }

    #[test]
    fn missing_middle_level_does_not_stop_walk() {
        let topology = Topology {
            processors: vec![
                ProcessorInfo {
                    core: 0,
                    caches: CacheHierarchy {
                        l1d: Some(cache(48 * 1024, 0, 1)),
                        l2: None,
                        l3: Some(cache(8 * 1024 * 1024, 0, 2)),
                    },
                },
                ProcessorInfo {
                    core: 1,
                    caches: CacheHierarchy {
                        l1d: Some(cache(48 * 1024, 1, 1)),
                        l2: None,
                        l3: Some(cache(8 * 1024 * 1024, 0, 2)),
                    },
                },
            ],
            ..Topology::default()
        };
        let sizes = CacheSizes::from_topology(&topology).unwrap();
        assert_eq!(sizes, CacheSizes::new(48 * 1024, 8 * 1024 * 1024));
    }

    #[test]
    fn no_local_level_falls_back_to_last_level() {
        let topology = Topology {
            processors: vec![
                ProcessorInfo {
                    core: 0,
                    caches: CacheHierarchy {
                        l2: Some(cache(1024 * 1024, 0, 2)),
                        ..CacheHierarchy::default()
                    },
                },
                ProcessorInfo {
                    core: 1,
                    caches: CacheHierarchy {
                        l2: Some(cache(1024 * 1024, 0, 2)),
                        ..CacheHierarchy::default()
                    },
                },
            ],
            ..Topology::default()
        };
        let sizes = CacheSizes::from_topology(&topology).unwrap();
        assert_eq!(sizes, CacheSizes::new(1024 * 1024, 1024 * 1024));
    }

    #[test]
    fn aggregate_takes_minimum_across_processors() {
        // Hybrid layout: big core with 2 MiB L2, little core with 1 MiB L2
        let topology = Topology {
            processors: vec![
                ProcessorInfo {
                    core: 0,
                    caches: CacheHierarchy {
                        l1d: Some(cache(48 * 1024, 0, 1)),
                        l2: Some(cache(2 * 1024 * 1024, 0, 1)),
                        l3: Some(cache(30 * 1024 * 1024, 0, 2)),
                    },
                },
                ProcessorInfo {
                    core: 1,
                    caches: CacheHierarchy {
                        l1d: Some(cache(32 * 1024, 1, 1)),
                        l2: Some(cache(1024 * 1024, 1, 1)),
                        l3: Some(cache(30 * 1024 * 1024, 0, 2)),
                    },
                },
            ],
            ..Topology::default()
        };
        let sizes = CacheSizes::from_topology(&topology).unwrap();
        assert_eq!(sizes, CacheSizes::new(1024 * 1024, 30 * 1024 * 1024));
        assert!(sizes.last_level >= sizes.local);
    }

    #[test]
    fn empty_topology_is_invalid() {
        let err = CacheSizes::from_topology(&Topology::default()).unwrap_err();
        assert!(matches!(err, ProbeError::InvalidTopology { .. }));
    }

    #[test]
    fn sharing_range_out_of_bounds_is_invalid() {
        let topology = Topology {
            processors: vec![ProcessorInfo {
                core: 0,
                caches: CacheHierarchy {
                    l1d: Some(cache(32 * 1024, 0, 4)),
                    ..CacheHierarchy::default()
                },
            }],
            ..Topology::default()
        };
        let err = CacheSizes::from_topology(&topology).unwrap_err();
        assert!(err.to_string().contains("processor 0"));
    }

    #[test]
    fn sharing_range_overflow_is_invalid() {
        let topology = Topology {
            processors: vec![ProcessorInfo {
                core: 0,
                caches: CacheHierarchy {
                    l1d: Some(cache(32 * 1024, usize::MAX, 1)),
                    l2: Some(cache(256 * 1024, 0, usize::MAX)),
                    ..CacheHierarchy::default()
                },
            }],
            ..Topology::default()
        };
        let err = CacheSizes::from_topology(&topology).unwrap_err();
        assert!(err.to_string().contains("outside 1 processors"));
    }

    #[test]
    fn processors_without_caches_are_skipped() {
        let mut topology = two_core_topology();
        topology.processors[3].caches = CacheHierarchy::default();
        let sizes = CacheSizes::from_topology(&topology).unwrap();
        assert_eq!(sizes.last_level, 4194304);

        for processor in &mut topology.processors {
            processor.caches = CacheHierarchy::default();
        }
        assert!(CacheSizes::from_topology(&topology).is_err());
    }

    #[test]
    fn format_uses_binary_units() {
        assert_eq!(CacheSizes::new(262144, 4194304).format(), "256.0 KiB / 4.0 MiB");
    }
}
