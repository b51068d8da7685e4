mod cache;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod cpuid;
mod cpuinfo;
mod sysfs;
mod topology;

pub use cache::CacheSizes;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use cpuid::CpuidTopology;
pub use cpuinfo::{CPUINFO_PATH, CpuDetails};
pub use sysfs::{SYSFS_CPU_PATH, SysfsTopology, parse_cache_size, parse_cpu_range};
pub use topology::{
    CacheDescriptor, CacheHierarchy, CpuFeature, FeatureSet, ProcessorInfo, Topology,
    TopologyProvider, UnavailableTopology,
};

use std::sync::OnceLock;

use serde::Serialize;

/// Provider used by [`CpuInfo::default`] on this target
#[cfg(target_os = "linux")]
pub type DefaultProvider = SysfsTopology;
#[cfg(all(
    not(target_os = "linux"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
pub type DefaultProvider = CpuidTopology;
#[cfg(all(
    not(target_os = "linux"),
    not(any(target_arch = "x86", target_arch = "x86_64"))
))]
pub type DefaultProvider = UnavailableTopology;

/// Progress of the one-time capability discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStatus {
    NotAttempted,
    Initialized,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct Detected {
    cache_sizes: CacheSizes,
    features: FeatureSet,
}

/// Lazily initialized view of CPU capabilities.
///
/// The first query runs discovery against the provider, exactly once, even
/// when the probe is shared between threads. Every later query is served from
/// the cached outcome. A failed discovery is absorbed: feature queries answer
/// `false` and [`CpuInfo::cache_sizes`] answers [`CacheSizes::dummy`].
///
/// There is no process-wide instance; whoever dispatches owns a probe.
pub struct CpuInfo<P: TopologyProvider> {
    provider: P,
    // None inside the lock means discovery failed
    state: OnceLock<Option<Detected>>,
}

impl<P: TopologyProvider> CpuInfo<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            state: OnceLock::new(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run discovery if it has not run yet. True iff it succeeded.
    pub fn ensure_initialized(&self) -> bool {
        self.detected().is_some()
    }

    /// Current state, without triggering discovery
    pub fn status(&self) -> InitStatus {
        match self.state.get() {
            None => InitStatus::NotAttempted,
            Some(Some(_)) => InitStatus::Initialized,
            Some(None) => InitStatus::Failed,
        }
    }

    pub fn has_neon_dotprod(&self) -> bool {
        self.has(CpuFeature::NeonDotprod)
    }

    pub fn has_sse42(&self) -> bool {
        self.has(CpuFeature::Sse42)
    }

    pub fn has_avx2(&self) -> bool {
        self.has(CpuFeature::Avx2)
    }

    /// All of AVX-512 F, DQ, CD, BW and VL
    pub fn has_avx512(&self) -> bool {
        [
            CpuFeature::Avx512F,
            CpuFeature::Avx512Dq,
            CpuFeature::Avx512Cd,
            CpuFeature::Avx512Bw,
            CpuFeature::Avx512Vl,
        ]
        .into_iter()
        .all(|feature| self.has(feature))
    }

    /// Backed by the AVX-512 VNNI bit
    pub fn has_avx_vnni(&self) -> bool {
        self.has(CpuFeature::Avx512Vnni)
    }

    pub fn has(&self, feature: CpuFeature) -> bool {
        self.detected()
            .is_some_and(|detected| detected.features.contains(feature))
    }

    /// Detected features, empty when discovery failed
    pub fn features(&self) -> FeatureSet {
        self.detected()
            .map(|detected| detected.features)
            .unwrap_or_default()
    }

    pub fn cache_sizes(&self) -> CacheSizes {
        self.detected()
            .map(|detected| detected.cache_sizes)
            .unwrap_or_else(CacheSizes::dummy)
    }

    fn detected(&self) -> Option<&Detected> {
        self.state.get_or_init(|| self.discover()).as_ref()
    }

    fn discover(&self) -> Option<Detected> {
        let provider = self.provider.name();
        let topology = match self.provider.initialize() {
            Ok(topology) => topology,
            Err(err) => {
                tracing::warn!(provider, %err, "cpu capability discovery unavailable");
                return None;
            }
        };

        match CacheSizes::from_topology(&topology) {
            Ok(cache_sizes) => {
                tracing::debug!(
                    provider,
                    processors = topology.processor_count(),
                    local = cache_sizes.local,
                    last_level = cache_sizes.last_level,
                    "cpu capabilities detected"
                );
                Some(Detected {
                    cache_sizes,
                    features: topology.features,
                })
            }
            Err(err) => {
                tracing::warn!(provider, %err, "discarding unusable cpu topology");
                // Initialized but unusable: release now, Drop only handles
                // the Initialized state
                self.provider.deinitialize();
                None
            }
        }
    }
}

impl Default for CpuInfo<DefaultProvider> {
    fn default() -> Self {
        Self::new(DefaultProvider::default())
    }
}

impl<P: TopologyProvider> Drop for CpuInfo<P> {
    fn drop(&mut self) {
        if self.status() == InitStatus::Initialized {
            self.provider.deinitialize();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::{ProbeError, Result};

    #[derive(Default)]
    pub(crate) struct Counters {
        pub(crate) initialize: AtomicUsize,
        pub(crate) deinitialize: AtomicUsize,
    }

    /// Provider returning a fixed topology, or failing when `topology` is None
    pub(crate) struct MockProvider {
        pub(crate) topology: Option<Topology>,
        pub(crate) counters: Arc<Counters>,
    }

    impl MockProvider {
        pub(crate) fn ok(topology: Topology) -> Self {
            Self {
                topology: Some(topology),
                counters: Arc::default(),
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                topology: None,
                counters: Arc::default(),
            }
        }
    }

    impl TopologyProvider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn initialize(&self) -> Result<Topology> {
            self.counters.initialize.fetch_add(1, Ordering::SeqCst);
            self.topology
                .clone()
                .ok_or_else(|| ProbeError::topology_unavailable("mock failure"))
        }

        fn deinitialize(&self) {
            self.counters.deinitialize.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Four processors in two cores, private 32 KiB L1 and 256 KiB L2, one
    /// 4 MiB L3 spanning both cores
    pub(crate) fn scenario_topology(features: &[CpuFeature]) -> Topology {
        let processors = (0..4)
            .map(|cpu| ProcessorInfo {
                core: (cpu / 2) as u32,
                caches: CacheHierarchy {
                    l1d: Some(CacheDescriptor {
                        size: 32 * 1024,
                        processor_start: cpu,
                        processor_count: 1,
                    }),
                    l2: Some(CacheDescriptor {
                        size: 256 * 1024,
                        processor_start: cpu,
                        processor_count: 1,
                    }),
                    l3: Some(CacheDescriptor {
                        size: 4 * 1024 * 1024,
                        processor_start: 0,
                        processor_count: 4,
                    }),
                },
            })
            .collect();
        Topology {
            processors,
            features: features.iter().copied().collect(),
        }
    }

    #[test]
    fn discovery_is_lazy() {
        let cpu = CpuInfo::new(MockProvider::ok(scenario_topology(&[])));
        assert_eq!(cpu.status(), InitStatus::NotAttempted);
        assert_eq!(cpu.provider().counters.initialize.load(Ordering::SeqCst), 0);
        assert!(cpu.ensure_initialized());
        assert_eq!(cpu.status(), InitStatus::Initialized);
    }

    #[test]
    fn scenario_cache_sizes() {
        let cpu = CpuInfo::new(MockProvider::ok(scenario_topology(&[])));
        assert_eq!(cpu.cache_sizes(), CacheSizes::new(262144, 4194304));
    }

    #[test]
    fn ensure_initialized_queries_provider_once() {
        let cpu = CpuInfo::new(MockProvider::ok(scenario_topology(&[CpuFeature::Avx2])));
        let results: Vec<bool> = (0..5).map(|_| cpu.ensure_initialized()).collect();
        assert!(cpu.has_avx2());
        let _ = cpu.cache_sizes();
        assert!(results.iter().all(|ok| *ok));
        assert_eq!(cpu.provider().counters.initialize.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_discovery_degrades_to_defaults() {
        let cpu = CpuInfo::new(MockProvider::failing());
        assert!(!cpu.ensure_initialized());
        assert!(!cpu.ensure_initialized());
        assert_eq!(cpu.status(), InitStatus::Failed);
        assert_eq!(cpu.cache_sizes(), CacheSizes::new(32768, 524288));
        assert!(!cpu.has_neon_dotprod());
        assert!(!cpu.has_sse42());
        assert!(!cpu.has_avx2());
        assert!(!cpu.has_avx512());
        assert!(!cpu.has_avx_vnni());
        assert!(cpu.features().is_empty());
        assert_eq!(cpu.provider().counters.initialize.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unusable_topology_counts_as_failure() {
        let cpu = CpuInfo::new(MockProvider::ok(Topology::default()));
        assert!(!cpu.ensure_initialized());
        assert_eq!(cpu.cache_sizes(), CacheSizes::dummy());
        assert_eq!(cpu.provider().counters.deinitialize.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn overflowing_sharing_range_fails_discovery() {
        let mut topology = scenario_topology(&[CpuFeature::Avx2]);
        topology.processors[0].caches.l1d = Some(CacheDescriptor {
            size: 32 * 1024,
            processor_start: usize::MAX,
            processor_count: 1,
        });
        let cpu = CpuInfo::new(MockProvider::ok(topology));
        assert!(!cpu.ensure_initialized());
        assert_eq!(cpu.status(), InitStatus::Failed);
        assert_eq!(cpu.cache_sizes(), CacheSizes::dummy());
        assert!(!cpu.has_avx2());
    }

    #[test]
    fn avx512_requires_every_sub_extension() {
        let full = [
            CpuFeature::Avx512F,
            CpuFeature::Avx512Dq,
            CpuFeature::Avx512Cd,
            CpuFeature::Avx512Bw,
            CpuFeature::Avx512Vl,
        ];
        let cpu = CpuInfo::new(MockProvider::ok(scenario_topology(&full)));
        assert!(cpu.has_avx512());

        for missing in full {
            let partial: Vec<CpuFeature> =
                full.into_iter().filter(|feature| *feature != missing).collect();
            let cpu = CpuInfo::new(MockProvider::ok(scenario_topology(&partial)));
            assert!(!cpu.has_avx512(), "avx512 reported without {missing:?}");
        }
    }

    #[test]
    fn individual_feature_queries() {
        let cpu = CpuInfo::new(MockProvider::ok(scenario_topology(&[
            CpuFeature::Sse42,
            CpuFeature::Avx512Vnni,
            CpuFeature::NeonDotprod,
        ])));
        assert!(cpu.has_sse42());
        assert!(cpu.has_avx_vnni());
        assert!(cpu.has_neon_dotprod());
        assert!(!cpu.has_avx2());
    }

    #[test]
    fn deinitialize_runs_once_after_success() {
        let provider = MockProvider::ok(scenario_topology(&[]));
        let counters = Arc::clone(&provider.counters);
        let cpu = CpuInfo::new(provider);
        assert!(cpu.ensure_initialized());
        drop(cpu);
        assert_eq!(counters.deinitialize.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deinitialize_skipped_after_failure_or_no_attempt() {
        let provider = MockProvider::failing();
        let counters = Arc::clone(&provider.counters);
        let cpu = CpuInfo::new(provider);
        assert!(!cpu.ensure_initialized());
        drop(cpu);
        assert_eq!(counters.deinitialize.load(Ordering::SeqCst), 0);

        let provider = MockProvider::ok(scenario_topology(&[]));
        let counters = Arc::clone(&provider.counters);
        drop(CpuInfo::new(provider));
        assert_eq!(counters.initialize.load(Ordering::SeqCst), 0);
        assert_eq!(counters.deinitialize.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_first_queries_discover_once() {
        let cpu = CpuInfo::new(MockProvider::ok(scenario_topology(&[CpuFeature::Avx2])));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    assert!(cpu.has_avx2());
                    assert_eq!(cpu.cache_sizes().local, 262144);
                });
            }
        });
        assert_eq!(cpu.provider().counters.initialize.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn boxed_provider_delegates() {
        let provider: Box<dyn TopologyProvider> = Box::new(MockProvider::failing());
        let cpu = CpuInfo::new(provider);
        assert_eq!(cpu.provider().name(), "mock");
        assert!(!cpu.ensure_initialized());
    }
}
