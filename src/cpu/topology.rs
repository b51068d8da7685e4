use serde::Serialize;

use crate::error::{ProbeError, Result};

/// Instruction-set extensions the probe can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuFeature {
    NeonDotprod,
    Sse42,
    Avx2,
    Avx512F,
    Avx512Dq,
    Avx512Cd,
    Avx512Bw,
    Avx512Vl,
    Avx512Vnni,
}

impl CpuFeature {
    pub const ALL: [CpuFeature; 9] = [
        CpuFeature::NeonDotprod,
        CpuFeature::Sse42,
        CpuFeature::Avx2,
        CpuFeature::Avx512F,
        CpuFeature::Avx512Dq,
        CpuFeature::Avx512Cd,
        CpuFeature::Avx512Bw,
        CpuFeature::Avx512Vl,
        CpuFeature::Avx512Vnni,
    ];

    /// Flag name as the kernel prints it in /proc/cpuinfo
    pub fn cpuinfo_flag(self) -> &'static str {
        match self {
            CpuFeature::NeonDotprod => "asimddp",
            CpuFeature::Sse42 => "sse4_2",
            CpuFeature::Avx2 => "avx2",
            CpuFeature::Avx512F => "avx512f",
            CpuFeature::Avx512Dq => "avx512dq",
            CpuFeature::Avx512Cd => "avx512cd",
            CpuFeature::Avx512Bw => "avx512bw",
            CpuFeature::Avx512Vl => "avx512vl",
            CpuFeature::Avx512Vnni => "avx512_vnni",
        }
    }

    pub fn from_cpuinfo_flag(flag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|feature| feature.cpuinfo_flag() == flag)
    }

    fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// Set of detected [`CpuFeature`]s
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSet(u16);

impl FeatureSet {
    pub fn insert(&mut self, feature: CpuFeature) {
        self.0 |= feature.bit();
    }

    pub fn contains(&self, feature: CpuFeature) -> bool {
        self.0 & feature.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = CpuFeature> + '_ {
        CpuFeature::ALL
            .into_iter()
            .filter(move |feature| self.contains(*feature))
    }
}

impl FromIterator<CpuFeature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = CpuFeature>>(iter: I) -> Self {
        let mut set = FeatureSet::default();
        for feature in iter {
            set.insert(feature);
        }
        set
    }
}

/// One cache level as seen from a processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDescriptor {
    /// Size in bytes
    pub size: usize,
    /// First logical processor sharing this cache
    pub processor_start: usize,
    /// Number of logical processors sharing this cache, contiguous from
    /// `processor_start`
    pub processor_count: usize,
}

/// Data cache levels of one processor, innermost first. L4 is deliberately
/// absent: staying in the lower-latency L3 is preferred.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheHierarchy {
    pub l1d: Option<CacheDescriptor>,
    pub l2: Option<CacheDescriptor>,
    pub l3: Option<CacheDescriptor>,
}

impl CacheHierarchy {
    pub fn levels(&self) -> [Option<&CacheDescriptor>; 3] {
        [self.l1d.as_ref(), self.l2.as_ref(), self.l3.as_ref()]
    }
}

/// One logical processor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorInfo {
    /// Core identifier; hardware threads of one core share it
    pub core: u32,
    pub caches: CacheHierarchy,
}

/// Snapshot handed over by a provider after successful initialization
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub processors: Vec<ProcessorInfo>,
    pub features: FeatureSet,
}

impl Topology {
    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    pub fn processor(&self, index: usize) -> Option<&ProcessorInfo> {
        self.processors.get(index)
    }
}

/// Source of hardware topology and capability bits.
///
/// `initialize` may fail; the failure is returned, never panicked.
/// `deinitialize` is called once by the owning probe, and only after a
/// successful `initialize`.
pub trait TopologyProvider {
    /// Human-readable name of this provider
    fn name(&self) -> &'static str;

    fn initialize(&self) -> Result<Topology>;

    fn deinitialize(&self) {}
}

impl<T: TopologyProvider + ?Sized> TopologyProvider for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn initialize(&self) -> Result<Topology> {
        (**self).initialize()
    }

    fn deinitialize(&self) {
        (**self).deinitialize()
    }
}

/// Provider for targets with no known topology source. Always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableTopology;

impl TopologyProvider for UnavailableTopology {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn initialize(&self) -> Result<Topology> {
        Err(ProbeError::topology_unavailable(format!(
            "no topology source for {}-{}",
            std::env::consts::ARCH,
            std::env::consts::OS
        )))
    }
}
