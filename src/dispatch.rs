//! Resolution of a compiled path set to the single path to run.

use std::sync::OnceLock;

use crate::cpu::{CpuInfo, TopologyProvider};
use crate::path::{ALL_PATHS, Path};

/// Paths from `compiled` that this machine can run.
///
/// The portable paths are always usable. SIMD paths are kept only when the
/// probe reports the matching capability.
pub fn runtime_supported_paths<P: TopologyProvider>(cpu: &CpuInfo<P>, compiled: Path) -> Path {
    let portable = compiled & (Path::REFERENCE | Path::STANDARD_CPP);
    portable | arch_supported_paths(cpu, compiled)
}

/// Single path to run for `compiled` on this machine, or `Path::NONE` if
/// nothing compiled is usable
pub fn select_path<P: TopologyProvider>(cpu: &CpuInfo<P>, compiled: Path) -> Path {
    Path::most_significant(runtime_supported_paths(cpu, compiled))
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn arch_supported_paths<P: TopologyProvider>(cpu: &CpuInfo<P>, compiled: Path) -> Path {
    let mut paths = Path::NONE;
    if cpu.has_sse42() {
        paths |= Path::SSE42;
    }
    if cpu.has_avx2() {
        paths |= Path::AVX2;
    }
    if cpu.has_avx512() {
        paths |= Path::AVX512;
    }
    if cpu.has_avx_vnni() {
        paths |= Path::AVX_VNNI;
    }
    paths & compiled
}

#[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
fn arch_supported_paths<P: TopologyProvider>(cpu: &CpuInfo<P>, compiled: Path) -> Path {
    let mut paths = Path::NONE;
    // NEON is baseline on aarch64; 32-bit ARM needs it enabled at build time
    if cfg!(any(target_arch = "aarch64", target_feature = "neon")) {
        paths |= Path::NEON;
    }
    if cpu.has_neon_dotprod() {
        paths |= Path::NEON_DOTPROD;
    }
    paths & compiled
}

#[cfg(not(any(
    target_arch = "arm",
    target_arch = "aarch64",
    target_arch = "x86",
    target_arch = "x86_64"
)))]
fn arch_supported_paths<P: TopologyProvider>(_cpu: &CpuInfo<P>, _compiled: Path) -> Path {
    Path::NONE
}

/// Owns a probe and resolves the path to run, once.
pub struct Dispatcher<P: TopologyProvider> {
    cpu: CpuInfo<P>,
    compiled: Path,
    restriction: Option<Path>,
    enabled: OnceLock<Path>,
}

impl<P: TopologyProvider> Dispatcher<P> {
    pub fn new(cpu: CpuInfo<P>) -> Self {
        Self {
            cpu,
            compiled: ALL_PATHS,
            restriction: None,
            enabled: OnceLock::new(),
        }
    }

    /// Paths compiled into the caller. Defaults to `ALL_PATHS`.
    pub fn with_compiled(mut self, compiled: Path) -> Self {
        self.compiled = compiled;
        self.enabled = OnceLock::new();
        self
    }

    /// Limit runtime choice to `paths`, e.g. from user configuration
    pub fn with_restriction(mut self, paths: Path) -> Self {
        self.restriction = Some(paths);
        self.enabled = OnceLock::new();
        self
    }

    pub fn cpu(&self) -> &CpuInfo<P> {
        &self.cpu
    }

    pub fn compiled_paths(&self) -> Path {
        self.compiled
    }

    /// Runtime-supported paths after the restriction. A restriction that
    /// leaves nothing is ignored.
    pub fn enabled_paths(&self) -> Path {
        *self.enabled.get_or_init(|| {
            let supported = runtime_supported_paths(&self.cpu, self.compiled);
            let Some(restriction) = self.restriction else {
                return supported;
            };
            let restricted = supported & restriction;
            if restricted.is_empty() {
                tracing::warn!(
                    %restriction,
                    %supported,
                    "path restriction matches no supported path, ignoring it"
                );
                return supported;
            }
            restricted
        })
    }

    pub fn path(&self) -> Path {
        Path::most_significant(self.enabled_paths())
    }
}
