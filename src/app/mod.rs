mod config;
mod report;

pub use config::{Config, OutputFormat, usage};
pub use report::{Report, cpu_brand};

use crate::cpu::{CpuInfo, TopologyProvider};
use crate::dispatch::Dispatcher;

/// Provider for the configured roots. Sysfs only exists on Linux; other x86
/// targets ask CPUID.
#[cfg(target_os = "linux")]
pub fn provider_for(config: &Config) -> Box<dyn TopologyProvider + Send + Sync> {
    Box::new(crate::cpu::SysfsTopology::with_roots(
        &config.sysfs_root,
        &config.cpuinfo_path,
    ))
}

#[cfg(all(
    not(target_os = "linux"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
pub fn provider_for(_config: &Config) -> Box<dyn TopologyProvider + Send + Sync> {
    Box::new(crate::cpu::CpuidTopology)
}

#[cfg(all(
    not(target_os = "linux"),
    not(any(target_arch = "x86", target_arch = "x86_64"))
))]
pub fn provider_for(_config: &Config) -> Box<dyn TopologyProvider + Send + Sync> {
    Box::new(crate::cpu::UnavailableTopology)
}

pub fn dispatcher_for(config: &Config) -> Dispatcher<Box<dyn TopologyProvider + Send + Sync>> {
    let dispatcher = Dispatcher::new(CpuInfo::new(provider_for(config)));
    match config.paths {
        Some(paths) => dispatcher.with_restriction(paths),
        None => dispatcher,
    }
}
