use std::path::Path as FsPath;

use serde::Serialize;
use sysinfo::{CpuRefreshKind, RefreshKind, System};

use crate::cpu::{CacheSizes, CpuDetails, CpuFeature, InitStatus, TopologyProvider};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::path::Path;

/// Everything the probe and dispatcher decided, for display
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub arch: &'static str,
    pub os: &'static str,
    pub cpu_brand: String,
    pub provider: &'static str,
    pub status: InitStatus,
    pub features: Vec<CpuFeature>,
    pub cache_sizes: CacheSizes,
    pub compiled_paths: Path,
    pub enabled_paths: Path,
    pub selected_path: Path,
}

impl Report {
    pub fn collect<P: TopologyProvider>(dispatcher: &Dispatcher<P>, cpu_brand: String) -> Self {
        let cpu = dispatcher.cpu();
        // Resolve first so status reflects the finished discovery
        let selected_path = dispatcher.path();
        Self {
            arch: std::env::consts::ARCH,
            os: std::env::consts::OS,
            cpu_brand,
            provider: cpu.provider().name(),
            status: cpu.status(),
            features: cpu.features().iter().collect(),
            cache_sizes: cpu.cache_sizes(),
            compiled_paths: dispatcher.compiled_paths(),
            enabled_paths: dispatcher.enabled_paths(),
            selected_path,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render_text(&self) -> String {
        let features = if self.features.is_empty() {
            "none".to_string()
        } else {
            self.features
                .iter()
                .map(|feature| feature.cpuinfo_flag())
                .collect::<Vec<_>>()
                .join(" ")
        };
        let status = match self.status {
            InitStatus::NotAttempted => "not attempted",
            InitStatus::Initialized => "initialized",
            InitStatus::Failed => "failed (using defaults)",
        };

        [
            format!("CPU:       {}", self.cpu_brand),
            format!("Target:    {}-{}", self.arch, self.os),
            format!("Provider:  {} ({status})", self.provider),
            format!("Features:  {features}"),
            format!("Cache:     {} (local / last level)", self.cache_sizes.format()),
            format!("Compiled:  {}", self.compiled_paths),
            format!("Enabled:   {}", self.enabled_paths),
            format!("Selected:  {}", self.selected_path),
        ]
        .join("\n")
    }
}

/// Marketing name of the first CPU. Falls back to the model name in
/// `cpuinfo_path`, then to "Unknown".
pub fn cpu_brand(cpuinfo_path: &FsPath) -> String {
    let system =
        System::new_with_specifics(RefreshKind::nothing().with_cpu(CpuRefreshKind::everything()));
    let brand = system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().to_string())
        .unwrap_or_default();
    brand_or_model_name(&brand, cpuinfo_path)
}

fn brand_or_model_name(brand: &str, cpuinfo_path: &FsPath) -> String {
    let brand = brand.trim();
    if !brand.is_empty() {
        return brand.to_string();
    }
    let model_name = CpuDetails::read(cpuinfo_path).model_name;
    if model_name.is_empty() {
        "Unknown".to_string()
    } else {
        model_name
    }
}
