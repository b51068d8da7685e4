use std::fs;
use std::path::Path;

use super::topology::{CpuFeature, FeatureSet};

pub const CPUINFO_PATH: &str = "/proc/cpuinfo";

/// CPU model name and flags parsed from /proc/cpuinfo
#[derive(Debug, Clone, Default)]
pub struct CpuDetails {
    pub model_name: String,
    pub flags: Vec<String>,
}

impl CpuDetails {
    /// Read and parse the file, or an empty record if it cannot be read
    pub fn read(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(err) => {
                tracing::debug!(path = %path.display(), %err, "cpuinfo unreadable");
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut details = Self::default();
        let mut flags_found = false;

        for line in content.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                // ARM kernels only print the SoC as "Hardware"
                "model name" | "Hardware" if details.model_name.is_empty() => {
                    details.model_name = value.to_string();
                }
                // x86 says "flags", ARM says "Features"
                "flags" | "Features" if !flags_found => {
                    details.flags = value.split_whitespace().map(String::from).collect();
                    flags_found = true;
                }
                _ => {}
            }

            // All processors list the same flags
            if flags_found && !details.model_name.is_empty() {
                break;
            }
        }

        details
    }

    /// Check if specific instruction set is supported
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// Flags the probe knows about
    pub fn features(&self) -> FeatureSet {
        self.flags
            .iter()
            .filter_map(|flag| CpuFeature::from_cpuinfo_flag(flag))
            .collect()
    }
}
