use std::env;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use crate::cpu::{CPUINFO_PATH, SYSFS_CPU_PATH};
use crate::error::{ProbeError, Result};
use crate::path::Path;

/// Output format of the report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub help: bool,
    pub format: OutputFormat,
    /// Restriction on the runtime path choice; `None` allows every path
    pub paths: Option<Path>,
    pub sysfs_root: PathBuf,
    pub cpuinfo_path: PathBuf,
}

/// File-based configuration (TOML)
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    probe: ProbeConfig,
    dispatch: DispatchConfig,
    output: OutputConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ProbeConfig {
    sysfs_root: String,
    cpuinfo: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            sysfs_root: SYSFS_CPU_PATH.to_string(),
            cpuinfo: CPUINFO_PATH.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DispatchConfig {
    paths: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct OutputConfig {
    format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
        }
    }
}

impl Config {
    pub fn from_args() -> Result<Self> {
        let file_config = match load_config_file() {
            Ok(config) => config.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(%err, "ignoring config file");
                FileConfig::default()
            }
        };
        Self::build(file_config, env::args().skip(1))
    }

    fn build(file_config: FileConfig, args: impl IntoIterator<Item = String>) -> Result<Self> {
        // Start with file config values
        let mut format = OutputFormat::parse(&file_config.output.format).ok_or_else(|| {
            ProbeError::config(format!(
                "invalid output format: {}",
                file_config.output.format
            ))
        })?;
        let mut paths = parse_restriction(&file_config.dispatch.paths)?;
        let mut sysfs_root = PathBuf::from(file_config.probe.sysfs_root);
        let mut cpuinfo_path = PathBuf::from(file_config.probe.cpuinfo);
        let mut help = false;

        // Override with CLI args
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" | "-h" => help = true,
                "--json" => format = OutputFormat::Json,
                "--format" => {
                    let value = next_value(&mut args, "--format")?;
                    format = OutputFormat::parse(&value).ok_or_else(|| {
                        ProbeError::invalid_argument(format!("invalid format: {value}"))
                    })?;
                }
                "--paths" => {
                    let value = next_value(&mut args, "--paths")?;
                    paths = parse_restriction(&value)?;
                }
                "--sysfs-root" => sysfs_root = next_value(&mut args, "--sysfs-root")?.into(),
                "--cpuinfo" => cpuinfo_path = next_value(&mut args, "--cpuinfo")?.into(),
                _ => return Err(ProbeError::invalid_argument(format!("unknown argument: {arg}"))),
            }
        }

        Ok(Self {
            help,
            format,
            paths,
            sysfs_root,
            cpuinfo_path,
        })
    }
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .ok_or_else(|| ProbeError::invalid_argument(format!("missing value for {flag}")))
}

/// Empty means "no restriction"
fn parse_restriction(value: &str) -> Result<Option<Path>> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    value.parse().map(Some)
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("cpuprobe").join("config.toml"))
}

fn load_config_file() -> Result<Option<FileConfig>> {
    let Some(path) = config_path() else {
        return Ok(None);
    };
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    parse_file_config(&content)
        .map(Some)
        .map_err(|err| ProbeError::config_invalid(path, err.to_string()))
}

fn parse_file_config(content: &str) -> Result<FileConfig> {
    Ok(toml::from_str(content)?)
}

pub fn usage() -> String {
    let config_location = config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/cpuprobe/config.toml".to_string());

    [
        "Usage: cpuprobe [options]",
        "",
        "Options:",
        "  --json               Print the report as JSON",
        "  --format <fmt>       text | json",
        "  --paths <list>       Restrict runtime choice, e.g. \"standard-cpp|avx2\"",
        "  --sysfs-root <dir>   CPU topology root (default: /sys/devices/system/cpu)",
        "  --cpuinfo <file>     cpuinfo file (default: /proc/cpuinfo)",
        "  -h, --help           Show this help",
        "",
        "Logging: set CPUPROBE_LOG (e.g. CPUPROBE_LOG=debug)",
        "",
        &format!("Config file: {config_location}"),
        "",
        "Example config.toml:",
        "  [probe]",
        "  sysfs_root = \"/sys/devices/system/cpu\"",
        "  cpuinfo = \"/proc/cpuinfo\"",
        "",
        "  [dispatch]",
        "  paths = \"all\"",
        "",
        "  [output]",
        "  format = \"text\"",
    ]
    .join("\n")
}
