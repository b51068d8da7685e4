//! CPU capability detection and implementation-path dispatch.
//!
//! [`CpuInfo`] discovers instruction-set extensions and cache geometry once
//! and caches the outcome. [`Path`] masks name the compiled implementation
//! variants, and [`Dispatcher`] resolves them to the one to run.

pub mod app;
pub mod cpu;
pub mod dispatch;
pub mod error;
pub mod path;
pub mod utils;

pub use cpu::{CacheSizes, CpuFeature, CpuInfo, InitStatus, TopologyProvider};
pub use dispatch::{Dispatcher, runtime_supported_paths, select_path};
pub use error::{ProbeError, Result};
pub use path::{ALL_PATHS, Path, get_most_significant_path};
