//! GPU runtime entry point
//!
//! The bridge does not ship a GPU runtime of its own. A plugin registers a
//! factory for [`Platform::Gpu`] through [`crate::registry`]; without one,
//! [`get_gpu_runtime`] fails with `Unavailable`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::backend::{Platform, Runtime};
use crate::error::{Result, RuntimeError};
use crate::registry::{create_runtime, PlatformOptions};

/// Device memory allocator used by a GPU runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocatorKind {
    /// Let the runtime decide
    #[default]
    Default,
    /// Allocate directly through the platform, no pooling
    Platform,
    /// Best-fit with coalescing pool
    Bfc,
    /// Stream-ordered asynchronous allocator
    CudaAsync,
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AllocatorKind::Default => "default",
            AllocatorKind::Platform => "platform",
            AllocatorKind::Bfc => "bfc",
            AllocatorKind::CudaAsync => "cuda_async",
        };
        f.write_str(name)
    }
}

impl FromStr for AllocatorKind {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "default" => Ok(AllocatorKind::Default),
            "platform" => Ok(AllocatorKind::Platform),
            "bfc" => Ok(AllocatorKind::Bfc),
            "cuda_async" => Ok(AllocatorKind::CudaAsync),
            other => Err(RuntimeError::invalid_argument(format!("unknown allocator kind '{other}'"))),
        }
    }
}

/// Allocator settings for a GPU runtime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuAllocatorConfig {
    pub kind: AllocatorKind,
    /// Fraction of device memory the allocator may claim, in `(0, 1]`
    pub memory_fraction: f64,
    /// Reserve the whole fraction up front
    pub preallocate: bool,
}

impl Default for GpuAllocatorConfig {
    fn default() -> Self {
        Self {
            kind: AllocatorKind::Default,
            memory_fraction: 0.9,
            preallocate: true,
        }
    }
}

impl GpuAllocatorConfig {
    pub fn new(memory_fraction: f64, preallocate: bool, kind: AllocatorKind) -> Result<Self> {
        let config = Self {
            kind,
            memory_fraction,
            preallocate,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.memory_fraction > 0.0 && self.memory_fraction <= 1.0) {
            return Err(RuntimeError::invalid_argument(format!(
                "memory fraction must be in (0, 1], got {}",
                self.memory_fraction
            )));
        }
        Ok(())
    }
}

/// Create a GPU runtime through the registered plugin
pub fn get_gpu_runtime(config: GpuAllocatorConfig) -> Result<Arc<dyn Runtime>> {
    config.validate()?;
    tracing::debug!(kind = %config.kind, memory_fraction = config.memory_fraction, preallocate = config.preallocate, "requesting gpu runtime");
    create_runtime(Platform::Gpu, &PlatformOptions::Gpu(config))
}
