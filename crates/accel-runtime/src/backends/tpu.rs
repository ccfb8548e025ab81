//! TPU runtime entry point

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::backend::{Platform, Runtime};
use crate::error::Result;
use crate::registry::{create_runtime, PlatformOptions};

/// Fixed TPU runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpuConfig {
    pub max_inflight_computations: usize,
}

impl Default for TpuConfig {
    fn default() -> Self {
        Self {
            max_inflight_computations: 32,
        }
    }
}

/// Create a TPU runtime through the registered plugin
pub fn get_tpu_runtime() -> Result<Arc<dyn Runtime>> {
    create_runtime(Platform::Tpu, &PlatformOptions::Tpu(TpuConfig::default()))
}
