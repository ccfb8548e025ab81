//! Client configuration
//!
//! A [`ClientConfig`] picks the platform a [`Client`](crate::Client) connects
//! to, plus the settings for that platform. It can be deserialized from JSON
//! or assembled from environment variables.
//!
//! ```rust
//! use accel_core::ClientConfig;
//! use accel_runtime::Platform;
//!
//! let config = ClientConfig::from_json(r#"{ "platform": "host", "host": { "device_count": 2 } }"#)?;
//! assert_eq!(config.platform, Platform::Host);
//! assert_eq!(config.host.device_count, 2);
//! assert!(config.host.asynchronous);
//! # Ok::<(), accel_core::Error>(())
//! ```

use accel_runtime::{AllocatorKind, CpuConfig, GpuAllocatorConfig, Platform};
use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{Error, Result};

/// Which backend to connect to and how
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub platform: Platform,
    /// Used when `platform` is `host`
    pub host: CpuConfig,
    /// Used when `platform` is `gpu`
    pub gpu: GpuAllocatorConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Host,
            host: CpuConfig::default(),
            gpu: GpuAllocatorConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Host client with the given settings
    pub fn host(host: CpuConfig) -> Self {
        Self {
            platform: Platform::Host,
            host,
            ..Self::default()
        }
    }

    /// GPU client with the given allocator settings
    pub fn gpu(gpu: GpuAllocatorConfig) -> Self {
        Self {
            platform: Platform::Gpu,
            gpu,
            ..Self::default()
        }
    }

    pub fn tpu() -> Self {
        Self {
            platform: Platform::Tpu,
            ..Self::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| Error::invalid_argument(format!("invalid client config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from environment variables
    ///
    /// # Environment Variables
    ///
    /// - `ACCEL_PLATFORM` - `host` (default), `gpu`, or `tpu`
    /// - `ACCEL_HOST_DEVICE_COUNT` - number of host devices
    /// - `ACCEL_HOST_ASYNC` - `true`/`1`/`yes` to dispatch onto worker threads
    /// - `ACCEL_GPU_MEMORY_FRACTION` - fraction of GPU memory in `(0, 1]`
    /// - `ACCEL_GPU_PREALLOCATE` - `true`/`1`/`yes` to reserve memory up front
    /// - `ACCEL_GPU_ALLOCATOR` - `default`, `platform`, `bfc`, or `cuda-async`
    ///
    /// Unset variables keep their defaults; malformed ones are rejected.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(platform) = read_var("ACCEL_PLATFORM") {
            config.platform = platform.parse()?;
        }
        if let Some(count) = read_var("ACCEL_HOST_DEVICE_COUNT") {
            config.host.device_count = count
                .parse()
                .map_err(|_| Error::invalid_argument(format!("ACCEL_HOST_DEVICE_COUNT must be an integer, got '{count}'")))?;
        }
        if let Some(asynchronous) = read_var("ACCEL_HOST_ASYNC") {
            config.host.asynchronous = parse_flag(&asynchronous);
        }
        if let Some(fraction) = read_var("ACCEL_GPU_MEMORY_FRACTION") {
            config.gpu.memory_fraction = fraction.parse().map_err(|_| {
                Error::invalid_argument(format!("ACCEL_GPU_MEMORY_FRACTION must be a number, got '{fraction}'"))
            })?;
        }
        if let Some(preallocate) = read_var("ACCEL_GPU_PREALLOCATE") {
            config.gpu.preallocate = parse_flag(&preallocate);
        }
        if let Some(kind) = read_var("ACCEL_GPU_ALLOCATOR") {
            config.gpu.kind = kind.parse::<AllocatorKind>()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the settings of the selected platform
    pub fn validate(&self) -> Result<()> {
        match self.platform {
            Platform::Host => self.host.validate()?,
            Platform::Gpu => self.gpu.validate()?,
            Platform::Tpu => {}
        }
        Ok(())
    }
}

fn read_var(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1" || value.eq_ignore_ascii_case("yes")
}
