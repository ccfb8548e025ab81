//! Process-wide registry of accelerator platform plugins
//!
//! GPU and TPU runtimes live outside this crate. A plugin registers a factory
//! for its platform; the entry points in [`crate::backends`] look it up.
//!
//! ```
//! use accel_runtime::registry::{register_platform, unregister_platform, PlatformOptions};
//! use accel_runtime::{CpuConfig, CpuRuntime, Platform, Runtime};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! register_platform(Platform::Tpu, |_options: &PlatformOptions| {
//!     Ok(Arc::new(CpuRuntime::new(CpuConfig::default())?) as Arc<dyn Runtime>)
//! })?;
//! let runtime = accel_runtime::get_tpu_runtime()?;
//! assert_eq!(runtime.device_count(), 1);
//! unregister_platform(Platform::Tpu);
//! # Ok(())
//! # }
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{Platform, Runtime};
use crate::backends::{GpuAllocatorConfig, TpuConfig};
use crate::error::{Result, RuntimeError};

/// Settings handed to a platform factory
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlatformOptions {
    Gpu(GpuAllocatorConfig),
    Tpu(TpuConfig),
}

/// Creates a runtime for one platform
pub type PlatformFactory = Arc<dyn Fn(&PlatformOptions) -> Result<Arc<dyn Runtime>> + Send + Sync>;

lazy_static::lazy_static! {
    static ref FACTORIES: RwLock<HashMap<Platform, PlatformFactory>> = RwLock::new(HashMap::new());
}

/// Register the factory for `platform`, replacing any previous one
///
/// The host platform is built in and cannot be registered.
pub fn register_platform<F>(platform: Platform, factory: F) -> Result<()>
where
    F: Fn(&PlatformOptions) -> Result<Arc<dyn Runtime>> + Send + Sync + 'static,
{
    if platform == Platform::Host {
        return Err(RuntimeError::invalid_argument("the host platform is built in"));
    }
    let previous = FACTORIES.write().insert(platform, Arc::new(factory));
    tracing::info!(%platform, replaced = previous.is_some(), "registered platform plugin");
    Ok(())
}

/// Remove the factory for `platform`; returns whether one was registered
pub fn unregister_platform(platform: Platform) -> bool {
    FACTORIES.write().remove(&platform).is_some()
}

pub fn is_registered(platform: Platform) -> bool {
    FACTORIES.read().contains_key(&platform)
}

pub(crate) fn create_runtime(platform: Platform, options: &PlatformOptions) -> Result<Arc<dyn Runtime>> {
    // Clone the factory out so it runs without holding the lock
    let factory = FACTORIES.read().get(&platform).cloned();
    match factory {
        Some(factory) => factory(options),
        None => Err(RuntimeError::unavailable(format!(
            "no {platform} runtime is registered in this process"
        ))),
    }
}
