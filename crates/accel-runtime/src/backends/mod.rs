//! Runtime implementations
//!
//! - `cpu` - host runtime (reference implementation)
//! - `gpu` - GPU entry point, backed by a registered plugin
//! - `tpu` - TPU entry point, backed by a registered plugin

pub mod cpu;
pub mod gpu;
pub mod tpu;

pub use cpu::{CpuBuffer, CpuConfig, CpuDevice, CpuExecutable, CpuRuntime};
pub use gpu::{get_gpu_runtime, AllocatorKind, GpuAllocatorConfig};
pub use tpu::{get_tpu_runtime, TpuConfig};
