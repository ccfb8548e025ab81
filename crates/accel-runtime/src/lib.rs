//! Accelerator runtime seam
//!
//! This crate provides:
//! - **Runtime traits**: [`Runtime`], [`Device`], [`DeviceBuffer`], [`LoadedExecutable`]
//! - **Shapes and literals**: typed, shaped host values
//! - **Computations**: a small graph format plus [`ComputationBuilder`]
//! - **Host runtime**: [`CpuRuntime`], the reference implementation
//! - **Platform registry**: GPU/TPU runtimes supplied by plugins
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               accel-core Client              │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │                Runtime trait                 │
//! └───────┬──────────────┬──────────────┬────────┘
//!         ▼              ▼              ▼
//!   ┌──────────┐   ┌───────────┐  ┌───────────┐
//!   │   Host   │   │ GPU       │  │ TPU       │
//!   │ (built   │   │ (plugin)  │  │ (plugin)  │
//!   │  in)     │   │           │  │           │
//!   └──────────┘   └───────────┘  └───────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use accel_runtime::{
//!     CompileOptions, ComputationBuilder, CpuConfig, CpuRuntime, DeviceId, ElementType, ExecuteOptions,
//!     HostBuffer, HostBufferSemantics, Runtime, Shape,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = CpuRuntime::new(CpuConfig::default())?;
//! let device = runtime.lookup_device(DeviceId(0))?;
//!
//! let mut builder = ComputationBuilder::new("square");
//! let x = builder.parameter(0, Shape::array(ElementType::F32, vec![2]))?;
//! let y = builder.mul(x, x)?;
//! let executable = runtime.compile(&builder.build(y)?, &CompileOptions::default())?;
//!
//! let input = runtime.buffer_from_host_buffer(
//!     HostBuffer::copied(bytemuck::cast_slice(&[3.0f32, 4.0])),
//!     &Shape::array(ElementType::F32, vec![2]),
//!     HostBufferSemantics::ImmutableOnlyDuringCall,
//!     device.as_ref(),
//! )?;
//! let outputs = executable.execute_portable(&[input.as_ref()], device.as_ref(), &ExecuteOptions::default())?;
//! assert_eq!(outputs[0].to_literal_sync()?.to_vec::<f32>()?, vec![9.0, 16.0]);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod computation;
pub mod error;
pub mod literal;
pub mod registry;
pub mod shape;

// Re-export public API
pub use backend::{
    CompileOptions, Device, DeviceAssignment, DeviceBuffer, DeviceId, DoneToken, ExecutableBuildOptions,
    ExecuteOptions, HostBuffer, HostBufferSemantics, LoadedExecutable, Platform, Runtime,
};
pub use backends::{
    get_gpu_runtime, get_tpu_runtime, AllocatorKind, CpuBuffer, CpuConfig, CpuDevice, CpuExecutable, CpuRuntime,
    GpuAllocatorConfig, TpuConfig,
};
pub use computation::{BinaryOp, Computation, ComputationBuilder, Instruction, InstructionId, Op, Operand, UnaryOp};
pub use error::{Result, RuntimeError};
pub use literal::{BorrowingLiteral, Literal, NativeType};
pub use shape::{ArrayShape, ElementType, Layout, Shape};
