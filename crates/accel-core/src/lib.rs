//! # accel-core - buffers, executables and clients over an accelerator runtime
//!
//! This crate manages the lifecycle of runtime objects on behalf of a host
//! environment and marshals values across the boundary:
//!
//! - [`Client`] owns one backend connection (host CPU, GPU or TPU), creates
//!   buffers from host bytes, compiles programs, and streams infeed/outfeed.
//! - [`BufferHandle`] owns one device buffer, with read-back, device-to-device
//!   copy, explicit deallocation and a [`DisposalPolicy`] for drops.
//! - [`ExecutableHandle`] owns one compiled program and runs it over per-replica
//!   argument lists of host payloads and existing buffers.
//! - [`transfer`] is the codec between host bytes and runtime buffers/literals.
//!
//! ## Example
//!
//! ```rust
//! use accel_core::{Client, DisposalPolicy, HostPayload, RunArgument};
//! use accel_runtime::{ComputationBuilder, CpuConfig, DeviceId, ElementType, ExecutableBuildOptions, Shape};
//!
//! let client = Client::get_host_client(CpuConfig::default())?;
//!
//! let shape = Shape::scalar(ElementType::F32);
//! let mut builder = ComputationBuilder::new("add");
//! let x = builder.parameter(0, shape.clone())?;
//! let y = builder.parameter(1, shape.clone())?;
//! let sum = builder.add(x, y)?;
//! let executable = client.compile(
//!     &builder.build(sum)?,
//!     &[shape.clone(), shape.clone()],
//!     ExecutableBuildOptions::default(),
//!     false,
//! )?;
//!
//! let y_buffer = client.buffer_from_binary(
//!     HostPayload::from_slice(&[3.0f32]),
//!     &shape,
//!     DeviceId(0),
//!     DisposalPolicy::HostManaged,
//! )?;
//! let results = executable.run(
//!     vec![vec![
//!         RunArgument::payload(HostPayload::from_slice(&[2.0f32]), shape.clone()),
//!         RunArgument::buffer(&y_buffer),
//!     ]],
//!     None,
//! )?;
//!
//! assert_eq!(results[0].buffers[0].to_binary(-1)?, 5.0f32.to_ne_bytes().to_vec());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod args;
pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod executable;
pub mod transfer;

// Re-export primary types
pub use args::{ReplicaResult, RunArgument, RunArguments};
pub use buffer::{BufferHandle, DisposalPolicy};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, ErrorCode, Result};
pub use executable::ExecutableHandle;
pub use transfer::HostPayload;
