//! Runtime traits
//!
//! These traits are the seam between the bridge and whatever actually owns
//! device memory and runs programs.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                   Runtime                    │
//! │  devices / assignment / host→device / compile│
//! └──────┬─────────────────┬──────────────┬──────┘
//!        ▼                 ▼              ▼
//!   ┌─────────┐     ┌──────────────┐ ┌──────────────────┐
//!   │ Device  │     │ DeviceBuffer │ │ LoadedExecutable │
//!   │ in/out- │     │ read-back,   │ │ execute_portable │
//!   │ feed    │     │ copy, delete │ │                  │
//!   └─────────┘     └──────────────┘ └──────────────────┘
//! ```
//!
//! All objects are `Send + Sync`; a runtime may do work on its own threads
//! but every trait method is blocking from the caller's side unless noted.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::types::{CompileOptions, DeviceAssignment, DeviceId, ExecuteOptions, HostBuffer, HostBufferSemantics, Platform};
use crate::computation::Computation;
use crate::error::Result;
use crate::literal::{BorrowingLiteral, Literal};
use crate::shape::Shape;

/// A connection to one accelerator backend
pub trait Runtime: Send + Sync + fmt::Debug {
    /// Platform this runtime drives
    fn platform(&self) -> Platform;

    /// Free-form version string of the underlying platform
    fn platform_version(&self) -> String;

    /// Addressable devices, ordered by id
    fn devices(&self) -> Vec<Arc<dyn Device>>;

    fn device_count(&self) -> usize {
        self.devices().len()
    }

    /// Resolve a device id
    ///
    /// # Errors
    ///
    /// `NotFound` when no device has this id.
    fn lookup_device(&self, id: DeviceId) -> Result<Arc<dyn Device>>;

    /// Default placement of `num_replicas` x `num_partitions` logical devices
    fn default_device_assignment(&self, num_replicas: usize, num_partitions: usize) -> Result<DeviceAssignment>;

    /// Create a device buffer from host memory
    ///
    /// `shape` must be an array shape whose byte size equals the host buffer
    /// length. The host buffer's completion token fires once the runtime no
    /// longer reads it, as dictated by `semantics`, and on every error path.
    fn buffer_from_host_buffer(
        &self,
        host: HostBuffer,
        shape: &Shape,
        semantics: HostBufferSemantics,
        device: &dyn Device,
    ) -> Result<Box<dyn DeviceBuffer>>;

    /// Compile and load a computation
    fn compile(&self, computation: &Computation, options: &CompileOptions) -> Result<Box<dyn LoadedExecutable>>;

    /// Stable identity of a compiled program, if the runtime provides one
    fn executable_fingerprint(&self, executable: &dyn LoadedExecutable) -> Result<Option<String>>;
}

/// One addressable device
pub trait Device: Send + Sync + fmt::Debug {
    fn id(&self) -> DeviceId;

    /// Human-readable device kind (e.g. `"cpu"`)
    fn kind(&self) -> &str;

    /// Push a value onto the device's infeed queue
    fn transfer_to_infeed(&self, literal: &BorrowingLiteral<'_>) -> Result<()>;

    /// Block until a value is available on the outfeed queue and copy it
    /// into `literal`, whose shape must match
    fn transfer_from_outfeed(&self, literal: &mut Literal) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// One device-resident buffer
///
/// A buffer is live until [`DeviceBuffer::delete`] is called or it is
/// dropped. Operations other than the queries fail on a deleted buffer.
pub trait DeviceBuffer: Send + Sync + fmt::Debug {
    /// Shape as stored on the device, layout included
    fn on_device_shape(&self) -> &Shape;

    fn device_id(&self) -> DeviceId;

    /// Size of the device allocation in bytes
    fn size_bytes(&self) -> Result<usize>;

    /// Wait for the contents and copy them to the host
    fn to_literal_sync(&self) -> Result<Literal>;

    /// Copy to another device of the same runtime
    fn copy_to_device(&self, device: &dyn Device) -> Result<Box<dyn DeviceBuffer>>;

    /// Free device memory now; the buffer is deleted afterwards
    fn delete(&self);

    fn is_deleted(&self) -> bool;

    /// Wait for every pending write to this buffer
    fn block_host_until_ready(&self) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// A compiled program loaded onto a runtime
pub trait LoadedExecutable: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn num_replicas(&self) -> usize;

    fn num_partitions(&self) -> usize;

    /// Execute a single replica on `device`
    ///
    /// Arguments must reside on `device`. Results may still be in flight when
    /// this returns; read-back waits for them.
    fn execute_portable(
        &self,
        arguments: &[&dyn DeviceBuffer],
        device: &dyn Device,
        options: &ExecuteOptions,
    ) -> Result<Vec<Box<dyn DeviceBuffer>>>;

    fn as_any(&self) -> &dyn Any;
}
