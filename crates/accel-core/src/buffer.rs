//! Buffer handles
//!
//! A [`BufferHandle`] owns exactly one device buffer. It is live until
//! [`BufferHandle::deallocate`] is called or the handle is dropped; what a drop
//! does depends on the handle's [`DisposalPolicy`].

use accel_runtime::{DeviceBuffer, DeviceId, Literal, Shape};
use accel_tracing::perf_span;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Weak;

use crate::client::{upgrade, ClientShared};
use crate::error::{Error, Result};
use crate::transfer;

/// What happens to a buffer when its handle is dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisposalPolicy {
    /// Owned by the host environment; dropping waits for pending device work
    HostManaged,
    /// Produced by the runtime; dropping frees at once
    RuntimeManaged,
}

/// Owner of one device-resident buffer
pub struct BufferHandle {
    buffer: Box<dyn DeviceBuffer>,
    disposal: DisposalPolicy,
    client: Weak<ClientShared>,
    // Serializes the deleted check with the delete itself
    deallocation: Mutex<()>,
}

impl BufferHandle {
    pub(crate) fn new(buffer: Box<dyn DeviceBuffer>, disposal: DisposalPolicy, client: Weak<ClientShared>) -> Self {
        Self {
            buffer,
            disposal,
            client,
            deallocation: Mutex::new(()),
        }
    }

    pub fn shape(&self) -> &Shape {
        self.buffer.on_device_shape()
    }

    pub fn device_id(&self) -> DeviceId {
        self.buffer.device_id()
    }

    pub fn disposal(&self) -> DisposalPolicy {
        self.disposal
    }

    pub fn is_deleted(&self) -> bool {
        self.buffer.is_deleted()
    }

    pub fn size_bytes(&self) -> Result<usize> {
        Ok(self.buffer.size_bytes()?)
    }

    pub fn block_until_ready(&self) -> Result<()> {
        Ok(self.buffer.block_host_until_ready()?)
    }

    pub(crate) fn device_buffer(&self) -> &dyn DeviceBuffer {
        self.buffer.as_ref()
    }

    /// Read the contents as bytes, truncated to `max_size` when
    /// `0 <= max_size < size`
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the buffer holds a tuple.
    #[tracing::instrument(skip(self), fields(device = %self.device_id(), shape = %self.shape()))]
    pub fn to_binary(&self, max_size: i64) -> Result<Vec<u8>> {
        upgrade(&self.client)?;
        if !self.shape().is_array() {
            return Err(Error::invalid_argument(format!(
                "cannot read a {} buffer as a flat binary",
                self.shape()
            )));
        }
        transfer::to_binary(self.buffer.as_ref(), max_size)
    }

    /// Read the contents as a typed literal
    pub fn to_literal(&self) -> Result<Literal> {
        upgrade(&self.client)?;
        Ok(self.buffer.to_literal_sync()?)
    }

    /// Copy to another device of the same client
    ///
    /// The copy is runtime-managed regardless of this handle's policy.
    #[tracing::instrument(skip(self), fields(source = %self.device_id()))]
    pub fn copy_to_device(&self, device: DeviceId) -> Result<BufferHandle> {
        let client = upgrade(&self.client)?;
        let target = client.lookup_device(device)?;
        let _span = perf_span!("copy_to_device", bytes = self.shape().byte_size()?);
        let copy = self.buffer.copy_to_device(target.as_ref())?;
        Ok(BufferHandle::new(copy, DisposalPolicy::RuntimeManaged, self.client.clone()))
    }

    /// Free the device memory now
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` when the buffer was already deallocated.
    #[tracing::instrument(skip(self), fields(device = %self.device_id()))]
    pub fn deallocate(&self) -> Result<()> {
        let _guard = self.deallocation.lock();
        if self.buffer.is_deleted() {
            return Err(Error::failed_precondition(
                "Attempt to deallocate already deallocated buffer.",
            ));
        }
        self.buffer.delete();
        tracing::debug!(shape = %self.shape(), "buffer_deallocated");
        Ok(())
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("device", &self.device_id())
            .field("shape", &self.shape().to_string())
            .field("disposal", &self.disposal)
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        if self.disposal == DisposalPolicy::HostManaged && !self.buffer.is_deleted() {
            if let Err(err) = self.buffer.block_host_until_ready() {
                tracing::warn!(device = %self.device_id(), error = %err, "pending work on dropped buffer failed");
            }
        }
    }
}
