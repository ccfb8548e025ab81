//! Host device buffers with readiness tracking

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::device::SharedDevice;
use super::RuntimeShared;
use crate::backend::{Device, DeviceBuffer, DeviceId, HostBuffer};
use crate::error::{Result, RuntimeError};
use crate::literal::Literal;
use crate::shape::Shape;

/// One-shot readiness signal carrying the producer's outcome
#[derive(Default)]
pub(crate) struct ReadyEvent {
    state: Mutex<Option<Result<()>>>,
    signalled: Condvar,
}

impl ReadyEvent {
    pub(crate) fn ready() -> Self {
        Self {
            state: Mutex::new(Some(Ok(()))),
            signalled: Condvar::new(),
        }
    }

    pub(crate) fn set(&self, outcome: Result<()>) {
        let mut state = self.state.lock();
        if state.is_none() {
            *state = Some(outcome);
            self.signalled.notify_all();
        }
    }

    pub(crate) fn wait(&self) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = state.as_ref() {
                return outcome.clone();
            }
            self.signalled.wait(&mut state);
        }
    }
}

/// Where a buffer's bytes live
pub(crate) enum Storage {
    Owned(Literal),
    /// Zero-copy alias of host memory, released when storage is dropped
    Aliased(HostBuffer),
}

impl Storage {
    fn to_literal(&self, shape: &Shape) -> Result<Literal> {
        match self {
            Storage::Owned(literal) => Ok(literal.clone()),
            Storage::Aliased(host) => Literal::from_bytes(shape.clone(), host.data()),
        }
    }
}

/// State shared between a buffer and the jobs reading or writing it
pub(crate) struct BufferState {
    ready: ReadyEvent,
    storage: Mutex<Option<Storage>>,
    deleted: AtomicBool,
    readers: AtomicUsize,
}

impl BufferState {
    pub(crate) fn pending() -> Arc<Self> {
        Arc::new(Self {
            ready: ReadyEvent::default(),
            storage: Mutex::new(None),
            deleted: AtomicBool::new(false),
            readers: AtomicUsize::new(0),
        })
    }

    pub(crate) fn with_storage(storage: Storage) -> Arc<Self> {
        Arc::new(Self {
            ready: ReadyEvent::ready(),
            storage: Mutex::new(Some(storage)),
            deleted: AtomicBool::new(false),
            readers: AtomicUsize::new(0),
        })
    }

    /// Publish the producer's result; failures poison the buffer
    pub(crate) fn complete(&self, outcome: Result<Storage>) {
        match outcome {
            Ok(storage) => {
                let mut slot = self.storage.lock();
                if !self.deleted.load(Ordering::SeqCst) {
                    *slot = Some(storage);
                }
                drop(slot);
                self.ready.set(Ok(()));
            }
            Err(err) => self.ready.set(Err(err)),
        }
    }

    /// Wait for the contents and read them
    pub(crate) fn read(&self, shape: &Shape) -> Result<Literal> {
        self.ready.wait()?;
        match self.storage.lock().as_ref() {
            Some(storage) => storage.to_literal(shape),
            None => Err(deleted_error()),
        }
    }

    /// Register an in-flight job that will read this buffer
    ///
    /// Fails when the buffer is already deleted.
    pub(crate) fn begin_read(self: &Arc<Self>) -> Result<PendingRead> {
        self.readers.fetch_add(1, Ordering::SeqCst);
        let pending = PendingRead { state: self.clone() };
        if self.deleted.load(Ordering::SeqCst) {
            return Err(deleted_error());
        }
        Ok(pending)
    }

    /// Drop the storage once the buffer is deleted and no job still reads it
    fn release_if_unread(&self) {
        if self.deleted.load(Ordering::SeqCst) && self.readers.load(Ordering::SeqCst) == 0 {
            let storage = self.storage.lock().take();
            drop(storage);
        }
    }
}

/// A job's claim on an argument buffer's contents
///
/// Deleting the buffer while claims are outstanding defers the free to the
/// last claim's drop.
pub(crate) struct PendingRead {
    state: Arc<BufferState>,
}

impl PendingRead {
    pub(crate) fn read(&self, shape: &Shape) -> Result<Literal> {
        self.state.read(shape)
    }
}

impl Drop for PendingRead {
    fn drop(&mut self) {
        self.state.readers.fetch_sub(1, Ordering::SeqCst);
        self.state.release_if_unread();
    }
}

fn deleted_error() -> RuntimeError {
    RuntimeError::failed_precondition("buffer has been deleted or donated")
}

/// Buffer resident on a [`CpuDevice`](super::CpuDevice)
pub struct CpuBuffer {
    runtime: Arc<RuntimeShared>,
    device: SharedDevice,
    shape: Shape,
    state: Arc<BufferState>,
}

impl CpuBuffer {
    pub(crate) fn new(runtime: Arc<RuntimeShared>, device: SharedDevice, shape: Shape, state: Arc<BufferState>) -> Self {
        Self {
            runtime,
            device,
            shape,
            state,
        }
    }

    pub(crate) fn state(&self) -> &Arc<BufferState> {
        &self.state
    }

    pub(crate) fn device(&self) -> &SharedDevice {
        &self.device
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_deleted() {
            return Err(deleted_error());
        }
        Ok(())
    }
}

impl fmt::Debug for CpuBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuBuffer")
            .field("device", &self.device.id())
            .field("shape", &self.shape.to_string())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

impl DeviceBuffer for CpuBuffer {
    fn on_device_shape(&self) -> &Shape {
        &self.shape
    }

    fn device_id(&self) -> DeviceId {
        self.device.id()
    }

    fn size_bytes(&self) -> Result<usize> {
        self.ensure_live()?;
        self.shape.byte_size()
    }

    fn to_literal_sync(&self) -> Result<Literal> {
        self.ensure_live()?;
        self.state.read(&self.shape)
    }

    fn copy_to_device(&self, device: &dyn Device) -> Result<Box<dyn DeviceBuffer>> {
        self.ensure_live()?;
        let target = self.runtime.resolve(device)?;
        let literal = self.state.read(&self.shape)?;
        let state = BufferState::with_storage(Storage::Owned(literal));
        Ok(Box::new(CpuBuffer::new(self.runtime.clone(), target, self.shape.clone(), state)))
    }

    fn delete(&self) {
        if !self.state.deleted.swap(true, Ordering::SeqCst) {
            self.state.release_if_unread();
        }
    }

    fn is_deleted(&self) -> bool {
        self.state.deleted.load(Ordering::SeqCst)
    }

    fn block_host_until_ready(&self) -> Result<()> {
        self.ensure_live()?;
        self.state.ready.wait()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for CpuBuffer {
    fn drop(&mut self) {
        self.delete();
    }
}
