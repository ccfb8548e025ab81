//! Host devices: feed queues and the per-device work stream

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use crate::backend::{Device, DeviceId};
use crate::error::{Result, RuntimeError};
use crate::literal::{BorrowingLiteral, Literal};

type Job = Box<dyn FnOnce() + Send>;

/// Blocking FIFO of literals
#[derive(Default)]
pub(crate) struct FeedQueue {
    queue: Mutex<VecDeque<Literal>>,
    available: Condvar,
}

impl FeedQueue {
    pub(crate) fn push(&self, literal: Literal) {
        self.queue.lock().push_back(literal);
        self.available.notify_one();
    }

    /// Wait for the next literal
    pub(crate) fn pop(&self) -> Literal {
        let mut queue = self.queue.lock();
        loop {
            if let Some(literal) = queue.pop_front() {
                return literal;
            }
            self.available.wait(&mut queue);
        }
    }

    /// Wait for the next literal and take it only if `check` accepts it
    ///
    /// A rejected literal stays at the front of the queue.
    pub(crate) fn pop_checked(&self, check: impl Fn(&Literal) -> Result<()>) -> Result<Literal> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(front) = queue.front() {
                check(front)?;
            }
            if let Some(literal) = queue.pop_front() {
                return Ok(literal);
            }
            self.available.wait(&mut queue);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Ordered worker thread; jobs run one at a time in submission order
struct Stream {
    sender: Mutex<mpsc::Sender<Job>>,
}

impl Stream {
    fn spawn(device: DeviceId) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name(format!("accel-cpu-{}", device.id()))
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            })
            .map_err(|e| RuntimeError::ResourceExhausted(format!("failed to spawn stream for {device}: {e}")))?;
        Ok(Self {
            sender: Mutex::new(sender),
        })
    }

    fn submit(&self, job: Job) -> std::result::Result<(), Job> {
        self.sender.lock().send(job).map_err(|mpsc::SendError(job)| job)
    }
}

/// One logical host device
pub struct CpuDevice {
    id: DeviceId,
    runtime_id: u64,
    infeed: FeedQueue,
    outfeed: FeedQueue,
    stream: Option<Stream>,
}

impl CpuDevice {
    pub(crate) fn new(id: DeviceId, runtime_id: u64, asynchronous: bool) -> Result<Self> {
        let stream = if asynchronous { Some(Stream::spawn(id)?) } else { None };
        Ok(Self {
            id,
            runtime_id,
            infeed: FeedQueue::default(),
            outfeed: FeedQueue::default(),
            stream,
        })
    }

    pub(crate) fn runtime_id(&self) -> u64 {
        self.runtime_id
    }

    pub(crate) fn infeed(&self) -> &FeedQueue {
        &self.infeed
    }

    pub(crate) fn outfeed(&self) -> &FeedQueue {
        &self.outfeed
    }

    pub(crate) fn is_asynchronous(&self) -> bool {
        self.stream.is_some()
    }

    /// Run `job` on this device's stream, or inline without one
    pub(crate) fn enqueue(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        match &self.stream {
            Some(stream) => {
                if let Err(job) = stream.submit(job) {
                    tracing::warn!(device = %self.id, "stream worker is gone, running job inline");
                    job();
                }
            }
            None => job(),
        }
    }

    /// Number of values waiting in the infeed queue
    pub fn pending_infeed(&self) -> usize {
        self.infeed.len()
    }

    /// Number of values waiting in the outfeed queue
    pub fn pending_outfeed(&self) -> usize {
        self.outfeed.len()
    }
}

impl fmt::Debug for CpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuDevice")
            .field("id", &self.id)
            .field("asynchronous", &self.is_asynchronous())
            .finish()
    }
}

impl Device for CpuDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn kind(&self) -> &str {
        "cpu"
    }

    fn transfer_to_infeed(&self, literal: &BorrowingLiteral<'_>) -> Result<()> {
        tracing::debug!(device = %self.id, shape = %literal.shape(), "infeed enqueue");
        self.infeed.push(literal.to_literal());
        Ok(())
    }

    fn transfer_from_outfeed(&self, literal: &mut Literal) -> Result<()> {
        let expected = literal.shape();
        let value = self.outfeed.pop_checked(|front| {
            if front.shape().compatible(expected) {
                Ok(())
            } else {
                Err(RuntimeError::shape_mismatch(expected, front.shape()))
            }
        })?;
        tracing::debug!(device = %self.id, shape = %value.shape(), "outfeed dequeue");
        literal.copy_from(&value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Resolve a `&dyn Device` to a host device of the given runtime
pub(crate) fn downcast_device(device: &dyn Device, runtime_id: u64) -> Result<&CpuDevice> {
    match device.as_any().downcast_ref::<CpuDevice>() {
        Some(cpu) if cpu.runtime_id == runtime_id => Ok(cpu),
        _ => Err(RuntimeError::invalid_argument(format!(
            "device {} does not belong to this host runtime",
            device.id()
        ))),
    }
}

/// Shared handle used by buffers and executables
pub(crate) type SharedDevice = Arc<CpuDevice>;
