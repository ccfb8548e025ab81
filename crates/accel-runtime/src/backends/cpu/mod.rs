//! Host CPU runtime
//!
//! Reference implementation of the [`Runtime`] trait. Every device is a
//! logical device backed by host memory.
//!
//! # Architecture
//!
//! ```text
//! CpuRuntime
//! ├── CpuDevice      - infeed/outfeed queues + ordered worker stream
//! ├── CpuBuffer      - literal storage, readiness event, deletion flag
//! ├── CpuExecutable  - validated computation + fingerprint
//! └── interpreter    - evaluates computations (rayon for large arrays)
//! ```
//!
//! # Usage
//!
//! ```rust
//! use accel_runtime::{CpuConfig, CpuRuntime, DeviceId, ElementType, HostBuffer, HostBufferSemantics, Runtime, Shape};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = CpuRuntime::new(CpuConfig::default())?;
//! let device = runtime.lookup_device(DeviceId(0))?;
//!
//! let shape = Shape::array(ElementType::U8, vec![4]);
//! let buffer = runtime.buffer_from_host_buffer(
//!     HostBuffer::copied(&[1, 2, 3, 4]),
//!     &shape,
//!     HostBufferSemantics::ImmutableOnlyDuringCall,
//!     device.as_ref(),
//! )?;
//! assert_eq!(buffer.to_literal_sync()?.to_bytes(), vec![1, 2, 3, 4]);
//! # Ok(())
//! # }
//! ```

mod buffer;
mod device;
mod executable;
mod interpreter;

pub use buffer::CpuBuffer;
pub use device::CpuDevice;
pub use executable::CpuExecutable;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::{
    CompileOptions, Device, DeviceAssignment, DeviceBuffer, DeviceId, HostBuffer, HostBufferSemantics,
    LoadedExecutable, Platform, Runtime,
};
use crate::computation::Computation;
use crate::error::{Result, RuntimeError};
use crate::literal::Literal;
use crate::shape::Shape;
use buffer::{BufferState, Storage};
use device::{downcast_device, SharedDevice};

/// Source of unique runtime ids, used to reject foreign devices
static RUNTIME_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Host runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Number of logical devices
    pub device_count: usize,

    /// Dispatch executions and transfers onto per-device worker threads
    pub asynchronous: bool,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            device_count: 1,
            asynchronous: true,
        }
    }
}

impl CpuConfig {
    pub fn with_device_count(mut self, device_count: usize) -> Self {
        self.device_count = device_count;
        self
    }

    pub fn with_asynchronous(mut self, asynchronous: bool) -> Self {
        self.asynchronous = asynchronous;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_count == 0 {
            return Err(RuntimeError::invalid_argument("host runtime needs at least one device"));
        }
        Ok(())
    }
}

/// State shared by the runtime and every object it hands out
pub(crate) struct RuntimeShared {
    id: u64,
    config: CpuConfig,
    devices: Vec<SharedDevice>,
}

impl RuntimeShared {
    pub(crate) fn device(&self, id: DeviceId) -> Result<SharedDevice> {
        self.devices
            .get(id.id() as usize)
            .cloned()
            .ok_or_else(|| RuntimeError::not_found(format!("no device with id {}", id.id())))
    }

    /// Map a device handed in by the caller back to one of ours
    pub(crate) fn resolve(&self, device: &dyn Device) -> Result<SharedDevice> {
        let cpu = downcast_device(device, self.id)?;
        self.device(cpu.id())
    }
}

/// Host CPU runtime
#[derive(Clone)]
pub struct CpuRuntime {
    shared: Arc<RuntimeShared>,
}

impl CpuRuntime {
    pub fn new(config: CpuConfig) -> Result<Self> {
        config.validate()?;
        let id = RUNTIME_COUNTER.fetch_add(1, Ordering::Relaxed);
        let devices = (0..config.device_count)
            .map(|ordinal| CpuDevice::new(DeviceId(ordinal as u32), id, config.asynchronous).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(
            devices = config.device_count,
            asynchronous = config.asynchronous,
            "created host runtime"
        );
        Ok(Self {
            shared: Arc::new(RuntimeShared { id, config, devices }),
        })
    }

    pub fn config(&self) -> &CpuConfig {
        &self.shared.config
    }

    /// Concrete device, for feed queue inspection
    pub fn cpu_device(&self, id: DeviceId) -> Result<Arc<CpuDevice>> {
        self.shared.device(id)
    }
}

impl std::fmt::Debug for CpuRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuRuntime")
            .field("id", &self.shared.id)
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Runtime for CpuRuntime {
    fn platform(&self) -> Platform {
        Platform::Host
    }

    fn platform_version(&self) -> String {
        format!("host interpreter {}", env!("CARGO_PKG_VERSION"))
    }

    fn devices(&self) -> Vec<Arc<dyn Device>> {
        self.shared
            .devices
            .iter()
            .map(|device| device.clone() as Arc<dyn Device>)
            .collect()
    }

    fn device_count(&self) -> usize {
        self.shared.devices.len()
    }

    fn lookup_device(&self, id: DeviceId) -> Result<Arc<dyn Device>> {
        Ok(self.shared.device(id)? as Arc<dyn Device>)
    }

    fn default_device_assignment(&self, num_replicas: usize, num_partitions: usize) -> Result<DeviceAssignment> {
        let needed = num_replicas * num_partitions;
        if needed == 0 || needed > self.shared.devices.len() {
            return Err(RuntimeError::invalid_argument(format!(
                "cannot assign {num_replicas} replicas x {num_partitions} partitions to {} devices",
                self.shared.devices.len()
            )));
        }
        let ids = (0..needed).map(|ordinal| DeviceId(ordinal as u32)).collect();
        DeviceAssignment::new(num_replicas, num_partitions, ids)
    }

    fn buffer_from_host_buffer(
        &self,
        host: HostBuffer,
        shape: &Shape,
        semantics: HostBufferSemantics,
        device: &dyn Device,
    ) -> Result<Box<dyn DeviceBuffer>> {
        let Shape::Array(array) = shape else {
            return Err(RuntimeError::invalid_argument(format!(
                "host buffers need an array shape, got {shape}"
            )));
        };
        let expected = array.byte_size()?;
        if host.len() != expected {
            return Err(RuntimeError::invalid_argument(format!(
                "host buffer has {} bytes but {shape} needs {expected}",
                host.len()
            )));
        }
        if array.layout.as_ref().is_some_and(|layout| !layout.is_descending()) {
            return Err(RuntimeError::invalid_argument(format!(
                "host runtime only stores row-major arrays, got {shape}"
            )));
        }
        let device = self.shared.resolve(device)?;
        let on_device = shape.with_default_layout();

        let state = match semantics {
            HostBufferSemantics::ImmutableOnlyDuringCall => {
                let literal = Literal::from_bytes(on_device.clone(), host.data())?;
                drop(host);
                BufferState::with_storage(Storage::Owned(literal))
            }
            HostBufferSemantics::ImmutableUntilTransferCompletes => {
                let state = BufferState::pending();
                let pending = state.clone();
                let literal_shape = on_device.clone();
                device.enqueue(move || {
                    let copied = Literal::from_bytes(literal_shape, host.data());
                    drop(host);
                    pending.complete(copied.map(Storage::Owned));
                });
                state
            }
            HostBufferSemantics::ImmutableZeroCopy => BufferState::with_storage(Storage::Aliased(host)),
        };

        tracing::debug!(device = %device.id(), shape = %on_device, ?semantics, "host to device transfer");
        Ok(Box::new(CpuBuffer::new(self.shared.clone(), device, on_device, state)))
    }

    fn compile(&self, computation: &Computation, options: &CompileOptions) -> Result<Box<dyn LoadedExecutable>> {
        Ok(Box::new(CpuExecutable::compile(self.shared.clone(), computation, options)?))
    }

    fn executable_fingerprint(&self, executable: &dyn LoadedExecutable) -> Result<Option<String>> {
        Ok(executable
            .as_any()
            .downcast_ref::<CpuExecutable>()
            .map(|cpu| cpu.fingerprint().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DoneToken, ExecuteOptions};
    use crate::computation::ComputationBuilder;
    use crate::shape::ElementType;
    use std::sync::atomic::AtomicUsize;

    fn counting_host(bytes: &[u8], count: &Arc<AtomicUsize>) -> HostBuffer {
        let counter = count.clone();
        HostBuffer::new(
            Arc::from(bytes),
            DoneToken::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_config_validation() {
        assert!(CpuRuntime::new(CpuConfig::default().with_device_count(0)).is_err());
        let runtime = CpuRuntime::new(CpuConfig::default().with_device_count(3)).unwrap();
        assert_eq!(runtime.device_count(), 3);
        assert_eq!(runtime.platform(), Platform::Host);
    }

    #[test]
    fn test_lookup_unknown_device() {
        let runtime = CpuRuntime::new(CpuConfig::default()).unwrap();
        assert!(matches!(runtime.lookup_device(DeviceId(5)), Err(RuntimeError::NotFound(_))));
    }

    #[test]
    fn test_default_assignment() {
        let runtime = CpuRuntime::new(CpuConfig::default().with_device_count(2)).unwrap();
        let assignment = runtime.default_device_assignment(2, 1).unwrap();
        assert_eq!(assignment.get(1, 0), Some(DeviceId(1)));
        assert!(runtime.default_device_assignment(3, 1).is_err());
    }

    #[test]
    fn test_copy_semantics_release_immediately() {
        let runtime = CpuRuntime::new(CpuConfig::default().with_asynchronous(false)).unwrap();
        let device = runtime.lookup_device(DeviceId(0)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let shape = Shape::array(ElementType::U8, vec![2]);

        let buffer = runtime
            .buffer_from_host_buffer(
                counting_host(&[1, 2], &count),
                &shape,
                HostBufferSemantics::ImmutableOnlyDuringCall,
                device.as_ref(),
            )
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(buffer.to_literal_sync().unwrap().to_bytes(), vec![1, 2]);
    }

    #[test]
    fn test_zero_copy_releases_on_delete() {
        let runtime = CpuRuntime::new(CpuConfig::default()).unwrap();
        let device = runtime.lookup_device(DeviceId(0)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let shape = Shape::array(ElementType::U8, vec![3]);

        let buffer = runtime
            .buffer_from_host_buffer(
                counting_host(&[4, 5, 6], &count),
                &shape,
                HostBufferSemantics::ImmutableZeroCopy,
                device.as_ref(),
            )
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(buffer.to_literal_sync().unwrap().to_bytes(), vec![4, 5, 6]);

        buffer.delete();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(buffer.is_deleted());
        assert!(matches!(buffer.to_literal_sync(), Err(RuntimeError::FailedPrecondition(_))));
        drop(buffer);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_size_mismatch_releases_host_buffer() {
        let runtime = CpuRuntime::new(CpuConfig::default()).unwrap();
        let device = runtime.lookup_device(DeviceId(0)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let shape = Shape::array(ElementType::F32, vec![2]);

        let result = runtime.buffer_from_host_buffer(
            counting_host(&[0; 3], &count),
            &shape,
            HostBufferSemantics::ImmutableZeroCopy,
            device.as_ref(),
        );
        assert!(matches!(result, Err(RuntimeError::InvalidArgument(_))));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_until_transfer_completes() {
        let runtime = CpuRuntime::new(CpuConfig::default()).unwrap();
        let device = runtime.lookup_device(DeviceId(0)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let shape = Shape::array(ElementType::U8, vec![1]);

        let buffer = runtime
            .buffer_from_host_buffer(
                counting_host(&[42], &count),
                &shape,
                HostBufferSemantics::ImmutableUntilTransferCompletes,
                device.as_ref(),
            )
            .unwrap();
        buffer.block_host_until_ready().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(buffer.to_literal_sync().unwrap().to_bytes(), vec![42]);
    }

    #[test]
    fn test_cross_runtime_device_rejected() {
        let a = CpuRuntime::new(CpuConfig::default()).unwrap();
        let b = CpuRuntime::new(CpuConfig::default()).unwrap();
        let foreign = b.lookup_device(DeviceId(0)).unwrap();
        let result = a.buffer_from_host_buffer(
            HostBuffer::copied(&[1]),
            &Shape::array(ElementType::U8, vec![1]),
            HostBufferSemantics::ImmutableOnlyDuringCall,
            foreign.as_ref(),
        );
        assert!(matches!(result, Err(RuntimeError::InvalidArgument(_))));
    }

    #[test]
    fn test_compile_checks_replicas_unless_portable() {
        let runtime = CpuRuntime::new(CpuConfig::default()).unwrap();
        let mut builder = ComputationBuilder::new("id");
        let x = builder.parameter(0, Shape::scalar(ElementType::F32)).unwrap();
        let computation = builder.build(x).unwrap();

        let mut options = CompileOptions::default();
        options.executable_build_options.num_replicas = 2;
        assert!(matches!(
            runtime.compile(&computation, &options),
            Err(RuntimeError::Compilation(_))
        ));

        options.compile_portable_executable = true;
        let executable = runtime.compile(&computation, &options).unwrap();
        assert_eq!(executable.num_replicas(), 2);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let runtime = CpuRuntime::new(CpuConfig::default()).unwrap();
        let mut builder = ComputationBuilder::new("neg");
        let x = builder.parameter(0, Shape::scalar(ElementType::S32)).unwrap();
        let n = builder.neg(x).unwrap();
        let computation = builder.build(n).unwrap();

        let options = CompileOptions::default();
        let first = runtime.compile(&computation, &options).unwrap();
        let second = runtime.compile(&computation, &options).unwrap();
        let a = runtime.executable_fingerprint(first.as_ref()).unwrap().unwrap();
        let b = runtime.executable_fingerprint(second.as_ref()).unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(bincode::serialize(&computation).unwrap());
        hasher.update(bincode::serialize(&options).unwrap());
        assert_eq!(hex::decode(&a).unwrap(), hasher.finalize().to_vec());
    }

    #[test]
    fn test_execution_failure_poisons_outputs() {
        let runtime = CpuRuntime::new(CpuConfig::default()).unwrap();
        let device = runtime.lookup_device(DeviceId(0)).unwrap();
        let mut builder = ComputationBuilder::new("div");
        let x = builder.parameter(0, Shape::scalar(ElementType::S32)).unwrap();
        let zero = builder.constant(Literal::scalar(0i32));
        let q = builder.div(x, zero).unwrap();
        let computation = builder.build(q).unwrap();
        let executable = runtime.compile(&computation, &CompileOptions::default()).unwrap();

        let arg = runtime
            .buffer_from_host_buffer(
                HostBuffer::copied(&7i32.to_ne_bytes()),
                &Shape::scalar(ElementType::S32),
                HostBufferSemantics::ImmutableOnlyDuringCall,
                device.as_ref(),
            )
            .unwrap();
        let results = executable
            .execute_portable(&[arg.as_ref()], device.as_ref(), &ExecuteOptions::default())
            .unwrap();
        assert!(matches!(results[0].to_literal_sync(), Err(RuntimeError::Execution(_))));
    }
}
