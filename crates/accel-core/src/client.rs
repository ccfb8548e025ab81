//! Client: one connection to an accelerator backend
//!
//! The client owns the runtime. Buffer and executable handles created through
//! it keep only a weak back-reference and fail with `FailedPrecondition` once
//! every clone of the client has been dropped.

use accel_runtime::{
    get_gpu_runtime, get_tpu_runtime, AllocatorKind, CompileOptions, Computation, CpuConfig, CpuRuntime, Device,
    DeviceAssignment, DeviceId, ExecutableBuildOptions, GpuAllocatorConfig, Platform, Runtime, Shape,
};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::buffer::{BufferHandle, DisposalPolicy};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::executable::ExecutableHandle;
use crate::transfer::{self, HostPayload, TRANSFER_SEMANTICS};

/// State shared between a client and the handles it creates
pub(crate) struct ClientShared {
    runtime: Arc<dyn Runtime>,
}

impl ClientShared {
    pub(crate) fn runtime(&self) -> &dyn Runtime {
        self.runtime.as_ref()
    }

    pub(crate) fn lookup_device(&self, id: DeviceId) -> Result<Arc<dyn Device>> {
        Ok(self.runtime.lookup_device(id)?)
    }
}

/// Upgrade a handle's back-reference to its client
pub(crate) fn upgrade(client: &Weak<ClientShared>) -> Result<Arc<ClientShared>> {
    client
        .upgrade()
        .ok_or_else(|| Error::failed_precondition("the client that created this handle has been released"))
}

/// Connection to one accelerator backend
///
/// Cloning is cheap; all clones share the same runtime.
#[derive(Clone)]
pub struct Client {
    shared: Arc<ClientShared>,
}

impl Client {
    /// Wrap an existing runtime
    pub fn from_runtime(runtime: Arc<dyn Runtime>) -> Self {
        tracing::info!(
            platform = %runtime.platform(),
            devices = runtime.device_count(),
            "client_created"
        );
        Self {
            shared: Arc::new(ClientShared { runtime }),
        }
    }

    /// Client for the built-in host runtime
    #[tracing::instrument]
    pub fn get_host_client(config: CpuConfig) -> Result<Self> {
        let runtime = CpuRuntime::new(config)?;
        Ok(Self::from_runtime(Arc::new(runtime)))
    }

    /// Client for the registered GPU platform
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `memory_fraction` is outside `(0, 1]`;
    /// `Unavailable` when no GPU platform is registered.
    #[tracing::instrument]
    pub fn get_gpu_client(memory_fraction: f64, preallocate: bool, kind: AllocatorKind) -> Result<Self> {
        let config = GpuAllocatorConfig::new(memory_fraction, preallocate, kind)?;
        Ok(Self::from_runtime(get_gpu_runtime(config)?))
    }

    /// Client for the registered TPU platform
    #[tracing::instrument]
    pub fn get_tpu_client() -> Result<Self> {
        Ok(Self::from_runtime(get_tpu_runtime()?))
    }

    /// Client for whichever platform `config` selects
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        match config.platform {
            Platform::Host => Self::get_host_client(config.host.clone()),
            Platform::Gpu => Ok(Self::from_runtime(get_gpu_runtime(config.gpu)?)),
            Platform::Tpu => Self::get_tpu_client(),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.shared.runtime
    }

    pub fn platform(&self) -> Platform {
        self.shared.runtime.platform()
    }

    pub fn platform_version(&self) -> String {
        self.shared.runtime.platform_version()
    }

    pub fn device_count(&self) -> usize {
        self.shared.runtime.device_count()
    }

    /// Ids of the addressable devices
    pub fn devices(&self) -> Vec<DeviceId> {
        self.shared.runtime.devices().iter().map(|device| device.id()).collect()
    }

    pub fn default_device_assignment(&self, num_replicas: usize, num_partitions: usize) -> Result<DeviceAssignment> {
        Ok(self.shared.runtime.default_device_assignment(num_replicas, num_partitions)?)
    }

    /// Compile `computation` into an executable handle
    ///
    /// Layouts on `argument_layouts` are dropped so the runtime picks its own.
    /// Arguments are never passed as one tuple.
    #[tracing::instrument(skip(self, computation, argument_layouts), fields(
        computation = computation.name(),
        arguments = argument_layouts.len(),
        replicas = build_options.num_replicas
    ))]
    pub fn compile(
        &self,
        computation: &Computation,
        argument_layouts: &[Shape],
        build_options: ExecutableBuildOptions,
        compile_portable_executable: bool,
    ) -> Result<ExecutableHandle> {
        let start = Instant::now();
        let layouts = argument_layouts.iter().map(Shape::without_layout).collect();
        let options = CompileOptions {
            argument_layouts: Some(layouts),
            parameter_is_tupled_arguments: false,
            executable_build_options: build_options,
            compile_portable_executable,
        };

        let runtime = self.shared.runtime();
        let executable = runtime.compile(computation, &options)?;
        let fingerprint = runtime.executable_fingerprint(executable.as_ref())?;

        tracing::debug!(
            duration_us = start.elapsed().as_micros() as u64,
            fingerprint = fingerprint.as_deref().unwrap_or("-"),
            "executable_compiled"
        );
        Ok(ExecutableHandle::new(executable, fingerprint, Arc::downgrade(&self.shared)))
    }

    /// Create a device buffer on `device` from host bytes
    ///
    /// The payload is lent to the runtime without a copy where it allows;
    /// its release callback fires once the runtime no longer needs it.
    #[tracing::instrument(skip(self, payload), fields(bytes = payload.len(), shape = %shape))]
    pub fn buffer_from_binary(
        &self,
        payload: HostPayload,
        shape: &Shape,
        device: DeviceId,
        disposal: DisposalPolicy,
    ) -> Result<BufferHandle> {
        let target = self.shared.lookup_device(device)?;
        let buffer = transfer::from_host_bytes(self.shared.runtime(), payload, shape, target.as_ref(), TRANSFER_SEMANTICS)?;
        Ok(BufferHandle::new(buffer, disposal, Arc::downgrade(&self.shared)))
    }

    /// Send host values to `device`'s infeed as one value of `shape`
    pub fn transfer_to_infeed(&self, payloads: Vec<HostPayload>, shape: &Shape, device: DeviceId) -> Result<()> {
        let target = self.shared.lookup_device(device)?;
        transfer::transfer_to_infeed(payloads, shape, target.as_ref())
    }

    /// Block until `device` emits a value of `shape` and return its bytes
    pub fn transfer_from_outfeed(&self, device: DeviceId, shape: &Shape) -> Result<Vec<u8>> {
        let target = self.shared.lookup_device(device)?;
        transfer::transfer_from_outfeed(target.as_ref(), shape)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("platform", &self.platform())
            .field("devices", &self.device_count())
            .finish()
    }
}
