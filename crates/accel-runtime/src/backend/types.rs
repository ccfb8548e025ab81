//! Types shared by every runtime implementation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Result, RuntimeError};
use crate::shape::Shape;

/// Identifier of a device within one runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub const fn new(id: u32) -> Self {
        DeviceId(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Class of accelerator a runtime drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Host,
    Gpu,
    Tpu,
}

impl Platform {
    pub const fn name(self) -> &'static str {
        match self {
            Platform::Host => "host",
            Platform::Gpu => "gpu",
            Platform::Tpu => "tpu",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" | "cpu" => Ok(Platform::Host),
            "gpu" | "cuda" | "rocm" => Ok(Platform::Gpu),
            "tpu" => Ok(Platform::Tpu),
            other => Err(RuntimeError::invalid_argument(format!("unknown platform '{other}'"))),
        }
    }
}

/// Mapping from (replica, partition) to a device, row-major by replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAssignment {
    replicas: usize,
    partitions: usize,
    ids: Vec<DeviceId>,
}

impl DeviceAssignment {
    pub fn new(replicas: usize, partitions: usize, ids: Vec<DeviceId>) -> Result<Self> {
        if replicas * partitions != ids.len() {
            return Err(RuntimeError::invalid_argument(format!(
                "device assignment of {replicas}x{partitions} needs {} ids, got {}",
                replicas * partitions,
                ids.len()
            )));
        }
        Ok(Self {
            replicas,
            partitions,
            ids,
        })
    }

    pub fn replica_count(&self) -> usize {
        self.replicas
    }

    pub fn partition_count(&self) -> usize {
        self.partitions
    }

    /// Device for the given replica and partition
    pub fn get(&self, replica: usize, partition: usize) -> Option<DeviceId> {
        if replica >= self.replicas || partition >= self.partitions {
            return None;
        }
        self.ids.get(replica * self.partitions + partition).copied()
    }
}

impl fmt::Display for DeviceAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for replica in 0..self.replicas {
            if replica > 0 {
                write!(f, ", ")?;
            }
            let row = &self.ids[replica * self.partitions..(replica + 1) * self.partitions];
            let row: Vec<String> = row.iter().map(|id| id.0.to_string()).collect();
            write!(f, "[{}]", row.join(","))?;
        }
        write!(f, "]")
    }
}

// ================================================================================================
// Host buffers
// ================================================================================================

/// How long the runtime may read host memory handed to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostBufferSemantics {
    /// Data is copied before the call returns
    ImmutableOnlyDuringCall,

    /// Data must stay untouched until the transfer completes, then is released
    ImmutableUntilTransferCompletes,

    /// The device buffer aliases host memory for its entire lifetime
    ImmutableZeroCopy,
}

/// Single-shot completion callback
///
/// The callback runs exactly once: on [`DoneToken::release`] or when the token
/// is dropped, whichever comes first.
#[derive(Default)]
pub struct DoneToken {
    callback: Option<Box<dyn FnOnce() + Send>>,
}

impl DoneToken {
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// Token with nothing to release
    pub fn none() -> Self {
        Self { callback: None }
    }

    pub fn is_armed(&self) -> bool {
        self.callback.is_some()
    }

    /// Run the callback now
    pub fn release(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }
}

impl Drop for DoneToken {
    fn drop(&mut self) {
        self.fire();
    }
}

impl fmt::Debug for DoneToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DoneToken").field("armed", &self.is_armed()).finish()
    }
}

/// Host memory handed to a runtime, plus its completion token
///
/// Dropping the host buffer fires the token, so a runtime releases the host
/// side simply by letting go of it.
#[derive(Debug)]
pub struct HostBuffer {
    data: Arc<[u8]>,
    done: DoneToken,
}

impl HostBuffer {
    pub fn new(data: Arc<[u8]>, done: DoneToken) -> Self {
        Self { data, done }
    }

    /// Host buffer owning a private copy of `bytes`
    pub fn copied(bytes: &[u8]) -> Self {
        Self::new(Arc::from(bytes), DoneToken::none())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fire the completion token early, keeping the bytes
    pub fn release(self) -> Arc<[u8]> {
        let HostBuffer { data, done } = self;
        done.release();
        data
    }
}

// ================================================================================================
// Compile and execute options
// ================================================================================================

/// Build-time placement options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableBuildOptions {
    pub num_replicas: usize,
    pub num_partitions: usize,
    pub device_ordinal: Option<DeviceId>,
}

impl Default for ExecutableBuildOptions {
    fn default() -> Self {
        Self {
            num_replicas: 1,
            num_partitions: 1,
            device_ordinal: None,
        }
    }
}

impl ExecutableBuildOptions {
    pub fn with_replicas(mut self, num_replicas: usize) -> Self {
        self.num_replicas = num_replicas;
        self
    }

    pub fn with_device_ordinal(mut self, device: DeviceId) -> Self {
        self.device_ordinal = Some(device);
        self
    }
}

/// Options for [`Runtime::compile`](super::Runtime::compile)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Expected argument shapes, possibly with layouts
    pub argument_layouts: Option<Vec<Shape>>,
    pub parameter_is_tupled_arguments: bool,
    pub executable_build_options: ExecutableBuildOptions,
    /// Compile without binding to the default device assignment
    pub compile_portable_executable: bool,
}

/// Options for [`LoadedExecutable::execute_portable`](super::LoadedExecutable::execute_portable)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Return tuple results as one buffer per element
    pub untuple_result: bool,
    /// Require argument layouts to match exactly
    pub strict_shape_checking: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            untuple_result: false,
            strict_shape_checking: true,
        }
    }
}
