//! Run arguments and results

use accel_runtime::{DeviceId, Shape};

use crate::buffer::BufferHandle;
use crate::transfer::HostPayload;

/// One argument of one replica
#[derive(Debug)]
pub enum RunArgument<'a> {
    /// Host bytes, materialized on the replica's device before the run
    Payload { payload: HostPayload, shape: Shape },
    /// An existing device buffer, used in place
    Buffer(&'a BufferHandle),
}

impl<'a> RunArgument<'a> {
    pub fn payload(payload: impl Into<HostPayload>, shape: Shape) -> Self {
        RunArgument::Payload {
            payload: payload.into(),
            shape,
        }
    }

    pub fn buffer(handle: &'a BufferHandle) -> Self {
        RunArgument::Buffer(handle)
    }
}

impl<'a> From<&'a BufferHandle> for RunArgument<'a> {
    fn from(handle: &'a BufferHandle) -> Self {
        RunArgument::Buffer(handle)
    }
}

/// Arguments for every replica, outer index = replica
pub type RunArguments<'a> = Vec<Vec<RunArgument<'a>>>;

/// Outputs of one executed replica
#[derive(Debug)]
pub struct ReplicaResult {
    /// Runtime-managed output buffers, one per result element
    pub buffers: Vec<BufferHandle>,
    /// Device the replica ran on
    pub device_id: DeviceId,
}
