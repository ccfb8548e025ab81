//! Runtime traits and shared types

mod traits;
mod types;

pub use traits::{Device, DeviceBuffer, LoadedExecutable, Runtime};
pub use types::{
    CompileOptions, DeviceAssignment, DeviceId, DoneToken, ExecutableBuildOptions, ExecuteOptions, HostBuffer,
    HostBufferSemantics, Platform,
};
