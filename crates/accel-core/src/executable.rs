//! Executable handles
//!
//! An [`ExecutableHandle`] owns one compiled program. Running it takes the
//! arguments of every replica, materializes host payloads on the devices the
//! replicas are assigned to, executes, and wraps the outputs as
//! runtime-managed buffer handles.
//!
//! Two modes are offered:
//!
//! - [`ExecutableHandle::run`] executes replica 0 only, on the pinned device
//!   if one is given and otherwise on replica 0's assigned device.
//! - [`ExecutableHandle::run_replicated`] executes every replica on its
//!   assigned device.
//!
//! Both check that there is one argument list per replica before anything is
//! moved to a device.

use accel_runtime::{DeviceAssignment, DeviceBuffer, DeviceId, ExecuteOptions, LoadedExecutable};
use accel_tracing::performance::record_execution;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::args::{ReplicaResult, RunArgument, RunArguments};
use crate::buffer::{BufferHandle, DisposalPolicy};
use crate::client::{upgrade, ClientShared};
use crate::error::{Error, Result};
use crate::transfer::{self, TRANSFER_SEMANTICS};

/// Options every run uses: one buffer per result element, layouts ignored
const RUN_OPTIONS: ExecuteOptions = ExecuteOptions {
    untuple_result: true,
    strict_shape_checking: false,
};

/// An argument ready to hand to the runtime
enum Operand<'a> {
    /// Created from a host payload for this run only
    Materialized(Box<dyn DeviceBuffer>),
    Borrowed(&'a BufferHandle),
}

impl Operand<'_> {
    fn device_buffer(&self) -> &dyn DeviceBuffer {
        match self {
            Operand::Materialized(buffer) => buffer.as_ref(),
            Operand::Borrowed(handle) => handle.device_buffer(),
        }
    }
}

/// Owner of one compiled, loaded program
pub struct ExecutableHandle {
    executable: Box<dyn LoadedExecutable>,
    fingerprint: Option<String>,
    client: Weak<ClientShared>,
}

impl ExecutableHandle {
    pub(crate) fn new(
        executable: Box<dyn LoadedExecutable>,
        fingerprint: Option<String>,
        client: Weak<ClientShared>,
    ) -> Self {
        Self {
            executable,
            fingerprint,
            client,
        }
    }

    pub fn name(&self) -> &str {
        self.executable.name()
    }

    pub fn num_replicas(&self) -> usize {
        self.executable.num_replicas()
    }

    pub fn num_partitions(&self) -> usize {
        self.executable.num_partitions()
    }

    /// Opaque identity of the compiled program, if the runtime gives one
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Run replica 0
    ///
    /// `arguments` must hold one list per replica; only the first is used.
    /// With `device` set the program runs there, otherwise on replica 0's
    /// default device. Returns a single [`ReplicaResult`].
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the number of argument lists differs from the
    /// replica count. Runtime failures are passed through.
    #[tracing::instrument(skip(self, arguments), fields(name = self.name(), replicas = arguments.len()))]
    pub fn run(&self, arguments: RunArguments<'_>, device: Option<DeviceId>) -> Result<Vec<ReplicaResult>> {
        let start = Instant::now();
        let client = upgrade(&self.client)?;
        self.check_replica_count(&arguments)?;
        let assignment = client.runtime().default_device_assignment(self.num_replicas(), 1)?;
        let target = match device {
            Some(id) => id,
            None => assigned_device(&assignment, 0)?,
        };

        let row = arguments
            .into_iter()
            .next()
            .ok_or_else(|| Error::invalid_argument("no arguments for replica 0"))?;
        let operands = materialize(&client, row, target)?;
        let result = self.execute(&client, &operands, target)?;

        record_execution(
            self.name(),
            1,
            result.buffers.len(),
            start.elapsed().as_micros() as u64,
        );
        Ok(vec![result])
    }

    /// Run every replica on its assigned device
    ///
    /// A pinned `device` is only accepted for single-replica programs.
    #[tracing::instrument(skip(self, arguments), fields(name = self.name(), replicas = arguments.len()))]
    pub fn run_replicated(&self, arguments: RunArguments<'_>, device: Option<DeviceId>) -> Result<Vec<ReplicaResult>> {
        let start = Instant::now();
        let client = upgrade(&self.client)?;
        let replicas = self.num_replicas();
        if device.is_some() && replicas > 1 {
            return Err(Error::invalid_argument(format!(
                "cannot pin a device for a program with {replicas} replicas"
            )));
        }
        self.check_replica_count(&arguments)?;
        let assignment = client.runtime().default_device_assignment(replicas, 1)?;

        // Materialize everything before launching anything
        let mut rows = Vec::with_capacity(replicas);
        for (replica, row) in arguments.into_iter().enumerate() {
            let target = match device {
                Some(id) => id,
                None => assigned_device(&assignment, replica)?,
            };
            rows.push((target, materialize(&client, row, target)?));
        }

        let results = rows
            .iter()
            .map(|(target, operands)| self.execute(&client, operands, *target))
            .collect::<Result<Vec<_>>>()?;

        let outputs = results.iter().map(|result| result.buffers.len()).sum();
        record_execution(self.name(), replicas, outputs, start.elapsed().as_micros() as u64);
        Ok(results)
    }

    fn check_replica_count(&self, arguments: &RunArguments<'_>) -> Result<()> {
        if arguments.len() != self.num_replicas() {
            return Err(Error::invalid_argument(format!(
                "{} has {} replicas but arguments were given for {}",
                self.name(),
                self.num_replicas(),
                arguments.len()
            )));
        }
        Ok(())
    }

    fn execute(&self, client: &ClientShared, operands: &[Operand<'_>], target: DeviceId) -> Result<ReplicaResult> {
        let device = client.lookup_device(target)?;
        let arguments: Vec<&dyn DeviceBuffer> = operands.iter().map(Operand::device_buffer).collect();
        let outputs = self
            .executable
            .execute_portable(&arguments, device.as_ref(), &RUN_OPTIONS)?;

        tracing::debug!(device = %target, outputs = outputs.len(), "replica_launched");
        Ok(ReplicaResult {
            buffers: outputs
                .into_iter()
                .map(|buffer| BufferHandle::new(buffer, DisposalPolicy::RuntimeManaged, self.client.clone()))
                .collect(),
            device_id: target,
        })
    }
}

impl fmt::Debug for ExecutableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableHandle")
            .field("name", &self.name())
            .field("replicas", &self.num_replicas())
            .field("partitions", &self.num_partitions())
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

fn assigned_device(assignment: &DeviceAssignment, replica: usize) -> Result<DeviceId> {
    assignment
        .get(replica, 0)
        .ok_or_else(|| Error::invalid_argument(format!("device assignment {assignment} has no replica {replica}")))
}

/// Turn one replica's arguments into runtime buffers on `target`
///
/// Buffers made from payloads live only as long as the returned operands.
fn materialize<'a>(client: &Arc<ClientShared>, row: Vec<RunArgument<'a>>, target: DeviceId) -> Result<Vec<Operand<'a>>> {
    let device = client.lookup_device(target)?;
    row.into_iter()
        .map(|argument| match argument {
            RunArgument::Payload { payload, shape } => {
                transfer::from_host_bytes(client.runtime(), payload, &shape, device.as_ref(), TRANSFER_SEMANTICS)
                    .map(Operand::Materialized)
            }
            RunArgument::Buffer(handle) => Ok(Operand::Borrowed(handle)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::transfer::HostPayload;
    use accel_runtime::{ComputationBuilder, CpuConfig, ElementType, ExecutableBuildOptions, Shape};

    fn scalar_add(client: &Client, replicas: usize) -> ExecutableHandle {
        let shape = Shape::scalar(ElementType::F32);
        let mut builder = ComputationBuilder::new("scalar_add");
        let x = builder.parameter(0, shape.clone()).unwrap();
        let y = builder.parameter(1, shape.clone()).unwrap();
        let sum = builder.add(x, y).unwrap();
        client
            .compile(
                &builder.build(sum).unwrap(),
                &[shape.clone(), shape],
                ExecutableBuildOptions::default().with_replicas(replicas),
                false,
            )
            .unwrap()
    }

    fn f32_arg(value: f32) -> RunArgument<'static> {
        RunArgument::payload(HostPayload::from_slice(&[value]), Shape::scalar(ElementType::F32))
    }

    #[test]
    fn test_run_scalar_add() {
        let client = Client::get_host_client(CpuConfig::default()).unwrap();
        let executable = scalar_add(&client, 1);

        let results = executable.run(vec![vec![f32_arg(2.0), f32_arg(3.0)]], None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].device_id, DeviceId(0));
        assert_eq!(results[0].buffers.len(), 1);
        assert_eq!(results[0].buffers[0].to_binary(-1).unwrap(), 5.0f32.to_ne_bytes().to_vec());
        assert_eq!(results[0].buffers[0].disposal(), DisposalPolicy::RuntimeManaged);
    }

    #[test]
    fn test_run_rejects_wrong_replica_count() {
        let client = Client::get_host_client(CpuConfig::default()).unwrap();
        let executable = scalar_add(&client, 1);

        let err = executable.run(vec![], None).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = executable
            .run(vec![vec![f32_arg(1.0), f32_arg(1.0)], vec![f32_arg(1.0), f32_arg(1.0)]], None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_run_on_pinned_device() {
        let client = Client::get_host_client(CpuConfig::default().with_device_count(2)).unwrap();
        let executable = scalar_add(&client, 1);

        let results = executable
            .run(vec![vec![f32_arg(1.5), f32_arg(1.5)]], Some(DeviceId(1)))
            .unwrap();
        assert_eq!(results[0].device_id, DeviceId(1));
        assert_eq!(results[0].buffers[0].device_id(), DeviceId(1));
    }

    #[test]
    fn test_run_replicated() {
        let client = Client::get_host_client(CpuConfig::default().with_device_count(2)).unwrap();
        let executable = scalar_add(&client, 2);
        assert_eq!(executable.num_replicas(), 2);

        let results = executable
            .run_replicated(
                vec![vec![f32_arg(1.0), f32_arg(2.0)], vec![f32_arg(10.0), f32_arg(20.0)]],
                None,
            )
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].device_id, DeviceId(1));
        assert_eq!(results[1].buffers[0].to_binary(-1).unwrap(), 30.0f32.to_ne_bytes().to_vec());

        let err = executable
            .run_replicated(vec![vec![], vec![]], Some(DeviceId(0)))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_single_mode_runs_first_replica_only() {
        let client = Client::get_host_client(CpuConfig::default().with_device_count(2)).unwrap();
        let executable = scalar_add(&client, 2);

        // Replica 1's arguments are never materialized, so a bad payload there is not seen
        let bad = RunArgument::payload(HostPayload::new(vec![0u8; 3]), Shape::scalar(ElementType::F32));
        let results = executable
            .run(vec![vec![f32_arg(1.0), f32_arg(2.0)], vec![bad]], None)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].device_id, DeviceId(0));
    }
}
