//! Compilation and run entry points

use accel_core::{BufferHandle, Error, ExecutableHandle, ReplicaResult, Result, RunArgument, RunArguments};
use accel_runtime::{Computation, DeviceId, ExecutableBuildOptions, Shape};
use std::sync::Arc;

use crate::decode::{self, arity};
use crate::handles::{
    get_buffer, get_client, get_computation, get_executable, get_shape, register_buffer, register_computation,
    register_executable,
};
use crate::reply;
use crate::term::{HostBinary, ResourceKind, Term};

/// `register_computation(Binary)`, a serialized computation
pub fn register_computation_binary(args: &[Term]) -> Term {
    reply(arity::<1>(args).and_then(|[bytes]| {
        let computation = Computation::from_bytes(decode::binary(bytes, "computation")?.as_bytes())?;
        tracing::debug!(name = computation.name(), "computation_registered");
        Ok(register_computation(computation))
    }))
}

/// `compile(Client, Computation, [Shape], NumReplicas, NumPartitions, DeviceOrdinal, Portable)`
///
/// A negative device ordinal leaves placement to the runtime.
pub fn compile(args: &[Term]) -> Term {
    reply(try_compile(args))
}

fn try_compile(args: &[Term]) -> Result<Term> {
    let [client, computation, argument_shapes, num_replicas, num_partitions, device_ordinal, portable] =
        arity::<7>(args)?;
    let client = get_client(client)?;
    let computation = get_computation(computation)?;
    let argument_shapes = decode::list(argument_shapes, "argument shapes")?
        .iter()
        .map(get_shape)
        .collect::<Result<Vec<_>>>()?;
    let build_options = ExecutableBuildOptions {
        num_replicas: decode::count(num_replicas, "replica count")?,
        num_partitions: decode::count(num_partitions, "partition count")?,
        device_ordinal: decode::optional_device(device_ordinal)?,
    };
    let portable = decode::boolean(portable, "portable")?;

    let executable = client.compile(&computation, &argument_shapes, build_options, portable)?;
    Ok(register_executable(executable))
}

/// One decoded run argument, holding what it refers to
#[derive(Debug)]
enum Decoded {
    Payload(HostBinary, Shape),
    Buffer(Arc<BufferHandle>),
}

/// Decode `[[Argument]]` where each argument is a buffer resource or a
/// `{Binary, Shape}` tuple
///
/// Nothing is sent to a device until the whole term has decoded.
fn decode_arguments(term: &Term) -> Result<Vec<Vec<Decoded>>> {
    let not_a_list = || Error::invalid_argument("Argument is not a list.");
    term.as_list()
        .ok_or_else(not_a_list)?
        .iter()
        .map(|row| -> Result<Vec<Decoded>> {
            row.as_list().ok_or_else(not_a_list)?.iter().map(decode_argument).collect()
        })
        .collect()
}

fn decode_argument(term: &Term) -> Result<Decoded> {
    if let Some(items) = term.as_tuple() {
        let [data, shape] = items else {
            return Err(Error::invalid_argument("Expected argument to be shape reference."));
        };
        let shape = get_shape(shape)?;
        let binary = data
            .as_binary()
            .ok_or_else(|| Error::invalid_argument("Expected buffer to be binary."))?;
        return Ok(Decoded::Payload(binary.clone(), shape));
    }
    if term.as_resource(ResourceKind::Buffer).is_none() {
        return Err(Error::invalid_argument("Expected argument to be buffer reference."));
    }
    get_buffer(term).map(Decoded::Buffer)
}

fn borrow_arguments(rows: &[Vec<Decoded>]) -> RunArguments<'_> {
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|argument| match argument {
                    Decoded::Payload(binary, shape) => RunArgument::payload(binary.pin(), shape.clone()),
                    Decoded::Buffer(handle) => RunArgument::buffer(handle),
                })
                .collect()
        })
        .collect()
}

fn encode_results(results: Vec<ReplicaResult>) -> Term {
    let replicas = results
        .into_iter()
        .map(|result| {
            let buffers = result.buffers.into_iter().map(register_buffer).collect();
            let DeviceId(device) = result.device_id;
            Term::Tuple(vec![Term::List(buffers), Term::Int(i64::from(device))])
        })
        .collect();
    Term::List(replicas)
}

type RunMode = fn(&ExecutableHandle, RunArguments<'_>, Option<DeviceId>) -> Result<Vec<ReplicaResult>>;

fn try_run(args: &[Term], mode: RunMode) -> Result<Term> {
    let [executable, arguments, device] = arity::<3>(args)?;
    let executable = get_executable(executable)?;
    let rows = decode_arguments(arguments)?;
    let device = decode::optional_device(device)?;

    let results = mode(executable.as_ref(), borrow_arguments(&rows), device)?;
    Ok(encode_results(results))
}

/// `run(Executable, [[Argument]], DeviceId)`
///
/// Runs replica 0 only, on `DeviceId` when it is non-negative. Answers
/// `{ok, [{[Buffer], DeviceId}]}`.
pub fn run(args: &[Term]) -> Term {
    reply(try_run(args, ExecutableHandle::run))
}

/// `run_replicated(Executable, [[Argument]], DeviceId)`
///
/// Runs every replica on its assigned device. Answers one
/// `{[Buffer], DeviceId}` entry per replica.
pub fn run_replicated(args: &[Term]) -> Term {
    reply(try_run(args, ExecutableHandle::run_replicated))
}
