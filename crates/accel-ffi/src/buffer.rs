//! Device memory entry points
//!
//! Buffers created here are host-managed: dropping the last reference waits
//! for pending device work before the memory goes away. Buffers produced by
//! runs and copies are runtime-managed.

use accel_core::{DisposalPolicy, Result};

use crate::decode::{self, arity};
use crate::handles::{get_buffer, get_client, get_shape, register_buffer};
use crate::term::Term;
use crate::{reply, reply_unit};

/// `binary_to_device_mem(Client, Binary, Shape, DeviceId)`
///
/// The binary is lent to the runtime without a copy and stays pinned until
/// the buffer is freed.
pub fn binary_to_device_mem(args: &[Term]) -> Term {
    reply(try_binary_to_device_mem(args))
}

fn try_binary_to_device_mem(args: &[Term]) -> Result<Term> {
    let [client, binary, shape, device] = arity::<4>(args)?;
    let client = get_client(client)?;
    let binary = decode::binary(binary, "data")?;
    let shape = get_shape(shape)?;
    let device = decode::device(device)?;

    let buffer = client.buffer_from_binary(binary.pin(), &shape, device, DisposalPolicy::HostManaged)?;
    Ok(register_buffer(buffer))
}

/// `read_device_mem(Buffer, MaxSize)`, a negative size reads everything
pub fn read_device_mem(args: &[Term]) -> Term {
    reply(arity::<2>(args).and_then(|[buffer, max_size]| {
        let bytes = get_buffer(buffer)?.to_binary(decode::int(max_size, "size")?)?;
        Ok(Term::binary(bytes))
    }))
}

/// `deallocate_device_mem(Buffer)`
pub fn deallocate_device_mem(args: &[Term]) -> Term {
    reply_unit(arity::<1>(args).and_then(|[buffer]| get_buffer(buffer)?.deallocate()))
}

/// `copy_buffer_to_device(Buffer, DeviceId)`
pub fn copy_buffer_to_device(args: &[Term]) -> Term {
    reply(arity::<2>(args).and_then(|[buffer, device]| {
        let copy = get_buffer(buffer)?.copy_to_device(decode::device(device)?)?;
        Ok(register_buffer(copy))
    }))
}
