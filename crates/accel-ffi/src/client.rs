//! Client entry points

use accel_core::{Client, Result};
use accel_runtime::{AllocatorKind, CpuConfig};

use crate::decode::{self, arity};
use crate::handles::{get_client, register_client};
use crate::reply;
use crate::term::Term;

/// `get_host_client(DeviceCount, Asynchronous)`
pub fn get_host_client(args: &[Term]) -> Term {
    reply(try_get_host_client(args))
}

fn try_get_host_client(args: &[Term]) -> Result<Term> {
    let [device_count, asynchronous] = arity::<2>(args)?;
    let config = CpuConfig::default()
        .with_device_count(decode::count(device_count, "device count")?)
        .with_asynchronous(decode::boolean(asynchronous, "asynchronous")?);
    Ok(register_client(Client::get_host_client(config)?))
}

/// `get_gpu_client(MemoryFraction, Preallocate, Allocator)`
pub fn get_gpu_client(args: &[Term]) -> Term {
    reply(try_get_gpu_client(args))
}

fn try_get_gpu_client(args: &[Term]) -> Result<Term> {
    let [memory_fraction, preallocate, allocator] = arity::<3>(args)?;
    let kind: AllocatorKind = decode::text(allocator, "allocator")?.parse()?;
    let client = Client::get_gpu_client(
        decode::float(memory_fraction, "memory fraction")?,
        decode::boolean(preallocate, "preallocate")?,
        kind,
    )?;
    Ok(register_client(client))
}

/// `get_tpu_client()`
pub fn get_tpu_client(args: &[Term]) -> Term {
    reply(arity::<0>(args).and_then(|_| Ok(register_client(Client::get_tpu_client()?))))
}

/// `get_device_count(Client)`
pub fn get_device_count(args: &[Term]) -> Term {
    reply(arity::<1>(args).and_then(|[client]| {
        let count = get_client(client)?.device_count();
        Ok(Term::Int(count as i64))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_host_client_roundtrip() {
        let client = get_host_client(&[Term::Int(2), Term::atom("false")]);
        let client = client.ok_value().unwrap().clone();
        assert_eq!(get_device_count(&[client]), Term::ok(Term::Int(2)));
    }

    #[test]
    #[serial]
    fn test_host_client_bad_arguments() {
        let reply = get_host_client(&[Term::Int(1)]);
        assert_eq!(reply.error_message(), Some("expected 2 arguments, got 1"));

        let reply = get_host_client(&[Term::Int(1), Term::Int(1)]);
        assert!(reply.error_message().unwrap().contains("true or false"));
    }

    #[test]
    #[serial]
    fn test_gpu_client_unknown_allocator() {
        let reply = get_gpu_client(&[Term::Float(0.5), Term::atom("true"), Term::atom("slab")]);
        assert!(reply.error_message().unwrap().ends_with("unknown allocator kind 'slab'"));
    }
}
