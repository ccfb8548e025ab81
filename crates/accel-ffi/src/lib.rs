//! # Accel FFI
//!
//! Host-environment bridge for the accel core.
//!
//! Every entry point takes a slice of dynamic [`Term`]s and answers with a
//! term: `{ok, Value}` (or the bare `ok` atom) on success and
//! `{error, Message}` on failure. Nothing panics across the boundary.
//!
//! ## Architecture
//!
//! Native objects are kept in registries keyed by opaque `u64` ids and handed
//! to the host as resource terms:
//!
//! - **Client** - one accelerator backend
//! - **Buffer** - one device-resident buffer
//! - **Executable** - one compiled program
//! - **Shape** / **Computation** - inputs to compilation and transfers
//!
//! The host calls [`release_resource`] when it collects a reference. Buffers
//! created from host binaries are host-managed: the binary stays pinned while
//! the runtime aliases it, and releasing the buffer waits for pending work.
//!
//! ```
//! use accel_ffi::{call, Term};
//!
//! let client = call("get_host_client", &[Term::Int(1), Term::atom("true")]);
//! assert!(client.ok_value().is_some());
//! ```

mod buffer;
mod client;
mod decode;
mod executable;
mod feed;
mod handles;
mod shape;
pub mod term;

use accel_core::Result;

pub use buffer::{binary_to_device_mem, copy_buffer_to_device, deallocate_device_mem, read_device_mem};
pub use client::{get_device_count, get_gpu_client, get_host_client, get_tpu_client};
pub use executable::{compile, register_computation_binary, run, run_replicated};
pub use feed::{transfer_from_outfeed, transfer_to_infeed};
pub use handles::{clear_all_registries, registry_sizes};
pub use shape::{make_shape, make_tuple_shape, shape_byte_size};
pub use term::{HostBinary, ResourceKind, ResourceRef, Term};

/// Signature shared by every entry point
pub type EntryPoint = fn(&[Term]) -> Term;

/// Entry points by host-visible name
pub const ENTRY_POINTS: &[(&str, EntryPoint)] = &[
    ("get_host_client", get_host_client),
    ("get_gpu_client", get_gpu_client),
    ("get_tpu_client", get_tpu_client),
    ("get_device_count", get_device_count),
    ("make_shape", make_shape),
    ("make_tuple_shape", make_tuple_shape),
    ("shape_byte_size", shape_byte_size),
    ("register_computation", register_computation_binary),
    ("compile", compile),
    ("binary_to_device_mem", binary_to_device_mem),
    ("read_device_mem", read_device_mem),
    ("deallocate_device_mem", deallocate_device_mem),
    ("copy_buffer_to_device", copy_buffer_to_device),
    ("run", run),
    ("run_replicated", run_replicated),
    ("transfer_to_infeed", transfer_to_infeed),
    ("transfer_from_outfeed", transfer_from_outfeed),
    ("release_resource", release_resource),
    ("clear_all_registries", clear_registries),
    ("get_version", version),
];

/// Invoke an entry point by name
pub fn call(name: &str, args: &[Term]) -> Term {
    match ENTRY_POINTS.iter().find(|(entry, _)| *entry == name) {
        Some((_, entry_point)) => {
            tracing::trace!(entry_point = name, arguments = args.len(), "call");
            entry_point(args)
        }
        None => Term::error(format!("unknown entry point '{name}'")),
    }
}

/// `{ok, Value}` or `{error, Message}`
pub(crate) fn reply(result: Result<Term>) -> Term {
    match result {
        Ok(value) => Term::ok(value),
        Err(err) => {
            tracing::debug!(code = %err.code(), error = %err, "entry_point_failed");
            Term::error(err)
        }
    }
}

/// `ok` or `{error, Message}`
pub(crate) fn reply_unit(result: Result<()>) -> Term {
    match result {
        Ok(()) => Term::ok_atom(),
        Err(err) => reply(Err(err)),
    }
}

/// `release_resource(Resource)`
///
/// Answers `true` when the registry still held the resource.
pub fn release_resource(args: &[Term]) -> Term {
    reply(decode::arity::<1>(args).and_then(|[resource]| match resource {
        Term::Resource(resource) => Ok(Term::atom(if handles::release(*resource) { "true" } else { "false" })),
        other => Err(accel_core::Error::invalid_argument(format!(
            "expected a resource reference, got {other}"
        ))),
    }))
}

fn clear_registries(args: &[Term]) -> Term {
    reply_unit(decode::arity::<0>(args).map(|_| clear_all_registries()))
}

fn version(args: &[Term]) -> Term {
    reply(decode::arity::<0>(args).map(|_| Term::binary(get_version().into_bytes())))
}

/// Get the version of the accel-ffi library
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Install the tracing subscriber configured by `ACCEL_TRACING_*` variables
///
/// Hosts call this once at load time; later calls fail with the
/// subscriber error and leave the first subscriber in place.
pub fn init_tracing() -> std::result::Result<(), accel_tracing::TracingSetupError> {
    accel_tracing::init_global_tracing(&accel_tracing::TracingConfig::from_env())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_entry_point_names_unique() {
        let mut names: Vec<_> = ENTRY_POINTS.iter().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ENTRY_POINTS.len());
    }

    #[test]
    fn test_unknown_entry_point() {
        let reply = call("launch_rockets", &[]);
        assert_eq!(reply.error_message(), Some("unknown entry point 'launch_rockets'"));
    }

    #[test]
    #[serial]
    fn test_release_resource() {
        clear_all_registries();
        let client = call("get_host_client", &[Term::Int(1), Term::atom("true")]);
        let client = client.ok_value().unwrap().clone();

        assert_eq!(call("release_resource", &[client.clone()]), Term::ok(Term::atom("true")));
        assert_eq!(call("release_resource", &[client]), Term::ok(Term::atom("false")));
        assert!(call("release_resource", &[Term::Int(3)]).error_message().is_some());
    }

    #[test]
    fn test_version_entry_point() {
        let reply = call("get_version", &[]);
        assert_eq!(reply.ok_value().and_then(Term::as_text), Some(env!("CARGO_PKG_VERSION")));
    }
}
