//! Handle-based object management for the host bridge
//!
//! Native objects live in global registries keyed by opaque `u64` ids. The
//! host sees them as [`ResourceRef`](crate::term::ResourceRef) terms and
//! releases them through [`release`] when it collects the reference.
//!
//! ## Thread Safety
//!
//! All registries use `Arc<Mutex<HashMap>>`. Handle generation is atomic.
//! Objects are cloned out (as `Arc`s where they are not cheap to clone) so no
//! registry lock is held while a runtime call blocks.

use accel_core::{BufferHandle, Client, Error, ExecutableHandle, Result};
use accel_runtime::{Computation, Shape};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::term::{ResourceKind, ResourceRef, Term};

// Global handle counter for unique handle generation
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

type Registry<T> = Arc<Mutex<HashMap<u64, T>>>;

lazy_static::lazy_static! {
    /// Registry of all live clients
    pub(crate) static ref CLIENT_REGISTRY: Registry<Client> = Arc::new(Mutex::new(HashMap::new()));

    /// Registry of all live device buffers
    pub(crate) static ref BUFFER_REGISTRY: Registry<Arc<BufferHandle>> = Arc::new(Mutex::new(HashMap::new()));

    /// Registry of all compiled executables
    pub(crate) static ref EXECUTABLE_REGISTRY: Registry<Arc<ExecutableHandle>> = Arc::new(Mutex::new(HashMap::new()));

    /// Registry of shape descriptors
    pub(crate) static ref SHAPE_REGISTRY: Registry<Shape> = Arc::new(Mutex::new(HashMap::new()));

    /// Registry of computations awaiting compilation
    pub(crate) static ref COMPUTATION_REGISTRY: Registry<Arc<Computation>> = Arc::new(Mutex::new(HashMap::new()));
}

/// Generate a unique handle for object management
///
/// Handles start at 1 (0 is reserved for invalid/null handles).
pub(crate) fn generate_handle() -> u64 {
    HANDLE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Lock a registry, recovering the data if a panic poisoned the mutex
pub(crate) fn lock_registry<T>(mutex: &Arc<Mutex<T>>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Registry mutex was poisoned, recovering data");
            poisoned.into_inner()
        }
    }
}

fn insert<T>(registry: &Registry<T>, kind: ResourceKind, value: T) -> Term {
    let handle = generate_handle();
    lock_registry(registry).insert(handle, value);
    tracing::debug!(handle = handle, kind = %kind, "resource_registered");
    Term::resource(kind, handle)
}

fn lookup<T: Clone>(registry: &Registry<T>, kind: ResourceKind, term: &Term, what: &str) -> Result<T> {
    let handle = term
        .as_resource(kind)
        .ok_or_else(|| Error::invalid_argument(format!("Expected argument to be {what} reference.")))?;
    lock_registry(registry)
        .get(&handle)
        .cloned()
        .ok_or_else(|| Error::invalid_argument(format!("{kind} handle {handle} not found")))
}

pub(crate) fn register_client(client: Client) -> Term {
    insert(&CLIENT_REGISTRY, ResourceKind::Client, client)
}

pub(crate) fn register_buffer(buffer: BufferHandle) -> Term {
    insert(&BUFFER_REGISTRY, ResourceKind::Buffer, Arc::new(buffer))
}

pub(crate) fn register_executable(executable: ExecutableHandle) -> Term {
    insert(&EXECUTABLE_REGISTRY, ResourceKind::Executable, Arc::new(executable))
}

pub(crate) fn register_shape(shape: Shape) -> Term {
    insert(&SHAPE_REGISTRY, ResourceKind::Shape, shape)
}

pub(crate) fn register_computation(computation: Computation) -> Term {
    insert(&COMPUTATION_REGISTRY, ResourceKind::Computation, Arc::new(computation))
}

pub(crate) fn get_client(term: &Term) -> Result<Client> {
    lookup(&CLIENT_REGISTRY, ResourceKind::Client, term, "client")
}

pub(crate) fn get_buffer(term: &Term) -> Result<Arc<BufferHandle>> {
    lookup(&BUFFER_REGISTRY, ResourceKind::Buffer, term, "buffer")
}

pub(crate) fn get_executable(term: &Term) -> Result<Arc<ExecutableHandle>> {
    lookup(&EXECUTABLE_REGISTRY, ResourceKind::Executable, term, "executable")
}

pub(crate) fn get_shape(term: &Term) -> Result<Shape> {
    lookup(&SHAPE_REGISTRY, ResourceKind::Shape, term, "shape")
}

pub(crate) fn get_computation(term: &Term) -> Result<Arc<Computation>> {
    lookup(&COMPUTATION_REGISTRY, ResourceKind::Computation, term, "computation")
}

/// Drop the registry's reference to a resource
///
/// The object itself goes away once no in-flight call holds it. Dropping a
/// host-managed buffer waits for pending device work first.
pub fn release(resource: ResourceRef) -> bool {
    let removed = match resource.kind {
        ResourceKind::Client => lock_registry(&CLIENT_REGISTRY).remove(&resource.id).is_some(),
        ResourceKind::Buffer => {
            // Drop outside the lock, a host-managed buffer may block
            let buffer = lock_registry(&BUFFER_REGISTRY).remove(&resource.id);
            buffer.is_some()
        }
        ResourceKind::Executable => lock_registry(&EXECUTABLE_REGISTRY).remove(&resource.id).is_some(),
        ResourceKind::Shape => lock_registry(&SHAPE_REGISTRY).remove(&resource.id).is_some(),
        ResourceKind::Computation => lock_registry(&COMPUTATION_REGISTRY).remove(&resource.id).is_some(),
    };
    tracing::debug!(handle = resource.id, kind = %resource.kind, removed = removed, "resource_released");
    removed
}

/// Number of live entries per registry, for leak checks
pub fn registry_sizes() -> [(ResourceKind, usize); 5] {
    [
        (ResourceKind::Client, lock_registry(&CLIENT_REGISTRY).len()),
        (ResourceKind::Buffer, lock_registry(&BUFFER_REGISTRY).len()),
        (ResourceKind::Executable, lock_registry(&EXECUTABLE_REGISTRY).len()),
        (ResourceKind::Shape, lock_registry(&SHAPE_REGISTRY).len()),
        (ResourceKind::Computation, lock_registry(&COMPUTATION_REGISTRY).len()),
    ]
}

/// Clear all registries (for testing/debugging)
///
/// # Warning
///
/// This will invalidate all existing handles. Use only for testing.
pub fn clear_all_registries() {
    // Buffers first, while their clients are still alive
    let buffers: Vec<_> = lock_registry(&BUFFER_REGISTRY).drain().collect();
    drop(buffers);
    lock_registry(&EXECUTABLE_REGISTRY).clear();
    lock_registry(&COMPUTATION_REGISTRY).clear();
    lock_registry(&SHAPE_REGISTRY).clear();
    lock_registry(&CLIENT_REGISTRY).clear();
    tracing::info!("All registries cleared");
}
