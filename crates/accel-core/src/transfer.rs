//! Device transfer codec
//!
//! Moves bytes between host memory and the runtime: read-back of device
//! buffers with optional truncation, host-to-device transfer that lends the
//! host bytes to the runtime, and the infeed/outfeed conversions.
//!
//! Host bytes travel as a [`HostPayload`]. A payload may carry a release
//! callback that unpins the host side; the codec hands it to the runtime as
//! the transfer's completion token, so it fires exactly once whether the
//! transfer succeeds, fails, or never starts.

use accel_runtime::{
    BorrowingLiteral, Device, DeviceBuffer, DoneToken, HostBuffer, HostBufferSemantics, Literal, Runtime, Shape,
};
use accel_tracing::performance::{record_transfer, TransferDirection};
use accel_tracing::perf_span;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};

/// Semantics used for every host-to-device transfer made by the bridge
pub const TRANSFER_SEMANTICS: HostBufferSemantics = HostBufferSemantics::ImmutableZeroCopy;

const INFEED_EXPECTS_BINARIES: &str = "infeed operation expects a list of binaries";

/// Host bytes lent to the runtime, plus the callback that unpins them
pub struct HostPayload {
    data: Arc<[u8]>,
    release: DoneToken,
}

impl HostPayload {
    /// Payload with nothing to release
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            release: DoneToken::none(),
        }
    }

    /// Payload whose `release` runs once the runtime is done with the bytes
    pub fn with_release(data: Arc<[u8]>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            data,
            release: DoneToken::new(release),
        }
    }

    /// Payload holding a copy of `values` in native byte order
    pub fn from_slice<T: bytemuck::Pod>(values: &[T]) -> Self {
        Self::new(bytemuck::cast_slice::<T, u8>(values))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn into_host_buffer(self) -> HostBuffer {
        HostBuffer::new(self.data, self.release)
    }
}

impl fmt::Debug for HostPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostPayload")
            .field("len", &self.data.len())
            .field("release", &self.release)
            .finish()
    }
}

impl From<Vec<u8>> for HostPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for HostPayload {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

impl From<Arc<[u8]>> for HostPayload {
    fn from(bytes: Arc<[u8]>) -> Self {
        Self::new(bytes)
    }
}

/// Number of bytes [`to_binary`] returns for a buffer of `actual` bytes
///
/// A negative `max_size`, or one larger than the buffer, means everything.
pub fn truncated_len(actual: usize, max_size: i64) -> usize {
    match usize::try_from(max_size) {
        Ok(limit) if limit <= actual => limit,
        _ => actual,
    }
}

/// Synchronously read a device buffer into host bytes
///
/// Returns at most `max_size` bytes; see [`truncated_len`].
#[tracing::instrument(skip(buffer), fields(device = %buffer.device_id(), shape = %buffer.on_device_shape()))]
pub fn to_binary(buffer: &dyn DeviceBuffer, max_size: i64) -> Result<Vec<u8>> {
    let start = Instant::now();
    let literal = buffer.to_literal_sync()?;
    let data = literal.untyped_data()?;
    let len = truncated_len(data.len(), max_size);
    let bytes = data[..len].to_vec();

    record_transfer(len, TransferDirection::DeviceToHost, start.elapsed().as_micros() as u64);
    Ok(bytes)
}

/// Create a device buffer on `device` from host bytes
///
/// `shape` must be an array whose byte size equals the payload length. The
/// payload's release callback is handed to the runtime with the bytes.
#[tracing::instrument(skip(runtime, payload, device), fields(bytes = payload.len(), device = %device.id()))]
pub fn from_host_bytes(
    runtime: &dyn Runtime,
    payload: HostPayload,
    shape: &Shape,
    device: &dyn Device,
    semantics: HostBufferSemantics,
) -> Result<Box<dyn DeviceBuffer>> {
    let start = Instant::now();
    if !shape.is_array() {
        return Err(Error::invalid_argument(format!(
            "device buffers need an array shape, got {shape}"
        )));
    }
    let bytes = payload.len();
    let expected = shape.byte_size()?;
    if bytes != expected {
        return Err(Error::invalid_argument(format!(
            "expected {expected} bytes for {shape}, got {bytes}"
        )));
    }

    let buffer = runtime.buffer_from_host_buffer(payload.into_host_buffer(), shape, semantics, device)?;
    record_transfer(bytes, TransferDirection::HostToDevice, start.elapsed().as_micros() as u64);
    Ok(buffer)
}

/// View a sequence of payloads as one literal of `shape` for infeed
///
/// A flat tuple takes one payload per element. Any other shape takes the
/// first payload and ignores the rest. Nested tuples are rejected.
pub fn infeed_literal<'a>(payloads: &'a [HostPayload], shape: &'a Shape) -> Result<BorrowingLiteral<'a>> {
    if shape.is_tuple() {
        if shape.is_nested_tuple() {
            return Err(Error::invalid_argument("nested tuples are not supported in infeed operation"));
        }
        let expected = shape.tuple_element_count();
        if payloads.len() != expected {
            return Err(Error::invalid_argument(format!(
                "{INFEED_EXPECTS_BINARIES}: {shape} needs {expected}, got {}",
                payloads.len()
            )));
        }
        let pieces = payloads.iter().map(HostPayload::bytes).collect();
        return Ok(BorrowingLiteral::from_pieces(pieces, shape)?);
    }

    let first = payloads
        .first()
        .ok_or_else(|| Error::invalid_argument(INFEED_EXPECTS_BINARIES))?;
    Ok(BorrowingLiteral::new(first.bytes(), shape)?)
}

/// Push payloads onto `device`'s infeed as one value of `shape`
///
/// The payloads are released once the device has taken its copy.
#[tracing::instrument(skip(payloads, device), fields(device = %device.id(), shape = %shape, entries = payloads.len()))]
pub fn transfer_to_infeed(payloads: Vec<HostPayload>, shape: &Shape, device: &dyn Device) -> Result<()> {
    let _span = perf_span!("transfer_to_infeed", entries = payloads.len());
    let start = Instant::now();
    let literal = infeed_literal(&payloads, shape)?;
    device.transfer_to_infeed(&literal)?;

    record_transfer(shape.byte_size()?, TransferDirection::Infeed, start.elapsed().as_micros() as u64);
    Ok(())
}

/// Block until `device` produces a value of `shape` on its outfeed
///
/// Tuple values come back as their elements' bytes, concatenated.
#[tracing::instrument(skip(device), fields(device = %device.id(), shape = %shape))]
pub fn transfer_from_outfeed(device: &dyn Device, shape: &Shape) -> Result<Vec<u8>> {
    let start = Instant::now();
    let mut literal = Literal::new(shape.clone())?;
    device.transfer_from_outfeed(&mut literal)?;
    let bytes = literal.to_bytes();

    record_transfer(bytes.len(), TransferDirection::Outfeed, start.elapsed().as_micros() as u64);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use accel_runtime::{CpuConfig, CpuRuntime, DeviceId, ElementType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted(bytes: &[u8], count: &Arc<AtomicUsize>) -> HostPayload {
        let counter = count.clone();
        HostPayload::with_release(Arc::from(bytes), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_truncated_len() {
        assert_eq!(truncated_len(16, -1), 16);
        assert_eq!(truncated_len(16, 0), 0);
        assert_eq!(truncated_len(16, 5), 5);
        assert_eq!(truncated_len(16, 16), 16);
        assert_eq!(truncated_len(16, 17), 16);
        assert_eq!(truncated_len(16, i64::MIN), 16);
    }

    #[test]
    fn test_release_fires_once_on_size_mismatch() {
        let runtime = CpuRuntime::new(CpuConfig::default()).unwrap();
        let device = runtime.lookup_device(DeviceId(0)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        let err = from_host_bytes(
            &runtime,
            counted(&[0; 3], &count),
            &Shape::scalar(ElementType::F32),
            device.as_ref(),
            TRANSFER_SEMANTICS,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_copy_release_waits_for_buffer() {
        let runtime = CpuRuntime::new(CpuConfig::default()).unwrap();
        let device = runtime.lookup_device(DeviceId(0)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        let buffer = from_host_bytes(
            &runtime,
            counted(&2.0f32.to_ne_bytes(), &count),
            &Shape::scalar(ElementType::F32),
            device.as_ref(),
            TRANSFER_SEMANTICS,
        )
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(to_binary(buffer.as_ref(), -1).unwrap(), 2.0f32.to_ne_bytes().to_vec());

        drop(buffer);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unaddressable_shape_rejected() {
        let runtime = CpuRuntime::new(CpuConfig::default()).unwrap();
        let device = runtime.lookup_device(DeviceId(0)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let huge = Shape::array(ElementType::U8, vec![1 << 33, 1 << 33]);

        let err = from_host_bytes(&runtime, counted(&[0; 8], &count), &huge, device.as_ref(), TRANSFER_SEMANTICS)
            .unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::InvalidArgument);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let err = transfer_from_outfeed(device.as_ref(), &huge).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_tuple_shape_rejected_for_buffers() {
        let runtime = CpuRuntime::new(CpuConfig::default()).unwrap();
        let device = runtime.lookup_device(DeviceId(0)).unwrap();
        let shape = Shape::tuple(vec![Shape::scalar(ElementType::U8)]);
        assert!(matches!(
            from_host_bytes(&runtime, HostPayload::new(vec![1u8]), &shape, device.as_ref(), TRANSFER_SEMANTICS),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_infeed_literal_decomposition() {
        let element = Shape::array(ElementType::U8, vec![2]);
        let flat = Shape::tuple(vec![element.clone(), element.clone()]);
        let payloads = vec![HostPayload::new(vec![1u8, 2]), HostPayload::new(vec![3u8, 4])];

        let literal = infeed_literal(&payloads, &flat).unwrap();
        assert_eq!(literal.pieces().len(), 2);
        assert_eq!(literal.pieces()[1], &[3u8, 4][..]);

        // Non-tuple shapes only use the first entry
        let literal = infeed_literal(&payloads, &element).unwrap();
        assert_eq!(literal.pieces().to_vec(), vec![&[1u8, 2][..]]);

        assert!(matches!(infeed_literal(&payloads[..1], &flat), Err(Error::InvalidArgument(_))));
        assert!(matches!(infeed_literal(&[], &element), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_infeed_rejects_nested_tuples() {
        let nested = Shape::tuple(vec![Shape::tuple(vec![Shape::scalar(ElementType::S8)])]);
        let payloads = vec![HostPayload::new(vec![1u8])];
        let err = infeed_literal(&payloads, &nested).unwrap_err();
        assert_eq!(err, Error::invalid_argument("nested tuples are not supported in infeed operation"));
    }

    #[test]
    fn test_infeed_enqueues_on_device() {
        let runtime = CpuRuntime::new(CpuConfig::default()).unwrap();
        let device = runtime.lookup_device(DeviceId(0)).unwrap();
        let shape = Shape::array(ElementType::S16, vec![3]);
        let bytes: Vec<u8> = bytemuck::cast_slice(&[1i16, -2, 3]).to_vec();

        transfer_to_infeed(vec![HostPayload::new(bytes.clone())], &shape, device.as_ref()).unwrap();

        let cpu = runtime.cpu_device(DeviceId(0)).unwrap();
        assert_eq!(cpu.pending_infeed(), 1);

        let err = transfer_to_infeed(vec![HostPayload::new(vec![0u8; 4])], &shape, device.as_ref()).unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
        assert_eq!(cpu.pending_infeed(), 1);
    }
}
