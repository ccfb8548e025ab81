//! Argument decoding shared by the entry points

use accel_core::{Error, Result};
use accel_runtime::DeviceId;

use crate::term::{HostBinary, Term};

/// Split `args` into exactly `N` terms
pub(crate) fn arity<const N: usize>(args: &[Term]) -> Result<&[Term; N]> {
    args.try_into()
        .map_err(|_| Error::invalid_argument(format!("expected {N} arguments, got {}", args.len())))
}

pub(crate) fn int(term: &Term, what: &str) -> Result<i64> {
    term.as_int()
        .ok_or_else(|| Error::invalid_argument(format!("expected {what} to be an integer, got {term}")))
}

pub(crate) fn count(term: &Term, what: &str) -> Result<usize> {
    let value = int(term, what)?;
    usize::try_from(value).map_err(|_| Error::invalid_argument(format!("{what} must be non-negative, got {value}")))
}

pub(crate) fn float(term: &Term, what: &str) -> Result<f64> {
    term.as_float()
        .ok_or_else(|| Error::invalid_argument(format!("expected {what} to be a number, got {term}")))
}

pub(crate) fn boolean(term: &Term, what: &str) -> Result<bool> {
    term.as_bool()
        .ok_or_else(|| Error::invalid_argument(format!("expected {what} to be true or false, got {term}")))
}

pub(crate) fn text<'t>(term: &'t Term, what: &str) -> Result<&'t str> {
    term.as_text()
        .ok_or_else(|| Error::invalid_argument(format!("expected {what} to be an atom or string, got {term}")))
}

pub(crate) fn binary<'t>(term: &'t Term, what: &str) -> Result<&'t HostBinary> {
    term.as_binary()
        .ok_or_else(|| Error::invalid_argument(format!("expected {what} to be a binary, got {term}")))
}

pub(crate) fn list<'t>(term: &'t Term, what: &str) -> Result<&'t [Term]> {
    term.as_list()
        .ok_or_else(|| Error::invalid_argument(format!("expected {what} to be a list, got {term}")))
}

pub(crate) fn device(term: &Term) -> Result<DeviceId> {
    let ordinal = int(term, "device id")?;
    u32::try_from(ordinal)
        .map(DeviceId)
        .map_err(|_| Error::invalid_argument(format!("invalid device id {ordinal}")))
}

/// A device id where any negative value means "not pinned"
pub(crate) fn optional_device(term: &Term) -> Result<Option<DeviceId>> {
    if int(term, "device id")? < 0 {
        return Ok(None);
    }
    device(term).map(Some)
}
