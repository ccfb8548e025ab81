//! Dynamic host terms
//!
//! Values crossing the host boundary are untyped [`Term`]s. Entry points
//! decode their arguments from terms and answer with `{ok, Value}` or
//! `{error, Message}` tuples.

use accel_core::HostPayload;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Kind of native object a [`ResourceRef`] points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Client,
    Buffer,
    Executable,
    Shape,
    Computation,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Client => "client",
            ResourceKind::Buffer => "buffer",
            ResourceKind::Executable => "executable",
            ResourceKind::Shape => "shape",
            ResourceKind::Computation => "computation",
        };
        f.write_str(name)
    }
}

/// Opaque reference to a registered native object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: u64,
}

struct BinaryInner {
    data: Arc<[u8]>,
    pins: AtomicUsize,
}

/// Immutable host binary
///
/// Cloning shares the bytes. While the runtime borrows the bytes the binary
/// counts as pinned; [`HostBinary::pin_count`] reports the outstanding
/// borrows.
#[derive(Clone)]
pub struct HostBinary {
    inner: Arc<BinaryInner>,
}

impl HostBinary {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            inner: Arc::new(BinaryInner {
                data: data.into(),
                pins: AtomicUsize::new(0),
            }),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.inner.data
    }

    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// Outstanding runtime borrows
    pub fn pin_count(&self) -> usize {
        self.inner.pins.load(Ordering::Acquire)
    }

    /// Lend the bytes to the runtime; the pin is dropped when it lets go
    pub(crate) fn pin(&self) -> HostPayload {
        self.inner.pins.fetch_add(1, Ordering::AcqRel);
        let inner = self.inner.clone();
        HostPayload::with_release(self.inner.data.clone(), move || {
            inner.pins.fetch_sub(1, Ordering::AcqRel);
        })
    }
}

impl PartialEq for HostBinary {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Debug for HostBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBinary")
            .field("len", &self.len())
            .field("pins", &self.pin_count())
            .finish()
    }
}

impl From<Vec<u8>> for HostBinary {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for HostBinary {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

/// A host value
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Atom(String),
    Int(i64),
    Float(f64),
    Binary(HostBinary),
    List(Vec<Term>),
    Tuple(Vec<Term>),
    Resource(ResourceRef),
}

impl Term {
    pub fn atom(name: &str) -> Term {
        Term::Atom(name.to_string())
    }

    pub fn binary(bytes: impl Into<HostBinary>) -> Term {
        Term::Binary(bytes.into())
    }

    pub fn resource(kind: ResourceKind, id: u64) -> Term {
        Term::Resource(ResourceRef { kind, id })
    }

    /// The bare `ok` atom
    pub fn ok_atom() -> Term {
        Term::atom("ok")
    }

    /// `{ok, value}`
    pub fn ok(value: Term) -> Term {
        Term::Tuple(vec![Term::ok_atom(), value])
    }

    /// `{error, message}`, the message as a UTF-8 binary
    pub fn error(message: impl fmt::Display) -> Term {
        Term::Tuple(vec![Term::atom("error"), Term::binary(message.to_string().into_bytes())])
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Term::Atom(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Term::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Floats, and integers widened to floats
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Term::Float(value) => Some(*value),
            Term::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// The atoms `true` and `false`
    pub fn as_bool(&self) -> Option<bool> {
        match self.as_atom()? {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&HostBinary> {
        match self {
            Term::Binary(binary) => Some(binary),
            _ => None,
        }
    }

    /// Atoms and UTF-8 binaries
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Term::Atom(name) => Some(name),
            Term::Binary(binary) => std::str::from_utf8(binary.as_bytes()).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Term]> {
        match self {
            Term::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Term]> {
        match self {
            Term::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_resource(&self, kind: ResourceKind) -> Option<u64> {
        match self {
            Term::Resource(resource) if resource.kind == kind => Some(resource.id),
            _ => None,
        }
    }

    /// Value of an `{ok, value}` tuple
    pub fn ok_value(&self) -> Option<&Term> {
        match self.as_tuple()? {
            [tag, value] if tag.as_atom() == Some("ok") => Some(value),
            _ => None,
        }
    }

    /// Message of an `{error, message}` tuple
    pub fn error_message(&self) -> Option<&str> {
        match self.as_tuple()? {
            [tag, message] if tag.as_atom() == Some("error") => message.as_text(),
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, items: &[Term]) -> fmt::Result {
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }

        match self {
            Term::Atom(name) => write!(f, "{name}"),
            Term::Int(value) => write!(f, "{value}"),
            Term::Float(value) => write!(f, "{value:?}"),
            Term::Binary(binary) => write!(f, "<<{} bytes>>", binary.len()),
            Term::List(items) => {
                write!(f, "[")?;
                join(f, items)?;
                write!(f, "]")
            }
            Term::Tuple(items) => {
                write!(f, "{{")?;
                join(f, items)?;
                write!(f, "}}")
            }
            Term::Resource(resource) => write!(f, "#{}<{}>", resource.kind, resource.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_count_follows_payloads() {
        let binary = HostBinary::new(vec![1u8, 2, 3]);
        let first = binary.pin();
        let second = binary.clone().pin();
        assert_eq!(binary.pin_count(), 2);
        assert_eq!(first.bytes(), &[1, 2, 3]);

        drop(first);
        assert_eq!(binary.pin_count(), 1);
        drop(second);
        assert_eq!(binary.pin_count(), 0);
    }

    #[test]
    fn test_ok_and_error_tuples() {
        let ok = Term::ok(Term::Int(3));
        assert_eq!(ok.ok_value(), Some(&Term::Int(3)));
        assert_eq!(ok.error_message(), None);

        let error = Term::error("Argument is not a list.");
        assert_eq!(error.error_message(), Some("Argument is not a list."));
        assert_eq!(error.to_string(), "{error, <<23 bytes>>}");
    }

    #[test]
    fn test_decoders() {
        assert_eq!(Term::atom("true").as_bool(), Some(true));
        assert_eq!(Term::atom("maybe").as_bool(), None);
        assert_eq!(Term::Int(2).as_float(), Some(2.0));
        assert_eq!(Term::binary(b"f32".to_vec()).as_text(), Some("f32"));

        let buffer = Term::resource(ResourceKind::Buffer, 7);
        assert_eq!(buffer.as_resource(ResourceKind::Buffer), Some(7));
        assert_eq!(buffer.as_resource(ResourceKind::Shape), None);
        assert_eq!(buffer.to_string(), "#buffer<7>");
    }
}
