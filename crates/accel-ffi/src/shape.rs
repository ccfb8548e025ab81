//! Shape entry points

use accel_core::{Error, Result};
use accel_runtime::{ElementType, Shape};

use crate::decode::{self, arity};
use crate::handles::{get_shape, register_shape};
use crate::reply;
use crate::term::Term;

/// `make_shape(Type, {Dim, ...})`
pub fn make_shape(args: &[Term]) -> Term {
    reply(try_make_shape(args))
}

fn try_make_shape(args: &[Term]) -> Result<Term> {
    let [element_type, dims] = arity::<2>(args)?;
    let element_type: ElementType = decode::text(element_type, "element type")?.parse()?;
    let dims = dims
        .as_tuple()
        .ok_or_else(|| Error::invalid_argument(format!("expected dimensions to be a tuple, got {dims}")))?
        .iter()
        .map(|dim| decode::count(dim, "dimension"))
        .collect::<Result<Vec<_>>>()?;
    checked_register(Shape::array(element_type, dims))
}

/// Only shapes whose size can be addressed reach the registry
fn checked_register(shape: Shape) -> Result<Term> {
    shape.byte_size()?;
    Ok(register_shape(shape))
}

/// `make_tuple_shape([Shape, ...])`
pub fn make_tuple_shape(args: &[Term]) -> Term {
    reply(arity::<1>(args).and_then(|[elements]| {
        let elements = decode::list(elements, "tuple elements")?
            .iter()
            .map(get_shape)
            .collect::<Result<Vec<_>>>()?;
        checked_register(Shape::tuple(elements))
    }))
}

/// `shape_byte_size(Shape)`
pub fn shape_byte_size(args: &[Term]) -> Term {
    reply(arity::<1>(args).and_then(|[shape]| {
        let size = get_shape(shape)?.byte_size()?;
        let size = i64::try_from(size).map_err(|_| Error::invalid_argument(format!("shape size {size} exceeds i64")))?;
        Ok(Term::Int(size))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::clear_all_registries;
    use crate::term::ResourceKind;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_make_shapes() {
        clear_all_registries();
        let matrix = make_shape(&[Term::atom("f32"), Term::Tuple(vec![Term::Int(2), Term::Int(3)])]);
        let matrix = matrix.ok_value().unwrap().clone();
        assert_eq!(get_shape(&matrix).unwrap(), Shape::array(ElementType::F32, vec![2, 3]));

        let scalar = make_shape(&[Term::atom("s64"), Term::Tuple(vec![])]);
        let scalar = scalar.ok_value().unwrap().clone();

        let tuple = make_tuple_shape(&[Term::List(vec![matrix, scalar])]);
        let tuple = tuple.ok_value().unwrap().clone();
        assert_eq!(shape_byte_size(&[tuple]), Term::ok(Term::Int(32)));
    }

    #[test]
    #[serial]
    fn test_make_shape_rejects_bad_input() {
        let reply = make_shape(&[Term::atom("f128"), Term::Tuple(vec![])]);
        assert!(reply.error_message().unwrap().contains("unknown element type"));

        let reply = make_shape(&[Term::atom("u8"), Term::Tuple(vec![Term::Int(-1)])]);
        assert_eq!(reply.error_message(), Some("dimension must be non-negative, got -1"));

        let reply = make_tuple_shape(&[Term::List(vec![Term::Int(1)])]);
        assert_eq!(reply.error_message(), Some("Expected argument to be shape reference."));
    }

    #[test]
    #[serial]
    fn test_make_shape_rejects_unaddressable_sizes() {
        clear_all_registries();
        let huge = Term::Tuple(vec![Term::Int(1 << 33), Term::Int(1 << 33)]);
        let reply = make_shape(&[Term::atom("u8"), huge]);
        assert!(reply.error_message().unwrap().contains("too large"));
        assert!(crate::handles::registry_sizes().contains(&(ResourceKind::Shape, 0)));

        // Each half fits, the tuple of both does not
        let half = make_shape(&[Term::atom("u8"), Term::Tuple(vec![Term::Int(i64::MAX)])]);
        let half = half.ok_value().unwrap().clone();
        let reply = make_tuple_shape(&[Term::List(vec![half.clone(), half.clone(), half])]);
        assert!(reply.error_message().unwrap().contains("too large"));

        // A shape registered from the Rust side is still checked when measured
        let shape = register_shape(Shape::array(ElementType::U8, vec![1 << 33, 1 << 33]));
        assert!(shape_byte_size(&[shape]).error_message().unwrap().contains("too large"));
    }
}
