//! Evaluation of computations on host literals

use rayon::prelude::*;

use super::device::CpuDevice;
use crate::computation::{BinaryOp, Computation, Op, UnaryOp};
use crate::error::{Result, RuntimeError};
use crate::literal::{Literal, NativeType};
use crate::shape::{ElementType, Shape};

/// Arrays at least this large are evaluated with rayon
const PARALLEL_THRESHOLD: usize = 1 << 14;

/// Scalar arithmetic for one element type
trait Arithmetic: NativeType + Send + Sync {
    fn unary(op: UnaryOp, x: Self) -> Self;
    fn binary(op: BinaryOp, x: Self, y: Self) -> Result<Self>;
}

macro_rules! signed_arithmetic {
    ($($ty:ty),*) => {
        $(impl Arithmetic for $ty {
            fn unary(op: UnaryOp, x: Self) -> Self {
                match op {
                    UnaryOp::Neg => x.wrapping_neg(),
                    UnaryOp::Abs => x.wrapping_abs(),
                }
            }

            fn binary(op: BinaryOp, x: Self, y: Self) -> Result<Self> {
                integer_binary!(op, x, y)
            }
        })*
    };
}

macro_rules! unsigned_arithmetic {
    ($($ty:ty),*) => {
        $(impl Arithmetic for $ty {
            fn unary(op: UnaryOp, x: Self) -> Self {
                match op {
                    UnaryOp::Neg => x.wrapping_neg(),
                    UnaryOp::Abs => x,
                }
            }

            fn binary(op: BinaryOp, x: Self, y: Self) -> Result<Self> {
                integer_binary!(op, x, y)
            }
        })*
    };
}

macro_rules! integer_binary {
    ($op:expr, $x:expr, $y:expr) => {
        match $op {
            BinaryOp::Add => Ok($x.wrapping_add($y)),
            BinaryOp::Sub => Ok($x.wrapping_sub($y)),
            BinaryOp::Mul => Ok($x.wrapping_mul($y)),
            BinaryOp::Div => $x
                .checked_div($y)
                .ok_or_else(|| RuntimeError::execution("integer division by zero")),
            BinaryOp::Max => Ok($x.max($y)),
            BinaryOp::Min => Ok($x.min($y)),
        }
    };
}

macro_rules! float_arithmetic {
    ($($ty:ty),*) => {
        $(impl Arithmetic for $ty {
            fn unary(op: UnaryOp, x: Self) -> Self {
                match op {
                    UnaryOp::Neg => -x,
                    UnaryOp::Abs => x.abs(),
                }
            }

            fn binary(op: BinaryOp, x: Self, y: Self) -> Result<Self> {
                Ok(match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => x / y,
                    BinaryOp::Max => x.max(y),
                    BinaryOp::Min => x.min(y),
                })
            }
        })*
    };
}

macro_rules! half_arithmetic {
    ($($ty:ty),*) => {
        $(impl Arithmetic for $ty {
            fn unary(op: UnaryOp, x: Self) -> Self {
                <$ty>::from_f32(f32::unary(op, x.to_f32()))
            }

            fn binary(op: BinaryOp, x: Self, y: Self) -> Result<Self> {
                f32::binary(op, x.to_f32(), y.to_f32()).map(<$ty>::from_f32)
            }
        })*
    };
}

signed_arithmetic!(i8, i16, i32, i64);
unsigned_arithmetic!(u8, u16, u32, u64);
float_arithmetic!(f32, f64);
half_arithmetic!(half::f16, half::bf16);

fn map_unary<T: Arithmetic>(op: UnaryOp, x: &Literal) -> Result<Literal> {
    let values = x.to_vec::<T>()?;
    let out: Vec<T> = if values.len() >= PARALLEL_THRESHOLD {
        values.par_iter().map(|&v| T::unary(op, v)).collect()
    } else {
        values.iter().map(|&v| T::unary(op, v)).collect()
    };
    Literal::from_slice(x.shape().dimensions(), &out)
}

fn map_binary<T: Arithmetic>(op: BinaryOp, x: &Literal, y: &Literal) -> Result<Literal> {
    let lhs = x.to_vec::<T>()?;
    let rhs = y.to_vec::<T>()?;
    let out: Vec<T> = if lhs.len() >= PARALLEL_THRESHOLD {
        lhs.par_iter()
            .zip(rhs.par_iter())
            .map(|(&a, &b)| T::binary(op, a, b))
            .collect::<Result<_>>()?
    } else {
        lhs.iter()
            .zip(&rhs)
            .map(|(&a, &b)| T::binary(op, a, b))
            .collect::<Result<_>>()?
    };
    Literal::from_slice(x.shape().dimensions(), &out)
}

macro_rules! dispatch {
    ($element:expr, $func:ident, $($arg:expr),*) => {
        match $element {
            ElementType::S8 => $func::<i8>($($arg),*),
            ElementType::S16 => $func::<i16>($($arg),*),
            ElementType::S32 => $func::<i32>($($arg),*),
            ElementType::S64 => $func::<i64>($($arg),*),
            ElementType::U8 => $func::<u8>($($arg),*),
            ElementType::U16 => $func::<u16>($($arg),*),
            ElementType::U32 => $func::<u32>($($arg),*),
            ElementType::U64 => $func::<u64>($($arg),*),
            ElementType::F16 => $func::<half::f16>($($arg),*),
            ElementType::BF16 => $func::<half::bf16>($($arg),*),
            ElementType::F32 => $func::<f32>($($arg),*),
            ElementType::F64 => $func::<f64>($($arg),*),
            ElementType::Pred => Err(RuntimeError::execution("arithmetic on pred values")),
        }
    };
}

fn element_type(literal: &Literal) -> Result<ElementType> {
    literal
        .shape()
        .element_type()
        .ok_or_else(|| RuntimeError::execution(format!("expected an array value, got {}", literal.shape())))
}

/// Evaluate `computation` on `device` with the given arguments
pub(crate) fn evaluate(computation: &Computation, arguments: Vec<Literal>, device: &CpuDevice) -> Result<Literal> {
    let mut arguments: Vec<Option<Literal>> = arguments.into_iter().map(Some).collect();
    let mut values: Vec<Literal> = Vec::with_capacity(computation.instructions().len());

    for (id, instruction) in computation.instructions().iter().enumerate() {
        let value = match &instruction.op {
            Op::Parameter { index } => arguments
                .get_mut(*index)
                .and_then(Option::take)
                .ok_or_else(|| RuntimeError::execution(format!("parameter {index} was not supplied")))?,
            Op::Constant(literal) => literal.clone(),
            Op::Unary { op, operand } => {
                let x = &values[*operand];
                dispatch!(element_type(x)?, map_unary, *op, x)?
            }
            Op::Binary { op, lhs, rhs } => {
                let (x, y) = (&values[*lhs], &values[*rhs]);
                dispatch!(element_type(x)?, map_binary, *op, x, y)?
            }
            Op::Tuple(elements) => Literal::tuple(elements.iter().map(|&e| values[e].clone()).collect()),
            Op::GetTupleElement { operand, index } => values[*operand]
                .clone()
                .decompose_tuple()?
                .into_iter()
                .nth(*index)
                .ok_or_else(|| RuntimeError::execution(format!("tuple index {index} out of range")))?,
            Op::Infeed => {
                let literal = device.infeed().pop();
                if !literal.shape().compatible(&instruction.shape) {
                    return Err(RuntimeError::execution(format!(
                        "infeed delivered {} but the program expects {}",
                        literal.shape(),
                        instruction.shape
                    )));
                }
                literal
            }
            Op::Outfeed { operand } => {
                device.outfeed().push(values[*operand].clone());
                Literal::new(Shape::unit())?
            }
        };
        tracing::trace!(instruction = id, shape = %value.shape(), "evaluated");
        values.push(value);
    }

    values
        .into_iter()
        .nth(computation.root())
        .ok_or_else(|| RuntimeError::Internal("root instruction was not evaluated".into()))
}
