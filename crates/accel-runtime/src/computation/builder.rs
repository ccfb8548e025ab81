//! Incremental construction of computations with shape inference

use super::{BinaryOp, Computation, Instruction, InstructionId, Op, UnaryOp};
use crate::error::{Result, RuntimeError};
use crate::literal::Literal;
use crate::shape::{ElementType, Shape};

/// Reference to an instruction inside a [`ComputationBuilder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand(InstructionId);

impl Operand {
    pub fn id(self) -> InstructionId {
        self.0
    }
}

/// Builds a [`Computation`] one instruction at a time
#[derive(Debug)]
pub struct ComputationBuilder {
    name: String,
    instructions: Vec<Instruction>,
}

impl ComputationBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Vec::new(),
        }
    }

    fn push(&mut self, op: Op, shape: Shape) -> Operand {
        self.instructions.push(Instruction { op, shape });
        Operand(self.instructions.len() - 1)
    }

    fn shape_of(&self, operand: Operand) -> Result<&Shape> {
        self.instructions
            .get(operand.0)
            .map(|instruction| &instruction.shape)
            .ok_or_else(|| RuntimeError::invalid_argument(format!("operand {} does not belong to this builder", operand.0)))
    }

    fn numeric_array(&self, operand: Operand, what: impl std::fmt::Display) -> Result<Shape> {
        let shape = self.shape_of(operand)?;
        match shape.element_type() {
            Some(ElementType::Pred) | None => Err(RuntimeError::invalid_argument(format!(
                "{what} requires a numeric array operand, got {shape}"
            ))),
            Some(_) => Ok(shape.without_layout()),
        }
    }

    /// Declare parameter `index` with the given shape
    pub fn parameter(&mut self, index: usize, shape: Shape) -> Result<Operand> {
        let duplicate = self
            .instructions
            .iter()
            .any(|instruction| matches!(instruction.op, Op::Parameter { index: existing } if existing == index));
        if duplicate {
            return Err(RuntimeError::invalid_argument(format!("parameter {index} declared twice")));
        }
        Ok(self.push(Op::Parameter { index }, shape))
    }

    pub fn constant(&mut self, literal: Literal) -> Operand {
        let shape = literal.shape().clone();
        self.push(Op::Constant(literal), shape)
    }

    pub fn unary(&mut self, op: UnaryOp, operand: Operand) -> Result<Operand> {
        let shape = self.numeric_array(operand, op)?;
        Ok(self.push(
            Op::Unary {
                op,
                operand: operand.0,
            },
            shape,
        ))
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Operand, rhs: Operand) -> Result<Operand> {
        let shape = self.numeric_array(lhs, op)?;
        let rhs_shape = self.numeric_array(rhs, op)?;
        if !shape.compatible(&rhs_shape) {
            return Err(RuntimeError::invalid_argument(format!(
                "{op} operands have incompatible shapes {shape} and {rhs_shape}"
            )));
        }
        Ok(self.push(
            Op::Binary {
                op,
                lhs: lhs.0,
                rhs: rhs.0,
            },
            shape,
        ))
    }

    pub fn neg(&mut self, operand: Operand) -> Result<Operand> {
        self.unary(UnaryOp::Neg, operand)
    }

    pub fn abs(&mut self, operand: Operand) -> Result<Operand> {
        self.unary(UnaryOp::Abs, operand)
    }

    pub fn add(&mut self, lhs: Operand, rhs: Operand) -> Result<Operand> {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: Operand, rhs: Operand) -> Result<Operand> {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: Operand, rhs: Operand) -> Result<Operand> {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn div(&mut self, lhs: Operand, rhs: Operand) -> Result<Operand> {
        self.binary(BinaryOp::Div, lhs, rhs)
    }

    pub fn max(&mut self, lhs: Operand, rhs: Operand) -> Result<Operand> {
        self.binary(BinaryOp::Max, lhs, rhs)
    }

    pub fn min(&mut self, lhs: Operand, rhs: Operand) -> Result<Operand> {
        self.binary(BinaryOp::Min, lhs, rhs)
    }

    pub fn tuple(&mut self, elements: &[Operand]) -> Result<Operand> {
        let shapes = elements
            .iter()
            .map(|&element| self.shape_of(element).cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok(self.push(
            Op::Tuple(elements.iter().map(|element| element.0).collect()),
            Shape::tuple(shapes),
        ))
    }

    pub fn get_tuple_element(&mut self, operand: Operand, index: usize) -> Result<Operand> {
        let tuple = self.shape_of(operand)?;
        let shape = tuple.tuple_shapes().get(index).cloned().ok_or_else(|| {
            RuntimeError::invalid_argument(format!("tuple index {index} is out of range for shape {tuple}"))
        })?;
        Ok(self.push(
            Op::GetTupleElement {
                operand: operand.0,
                index,
            },
            shape,
        ))
    }

    /// Read a value of `shape` from the device's infeed queue
    ///
    /// Nested tuples cannot be fed from the host, so they are rejected here.
    pub fn infeed(&mut self, shape: Shape) -> Result<Operand> {
        if shape.is_nested_tuple() {
            return Err(RuntimeError::invalid_argument(format!(
                "infeed shape {shape} contains nested tuples"
            )));
        }
        Ok(self.push(Op::Infeed, shape))
    }

    /// Write `operand` to the device's outfeed queue
    pub fn outfeed(&mut self, operand: Operand) -> Result<Operand> {
        self.shape_of(operand)?;
        Ok(self.push(Op::Outfeed { operand: operand.0 }, Shape::unit()))
    }

    /// Finish the computation with `root` as its result
    pub fn build(self, root: Operand) -> Result<Computation> {
        Computation::new(self.name, self.instructions, root.0)
    }
}
