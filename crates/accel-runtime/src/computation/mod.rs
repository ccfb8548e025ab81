//! Computation graphs handed to [`Runtime::compile`](crate::Runtime::compile)
//!
//! A [`Computation`] is a topologically ordered list of instructions; every
//! operand refers to an earlier instruction. Build one with
//! [`ComputationBuilder`].
//!
//! # Example
//!
//! ```
//! use accel_runtime::{ComputationBuilder, ElementType, Shape};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = ComputationBuilder::new("add");
//! let x = builder.parameter(0, Shape::scalar(ElementType::F32))?;
//! let y = builder.parameter(1, Shape::scalar(ElementType::F32))?;
//! let sum = builder.add(x, y)?;
//! let computation = builder.build(sum)?;
//!
//! let bytes = computation.to_bytes()?;
//! assert_eq!(accel_runtime::Computation::from_bytes(&bytes)?, computation);
//! # Ok(())
//! # }
//! ```

mod builder;

pub use builder::{ComputationBuilder, Operand};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, RuntimeError};
use crate::literal::Literal;
use crate::shape::Shape;

/// Index of an instruction within its computation
pub type InstructionId = usize;

/// Element-wise unary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Abs,
}

/// Element-wise binary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnaryOp::Neg => "negate",
            UnaryOp::Abs => "abs",
        };
        f.write_str(name)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "subtract",
            BinaryOp::Mul => "multiply",
            BinaryOp::Div => "divide",
            BinaryOp::Max => "maximum",
            BinaryOp::Min => "minimum",
        };
        f.write_str(name)
    }
}

/// Operation performed by one instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Positional program argument
    Parameter { index: usize },

    Constant(Literal),

    Unary { op: UnaryOp, operand: InstructionId },

    Binary { op: BinaryOp, lhs: InstructionId, rhs: InstructionId },

    Tuple(Vec<InstructionId>),

    GetTupleElement { operand: InstructionId, index: usize },

    /// Dequeue a value from the device's infeed queue
    Infeed,

    /// Enqueue a value onto the device's outfeed queue; yields `()`
    Outfeed { operand: InstructionId },
}

impl Op {
    /// Instructions this one reads
    pub fn operands(&self) -> Vec<InstructionId> {
        match self {
            Op::Parameter { .. } | Op::Constant(_) | Op::Infeed => Vec::new(),
            Op::Unary { operand, .. } | Op::GetTupleElement { operand, .. } | Op::Outfeed { operand } => {
                vec![*operand]
            }
            Op::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Op::Tuple(elements) => elements.clone(),
        }
    }
}

/// One node of a computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Op,
    pub shape: Shape,
}

/// A validated computation graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Computation {
    name: String,
    instructions: Vec<Instruction>,
    root: InstructionId,
    parameters: Vec<Shape>,
}

impl Computation {
    /// Assemble a computation from raw parts, validating its structure
    pub fn new(name: impl Into<String>, instructions: Vec<Instruction>, root: InstructionId) -> Result<Self> {
        let mut parameters: Vec<Option<Shape>> = Vec::new();
        for (id, instruction) in instructions.iter().enumerate() {
            if let Some(bad) = instruction.op.operands().into_iter().find(|&operand| operand >= id) {
                return Err(RuntimeError::invalid_argument(format!(
                    "instruction {id} refers to instruction {bad} which does not precede it"
                )));
            }
            instruction.shape.byte_size()?;
            if let Op::Parameter { index } = instruction.op {
                if parameters.len() <= index {
                    parameters.resize(index + 1, None);
                }
                if parameters[index].replace(instruction.shape.clone()).is_some() {
                    return Err(RuntimeError::invalid_argument(format!("duplicate parameter {index}")));
                }
            }
        }
        if root >= instructions.len() {
            return Err(RuntimeError::invalid_argument(format!(
                "root {root} is out of range for {} instructions",
                instructions.len()
            )));
        }
        let parameters = parameters
            .into_iter()
            .enumerate()
            .map(|(index, shape)| {
                shape.ok_or_else(|| RuntimeError::invalid_argument(format!("parameter {index} is missing")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.into(),
            instructions,
            root,
            parameters,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn root(&self) -> InstructionId {
        self.root
    }

    pub fn root_shape(&self) -> &Shape {
        &self.instructions[self.root].shape
    }

    /// Shapes of the parameters, by index
    pub fn parameter_shapes(&self) -> &[Shape] {
        &self.parameters
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize and re-validate a computation
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: Computation = bincode::deserialize(bytes)?;
        Self::new(raw.name, raw.instructions, raw.root)
    }
}

impl fmt::Display for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "computation {} {{", self.name)?;
        for (id, instruction) in self.instructions.iter().enumerate() {
            let marker = if id == self.root { "ROOT " } else { "" };
            writeln!(f, "  {marker}%{id} = {} {:?}", instruction.shape, instruction.op)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ElementType;

    fn scalar() -> Shape {
        Shape::scalar(ElementType::F32)
    }

    #[test]
    fn test_new_rejects_forward_reference() {
        let instructions = vec![Instruction {
            op: Op::Unary {
                op: UnaryOp::Neg,
                operand: 0,
            },
            shape: scalar(),
        }];
        assert!(Computation::new("bad", instructions, 0).is_err());
    }

    #[test]
    fn test_new_rejects_parameter_gap() {
        let instructions = vec![Instruction {
            op: Op::Parameter { index: 1 },
            shape: scalar(),
        }];
        let err = Computation::new("gap", instructions, 0).unwrap_err();
        assert!(err.to_string().contains("parameter 0 is missing"));
    }

    #[test]
    fn test_new_rejects_unaddressable_shape() {
        let instructions = vec![Instruction {
            op: Op::Parameter { index: 0 },
            shape: Shape::array(ElementType::U8, vec![1 << 33, 1 << 33]),
        }];
        let err = Computation::new("huge", instructions, 0).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument(_)));
    }

    #[test]
    fn test_serialization_round_trip() {
        let instructions = vec![
            Instruction {
                op: Op::Parameter { index: 0 },
                shape: scalar(),
            },
            Instruction {
                op: Op::Constant(Literal::scalar(1.0f32)),
                shape: scalar(),
            },
            Instruction {
                op: Op::Binary {
                    op: BinaryOp::Add,
                    lhs: 0,
                    rhs: 1,
                },
                shape: scalar(),
            },
        ];
        let computation = Computation::new("inc", instructions, 2).unwrap();
        assert_eq!(computation.parameter_shapes(), &[scalar()]);

        let bytes = computation.to_bytes().unwrap();
        assert_eq!(Computation::from_bytes(&bytes).unwrap(), computation);
        assert!(computation.to_string().contains("ROOT %2"));
    }
}
