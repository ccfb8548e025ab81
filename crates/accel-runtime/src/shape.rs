//! Element types, layouts, and shapes
//!
//! A [`Shape`] is either an array (element type + dimensions + optional
//! layout) or a tuple of shapes. Shapes are immutable descriptors: nothing
//! in this workspace mutates a shape it was handed, it clones and edits the
//! clone instead (see [`Shape::without_layout`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, RuntimeError};

// ================================================================================================
// Element Types
// ================================================================================================

/// Type of the values stored in an array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// Boolean predicate, one byte per element
    Pred,

    // Signed integers
    S8,
    S16,
    S32,
    S64,

    // Unsigned integers
    U8,
    U16,
    U32,
    U64,

    // Floating point
    F16,  // IEEE 754 half precision
    BF16, // Brain floating point 16
    F32,  // IEEE 754 single precision
    F64,  // IEEE 754 double precision
}

impl ElementType {
    /// Size of one element in bytes
    pub const fn size_bytes(self) -> usize {
        match self {
            ElementType::Pred | ElementType::S8 | ElementType::U8 => 1,
            ElementType::S16 | ElementType::U16 | ElementType::F16 | ElementType::BF16 => 2,
            ElementType::S32 | ElementType::U32 | ElementType::F32 => 4,
            ElementType::S64 | ElementType::U64 | ElementType::F64 => 8,
        }
    }

    /// Is this a floating-point type?
    pub const fn is_float(self) -> bool {
        matches!(
            self,
            ElementType::F16 | ElementType::BF16 | ElementType::F32 | ElementType::F64
        )
    }

    /// Is this an integer type?
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            ElementType::S8
                | ElementType::S16
                | ElementType::S32
                | ElementType::S64
                | ElementType::U8
                | ElementType::U16
                | ElementType::U32
                | ElementType::U64
        )
    }

    /// Short lowercase name, as used in shape strings (`f32`, `s64`, `pred`)
    pub const fn name(self) -> &'static str {
        match self {
            ElementType::Pred => "pred",
            ElementType::S8 => "s8",
            ElementType::S16 => "s16",
            ElementType::S32 => "s32",
            ElementType::S64 => "s64",
            ElementType::U8 => "u8",
            ElementType::U16 => "u16",
            ElementType::U32 => "u32",
            ElementType::U64 => "u64",
            ElementType::F16 => "f16",
            ElementType::BF16 => "bf16",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ElementType {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        let ty = match s.trim().to_ascii_lowercase().as_str() {
            "pred" => ElementType::Pred,
            "s8" | "i8" => ElementType::S8,
            "s16" | "i16" => ElementType::S16,
            "s32" | "i32" => ElementType::S32,
            "s64" | "i64" => ElementType::S64,
            "u8" => ElementType::U8,
            "u16" => ElementType::U16,
            "u32" => ElementType::U32,
            "u64" => ElementType::U64,
            "f16" => ElementType::F16,
            "bf16" => ElementType::BF16,
            "f32" => ElementType::F32,
            "f64" => ElementType::F64,
            other => {
                return Err(RuntimeError::invalid_argument(format!(
                    "unknown element type '{other}'"
                )))
            }
        };
        Ok(ty)
    }
}

// ================================================================================================
// Layout
// ================================================================================================

/// Physical ordering of an array's dimensions in memory
///
/// `minor_to_major[0]` is the fastest-varying dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Layout {
    pub minor_to_major: Vec<usize>,
}

impl Layout {
    /// Row-major layout for an array of the given rank
    pub fn descending(rank: usize) -> Self {
        Self {
            minor_to_major: (0..rank).rev().collect(),
        }
    }

    /// Whether this is the row-major layout
    pub fn is_descending(&self) -> bool {
        self.minor_to_major.iter().rev().copied().eq(0..self.minor_to_major.len())
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, dim) in self.minor_to_major.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, "}}")
    }
}

// ================================================================================================
// Shapes
// ================================================================================================

/// Shape of a dense array
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayShape {
    pub element_type: ElementType,
    pub dims: Vec<usize>,
    pub layout: Option<Layout>,
}

impl ArrayShape {
    /// Number of elements (1 for scalars)
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the count does not fit in `usize`.
    pub fn element_count(&self) -> Result<usize> {
        if self.dims.contains(&0) {
            return Ok(0);
        }
        self.dims
            .iter()
            .try_fold(1usize, |count, &dim| count.checked_mul(dim))
            .ok_or_else(|| self.too_large())
    }

    /// Size of the dense array in bytes
    pub fn byte_size(&self) -> Result<usize> {
        self.element_count()?
            .checked_mul(self.element_type.size_bytes())
            .ok_or_else(|| self.too_large())
    }

    fn too_large(&self) -> RuntimeError {
        RuntimeError::invalid_argument(format!("shape {self} is too large to address"))
    }

    /// Rank (number of dimensions)
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Same type and dimensions, layout ignored
    pub fn compatible(&self, other: &ArrayShape) -> bool {
        self.element_type == other.element_type && self.dims == other.dims
    }
}

/// Array or tuple shape
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Array(ArrayShape),
    Tuple(Vec<Shape>),
}

impl Shape {
    /// Array shape without an explicit layout
    pub fn array(element_type: ElementType, dims: impl Into<Vec<usize>>) -> Self {
        Shape::Array(ArrayShape {
            element_type,
            dims: dims.into(),
            layout: None,
        })
    }

    /// Rank-0 array shape
    pub fn scalar(element_type: ElementType) -> Self {
        Self::array(element_type, Vec::new())
    }

    /// Tuple shape
    pub fn tuple(elements: impl Into<Vec<Shape>>) -> Self {
        Shape::Tuple(elements.into())
    }

    /// The empty tuple, used as the shape of side-effect-only instructions
    pub fn unit() -> Self {
        Shape::Tuple(Vec::new())
    }

    /// Copy of this array shape with an explicit layout
    ///
    /// Tuples are returned unchanged.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        if let Shape::Array(array) = &mut self {
            array.layout = Some(layout);
        }
        self
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Shape::Array(_))
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Shape::Tuple(_))
    }

    /// A tuple with at least one tuple element
    pub fn is_nested_tuple(&self) -> bool {
        match self {
            Shape::Tuple(elements) => elements.iter().any(Shape::is_tuple),
            Shape::Array(_) => false,
        }
    }

    /// Number of tuple elements (0 for arrays)
    pub fn tuple_element_count(&self) -> usize {
        match self {
            Shape::Tuple(elements) => elements.len(),
            Shape::Array(_) => 0,
        }
    }

    /// Tuple elements (empty for arrays)
    pub fn tuple_shapes(&self) -> &[Shape] {
        match self {
            Shape::Tuple(elements) => elements,
            Shape::Array(_) => &[],
        }
    }

    pub fn as_array(&self) -> Option<&ArrayShape> {
        match self {
            Shape::Array(array) => Some(array),
            Shape::Tuple(_) => None,
        }
    }

    /// Element type of an array shape
    pub fn element_type(&self) -> Option<ElementType> {
        self.as_array().map(|array| array.element_type)
    }

    /// Dimensions of an array shape (empty for tuples)
    pub fn dimensions(&self) -> &[usize] {
        match self {
            Shape::Array(array) => &array.dims,
            Shape::Tuple(_) => &[],
        }
    }

    /// Total dense size in bytes, summed over tuple leaves
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the size overflows `usize`.
    pub fn byte_size(&self) -> Result<usize> {
        match self {
            Shape::Array(array) => array.byte_size(),
            Shape::Tuple(elements) => elements.iter().try_fold(0usize, |total, element| {
                total
                    .checked_add(element.byte_size()?)
                    .ok_or_else(|| RuntimeError::invalid_argument(format!("tuple shape {self} is too large to address")))
            }),
        }
    }

    /// Array leaves in depth-first order
    pub fn leaves(&self) -> Vec<&ArrayShape> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a ArrayShape>) {
        match self {
            Shape::Array(array) => out.push(array),
            Shape::Tuple(elements) => elements.iter().for_each(|e| e.collect_leaves(out)),
        }
    }

    /// Whether any array in this shape carries an explicit layout
    pub fn has_layout(&self) -> bool {
        self.leaves().iter().any(|leaf| leaf.layout.is_some())
    }

    /// Remove explicit layouts, recursively
    pub fn clear_layout(&mut self) {
        match self {
            Shape::Array(array) => array.layout = None,
            Shape::Tuple(elements) => elements.iter_mut().for_each(Shape::clear_layout),
        }
    }

    /// Copy of this shape with every explicit layout removed
    pub fn without_layout(&self) -> Shape {
        let mut shape = self.clone();
        shape.clear_layout();
        shape
    }

    /// Copy of this shape with the row-major layout on every array
    pub fn with_default_layout(&self) -> Shape {
        match self {
            Shape::Array(array) => Shape::Array(ArrayShape {
                layout: Some(Layout::descending(array.rank())),
                ..array.clone()
            }),
            Shape::Tuple(elements) => Shape::Tuple(elements.iter().map(Shape::with_default_layout).collect()),
        }
    }

    /// Structural equality ignoring layouts
    pub fn compatible(&self, other: &Shape) -> bool {
        match (self, other) {
            (Shape::Array(a), Shape::Array(b)) => a.compatible(b),
            (Shape::Tuple(a), Shape::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.compatible(y))
            }
            _ => false,
        }
    }
}

impl From<ArrayShape> for Shape {
    fn from(array: ArrayShape) -> Self {
        Shape::Array(array)
    }
}

impl fmt::Display for ArrayShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.element_type)?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, "]")?;
        if let Some(layout) = &self.layout {
            write!(f, "{layout}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Array(array) => write!(f, "{array}"),
            Shape::Tuple(elements) => {
                write!(f, "(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, ")")
            }
        }
    }
}
