//! Host-resident values with a shape
//!
//! A [`Literal`] owns one dense byte buffer per array leaf of its shape.
//! A [`BorrowingLiteral`] is the same thing over borrowed host memory and is
//! what infeed transfers consume.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};
use crate::shape::{ElementType, Shape};

/// Rust scalar types that map onto an [`ElementType`]
pub trait NativeType: bytemuck::Pod {
    const TYPE: ElementType;
}

macro_rules! native_type {
    ($($ty:ty => $element:ident),* $(,)?) => {
        $(impl NativeType for $ty {
            const TYPE: ElementType = ElementType::$element;
        })*
    };
}

native_type! {
    i8 => S8,
    i16 => S16,
    i32 => S32,
    i64 => S64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    half::f16 => F16,
    half::bf16 => BF16,
    f32 => F32,
    f64 => F64,
}

fn check_piece(shape_leaf: usize, actual: usize, index: usize) -> Result<()> {
    if shape_leaf != actual {
        return Err(RuntimeError::invalid_argument(format!(
            "literal piece {index} has {actual} bytes, shape requires {shape_leaf}"
        )));
    }
    Ok(())
}

/// Owned host value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Literal {
    shape: Shape,
    pieces: Vec<Vec<u8>>,
}

impl Literal {
    /// Zero-initialised literal of the given shape
    ///
    /// Fails when the shape is too large to address.
    pub fn new(shape: Shape) -> Result<Self> {
        let pieces = shape
            .leaves()
            .iter()
            .map(|leaf| -> Result<Vec<u8>> { Ok(vec![0u8; leaf.byte_size()?]) })
            .collect::<Result<_>>()?;
        Ok(Self { shape, pieces })
    }

    /// Build a literal from contiguous bytes
    ///
    /// For tuple shapes the bytes are split across the leaves in order.
    pub fn from_bytes(shape: Shape, bytes: &[u8]) -> Result<Self> {
        check_piece(shape.byte_size()?, bytes.len(), 0)?;
        let mut offset = 0;
        let pieces = shape
            .leaves()
            .iter()
            .map(|leaf| -> Result<Vec<u8>> {
                let size = leaf.byte_size()?;
                let piece = bytes[offset..offset + size].to_vec();
                offset += size;
                Ok(piece)
            })
            .collect::<Result<_>>()?;
        Ok(Self { shape, pieces })
    }

    /// Build a literal from one byte buffer per array leaf
    pub fn from_pieces(shape: Shape, pieces: Vec<Vec<u8>>) -> Result<Self> {
        let leaves = shape.leaves();
        if leaves.len() != pieces.len() {
            return Err(RuntimeError::invalid_argument(format!(
                "shape {shape} has {} leaves, got {} pieces",
                leaves.len(),
                pieces.len()
            )));
        }
        for (index, (leaf, piece)) in leaves.iter().zip(&pieces).enumerate() {
            check_piece(leaf.byte_size()?, piece.len(), index)?;
        }
        Ok(Self { shape, pieces })
    }

    /// Rank-0 literal
    pub fn scalar<T: NativeType>(value: T) -> Self {
        Self {
            shape: Shape::scalar(T::TYPE),
            pieces: vec![bytemuck::bytes_of(&value).to_vec()],
        }
    }

    /// Rank-1 literal
    pub fn vec1<T: NativeType>(values: &[T]) -> Self {
        Self {
            shape: Shape::array(T::TYPE, vec![values.len()]),
            pieces: vec![bytemuck::cast_slice(values).to_vec()],
        }
    }

    /// Literal with arbitrary dimensions from row-major values
    pub fn from_slice<T: NativeType>(dims: &[usize], values: &[T]) -> Result<Self> {
        let shape = Shape::array(T::TYPE, dims.to_vec());
        Self::from_pieces(shape, vec![bytemuck::cast_slice(values).to_vec()])
    }

    /// Tuple of literals
    pub fn tuple(elements: Vec<Literal>) -> Self {
        let shape = Shape::tuple(elements.iter().map(|e| e.shape.clone()).collect::<Vec<_>>());
        let pieces = elements.into_iter().flat_map(|e| e.pieces).collect();
        Self { shape, pieces }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Total size of all pieces in bytes
    pub fn size_bytes(&self) -> usize {
        self.pieces.iter().map(Vec::len).sum()
    }

    /// Raw data of an array literal
    pub fn untyped_data(&self) -> Result<&[u8]> {
        match (&self.shape, self.pieces.as_slice()) {
            (Shape::Array(_), [piece]) => Ok(piece),
            _ => Err(RuntimeError::invalid_argument(format!(
                "untyped data requested from non-array literal of shape {}",
                self.shape
            ))),
        }
    }

    pub fn pieces(&self) -> &[Vec<u8>] {
        &self.pieces
    }

    pub fn into_pieces(self) -> Vec<Vec<u8>> {
        self.pieces
    }

    /// All leaves concatenated in order
    pub fn to_bytes(&self) -> Vec<u8> {
        self.pieces.concat()
    }

    /// Split a tuple literal into its elements
    pub fn decompose_tuple(self) -> Result<Vec<Literal>> {
        let Shape::Tuple(elements) = self.shape else {
            return Err(RuntimeError::invalid_argument("cannot decompose a non-tuple literal"));
        };
        let mut pieces = self.pieces.into_iter();
        elements
            .into_iter()
            .map(|shape| {
                let count = shape.leaves().len();
                let own: Vec<Vec<u8>> = pieces.by_ref().take(count).collect();
                Literal::from_pieces(shape, own)
            })
            .collect()
    }

    /// Copy the contents of `other` into this literal
    ///
    /// Shapes must agree up to layout.
    pub fn copy_from(&mut self, other: &Literal) -> Result<()> {
        if !self.shape.compatible(&other.shape) {
            return Err(RuntimeError::shape_mismatch(&self.shape, &other.shape));
        }
        for (dst, src) in self.pieces.iter_mut().zip(&other.pieces) {
            dst.copy_from_slice(src);
        }
        Ok(())
    }

    /// Typed copy of an array literal's elements
    pub fn to_vec<T: NativeType>(&self) -> Result<Vec<T>> {
        let element_type = self.shape.element_type();
        if element_type != Some(T::TYPE) {
            return Err(RuntimeError::invalid_argument(format!(
                "cannot read {} literal as {}",
                self.shape,
                T::TYPE
            )));
        }
        let data = self.untyped_data()?;
        Ok(data
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// First element of an array literal
    pub fn get_first_element<T: NativeType>(&self) -> Result<T> {
        self.to_vec::<T>()?
            .first()
            .copied()
            .ok_or_else(|| RuntimeError::invalid_argument("literal has no elements"))
    }
}

/// Host value over borrowed memory
///
/// Array shapes borrow exactly one piece; flat tuple shapes borrow one piece
/// per element.
#[derive(Debug, Clone)]
pub struct BorrowingLiteral<'a> {
    shape: &'a Shape,
    pieces: Vec<&'a [u8]>,
}

impl<'a> BorrowingLiteral<'a> {
    /// Borrow a single buffer for an array shape
    pub fn new(data: &'a [u8], shape: &'a Shape) -> Result<Self> {
        let Shape::Array(array) = shape else {
            return Err(RuntimeError::invalid_argument(format!(
                "single-buffer literal requires an array shape, got {shape}"
            )));
        };
        check_piece(array.byte_size()?, data.len(), 0)?;
        Ok(Self {
            shape,
            pieces: vec![data],
        })
    }

    /// Borrow one buffer per element of a flat tuple shape
    pub fn from_pieces(pieces: Vec<&'a [u8]>, shape: &'a Shape) -> Result<Self> {
        if !shape.is_tuple() || shape.is_nested_tuple() {
            return Err(RuntimeError::invalid_argument(format!(
                "multi-buffer literal requires a flat tuple shape, got {shape}"
            )));
        }
        let leaves = shape.leaves();
        if leaves.len() != pieces.len() {
            return Err(RuntimeError::invalid_argument(format!(
                "tuple shape {shape} has {} elements, got {} buffers",
                leaves.len(),
                pieces.len()
            )));
        }
        for (index, (leaf, piece)) in leaves.iter().zip(&pieces).enumerate() {
            check_piece(leaf.byte_size()?, piece.len(), index)?;
        }
        Ok(Self { shape, pieces })
    }

    pub fn shape(&self) -> &Shape {
        self.shape
    }

    pub fn pieces(&self) -> &[&'a [u8]] {
        &self.pieces
    }

    /// Owned copy
    pub fn to_literal(&self) -> Literal {
        Literal {
            shape: self.shape.clone(),
            pieces: self.pieces.iter().map(|piece| piece.to_vec()).collect(),
        }
    }
}
