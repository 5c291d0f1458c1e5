//! file: core/src/ir/tensor.rs
//! description: element types and constant tensor payloads.
//!
//! Tensors keep their values as little-endian raw bytes, the same layout the
//! graph format stores in initializers, so equality is byte equality.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LoweringError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[default]
    F32,
    F64,
    I8,
    I32,
    I64,
    U8,
    Bool,
}

impl DType {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
            DType::I8 | DType::U8 | DType::Bool => 1,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn parse(name: &str) -> Option<DType> {
        match name.trim().to_ascii_lowercase().as_str() {
            "f32" | "float32" | "float" => Some(DType::F32),
            "f64" | "float64" | "double" => Some(DType::F64),
            "i8" | "int8" => Some(DType::I8),
            "i32" | "int32" => Some(DType::I32),
            "i64" | "int64" => Some(DType::I64),
            "u8" | "uint8" => Some(DType::U8),
            "bool" => Some(DType::Bool),
            _ => None,
        }
    }

    /// Encode one element, truncating toward the target type.
    fn encode(&self, value: f64, out: &mut Vec<u8>) {
        match self {
            DType::F32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
            DType::F64 => out.extend_from_slice(&value.to_le_bytes()),
            DType::I8 => out.extend_from_slice(&(value as i8).to_le_bytes()),
            DType::I32 => out.extend_from_slice(&(value as i32).to_le_bytes()),
            DType::I64 => out.extend_from_slice(&(value as i64).to_le_bytes()),
            DType::U8 => out.push(value as u8),
            DType::Bool => out.push(u8::from(value != 0.0)),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I8 => "i8",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
            DType::Bool => "bool",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tensor {
    pub dtype: DType,
    pub dims: Vec<u64>,
    pub raw: Vec<u8>,
}

impl Tensor {
    /// A tensor of `dims` with every element set to `value`. Meant for small
    /// constants; use `try_filled` when the shape comes from outside.
    pub fn filled(dims: &[u64], dtype: DType, value: f64) -> Self {
        let count = dims.iter().fold(1usize, |acc, d| acc.saturating_mul(*d as usize));
        let mut raw = Vec::with_capacity(count.saturating_mul(dtype.size_in_bytes()));
        for _ in 0..count {
            dtype.encode(value, &mut raw);
        }
        Tensor { dtype, dims: dims.to_vec(), raw }
    }

    /// `filled` with the byte size checked first. Fails when the payload
    /// would not fit in memory addressing.
    pub fn try_filled(dims: &[u64], dtype: DType, value: f64) -> Result<Self> {
        byte_len(dims, dtype).ok_or_else(|| {
            LoweringError::trace(format!("a {} tensor of shape {:?} is too large to materialize", dtype, dims))
        })?;
        Ok(Self::filled(dims, dtype, value))
    }

    pub fn ones(dims: &[u64], dtype: DType) -> Self {
        Self::filled(dims, dtype, 1.0)
    }

    pub fn zeros(dims: &[u64], dtype: DType) -> Self {
        Self::filled(dims, dtype, 0.0)
    }

    pub fn scalar(dtype: DType, value: f64) -> Self {
        Self::filled(&[], dtype, value)
    }

    pub fn from_values(dims: &[u64], dtype: DType, values: &[f64]) -> Self {
        let mut raw = Vec::with_capacity(values.len() * dtype.size_in_bytes());
        for v in values {
            dtype.encode(*v, &mut raw);
        }
        Tensor { dtype, dims: dims.to_vec(), raw }
    }

    pub fn element_count(&self) -> usize {
        self.raw.len() / self.dtype.size_in_bytes()
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }
}

/// Payload size of a `dims` tensor, or None on overflow.
pub fn byte_len(dims: &[u64], dtype: DType) -> Option<usize> {
    dims.iter()
        .try_fold(dtype.size_in_bytes(), |acc, d| usize::try_from(*d).ok().and_then(|d| acc.checked_mul(d)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_shapes_are_refused() {
        assert_eq!(byte_len(&[2, 3], DType::F32), Some(24));
        assert_eq!(byte_len(&[], DType::I64), Some(8));
        assert_eq!(byte_len(&[1 << 32, 1 << 32], DType::F32), None);
        let err = Tensor::try_filled(&[1 << 40, 1 << 40], DType::F64, 1.0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TraceFailure);
        assert_eq!(Tensor::try_filled(&[2], DType::F32, 1.0).unwrap(), Tensor::ones(&[2], DType::F32));
    }
}
