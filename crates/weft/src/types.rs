//! Element types and the error carrier shared across the crate.

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Enumerates scalar element types representable on tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Half,
    BFloat16,
    Float,
    Double,
    Uint8,
    Int8,
    Int16,
    Int32,
    Int64,
    Boolean,
}

impl DataType {
    /// Returns `true` when the dtype is a floating-point representation.
    pub fn is_float(self) -> bool {
        matches!(
            self,
            DataType::Half | DataType::BFloat16 | DataType::Float | DataType::Double
        )
    }

    /// Returns `true` when the dtype is any signed or unsigned integer.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::Uint8 | DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        )
    }

    /// Returns the storage size in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::Uint8 | DataType::Int8 | DataType::Boolean => 1,
            DataType::Half | DataType::BFloat16 | DataType::Int16 => 2,
            DataType::Float | DataType::Int32 => 4,
            DataType::Double | DataType::Int64 => 8,
        }
    }

    /// Returns the torch-dialect tensor element suffix (e.g. `f32` in
    /// `!torch.vtensor<[2,3],f32>`).
    pub fn mlir_suffix(self) -> &'static str {
        match self {
            DataType::Half => "f16",
            DataType::BFloat16 => "bf16",
            DataType::Float => "f32",
            DataType::Double => "f64",
            DataType::Uint8 => "ui8",
            DataType::Int8 => "si8",
            DataType::Int16 => "si16",
            DataType::Int32 => "si32",
            DataType::Int64 => "si64",
            DataType::Boolean => "i1",
        }
    }

    /// Returns the integer dtype code consumed by
    /// `torch.aten.empty.memory_format`.
    pub fn torch_dtype_code(self) -> i64 {
        match self {
            DataType::Uint8 => 0,
            DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 => 3,
            DataType::Int64 => 4,
            DataType::Half => 5,
            DataType::Float => 6,
            DataType::Double => 7,
            DataType::Boolean => 11,
            DataType::BFloat16 => 15,
        }
    }
}

/// Literal value carried by scalar tensors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Float(f64),
    Int(i64),
}

/// Error surfaced by graph validation, compilation, and execution.
///
/// Builder methods never fail; every failure is reported from
/// `validate`, `compile`, or `execute` as one of these kinds.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("attribute not set: {0}")]
    AttributeNotSet(String),
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),
    #[error("{0}")]
    NotValidated(String),
    #[error("compile failure: {0}")]
    CompileFailure(String),
    #[error("runtime failure: {0}")]
    RuntimeFailure(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

/// Convenience alias used by every fallible routine in the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_sizes_match_storage() {
        assert_eq!(DataType::Half.size_in_bytes(), 2);
        assert_eq!(DataType::BFloat16.size_in_bytes(), 2);
        assert_eq!(DataType::Float.size_in_bytes(), 4);
        assert_eq!(DataType::Double.size_in_bytes(), 8);
        assert_eq!(DataType::Int32.size_in_bytes(), 4);
        assert_eq!(DataType::Boolean.size_in_bytes(), 1);
    }

    #[test]
    fn dtype_classification() {
        assert!(DataType::Half.is_float());
        assert!(!DataType::Half.is_integer());
        assert!(DataType::Int64.is_integer());
        assert!(!DataType::Boolean.is_float());
        assert!(!DataType::Boolean.is_integer());
    }

    #[test]
    fn torch_dtype_codes() {
        assert_eq!(DataType::Float.torch_dtype_code(), 6);
        assert_eq!(DataType::Half.torch_dtype_code(), 5);
        assert_eq!(DataType::BFloat16.torch_dtype_code(), 15);
        assert_eq!(DataType::Int32.torch_dtype_code(), 3);
    }
}
