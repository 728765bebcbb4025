//! Primitive and composite type model.
//!
//! Every expression node carries a `(Primitive, Composite)` pair. The
//! primitive names the scalar kind; the composite says whether the value is
//! a plain scalar or an SIMD vector of 128 or 256 bits packing several
//! scalar lanes.

use std::fmt;

use crate::error::CompileError;

/// Scalar primitive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Primitive {
    /// Not yet inferred.
    #[default]
    Unk,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Boolean,
    /// Control statements without a value (for, if, block, function...).
    Void,
}

impl Primitive {
    /// Size of one scalar in bytes. `Unk` and `Void` have no size.
    pub fn byte_size(self) -> Option<usize> {
        match self {
            Primitive::Unk | Primitive::Void => None,
            Primitive::Int8 | Primitive::UInt8 | Primitive::Boolean => Some(1),
            Primitive::Int16 | Primitive::UInt16 => Some(2),
            Primitive::Int32 | Primitive::UInt32 | Primitive::Float32 => Some(4),
            Primitive::Int64 | Primitive::UInt64 | Primitive::Float64 => Some(8),
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Primitive::Int8
                | Primitive::Int16
                | Primitive::Int32
                | Primitive::Int64
                | Primitive::UInt8
                | Primitive::UInt16
                | Primitive::UInt32
                | Primitive::UInt64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::Float32 | Primitive::Float64)
    }

    /// Numeric scalar kinds are the only ones an SIMD composite may pack.
    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Primitive::Unk => "unk",
            Primitive::Int8 => "int8",
            Primitive::Int16 => "int16",
            Primitive::Int32 => "int32",
            Primitive::Int64 => "int64",
            Primitive::UInt8 => "uint8",
            Primitive::UInt16 => "uint16",
            Primitive::UInt32 => "uint32",
            Primitive::UInt64 => "uint64",
            Primitive::Float32 => "float32",
            Primitive::Float64 => "float64",
            Primitive::Boolean => "boolean",
            Primitive::Void => "void",
        };
        f.write_str(repr)
    }
}

/// Composite kinds: a plain scalar or an SIMD vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Composite {
    #[default]
    Primitive,
    Simd128,
    Simd256,
}

impl Composite {
    pub fn is_simd(self) -> bool {
        matches!(self, Composite::Simd128 | Composite::Simd256)
    }

    /// Byte size of a value of this composite over `primitive` elements.
    pub fn byte_size(self, primitive: Primitive) -> Option<usize> {
        match self {
            Composite::Primitive => primitive.byte_size(),
            Composite::Simd128 => Some(16),
            Composite::Simd256 => Some(32),
        }
    }

    /// Number of scalar lanes an SIMD composite packs; 1 for scalars.
    pub fn lanes(self, primitive: Primitive) -> Option<usize> {
        let elem = primitive.byte_size()?;
        self.byte_size(primitive).map(|total| total / elem)
    }
}

impl fmt::Display for Composite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Composite::Primitive => "primitive",
            Composite::Simd128 => "simd128",
            Composite::Simd256 => "simd256",
        };
        f.write_str(repr)
    }
}

/// The SIMD composite holding `width` lanes of `primitive`.
///
/// Widths 4 and 8 over `float32` are the supported configurations.
pub fn simd_type_for_width(width: usize, primitive: Primitive) -> Result<Composite, CompileError> {
    if !primitive.is_numeric() {
        return Err(CompileError::type_error(format!(
            "SIMD composite requires a numeric scalar kind, got {primitive}"
        )));
    }
    let elem = primitive
        .byte_size()
        .ok_or_else(|| CompileError::type_error(format!("{primitive} has no byte size")))?;
    match width * elem {
        16 => Ok(Composite::Simd128),
        32 => Ok(Composite::Simd256),
        _ => Err(CompileError::config(format!(
            "unsupported vector width {width} for {primitive}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sizes() {
        assert_eq!(Primitive::Int8.byte_size(), Some(1));
        assert_eq!(Primitive::Float32.byte_size(), Some(4));
        assert_eq!(Primitive::Int64.byte_size(), Some(8));
        assert_eq!(Primitive::Unk.byte_size(), None);
        assert_eq!(Primitive::Void.byte_size(), None);
    }

    #[test]
    fn simd_lanes() {
        assert_eq!(Composite::Simd256.lanes(Primitive::Float32), Some(8));
        assert_eq!(Composite::Simd128.lanes(Primitive::Float32), Some(4));
        assert_eq!(Composite::Simd256.lanes(Primitive::Float64), Some(4));
        assert_eq!(Composite::Primitive.lanes(Primitive::Int32), Some(1));
    }

    #[test]
    fn simd_for_width() {
        assert_eq!(
            simd_type_for_width(8, Primitive::Float32).unwrap(),
            Composite::Simd256
        );
        assert_eq!(
            simd_type_for_width(4, Primitive::Float32).unwrap(),
            Composite::Simd128
        );
        assert!(simd_type_for_width(3, Primitive::Float32).is_err());
        assert!(simd_type_for_width(8, Primitive::Boolean).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Primitive::Float32.to_string(), "float32");
        assert_eq!(Composite::Simd256.to_string(), "simd256");
    }
}
