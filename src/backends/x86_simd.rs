//! x86 SIMD intrinsic name tables for the C backend.

use crate::ir::SimdOpr;

/// Intrinsic names for one register width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct X86Simd {
    prefix: &'static str,
    packed_float: &'static str,
}

/// 128-bit SSE names.
pub const X86_128: X86Simd = X86Simd {
    prefix: "_mm",
    packed_float: "__m128",
};

/// 256-bit AVX names.
pub const X86_256: X86Simd = X86Simd {
    prefix: "_mm256",
    packed_float: "__m256",
};

impl X86Simd {
    /// The table for a lane count over `float32` (4 or 8).
    pub fn for_width(width: usize) -> X86Simd {
        if width == 8 { X86_256 } else { X86_128 }
    }

    /// The packed-float register type, e.g. `__m256`.
    pub fn packed_float_type(&self) -> &'static str {
        self.packed_float
    }

    /// The packed-float intrinsic for an SIMD operator, e.g.
    /// `_mm256_add_ps`.
    pub fn op_ps(&self, op: SimdOpr) -> String {
        let name = match op {
            SimdOpr::Add => "add",
            SimdOpr::Sub => "sub",
            SimdOpr::Mul => "mul",
            SimdOpr::Div => "div",
            SimdOpr::Load => "load",
            SimdOpr::Store => "store",
        };
        format!("{}_{}_ps", self.prefix, name)
    }

    /// The lane-broadcast intrinsic, e.g. `_mm256_set1_ps`.
    pub fn set1_ps(&self) -> String {
        format!("{}_set1_ps", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsic_names() {
        assert_eq!(X86Simd::for_width(8).op_ps(SimdOpr::Add), "_mm256_add_ps");
        assert_eq!(X86Simd::for_width(4).op_ps(SimdOpr::Mul), "_mm_mul_ps");
        assert_eq!(X86Simd::for_width(8).op_ps(SimdOpr::Load), "_mm256_load_ps");
        assert_eq!(X86Simd::for_width(4).set1_ps(), "_mm_set1_ps");
        assert_eq!(X86Simd::for_width(8).packed_float_type(), "__m256");
    }
}
