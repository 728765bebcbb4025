//! Code generation backends.
//!
//! Only the C backend ships; [`generate_c`] is the seam an alternative
//! backend would slot into.

mod c;
mod x86_simd;

pub use c::{compile_as_c, generate_c};
pub use x86_simd::{X86_128, X86_256, X86Simd};
