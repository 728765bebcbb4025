#![forbid(unsafe_code)]
//! Tensor expression compiler.
//!
//! tensorforge lowers a declarative description of tensor computations
//! (matrix multiplications, elementwise operations, activations,
//! reshapes) into loop-nested C source with explicit SIMD intrinsics.
//! Iteration spaces are integer sets, schedules are affine relations, and
//! loop transformations (tiling, fusion, interchange, unrolling,
//! vectorization) rewrite a schedule tree that is finally materialized
//! into an AST and lowered back into the expression IR.
//!
//! # Pipeline
//!
//! 1. Build tensors and operators against a [`Session`] (or build stages
//!    directly from assignment expressions).
//! 2. A [`Graph`] orders the operators topologically; compiling an
//!    operator emits [`Stage`]s into its output tensor.
//! 3. Stages are partitioned into [`Function`]s; each function derives a
//!    schedule tree from its stages' iteration domains.
//! 4. Per-stage directives (tile, interchange, fuse, vectorize, unroll)
//!    rewrite the schedule tree; the tree is materialized to an AST and
//!    translated back into the expression IR.
//! 5. The optimization pipeline rewrites the lowered expression
//!    (offset folding, vectorization, unrolling, call-once lowering).
//! 6. The C backend emits a header and a source file.
//!
//! # Example
//!
//! ```
//! use tensorforge::ir::{AssignOpr, Constant, Expr, Tensor, Var};
//! use tensorforge::types::Primitive;
//! use tensorforge::{Context, Function, Stage};
//!
//! let ctx = Context::new();
//! let a = Tensor::new("A", vec![Constant::int(8)], Primitive::Float32);
//! let c = Tensor::new("C", vec![Constant::int(8)], Primitive::Float32);
//! let i: Expr = Var::with_interval("i", 0, 8).into();
//!
//! let stmt = Expr::assign(
//!     AssignOpr::Assign,
//!     Expr::from(c.clone()).at([i.clone()]).unwrap(),
//!     Expr::from(a.clone()).at([i]).unwrap(),
//! )
//! .unwrap();
//!
//! let mut func = Function::new(&ctx, "copy8");
//! func.add_stage(Stage::from_expr(&ctx, stmt).unwrap()).unwrap();
//! func.set_inputs(vec![a.into()]);
//! func.set_outputs(vec![c.into()]);
//! func.end_definition().unwrap();
//! let expr = func.compile_to_expr().unwrap();
//! assert!(expr.to_string().contains("for(c0, 0, (c0 <= 7), 1)"));
//! ```

pub mod backends;
mod context;
pub mod core;
mod error;
pub mod hlir;
pub mod ir;
pub mod optim;
pub mod poly;
pub mod types;

#[cfg(test)]
mod tests;

pub use backends::{compile_as_c, generate_c};
pub use context::{Context, NameGenerator};
pub use core::{Function, Stage};
pub use error::CompileError;
pub use hlir::{Builder, Graph, Network, Session};
pub use optim::{Optimizer, Pass};
