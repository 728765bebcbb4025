//! The polyhedral layer: integer sets, affine relations, schedule trees
//! and AST generation.
//!
//! Iteration spaces are represented as integer sets, schedules and data
//! accesses as affine relations, and loop transformations as rewrites of a
//! schedule tree. The engine is self-contained: the iteration domains of
//! this compiler are rectangular boxes with optional affine constraints,
//! and every schedule stays affine, so no external integer-set library is
//! needed.

mod ast;
mod map;
mod schedule;
mod set;

pub use ast::{AstExpr, AstNode, AstOp, build_ast};
pub use map::{AccessMap, AffExpr, Map};
pub use schedule::{Band, BandMember, BandOptions, MemberRole, ScheduleTree};
pub use set::{CmpOp, Cond, Set};
