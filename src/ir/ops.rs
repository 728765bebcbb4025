//! Operator overloading for expression building.
//!
//! The `std::ops` implementations delegate to the checked [`Expr::binary`]
//! and [`Expr::unary`] factories. Because `std::ops` signatures cannot
//! return `Result`, a type-rule violation (mismatched primitives without
//! an explicit cast) panics here — this is the single deliberate panicking
//! surface of the crate, kept for the interactive expression-building
//! style the sugar exists for. Every library code path that assembles
//! expressions from data it does not control (operator kernels, the
//! lowering, the passes) calls [`Expr::binary`]/[`Expr::unary`] directly
//! and propagates the `CompileError` instead; do the same anywhere the
//! operand types are not known statically. The panic message carries the
//! full `CompileError` text.

use std::ops;

use super::{BinOpr, Expr, UnOpr};

macro_rules! impl_binary_op {
    ($trait__:ident, $fn__:ident, $opr__:expr) => {
        impl ops::$trait__ for Expr {
            type Output = Expr;

            /// # Panics
            /// Panics when the operand types violate the IR type rules.
            /// Use [`Expr::binary`] to handle the mismatch as a
            /// `CompileError` instead.
            fn $fn__(self, rhs: Expr) -> Expr {
                match Expr::binary($opr__, self, rhs) {
                    Ok(e) => e,
                    Err(err) => panic!("{err}"),
                }
            }
        }
    };
}

impl_binary_op!(Add, add, BinOpr::Add);
impl_binary_op!(Sub, sub, BinOpr::Sub);
impl_binary_op!(Mul, mul, BinOpr::Mul);
impl_binary_op!(Div, div, BinOpr::Div);
impl_binary_op!(Rem, rem, BinOpr::Mod);

impl ops::Neg for Expr {
    type Output = Expr;

    /// # Panics
    /// Panics when the operand is not numeric. Use [`Expr::unary`] to
    /// handle the mismatch as a `CompileError` instead.
    fn neg(self) -> Expr {
        match Expr::unary(UnOpr::Minus, self) {
            Ok(e) => e,
            Err(err) => panic!("{err}"),
        }
    }
}

impl Expr {
    /// Subscript this expression: `T.at([i, j])` builds `T[i,j]`.
    pub fn at(&self, iterators: impl Into<Vec<Expr>>) -> Result<Expr, crate::error::CompileError> {
        Expr::reference(self.clone(), iterators.into())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Var, dump};
    use super::*;
    use crate::types::Primitive;

    #[test]
    fn overloaded_arithmetic() {
        let a: Expr = Var::new("a", Primitive::Float32).into();
        let b: Expr = Var::new("b", Primitive::Float32).into();
        let e = (a.clone() + b.clone()) * b;
        assert_eq!(dump(&e), "((a + b) * b)");
    }

    #[test]
    #[should_panic(expected = "mismatched primitive types")]
    fn overloaded_arithmetic_type_checks() {
        let a: Expr = Var::new("a", Primitive::Float32).into();
        let i: Expr = Var::new("i", Primitive::Int32).into();
        drop(a + i);
    }

    #[test]
    fn checked_factory_surfaces_the_same_mismatch() {
        let a: Expr = Var::new("a", Primitive::Float32).into();
        let i: Expr = Var::new("i", Primitive::Int32).into();
        assert!(Expr::binary(BinOpr::Add, a, i).is_err());
    }
}
