//! Rewrite marked point loops into SIMD operations.

use log::debug;

use crate::context::Context;
use crate::error::CompileError;
use crate::ir::{
    AssignOpr, BinOpr, Expr, ExprKind, Mutate, REFERENCE_ADDRESS, SimdOpr, coeff_of_var,
    mutate_children,
};
use crate::types::{Composite, simd_type_for_width};

use super::Pass;

/// For a loop preceded by a mark containing `"vectorize - points"`:
/// replace the body's arithmetic with SIMD operations of the loop's width,
/// cast scalar operands lane-wise, turn unit-stride reference reads into
/// SIMD loads from the reference's address, turn the assignments into SIMD
/// stores, and drop the loop (the SIMD width covers its extent).
pub struct Vectorize;

impl Pass for Vectorize {
    fn name(&self) -> &'static str {
        "vectorize"
    }

    fn run(&mut self, expr: &mut Expr, _ctx: &Context) -> Result<(), CompileError> {
        let mut rewriter = Rewriter { error: None };
        rewriter.mutate(expr);
        match rewriter.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct Rewriter {
    error: Option<CompileError>,
}

impl Mutate for Rewriter {
    fn mutate(&mut self, expr: &mut Expr) {
        if self.error.is_some() {
            return;
        }
        let ExprKind::Block(exprs) = &mut expr.kind else {
            mutate_children(self, expr);
            return;
        };
        let mut i = 0;
        while i < exprs.len() {
            let is_points_mark = matches!(
                &exprs[i].kind,
                ExprKind::Mark(content) if content.contains("vectorize - points")
            );
            if is_points_mark && i + 1 < exprs.len() && exprs[i + 1].is_for() {
                match vectorize_loop(&exprs[i + 1]) {
                    Ok(Some(replacement)) => exprs[i + 1] = replacement,
                    Ok(None) => {}
                    Err(err) => {
                        self.error = Some(err);
                        return;
                    }
                }
                i += 2;
                continue;
            }
            self.mutate(&mut exprs[i]);
            i += 1;
        }
    }
}

/// The width of a zero-based point loop `for (c = 0; c <= w-1; c += 1)`.
fn loop_width(expr: &Expr) -> Option<i64> {
    let (count, init) = crate::ir::is_constant_for(expr)?;
    (init == 0).then_some(count)
}

/// Rewrite one marked loop; `None` when the loop is not vectorizable and
/// stays scalar.
fn vectorize_loop(for_expr: &Expr) -> Result<Option<Expr>, CompileError> {
    let Some(width) = loop_width(for_expr) else {
        return Ok(None);
    };
    if !matches!(width, 4 | 8) {
        return Ok(None);
    }
    let width = width as usize;

    let ExprKind::For {
        body, iterator, ..
    } = &for_expr.kind
    else {
        return Ok(None);
    };
    let Some(iter_name) = iterator.as_var().map(|v| v.name().to_owned()) else {
        return Ok(None);
    };
    let ExprKind::Block(stmts) = &body.kind else {
        return Ok(None);
    };

    if !stmts.iter().all(|s| vectorizable_stmt(s, &iter_name)) {
        debug!("loop over {iter_name} is not vectorizable, leaving it scalar");
        return Ok(None);
    }

    let mut rewritten = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        let ExprKind::Assign { op, a, b } = &stmt.kind else {
            return Ok(None);
        };
        let value = vectorize_operand(b, width, &iter_name)?;
        let addr = Expr::identity((**a).clone(), REFERENCE_ADDRESS);
        let value = match op {
            AssignOpr::Assign => value,
            AssignOpr::SumAssign => Expr::simd_binary(
                width,
                SimdOpr::Add,
                Expr::simd_load(width, addr.clone())?,
                value,
            )?,
            AssignOpr::SubAssign => Expr::simd_binary(
                width,
                SimdOpr::Sub,
                Expr::simd_load(width, addr.clone())?,
                value,
            )?,
            AssignOpr::MulAssign => Expr::simd_binary(
                width,
                SimdOpr::Mul,
                Expr::simd_load(width, addr.clone())?,
                value,
            )?,
            AssignOpr::DivAssign => Expr::simd_binary(
                width,
                SimdOpr::Div,
                Expr::simd_load(width, addr.clone())?,
                value,
            )?,
        };
        let mut store = Expr::simd_store(width, addr, value)?;
        crate::ir::replace_var(&mut store, &iter_name, &Expr::int(0));
        rewritten.push(store);
    }
    Ok(Some(Expr::block(rewritten)))
}

/// A statement vectorizes when it is an assignment whose left-hand side is
/// a unit-stride reference and whose right-hand side uses only SIMD-
/// representable operations over loadable or loop-invariant operands.
fn vectorizable_stmt(stmt: &Expr, iter: &str) -> bool {
    let ExprKind::Assign { a, b, .. } = &stmt.kind else {
        return false;
    };
    is_loadable(a, iter) && vectorizable_operand(b, iter)
}

fn vectorizable_operand(expr: &Expr, iter: &str) -> bool {
    match &expr.kind {
        ExprKind::Binary { op, a, b } => {
            matches!(op, BinOpr::Add | BinOpr::Sub | BinOpr::Mul | BinOpr::Div)
                && vectorizable_operand(a, iter)
                && vectorizable_operand(b, iter)
        }
        ExprKind::Reference { .. } => is_loadable(expr, iter) || is_invariant(expr, iter),
        ExprKind::Var(_) | ExprKind::IntImm(_) | ExprKind::FloatImm(_) | ExprKind::Constant(_) => {
            true
        }
        _ => false,
    }
}

/// A reference is loadable when only its last index depends on the loop
/// iterator, linearly with coefficient 1.
fn is_loadable(expr: &Expr, iter: &str) -> bool {
    let ExprKind::Reference { iterators, .. } = &expr.kind else {
        return false;
    };
    let Some((last, rest)) = iterators.split_last() else {
        return false;
    };
    if !rest
        .iter()
        .all(|idx| coeff_of_var(idx, iter) == Some(0))
    {
        return false;
    }
    coeff_of_var(last, iter) == Some(1)
}

/// A reference is invariant when none of its indices depend on the loop
/// iterator.
fn is_invariant(expr: &Expr, iter: &str) -> bool {
    let ExprKind::Reference { iterators, .. } = &expr.kind else {
        return false;
    };
    iterators
        .iter()
        .all(|idx| coeff_of_var(idx, iter) == Some(0))
}

fn vectorize_operand(expr: &Expr, width: usize, iter: &str) -> Result<Expr, CompileError> {
    match &expr.kind {
        ExprKind::Binary { op, a, b } => {
            let op = match op {
                BinOpr::Add => SimdOpr::Add,
                BinOpr::Sub => SimdOpr::Sub,
                BinOpr::Mul => SimdOpr::Mul,
                BinOpr::Div => SimdOpr::Div,
                other => {
                    return Err(CompileError::type_error(format!(
                        "operation {other:?} has no SIMD form"
                    )));
                }
            };
            Expr::simd_binary(
                width,
                op,
                vectorize_operand(a, width, iter)?,
                vectorize_operand(b, width, iter)?,
            )
        }
        ExprKind::Reference { .. } if is_loadable(expr, iter) => {
            Expr::simd_load(width, Expr::identity(expr.clone(), REFERENCE_ADDRESS))
        }
        _ => {
            // scalars (and invariant references) broadcast lane-wise
            let simd = simd_type_for_width(width, expr.ptype())?;
            debug_assert!(matches!(simd, Composite::Simd128 | Composite::Simd256));
            Expr::cast(expr.clone(), expr.ptype(), simd)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, Tensor, Var, dump};
    use crate::types::Primitive;

    /// `C[(c0*200)+c1+c2] = (A[…] + B[…]) * B[…]` inside the marked loop.
    fn marked_loop() -> Expr {
        let shape = || vec![Constant::int(100), Constant::int(200)];
        let a = Tensor::new("A", shape(), Primitive::Float32);
        let b = Tensor::new("B", shape(), Primitive::Float32);
        let c = Tensor::new("C", shape(), Primitive::Float32);
        let c0: Expr = Var::new("c0", Primitive::Int32).into();
        let c1: Expr = Var::new("c1", Primitive::Int32).into();
        let c2: Expr = Var::new("c2", Primitive::Int32).into();
        let index = Expr::binary(
            BinOpr::Add,
            Expr::binary(
                BinOpr::Add,
                Expr::binary(BinOpr::Mul, c0.clone(), Expr::int(200)).unwrap(),
                c1.clone(),
            )
            .unwrap(),
            c2.clone(),
        )
        .unwrap();
        let aref = Expr::from(a).at([index.clone()]).unwrap();
        let bref = Expr::from(b).at([index.clone()]).unwrap();
        let cref = Expr::from(c).at([index]).unwrap();
        let rhs = (aref + bref.clone()) * bref;
        let stmt = Expr::assign(AssignOpr::Assign, cref, rhs).unwrap();
        let cond = Expr::binary(BinOpr::LE, c2.clone(), Expr::int(7)).unwrap();
        let body = Expr::block(vec![stmt]);
        Expr::for_loop(Expr::int(0), cond, Expr::int(1), body, c2)
    }

    #[test]
    fn marked_loop_is_rewritten() {
        let mut block = Expr::block(vec![Expr::mark("vectorize - points"), marked_loop()]);
        Vectorize.run(&mut block, &Context::new()).unwrap();
        let text = dump(&block);
        assert!(text.contains("simd_store8"));
        assert!(text.contains("simd_mul_8"));
        assert!(text.contains("simd_add_8"));
        assert!(text.contains("simd_load8"));
        // the vector iterator is gone
        assert!(!text.contains("c2"));
        assert!(!text.contains("for("));
    }

    #[test]
    fn unmarked_loop_stays_scalar() {
        let mut block = Expr::block(vec![marked_loop()]);
        Vectorize.run(&mut block, &Context::new()).unwrap();
        assert!(dump(&block).contains("for("));
    }

    #[test]
    fn loadability_requires_unit_stride() {
        let t = Tensor::new("T", vec![Constant::int(64)], Primitive::Float32);
        let c0: Expr = Var::new("c0", Primitive::Int32).into();
        let strided = Expr::binary(BinOpr::Mul, c0.clone(), Expr::int(2)).unwrap();
        let r = Expr::from(t).at([strided]).unwrap();
        assert!(!is_loadable(&r, "c0"));
    }
}
