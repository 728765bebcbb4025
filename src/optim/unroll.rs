//! Expand small constant loops into straight-line copies.

use crate::context::Context;
use crate::error::CompileError;
use crate::ir::{Expr, ExprKind, Mutate, mutate_children};

use super::Pass;

const UNROLL_MIN_EXTENT: i64 = 2;
const UNROLL_MAX_EXTENT: i64 = 30;

/// Replace a constant-bounded unit-step loop whose element count lies in
/// `[2, 30]` with a block of copies of the body, the loop variable
/// substituted by `init, init+1, …`. Constants fold afterwards so the
/// expanded bodies read plainly.
pub struct Unroll;

impl Pass for Unroll {
    fn name(&self) -> &'static str {
        "unroll"
    }

    fn run(&mut self, expr: &mut Expr, _ctx: &Context) -> Result<(), CompileError> {
        Expander.mutate(expr);
        crate::ir::simplify(expr);
        Ok(())
    }
}

struct Expander;

impl Mutate for Expander {
    fn mutate(&mut self, expr: &mut Expr) {
        if expr.is_for()
            && let Some((count, init)) = crate::ir::is_constant_for(expr)
            && (UNROLL_MIN_EXTENT..=UNROLL_MAX_EXTENT).contains(&count)
        {
            let ExprKind::For { body, iterator, .. } = &expr.kind else {
                return;
            };
            let Some(iter_name) = iterator.as_var().map(|v| v.name().to_owned()) else {
                return;
            };
            let mut copies = Vec::new();
            for i in 0..count {
                let mut copy = body.deep_copy();
                crate::ir::replace_var(&mut copy, &iter_name, &Expr::int(init + i));
                match copy.kind {
                    ExprKind::Block(stmts) => copies.extend(stmts),
                    _ => copies.push(copy),
                }
            }
            *expr = Expr::block(copies);
            // copies may hold further unrollable loops
            self.mutate(expr);
            return;
        }
        mutate_children(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AssignOpr, BinOpr, Constant, Tensor, Var, Visit, dump, walk_children};
    use crate::types::Primitive;

    fn counted_loop(extent: i64, step: i64) -> Expr {
        let t = Tensor::new("T", vec![Constant::int(64)], Primitive::Float32);
        let i: Expr = Var::new("i", Primitive::Int32).into();
        let stmt = Expr::assign(
            AssignOpr::SumAssign,
            Expr::from(t).at([i.clone()]).unwrap(),
            Expr::float32(1.0),
        )
        .unwrap();
        let cond = Expr::binary(BinOpr::LE, i.clone(), Expr::int(extent - 1)).unwrap();
        Expr::for_loop(Expr::int(0), cond, Expr::int(step), Expr::block(vec![stmt]), i)
    }

    struct SmallLoopDetector {
        found: bool,
    }

    impl Visit for SmallLoopDetector {
        fn visit(&mut self, expr: &Expr) {
            if let Some((count, _)) = crate::ir::is_constant_for(expr)
                && (2..=30).contains(&count)
            {
                self.found = true;
            }
            walk_children(self, expr);
        }
    }

    #[test]
    fn small_loops_unroll() {
        let mut e = counted_loop(4, 1);
        Unroll.run(&mut e, &Context::new()).unwrap();
        let text = dump(&e);
        assert!(text.contains("T<64>[0] += 1;"));
        assert!(text.contains("T<64>[3] += 1;"));
        let mut detector = SmallLoopDetector { found: false };
        detector.visit(&e);
        assert!(!detector.found);
    }

    #[test]
    fn large_and_strided_loops_stay() {
        let mut e = counted_loop(100, 1);
        Unroll.run(&mut e, &Context::new()).unwrap();
        assert!(e.is_for());

        // tile loops step by the tile size and are left alone
        let mut e = counted_loop(64, 32);
        Unroll.run(&mut e, &Context::new()).unwrap();
        assert!(e.is_for());
    }
}
