//! Traversal scaffolding for the IR.
//!
//! Two flavors, mirroring the read-only and rewriting halves of a pass:
//!
//! - [`Visit`]: read-only; the default [`walk_children`] descends into
//!   every child in source order.
//! - [`Mutate`]: each visit receives a mutable node and may replace the
//!   subtree in place; [`mutate_children`] recurses by default.
//!
//! A pass implements the trait, matches the kinds it cares about, and calls
//! the walk function for everything else.

use super::{Expr, ExprKind};

/// Read-only expression visitor.
pub trait Visit {
    fn visit(&mut self, expr: &Expr) {
        walk_children(self, expr);
    }
}

/// Default traversal: visit every child of `expr` in source order.
pub fn walk_children<V: Visit + ?Sized>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::IntImm(_)
        | ExprKind::FloatImm(_)
        | ExprKind::BoolImm(_)
        | ExprKind::Constant(_)
        | ExprKind::Var(_)
        | ExprKind::Tensor(_)
        | ExprKind::Mark(_) => {}
        ExprKind::Array { size, .. } => visitor.visit(size),
        ExprKind::Binary { a, b, .. } | ExprKind::Assign { a, b, .. } | ExprKind::Let { a, b } => {
            visitor.visit(a);
            visitor.visit(b);
        }
        ExprKind::Unary { a, .. } => visitor.visit(a),
        ExprKind::Reference { target, iterators } => {
            visitor.visit(target);
            for iter in iterators {
                visitor.visit(iter);
            }
        }
        ExprKind::For {
            init,
            cond,
            inc,
            body,
            iterator,
        } => {
            visitor.visit(iterator);
            visitor.visit(init);
            visitor.visit(cond);
            visitor.visit(inc);
            visitor.visit(body);
        }
        ExprKind::IfThenElse {
            condition,
            true_block,
            false_block,
        } => {
            visitor.visit(condition);
            visitor.visit(true_block);
            if let Some(e) = false_block {
                visitor.visit(e);
            }
        }
        ExprKind::Block(exprs) => {
            for e in exprs {
                visitor.visit(e);
            }
        }
        ExprKind::Call { arguments, .. } => {
            for arg in arguments {
                visitor.visit(arg);
            }
        }
        ExprKind::Function(func) => {
            for x in &func.inputs {
                visitor.visit(x);
            }
            for x in &func.outputs {
                visitor.visit(x);
            }
            visitor.visit(&func.body);
        }
        ExprKind::CallOnce { block, .. } => visitor.visit(block),
        ExprKind::SimdOp { a, b, .. } => {
            visitor.visit(a);
            if let Some(b) = b {
                visitor.visit(b);
            }
        }
        ExprKind::Identity { expr: inner, .. } | ExprKind::Cast(inner) => visitor.visit(inner),
        ExprKind::Allocate { size, .. } => visitor.visit(size),
        ExprKind::BufferOpr { size, .. } => {
            if let Some(size) = size {
                visitor.visit(size);
            }
        }
        ExprKind::Module {
            global_data,
            functions,
        } => {
            visitor.visit(global_data);
            visitor.visit(functions);
        }
    }
}

/// In-place rewriting visitor.
pub trait Mutate {
    fn mutate(&mut self, expr: &mut Expr) {
        mutate_children(self, expr);
    }
}

/// Default traversal: mutate every child of `expr` in source order.
pub fn mutate_children<M: Mutate + ?Sized>(mutator: &mut M, expr: &mut Expr) {
    match &mut expr.kind {
        ExprKind::IntImm(_)
        | ExprKind::FloatImm(_)
        | ExprKind::BoolImm(_)
        | ExprKind::Constant(_)
        | ExprKind::Var(_)
        | ExprKind::Tensor(_)
        | ExprKind::Mark(_) => {}
        ExprKind::Array { size, .. } => mutator.mutate(size),
        ExprKind::Binary { a, b, .. } | ExprKind::Assign { a, b, .. } | ExprKind::Let { a, b } => {
            mutator.mutate(a);
            mutator.mutate(b);
        }
        ExprKind::Unary { a, .. } => mutator.mutate(a),
        ExprKind::Reference { target, iterators } => {
            mutator.mutate(target);
            for iter in iterators {
                mutator.mutate(iter);
            }
        }
        ExprKind::For {
            init,
            cond,
            inc,
            body,
            iterator,
        } => {
            mutator.mutate(iterator);
            mutator.mutate(init);
            mutator.mutate(cond);
            mutator.mutate(inc);
            mutator.mutate(body);
        }
        ExprKind::IfThenElse {
            condition,
            true_block,
            false_block,
        } => {
            mutator.mutate(condition);
            mutator.mutate(true_block);
            if let Some(e) = false_block {
                mutator.mutate(e);
            }
        }
        ExprKind::Block(exprs) => {
            for e in exprs {
                mutator.mutate(e);
            }
        }
        ExprKind::Call { arguments, .. } => {
            for arg in arguments {
                mutator.mutate(arg);
            }
        }
        ExprKind::Function(func) => {
            mutator.mutate(&mut func.body);
        }
        ExprKind::CallOnce { block, .. } => mutator.mutate(block),
        ExprKind::SimdOp { a, b, .. } => {
            mutator.mutate(a);
            if let Some(b) = b {
                mutator.mutate(b);
            }
        }
        ExprKind::Identity { expr: inner, .. } | ExprKind::Cast(inner) => mutator.mutate(inner),
        ExprKind::Allocate { size, .. } => mutator.mutate(size),
        ExprKind::BufferOpr { size, .. } => {
            if let Some(size) = size {
                mutator.mutate(size);
            }
        }
        ExprKind::Module {
            global_data,
            functions,
        } => {
            mutator.mutate(global_data);
            mutator.mutate(functions);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{BinOpr, Var};
    use super::*;
    use crate::types::Primitive;

    #[derive(Default)]
    struct VarCounter {
        count: usize,
    }

    impl Visit for VarCounter {
        fn visit(&mut self, expr: &Expr) {
            if matches!(expr.kind, ExprKind::Var(_)) {
                self.count += 1;
            }
            walk_children(self, expr);
        }
    }

    #[test]
    fn walk_reaches_all_vars() {
        let a: Expr = Var::new("a", Primitive::Int32).into();
        let b: Expr = Var::new("b", Primitive::Int32).into();
        let e = Expr::binary(
            BinOpr::Add,
            Expr::binary(BinOpr::Mul, a.clone(), b.clone()).unwrap(),
            a,
        )
        .unwrap();
        let mut counter = VarCounter::default();
        counter.visit(&e);
        assert_eq!(counter.count, 3);
    }

    struct Renamer;

    impl Mutate for Renamer {
        fn mutate(&mut self, expr: &mut Expr) {
            if let ExprKind::Var(v) = &expr.kind
                && v.name() == "a"
            {
                *expr = Expr::int(7);
                return;
            }
            mutate_children(self, expr);
        }
    }

    #[test]
    fn mutate_replaces_subtrees() {
        let a: Expr = Var::new("a", Primitive::Int32).into();
        let mut e = Expr::binary(BinOpr::Add, a, Expr::int(1)).unwrap();
        Renamer.mutate(&mut e);
        assert_eq!(super::super::dump(&e), "(7 + 1)");
    }
}
