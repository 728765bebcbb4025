//! Splice the statements of nested blocks into their parent.

use crate::context::Context;
use crate::error::CompileError;
use crate::ir::{Expr, ExprKind, Mutate, mutate_children};

use super::Pass;

/// In a block containing block children, splice the child's expressions
/// into the parent, repeating until no block has an immediate block child.
pub struct NestedBlockClean;

impl Pass for NestedBlockClean {
    fn name(&self) -> &'static str {
        "nested_block_clean"
    }

    fn run(&mut self, expr: &mut Expr, _ctx: &Context) -> Result<(), CompileError> {
        Cleaner.mutate(expr);
        Ok(())
    }
}

struct Cleaner;

impl Mutate for Cleaner {
    fn mutate(&mut self, expr: &mut Expr) {
        if let ExprKind::Block(exprs) = &mut expr.kind {
            while exprs.iter().any(Expr::is_block) {
                let drained = std::mem::take(exprs);
                for e in drained {
                    match e.kind {
                        ExprKind::Block(inner) => exprs.extend(inner),
                        _ => exprs.push(e),
                    }
                }
            }
        }
        mutate_children(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Visit, walk_children};

    struct NestedBlockDetector {
        found: bool,
    }

    impl Visit for NestedBlockDetector {
        fn visit(&mut self, expr: &Expr) {
            if let ExprKind::Block(exprs) = &expr.kind
                && exprs.iter().any(Expr::is_block)
            {
                self.found = true;
            }
            walk_children(self, expr);
        }
    }

    #[test]
    fn cleans_to_fixpoint() {
        let leaf = Expr::mark("x");
        let mut tree = Expr::block(vec![
            Expr::block(vec![Expr::block(vec![leaf.clone()]), leaf.clone()]),
            leaf.clone(),
        ]);
        NestedBlockClean
            .run(&mut tree, &Context::new())
            .unwrap();
        let mut detector = NestedBlockDetector { found: false };
        detector.visit(&tree);
        assert!(!detector.found);
        let ExprKind::Block(exprs) = &tree.kind else {
            panic!("block");
        };
        assert_eq!(exprs.len(), 3);
    }
}
