//! Hoist repeated reference-index sub-expressions into `let` bindings.

use std::collections::BTreeMap;

use crate::context::Context;
use crate::error::CompileError;
use crate::ir::{Expr, ExprKind, Var, dump};

use super::Pass;

/// Inside each block, intern every arithmetic sub-expression appearing in
/// a reference's iterator chain; pieces whose frequency within the block
/// meets the threshold get a fresh variable bound by a `let` prepended at
/// the block head, and every occurrence is replaced by the variable.
///
/// Pieces belong to their innermost enclosing block.
pub struct FoldReferenceIndices {
    threshold: usize,
}

impl Default for FoldReferenceIndices {
    fn default() -> Self {
        FoldReferenceIndices { threshold: 10 }
    }
}

impl FoldReferenceIndices {
    pub fn with_threshold(threshold: usize) -> Self {
        FoldReferenceIndices { threshold }
    }
}

impl Pass for FoldReferenceIndices {
    fn name(&self) -> &'static str {
        "fold_reference_indices"
    }

    fn run(&mut self, expr: &mut Expr, ctx: &Context) -> Result<(), CompileError> {
        process(expr, self.threshold, ctx);
        Ok(())
    }
}

/// Recurse looking for blocks; each block is processed independently.
fn process(expr: &mut Expr, threshold: usize, ctx: &Context) {
    if let ExprKind::Block(exprs) = &mut expr.kind {
        process_block(exprs, threshold, ctx);
        return;
    }
    for_each_child(expr, |child| process(child, threshold, ctx));
}

fn process_block(exprs: &mut Vec<Expr>, threshold: usize, ctx: &Context) {
    // inner blocks own their pieces; handle them first
    for e in exprs.iter_mut() {
        for_each_child(e, |child| process(child, threshold, ctx));
    }

    // count arithmetic pieces inside reference iterators, stopping at
    // nested blocks
    let mut counter: BTreeMap<String, (Expr, usize)> = BTreeMap::new();
    for e in exprs.iter() {
        collect(e, false, &mut counter);
    }

    let mut lets = Vec::new();
    let mut replacements: Vec<(String, Expr)> = Vec::new();
    for (key, (piece, count)) in &counter {
        if *count >= threshold {
            let name = ctx.new_var_name();
            let var: Expr = Var::new(name, piece.ptype()).into();
            if let Ok(binding) = Expr::let_bind(var.clone(), piece.clone()) {
                lets.push(binding);
                replacements.push((key.clone(), var));
            }
        }
    }
    if lets.is_empty() {
        return;
    }

    for e in exprs.iter_mut() {
        replace(e, false, &replacements);
    }
    exprs.splice(0..0, lets);
}

fn is_piece(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Binary { .. } | ExprKind::Unary { .. }
    )
}

fn collect(expr: &Expr, inside_reference: bool, counter: &mut BTreeMap<String, (Expr, usize)>) {
    match &expr.kind {
        ExprKind::Block(_) => {}
        ExprKind::Reference { iterators, .. } => {
            for iter in iterators {
                collect(iter, true, counter);
            }
        }
        _ => {
            if inside_reference && is_piece(expr) {
                let entry = counter
                    .entry(dump(expr))
                    .or_insert_with(|| (expr.clone(), 0));
                entry.1 += 1;
            }
            for_each_child_ref(expr, |child| collect(child, inside_reference, counter));
        }
    }
}

fn replace(expr: &mut Expr, inside_reference: bool, replacements: &[(String, Expr)]) {
    match &mut expr.kind {
        ExprKind::Block(_) => {}
        ExprKind::Reference { iterators, .. } => {
            for iter in iterators {
                replace(iter, true, replacements);
            }
        }
        _ => {
            if inside_reference && is_piece(expr) {
                let key = dump(expr);
                if let Some((_, var)) = replacements.iter().find(|(k, _)| *k == key) {
                    *expr = var.deep_copy();
                    return;
                }
            }
            for_each_child_mut(expr, &mut |child| replace(child, inside_reference, replacements));
        }
    }
}

fn for_each_child(expr: &mut Expr, mut f: impl FnMut(&mut Expr)) {
    for_each_child_mut(expr, &mut f);
}

fn for_each_child_mut(expr: &mut Expr, f: &mut impl FnMut(&mut Expr)) {
    use crate::ir::{Mutate, mutate_children};

    struct Shim<'a, F>(&'a mut F);
    impl<F: FnMut(&mut Expr)> Mutate for Shim<'_, F> {
        fn mutate(&mut self, expr: &mut Expr) {
            (self.0)(expr);
        }
    }
    mutate_children(&mut Shim(f), expr);
}

fn for_each_child_ref(expr: &Expr, f: impl FnMut(&Expr)) {
    use crate::ir::{Visit, walk_children};

    struct Shim<F>(F);
    impl<F: FnMut(&Expr)> Visit for Shim<F> {
        fn visit(&mut self, expr: &Expr) {
            (self.0)(expr);
        }
    }
    walk_children(&mut Shim(f), expr);
}
