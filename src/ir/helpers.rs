//! Small analyses and rewrites shared by the passes.

use rustc_hash::FxHashMap;

use super::{BinOpr, Expr, ExprKind, Mutate, Visit, mutate_children, walk_children};

/// Replace every subtree structurally equal to `from` with `to`.
pub fn replace_expr(root: &mut Expr, from: &Expr, to: &Expr) {
    struct Replacer<'a> {
        from: &'a Expr,
        to: &'a Expr,
    }

    impl Mutate for Replacer<'_> {
        fn mutate(&mut self, expr: &mut Expr) {
            if expr == self.from {
                *expr = self.to.deep_copy();
                return;
            }
            mutate_children(self, expr);
        }
    }

    Replacer { from, to }.mutate(root);
}

/// Replace every variable named `name` with `to`.
pub fn replace_var(root: &mut Expr, name: &str, to: &Expr) {
    struct Replacer<'a> {
        name: &'a str,
        to: &'a Expr,
    }

    impl Mutate for Replacer<'_> {
        fn mutate(&mut self, expr: &mut Expr) {
            if let ExprKind::Var(v) = &expr.kind
                && v.name() == self.name
            {
                *expr = self.to.deep_copy();
                return;
            }
            mutate_children(self, expr);
        }
    }

    Replacer { name, to }.mutate(root);
}

/// Collect a copy of every `Reference` node under `expr`.
pub fn collect_references(expr: &Expr) -> Vec<Expr> {
    struct Collector {
        found: Vec<Expr>,
    }

    impl Visit for Collector {
        fn visit(&mut self, expr: &Expr) {
            if expr.is_reference() {
                self.found.push(expr.clone());
            }
            walk_children(self, expr);
        }
    }

    let mut collector = Collector { found: Vec::new() };
    collector.visit(expr);
    collector.found
}

/// Recognize a loop with immediate bounds and unit increment.
///
/// Returns `(element_count, init_value)` when `init` is an integer
/// immediate, the increment is 1, and the condition compares the iterator
/// against an integer immediate with `<=` or `<`.
pub fn is_constant_for(expr: &Expr) -> Option<(i64, i64)> {
    let ExprKind::For {
        init, cond, inc, ..
    } = &expr.kind
    else {
        return None;
    };
    let init_value: i64 = init.int_value()?;
    if inc.int_value::<i64>()? != 1 {
        return None;
    }
    let ExprKind::Binary { op, a, b } = &cond.kind else {
        return None;
    };
    a.as_var()?;
    let bound: i64 = b.int_value()?;
    let count = match op {
        BinOpr::LE => bound - init_value + 1,
        BinOpr::LT => bound - init_value,
        _ => return None,
    };
    (count >= 1).then_some((count, init_value))
}

/// The linear form of an integer expression: variable coefficients plus a
/// constant, or `None` when the expression is not affine.
pub fn linear_terms(expr: &Expr) -> Option<(FxHashMap<String, i64>, i64)> {
    match &expr.kind {
        ExprKind::IntImm(_) | ExprKind::Constant(_) => {
            Some((FxHashMap::default(), expr.int_value()?))
        }
        ExprKind::Var(v) => {
            let mut coeffs = FxHashMap::default();
            coeffs.insert(v.name().to_owned(), 1);
            Some((coeffs, 0))
        }
        ExprKind::Binary { op, a, b } => {
            let (mut ca, ka) = linear_terms(a)?;
            let (cb, kb) = linear_terms(b)?;
            match op {
                BinOpr::Add => {
                    for (name, c) in cb {
                        *ca.entry(name).or_insert(0) += c;
                    }
                    Some((ca, ka + kb))
                }
                BinOpr::Sub => {
                    for (name, c) in cb {
                        *ca.entry(name).or_insert(0) -= c;
                    }
                    Some((ca, ka - kb))
                }
                BinOpr::Mul => {
                    // one side must be constant to stay affine
                    if ca.is_empty() {
                        let mut scaled = cb;
                        for c in scaled.values_mut() {
                            *c *= ka;
                        }
                        Some((scaled, ka * kb))
                    } else if cb.is_empty() {
                        for c in ca.values_mut() {
                            *c *= kb;
                        }
                        Some((ca, ka * kb))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// The coefficient of `var` in `expr`, when `expr` is affine; absent
/// variables have coefficient 0.
pub fn coeff_of_var(expr: &Expr, var: &str) -> Option<i64> {
    let (coeffs, _) = linear_terms(expr)?;
    Some(coeffs.get(var).copied().unwrap_or(0))
}

/// Fold integer-constant arithmetic and drop additive/multiplicative
/// identities. Run after unrolling so the expanded bodies read plainly.
pub fn simplify(root: &mut Expr) {
    struct Folder;

    impl Mutate for Folder {
        fn mutate(&mut self, expr: &mut Expr) {
            mutate_children(self, expr);
            let ptype = expr.ptype();
            let replacement = {
                let ExprKind::Binary { op, a, b } = &expr.kind else {
                    return;
                };
                let (ia, ib) = (a.int_value::<i64>(), b.int_value::<i64>());
                let folded = match (op, ia, ib) {
                    (BinOpr::Add, Some(x), Some(y)) => Some(x + y),
                    (BinOpr::Sub, Some(x), Some(y)) => Some(x - y),
                    (BinOpr::Mul, Some(x), Some(y)) => Some(x * y),
                    (BinOpr::Div, Some(x), Some(y)) if y != 0 => Some(x / y),
                    (BinOpr::Mod, Some(x), Some(y)) if y != 0 => Some(x % y),
                    (BinOpr::Min, Some(x), Some(y)) => Some(x.min(y)),
                    (BinOpr::Max, Some(x), Some(y)) => Some(x.max(y)),
                    _ => None,
                };
                if let Some(v) = folded {
                    let mut imm = Expr::int(v);
                    imm.set_ptype(ptype);
                    Some(imm)
                } else {
                    match (op, ia, ib) {
                        (BinOpr::Add, Some(0), _) => Some((**b).clone()),
                        (BinOpr::Add | BinOpr::Sub, _, Some(0)) => Some((**a).clone()),
                        (BinOpr::Mul, Some(1), _) => Some((**b).clone()),
                        (BinOpr::Mul, _, Some(1)) | (BinOpr::Div, _, Some(1)) => {
                            Some((**a).clone())
                        }
                        (BinOpr::Mul, Some(0), _) | (BinOpr::Mul, _, Some(0)) => {
                            Some(Expr::int(0))
                        }
                        _ => None,
                    }
                }
            };
            if let Some(r) = replacement {
                *expr = r;
            }
        }
    }

    Folder.mutate(root);
}

#[cfg(test)]
mod tests {
    use super::super::{Var, dump};
    use super::*;
    use crate::types::Primitive;

    fn ivar(name: &str) -> Expr {
        Var::new(name, Primitive::Int32).into()
    }

    #[test]
    fn constant_for_detection() {
        let i: Expr = Var::new("i", Primitive::Int32).into();
        let cond = Expr::binary(BinOpr::LE, i.clone(), Expr::int(7)).unwrap();
        let body = Expr::call("f", vec![i.clone()]);
        let f = Expr::for_loop(Expr::int(0), cond, Expr::int(1), body, i.clone());
        assert_eq!(is_constant_for(&f), Some((8, 0)));

        // strided loops are not constant in this sense
        let cond = Expr::binary(BinOpr::LE, i.clone(), Expr::int(192)).unwrap();
        let f = Expr::for_loop(Expr::int(0), cond, Expr::int(32), Expr::block(vec![]), i);
        assert_eq!(is_constant_for(&f), None);
    }

    #[test]
    fn affine_coefficients() {
        // (i * 200) + j
        let e = Expr::binary(
            BinOpr::Add,
            Expr::binary(BinOpr::Mul, ivar("i"), Expr::int(200)).unwrap(),
            ivar("j"),
        )
        .unwrap();
        assert_eq!(coeff_of_var(&e, "i"), Some(200));
        assert_eq!(coeff_of_var(&e, "j"), Some(1));
        assert_eq!(coeff_of_var(&e, "k"), Some(0));

        // i * j is not affine
        let e = Expr::binary(BinOpr::Mul, ivar("i"), ivar("j")).unwrap();
        assert_eq!(coeff_of_var(&e, "i"), None);
    }

    #[test]
    fn simplify_folds_identities() {
        let mut e = Expr::binary(
            BinOpr::Add,
            Expr::binary(BinOpr::Mul, Expr::int(0), Expr::int(150)).unwrap(),
            ivar("k"),
        )
        .unwrap();
        simplify(&mut e);
        assert_eq!(dump(&e), "k");

        let mut e = Expr::binary(BinOpr::Mul, Expr::int(3), Expr::int(200)).unwrap();
        simplify(&mut e);
        assert_eq!(dump(&e), "600");
    }

    #[test]
    fn replace_var_rewrites_everywhere() {
        let mut e = Expr::binary(BinOpr::Add, ivar("i"), ivar("i")).unwrap();
        replace_var(&mut e, "i", &Expr::int(4));
        simplify(&mut e);
        assert_eq!(dump(&e), "8");
    }
}
