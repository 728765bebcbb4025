//! Stages: one elementary computation each.
//!
//! A stage wraps an assignment expression together with its iteration
//! domain, its schedule, and its read/write access relations. Transform
//! directives (tile, interchange, vectorize, fuse, extra conditions) are
//! recorded on the stage and applied to the owning function's schedule
//! tree at compile time.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use log::trace;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::context::Context;
use crate::error::CompileError;
use crate::ir::{Expr, ExprKind, Var, Visit, walk_children};
use crate::poly::{AccessMap, AffExpr, Cond, Map, Set};

#[derive(Debug)]
pub(crate) struct StageData {
    pub name: String,
    pub expr: Expr,
    pub domain: Set,
    pub schedule: Map,
    pub read_access: Vec<AccessMap>,
    pub write_access: Vec<AccessMap>,
    pub tile_sizes: Vec<i64>,
    pub unroll: bool,
    pub vector_width: Option<i64>,
    pub vector_outer: Vec<i64>,
    pub transposes: Vec<(String, String)>,
    pub fuse_with: FxHashSet<String>,
    pub call_once: bool,
    pub indice_map: FxHashMap<String, Expr>,
    pub frozen: bool,
}

/// A cheap-clone handle to one stage; clones share the underlying data.
#[derive(Debug, Clone)]
pub struct Stage {
    data: Rc<RefCell<StageData>>,
}

impl Stage {
    /// Build a stage from an assignment expression, extract its iteration
    /// domain and access relations, and register it with the context.
    ///
    /// The domain comes from the intervals of the iterator variables that
    /// appear in the subscripts, left-hand side first.
    pub fn from_expr(ctx: &Context, expr: Expr) -> Result<Stage, CompileError> {
        let ExprKind::Assign { a, b, .. } = &expr.kind else {
            return Err(CompileError::domain(
                "a stage must be built from an assignment expression",
            ));
        };
        let ExprKind::Reference { target, iterators } = &a.kind else {
            return Err(CompileError::domain(
                "the left-hand side of a stage expression must be a tensor reference",
            ));
        };
        let Some(written) = target.as_tensor() else {
            return Err(CompileError::domain(
                "the left-hand side reference of a stage must target a tensor",
            ));
        };

        let name = ctx.new_stage_name();
        trace!("stage {name}: extracting domain from {expr}");

        // Iterators in order of first appearance in the subscripts.
        let mut iters: Vec<Var> = Vec::new();
        let mut seen: FxHashSet<String> = FxHashSet::default();
        for sub in iterators {
            collect_subscript_vars(sub, &mut iters, &mut seen);
        }
        for reference in crate::ir::collect_references(b) {
            if let ExprKind::Reference { iterators, .. } = &reference.kind {
                for sub in iterators {
                    collect_subscript_vars(sub, &mut iters, &mut seen);
                }
            }
        }
        if iters.is_empty() {
            return Err(CompileError::domain(format!(
                "stage '{name}' has no iterators in its subscripts"
            )));
        }

        let mut triples = Vec::with_capacity(iters.len());
        for var in &iters {
            let Some(interval) = var.interval() else {
                return Err(CompileError::domain(format!(
                    "iterator '{}' of stage '{name}' has no interval; bounds must be \
                     integer literals",
                    var.name()
                )));
            };
            triples.push((var.name().to_owned(), interval.lower, interval.upper));
        }
        let domain = Set::new(name.clone(), &triples)?;
        let schedule = Map::identity_with_betas(&domain);

        let write_access = vec![access_of(&name, &domain, written.name(), iterators)?];
        let mut read_access = Vec::new();
        for reference in crate::ir::collect_references(b) {
            if let ExprKind::Reference { target, iterators } = &reference.kind
                && let Some(t) = target.as_tensor()
            {
                read_access.push(access_of(&name, &domain, t.name(), iterators)?);
            }
        }

        let stage = Stage {
            data: Rc::new(RefCell::new(StageData {
                name,
                expr,
                domain,
                schedule,
                read_access,
                write_access,
                tile_sizes: Vec::new(),
                unroll: false,
                vector_width: None,
                vector_outer: Vec::new(),
                transposes: Vec::new(),
                fuse_with: FxHashSet::default(),
                call_once: false,
                indice_map: FxHashMap::default(),
                frozen: false,
            })),
        };
        ctx.register_stage(stage.clone())?;
        Ok(stage)
    }

    pub fn name(&self) -> String {
        self.data.borrow().name.clone()
    }

    pub fn expr(&self) -> Expr {
        self.data.borrow().expr.clone()
    }

    pub fn domain(&self) -> Set {
        self.data.borrow().domain.clone()
    }

    pub fn schedule(&self) -> Map {
        self.data.borrow().schedule.clone()
    }

    pub fn read_access(&self) -> Vec<AccessMap> {
        self.data.borrow().read_access.clone()
    }

    pub fn write_access(&self) -> Vec<AccessMap> {
        self.data.borrow().write_access.clone()
    }

    pub fn tile_sizes(&self) -> Vec<i64> {
        self.data.borrow().tile_sizes.clone()
    }

    pub fn unroll(&self) -> bool {
        self.data.borrow().unroll
    }

    pub fn vector_width(&self) -> Option<i64> {
        self.data.borrow().vector_width
    }

    pub fn vector_outer(&self) -> Vec<i64> {
        self.data.borrow().vector_outer.clone()
    }

    pub fn transposes(&self) -> Vec<(String, String)> {
        self.data.borrow().transposes.clone()
    }

    pub fn fuse_set(&self) -> FxHashSet<String> {
        self.data.borrow().fuse_with.clone()
    }

    pub fn is_call_once(&self) -> bool {
        self.data.borrow().call_once
    }

    pub fn indice_map(&self) -> FxHashMap<String, Expr> {
        self.data.borrow().indice_map.clone()
    }

    pub(crate) fn set_indice_map(&self, map: FxHashMap<String, Expr>) {
        self.data.borrow_mut().indice_map = map;
    }

    fn check_mutable(&self, what: &str) -> Result<(), CompileError> {
        if self.data.borrow().frozen {
            return Err(CompileError::schedule(format!(
                "{what} on stage '{}' after its transformed schedule was taken",
                self.data.borrow().name
            )));
        }
        Ok(())
    }

    /// Record tile sizes for the last `sizes.len()` dimensions.
    pub fn tile(&self, sizes: &[i64]) -> Result<(), CompileError> {
        self.check_mutable("tile")?;
        let data = &mut *self.data.borrow_mut();
        if sizes.is_empty() || sizes.len() > data.domain.n_dims() {
            return Err(CompileError::schedule(format!(
                "stage '{}' has {} dimensions, cannot tile {} of them",
                data.name,
                data.domain.n_dims(),
                sizes.len()
            )));
        }
        data.tile_sizes = sizes.to_vec();
        Ok(())
    }

    /// Tile and unroll the innermost point loops of the tiles.
    pub fn tile_unroll(&self, sizes: &[i64]) -> Result<(), CompileError> {
        self.tile(sizes)?;
        self.data.borrow_mut().unroll = true;
        Ok(())
    }

    /// Swap two loop dimensions, by name. The swap composes onto the
    /// schedule immediately and is replayed on the schedule tree.
    pub fn interchange(&self, dim0: &str, dim1: &str) -> Result<(), CompileError> {
        self.check_mutable("interchange")?;
        let data = &mut *self.data.borrow_mut();
        data.schedule.swap_range_dims(dim0, dim1)?;
        data.transposes.push((dim0.to_owned(), dim1.to_owned()));
        trace!(
            "stage {}: interchange {dim0} <-> {dim1}, schedule now {}",
            data.name, data.schedule
        );
        Ok(())
    }

    /// Swap two loop dimensions, by position in the domain.
    pub fn interchange_positions(&self, pos0: usize, pos1: usize) -> Result<(), CompileError> {
        let (a, b) = {
            let data = self.data.borrow();
            let dims = data.domain.dims();
            let get = |p: usize| {
                dims.get(p).cloned().ok_or_else(|| {
                    CompileError::schedule(format!(
                        "stage '{}' has no dimension {p}",
                        data.name
                    ))
                })
            };
            (get(pos0)?, get(pos1)?)
        };
        self.interchange(&a, &b)
    }

    /// Vectorize with `{outer…, width}`: the last size is the vector
    /// width, the remaining sizes tile the preceding dimensions.
    pub fn vectorize(&self, sizes: &[i64]) -> Result<(), CompileError> {
        self.check_mutable("vectorize")?;
        let Some((&width, outer)) = sizes.split_last() else {
            return Err(CompileError::config("vectorize needs at least a width"));
        };
        if !matches!(width, 4 | 8) {
            return Err(CompileError::config(format!(
                "vectorize width {width} not in {{4, 8}}"
            )));
        }
        let data = &mut *self.data.borrow_mut();
        if outer.len() + 1 > data.domain.n_dims() {
            return Err(CompileError::schedule(format!(
                "stage '{}' has {} dimensions, cannot vectorize with {} outer tiles",
                data.name,
                data.domain.n_dims(),
                outer.len()
            )));
        }
        data.vector_width = Some(width);
        data.vector_outer = outer.to_vec();
        Ok(())
    }

    /// Fuse this stage with another: they will share their loop nest.
    pub fn fuse_with(&self, other: &Stage) {
        self.data.borrow_mut().fuse_with.insert(other.name());
    }

    /// Append an extra condition on one iterator to the iteration domain,
    /// e.g. `set_cond(&i, "% 2 = 0")`.
    pub fn set_cond(&self, iterator: &Expr, cond: &str) -> Result<(), CompileError> {
        let Some(var) = iterator.as_var() else {
            return Err(CompileError::domain(
                "set_cond expects an iterator variable",
            ));
        };
        let cond = Cond::parse(var.name(), cond)?;
        self.data.borrow_mut().domain.add_cond(cond)
    }

    /// Run this stage only on the first invocation (weight preprocessing).
    pub fn set_call_once(&self, value: bool) {
        self.data.borrow_mut().call_once = value;
    }

    /// The schedule after all recorded transformations; freezes the stage.
    pub fn transformed_schedule(&self) -> Map {
        self.freeze();
        self.data.borrow().schedule.clone()
    }

    /// Make the schedule read-only; further transforms are rejected.
    pub(crate) fn freeze(&self) {
        self.data.borrow_mut().frozen = true;
    }

    pub(crate) fn set_beta(&self, value: i64) -> Result<(), CompileError> {
        self.data.borrow_mut().schedule.set_out_constant(0, value)
    }

    /// Render the domain and schedule in polyhedral notation.
    pub fn dump_schedule(&self) -> String {
        let data = self.data.borrow();
        format!("{}\n{}", data.domain, data.schedule)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.expr())
    }
}

/// Collect the variables of one subscript expression, in order of first
/// appearance.
fn collect_subscript_vars(expr: &Expr, out: &mut Vec<Var>, seen: &mut FxHashSet<String>) {
    struct Collector<'a> {
        out: &'a mut Vec<Var>,
        seen: &'a mut FxHashSet<String>,
    }

    impl Visit for Collector<'_> {
        fn visit(&mut self, expr: &Expr) {
            if let Some(var) = expr.as_var() {
                if self.seen.insert(var.name().to_owned()) {
                    self.out.push(var.clone());
                }
                return;
            }
            walk_children(self, expr);
        }
    }

    Collector { out, seen }.visit(expr);
}

/// The access relation of one reference, with indices as affine
/// expressions over the stage's domain dimensions.
fn access_of(
    stage: &str,
    domain: &Set,
    tensor: &str,
    subscripts: &[Expr],
) -> Result<AccessMap, CompileError> {
    let dims = domain.dims().to_vec();
    let mut indices = Vec::with_capacity(subscripts.len());
    for sub in subscripts {
        let Some((coeffs_by_name, constant)) = crate::ir::linear_terms(sub) else {
            return Err(CompileError::domain(format!(
                "subscript '{sub}' of tensor '{tensor}' in stage '{stage}' is not affine"
            )));
        };
        let mut coeffs = vec![0i64; dims.len()];
        for (name, c) in coeffs_by_name {
            let Some(pos) = domain.dim_index(&name) else {
                return Err(CompileError::domain(format!(
                    "subscript of '{tensor}' uses '{name}' which is not an iterator of \
                     stage '{stage}'"
                )));
            };
            coeffs[pos] = c;
        }
        indices.push(AffExpr::from_parts(coeffs, constant));
    }
    Ok(AccessMap::new(stage, dims, tensor, indices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AssignOpr, Constant, Tensor};
    use crate::types::Primitive;

    fn matmul_stage(ctx: &Context) -> Stage {
        let a = Tensor::new(
            "A",
            vec![Constant::int(100), Constant::int(150)],
            Primitive::Float32,
        );
        let b = Tensor::new(
            "B",
            vec![Constant::int(150), Constant::int(200)],
            Primitive::Float32,
        );
        let c = Tensor::new(
            "C",
            vec![Constant::int(100), Constant::int(200)],
            Primitive::Float32,
        );
        let m: Expr = Var::with_interval("m", 0, 100).into();
        let n: Expr = Var::with_interval("n", 0, 200).into();
        let k: Expr = Var::with_interval("k", 0, 150).into();

        let lhs = Expr::from(c).at([m.clone(), n.clone()]).unwrap();
        let rhs = Expr::from(a).at([m, k.clone()]).unwrap()
            * Expr::from(b).at([k, n]).unwrap();
        let expr = Expr::assign(AssignOpr::SumAssign, lhs, rhs).unwrap();
        Stage::from_expr(ctx, expr).unwrap()
    }

    #[test]
    fn domain_covers_subscript_iterators() {
        let ctx = Context::new();
        let s = matmul_stage(&ctx);
        assert_eq!(s.name(), "S0");
        assert_eq!(
            s.domain().to_string(),
            "{ S0[m, n, k] : 0 <= m < 100 and 0 <= n < 200 and 0 <= k < 150 }"
        );
        // registered under its own name
        assert!(ctx.stage("S0").is_some());
    }

    #[test]
    fn initial_schedule_has_betas() {
        let ctx = Context::new();
        let s = matmul_stage(&ctx);
        assert_eq!(
            s.schedule().to_string(),
            "{ S0[m, n, k] -> [0, m, 0, n, 0, k, 0] }"
        );
    }

    #[test]
    fn access_maps_use_the_stage_tuple() {
        let ctx = Context::new();
        let s = matmul_stage(&ctx);
        let writes = s.write_access();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].stage(), "S0");
        assert_eq!(writes[0].to_string(), "{ S0[m, n, k] -> C[m, n] }");
        let reads = s.read_access();
        assert_eq!(reads.len(), 2);
        assert_eq!(reads[0].to_string(), "{ S0[m, n, k] -> A[m, k] }");
        assert_eq!(reads[1].to_string(), "{ S0[m, n, k] -> B[k, n] }");
    }

    #[test]
    fn interchange_applies_to_schedule() {
        let ctx = Context::new();
        let s = matmul_stage(&ctx);
        s.interchange("m", "k").unwrap();
        assert_eq!(
            s.schedule().to_string(),
            "{ S0[m, n, k] -> [0, k, 0, n, 0, m, 0] }"
        );
        assert!(s.interchange("m", "zz").is_err());
    }

    #[test]
    fn frozen_stage_rejects_transforms() {
        let ctx = Context::new();
        let s = matmul_stage(&ctx);
        let _schedule = s.transformed_schedule();
        assert!(s.tile(&[32, 32]).is_err());
        assert!(s.interchange("m", "n").is_err());
        assert!(s.vectorize(&[8]).is_err());
    }

    #[test]
    fn vectorize_width_checked() {
        let ctx = Context::new();
        let s = matmul_stage(&ctx);
        assert!(s.vectorize(&[3]).is_err());
        assert!(s.vectorize(&[16, 8]).is_ok());
        assert_eq!(s.vector_width(), Some(8));
        assert_eq!(s.vector_outer(), vec![16]);
    }
}
