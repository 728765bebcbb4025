//! Polyhedral AST: loop nests materialized from a schedule tree.
//!
//! [`build_ast`] walks the tree and emits `for`/`if`/`block`/`user` nodes
//! with ISL-style iterator names `c0, c1, …`. Tile loops step by the tile
//! size over the original range; tile point loops are zero-based and clamp
//! against the domain bound unless the band's `separate` option splits full
//! and partial tiles. Band members flagged `unroll` expand into their
//! constant-count copies here instead of emitting a loop.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::error::CompileError;

use super::schedule::{Band, MemberRole, ScheduleTree};
use super::set::{CmpOp, Cond, Set};

/// Operators of the polyhedral AST expression language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AstOp {
    And,
    Or,
    Min,
    Max,
    Minus,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Le,
    Lt,
    Ge,
    Gt,
    Eq,
    Call,
}

/// Expressions of the polyhedral AST.
#[derive(Debug, Clone, PartialEq)]
pub enum AstExpr {
    Int(i64),
    Id(String),
    Op { op: AstOp, args: Vec<AstExpr> },
}

impl AstExpr {
    pub fn op(op: AstOp, args: Vec<AstExpr>) -> AstExpr {
        AstExpr::Op { op, args }
    }

    /// `a + b`, folding integer immediates and additive identities.
    pub fn add(a: AstExpr, b: AstExpr) -> AstExpr {
        match (&a, &b) {
            (AstExpr::Int(x), AstExpr::Int(y)) => AstExpr::Int(x + y),
            (AstExpr::Int(0), _) => b,
            (_, AstExpr::Int(0)) => a,
            _ => AstExpr::op(AstOp::Add, vec![a, b]),
        }
    }

    /// `a - b` with immediate folding.
    pub fn sub(a: AstExpr, b: AstExpr) -> AstExpr {
        match (&a, &b) {
            (AstExpr::Int(x), AstExpr::Int(y)) => AstExpr::Int(x - y),
            (_, AstExpr::Int(0)) => a,
            _ => AstExpr::op(AstOp::Sub, vec![a, b]),
        }
    }

    /// `min(a, b)` with immediate folding.
    pub fn min(a: AstExpr, b: AstExpr) -> AstExpr {
        match (&a, &b) {
            (AstExpr::Int(x), AstExpr::Int(y)) => AstExpr::Int(*x.min(y)),
            _ => AstExpr::op(AstOp::Min, vec![a, b]),
        }
    }
}

impl fmt::Display for AstExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AstExpr::Int(v) => write!(f, "{v}"),
            AstExpr::Id(name) => f.write_str(name),
            AstExpr::Op { op, args } => {
                let infix = match op {
                    AstOp::Add => Some("+"),
                    AstOp::Sub => Some("-"),
                    AstOp::Mul => Some("*"),
                    AstOp::Div => Some("/"),
                    AstOp::Mod => Some("%"),
                    AstOp::Le => Some("<="),
                    AstOp::Lt => Some("<"),
                    AstOp::Ge => Some(">="),
                    AstOp::Gt => Some(">"),
                    AstOp::Eq => Some("=="),
                    AstOp::And => Some("&&"),
                    AstOp::Or => Some("||"),
                    _ => None,
                };
                if let Some(sym) = infix
                    && args.len() == 2
                {
                    return write!(f, "({} {sym} {})", args[0], args[1]);
                }
                match op {
                    AstOp::Minus => write!(f, "(-{})", args[0]),
                    AstOp::Min => write!(f, "min({}, {})", args[0], args[1]),
                    AstOp::Max => write!(f, "max({}, {})", args[0], args[1]),
                    AstOp::Call => {
                        write!(f, "{}(", args[0])?;
                        for (i, a) in args[1..].iter().enumerate() {
                            if i > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{a}")?;
                        }
                        write!(f, ")")
                    }
                    _ => write!(f, "?"),
                }
            }
        }
    }
}

/// Statement nodes of the polyhedral AST.
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Block(Vec<AstNode>),
    For {
        iter: String,
        init: AstExpr,
        cond: AstExpr,
        inc: AstExpr,
        body: Box<AstNode>,
    },
    If {
        cond: AstExpr,
        then_body: Box<AstNode>,
        else_body: Option<Box<AstNode>>,
    },
    Mark {
        id: String,
        child: Box<AstNode>,
    },
    /// A subscripted statement macro `S(args…)`; `args` align with the
    /// stage's domain dimensions and carry the iterator-rename map.
    User {
        stage: String,
        args: Vec<AstExpr>,
    },
}

/// Materialize a schedule tree into a polyhedral AST.
pub fn build_ast(tree: &ScheduleTree) -> Result<AstNode, CompileError> {
    let mut builder = Builder::default();
    builder.node(tree)
}

#[derive(Debug, Clone)]
enum PointBound {
    /// The point loop runs `0 ≤ c < n`.
    Constant(i64),
    /// The point loop runs `0 ≤ c ≤ min(size-1, hi-1-base)`.
    Clamped { size: i64, hi: i64 },
}

#[derive(Debug, Clone)]
struct TileCtx {
    base: AstExpr,
    bound: PointBound,
}

#[derive(Default)]
struct Builder {
    domains: FxHashMap<String, Set>,
    counter: usize,
    active: Vec<String>,
    env: FxHashMap<String, AstExpr>,
    tiles: FxHashMap<String, TileCtx>,
}

impl Builder {
    fn fresh(&mut self) -> String {
        let name = format!("c{}", self.counter);
        self.counter += 1;
        name
    }

    fn dim_bounds(&self, dim: &str) -> Result<(i64, i64), CompileError> {
        for stage in &self.active {
            if let Some(set) = self.domains.get(stage)
                && let Some(bounds) = set.dim_bounds(dim)
            {
                return Ok(bounds);
            }
        }
        Err(CompileError::schedule(format!(
            "band schedules dimension '{dim}' but no active stage domain defines it"
        )))
    }

    fn node(&mut self, tree: &ScheduleTree) -> Result<AstNode, CompileError> {
        match tree {
            ScheduleTree::Domain { domain, child } => {
                for set in domain {
                    self.domains.insert(set.tuple().to_owned(), set.clone());
                }
                // until a filter narrows it, every stage is active
                self.active = domain.iter().map(|s| s.tuple().to_owned()).collect();
                self.node(child)
            }
            ScheduleTree::Sequence { children } | ScheduleTree::SetNode { children } => {
                let mut nodes = Vec::with_capacity(children.len());
                for child in children {
                    let saved_env = self.env.clone();
                    let saved_tiles = self.tiles.clone();
                    let saved_active = self.active.clone();
                    nodes.push(self.node(child)?);
                    self.env = saved_env;
                    self.tiles = saved_tiles;
                    self.active = saved_active;
                }
                Ok(AstNode::Block(nodes))
            }
            ScheduleTree::Filter { stages, child } => {
                let saved = std::mem::replace(&mut self.active, stages.clone());
                let result = self.node(child);
                self.active = saved;
                result
            }
            ScheduleTree::Mark { id, child } => Ok(AstNode::Mark {
                id: id.clone(),
                child: Box::new(self.node(child)?),
            }),
            ScheduleTree::Context { child, .. } | ScheduleTree::Extension { child } => {
                self.node(child)
            }
            ScheduleTree::Band(band) => self.members(band, 0),
            ScheduleTree::Leaf => self.users(),
        }
    }

    fn members(&mut self, band: &Band, idx: usize) -> Result<AstNode, CompileError> {
        if idx == band.members.len() {
            return self.node(&band.child);
        }
        let member = &band.members[idx];
        let dim = member.dim.clone();
        match member.role {
            MemberRole::Point => {
                let (lo, hi) = self.dim_bounds(&dim)?;
                if member.unroll {
                    return self.expand(band, idx, &dim, AstExpr::Int(0), lo, hi - lo);
                }
                let iter = self.fresh();
                self.env.insert(dim, AstExpr::Id(iter.clone()));
                let cond = AstExpr::op(
                    AstOp::Le,
                    vec![AstExpr::Id(iter.clone()), AstExpr::Int(hi - 1)],
                );
                let body = self.members(band, idx + 1)?;
                Ok(AstNode::For {
                    iter,
                    init: AstExpr::Int(lo),
                    cond,
                    inc: AstExpr::Int(1),
                    body: Box::new(body),
                })
            }
            MemberRole::TileLoop(size) => self.tile_loop(band, idx, &dim, size),
            MemberRole::TilePoint(size) => self.tile_point(band, idx, &dim, size),
        }
    }

    fn tile_loop(
        &mut self,
        band: &Band,
        idx: usize,
        dim: &str,
        size: i64,
    ) -> Result<AstNode, CompileError> {
        if size <= 0 {
            return Err(CompileError::schedule(format!(
                "tile size {size} on dimension '{dim}' must be positive"
            )));
        }
        let (lo, hi) = self.dim_bounds(dim)?;
        let extent = hi - lo;

        // A tile at least as wide as the range degenerates to a single tile.
        if extent <= size {
            self.tiles.insert(
                dim.to_owned(),
                TileCtx {
                    base: AstExpr::Int(lo),
                    bound: PointBound::Constant(extent),
                },
            );
            return self.members(band, idx + 1);
        }

        if extent % size == 0 {
            let iter = self.fresh();
            self.tiles.insert(
                dim.to_owned(),
                TileCtx {
                    base: AstExpr::Id(iter.clone()),
                    bound: PointBound::Constant(size),
                },
            );
            let body = self.members(band, idx + 1)?;
            return Ok(AstNode::For {
                iter: iter.clone(),
                init: AstExpr::Int(lo),
                cond: AstExpr::op(AstOp::Le, vec![AstExpr::Id(iter), AstExpr::Int(hi - 1)]),
                inc: AstExpr::Int(size),
                body: Box::new(body),
            });
        }

        if band.options.separate {
            // Full tiles and the remainder become separate nests; every
            // point loop below gets a constant extent.
            let full_tiles = extent / size;
            let saved_env = self.env.clone();
            let saved_tiles = self.tiles.clone();

            let full_nest = if full_tiles == 1 {
                self.tiles.insert(
                    dim.to_owned(),
                    TileCtx {
                        base: AstExpr::Int(lo),
                        bound: PointBound::Constant(size),
                    },
                );
                self.members(band, idx + 1)?
            } else {
                let iter = self.fresh();
                self.tiles.insert(
                    dim.to_owned(),
                    TileCtx {
                        base: AstExpr::Id(iter.clone()),
                        bound: PointBound::Constant(size),
                    },
                );
                let body = self.members(band, idx + 1)?;
                AstNode::For {
                    iter: iter.clone(),
                    init: AstExpr::Int(lo),
                    cond: AstExpr::op(
                        AstOp::Le,
                        vec![AstExpr::Id(iter), AstExpr::Int(lo + (full_tiles - 1) * size)],
                    ),
                    inc: AstExpr::Int(size),
                    body: Box::new(body),
                }
            };

            self.env = saved_env;
            self.tiles = saved_tiles;
            self.tiles.insert(
                dim.to_owned(),
                TileCtx {
                    base: AstExpr::Int(lo + full_tiles * size),
                    bound: PointBound::Constant(extent - full_tiles * size),
                },
            );
            let remainder_nest = self.members(band, idx + 1)?;
            return Ok(AstNode::Block(vec![full_nest, remainder_nest]));
        }

        // One nest; the point loop clamps against the domain bound.
        let iter = self.fresh();
        self.tiles.insert(
            dim.to_owned(),
            TileCtx {
                base: AstExpr::Id(iter.clone()),
                bound: PointBound::Clamped { size, hi },
            },
        );
        let body = self.members(band, idx + 1)?;
        Ok(AstNode::For {
            iter: iter.clone(),
            init: AstExpr::Int(lo),
            cond: AstExpr::op(AstOp::Le, vec![AstExpr::Id(iter), AstExpr::Int(hi - 1)]),
            inc: AstExpr::Int(size),
            body: Box::new(body),
        })
    }

    fn tile_point(
        &mut self,
        band: &Band,
        idx: usize,
        dim: &str,
        size: i64,
    ) -> Result<AstNode, CompileError> {
        let ctx = self.tiles.get(dim).cloned().ok_or_else(|| {
            CompileError::schedule(format!(
                "point loop over '{dim}' appears without an enclosing tile loop"
            ))
        })?;
        match ctx.bound {
            PointBound::Constant(n) => {
                if band.members[idx].unroll {
                    return self.expand(band, idx, dim, ctx.base, 0, n);
                }
                if n == 1 {
                    self.env.insert(dim.to_owned(), ctx.base);
                    return self.members(band, idx + 1);
                }
                let iter = self.fresh();
                self.env.insert(
                    dim.to_owned(),
                    AstExpr::add(ctx.base, AstExpr::Id(iter.clone())),
                );
                let body = self.members(band, idx + 1)?;
                Ok(AstNode::For {
                    iter: iter.clone(),
                    init: AstExpr::Int(0),
                    cond: AstExpr::op(AstOp::Le, vec![AstExpr::Id(iter), AstExpr::Int(n - 1)]),
                    inc: AstExpr::Int(1),
                    body: Box::new(body),
                })
            }
            PointBound::Clamped { size: ts, hi } => {
                debug_assert_eq!(ts, size);
                let iter = self.fresh();
                self.env.insert(
                    dim.to_owned(),
                    AstExpr::add(ctx.base.clone(), AstExpr::Id(iter.clone())),
                );
                let bound = AstExpr::min(
                    AstExpr::Int(ts - 1),
                    AstExpr::sub(AstExpr::Int(hi - 1), ctx.base),
                );
                let body = self.members(band, idx + 1)?;
                Ok(AstNode::For {
                    iter: iter.clone(),
                    init: AstExpr::Int(0),
                    cond: AstExpr::op(AstOp::Le, vec![AstExpr::Id(iter), bound]),
                    inc: AstExpr::Int(1),
                    body: Box::new(body),
                })
            }
        }
    }

    /// Expand an unrolled member into `count` copies of the rest of the
    /// band, substituting `base + v` for the dimension.
    fn expand(
        &mut self,
        band: &Band,
        idx: usize,
        dim: &str,
        base: AstExpr,
        lo: i64,
        count: i64,
    ) -> Result<AstNode, CompileError> {
        let mut copies = Vec::with_capacity(count.max(0) as usize);
        for v in 0..count {
            let saved_env = self.env.clone();
            let saved_tiles = self.tiles.clone();
            self.env.insert(
                dim.to_owned(),
                AstExpr::add(base.clone(), AstExpr::Int(lo + v)),
            );
            copies.push(self.members(band, idx + 1)?);
            self.env = saved_env;
            self.tiles = saved_tiles;
        }
        Ok(AstNode::Block(copies))
    }

    fn users(&mut self) -> Result<AstNode, CompileError> {
        let mut nodes = Vec::with_capacity(self.active.len());
        for stage in self.active.clone() {
            let set = self
                .domains
                .get(&stage)
                .ok_or_else(|| CompileError::lookup("stage domain", stage.clone()))?
                .clone();
            let mut args = Vec::with_capacity(set.n_dims());
            for dim in set.dims() {
                let value = self.env.get(dim).cloned().ok_or_else(|| {
                    CompileError::schedule(format!(
                        "dimension '{dim}' of stage '{stage}' was never scheduled by a band"
                    ))
                })?;
                args.push(value);
            }
            let mut node = AstNode::User {
                stage: stage.clone(),
                args,
            };
            // extra domain constraints guard the statement
            for cond in set.conds() {
                let value = self.env[cond.dim()].clone();
                let guard = match cond {
                    Cond::Mod {
                        divisor, remainder, ..
                    } => AstExpr::op(
                        AstOp::Eq,
                        vec![
                            AstExpr::op(AstOp::Mod, vec![value, AstExpr::Int(*divisor)]),
                            AstExpr::Int(*remainder),
                        ],
                    ),
                    Cond::Cmp { op, value: v, .. } => {
                        let op = match op {
                            CmpOp::LT => AstOp::Lt,
                            CmpOp::LE => AstOp::Le,
                            CmpOp::GT => AstOp::Gt,
                            CmpOp::GE => AstOp::Ge,
                            CmpOp::EQ => AstOp::Eq,
                        };
                        AstExpr::op(op, vec![value, AstExpr::Int(*v)])
                    }
                };
                node = AstNode::If {
                    cond: guard,
                    then_body: Box::new(node),
                    else_body: None,
                };
            }
            nodes.push(node);
        }
        if nodes.len() == 1 {
            Ok(nodes.pop().unwrap_or(AstNode::Block(Vec::new())))
        } else {
            Ok(AstNode::Block(nodes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poly::schedule::{BandMember, BandOptions, MemberRole};

    fn domain_2d() -> Set {
        Set::new(
            "S0",
            &[("i".to_owned(), 0, 4), ("j".to_owned(), 0, 8)],
        )
        .unwrap()
    }

    fn point_tree() -> ScheduleTree {
        ScheduleTree::domain(
            vec![domain_2d()],
            ScheduleTree::filter(
                vec!["S0".to_owned()],
                ScheduleTree::Band(Band::over_dims(["i", "j"], ScheduleTree::Leaf)),
            ),
        )
    }

    #[test]
    fn identity_band_emits_nested_loops() {
        let ast = build_ast(&point_tree()).unwrap();
        let AstNode::For { iter, cond, body, .. } = &ast else {
            panic!("expected outer loop, got {ast:?}");
        };
        assert_eq!(iter, "c0");
        assert_eq!(cond.to_string(), "(c0 <= 3)");
        let AstNode::For { iter, body, .. } = body.as_ref() else {
            panic!("expected inner loop");
        };
        assert_eq!(iter, "c1");
        let AstNode::User { stage, args } = body.as_ref() else {
            panic!("expected user statement");
        };
        assert_eq!(stage, "S0");
        assert_eq!(args[0].to_string(), "c0");
        assert_eq!(args[1].to_string(), "c1");
    }

    #[test]
    fn tile_bands_step_by_size() {
        // tile j by 4: for c0 (i), for c1 += 4 (j tiles), for c2 (points)
        let inner = ScheduleTree::Band(Band {
            members: vec![BandMember::with_role("j", MemberRole::TilePoint(4))],
            permutable: true,
            options: BandOptions::default(),
            child: Box::new(ScheduleTree::Leaf),
        });
        let tiles = ScheduleTree::Band(Band {
            members: vec![
                BandMember::point("i"),
                BandMember::with_role("j", MemberRole::TileLoop(4)),
            ],
            permutable: true,
            options: BandOptions::default(),
            child: Box::new(inner),
        });
        let tree = ScheduleTree::domain(
            vec![domain_2d()],
            ScheduleTree::filter(vec!["S0".to_owned()], tiles),
        );
        let ast = build_ast(&tree).unwrap();
        let AstNode::For { body, .. } = &ast else {
            panic!("outer loop");
        };
        let AstNode::For { iter, inc, body, .. } = body.as_ref() else {
            panic!("tile loop");
        };
        assert_eq!(iter, "c1");
        assert_eq!(inc, &AstExpr::Int(4));
        let AstNode::For { init, cond, body, .. } = body.as_ref() else {
            panic!("point loop");
        };
        assert_eq!(init, &AstExpr::Int(0));
        assert_eq!(cond.to_string(), "(c2 <= 3)");
        let AstNode::User { args, .. } = body.as_ref() else {
            panic!("user");
        };
        assert_eq!(args[1].to_string(), "(c1 + c2)");
    }

    #[test]
    fn unrolled_point_member_emits_no_loop() {
        let mut point = BandMember::with_role("j", MemberRole::TilePoint(4));
        point.unroll = true;
        let inner = ScheduleTree::Band(Band {
            members: vec![point],
            permutable: true,
            options: BandOptions::default(),
            child: Box::new(ScheduleTree::Leaf),
        });
        let tiles = ScheduleTree::Band(Band {
            members: vec![
                BandMember::point("i"),
                BandMember::with_role("j", MemberRole::TileLoop(4)),
            ],
            permutable: true,
            options: BandOptions::default(),
            child: Box::new(inner),
        });
        let tree = ScheduleTree::domain(
            vec![domain_2d()],
            ScheduleTree::filter(vec!["S0".to_owned()], tiles),
        );
        let ast = build_ast(&tree).unwrap();
        // outer i loop → tile loop → block of 4 users
        let AstNode::For { body, .. } = &ast else {
            panic!("outer loop");
        };
        let AstNode::For { body, .. } = body.as_ref() else {
            panic!("tile loop");
        };
        let AstNode::Block(copies) = body.as_ref() else {
            panic!("expected unrolled block, got {body:?}");
        };
        assert_eq!(copies.len(), 4);
        let AstNode::User { args, .. } = &copies[2] else {
            panic!("user");
        };
        assert_eq!(args[1].to_string(), "(c1 + 2)");
    }

    #[test]
    fn cond_guards_wrap_users() {
        let mut set = domain_2d();
        set.add_cond(Cond::parse("i", "% 2 = 0").unwrap()).unwrap();
        let tree = ScheduleTree::domain(
            vec![set],
            ScheduleTree::filter(
                vec!["S0".to_owned()],
                ScheduleTree::Band(Band::over_dims(["i", "j"], ScheduleTree::Leaf)),
            ),
        );
        let ast = build_ast(&tree).unwrap();
        let AstNode::For { body, .. } = &ast else {
            panic!("outer");
        };
        let AstNode::For { body, .. } = body.as_ref() else {
            panic!("inner");
        };
        let AstNode::If { cond, .. } = body.as_ref() else {
            panic!("expected guard, got {body:?}");
        };
        assert_eq!(cond.to_string(), "((c0 % 2) == 0)");
    }
}
