//! Lowering of the polyhedral AST into the expression IR.
//!
//! `for`/`if`/`block` nodes translate structurally; `user` nodes are
//! subscripted statement macros that get substituted with the originating
//! stage's expression, with every original iterator replaced by the AST
//! expression the schedule mapped it to.

use log::trace;
use rustc_hash::FxHashMap;

use crate::context::Context;
use crate::error::CompileError;
use crate::ir::{BinOpr, Expr, ExprKind, Mutate, UnOpr, Var, mutate_children};
use crate::poly::{AstExpr, AstNode, AstOp};
use crate::types::Primitive;

/// Translate a polyhedral AST into the expression IR. Stage names in
/// `user` nodes resolve through the context's stage registry.
pub fn ast_to_ir(node: &AstNode, ctx: &Context) -> Result<Expr, CompileError> {
    match node {
        AstNode::Block(children) => {
            let mut exprs = Vec::with_capacity(children.len());
            for child in children {
                exprs.push(ast_to_ir(child, ctx)?);
            }
            Ok(Expr::block(exprs))
        }
        AstNode::For {
            iter,
            init,
            cond,
            inc,
            body,
        } => {
            let iterator: Expr = Var::new(iter.clone(), Primitive::Int32).into();
            Ok(Expr::for_loop(
                ast_expr_to_ir(init)?,
                ast_expr_to_ir(cond)?,
                ast_expr_to_ir(inc)?,
                ast_to_ir(body, ctx)?,
                iterator,
            ))
        }
        AstNode::If {
            cond,
            then_body,
            else_body,
        } => {
            let cond = ast_expr_to_ir(cond)?;
            let then_body = ast_to_ir(then_body, ctx)?;
            match else_body {
                Some(else_body) => Ok(Expr::if_then_else(
                    cond,
                    then_body,
                    ast_to_ir(else_body, ctx)?,
                )),
                None => Ok(Expr::if_then(cond, then_body)),
            }
        }
        AstNode::Mark { id, child } => Ok(Expr::block(vec![
            Expr::mark(id.clone()),
            ast_to_ir(child, ctx)?,
        ])),
        AstNode::User { stage, args } => lower_user(stage, args, ctx),
    }
}

/// Translate one AST expression. Integers and identifiers type as `int32`.
pub fn ast_expr_to_ir(expr: &AstExpr) -> Result<Expr, CompileError> {
    match expr {
        AstExpr::Int(v) => Ok(Expr::int(*v)),
        AstExpr::Id(name) => Ok(Var::new(name.clone(), Primitive::Int32).into()),
        AstExpr::Op { op, args } => {
            let mut operands = Vec::with_capacity(args.len());
            for a in args {
                operands.push(ast_expr_to_ir(a)?);
            }
            let binary = |op: BinOpr, mut operands: Vec<Expr>| -> Result<Expr, CompileError> {
                if operands.len() != 2 {
                    return Err(CompileError::lowering(format!(
                        "operator {op:?} expects 2 operands, got {}",
                        operands.len()
                    )));
                }
                let b = operands.pop().ok_or_else(|| {
                    CompileError::lowering("missing operand")
                })?;
                let a = operands.pop().ok_or_else(|| {
                    CompileError::lowering("missing operand")
                })?;
                Expr::binary(op, a, b)
            };
            match op {
                AstOp::And => binary(BinOpr::And, operands),
                AstOp::Or => binary(BinOpr::Or, operands),
                AstOp::Min => binary(BinOpr::Min, operands),
                AstOp::Max => binary(BinOpr::Max, operands),
                AstOp::Add => binary(BinOpr::Add, operands),
                AstOp::Sub => binary(BinOpr::Sub, operands),
                AstOp::Mul => binary(BinOpr::Mul, operands),
                AstOp::Div => binary(BinOpr::Div, operands),
                AstOp::Mod => binary(BinOpr::Mod, operands),
                AstOp::Le => binary(BinOpr::LE, operands),
                AstOp::Lt => binary(BinOpr::LT, operands),
                AstOp::Ge => binary(BinOpr::GE, operands),
                AstOp::Gt => binary(BinOpr::GT, operands),
                AstOp::Eq => binary(BinOpr::EQ, operands),
                AstOp::Minus => {
                    let a = operands.pop().ok_or_else(|| {
                        CompileError::lowering("minus expects one operand")
                    })?;
                    Expr::unary(UnOpr::Minus, a)
                }
                AstOp::Call => {
                    if operands.is_empty() {
                        return Err(CompileError::lowering("call without a callee"));
                    }
                    let callee = operands.remove(0);
                    let Some(var) = callee.as_var() else {
                        return Err(CompileError::lowering(
                            "call callee must be an identifier",
                        ));
                    };
                    Ok(Expr::call(var.name(), operands))
                }
            }
        }
    }
}

/// Substitute a `user` node with the indice-transformed expression of its
/// originating stage.
fn lower_user(stage_name: &str, args: &[AstExpr], ctx: &Context) -> Result<Expr, CompileError> {
    let Some(stage) = ctx.stage(stage_name) else {
        return Err(CompileError::lowering(format!(
            "AST user node references unknown statement '{stage_name}'"
        )));
    };
    let domain = stage.domain();
    if domain.n_dims() != args.len() {
        return Err(CompileError::lowering(format!(
            "statement '{stage_name}' has {} iterators but the AST call carries {}",
            domain.n_dims(),
            args.len()
        )));
    }

    let mut rename: FxHashMap<String, Expr> = FxHashMap::default();
    for (dim, arg) in domain.dims().iter().zip(args) {
        rename.insert(dim.clone(), ast_expr_to_ir(arg)?);
    }
    trace!("lower user {stage_name}: rename map has {} entries", rename.len());
    stage.set_indice_map(rename.clone());

    let mut expr = stage.expr().deep_copy();
    let mut substituter = Substituter {
        rename: &rename,
        error: None,
    };
    substituter.mutate(&mut expr);
    if let Some(err) = substituter.error {
        return Err(err);
    }
    Ok(expr)
}

struct Substituter<'a> {
    rename: &'a FxHashMap<String, Expr>,
    error: Option<CompileError>,
}

impl Mutate for Substituter<'_> {
    fn mutate(&mut self, expr: &mut Expr) {
        if self.error.is_some() {
            return;
        }
        if let ExprKind::Var(v) = &expr.kind {
            if let Some(replacement) = self.rename.get(v.name()) {
                *expr = replacement.deep_copy();
            } else if v.interval().is_some() {
                // an iterator that the schedule never mapped
                self.error = Some(CompileError::lowering(format!(
                    "iterator '{}' is missing from the rename map",
                    v.name()
                )));
            }
            return;
        }
        mutate_children(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Stage;
    use crate::ir::{AssignOpr, Constant, Tensor, dump};

    #[test]
    fn ast_expressions_translate() {
        let e = AstExpr::op(
            AstOp::Min,
            vec![
                AstExpr::Int(31),
                AstExpr::op(
                    AstOp::Sub,
                    vec![AstExpr::Int(99), AstExpr::Id("c0".to_owned())],
                ),
            ],
        );
        let ir = ast_expr_to_ir(&e).unwrap();
        assert_eq!(dump(&ir), "min(31,(99 - c0))");
    }

    #[test]
    fn user_nodes_substitute_stage_exprs() {
        let ctx = Context::new();
        let a = Tensor::new("A", vec![Constant::int(8)], Primitive::Float32);
        let out = Tensor::new("Out", vec![Constant::int(8)], Primitive::Float32);
        let i: Expr = Var::with_interval("i", 0, 8).into();
        let expr = Expr::assign(
            AssignOpr::Assign,
            Expr::from(out).at([i.clone()]).unwrap(),
            Expr::from(a).at([i]).unwrap(),
        )
        .unwrap();
        let stage = Stage::from_expr(&ctx, expr).unwrap();

        let user = AstNode::User {
            stage: stage.name(),
            args: vec![AstExpr::op(
                AstOp::Add,
                vec![AstExpr::Id("c0".to_owned()), AstExpr::Id("c1".to_owned())],
            )],
        };
        let ir = ast_to_ir(&user, &ctx).unwrap();
        assert_eq!(dump(&ir), "Out<8>[(c0 + c1)] = A<8>[(c0 + c1)];");
    }

    #[test]
    fn unknown_stage_is_a_lowering_error() {
        let ctx = Context::new();
        let user = AstNode::User {
            stage: "S99".to_owned(),
            args: vec![],
        };
        assert!(ast_to_ir(&user, &ctx).is_err());
    }
}
