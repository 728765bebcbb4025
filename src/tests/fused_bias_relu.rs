//! Fusion: the bias add and the clamp share one loop nest.

use crate::context::Context;
use crate::ir::{AssignOpr, BinOpr, Constant, Expr, Tensor, Var};
use crate::types::Primitive;
use crate::{Function, Stage, generate_c};

#[test]
fn fused_stages_share_the_inner_loop() {
    let ctx = Context::new();
    let a = Tensor::new(
        "A",
        vec![Constant::int(100), Constant::int(150)],
        Primitive::Float32,
    );
    let b = Tensor::new(
        "B",
        vec![Constant::int(200), Constant::int(150)],
        Primitive::Float32,
    );
    let c = Tensor::new(
        "C",
        vec![Constant::int(100), Constant::int(200)],
        Primitive::Float32,
    );
    let bias = Tensor::new("bias", vec![Constant::int(200)], Primitive::Float32);

    let i: Expr = Var::with_interval("i", 0, 100).into();
    let j: Expr = Var::with_interval("j", 0, 200).into();
    let k: Expr = Var::with_interval("k", 0, 150).into();

    // s1: C[i,j] += A[i,k] * B[j,k]
    let s1 = Stage::from_expr(
        &ctx,
        Expr::assign(
            AssignOpr::SumAssign,
            Expr::from(c.clone()).at([i.clone(), j.clone()]).unwrap(),
            Expr::binary(
                BinOpr::Mul,
                Expr::from(a.clone()).at([i.clone(), k.clone()]).unwrap(),
                Expr::from(b.clone()).at([j.clone(), k]).unwrap(),
            )
            .unwrap(),
        )
        .unwrap(),
    )
    .unwrap();

    // s2: C[i,j] = C[i,j] + bias[j]
    let s2 = Stage::from_expr(
        &ctx,
        Expr::assign(
            AssignOpr::Assign,
            Expr::from(c.clone()).at([i.clone(), j.clone()]).unwrap(),
            Expr::binary(
                BinOpr::Add,
                Expr::from(c.clone()).at([i.clone(), j.clone()]).unwrap(),
                Expr::from(bias.clone()).at([j.clone()]).unwrap(),
            )
            .unwrap(),
        )
        .unwrap(),
    )
    .unwrap();

    // s3: C[i,j] = max(C[i,j], 0)
    let s3 = Stage::from_expr(
        &ctx,
        Expr::assign(
            AssignOpr::Assign,
            Expr::from(c.clone()).at([i.clone(), j.clone()]).unwrap(),
            Expr::max(
                Expr::from(c.clone()).at([i, j]).unwrap(),
                Expr::float32(0.0),
            )
            .unwrap(),
        )
        .unwrap(),
    )
    .unwrap();

    s2.fuse_with(&s3);

    let mut func = Function::new(&ctx, "bias_relu");
    func.add_stage(s1).unwrap();
    func.add_stage(s2).unwrap();
    func.add_stage(s3).unwrap();
    func.set_inputs(vec![a.into(), b.into(), bias.into()]);
    func.set_outputs(vec![c.into()]);
    func.end_definition().unwrap();

    // one band for the contraction, one shared band for s2+s3
    assert_eq!(func.schedule_tree().unwrap().band_count(), 2);

    let expr = func.compile_to_expr().unwrap();
    let text = expr.to_string();
    // 3 contraction loops + 2 shared loops; not 3 + 2 + 2
    assert_eq!(text.matches("for(").count(), 5);

    let (_, source) = generate_c(&expr, &ctx, "bias_relu").unwrap();
    assert!(source.contains("cinn_max("));
    // the two fused statements sit in the same innermost loop body
    let bias_pos = source.find("+ bias[").unwrap();
    let max_pos = source.find("cinn_max(").unwrap();
    let last_loop = source.rfind("for (int").unwrap();
    assert!(last_loop < bias_pos && last_loop < max_pos);
}
