//! Vectorization: the inner loop steps by 8 and uses AVX intrinsics.

use crate::context::Context;
use crate::ir::{AssignOpr, BinOpr, Constant, Expr, Tensor, Var};
use crate::types::Primitive;
use crate::{Function, Stage, generate_c};

#[test]
fn width_8_lowers_to_avx() {
    let ctx = Context::new();
    let shape = || vec![Constant::int(100), Constant::int(200)];
    let a = Tensor::new("A", shape(), Primitive::Float32);
    let b = Tensor::new("B", shape(), Primitive::Float32);
    let c = Tensor::new("C", shape(), Primitive::Float32);
    let i: Expr = Var::with_interval("i", 0, 100).into();
    let j: Expr = Var::with_interval("j", 0, 200).into();

    // C[i,j] = (A[i,j] + B[i,j]) * B[i,j]
    let aref = Expr::from(a.clone()).at([i.clone(), j.clone()]).unwrap();
    let bref = Expr::from(b.clone()).at([i.clone(), j.clone()]).unwrap();
    let cref = Expr::from(c.clone()).at([i, j]).unwrap();
    let rhs = Expr::binary(
        BinOpr::Mul,
        Expr::binary(BinOpr::Add, aref, bref.clone()).unwrap(),
        bref,
    )
    .unwrap();
    let stage = Stage::from_expr(&ctx, Expr::assign(AssignOpr::Assign, cref, rhs).unwrap()).unwrap();
    stage.vectorize(&[8]).unwrap();

    let mut func = Function::new(&ctx, "vec_mul");
    func.add_stage(stage).unwrap();
    func.set_inputs(vec![a.into(), b.into()]);
    func.set_outputs(vec![c.into()]);
    func.end_definition().unwrap();
    let expr = func.compile_to_expr().unwrap();

    let (_, source) = generate_c(&expr, &ctx, "vec_mul").unwrap();
    // the vector tile loop steps by the width
    assert!(source.contains("for (int c1 = 0; (c1 <= 199); c1 += 8) {"));
    assert!(source.contains("// vectorize - points"));
    assert!(source.contains("_mm256_load_ps(&A[((c0 * 200) + c1)])"));
    assert!(source.contains("_mm256_add_ps"));
    assert!(source.contains("_mm256_mul_ps"));
    assert!(source.contains("_mm256_store_ps(&C[((c0 * 200) + c1)], "));
    // the point loop itself is gone
    assert!(!source.contains("c2"));
}

#[test]
fn width_4_uses_sse_names() {
    let ctx = Context::new();
    let t = Tensor::new("T", vec![Constant::int(64)], Primitive::Float32);
    let u = Tensor::new("U", vec![Constant::int(64)], Primitive::Float32);
    let i: Expr = Var::with_interval("i", 0, 64).into();
    let rhs = Expr::binary(
        BinOpr::Add,
        Expr::from(u.clone()).at([i.clone()]).unwrap(),
        Expr::from(u.clone()).at([i.clone()]).unwrap(),
    )
    .unwrap();
    let stage = Stage::from_expr(
        &ctx,
        Expr::assign(
            AssignOpr::Assign,
            Expr::from(t.clone()).at([i]).unwrap(),
            rhs,
        )
        .unwrap(),
    )
    .unwrap();
    stage.vectorize(&[4]).unwrap();

    let mut func = Function::new(&ctx, "vec4");
    func.add_stage(stage).unwrap();
    func.set_inputs(vec![u.into()]);
    func.set_outputs(vec![t.into()]);
    func.end_definition().unwrap();
    let expr = func.compile_to_expr().unwrap();
    let (_, source) = generate_c(&expr, &ctx, "vec4").unwrap();
    assert!(source.contains("_mm_add_ps"));
    assert!(source.contains("_mm_store_ps"));
}
