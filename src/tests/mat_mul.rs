//! Plain matrix multiply: three nested loops, row-major offsets.

use crate::context::Context;
use crate::ir::{AssignOpr, BinOpr, Constant, Expr, Tensor, Var};
use crate::types::Primitive;
use crate::{Function, Stage, generate_c};

fn build(ctx: &Context) -> Function {
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

    let lhs = Expr::from(c.clone()).at([m.clone(), n.clone()]).unwrap();
    let rhs = Expr::binary(
        BinOpr::Mul,
        Expr::from(a.clone()).at([m, k.clone()]).unwrap(),
        Expr::from(b.clone()).at([k, n]).unwrap(),
    )
    .unwrap();
    let stmt = Expr::assign(AssignOpr::SumAssign, lhs, rhs).unwrap();

    let mut func = Function::new(ctx, "mat_mul");
    func.add_stage(Stage::from_expr(ctx, stmt).unwrap()).unwrap();
    func.set_inputs(vec![a.into(), b.into()]);
    func.set_outputs(vec![c.into()]);
    func.end_definition().unwrap();
    func
}

#[test]
fn three_nested_loops_in_source_order() {
    let ctx = Context::new();
    let mut func = build(&ctx);
    let expr = func.compile_to_expr().unwrap();
    let text = expr.to_string();
    // m, n, k in that order
    let c0 = text.find("for(c0, 0, (c0 <= 99), 1)").unwrap();
    let c1 = text.find("for(c1, 0, (c1 <= 199), 1)").unwrap();
    let c2 = text.find("for(c2, 0, (c2 <= 149), 1)").unwrap();
    assert!(c0 < c1 && c1 < c2);
    assert!(text.contains("C<100,200>[c0,c1] += (A<100,150>[c0,c2] * B<150,200>[c2,c1]);"));
}

#[test]
fn emitted_c_uses_flat_offsets() {
    let ctx = Context::new();
    let mut func = build(&ctx);
    let expr = func.compile_to_expr().unwrap();
    let (header, source) = generate_c(&expr, &ctx, "mat_mul").unwrap();

    assert!(header.contains(
        "void mat_mul(cinn_float32_t* A, cinn_float32_t* B, cinn_float32_t* C);"
    ));
    assert!(source.contains(
        "void mat_mul(cinn_float32_t* A, cinn_float32_t* B, cinn_float32_t* C) {"
    ));
    assert!(source.contains("for (int c0 = 0; (c0 <= 99); c0 += 1) {"));
    assert!(source.contains("for (int c1 = 0; (c1 <= 199); c1 += 1) {"));
    assert!(source.contains("for (int c2 = 0; (c2 <= 149); c2 += 1) {"));
    assert!(source.contains(
        "C[((c0 * 200) + c1)] += (A[((c0 * 150) + c2)] * B[((c2 * 200) + c1)]);"
    ));
}

#[test]
fn compilation_is_deterministic() {
    let run = || {
        let ctx = Context::new();
        let mut func = build(&ctx);
        let expr = func.compile_to_expr().unwrap();
        generate_c(&expr, &ctx, "mat_mul").unwrap().1
    };
    assert_eq!(run(), run());
}
