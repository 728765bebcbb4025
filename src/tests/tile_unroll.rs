//! Tiling with unroll: separated full/partial tiles, innermost point
//! loops expanded.

use crate::context::Context;
use crate::ir::{AssignOpr, Constant, Expr, Tensor, Var};
use crate::types::Primitive;
use crate::{Function, Stage, generate_c};

fn copy_stage(ctx: &Context, src: &Tensor, dst: &Tensor, extent: i64) -> Stage {
    let i: Expr = Var::with_interval(ctx.new_iterator_name(), 0, extent).into();
    let j: Expr = Var::with_interval(ctx.new_iterator_name(), 0, extent).into();
    Stage::from_expr(
        ctx,
        Expr::assign(
            AssignOpr::Assign,
            Expr::from(dst.clone()).at([i.clone(), j.clone()]).unwrap(),
            Expr::from(src.clone()).at([i, j]).unwrap(),
        )
        .unwrap(),
    )
    .unwrap()
}

#[test]
fn tiled_stage_separates_and_unrolls() {
    let ctx = Context::new();
    let square = |name: &str, d: i64| {
        Tensor::new(
            name,
            vec![Constant::int(d), Constant::int(d)],
            Primitive::Float32,
        )
    };
    let in_a = square("InA", 200);
    let a = square("A", 200);
    let in_b = square("InB", 100);
    let b = square("B", 100);

    let s0 = copy_stage(&ctx, &in_a, &a, 200);
    let s1 = copy_stage(&ctx, &in_b, &b, 100);
    s0.tile_unroll(&[32, 32]).unwrap();

    let mut func = Function::new(&ctx, "tiled_copy");
    func.add_stage(s0).unwrap();
    func.add_stage(s1).unwrap();
    func.set_inputs(vec![in_a.into(), in_b.into()]);
    func.set_outputs(vec![a.into(), b.into()]);
    func.end_definition().unwrap();
    let expr = func.compile_to_expr().unwrap();
    let text = expr.to_string();

    // the tile loops step by the tile size; 200 = 6*32 + 8, so the full
    // region stops at 160 and the remainder tiles start at 192
    assert!(text.contains("for(c0, 0, (c0 <= 160), 32)"));
    assert!(text.contains("// tile-unroll - tiles"));
    assert!(text.contains("// tile-unroll - points"));
    // the innermost tiled dimension expanded at AST build: its point
    // values appear as offsets, not as a loop
    assert!(text.contains("(c1 + 31)"));
    assert!(text.contains("192"));

    let (_, source) = generate_c(&expr, &ctx, "tiled_copy").unwrap();
    // full tiles survive as loops stepping by 32
    assert!(source.contains("for (int c0 = 0; (c0 <= 160); c0 += 32) {"));
    assert!(source.contains("for (int c1 = 0; (c1 <= 160); c1 += 32) {"));
    // full-region point loop over the first tiled dimension
    assert!(source.contains("for (int c2 = 0; (c2 <= 31); c2 += 1) {"));
    // the innermost dimension is unrolled: its last copy addresses the
    // tile base plus 31, with no loop driving it
    assert!(source.contains("A[(((c0 + c2) * 200) + (c1 + 31))]"));
    assert!(!source.contains("c1 + c9")); // no iterator ever drives the unrolled dim
    // the second stage stays a plain two-level nest with its own offsets
    assert!(source.contains("B[((c7 * 100) + c8)]"));
    assert!(source.contains("for (int c7 = 0; (c7 <= 99); c7 += 1) {"));
}
