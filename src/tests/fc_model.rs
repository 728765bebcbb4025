//! A small fully-connected model end to end: matmul + bias + relu with
//! the io entry points.

use crate::context::Context;
use crate::types::Primitive;
use crate::{Builder, Network, Session, generate_c};

const W: [f32; 8] = [0.5, -1.0, 1.5, 2.0, -0.5, 1.0, 0.25, -2.0];
const B: [f32; 2] = [0.5, -0.25];

/// The reference the generated code must reproduce:
/// `out = relu(x @ w + b)` over row-major buffers.
fn reference(x: &[f32; 12]) -> [f32; 6] {
    let mut out = [0.0f32; 6];
    for i in 0..3 {
        for j in 0..2 {
            let mut acc = 0.0;
            for k in 0..4 {
                acc += x[i * 4 + k] * W[k * 2 + j];
            }
            out[i * 2 + j] = (acc + B[j]).max(0.0);
        }
    }
    out
}

#[test]
fn fc_module_has_the_io_contract() {
    let ctx = Context::new();
    let mut session = Session::new();
    for (name, shape) in [("x", vec![3i64, 4]), ("w", vec![4, 2]), ("b", vec![2])] {
        let id = session.new_tensor(name).unwrap();
        session.tensor_mut(id).set_shape(shape);
        session.tensor_mut(id).set_ptype(Primitive::Float32);
    }

    let mut net = Network::new("fc");
    net.decl_input("x");
    net.decl_weight("w", W.to_vec());
    net.decl_weight("b", B.to_vec());
    net.decl_output("out");
    net.add_fc("x", "w", "b", "out");

    let module = Builder::build(&mut session, net, &ctx).unwrap();
    let (header, source) = generate_c(&module, &ctx, "fc").unwrap();

    // entry points
    assert!(source.contains("void set_input_x(const cinn_float32_t* src) {"));
    assert!(source.contains("void get_output_out(cinn_float32_t* dst) {"));
    assert!(source.contains("void main_() {"));
    assert!(header.contains("void main_();"));

    // the io glue copies whole buffers (12 and 6 floats)
    assert!(source.contains("cinn_copy(src, x, 48);"));
    assert!(source.contains("cinn_copy(out, dst, 24);"));

    // weights are baked into the global data section
    assert!(source.contains("cinn_float32_t w[8] = { 0.5, -1, 1.5, 2, -0.5, 1, 0.25, -2 };"));
    assert!(source.contains("cinn_float32_t b[2] = { 0.5, -0.25 };"));
    assert!(source.contains("cinn_float32_t x[12];"));
    assert!(source.contains("cinn_float32_t out[6];"));

    // main_ drives the partitioned function over the global buffers
    assert!(source.contains("func0(b, w, x, out, out_biased, out_mm);"));

    // the computation: contraction, bias add, clamp
    assert!(source.contains("+="));
    assert!(source.contains("cinn_max("));
    assert!(source.contains("+ b["));
}

#[test]
fn reference_semantics_pin_the_contract() {
    // all-ones input against the fixed table
    let x = [1.0f32; 12];
    let out = reference(&x);
    // acc_j = sum_k W[k][j]; out column 0: 0.5+1.5-0.5+0.25 = 1.75 (+0.5)
    // column 1: -1+2+1-2 = 0 (-0.25, clamped)
    assert_eq!(out, [2.25, 0.0, 2.25, 0.0, 2.25, 0.0]);
}
