//! End-to-end scenarios: whole programs compiled down to C text.

mod fc_model;
mod fused_bias_relu;
mod mat_mul;
mod tile_unroll;
mod vectorize_8;
