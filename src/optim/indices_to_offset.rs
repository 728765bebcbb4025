//! Fold multi-dimensional references to flat row-major offsets.

use crate::context::Context;
use crate::error::CompileError;
use crate::ir::{BinOpr, Expr, ExprKind, Mutate, mutate_children};

use super::Pass;

/// Rewrite every `T[i0, …, ik]` into
/// `T[((…((i0 * d1) + i1) * d2 + i2) * … + ik)]` using the tensor's shape.
/// The layout is row-major; there is no column-major mode. After this pass
/// every reference carries a single index.
pub struct IndicesToAbsoluteOffset;

impl Pass for IndicesToAbsoluteOffset {
    fn name(&self) -> &'static str {
        "indices_to_absolute_offset"
    }

    fn run(&mut self, expr: &mut Expr, _ctx: &Context) -> Result<(), CompileError> {
        let mut folder = Folder { error: None };
        folder.mutate(expr);
        match folder.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct Folder {
    error: Option<CompileError>,
}

impl Mutate for Folder {
    fn mutate(&mut self, expr: &mut Expr) {
        if self.error.is_some() {
            return;
        }
        let ExprKind::Reference { target, iterators } = &mut expr.kind else {
            mutate_children(self, expr);
            return;
        };
        let Some(tensor) = target.as_tensor() else {
            return;
        };
        if iterators.len() <= 1 {
            return;
        }

        let mut dims = Vec::with_capacity(tensor.rank());
        for d in tensor.dims() {
            match d.int_value::<i64>() {
                Some(v) => dims.push(v),
                None => {
                    self.error = Some(CompileError::shape(format!(
                        "shape of tensor '{}' must be bound before offset folding",
                        tensor.name()
                    )));
                    return;
                }
            }
        }

        let mut offset = iterators[0].clone();
        for (i, index) in iterators.iter().enumerate().skip(1) {
            let scaled = Expr::binary(BinOpr::Mul, offset, Expr::int(dims[i])) // row-major stride
                .and_then(|s| Expr::binary(BinOpr::Add, s, index.clone()));
            match scaled {
                Ok(e) => offset = e,
                Err(err) => {
                    self.error = Some(err);
                    return;
                }
            }
        }
        *iterators = vec![offset];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AssignOpr, Constant, Tensor, Var, dump};
    use crate::types::Primitive;

    #[test]
    fn row_major_offsets() {
        let c = Tensor::new(
            "C",
            vec![Constant::int(100), Constant::int(200)],
            Primitive::Float32,
        );
        let m: Expr = Var::with_interval("m", 0, 100).into();
        let n: Expr = Var::with_interval("n", 0, 200).into();
        let mut e = Expr::assign(
            AssignOpr::SumAssign,
            Expr::from(c).at([m.clone(), n.clone()]).unwrap(),
            Expr::float32(1.0),
        )
        .unwrap();
        IndicesToAbsoluteOffset.run(&mut e, &Context::new()).unwrap();
        assert_eq!(dump(&e), "C<100,200>[((m * 200) + n)] += 1;");
    }

    #[test]
    fn three_dimensional_offsets() {
        let t = Tensor::new(
            "T",
            vec![Constant::int(4), Constant::int(5), Constant::int(6)],
            Primitive::Float32,
        );
        let i: Expr = Var::with_interval("i", 0, 4).into();
        let j: Expr = Var::with_interval("j", 0, 5).into();
        let k: Expr = Var::with_interval("k", 0, 6).into();
        let mut e = Expr::from(t).at([i, j, k]).unwrap();
        IndicesToAbsoluteOffset.run(&mut e, &Context::new()).unwrap();
        assert_eq!(dump(&e), "T<4,5,6>[((((i * 5) + j) * 6) + k)]");
        let ExprKind::Reference { iterators, .. } = &e.kind else {
            panic!("reference");
        };
        assert_eq!(iterators.len(), 1);
    }
}
