//! Operators and the operator registry.
//!
//! Operators are the computational nodes of the graph. Each one consumes
//! input tensors and, when compiled, emits stages on its output tensor.
//! Kernels register under an `(layer, type)` key through an explicit
//! registration call, so there is no load-order dependence.

use rustc_hash::FxHashMap;

use crate::context::Context;
use crate::core::Stage;
use crate::error::CompileError;
use crate::ir::{AssignOpr, BinOpr, Expr, UnOpr};

use super::session::{Session, TensorId};

/// The implementation layer an operator belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HlirLayer {
    /// Loaded directly from a model description.
    ModelWise,
    /// Backed by a math library.
    MathWise,
    /// Lowered to the expression IR.
    InstructionWise,
}

/// The elementwise operator family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementwiseKind {
    Add,
    Sub,
    Mul,
    Div,
}

impl ElementwiseKind {
    fn bin_opr(self) -> BinOpr {
        match self {
            ElementwiseKind::Add => BinOpr::Add,
            ElementwiseKind::Sub => BinOpr::Sub,
            ElementwiseKind::Mul => BinOpr::Mul,
            ElementwiseKind::Div => BinOpr::Div,
        }
    }
}

/// Typed operator parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorParam {
    None,
    Elementwise(ElementwiseKind),
    Transpose { perm: Vec<usize> },
    Reshape { shape: Vec<i64> },
    /// `(before, after)` element counts per dimension.
    Pad { padding: Vec<(i64, i64)> },
}

/// One operator instance: its io argument bindings and parameters.
#[derive(Debug)]
pub struct Operator {
    op_type: String,
    layer: HlirLayer,
    inputs: Vec<(String, String)>,
    outputs: Vec<(String, String)>,
    param: OperatorParam,
    compiled: bool,
}

impl Operator {
    pub fn new(op_type: impl Into<String>, layer: HlirLayer, param: OperatorParam) -> Operator {
        Operator {
            op_type: op_type.into(),
            layer,
            inputs: Vec::new(),
            outputs: Vec::new(),
            param,
            compiled: false,
        }
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn layer(&self) -> HlirLayer {
        self.layer
    }

    pub fn param(&self) -> &OperatorParam {
        &self.param
    }

    pub fn set_input(&mut self, argument: impl Into<String>, value: impl Into<String>) {
        self.inputs.push((argument.into(), value.into()));
    }

    pub fn set_output(&mut self, argument: impl Into<String>, value: impl Into<String>) {
        self.outputs.push((argument.into(), value.into()));
    }

    pub fn inputs(&self) -> &[(String, String)] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[(String, String)] {
        &self.outputs
    }

    pub fn input(&self, argument: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|(a, _)| a == argument)
            .map(|(_, v)| v.as_str())
    }

    pub fn output(&self, argument: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|(a, _)| a == argument)
            .map(|(_, v)| v.as_str())
    }

    pub fn compiled(&self) -> bool {
        self.compiled
    }

    /// Infer the output type, resize the outputs, and emit stages. Each
    /// operator compiles exactly once.
    pub fn compile(
        &mut self,
        registry: &OpRegistry,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        if self.compiled {
            return Err(CompileError::schedule(format!(
                "operator '{}' compiled twice",
                self.op_type
            )));
        }
        let Some(kernel) = registry.get(self.layer, &self.op_type) else {
            return Err(CompileError::lookup("operator", self.op_type.clone()));
        };
        kernel.infer_output_type(self, session)?;
        kernel.resize(self, session, ctx)?;
        kernel.compile(self, session, ctx)?;
        self.compiled = true;
        Ok(())
    }
}

/// The compute logic behind one operator type.
pub trait OpKernel {
    /// Propagate the element type; the default copies the first input's
    /// type to every output.
    fn infer_output_type(&self, op: &Operator, session: &mut Session) -> Result<(), CompileError> {
        let (_, first) = op.inputs().first().ok_or_else(|| {
            CompileError::shape(format!("operator '{}' has no inputs", op.op_type()))
        })?;
        let id = lookup(session, first)?;
        let ptype = session.tensor(id).ptype();
        for (_, name) in op.outputs() {
            let out = lookup(session, name)?;
            session.tensor_mut(out).set_ptype(ptype);
        }
        Ok(())
    }

    /// Shape the outputs and align iterators across the operands.
    fn resize(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError>;

    /// Emit the stages into the output tensor.
    fn compile(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError>;
}

/// Operator registry keyed by `(layer, type)`.
#[derive(Default)]
pub struct OpRegistry {
    kernels: FxHashMap<(HlirLayer, String), Box<dyn OpKernel>>,
}

impl OpRegistry {
    /// An empty registry.
    pub fn new() -> OpRegistry {
        OpRegistry::default()
    }

    /// The registry with every instruction-layer kernel installed.
    pub fn with_instruction_ops() -> OpRegistry {
        let mut registry = OpRegistry::new();
        registry.register_instruction_ops();
        registry
    }

    pub fn register(
        &mut self,
        layer: HlirLayer,
        op_type: impl Into<String>,
        kernel: Box<dyn OpKernel>,
    ) {
        self.kernels.insert((layer, op_type.into()), kernel);
    }

    pub fn get(&self, layer: HlirLayer, op_type: &str) -> Option<&dyn OpKernel> {
        self.kernels
            .get(&(layer, op_type.to_owned()))
            .map(Box::as_ref)
    }

    /// Install the instruction-layer kernels.
    pub fn register_instruction_ops(&mut self) {
        use HlirLayer::InstructionWise;
        self.register(InstructionWise, "matmul", Box::new(MatMulKernel));
        self.register(
            InstructionWise,
            "elementwise_add",
            Box::new(ElementwiseKernel(ElementwiseKind::Add)),
        );
        self.register(
            InstructionWise,
            "elementwise_sub",
            Box::new(ElementwiseKernel(ElementwiseKind::Sub)),
        );
        self.register(
            InstructionWise,
            "elementwise_mul",
            Box::new(ElementwiseKernel(ElementwiseKind::Mul)),
        );
        self.register(
            InstructionWise,
            "elementwise_div",
            Box::new(ElementwiseKernel(ElementwiseKind::Div)),
        );
        self.register(InstructionWise, "bias_add", Box::new(BiasAddKernel));
        self.register(InstructionWise, "relu", Box::new(ReluKernel));
        self.register(InstructionWise, "tanh", Box::new(TanhKernel));
        self.register(InstructionWise, "sigmoid", Box::new(SigmoidKernel));
        self.register(InstructionWise, "transpose", Box::new(TransposeKernel));
        self.register(InstructionWise, "reshape", Box::new(ReshapeKernel));
        self.register(InstructionWise, "pad", Box::new(PadKernel));
    }
}

fn lookup(session: &Session, name: &str) -> Result<TensorId, CompileError> {
    session
        .get_tensor(name)
        .ok_or_else(|| CompileError::lookup("tensor", name))
}

fn input_id(op: &Operator, session: &Session, argument: &str) -> Result<TensorId, CompileError> {
    let name = op.input(argument).ok_or_else(|| {
        CompileError::shape(format!(
            "operator '{}' is missing input argument '{argument}'",
            op.op_type()
        ))
    })?;
    lookup(session, name)
}

fn output_id(op: &Operator, session: &Session, argument: &str) -> Result<TensorId, CompileError> {
    let name = op.output(argument).ok_or_else(|| {
        CompileError::shape(format!(
            "operator '{}' is missing output argument '{argument}'",
            op.op_type()
        ))
    })?;
    lookup(session, name)
}

// =============================================================================
// INSTRUCTION-LAYER KERNELS
// =============================================================================

/// `Out[i, j] += X[i, k] * W[k, j]`
struct MatMulKernel;

impl OpKernel for MatMulKernel {
    fn resize(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        let x = input_id(op, session, "X")?;
        let w = input_id(op, session, "W")?;
        let out = output_id(op, session, "Out")?;

        let x_shape = session.tensor(x).shape().to_vec();
        let w_shape = session.tensor(w).shape().to_vec();
        if x_shape.len() != 2 || w_shape.len() != 2 {
            return Err(CompileError::shape(format!(
                "matmul expects rank-2 operands, got {:?} and {:?}",
                x_shape, w_shape
            )));
        }
        if x_shape[1] != w_shape[0] {
            return Err(CompileError::shape(format!(
                "matmul contraction mismatch: {} vs {}",
                x_shape[1], w_shape[0]
            )));
        }

        let x_iters = session.tensor_mut(x).iterators(ctx)?.to_vec();
        let w_iters = session.tensor_mut(w).iterators(ctx)?.to_vec();
        // share the contraction iterator, reuse W's column iterator
        session
            .tensor_mut(w)
            .set_iterators(vec![x_iters[1].clone(), w_iters[1].clone()]);

        let out_tensor = session.tensor_mut(out);
        out_tensor.set_shape(vec![x_shape[0], w_shape[1]]);
        out_tensor.set_iterators(vec![x_iters[0].clone(), w_iters[1].clone()]);
        Ok(())
    }

    fn compile(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        let x = input_id(op, session, "X")?;
        let w = input_id(op, session, "W")?;
        let out = output_id(op, session, "Out")?;

        let x_elem = session.tensor_mut(x).elem(ctx)?;
        let w_elem = session.tensor_mut(w).elem(ctx)?;
        let out_elem = session.tensor_mut(out).elem(ctx)?;

        let product = Expr::binary(BinOpr::Mul, x_elem, w_elem)?;
        let expr = Expr::assign(AssignOpr::SumAssign, out_elem, product)?;
        let stage = Stage::from_expr(ctx, expr)?;
        session.tensor_mut(out).add_stage(stage);
        Ok(())
    }
}

/// `Out[…] = X[…] <op> Y[…]` over identical shapes.
struct ElementwiseKernel(ElementwiseKind);

impl OpKernel for ElementwiseKernel {
    fn resize(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        let x = input_id(op, session, "X")?;
        let y = input_id(op, session, "Y")?;
        let out = output_id(op, session, "Out")?;

        let x_shape = session.tensor(x).shape().to_vec();
        let y_shape = session.tensor(y).shape().to_vec();
        if x_shape != y_shape {
            return Err(CompileError::shape(format!(
                "elementwise operands disagree on shape: {:?} vs {:?}",
                x_shape, y_shape
            )));
        }
        let x_iters = session.tensor_mut(x).iterators(ctx)?.to_vec();
        session.tensor_mut(y).set_iterators(x_iters.clone());
        let out_tensor = session.tensor_mut(out);
        out_tensor.set_shape(x_shape);
        out_tensor.set_iterators(x_iters);
        Ok(())
    }

    fn compile(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        let x = input_id(op, session, "X")?;
        let y = input_id(op, session, "Y")?;
        let out = output_id(op, session, "Out")?;

        let x_elem = session.tensor_mut(x).elem(ctx)?;
        let y_elem = session.tensor_mut(y).elem(ctx)?;
        let out_elem = session.tensor_mut(out).elem(ctx)?;
        let rhs = Expr::binary(self.0.bin_opr(), x_elem, y_elem)?;
        let stage = Stage::from_expr(ctx, Expr::assign(AssignOpr::Assign, out_elem, rhs)?)?;
        session.tensor_mut(out).add_stage(stage);
        Ok(())
    }
}

/// `Out[i, j] = X[i, j] + Bias[j]`
struct BiasAddKernel;

impl OpKernel for BiasAddKernel {
    fn resize(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        let x = input_id(op, session, "X")?;
        let bias = input_id(op, session, "Bias")?;
        let out = output_id(op, session, "Out")?;

        let x_shape = session.tensor(x).shape().to_vec();
        let bias_shape = session.tensor(bias).shape().to_vec();
        if x_shape.len() != 2 || bias_shape.len() != 1 || bias_shape[0] != x_shape[1] {
            return Err(CompileError::shape(format!(
                "bias_add expects X[m, n] and Bias[n], got {:?} and {:?}",
                x_shape, bias_shape
            )));
        }
        let x_iters = session.tensor_mut(x).iterators(ctx)?.to_vec();
        session
            .tensor_mut(bias)
            .set_iterators(vec![x_iters[1].clone()]);
        let out_tensor = session.tensor_mut(out);
        out_tensor.set_shape(x_shape);
        out_tensor.set_iterators(x_iters);
        Ok(())
    }

    fn compile(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        let x = input_id(op, session, "X")?;
        let bias = input_id(op, session, "Bias")?;
        let out = output_id(op, session, "Out")?;

        let x_elem = session.tensor_mut(x).elem(ctx)?;
        let bias_elem = session.tensor_mut(bias).elem(ctx)?;
        let out_elem = session.tensor_mut(out).elem(ctx)?;
        let rhs = Expr::binary(BinOpr::Add, x_elem, bias_elem)?;
        let stage = Stage::from_expr(ctx, Expr::assign(AssignOpr::Assign, out_elem, rhs)?)?;
        session.tensor_mut(out).add_stage(stage);
        Ok(())
    }
}

/// Kernels for unary activations share the resize logic.
fn resize_unary(op: &Operator, session: &mut Session, ctx: &Context) -> Result<(), CompileError> {
    let x = input_id(op, session, "X")?;
    let out = output_id(op, session, "Out")?;
    let shape = session.tensor(x).shape().to_vec();
    if shape.is_empty() {
        return Err(CompileError::shape(format!(
            "input of '{}' has no shape",
            op.op_type()
        )));
    }
    let x_iters = session.tensor_mut(x).iterators(ctx)?.to_vec();
    let out_tensor = session.tensor_mut(out);
    out_tensor.set_shape(shape);
    out_tensor.set_iterators(x_iters);
    Ok(())
}

fn emit_unary_stage(
    op: &Operator,
    session: &mut Session,
    ctx: &Context,
    build: impl Fn(Expr) -> Result<Expr, CompileError>,
) -> Result<(), CompileError> {
    let x = input_id(op, session, "X")?;
    let out = output_id(op, session, "Out")?;
    let x_elem = session.tensor_mut(x).elem(ctx)?;
    let out_elem = session.tensor_mut(out).elem(ctx)?;
    let rhs = build(x_elem)?;
    let stage = Stage::from_expr(ctx, Expr::assign(AssignOpr::Assign, out_elem, rhs)?)?;
    session.tensor_mut(out).add_stage(stage);
    Ok(())
}

/// `Out = max(X, 0)`
struct ReluKernel;

impl OpKernel for ReluKernel {
    fn resize(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        resize_unary(op, session, ctx)
    }

    fn compile(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        emit_unary_stage(op, session, ctx, |x| Expr::max(x, Expr::float32(0.0)))
    }
}

/// `Out = (exp(2x) - 1) / (exp(2x) + 1)`
struct TanhKernel;

impl OpKernel for TanhKernel {
    fn resize(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        resize_unary(op, session, ctx)
    }

    fn compile(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        emit_unary_stage(op, session, ctx, |x| {
            let two_x = Expr::binary(BinOpr::Mul, Expr::float32(2.0), x)?;
            let e = Expr::unary(UnOpr::Exp, two_x)?;
            let num = Expr::binary(BinOpr::Sub, e.clone(), Expr::float32(1.0))?;
            let den = Expr::binary(BinOpr::Add, e, Expr::float32(1.0))?;
            Expr::binary(BinOpr::Div, num, den)
        })
    }
}

/// `Out = 1 / (1 + exp(-x))`
struct SigmoidKernel;

impl OpKernel for SigmoidKernel {
    fn resize(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        resize_unary(op, session, ctx)
    }

    fn compile(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        emit_unary_stage(op, session, ctx, |x| {
            let neg = Expr::unary(UnOpr::Minus, x)?;
            let e = Expr::unary(UnOpr::Exp, neg)?;
            let den = Expr::binary(BinOpr::Add, Expr::float32(1.0), e)?;
            Expr::binary(BinOpr::Div, Expr::float32(1.0), den)
        })
    }
}

/// `Out[perm(i…)] = X[i…]`; a weight transpose runs once.
struct TransposeKernel;

impl OpKernel for TransposeKernel {
    fn resize(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        let OperatorParam::Transpose { perm } = op.param() else {
            return Err(CompileError::shape("transpose operator without a permutation"));
        };
        let x = input_id(op, session, "X")?;
        let out = output_id(op, session, "Out")?;

        let shape = session.tensor(x).shape().to_vec();
        let mut sorted = perm.clone();
        sorted.sort_unstable();
        if shape.len() < 2 || sorted != (0..shape.len()).collect::<Vec<_>>() {
            return Err(CompileError::shape(format!(
                "invalid transpose permutation {:?} for shape {:?}",
                perm, shape
            )));
        }

        let x_iters = session.tensor_mut(x).iterators(ctx)?.to_vec();
        let out_shape: Vec<i64> = perm.iter().map(|&p| shape[p]).collect();
        let out_iters: Vec<Expr> = perm.iter().map(|&p| x_iters[p].clone()).collect();
        let out_tensor = session.tensor_mut(out);
        out_tensor.set_shape(out_shape);
        out_tensor.set_iterators(out_iters);
        Ok(())
    }

    fn compile(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        let x = input_id(op, session, "X")?;
        let out = output_id(op, session, "Out")?;
        let is_weight = {
            let name = session.tensor(x).name().to_owned();
            session.is_weight(&name)
        };

        let x_elem = session.tensor_mut(x).elem(ctx)?;
        let out_elem = session.tensor_mut(out).elem(ctx)?;
        let stage = Stage::from_expr(ctx, Expr::assign(AssignOpr::Assign, out_elem, x_elem)?)?;
        if is_weight {
            stage.set_call_once(true);
        }
        session.tensor_mut(out).add_stage(stage);
        Ok(())
    }
}

/// Zero-pad the borders: `Out[i+b0, j+b1] = X[i, j]`, with the padding
/// region zero-filled by stages guarded on one dimension each.
struct PadKernel;

impl PadKernel {
    fn padding<'a>(op: &'a Operator) -> Result<&'a [(i64, i64)], CompileError> {
        let OperatorParam::Pad { padding } = op.param() else {
            return Err(CompileError::shape("pad operator without padding amounts"));
        };
        Ok(padding)
    }
}

impl OpKernel for PadKernel {
    fn resize(
        &self,
        op: &Operator,
        session: &mut Session,
        _ctx: &Context,
    ) -> Result<(), CompileError> {
        let padding = Self::padding(op)?.to_vec();
        let x = input_id(op, session, "X")?;
        let out = output_id(op, session, "Out")?;

        let shape = session.tensor(x).shape().to_vec();
        if shape.is_empty() {
            return Err(CompileError::shape("pad input has no shape"));
        }
        if padding.len() != shape.len() {
            return Err(CompileError::shape(format!(
                "pad amounts cover {} dimensions but the input has rank {}",
                padding.len(),
                shape.len()
            )));
        }
        if padding.iter().any(|&(before, after)| before < 0 || after < 0) {
            return Err(CompileError::shape(format!(
                "negative pad amounts {:?}",
                padding
            )));
        }

        let out_shape: Vec<i64> = shape
            .iter()
            .zip(&padding)
            .map(|(&d, &(before, after))| d + before + after)
            .collect();
        session.tensor_mut(out).set_shape(out_shape);
        Ok(())
    }

    fn compile(
        &self,
        op: &Operator,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        let padding = Self::padding(op)?.to_vec();
        let x = input_id(op, session, "X")?;
        let out = output_id(op, session, "Out")?;

        // interior: the input shifted by the leading pad amounts
        let x_iters = session.tensor_mut(x).iterators(ctx)?.to_vec();
        let mut subscripts = Vec::with_capacity(x_iters.len());
        for (iter, &(before, _)) in x_iters.iter().zip(&padding) {
            let sub = if before == 0 {
                iter.clone()
            } else {
                Expr::binary(BinOpr::Add, iter.clone(), Expr::int(before))?
            };
            subscripts.push(sub);
        }
        let lhs = session.tensor(out).expr()?.at(subscripts)?;
        let rhs = session.tensor_mut(x).elem(ctx)?;
        let stage = Stage::from_expr(ctx, Expr::assign(AssignOpr::Assign, lhs, rhs)?)?;
        session.tensor_mut(out).add_stage(stage);

        // borders: one guarded zero-fill stage per padded side
        let out_iters = session.tensor_mut(out).iterators(ctx)?.to_vec();
        let out_shape = session.tensor(out).shape().to_vec();
        for (i, &(before, after)) in padding.iter().enumerate() {
            if before > 0 {
                let lhs = session.tensor_mut(out).elem(ctx)?;
                let stage =
                    Stage::from_expr(ctx, Expr::assign(AssignOpr::Assign, lhs, Expr::float32(0.0))?)?;
                stage.set_cond(&out_iters[i], &format!("< {before}"))?;
                session.tensor_mut(out).add_stage(stage);
            }
            if after > 0 {
                let lhs = session.tensor_mut(out).elem(ctx)?;
                let stage =
                    Stage::from_expr(ctx, Expr::assign(AssignOpr::Assign, lhs, Expr::float32(0.0))?)?;
                stage.set_cond(&out_iters[i], &format!(">= {}", out_shape[i] - after))?;
                session.tensor_mut(out).add_stage(stage);
            }
        }
        Ok(())
    }
}

/// A metadata-only view: same storage, new shape.
struct ReshapeKernel;

impl OpKernel for ReshapeKernel {
    fn resize(
        &self,
        op: &Operator,
        session: &mut Session,
        _ctx: &Context,
    ) -> Result<(), CompileError> {
        let OperatorParam::Reshape { shape } = op.param() else {
            return Err(CompileError::shape("reshape operator without a target shape"));
        };
        let x = input_id(op, session, "X")?;
        let out = output_id(op, session, "Out")?;

        let x_elements = session.tensor(x).num_elements()?;
        let new_elements: i64 = shape.iter().product();
        if x_elements != new_elements {
            return Err(CompileError::shape(format!(
                "reshape changes the element count: {x_elements} vs {new_elements}"
            )));
        }
        let storage = session.tensor(x).storage_name().to_owned();
        let out_tensor = session.tensor_mut(out);
        out_tensor.set_shape(shape.clone());
        out_tensor.set_storage_of(storage);
        Ok(())
    }

    fn compile(
        &self,
        _op: &Operator,
        _session: &mut Session,
        _ctx: &Context,
    ) -> Result<(), CompileError> {
        // a view emits no computation
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::dump;
    use crate::types::Primitive;

    fn float_tensor(session: &mut Session, name: &str, shape: Vec<i64>) -> TensorId {
        let id = session.new_tensor(name).unwrap();
        session.tensor_mut(id).set_shape(shape);
        session.tensor_mut(id).set_ptype(Primitive::Float32);
        id
    }

    #[test]
    fn matmul_emits_a_contraction_stage() {
        let ctx = Context::new();
        let mut session = Session::new();
        float_tensor(&mut session, "x", vec![3, 4]);
        float_tensor(&mut session, "w", vec![4, 2]);
        let out = session.new_tensor("out").unwrap();

        let registry = OpRegistry::with_instruction_ops();
        let mut op = Operator::new("matmul", HlirLayer::InstructionWise, OperatorParam::None);
        op.set_input("X", "x");
        op.set_input("W", "w");
        op.set_output("Out", "out");
        op.compile(&registry, &mut session, &ctx).unwrap();

        assert!(op.compiled());
        let out_tensor = session.tensor(out);
        assert_eq!(out_tensor.shape(), &[3, 2]);
        assert_eq!(out_tensor.stages().len(), 1);
        let text = dump(&out_tensor.stages()[0].expr());
        assert!(text.contains("+="));
        assert!(text.contains("x<3,4>"));
        assert!(text.contains("w<4,2>"));
    }

    #[test]
    fn unknown_operator_is_a_lookup_error() {
        let ctx = Context::new();
        let mut session = Session::new();
        let registry = OpRegistry::with_instruction_ops();
        let mut op = Operator::new("conv9d", HlirLayer::InstructionWise, OperatorParam::None);
        assert!(matches!(
            op.compile(&registry, &mut session, &ctx),
            Err(CompileError::Lookup { .. })
        ));
    }

    #[test]
    fn matmul_shape_mismatch_is_rejected() {
        let ctx = Context::new();
        let mut session = Session::new();
        float_tensor(&mut session, "x", vec![3, 4]);
        float_tensor(&mut session, "w", vec![5, 2]);
        session.new_tensor("out").unwrap();

        let registry = OpRegistry::with_instruction_ops();
        let mut op = Operator::new("matmul", HlirLayer::InstructionWise, OperatorParam::None);
        op.set_input("X", "x");
        op.set_input("W", "w");
        op.set_output("Out", "out");
        assert!(op.compile(&registry, &mut session, &ctx).is_err());
    }

    #[test]
    fn reshape_is_a_view() {
        let ctx = Context::new();
        let mut session = Session::new();
        float_tensor(&mut session, "x", vec![3, 4]);
        let out = session.new_tensor("flat").unwrap();

        let registry = OpRegistry::with_instruction_ops();
        let mut op = Operator::new(
            "reshape",
            HlirLayer::InstructionWise,
            OperatorParam::Reshape { shape: vec![12] },
        );
        op.set_input("X", "x");
        op.set_output("Out", "flat");
        op.compile(&registry, &mut session, &ctx).unwrap();

        let out_tensor = session.tensor(out);
        assert_eq!(out_tensor.shape(), &[12]);
        assert_eq!(out_tensor.storage_name(), "x");
        assert!(out_tensor.stages().is_empty());
    }

    #[test]
    fn pad_offsets_the_interior_and_zero_fills_borders() {
        let ctx = Context::new();
        let mut session = Session::new();
        float_tensor(&mut session, "x", vec![2, 3]);
        let out = session.new_tensor("out").unwrap();

        let registry = OpRegistry::with_instruction_ops();
        let mut op = Operator::new(
            "pad",
            HlirLayer::InstructionWise,
            OperatorParam::Pad {
                padding: vec![(1, 1), (0, 2)],
            },
        );
        op.set_input("X", "x");
        op.set_output("Out", "out");
        op.compile(&registry, &mut session, &ctx).unwrap();

        let out_tensor = session.tensor(out);
        assert_eq!(out_tensor.shape(), &[4, 5]);
        // one interior copy plus one zero stage per padded side
        assert_eq!(out_tensor.stages().len(), 4);

        let interior = dump(&out_tensor.stages()[0].expr());
        assert!(interior.contains("(i0 + 1)"));
        assert!(interior.contains("= x<2,3>[i0,i1];"));

        // border guards narrow the iteration domains
        assert!(out_tensor.stages()[1].domain().to_string().contains("i2 < 1"));
        assert!(out_tensor.stages()[2].domain().to_string().contains("i2 >= 3"));
        assert!(out_tensor.stages()[3].domain().to_string().contains("i3 >= 3"));
    }

    #[test]
    fn pad_amounts_must_cover_every_dimension() {
        let ctx = Context::new();
        let mut session = Session::new();
        float_tensor(&mut session, "x", vec![2, 3]);
        session.new_tensor("out").unwrap();

        let registry = OpRegistry::with_instruction_ops();
        let mut op = Operator::new(
            "pad",
            HlirLayer::InstructionWise,
            OperatorParam::Pad {
                padding: vec![(1, 1)],
            },
        );
        op.set_input("X", "x");
        op.set_output("Out", "out");
        assert!(op.compile(&registry, &mut session, &ctx).is_err());
    }

    #[test]
    fn weight_transpose_is_call_once() {
        let ctx = Context::new();
        let mut session = Session::new();
        float_tensor(&mut session, "w", vec![2, 3]);
        session
            .mark_weight("w", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap();
        let out = session.new_tensor("wt").unwrap();

        let registry = OpRegistry::with_instruction_ops();
        let mut op = Operator::new(
            "transpose",
            HlirLayer::InstructionWise,
            OperatorParam::Transpose { perm: vec![1, 0] },
        );
        op.set_input("X", "w");
        op.set_output("Out", "wt");
        op.compile(&registry, &mut session, &ctx).unwrap();

        let stage = &session.tensor(out).stages()[0];
        assert!(stage.is_call_once());
        assert_eq!(session.tensor(out).shape(), &[3, 2]);
    }
}
