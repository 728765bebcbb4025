//! The network front end: a declarative model description.

use crate::error::CompileError;

use super::op::{ElementwiseKind, HlirLayer, OperatorParam};

/// One operator of a [`Program`], by name bindings.
#[derive(Debug, Clone)]
pub struct OpDesc {
    pub layer: HlirLayer,
    pub op_type: String,
    pub inputs: Vec<(String, String)>,
    pub outputs: Vec<(String, String)>,
    pub param: OperatorParam,
}

/// A compiled network: ordered operators plus the declared io and
/// weights.
#[derive(Debug, Clone)]
pub struct Program {
    pub ops: Vec<OpDesc>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub weights: Vec<(String, Vec<f32>)>,
}

/// Builds a model operator by operator, then compiles to a [`Program`].
/// Once compiled, the network is consumed.
#[derive(Debug, Default)]
pub struct Network {
    name: String,
    ops: Vec<OpDesc>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    weights: Vec<(String, Vec<f32>)>,
}

impl Network {
    pub fn new(name: impl Into<String>) -> Network {
        Network {
            name: name.into(),
            ..Network::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_operators(&self) -> usize {
        self.ops.len()
    }

    /// Declare a model input tensor (created by the caller in the
    /// session, with shape and type set).
    pub fn decl_input(&mut self, name: impl Into<String>) {
        self.inputs.push(name.into());
    }

    /// Declare a model output tensor.
    pub fn decl_output(&mut self, name: impl Into<String>) {
        self.outputs.push(name.into());
    }

    /// Declare a weight tensor and its payload.
    pub fn decl_weight(&mut self, name: impl Into<String>, data: Vec<f32>) {
        self.weights.push((name.into(), data));
    }

    fn push(
        &mut self,
        op_type: &str,
        inputs: Vec<(&str, &str)>,
        out: &str,
        param: OperatorParam,
    ) {
        self.ops.push(OpDesc {
            layer: HlirLayer::InstructionWise,
            op_type: op_type.to_owned(),
            inputs: inputs
                .into_iter()
                .map(|(a, v)| (a.to_owned(), v.to_owned()))
                .collect(),
            outputs: vec![("Out".to_owned(), out.to_owned())],
            param,
        });
    }

    /// `out = x @ w`
    pub fn add_mat_mul(&mut self, x: &str, w: &str, out: &str) {
        self.push("matmul", vec![("X", x), ("W", w)], out, OperatorParam::None);
    }

    /// `out = x <kind> y`, elementwise.
    pub fn add_elementwise(&mut self, kind: ElementwiseKind, x: &str, y: &str, out: &str) {
        let op_type = match kind {
            ElementwiseKind::Add => "elementwise_add",
            ElementwiseKind::Sub => "elementwise_sub",
            ElementwiseKind::Mul => "elementwise_mul",
            ElementwiseKind::Div => "elementwise_div",
        };
        self.push(
            op_type,
            vec![("X", x), ("Y", y)],
            out,
            OperatorParam::Elementwise(kind),
        );
    }

    /// `out[i, j] = x[i, j] + bias[j]`
    pub fn add_bias(&mut self, x: &str, bias: &str, out: &str) {
        self.push(
            "bias_add",
            vec![("X", x), ("Bias", bias)],
            out,
            OperatorParam::None,
        );
    }

    /// `out = max(x, 0)`
    pub fn add_relu(&mut self, x: &str, out: &str) {
        self.push("relu", vec![("X", x)], out, OperatorParam::None);
    }

    pub fn add_tanh(&mut self, x: &str, out: &str) {
        self.push("tanh", vec![("X", x)], out, OperatorParam::None);
    }

    pub fn add_sigmoid(&mut self, x: &str, out: &str) {
        self.push("sigmoid", vec![("X", x)], out, OperatorParam::None);
    }

    /// `out = transpose(x, perm)`
    pub fn add_transpose(&mut self, perm: Vec<usize>, x: &str, out: &str) {
        self.push(
            "transpose",
            vec![("X", x)],
            out,
            OperatorParam::Transpose { perm },
        );
    }

    /// `out = reshape(x, shape)`; a view, no computation.
    pub fn add_reshape(&mut self, shape: Vec<i64>, x: &str, out: &str) {
        self.push(
            "reshape",
            vec![("X", x)],
            out,
            OperatorParam::Reshape { shape },
        );
    }

    /// `out = pad(x)` with `(before, after)` zero borders per dimension.
    pub fn add_pad(&mut self, padding: Vec<(i64, i64)>, x: &str, out: &str) {
        self.push("pad", vec![("X", x)], out, OperatorParam::Pad { padding });
    }

    /// A fully-connected layer: matmul, bias add, relu.
    pub fn add_fc(&mut self, x: &str, w: &str, bias: &str, out: &str) {
        let mm = format!("{out}_mm");
        let biased = format!("{out}_biased");
        self.add_mat_mul(x, w, &mm);
        self.add_bias(&mm, bias, &biased);
        self.add_relu(&biased, out);
    }

    /// Freeze the network into a program. The network must have at least
    /// one operator and declared inputs and outputs.
    pub fn compile(self) -> Result<Program, CompileError> {
        if self.ops.is_empty() {
            return Err(CompileError::shape(format!(
                "network '{}' has no operators",
                self.name
            )));
        }
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(CompileError::shape(format!(
                "network '{}' must declare inputs and outputs",
                self.name
            )));
        }
        Ok(Program {
            ops: self.ops,
            inputs: self.inputs,
            outputs: self.outputs,
            weights: self.weights,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fc_expands_to_three_operators() {
        let mut net = Network::new("fc");
        net.decl_input("x");
        net.decl_weight("w", vec![0.0; 8]);
        net.decl_weight("b", vec![0.0; 2]);
        net.decl_output("out");
        net.add_fc("x", "w", "b", "out");
        assert_eq!(net.num_operators(), 3);
        let program = net.compile().unwrap();
        assert_eq!(program.ops[0].op_type, "matmul");
        assert_eq!(program.ops[1].op_type, "bias_add");
        assert_eq!(program.ops[2].op_type, "relu");
        assert_eq!(program.ops[2].outputs[0].1, "out");
    }

    #[test]
    fn empty_networks_do_not_compile() {
        let net = Network::new("empty");
        assert!(net.compile().is_err());
    }
}
